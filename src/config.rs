//! Configuration loading from TOML with documented defaults.
//!
//! Reads `cascade.toml` and deserializes into a single flat
//! `EngineConfig`. Every field has a default, so partial documents are
//! fine. A malformed document is logged and the full default config is
//! used instead; the engine never refuses to start over its config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::types::{CascadeError, GenerationMode};

/// Default config file path.
pub const DEFAULT_CONFIG_FILE: &str = "cascade.toml";

/// Upper bound for spacing, failsafe cooldown and scan interval: one week.
pub const MAX_WAIT_SECS: u64 = 7 * 24 * 3600;

/// Upper bound for leg and route timeouts: one hour.
pub const MAX_TIMEOUT_MS: u64 = 3_600_000;

/// Engine configuration. Loaded once, replaceable at runtime via
/// `ConfigPatch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Position-size cap as a percent of available capital.
    pub max_position_pct: f64,
    /// Minimum route profit in USD to admit a route.
    pub min_profit_threshold_usd: f64,
    /// Maximum tolerated slippage per hop, percent.
    pub max_slippage_pct: f64,
    pub max_daily_routes: u64,
    /// Flash-borrow capital sources.
    pub capital_sources: Vec<String>,
    /// Execution venues.
    pub venues: Vec<String>,
    /// Per-route fee budget in USD.
    pub max_fee_budget_usd: f64,
    /// Per-leg attempt timeout.
    pub leg_timeout_ms: u64,
    /// Whole-route timeout.
    pub route_timeout_ms: u64,
    /// Tradable asset universe.
    pub assets: Vec<String>,
    pub mode: GenerationMode,
    pub max_depth: usize,
    pub min_profit_per_leg_pct: f64,
    /// Strategy-wide bar for a whole route. Never below the per-leg bar.
    pub min_route_profit_pct: f64,
    pub max_total_borrow_usd: f64,
    /// Waterfall amount multiplier per level.
    pub level_multiplier: f64,
    pub min_execution_spacing_secs: u64,
    pub base_borrow_amount: f64,
    pub base_borrow_asset: String,
    pub failsafe_max_failures: u32,
    pub failsafe_cooldown_secs: u64,
    pub max_concurrent_routes: usize,
    pub cross_venue_enabled: bool,
    pub bridges: Vec<String>,
    /// Parallel-sync chain length before the join barrier (1..=3).
    pub sync_depth: usize,
    pub scan_interval_secs: u64,
    /// Discount leg profit by trade size relative to 24h volume.
    pub market_impact: bool,
    pub stats_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_position_pct: 20.0,
            min_profit_threshold_usd: 0.5,
            max_slippage_pct: 1.0,
            max_daily_routes: 200,
            capital_sources: vec!["solend".into(), "marginfi".into(), "kamino".into()],
            venues: vec![
                "jupiter".into(),
                "raydium".into(),
                "orca".into(),
                "openbook".into(),
            ],
            max_fee_budget_usd: 5.0,
            leg_timeout_ms: 10_000,
            route_timeout_ms: 60_000,
            assets: vec![
                "USDC".into(),
                "SOL".into(),
                "ETH".into(),
                "BTC".into(),
                "RAY".into(),
                "JUP".into(),
                "ORCA".into(),
                "BONK".into(),
            ],
            mode: GenerationMode::Waterfall,
            max_depth: 4,
            min_profit_per_leg_pct: 0.1,
            min_route_profit_pct: 0.3,
            max_total_borrow_usd: 50_000.0,
            level_multiplier: 1.5,
            min_execution_spacing_secs: 30,
            base_borrow_amount: 100.0,
            base_borrow_asset: "USDC".into(),
            failsafe_max_failures: 3,
            failsafe_cooldown_secs: 30 * 60,
            max_concurrent_routes: 1,
            cross_venue_enabled: false,
            bridges: vec!["wormhole".into()],
            sync_depth: 2,
            scan_interval_secs: 15,
            market_impact: true,
            stats_path: "cascade_stats.json".into(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: EngineConfig =
            toml::from_str(&contents).map_err(|e| CascadeError::Config(format!("{path}: {e}")))?;
        Ok(config.validate())
    }

    /// Load configuration, falling back to defaults on any problem.
    ///
    /// A missing file is normal (fresh install); a malformed one is
    /// logged at warn and replaced wholesale by the defaults.
    pub fn load_or_default(path: &str) -> Self {
        if !Path::new(path).exists() {
            info!(path, "No config file found, using defaults");
            return Self::default();
        }
        match Self::load(path) {
            Ok(cfg) => {
                info!(path, mode = %cfg.mode, "Configuration loaded");
                cfg
            }
            Err(e) => {
                warn!(path, error = format!("{e:#}"), "Malformed config, using defaults");
                Self::default()
            }
        }
    }

    /// Parse a TOML document, falling back to defaults when malformed.
    pub fn from_toml_or_default(doc: &str) -> Self {
        match toml::from_str::<EngineConfig>(doc) {
            Ok(cfg) => cfg.validate(),
            Err(e) => {
                warn!(error = %e, "Malformed config document, using defaults");
                Self::default()
            }
        }
    }

    /// Clamp out-of-range values into their legal ranges.
    pub fn validate(mut self) -> Self {
        let defaults = Self::default();

        if self.max_depth == 0 || self.max_depth > 8 {
            warn!(max_depth = self.max_depth, "max_depth out of range, clamping to 1..=8");
            self.max_depth = self.max_depth.clamp(1, 8);
        }
        if !(1..=3).contains(&self.sync_depth) {
            warn!(sync_depth = self.sync_depth, "sync_depth out of range, clamping to 1..=3");
            self.sync_depth = self.sync_depth.clamp(1, 3);
        }
        if self.min_route_profit_pct < self.min_profit_per_leg_pct {
            warn!(
                route_bar = self.min_route_profit_pct,
                leg_bar = self.min_profit_per_leg_pct,
                "Route profit bar below per-leg bar, raising it"
            );
            self.min_route_profit_pct = self.min_profit_per_leg_pct;
        }
        if self.level_multiplier <= 0.0 {
            self.level_multiplier = defaults.level_multiplier;
        }
        if self.base_borrow_amount <= 0.0 {
            self.base_borrow_amount = defaults.base_borrow_amount;
        }
        if self.max_concurrent_routes == 0 {
            self.max_concurrent_routes = 1;
        }
        self.scan_interval_secs = self.scan_interval_secs.clamp(1, MAX_WAIT_SECS);
        if self.min_execution_spacing_secs > MAX_WAIT_SECS || self.failsafe_cooldown_secs > MAX_WAIT_SECS {
            warn!(
                spacing_secs = self.min_execution_spacing_secs,
                cooldown_secs = self.failsafe_cooldown_secs,
                "Wait longer than a week, clamping"
            );
            self.min_execution_spacing_secs = self.min_execution_spacing_secs.min(MAX_WAIT_SECS);
            self.failsafe_cooldown_secs = self.failsafe_cooldown_secs.min(MAX_WAIT_SECS);
        }
        self.leg_timeout_ms = self.leg_timeout_ms.clamp(1, MAX_TIMEOUT_MS);
        self.route_timeout_ms = self.route_timeout_ms.clamp(1, MAX_TIMEOUT_MS);
        self.max_position_pct = self.max_position_pct.clamp(0.0, 100.0);
        self.max_slippage_pct = self.max_slippage_pct.clamp(0.0, 100.0);

        if self.venues.len() < 2 {
            warn!("Fewer than two venues configured, using default venue set");
            self.venues = defaults.venues;
        }
        if self.assets.len() < 3 {
            warn!("Fewer than three assets configured, using default asset universe");
            self.assets = defaults.assets;
        }
        if !self.assets.contains(&self.base_borrow_asset) {
            self.assets.insert(0, self.base_borrow_asset.clone());
        }
        self
    }

    /// Apply a partial update and re-validate.
    pub fn apply(&self, patch: &ConfigPatch) -> Self {
        let mut next = self.clone();
        macro_rules! set {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = &patch.$field { next.$field = v.clone(); })*
            };
        }
        set!(
            max_position_pct,
            min_profit_threshold_usd,
            max_slippage_pct,
            max_daily_routes,
            capital_sources,
            venues,
            max_fee_budget_usd,
            leg_timeout_ms,
            route_timeout_ms,
            assets,
            mode,
            max_depth,
            min_profit_per_leg_pct,
            min_route_profit_pct,
            max_total_borrow_usd,
            level_multiplier,
            min_execution_spacing_secs,
            base_borrow_amount,
            base_borrow_asset,
            failsafe_max_failures,
            failsafe_cooldown_secs,
            max_concurrent_routes,
            cross_venue_enabled,
            bridges,
            sync_depth,
            scan_interval_secs,
            market_impact,
        );
        next.validate()
    }

    /// Capital available for a single route, in USD.
    pub fn position_cap_usd(&self) -> f64 {
        self.max_total_borrow_usd * self.max_position_pct / 100.0
    }
}

/// Partial configuration for `CascadeEngine::update_config`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigPatch {
    pub max_position_pct: Option<f64>,
    pub min_profit_threshold_usd: Option<f64>,
    pub max_slippage_pct: Option<f64>,
    pub max_daily_routes: Option<u64>,
    pub capital_sources: Option<Vec<String>>,
    pub venues: Option<Vec<String>>,
    pub max_fee_budget_usd: Option<f64>,
    pub leg_timeout_ms: Option<u64>,
    pub route_timeout_ms: Option<u64>,
    pub assets: Option<Vec<String>>,
    pub mode: Option<GenerationMode>,
    pub max_depth: Option<usize>,
    pub min_profit_per_leg_pct: Option<f64>,
    pub min_route_profit_pct: Option<f64>,
    pub max_total_borrow_usd: Option<f64>,
    pub level_multiplier: Option<f64>,
    pub min_execution_spacing_secs: Option<u64>,
    pub base_borrow_amount: Option<f64>,
    pub base_borrow_asset: Option<String>,
    pub failsafe_max_failures: Option<u32>,
    pub failsafe_cooldown_secs: Option<u64>,
    pub max_concurrent_routes: Option<usize>,
    pub cross_venue_enabled: Option<bool>,
    pub bridges: Option<Vec<String>>,
    pub sync_depth: Option<usize>,
    pub scan_interval_secs: Option<u64>,
    pub market_impact: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let cfg = EngineConfig::from_toml_or_default(
            r#"
            mode = "fractal"
            max_depth = 3
            level_multiplier = 2.0
            "#,
        );
        assert_eq!(cfg.mode, GenerationMode::Fractal);
        assert_eq!(cfg.max_depth, 3);
        assert_eq!(cfg.level_multiplier, 2.0);
        assert_eq!(cfg.base_borrow_asset, "USDC");
        assert_eq!(cfg.failsafe_cooldown_secs, 1800);
    }

    #[test]
    fn test_malformed_document_uses_defaults_in_full() {
        let cfg = EngineConfig::from_toml_or_default("max_depth = \"deep\"\nmode = [");
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn test_validate_clamps_ranges() {
        let cfg = EngineConfig {
            max_depth: 0,
            sync_depth: 9,
            min_profit_per_leg_pct: 0.5,
            min_route_profit_pct: 0.2,
            venues: vec!["jupiter".into()],
            ..EngineConfig::default()
        }
        .validate();
        assert_eq!(cfg.max_depth, 1);
        assert_eq!(cfg.sync_depth, 3);
        assert_eq!(cfg.min_route_profit_pct, 0.5);
        assert!(cfg.venues.len() >= 2);
    }

    #[test]
    fn test_validate_bounds_waits_and_timeouts() {
        let cfg = EngineConfig {
            min_execution_spacing_secs: 100_000_000_000_000,
            failsafe_cooldown_secs: u64::MAX,
            scan_interval_secs: u64::MAX,
            leg_timeout_ms: u64::MAX,
            route_timeout_ms: 0,
            ..EngineConfig::default()
        }
        .validate();
        assert_eq!(cfg.min_execution_spacing_secs, MAX_WAIT_SECS);
        assert_eq!(cfg.failsafe_cooldown_secs, MAX_WAIT_SECS);
        assert_eq!(cfg.scan_interval_secs, MAX_WAIT_SECS);
        assert_eq!(cfg.leg_timeout_ms, MAX_TIMEOUT_MS);
        assert_eq!(cfg.route_timeout_ms, 1);
    }

    #[test]
    fn test_patch_cannot_push_waits_out_of_range() {
        let patch = ConfigPatch {
            min_execution_spacing_secs: Some(100_000_000_000_000),
            failsafe_cooldown_secs: Some(10_000_000_000_000_000),
            ..ConfigPatch::default()
        };
        let next = EngineConfig::default().apply(&patch);
        assert_eq!(next.min_execution_spacing_secs, MAX_WAIT_SECS);
        assert_eq!(next.failsafe_cooldown_secs, MAX_WAIT_SECS);
    }

    #[test]
    fn test_unparseable_file_is_a_config_error() {
        let mut path = std::env::temp_dir();
        path.push(format!("cascade_test_config_{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "mode = [").unwrap();

        let err = EngineConfig::load(&path.to_string_lossy()).unwrap_err();
        assert!(matches!(err.downcast_ref::<CascadeError>(), Some(CascadeError::Config(_))));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_base_asset_joins_universe() {
        let cfg = EngineConfig {
            base_borrow_asset: "USDT".into(),
            ..EngineConfig::default()
        }
        .validate();
        assert_eq!(cfg.assets[0], "USDT");
    }

    #[test]
    fn test_apply_patch() {
        let cfg = EngineConfig::default();
        let patch: ConfigPatch = serde_json::from_str(
            r#"{ "mode": "quantum", "max_depth": 5, "failsafe_max_failures": 2 }"#,
        )
        .unwrap();
        let next = cfg.apply(&patch);
        assert_eq!(next.mode, GenerationMode::Quantum);
        assert_eq!(next.max_depth, 5);
        assert_eq!(next.failsafe_max_failures, 2);
        assert_eq!(next.venues, cfg.venues);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let cfg = EngineConfig::load_or_default("/tmp/cascade_missing_config_xyz.toml");
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn test_load_or_default_malformed_file() {
        let mut p = std::env::temp_dir();
        p.push(format!("cascade_test_cfg_{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&p, "this is = = not toml").unwrap();
        let cfg = EngineConfig::load_or_default(&p.to_string_lossy());
        assert_eq!(cfg, EngineConfig::default());
        std::fs::remove_file(&p).unwrap();
    }
}
