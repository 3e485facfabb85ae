//! Shared types for the CASCADE engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that oracle, strategy, generator
//! and engine modules can depend on them without circular references.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Generation mode
// ---------------------------------------------------------------------------

/// Route generation mode. Each variant maps to exactly one strategy in
/// `crate::generator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    Sequential,
    Waterfall,
    ParallelSync,
    Fractal,
    Quantum,
}

impl GenerationMode {
    /// All known modes (useful for iteration).
    pub const ALL: &'static [GenerationMode] = &[
        GenerationMode::Sequential,
        GenerationMode::Waterfall,
        GenerationMode::ParallelSync,
        GenerationMode::Fractal,
        GenerationMode::Quantum,
    ];

    /// Whether a failed leg aborts the rest of the route.
    ///
    /// Waterfall legs feed capital into the next level and sequential
    /// routes are all-or-nothing combinations; the other modes keep going.
    pub fn aborts_on_failure(&self) -> bool {
        matches!(self, GenerationMode::Waterfall | GenerationMode::Sequential)
    }
}

impl Default for GenerationMode {
    fn default() -> Self {
        GenerationMode::Waterfall
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationMode::Sequential => write!(f, "sequential"),
            GenerationMode::Waterfall => write!(f, "waterfall"),
            GenerationMode::ParallelSync => write!(f, "parallel_sync"),
            GenerationMode::Fractal => write!(f, "fractal"),
            GenerationMode::Quantum => write!(f, "quantum"),
        }
    }
}

/// Attempt to parse a string into a GenerationMode (case-insensitive).
impl std::str::FromStr for GenerationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "sequential" => Ok(GenerationMode::Sequential),
            "waterfall" => Ok(GenerationMode::Waterfall),
            "parallel_sync" | "parallel" => Ok(GenerationMode::ParallelSync),
            "fractal" => Ok(GenerationMode::Fractal),
            "quantum" | "probabilistic" => Ok(GenerationMode::Quantum),
            other => anyhow::bail!("Unknown generation mode: {other}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Opportunity (finder output, before scoring)
// ---------------------------------------------------------------------------

/// A single profitable triangular cycle found by the opportunity finder.
/// Not yet scored; the generator turns these into `Leg`s.
#[derive(Debug, Clone, PartialEq)]
pub struct Opportunity {
    /// Asset path, start → mid1 → mid2 → start.
    pub path: Vec<String>,
    /// (first venue, second venue). Hops alternate A, B, A.
    pub venues: (String, String),
    /// Amount borrowed, in units of `path[0]`.
    pub amount: f64,
    /// Net profit in units of `path[0]`.
    pub profit: f64,
    /// Net profit as a percent of `amount`.
    pub profit_pct: f64,
    /// Estimated settlement fee in USD.
    pub fee_usd: f64,
    /// Estimated wall-clock duration.
    pub duration_ms: u64,
    /// Target domain if the cycle settles across a bridge.
    pub bridge: Option<String>,
}

impl Opportunity {
    pub fn start_asset(&self) -> &str {
        &self.path[0]
    }

    /// The intermediate assets (everything but the closing start asset).
    pub fn asset_triple(&self) -> Vec<String> {
        self.path[..self.path.len() - 1].to_vec()
    }
}

// ---------------------------------------------------------------------------
// Leg
// ---------------------------------------------------------------------------

/// One hop of a route: a scored triangular cycle across two venues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    /// Asset path of length >= 3, first == last.
    pub path: Vec<String>,
    pub venues: (String, String),
    /// Estimated profit in units of `borrow_asset`.
    pub estimated_profit: f64,
    pub profit_pct: f64,
    /// 0–100.
    pub confidence: f64,
    /// 0–100, higher is worse.
    pub risk_score: f64,
    pub borrow_amount: f64,
    pub borrow_asset: String,
    pub estimated_fee_usd: f64,
    pub estimated_duration_ms: u64,
    pub cross_venue: bool,
    pub target_domain: Option<String>,
    /// Parallel-sync chain this leg belongs to.
    pub chain: Option<usize>,
}

impl Leg {
    /// Assets of the cycle without the closing hop, e.g. `[USDC, SOL, RAY]`.
    pub fn asset_triple(&self) -> Vec<String> {
        self.path[..self.path.len() - 1].to_vec()
    }

    pub fn describe(&self) -> String {
        format!("{} @ {}/{}", self.path.join("→"), self.venues.0, self.venues.1)
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | borrow {:.4} {} | +{:.3}% | conf {:.0} | risk {:.0}",
            self.describe(),
            self.borrow_amount,
            self.borrow_asset,
            self.profit_pct,
            self.confidence,
            self.risk_score,
        )
    }
}

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

/// An ordered sequence of legs executed as one cascading attempt.
/// Built once by the generator and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: Uuid,
    pub mode: GenerationMode,
    pub legs: Vec<Leg>,
    /// Sum of leg profits, each in its own borrow asset. Only a true
    /// amount when every leg borrows the same asset (quantum walks mix
    /// assets); compare routes by `total_profit_usd`.
    pub total_profit: f64,
    pub total_profit_usd: f64,
    /// Sum of leg profit percents (additive, not compounded).
    pub total_profit_pct: f64,
    pub avg_confidence: f64,
    pub avg_risk_score: f64,
    pub total_borrowed_usd: f64,
    pub total_duration_ms: u64,
    pub cross_venue_legs: usize,
    pub total_fee_usd: f64,
    pub created_at: DateTime<Utc>,
}

impl Route {
    pub fn leg_count(&self) -> usize {
        self.legs.len()
    }

    /// Short human description used in logs and the best-trade record.
    pub fn describe(&self) -> String {
        let hops: Vec<String> = self.legs.iter().map(|l| l.path.join("→")).collect();
        format!("{} [{}]", self.mode, hops.join(" | "))
    }

    /// Number of distinct parallel chains (0 for non-parallel routes).
    pub fn chain_count(&self) -> usize {
        let mut chains: Vec<usize> = self.legs.iter().filter_map(|l| l.chain).collect();
        chains.sort_unstable();
        chains.dedup();
        chains.len()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} legs | +{:.3}% | ${:.2} profit | ${:.0} borrowed | conf {:.0} | risk {:.0}",
            self.mode,
            self.legs.len(),
            self.total_profit_pct,
            self.total_profit_usd,
            self.total_borrowed_usd,
            self.avg_confidence,
            self.avg_risk_score,
        )
    }
}

// ---------------------------------------------------------------------------
// Execution record
// ---------------------------------------------------------------------------

/// Outcome of a single executed (or attempted) leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegOutcome {
    pub index: usize,
    pub success: bool,
    /// Realized profit in units of the leg's borrow asset.
    pub realized_profit: f64,
    pub realized_profit_usd: f64,
    pub error: Option<String>,
}

/// Outcome of one route execution. Created at start, finalized on
/// completion, then folded into `Statistics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub route_id: Uuid,
    pub mode: GenerationMode,
    pub description: String,
    pub leg_count: usize,
    /// (venue A, venue B) per leg, used for usage counters.
    pub venues: Vec<(String, String)>,
    /// Asset path per leg.
    pub paths: Vec<Vec<String>>,
    pub outcomes: Vec<LegOutcome>,
    pub successful_legs: usize,
    pub total_profit_usd: f64,
    /// True when a failure or the route timeout stopped pending legs.
    pub aborted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn start(route: &Route) -> Self {
        let now = Utc::now();
        Self {
            route_id: route.id,
            mode: route.mode,
            description: route.describe(),
            leg_count: route.legs.len(),
            venues: route.legs.iter().map(|l| l.venues.clone()).collect(),
            paths: route.legs.iter().map(|l| l.path.clone()).collect(),
            outcomes: Vec::new(),
            successful_legs: 0,
            total_profit_usd: 0.0,
            aborted: false,
            started_at: now,
            finished_at: now,
        }
    }

    /// A route is successful if at least one leg succeeded.
    pub fn is_success(&self) -> bool {
        self.successful_legs > 0
    }

    pub fn push(&mut self, outcome: LegOutcome) {
        if outcome.success {
            self.successful_legs += 1;
            self.total_profit_usd += outcome.realized_profit_usd;
        }
        self.outcomes.push(outcome);
    }

    pub fn finish(&mut self) {
        self.outcomes.sort_by_key(|o| o.index);
        self.finished_at = Utc::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.finished_at - self.started_at
    }
}

impl fmt::Display for ExecutionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {}/{} legs ok{} | ${:.2} realized",
            self.description,
            self.successful_legs,
            self.leg_count,
            if self.aborted { " (aborted)" } else { "" },
            self.total_profit_usd,
        )
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Best single route execution so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestTrade {
    pub profit_usd: Decimal,
    pub description: String,
    pub leg_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Long-lived execution statistics, persisted after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_routes: u64,
    pub successful_routes: u64,
    pub failed_routes: u64,
    pub total_profit_usd: Decimal,
    pub best_trade: Option<BestTrade>,
    pub last_execution: Option<DateTime<Utc>>,
    pub daily_routes: u64,
    pub daily_window_start: DateTime<Utc>,
    pub total_legs: u64,
    pub avg_depth: f64,
    pub venue_usage: BTreeMap<String, u64>,
    pub asset_usage: BTreeMap<String, u64>,
    /// Realized profit per UTC hour of day.
    pub hourly_profit: [Decimal; 24],
    pub avg_profit_per_leg: Decimal,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Statistics {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            total_routes: 0,
            successful_routes: 0,
            failed_routes: 0,
            total_profit_usd: Decimal::ZERO,
            best_trade: None,
            last_execution: None,
            daily_routes: 0,
            daily_window_start: now,
            total_legs: 0,
            avg_depth: 0.0,
            venue_usage: BTreeMap::new(),
            asset_usage: BTreeMap::new(),
            hourly_profit: [Decimal::ZERO; 24],
            avg_profit_per_leg: Decimal::ZERO,
        }
    }

    /// Success rate as a percentage. Returns 0.0 if nothing executed.
    pub fn success_rate(&self) -> f64 {
        if self.total_routes == 0 {
            0.0
        } else {
            self.successful_routes as f64 / self.total_routes as f64 * 100.0
        }
    }

    /// Daily route count as of `now`, treating an expired window as empty.
    pub fn daily_routes_at(&self, now: DateTime<Utc>) -> u64 {
        if now - self.daily_window_start >= Duration::hours(24) {
            0
        } else {
            self.daily_routes
        }
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "routes={} (ok {}/fail {}) | success={:.1}% | profit=${:.2} | legs={} | avg_depth={:.2} | today={}",
            self.total_routes,
            self.successful_routes,
            self.failed_routes,
            self.success_rate(),
            self.total_profit_usd,
            self.total_legs,
            self.avg_depth,
            self.daily_routes,
        )
    }
}

/// `at + secs`, saturating at the latest representable instant.
pub fn saturating_add_secs(at: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for CASCADE.
#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    #[error("Feed error ({feed}): {message}")]
    Feed { feed: String, message: String },

    #[error("Execution refused: {0}")]
    Refused(String),

    #[error("Leg {index} failed: {message}")]
    LegFailed { index: usize, message: String },

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
