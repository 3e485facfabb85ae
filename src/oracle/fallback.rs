//! Static fallback tables and a feed that serves them.
//!
//! Used when the upstream feed is down and nothing is cached, and as the
//! default feed when no HTTP endpoint is configured.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;

use super::MarketFeed;

/// Price used for assets missing from the table.
pub const UNKNOWN_PRICE_USD: f64 = 1.0;

/// 24h volume used for assets missing from the table.
pub const UNKNOWN_VOLUME_USD: f64 = 1_000_000.0;

const STABLECOINS: &[&str] = &["USDC", "USDT", "DAI", "PYUSD", "USDH"];
const MAJORS: &[&str] = &["SOL", "ETH", "BTC", "WBTC", "MSOL", "JITOSOL"];
const ESTABLISHED: &[&str] = &["RAY", "JUP", "ORCA", "JTO", "PYTH", "MNDE"];
const SPECULATIVE: &[&str] = &["BONK", "WIF", "POPCAT", "MEW", "SAMO"];

/// (symbol, price USD, 24h volume USD)
const FALLBACK_MARKET: &[(&str, f64, f64)] = &[
    ("USDC", 1.0, 2_500_000_000.0),
    ("USDT", 1.0, 1_800_000_000.0),
    ("DAI", 1.0, 90_000_000.0),
    ("SOL", 150.0, 1_200_000_000.0),
    ("MSOL", 165.0, 40_000_000.0),
    ("ETH", 3_000.0, 900_000_000.0),
    ("BTC", 60_000.0, 1_500_000_000.0),
    ("WBTC", 60_000.0, 60_000_000.0),
    ("RAY", 2.0, 45_000_000.0),
    ("JUP", 0.8, 80_000_000.0),
    ("ORCA", 3.0, 12_000_000.0),
    ("JTO", 2.5, 30_000_000.0),
    ("PYTH", 0.4, 25_000_000.0),
    ("BONK", 0.000_02, 150_000_000.0),
    ("WIF", 2.0, 200_000_000.0),
];

/// Static security risk score for an asset (0–100, higher is riskier).
pub fn security_risk(asset: &str) -> f64 {
    let symbol = asset.to_uppercase();
    let s = symbol.as_str();
    if STABLECOINS.contains(&s) {
        10.0
    } else if MAJORS.contains(&s) {
        25.0
    } else if ESTABLISHED.contains(&s) {
        50.0
    } else if SPECULATIVE.contains(&s) {
        80.0
    } else {
        50.0
    }
}

pub fn fallback_price(asset: &str) -> f64 {
    lookup(asset).map(|(_, p, _)| p).unwrap_or(UNKNOWN_PRICE_USD)
}

pub fn fallback_volume(asset: &str) -> f64 {
    lookup(asset).map(|(_, _, v)| v).unwrap_or(UNKNOWN_VOLUME_USD)
}

fn lookup(asset: &str) -> Option<(&'static str, f64, f64)> {
    let symbol = asset.to_uppercase();
    FALLBACK_MARKET.iter().copied().find(|(s, _, _)| *s == symbol)
}

// ---------------------------------------------------------------------------
// Static feed
// ---------------------------------------------------------------------------

/// Feed that answers from the fallback tables, with optional overrides.
///
/// Unknown assets are an error so the oracle's own fallback path is
/// exercised exactly as it would be for a live feed.
#[derive(Debug, Clone, Default)]
pub struct StaticFeed {
    prices: HashMap<String, f64>,
    volumes: HashMap<String, f64>,
    offline: bool,
}

impl StaticFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, asset: &str, price: f64) -> Self {
        self.prices.insert(asset.to_uppercase(), price);
        self
    }

    pub fn with_volume(mut self, asset: &str, volume: f64) -> Self {
        self.volumes.insert(asset.to_uppercase(), volume);
        self
    }

    /// A feed whose every lookup fails.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl MarketFeed for StaticFeed {
    async fn fetch_price(&self, asset: &str) -> Result<f64> {
        if self.offline {
            return Err(anyhow!("static feed offline"));
        }
        let symbol = asset.to_uppercase();
        self.prices
            .get(&symbol)
            .copied()
            .or_else(|| lookup(&symbol).map(|(_, p, _)| p))
            .ok_or_else(|| anyhow!("No price for {symbol}"))
    }

    async fn fetch_volume_24h(&self, asset: &str) -> Result<f64> {
        if self.offline {
            return Err(anyhow!("static feed offline"));
        }
        let symbol = asset.to_uppercase();
        self.volumes
            .get(&symbol)
            .copied()
            .or_else(|| lookup(&symbol).map(|(_, _, v)| v))
            .ok_or_else(|| anyhow!("No volume for {symbol}"))
    }

    fn name(&self) -> &str {
        "static"
    }
}
