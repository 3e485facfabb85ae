//! Price/risk oracle.
//!
//! Defines the `MarketFeed` trait (the external price/volume source) and
//! the `OracleClient` that sits in front of it with TTL caches and a
//! fallback table. Lookups through the client never fail: a feed error
//! returns the last cached value, or the fallback constant.

pub mod fallback;
pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Price cache lifetime.
pub const PRICE_TTL: Duration = Duration::from_secs(30);

/// Volume cache lifetime.
pub const VOLUME_TTL: Duration = Duration::from_secs(5 * 60);

/// Abstraction over external market data sources.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Spot price in USD.
    async fn fetch_price(&self, asset: &str) -> Result<f64>;

    /// Trailing 24-hour traded volume in USD.
    async fn fetch_volume_24h(&self, asset: &str) -> Result<f64>;

    /// Feed name for logging.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct CacheEntry {
    value: f64,
    fetched_at: Instant,
}

/// Keyed value cache. Stale entries are kept as a fallback for feed
/// outages; freshness is decided per read.
struct TtlCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl TtlCache {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    async fn fresh(&self, key: &str) -> Option<f64> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .map(|e| e.value)
    }

    async fn any(&self, key: &str) -> Option<f64> {
        self.entries.read().await.get(key).map(|e| e.value)
    }

    async fn insert(&self, key: String, value: f64) {
        self.entries.write().await.insert(
            key,
            CacheEntry {
                value,
                fetched_at: Instant::now(),
            },
        );
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Cache-backed oracle client shared by the finder, scorer, generator and
/// coordinator.
pub struct OracleClient {
    feed: Arc<dyn MarketFeed>,
    prices: TtlCache,
    volumes: TtlCache,
}

impl OracleClient {
    pub fn new(feed: Arc<dyn MarketFeed>) -> Self {
        Self {
            feed,
            prices: TtlCache::new(PRICE_TTL),
            volumes: TtlCache::new(VOLUME_TTL),
        }
    }

    /// Spot price in USD.
    pub async fn price(&self, asset: &str) -> f64 {
        let key = asset.to_uppercase();
        if let Some(p) = self.prices.fresh(&key).await {
            return p;
        }

        match self.feed.fetch_price(&key).await {
            Ok(p) if p.is_finite() && p > 0.0 => {
                self.prices.insert(key, p).await;
                p
            }
            Ok(p) => {
                warn!(asset = %key, price = p, feed = self.feed.name(), "Feed returned invalid price");
                self.last_price_or_fallback(&key).await
            }
            Err(e) => {
                debug!(asset = %key, error = %e, feed = self.feed.name(), "Price fetch failed");
                self.last_price_or_fallback(&key).await
            }
        }
    }

    /// Trailing 24h volume in USD.
    pub async fn volume_24h(&self, asset: &str) -> f64 {
        let key = asset.to_uppercase();
        if let Some(v) = self.volumes.fresh(&key).await {
            return v;
        }

        match self.feed.fetch_volume_24h(&key).await {
            Ok(v) if v.is_finite() && v >= 0.0 => {
                self.volumes.insert(key, v).await;
                v
            }
            Ok(v) => {
                warn!(asset = %key, volume = v, feed = self.feed.name(), "Feed returned invalid volume");
                self.last_volume_or_fallback(&key).await
            }
            Err(e) => {
                debug!(asset = %key, error = %e, feed = self.feed.name(), "Volume fetch failed");
                self.last_volume_or_fallback(&key).await
            }
        }
    }

    /// Static security risk score, 0–100.
    pub fn risk_score(&self, asset: &str) -> f64 {
        fallback::security_risk(asset)
    }

    /// Convert an amount of `asset` to USD at the current price.
    pub async fn to_usd(&self, asset: &str, amount: f64) -> f64 {
        amount * self.price(asset).await
    }

    /// Warm both caches for a set of assets concurrently.
    pub async fn prefetch(&self, assets: &[String]) {
        let lookups = assets.iter().map(|a| async move {
            self.price(a).await;
            self.volume_24h(a).await;
        });
        join_all(lookups).await;
    }

    async fn last_price_or_fallback(&self, key: &str) -> f64 {
        match self.prices.any(key).await {
            Some(p) => p,
            None => fallback::fallback_price(key),
        }
    }

    async fn last_volume_or_fallback(&self, key: &str) -> f64 {
        match self.volumes.any(key).await {
            Some(v) => v,
            None => fallback::fallback_volume(key),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Feed whose price moves on every call and can be switched off.
    struct CountingFeed {
        calls: AtomicUsize,
        down: AtomicBool,
    }

    impl CountingFeed {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                down: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl MarketFeed for CountingFeed {
        async fn fetch_price(&self, _asset: &str) -> Result<f64> {
            if self.down.load(Ordering::SeqCst) {
                anyhow::bail!("feed down");
            }
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(100.0 + n as f64)
        }

        async fn fetch_volume_24h(&self, _asset: &str) -> Result<f64> {
            if self.down.load(Ordering::SeqCst) {
                anyhow::bail!("feed down");
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(5_000_000.0)
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_price_cached_within_ttl() {
        let feed = Arc::new(CountingFeed::new());
        let oracle = OracleClient::new(feed.clone());

        assert_eq!(oracle.price("SOL").await, 100.0);
        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(oracle.price("sol").await, 100.0);
        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(oracle.price("SOL").await, 101.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_ttl_is_five_minutes() {
        let feed = Arc::new(CountingFeed::new());
        let oracle = OracleClient::new(feed.clone());

        oracle.volume_24h("SOL").await;
        tokio::time::advance(Duration::from_secs(299)).await;
        oracle.volume_24h("SOL").await;
        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        oracle.volume_24h("SOL").await;
        assert_eq!(feed.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_returns_stale_value() {
        let feed = Arc::new(CountingFeed::new());
        let oracle = OracleClient::new(feed.clone());

        assert_eq!(oracle.price("SOL").await, 100.0);
        feed.down.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(oracle.price("SOL").await, 100.0);
    }

    #[tokio::test]
    async fn test_outage_without_cache_uses_fallback_table() {
        let oracle = OracleClient::new(Arc::new(fallback::StaticFeed::offline()));
        assert_eq!(oracle.price("SOL").await, 150.0);
        assert_eq!(oracle.price("NEWCOIN").await, fallback::UNKNOWN_PRICE_USD);
        assert_eq!(oracle.volume_24h("USDC").await, 2_500_000_000.0);
    }

    #[tokio::test]
    async fn test_to_usd_and_risk() {
        let feed = fallback::StaticFeed::new().with_price("SOL", 200.0);
        let oracle = OracleClient::new(Arc::new(feed));
        assert_eq!(oracle.to_usd("SOL", 2.5).await, 500.0);
        assert_eq!(oracle.risk_score("USDC"), 10.0);
    }
}
