//! Strategy layer — opportunity finding, scoring, and admission.
//!
//! Defines the trait seams the generator depends on (`QuoteProvider`,
//! `OpportunitySource`), venue tiering shared by the finder and scorer,
//! and a shared seedable RNG.

pub mod filter;
pub mod finder;
pub mod quotes;
pub mod scorer;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::types::Opportunity;

// ---------------------------------------------------------------------------
// Trait seams
// ---------------------------------------------------------------------------

/// Source of per-hop exchange rates.
///
/// The default implementation derives rates from oracle prices plus a
/// venue-specific random spread; a real deployment plugs in order-book
/// quotes here.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Units of `to` received per unit of `from` on `venue`.
    async fn rate(&self, venue: &str, from: &str, to: &str) -> f64;
}

/// Parameters of one opportunity search.
#[derive(Debug, Clone, Copy)]
pub struct OpportunityQuery<'a> {
    /// Amount to borrow, in units of `asset`.
    pub amount: f64,
    pub asset: &'a str,
    pub venues: (&'a str, &'a str),
    /// Tradable asset universe.
    pub universe: &'a [String],
    /// Maximum number of results.
    pub cap: usize,
    pub market_impact: bool,
    /// Largest tolerated deviation of a hop quote from the oracle mid, percent.
    pub max_slippage_pct: f64,
    /// Bridges to offer cross-venue variants over. Empty disables them.
    pub bridges: &'a [String],
}

/// Produces single-leg triangular opportunities for a starting amount,
/// asset and venue pair. Results are profitable, sorted best first and
/// truncated to `query.cap`.
#[async_trait]
pub trait OpportunitySource: Send + Sync {
    async fn find(&self, query: &OpportunityQuery<'_>) -> Vec<Opportunity>;
}

// ---------------------------------------------------------------------------
// Venue tiers
// ---------------------------------------------------------------------------

const TIER1_VENUES: &[&str] = &["jupiter", "raydium", "orca"];
const TIER2_VENUES: &[&str] = &["openbook", "meteora", "phoenix", "lifinity"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenueTier {
    Tier1,
    Tier2,
    Other,
}

pub fn venue_tier(venue: &str) -> VenueTier {
    let v = venue.to_lowercase();
    if TIER1_VENUES.contains(&v.as_str()) {
        VenueTier::Tier1
    } else if TIER2_VENUES.contains(&v.as_str()) {
        VenueTier::Tier2
    } else {
        VenueTier::Other
    }
}

/// All ordered pairs of distinct venues.
pub fn venue_pairs(venues: &[String]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for a in venues {
        for b in venues {
            if a != b {
                pairs.push((a.clone(), b.clone()));
            }
        }
    }
    pairs
}

// ---------------------------------------------------------------------------
// Shared RNG
// ---------------------------------------------------------------------------

/// Async-safe random number generator, seedable for deterministic tests.
#[derive(Debug, Clone)]
pub struct SharedRng {
    rng: Arc<Mutex<StdRng>>,
}

impl SharedRng {
    pub fn from_entropy() -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Lock for a batch of draws. Do not hold across unrelated awaits.
    pub async fn lock(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().await
    }

    /// Uniform draw in `[low, high)`.
    pub async fn uniform(&self, low: f64, high: f64) -> f64 {
        use rand::Rng;
        if high <= low {
            return low;
        }
        self.rng.lock().await.gen_range(low..high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_tiers() {
        assert_eq!(venue_tier("Jupiter"), VenueTier::Tier1);
        assert_eq!(venue_tier("openbook"), VenueTier::Tier2);
        assert_eq!(venue_tier("some-amm"), VenueTier::Other);
    }

    #[test]
    fn test_venue_pairs_are_ordered_and_distinct() {
        let venues = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let pairs = venue_pairs(&venues);
        assert_eq!(pairs.len(), 6);
        assert!(pairs.iter().all(|(x, y)| x != y));
        assert!(pairs.contains(&("b".into(), "a".into())));
    }

    #[tokio::test]
    async fn test_seeded_rng_is_deterministic() {
        let a = SharedRng::seeded(7);
        let b = SharedRng::seeded(7);
        for _ in 0..5 {
            assert_eq!(a.uniform(0.0, 1.0).await, b.uniform(0.0, 1.0).await);
        }
        assert_eq!(a.uniform(3.0, 3.0).await, 3.0);
    }
}
