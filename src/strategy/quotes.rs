//! Oracle-derived quotes with a venue-specific random spread.
//!
//! Stand-in for real order-book depth: the mid rate comes from oracle
//! USD prices and each venue perturbs it by a uniform draw within its
//! tier's spread.

use async_trait::async_trait;
use std::sync::Arc;

use super::{venue_tier, QuoteProvider, SharedRng, VenueTier};
use crate::oracle::OracleClient;

/// Half-width of the random spread, as a fraction, per venue tier.
fn spread_for(tier: VenueTier) -> f64 {
    match tier {
        VenueTier::Tier1 => 0.0035,
        VenueTier::Tier2 => 0.006,
        VenueTier::Other => 0.008,
    }
}

pub struct JitteredQuotes {
    oracle: Arc<OracleClient>,
    rng: SharedRng,
}

impl JitteredQuotes {
    pub fn new(oracle: Arc<OracleClient>, rng: SharedRng) -> Self {
        Self { oracle, rng }
    }
}

#[async_trait]
impl QuoteProvider for JitteredQuotes {
    async fn rate(&self, venue: &str, from: &str, to: &str) -> f64 {
        let from_usd = self.oracle.price(from).await;
        let to_usd = self.oracle.price(to).await;
        if to_usd <= 0.0 {
            return 0.0;
        }
        let spread = spread_for(venue_tier(venue));
        let jitter = self.rng.uniform(-spread, spread).await;
        from_usd / to_usd * (1.0 + jitter)
    }
}
