//! Opportunity scorer.
//!
//! Turns finder output into scored `Leg`s (confidence and risk) and
//! aggregates legs into route-level scores. Also holds the two pieces
//! of live state that feed confidence: capital-source health and the
//! asset triple of the most recent successful route.

use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{venue_tier, SharedRng, VenueTier};
use crate::oracle::fallback::security_risk;
use crate::types::{Leg, Opportunity};

pub const BASE_CONFIDENCE: f64 = 80.0;
pub const MIN_CONFIDENCE: f64 = 55.0;
pub const MAX_CONFIDENCE: f64 = 95.0;

/// Inputs to the per-leg confidence formula.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceInputs {
    pub avg_asset_risk: f64,
    pub venue_tiers: (VenueTier, VenueTier),
    /// Random liquidity adjustment, 0–5.
    pub liquidity_bonus: f64,
    pub sources_healthy: bool,
    pub matches_last_success: bool,
}

/// Per-leg confidence, clamped to [55, 95].
pub fn leg_confidence(inputs: &ConfidenceInputs) -> f64 {
    let mut score = BASE_CONFIDENCE - 20.0 * (inputs.avg_asset_risk / 100.0);

    for tier in [inputs.venue_tiers.0, inputs.venue_tiers.1] {
        score += match tier {
            VenueTier::Tier1 => 5.0,
            VenueTier::Tier2 => 2.0,
            VenueTier::Other => 0.0,
        };
    }

    score += inputs.liquidity_bonus.clamp(0.0, 5.0);
    score += if inputs.sources_healthy { 5.0 } else { -10.0 };
    if inputs.matches_last_success {
        score += 8.0;
    }

    score.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

/// Risk attributed to the venue pair: 20 when both are tier 1, 35 for a
/// tier-1/tier-2 mix, 50 otherwise.
pub fn venue_risk(tiers: (VenueTier, VenueTier)) -> f64 {
    match tiers {
        (VenueTier::Tier1, VenueTier::Tier1) => 20.0,
        (VenueTier::Tier1, VenueTier::Tier2) | (VenueTier::Tier2, VenueTier::Tier1) => 35.0,
        _ => 50.0,
    }
}

/// Per-leg risk score, 0–100 (higher is worse). Equal-weighted blend of
/// asset, venue, cross-venue and profit-inverse risk.
pub fn leg_risk(avg_asset_risk: f64, tiers: (VenueTier, VenueTier), cross_venue: bool, profit_pct: f64) -> f64 {
    let cross = if cross_venue { 65.0 } else { 20.0 };
    let profit_inverse = 100.0 - (profit_pct * 10.0).clamp(0.0, 100.0);
    0.25 * avg_asset_risk + 0.25 * venue_risk(tiers) + 0.25 * cross + 0.25 * profit_inverse
}

/// Mean security risk of the distinct assets in a cycle.
pub fn average_asset_risk(path: &[String]) -> f64 {
    let assets = &path[..path.len().saturating_sub(1).max(1)];
    let total: f64 = assets.iter().map(|a| security_risk(a)).sum();
    total / assets.len() as f64
}

// ---------------------------------------------------------------------------
// Route aggregates
// ---------------------------------------------------------------------------

/// Route-level aggregate of its legs' scores.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RouteScore {
    pub total_profit: f64,
    /// Additive: the sum of leg percents, not the compounded return.
    pub total_profit_pct: f64,
    pub avg_confidence: f64,
    pub avg_risk_score: f64,
}

pub fn aggregate(legs: &[Leg]) -> RouteScore {
    if legs.is_empty() {
        return RouteScore::default();
    }
    let n = legs.len() as f64;
    RouteScore {
        total_profit: legs.iter().map(|l| l.estimated_profit).sum(),
        total_profit_pct: legs.iter().map(|l| l.profit_pct).sum(),
        avg_confidence: legs.iter().map(|l| l.confidence).sum::<f64>() / n,
        avg_risk_score: legs.iter().map(|l| l.risk_score).sum::<f64>() / n,
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

pub struct Scorer {
    /// Capital source → healthy.
    sources: RwLock<BTreeMap<String, bool>>,
    last_success: RwLock<Option<Vec<String>>>,
    rng: SharedRng,
}

impl Scorer {
    /// All `capital_sources` start healthy.
    pub fn new(capital_sources: &[String], rng: SharedRng) -> Self {
        Self {
            sources: RwLock::new(capital_sources.iter().map(|s| (s.clone(), true)).collect()),
            last_success: RwLock::new(None),
            rng,
        }
    }

    pub async fn mark_source(&self, source: &str, healthy: bool) {
        let mut sources = self.sources.write().await;
        let previous = sources.insert(source.to_string(), healthy);
        if previous != Some(healthy) {
            info!(source, healthy, "Capital source health changed");
        }
    }

    /// True when every registered capital source is healthy.
    pub async fn sources_healthy(&self) -> bool {
        self.sources.read().await.values().all(|h| *h)
    }

    /// Keep the health registry in step with the configured sources.
    pub async fn sync_sources(&self, capital_sources: &[String]) {
        let mut sources = self.sources.write().await;
        sources.retain(|k, _| capital_sources.contains(k));
        for s in capital_sources {
            sources.entry(s.clone()).or_insert(true);
        }
    }

    pub async fn remember_success(&self, triple: Vec<String>) {
        debug!(triple = triple.join("→"), "Remembering successful asset triple");
        *self.last_success.write().await = Some(triple);
    }

    pub async fn last_success(&self) -> Option<Vec<String>> {
        self.last_success.read().await.clone()
    }

    /// Score one opportunity into an immutable `Leg`.
    pub async fn score(&self, opp: &Opportunity, chain: Option<usize>) -> Leg {
        let tiers = (venue_tier(&opp.venues.0), venue_tier(&opp.venues.1));
        let avg_asset_risk = average_asset_risk(&opp.path);
        let cross_venue = opp.bridge.is_some();

        let inputs = ConfidenceInputs {
            avg_asset_risk,
            venue_tiers: tiers,
            liquidity_bonus: self.rng.uniform(0.0, 5.0).await,
            sources_healthy: self.sources_healthy().await,
            matches_last_success: self
                .last_success
                .read()
                .await
                .as_ref()
                .is_some_and(|t| *t == opp.asset_triple()),
        };

        Leg {
            path: opp.path.clone(),
            venues: opp.venues.clone(),
            estimated_profit: opp.profit,
            profit_pct: opp.profit_pct,
            confidence: leg_confidence(&inputs),
            risk_score: leg_risk(avg_asset_risk, tiers, cross_venue, opp.profit_pct),
            borrow_amount: opp.amount,
            borrow_asset: opp.start_asset().to_string(),
            estimated_fee_usd: opp.fee_usd,
            estimated_duration_ms: opp.duration_ms,
            cross_venue,
            target_domain: opp.bridge.clone(),
            chain,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
