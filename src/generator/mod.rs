//! Route generation.
//!
//! Five interchangeable strategies share one input (capital, asset, venue
//! set) and one output (ranked `Vec<Route>`). Each `GenerationMode`
//! variant maps to exactly one `RouteStrategy` implementation; dispatch is
//! an exhaustive match so a new mode cannot be forgotten.
//!
//! All strategies build routes through `RouteBuilder`, which enforces the
//! depth limit and the total-borrow cap, and score legs through the shared
//! `Scorer`.

pub mod fractal;
pub mod parallel;
pub mod quantum;
pub mod sequential;
pub mod waterfall;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::oracle::OracleClient;
use crate::strategy::finder::DEFAULT_RESULT_CAP;
use crate::strategy::scorer::{aggregate, Scorer};
use crate::strategy::{venue_pairs, OpportunityQuery, OpportunitySource, SharedRng};
use crate::types::{GenerationMode, Leg, Opportunity, Route};

/// Join-barrier overhead added to parallel-sync routes.
pub const SYNC_OVERHEAD_MS: u64 = 500;

// ---------------------------------------------------------------------------
// Strategy trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RouteStrategy: Send + Sync {
    fn mode(&self) -> GenerationMode;

    /// Candidate routes for this cycle, in any order.
    async fn generate(&self, ctx: &GenerationContext<'_>) -> Vec<Route>;
}

static SEQUENTIAL: sequential::Sequential = sequential::Sequential;
static WATERFALL: waterfall::Waterfall = waterfall::Waterfall;
static PARALLEL: parallel::ParallelSync = parallel::ParallelSync;
static FRACTAL: fractal::Fractal = fractal::Fractal;
static QUANTUM: quantum::Quantum = quantum::Quantum;

pub fn strategy_for(mode: GenerationMode) -> &'static dyn RouteStrategy {
    match mode {
        GenerationMode::Sequential => &SEQUENTIAL,
        GenerationMode::Waterfall => &WATERFALL,
        GenerationMode::ParallelSync => &PARALLEL,
        GenerationMode::Fractal => &FRACTAL,
        GenerationMode::Quantum => &QUANTUM,
    }
}

// ---------------------------------------------------------------------------
// Scored leg
// ---------------------------------------------------------------------------

/// A leg plus its USD figures, priced once when the leg is scored.
#[derive(Debug, Clone)]
pub struct ScoredLeg {
    pub leg: Leg,
    pub borrow_usd: f64,
    pub profit_usd: f64,
}

// ---------------------------------------------------------------------------
// Generation context
// ---------------------------------------------------------------------------

/// Everything a strategy needs for one generation pass.
pub struct GenerationContext<'a> {
    pub config: &'a EngineConfig,
    pub oracle: &'a OracleClient,
    pub source: &'a dyn OpportunitySource,
    pub scorer: &'a Scorer,
    pub rng: &'a SharedRng,
}

impl<'a> GenerationContext<'a> {
    pub fn base_amount(&self) -> f64 {
        self.config.base_borrow_amount
    }

    pub fn base_asset(&self) -> &str {
        &self.config.base_borrow_asset
    }

    /// Opportunities across every ordered venue pair, merged, filtered by
    /// the per-leg profit bar, best first, at most `cap`.
    pub async fn opportunities(&self, amount: f64, asset: &str, cap: usize) -> Vec<Opportunity> {
        let pairs = venue_pairs(&self.config.venues);
        let bridges: &[String] = if self.config.cross_venue_enabled {
            &self.config.bridges
        } else {
            &[]
        };

        let searches = pairs.iter().map(|(a, b)| {
            let query = OpportunityQuery {
                amount,
                asset,
                venues: (a.as_str(), b.as_str()),
                universe: &self.config.assets,
                cap: DEFAULT_RESULT_CAP.max(cap),
                market_impact: self.config.market_impact,
                max_slippage_pct: self.config.max_slippage_pct,
                bridges,
            };
            async move { self.source.find(&query).await }
        });

        let mut merged: Vec<Opportunity> = join_all(searches)
            .await
            .into_iter()
            .flatten()
            .filter(|o| o.profit_pct >= self.config.min_profit_per_leg_pct)
            .collect();
        merged.sort_by(|a, b| b.profit_pct.total_cmp(&a.profit_pct));
        merged.truncate(cap);
        merged
    }

    /// Score an opportunity and price it in USD.
    pub async fn score(&self, opp: &Opportunity, chain: Option<usize>) -> ScoredLeg {
        let leg = self.scorer.score(opp, chain).await;
        let price = self.oracle.price(&leg.borrow_asset).await;
        ScoredLeg {
            borrow_usd: leg.borrow_amount * price,
            profit_usd: leg.estimated_profit * price,
            leg,
        }
    }

    pub fn builder(&self, mode: GenerationMode) -> RouteBuilder {
        RouteBuilder::new(mode, self.config.max_depth, self.config.max_total_borrow_usd)
            .with_position_cap(self.config.position_cap_usd())
    }
}

/// Identity of an opportunity for de-duplication within a route.
pub fn opportunity_key(opp: &Opportunity) -> String {
    format!(
        "{}@{}/{}#{}",
        opp.path.join(">"),
        opp.venues.0,
        opp.venues.1,
        opp.bridge.as_deref().unwrap_or("")
    )
}

/// First opportunity whose key is not yet in `used`; marks it used.
pub fn take_unused(opps: &[Opportunity], used: &mut HashSet<String>) -> Option<Opportunity> {
    let next = opps.iter().find(|o| !used.contains(&opportunity_key(o)))?;
    used.insert(opportunity_key(next));
    Some(next.clone())
}

// ---------------------------------------------------------------------------
// Route builder
// ---------------------------------------------------------------------------

/// Accumulates legs while enforcing depth and borrow limits.
pub struct RouteBuilder {
    mode: GenerationMode,
    max_depth: usize,
    borrow_cap_usd: f64,
    /// Largest single-leg borrow, USD.
    position_cap_usd: f64,
    legs: Vec<Leg>,
    borrowed_usd: f64,
    profit_usd: f64,
}

impl RouteBuilder {
    pub fn new(mode: GenerationMode, max_depth: usize, borrow_cap_usd: f64) -> Self {
        Self {
            mode,
            max_depth,
            borrow_cap_usd,
            position_cap_usd: f64::INFINITY,
            legs: Vec::new(),
            borrowed_usd: 0.0,
            profit_usd: 0.0,
        }
    }

    pub fn with_position_cap(mut self, cap_usd: f64) -> Self {
        self.position_cap_usd = cap_usd;
        self
    }

    pub fn len(&self) -> usize {
        self.legs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.legs.len() >= self.max_depth
    }

    /// Add a leg. Returns false, leaving the route unchanged, if the leg
    /// would exceed the depth limit, the position cap or the borrow cap.
    pub fn try_push(&mut self, scored: ScoredLeg) -> bool {
        if self.is_full() {
            return false;
        }
        if scored.borrow_usd > self.position_cap_usd {
            debug!(
                borrow = format!("${:.0}", scored.borrow_usd),
                cap = format!("${:.0}", self.position_cap_usd),
                "Leg exceeds position cap"
            );
            return false;
        }
        if self.borrowed_usd + scored.borrow_usd > self.borrow_cap_usd {
            debug!(
                borrowed = format!("${:.0}", self.borrowed_usd),
                next = format!("${:.0}", scored.borrow_usd),
                cap = format!("${:.0}", self.borrow_cap_usd),
                "Leg would exceed borrow cap"
            );
            return false;
        }
        self.borrowed_usd += scored.borrow_usd;
        self.profit_usd += scored.profit_usd;
        self.legs.push(scored.leg);
        true
    }

    /// Finalize. `None` for an empty route.
    pub fn build(self) -> Option<Route> {
        if self.legs.is_empty() {
            return None;
        }

        let score = aggregate(&self.legs);
        let total_duration_ms = if self.mode == GenerationMode::ParallelSync {
            let mut per_chain: BTreeMap<usize, u64> = BTreeMap::new();
            for leg in &self.legs {
                *per_chain.entry(leg.chain.unwrap_or(0)).or_default() += leg.estimated_duration_ms;
            }
            per_chain.values().copied().max().unwrap_or(0) + SYNC_OVERHEAD_MS
        } else {
            self.legs.iter().map(|l| l.estimated_duration_ms).sum()
        };

        Some(Route {
            id: Uuid::new_v4(),
            mode: self.mode,
            total_profit: score.total_profit,
            total_profit_usd: self.profit_usd,
            total_profit_pct: score.total_profit_pct,
            avg_confidence: score.avg_confidence,
            avg_risk_score: score.avg_risk_score,
            total_borrowed_usd: self.borrowed_usd,
            total_duration_ms,
            cross_venue_legs: self.legs.iter().filter(|l| l.cross_venue).count(),
            total_fee_usd: self.legs.iter().map(|l| l.estimated_fee_usd).sum(),
            created_at: Utc::now(),
            legs: self.legs,
        })
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Dispatches to the configured mode's strategy.
pub struct RouteGenerator {
    oracle: Arc<OracleClient>,
    source: Arc<dyn OpportunitySource>,
    scorer: Arc<Scorer>,
    rng: SharedRng,
}

impl RouteGenerator {
    pub fn new(
        oracle: Arc<OracleClient>,
        source: Arc<dyn OpportunitySource>,
        scorer: Arc<Scorer>,
        rng: SharedRng,
    ) -> Self {
        Self {
            oracle,
            source,
            scorer,
            rng,
        }
    }

    /// Generate this cycle's candidate routes, best total profit % first.
    pub async fn generate(&self, config: &EngineConfig) -> Vec<Route> {
        self.oracle.prefetch(&config.assets).await;

        let ctx = GenerationContext {
            config,
            oracle: &self.oracle,
            source: self.source.as_ref(),
            scorer: &self.scorer,
            rng: &self.rng,
        };

        let strategy = strategy_for(config.mode);
        let mut routes = strategy.generate(&ctx).await;
        routes.sort_by(|a, b| b.total_profit_pct.total_cmp(&a.total_profit_pct));

        info!(
            mode = %strategy.mode(),
            routes = routes.len(),
            best = routes.first().map(|r| format!("{:.3}%", r.total_profit_pct)).unwrap_or_default(),
            "Route generation complete"
        );
        routes
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------
