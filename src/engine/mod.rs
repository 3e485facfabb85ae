//! Core engine — the generate → rank → execute loop.
//!
//! `CascadeEngine` is constructed explicitly with its dependencies and
//! owns its configuration, statistics and oracle. The scheduler is a
//! spawned task driven by `tokio::time::interval`, stopped through a
//! `CancellationToken`. A cycle that has started always runs to
//! completion before the task observes cancellation.

pub mod accountant;
pub mod executor;
pub mod failsafe;

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigPatch, EngineConfig};
use crate::generator::RouteGenerator;
use crate::oracle::{MarketFeed, OracleClient};
use crate::storage::StatsPersistence;
use crate::strategy::filter::{self, RejectionReason, Throttle};
use crate::strategy::finder::ArbitrageFinder;
use crate::strategy::quotes::JitteredQuotes;
use crate::strategy::scorer::Scorer;
use crate::strategy::{OpportunitySource, QuoteProvider, SharedRng};
use crate::types::{CascadeError, ExecutionRecord, Statistics};
use accountant::Accountant;
use executor::{Coordinator, LegExecutor, SimulatedLegExecutor};

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// Everything the engine talks to. Only the market feed and the stats
/// store are required; the rest default to the built-in paper stack.
pub struct EngineDeps {
    pub feed: Arc<dyn MarketFeed>,
    pub store: Arc<dyn StatsPersistence>,
    pub quotes: Option<Arc<dyn QuoteProvider>>,
    pub source: Option<Arc<dyn OpportunitySource>>,
    pub executor: Option<Arc<dyn LegExecutor>>,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl EngineDeps {
    pub fn new(feed: Arc<dyn MarketFeed>, store: Arc<dyn StatsPersistence>) -> Self {
        Self {
            feed,
            store,
            quotes: None,
            source: None,
            executor: None,
            seed: None,
        }
    }

    pub fn with_quotes(mut self, quotes: Arc<dyn QuoteProvider>) -> Self {
        self.quotes = Some(quotes);
        self
    }

    pub fn with_source(mut self, source: Arc<dyn OpportunitySource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn LegExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// Failsafe cooldown in effect.
    Paused { until: DateTime<Utc> },
    /// Spacing, daily cap or concurrency blocked the cycle.
    Throttled(RejectionReason),
    NoRoute,
    Executed(ExecutionRecord),
    Refused(String),
}

/// Summary of one generate → rank → execute cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub candidates: usize,
    pub admitted: usize,
    pub rejected: usize,
    pub outcome: CycleOutcome,
    pub timestamp: DateTime<Utc>,
}

impl CycleReport {
    fn new(cycle: u64, outcome: CycleOutcome) -> Self {
        Self {
            cycle,
            candidates: 0,
            admitted: 0,
            rejected: 0,
            outcome,
            timestamp: Utc::now(),
        }
    }

    pub fn record(&self) -> Option<&ExecutionRecord> {
        match &self.outcome {
            CycleOutcome::Executed(record) => Some(record),
            _ => None,
        }
    }
}

/// Log a human-readable cycle summary.
pub fn log_cycle_report(report: &CycleReport) {
    match &report.outcome {
        CycleOutcome::Executed(record) => info!(
            cycle = report.cycle,
            candidates = report.candidates,
            admitted = report.admitted,
            legs = format!("{}/{}", record.successful_legs, record.leg_count),
            profit = format!("${:.4}", record.total_profit_usd),
            aborted = record.aborted,
            "Cycle complete"
        ),
        CycleOutcome::Paused { until } => info!(cycle = report.cycle, until = %until, "Cycle skipped, failsafe paused"),
        CycleOutcome::Throttled(reason) => debug!(cycle = report.cycle, reason = %reason, "Cycle throttled"),
        CycleOutcome::NoRoute => info!(
            cycle = report.cycle,
            candidates = report.candidates,
            rejected = report.rejected,
            "No admissible route this cycle"
        ),
        CycleOutcome::Refused(reason) => warn!(cycle = report.cycle, reason = %reason, "Execution refused"),
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct EngineCore {
    config: RwLock<EngineConfig>,
    scorer: Arc<Scorer>,
    generator: RouteGenerator,
    coordinator: Coordinator,
    accountant: Arc<Accountant>,
    cycles: AtomicU64,
}

struct Scheduler {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct CascadeEngine {
    core: Arc<EngineCore>,
    scheduler: Mutex<Option<Scheduler>>,
    active: AtomicBool,
}

impl CascadeEngine {
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Self {
        let config = config.validate();
        let rng = deps.seed.map(SharedRng::seeded).unwrap_or_else(SharedRng::from_entropy);

        let oracle = Arc::new(OracleClient::new(deps.feed));
        let quotes: Arc<dyn QuoteProvider> = match deps.quotes {
            Some(q) => q,
            None => Arc::new(JitteredQuotes::new(oracle.clone(), rng.clone())),
        };
        let source: Arc<dyn OpportunitySource> = match deps.source {
            Some(s) => s,
            None => Arc::new(ArbitrageFinder::new(oracle.clone(), quotes)),
        };
        let executor: Arc<dyn LegExecutor> = match deps.executor {
            Some(e) => e,
            None => Arc::new(SimulatedLegExecutor::new(rng.clone())),
        };

        let scorer = Arc::new(Scorer::new(&config.capital_sources, rng.clone()));
        let accountant = Arc::new(Accountant::load(deps.store));
        let generator = RouteGenerator::new(oracle.clone(), source, scorer.clone(), rng);
        let coordinator = Coordinator::new(executor, oracle, scorer.clone(), accountant.clone());

        Self {
            core: Arc::new(EngineCore {
                config: RwLock::new(config),
                scorer,
                generator,
                coordinator,
                accountant,
                cycles: AtomicU64::new(0),
            }),
            scheduler: Mutex::new(None),
            active: AtomicBool::new(false),
        }
    }

    /// Start the periodic scheduler. A no-op if already running.
    pub async fn start(&self) {
        let mut slot = self.scheduler.lock().await;
        if slot.is_some() {
            warn!("Engine already running");
            return;
        }

        let token = CancellationToken::new();
        let core = self.core.clone();
        let child = token.clone();
        let handle = tokio::spawn(async move { core.run(child).await });
        *slot = Some(Scheduler { token, handle });
        self.active.store(true, Ordering::SeqCst);

        let cfg = self.core.config.read().await;
        info!(
            mode = %cfg.mode,
            interval_secs = cfg.scan_interval_secs,
            max_depth = cfg.max_depth,
            "CASCADE engine started"
        );
    }

    /// Stop the scheduler, wait for the current cycle to finish and flush
    /// statistics.
    pub async fn stop(&self) {
        let scheduler = self.scheduler.lock().await.take();
        if let Some(Scheduler { token, handle }) = scheduler {
            token.cancel();
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler task ended abnormally");
            }
        }
        self.active.store(false, Ordering::SeqCst);
        self.core.accountant.flush().await;

        let stats = self.core.accountant.snapshot().await;
        info!(
            routes = stats.total_routes,
            success_rate = format!("{:.1}%", stats.success_rate()),
            profit = format!("${:.2}", stats.total_profit_usd),
            "CASCADE engine stopped"
        );
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> Statistics {
        self.core.accountant.snapshot().await
    }

    pub async fn config(&self) -> EngineConfig {
        self.core.config.read().await.clone()
    }

    /// Merge a partial update into the live configuration. Takes effect
    /// from the next cycle.
    pub async fn update_config(&self, patch: &ConfigPatch) -> EngineConfig {
        let mut cfg = self.core.config.write().await;
        let next = cfg.apply(patch);
        self.core.scorer.sync_sources(&next.capital_sources).await;
        info!(mode = %next.mode, max_depth = next.max_depth, "Configuration updated");
        *cfg = next.clone();
        next
    }

    /// Report a capital source's health; feeds leg confidence.
    pub async fn mark_capital_source(&self, source: &str, healthy: bool) {
        self.core.scorer.mark_source(source, healthy).await;
    }

    /// Run one cycle now, outside the scheduler.
    pub async fn run_cycle(&self) -> CycleReport {
        self.core.run_cycle().await
    }
}

impl EngineCore {
    async fn run(&self, token: CancellationToken) {
        let mut period = self.config.read().await.scan_interval_secs;
        let mut interval = ticker(period);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Scheduler cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.run_cycle().await;
                    log_cycle_report(&report);

                    let next = self.config.read().await.scan_interval_secs;
                    if next != period {
                        info!(from = period, to = next, "Scan interval changed");
                        period = next;
                        interval = ticker(period);
                        // The fresh interval fires immediately; skip that tick.
                        interval.reset();
                    }
                }
            }
        }
    }

    async fn run_cycle(&self) -> CycleReport {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let cfg = self.config.read().await.clone();
        let now = Utc::now();

        if let Some(until) = self.coordinator.paused_until(now).await {
            return CycleReport::new(cycle, CycleOutcome::Paused { until });
        }

        let stats = self.accountant.snapshot().await;
        let throttle = Throttle {
            last_execution: stats.last_execution,
            daily_routes: stats.daily_routes_at(now),
            in_flight: self.coordinator.in_flight(),
        };
        if let Err(reason) = filter::check_throttle(&cfg, &throttle, now) {
            return CycleReport::new(cycle, CycleOutcome::Throttled(reason));
        }

        let routes = self.generator.generate(&cfg).await;
        let candidates = routes.len();

        let ranking = match filter::rank(&cfg, routes, &throttle, Utc::now()) {
            Ok(ranking) => ranking,
            Err(reason) => return CycleReport::new(cycle, CycleOutcome::Throttled(reason)),
        };

        let mut report = CycleReport::new(cycle, CycleOutcome::NoRoute);
        report.candidates = candidates;
        report.admitted = ranking.ranked.len();
        report.rejected = ranking.rejected.len();

        let Some(best) = ranking.best() else {
            return report;
        };

        report.outcome = match self.coordinator.execute(best, &cfg).await {
            Ok(record) => CycleOutcome::Executed(record),
            Err(CascadeError::Refused(reason)) => CycleOutcome::Refused(reason),
            Err(e) => CycleOutcome::Refused(e.to_string()),
        };
        report.timestamp = Utc::now();
        report
    }
}

fn ticker(period_secs: u64) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(Duration::from_secs(period_secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::fallback::StaticFeed;
    use crate::storage::MemoryStore;
    use crate::types::GenerationMode;

    fn engine(store: Arc<MemoryStore>) -> CascadeEngine {
        CascadeEngine::new(
            EngineConfig::default(),
            EngineDeps::new(Arc::new(StaticFeed::new()), store).with_seed(42),
        )
    }

    #[tokio::test]
    async fn test_start_stop_flushes() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        assert!(!engine.is_active());

        engine.start().await;
        assert!(engine.is_active());
        engine.start().await; // idempotent

        engine.stop().await;
        assert!(!engine.is_active());
        assert!(store.saves() >= 1);
    }

    #[tokio::test]
    async fn test_update_config_merges_and_validates() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let patch = ConfigPatch {
            mode: Some(GenerationMode::Fractal),
            max_depth: Some(50),
            ..ConfigPatch::default()
        };
        let cfg = engine.update_config(&patch).await;
        assert_eq!(cfg.mode, GenerationMode::Fractal);
        assert_eq!(cfg.max_depth, 8);
        assert_eq!(engine.config().await.mode, GenerationMode::Fractal);
        // Untouched fields keep their values
        assert_eq!(cfg.base_borrow_asset, "USDC");
    }

    #[tokio::test]
    async fn test_daily_cap_throttles_cycle() {
        let engine = engine(Arc::new(MemoryStore::new()));
        engine
            .update_config(&ConfigPatch {
                max_daily_routes: Some(0),
                ..ConfigPatch::default()
            })
            .await;
        let report = engine.run_cycle().await;
        assert!(matches!(report.outcome, CycleOutcome::Throttled(RejectionReason::DailyCap { .. })));
        assert_eq!(report.cycle, 1);
    }

    #[tokio::test]
    async fn test_cycle_counter_and_stats_idempotent() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let a = engine.run_cycle().await;
        let b = engine.run_cycle().await;
        assert_eq!((a.cycle, b.cycle), (1, 2));
        assert_eq!(engine.stats().await, engine.stats().await);
    }
}
