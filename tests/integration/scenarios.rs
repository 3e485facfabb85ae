//! End-to-end engine scenarios.
//!
//! Drive the public engine, generator and finder APIs with deterministic
//! stubs and check the behaviours an operator relies on: cascade sizing,
//! abort semantics, the failsafe, throttles and persistence.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio_test::assert_ok;

use cascade::config::{ConfigPatch, EngineConfig};
use cascade::engine::{CascadeEngine, CycleOutcome, EngineDeps};
use cascade::generator::RouteGenerator;
use cascade::oracle::fallback::StaticFeed;
use cascade::oracle::OracleClient;
use cascade::storage::{delete_stats, JsonFileStore, MemoryStore, StatsPersistence};
use cascade::strategy::filter::RejectionReason;
use cascade::strategy::finder::{passes_size_guard, ArbitrageFinder};
use cascade::strategy::scorer::Scorer;
use cascade::strategy::{OpportunityQuery, OpportunitySource, QuoteProvider, SharedRng};
use cascade::types::{GenerationMode, Statistics};

use crate::mock_venue::{permissive, OneShotSource, Script, ScriptedExecutor};

fn engine_with(
    cfg: EngineConfig,
    script: Script,
    store: Arc<dyn StatsPersistence>,
) -> (CascadeEngine, Arc<ScriptedExecutor>) {
    let executor = Arc::new(ScriptedExecutor::new(script));
    let deps = EngineDeps::new(Arc::new(StaticFeed::new()), store)
        .with_source(Arc::new(OneShotSource::new(2.0)))
        .with_executor(executor.clone())
        .with_seed(7);
    (CascadeEngine::new(cfg, deps), executor)
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn waterfall_cascades_amounts_by_multiplier_plus_profit() {
    let oracle = Arc::new(OracleClient::new(Arc::new(StaticFeed::new())));
    let source = Arc::new(OneShotSource::new(2.0));
    let scorer = Arc::new(Scorer::new(&["solend".into()], SharedRng::seeded(1)));
    let generator = RouteGenerator::new(oracle, source.clone(), scorer, SharedRng::seeded(2));

    let cfg = permissive(GenerationMode::Waterfall);
    let routes = generator.generate(&cfg).await;

    assert_eq!(routes.len(), 1);
    let route = &routes[0];
    assert_eq!(route.leg_count(), 3);

    let p1 = route.legs[0].estimated_profit;
    let p2 = route.legs[1].estimated_profit;
    let amounts: Vec<f64> = route.legs.iter().map(|l| l.borrow_amount).collect();
    assert!((amounts[0] - 100.0).abs() < 1e-9);
    assert!((amounts[1] - (150.0 + p1)).abs() < 1e-9);
    assert!((amounts[2] - ((150.0 + p1) * 1.5 + p2)).abs() < 1e-9);
    assert_eq!(source.amounts(), amounts);

    // Additive, not compounded
    assert!((route.total_profit_pct - 6.0).abs() < 1e-9);
}

#[tokio::test]
async fn every_mode_respects_depth_and_borrow_cap() {
    let oracle = Arc::new(OracleClient::new(Arc::new(StaticFeed::new())));
    let scorer = Arc::new(Scorer::new(&["solend".into()], SharedRng::seeded(3)));
    let generator = RouteGenerator::new(oracle, Arc::new(OneShotSource::new(1.0)), scorer, SharedRng::seeded(4));

    for mode in GenerationMode::ALL {
        let mut cfg = permissive(*mode);
        cfg.max_depth = 2;
        cfg.max_total_borrow_usd = 260.0;
        for route in generator.generate(&cfg).await {
            assert!(route.leg_count() <= 2, "{mode}");
            assert!(route.total_borrowed_usd <= 260.0, "{mode}");
        }
    }
}

struct FlatQuotes;

#[async_trait::async_trait]
impl QuoteProvider for FlatQuotes {
    async fn rate(&self, _venue: &str, from: &str, to: &str) -> f64 {
        let price = |s: &str| match s {
            "SOL" => 150.0,
            "ETH" => 3_000.0,
            _ => 1.0,
        };
        // 1% better than mid on every hop
        price(from) / price(to) * 1.01
    }
}

#[tokio::test]
async fn market_size_guard_rejects_oversized_leg() {
    // 10,000 USD against 1,000,000 USD of daily volume is over 0.5%
    assert!(!passes_size_guard(10_000.0, 1_000_000.0, &[]));
    assert!(passes_size_guard(4_000.0, 1_000_000.0, &[]));

    let feed = StaticFeed::new().with_volume("USDC", 1_000_000.0);
    let oracle = Arc::new(OracleClient::new(Arc::new(feed)));
    let finder = ArbitrageFinder::new(oracle, Arc::new(FlatQuotes));
    let universe: Vec<String> = ["USDC", "SOL", "ETH"].iter().map(|s| s.to_string()).collect();

    let query = |amount| OpportunityQuery {
        amount,
        asset: "USDC",
        venues: ("jupiter", "orca"),
        universe: &universe,
        cap: 10,
        market_impact: false,
        max_slippage_pct: 100.0,
        bridges: &[],
    };
    assert!(finder.find(&query(10_000.0)).await.is_empty());
    assert!(!finder.find(&query(1_000.0)).await.is_empty());
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn waterfall_failure_skips_remaining_legs() {
    let (engine, executor) = engine_with(
        permissive(GenerationMode::Waterfall),
        Script::FailLeg(0),
        Arc::new(MemoryStore::new()),
    );

    let report = engine.run_cycle().await;
    let record = report.record().expect("route executed");
    assert_eq!(record.leg_count, 3);
    assert_eq!(record.outcomes.len(), 1);
    assert!(record.aborted);
    assert_eq!(executor.calls(), 1);
    assert_eq!(engine.stats().await.failed_routes, 1);
}

#[tokio::test]
async fn fractal_failure_continues() {
    let (engine, executor) = engine_with(
        permissive(GenerationMode::Fractal),
        Script::FailLeg(0),
        Arc::new(MemoryStore::new()),
    );

    let report = engine.run_cycle().await;
    let record = report.record().expect("route executed");
    assert!(record.leg_count > 1);
    assert_eq!(record.outcomes.len(), record.leg_count);
    assert_eq!(executor.calls(), record.leg_count);
    assert!(record.is_success());
}

#[tokio::test]
async fn failsafe_pauses_after_consecutive_failures() {
    let mut cfg = permissive(GenerationMode::Waterfall);
    cfg.failsafe_max_failures = 2;
    let (engine, _) = engine_with(cfg, Script::NeverFill, Arc::new(MemoryStore::new()));

    for _ in 0..2 {
        let report = engine.run_cycle().await;
        assert!(!report.record().expect("route executed").is_success());
    }

    let third = engine.run_cycle().await;
    match third.outcome {
        CycleOutcome::Paused { until } => {
            let remaining = until - Utc::now();
            assert!(remaining > Duration::seconds(1_700) && remaining <= Duration::seconds(1_800));
        }
        other => panic!("expected pause, got {other:?}"),
    }
    assert_eq!(engine.stats().await.total_routes, 2);
}

#[tokio::test]
async fn executor_errors_are_recorded_not_raised() {
    let (engine, _) = engine_with(
        permissive(GenerationMode::Quantum),
        Script::Error,
        Arc::new(MemoryStore::new()),
    );
    let report = engine.run_cycle().await;
    let record = report.record().expect("route executed");
    assert_eq!(record.successful_legs, 0);
    assert!(record.outcomes.iter().all(|o| o.error.is_some()));
}

// ---------------------------------------------------------------------------
// Throttles and statistics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn spacing_throttles_back_to_back_cycles() {
    let mut cfg = permissive(GenerationMode::Sequential);
    cfg.min_execution_spacing_secs = 3_600;
    let (engine, _) = engine_with(cfg, Script::AlwaysFill, Arc::new(MemoryStore::new()));

    assert!(engine.run_cycle().await.record().is_some());
    let second = engine.run_cycle().await;
    assert!(matches!(second.outcome, CycleOutcome::Throttled(RejectionReason::Spacing { .. })));
}

#[tokio::test]
async fn stats_are_monotone_and_snapshots_idempotent() {
    let (engine, _) = engine_with(
        permissive(GenerationMode::ParallelSync),
        Script::FailLeg(1),
        Arc::new(MemoryStore::new()),
    );

    let mut previous = engine.stats().await;
    for _ in 0..5 {
        engine.run_cycle().await;
        let a = engine.stats().await;
        let b = engine.stats().await;
        assert_eq!(a, b);

        assert!(a.total_routes >= previous.total_routes);
        assert!(a.successful_routes >= previous.successful_routes);
        assert!(a.failed_routes >= previous.failed_routes);
        assert!(a.total_legs >= previous.total_legs);
        assert!(a.total_profit_usd >= previous.total_profit_usd);
        previous = a;
    }
    assert_eq!(previous.total_routes, 5);
}

#[tokio::test]
async fn stale_daily_window_does_not_block_and_resets() {
    let mut seeded = Statistics::new(Utc::now() - Duration::hours(25));
    seeded.daily_routes = 10;
    seeded.total_routes = 10;
    let store = Arc::new(MemoryStore::with(seeded));

    let mut cfg = permissive(GenerationMode::Waterfall);
    cfg.max_daily_routes = 10;
    let (engine, _) = engine_with(cfg, Script::AlwaysFill, store);

    assert!(engine.run_cycle().await.record().is_some());
    let stats = engine.stats().await;
    assert_eq!(stats.daily_routes, 1);
    assert_eq!(stats.total_routes, 11);
}

#[tokio::test]
async fn daily_cap_blocks_until_window_rolls() {
    let mut cfg = permissive(GenerationMode::Waterfall);
    cfg.max_daily_routes = 1;
    let (engine, _) = engine_with(cfg, Script::AlwaysFill, Arc::new(MemoryStore::new()));

    assert!(engine.run_cycle().await.record().is_some());
    let blocked = engine.run_cycle().await;
    assert!(matches!(
        blocked.outcome,
        CycleOutcome::Throttled(RejectionReason::DailyCap { count: 1, cap: 1 })
    ));

    engine
        .update_config(&ConfigPatch {
            max_daily_routes: Some(2),
            ..ConfigPatch::default()
        })
        .await;
    assert!(engine.run_cycle().await.record().is_some());
}

// ---------------------------------------------------------------------------
// Persistence and configuration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn statistics_survive_restart() {
    let path = std::env::temp_dir()
        .join(format!("cascade_it_stats_{}.json", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .to_string();

    {
        let (engine, _) = engine_with(
            permissive(GenerationMode::Waterfall),
            Script::AlwaysFill,
            Arc::new(JsonFileStore::new(path.clone())),
        );
        assert!(engine.run_cycle().await.record().is_some());
        engine.stop().await;
    }

    let store = JsonFileStore::new(path.clone());
    let saved = assert_ok!(store.load()).expect("stats file written");
    assert_eq!(saved.total_routes, 1);
    assert_eq!(saved.successful_routes, 1);
    assert!(saved.best_trade.is_some());

    let (resumed, _) = engine_with(
        permissive(GenerationMode::Waterfall),
        Script::AlwaysFill,
        Arc::new(JsonFileStore::new(path.clone())),
    );
    assert_eq!(resumed.stats().await.total_routes, 1);

    assert_ok!(delete_stats(&path));
}

#[test]
fn malformed_config_falls_back_to_defaults() {
    let cfg = EngineConfig::from_toml_or_default("max_depth = [not toml");
    let defaults = EngineConfig::default();
    assert_eq!(cfg.max_depth, defaults.max_depth);
    assert_eq!(cfg.mode, defaults.mode);

    let partial = EngineConfig::from_toml_or_default("mode = \"fractal\"\nmax_depth = 5\n");
    assert_eq!(partial.mode, GenerationMode::Fractal);
    assert_eq!(partial.max_depth, 5);
    assert_eq!(partial.venues, defaults.venues);
}
