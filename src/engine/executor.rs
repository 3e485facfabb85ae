//! Route executor.
//!
//! The `Coordinator` drives one route through its legs:
//! `Pending → Running(i) → Succeeded | Failed` per leg, then
//! `Completed | Aborted`. Each leg goes to a `LegExecutor`; the default
//! `SimulatedLegExecutor` succeeds with probability `confidence / 100`.
//!
//! Waterfall and sequential routes stop at the first failed leg. The
//! other modes run every leg. Parallel-sync chains run concurrently and
//! are joined before the route completes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::accountant::Accountant;
use super::failsafe::FailsafeGuard;
use crate::config::EngineConfig;
use crate::oracle::OracleClient;
use crate::strategy::scorer::Scorer;
use crate::strategy::SharedRng;
use crate::types::{CascadeError, ExecutionRecord, GenerationMode, Leg, LegOutcome, Route};

// ---------------------------------------------------------------------------
// Leg execution boundary
// ---------------------------------------------------------------------------

/// One leg handed to the execution boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct LegRequest {
    pub index: usize,
    pub path: Vec<String>,
    pub venues: (String, String),
    /// Borrowed amount, in units of `asset`.
    pub amount: f64,
    pub asset: String,
    pub confidence: f64,
    pub expected_profit: f64,
}

impl LegRequest {
    pub fn for_leg(index: usize, leg: &Leg) -> Self {
        Self {
            index,
            path: leg.path.clone(),
            venues: leg.venues.clone(),
            amount: leg.borrow_amount,
            asset: leg.borrow_asset.clone(),
            confidence: leg.confidence,
            expected_profit: leg.estimated_profit,
        }
    }
}

/// What came back from the venue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegFill {
    pub success: bool,
    /// Amount of the borrowed asset held after the cycle, before repayment.
    pub realized_amount: f64,
}

/// Executes a single leg. Signing and settlement live behind this trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LegExecutor: Send + Sync {
    async fn execute_leg(&self, request: &LegRequest) -> Result<LegFill>;
}

/// Paper executor: the leg lands with probability `confidence / 100` and
/// realizes exactly the expected profit.
pub struct SimulatedLegExecutor {
    rng: SharedRng,
}

impl SimulatedLegExecutor {
    pub fn new(rng: SharedRng) -> Self {
        Self { rng }
    }
}

#[async_trait]
impl LegExecutor for SimulatedLegExecutor {
    async fn execute_leg(&self, request: &LegRequest) -> Result<LegFill> {
        let roll = self.rng.uniform(0.0, 100.0).await;
        let success = roll < request.confidence;
        debug!(
            leg = request.index,
            path = request.path.join("→"),
            roll = format!("{roll:.1}"),
            confidence = format!("{:.1}", request.confidence),
            success,
            "[PAPER] Leg simulated"
        );
        Ok(LegFill {
            success,
            realized_amount: if success {
                request.amount + request.expected_profit
            } else {
                request.amount
            },
        })
    }
}

// ---------------------------------------------------------------------------
// In-flight accounting
// ---------------------------------------------------------------------------

/// Holds one in-flight slot; released on drop, whatever the outcome.
pub struct InFlightGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

fn try_acquire(counter: &Arc<AtomicUsize>, max: usize) -> Option<InFlightGuard> {
    let mut current = counter.load(Ordering::SeqCst);
    loop {
        if current >= max {
            return None;
        }
        match counter.compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => {
                return Some(InFlightGuard {
                    counter: counter.clone(),
                })
            }
            Err(actual) => current = actual,
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct Coordinator {
    executor: Arc<dyn LegExecutor>,
    oracle: Arc<OracleClient>,
    scorer: Arc<Scorer>,
    accountant: Arc<Accountant>,
    failsafe: Mutex<FailsafeGuard>,
    in_flight: Arc<AtomicUsize>,
}

impl Coordinator {
    pub fn new(
        executor: Arc<dyn LegExecutor>,
        oracle: Arc<OracleClient>,
        scorer: Arc<Scorer>,
        accountant: Arc<Accountant>,
    ) -> Self {
        Self {
            executor,
            oracle,
            scorer,
            accountant,
            failsafe: Mutex::new(FailsafeGuard::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// End of the failsafe pause, if one is active.
    pub async fn paused_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.failsafe.lock().await.paused_until(now)
    }

    pub async fn failsafe_trips(&self) -> u64 {
        self.failsafe.lock().await.trips()
    }

    /// Execute a route end to end and record it.
    ///
    /// Refuses (without recording anything) while the failsafe is paused or
    /// when `max_concurrent_routes` are already in flight. Leg failures and
    /// timeouts never surface as errors; they land in the returned record.
    pub async fn execute(&self, route: &Route, cfg: &EngineConfig) -> Result<ExecutionRecord, CascadeError> {
        if !self.failsafe.lock().await.check(Utc::now()) {
            let until = self.paused_until(Utc::now()).await;
            return Err(CascadeError::Refused(match until {
                Some(t) => format!("failsafe paused until {t}"),
                None => "failsafe paused".to_string(),
            }));
        }

        let _slot = try_acquire(&self.in_flight, cfg.max_concurrent_routes).ok_or_else(|| {
            CascadeError::Refused(format!("{} routes already in flight", cfg.max_concurrent_routes))
        })?;

        info!(route_id = %route.id, route = %route, "Executing route");

        // Legs land in the record as they finish, so a route timeout only
        // fails the ones still pending.
        let progress = Mutex::new(ExecutionRecord::start(route));
        let route_budget = Duration::from_millis(cfg.route_timeout_ms);
        let timed_out = timeout(route_budget, self.run_legs(route, cfg, &progress)).await.is_err();
        let mut record = progress.into_inner();
        if timed_out {
            let message = CascadeError::Timeout(cfg.route_timeout_ms).to_string();
            let pending: Vec<usize> = (0..route.legs.len())
                .filter(|i| !record.outcomes.iter().any(|o| o.index == *i))
                .collect();
            warn!(
                route_id = %route.id,
                timeout_ms = cfg.route_timeout_ms,
                pending = pending.len(),
                "Route timed out"
            );
            record.aborted |= !pending.is_empty();
            for index in pending {
                record.push(failed(index, message.clone()));
            }
        }
        record.finish();

        let tripped = self.failsafe.lock().await.record(
            record.is_success(),
            cfg.failsafe_max_failures,
            cfg.failsafe_cooldown_secs,
            Utc::now(),
        );

        if let Some(first_ok) = record.outcomes.iter().find(|o| o.success) {
            if let Some(leg) = route.legs.get(first_ok.index) {
                self.scorer.remember_success(leg.asset_triple()).await;
            }
        }

        info!(
            route_id = %route.id,
            outcome = %record,
            elapsed_ms = record.elapsed().num_milliseconds(),
            failsafe_tripped = tripped,
            "Route finished"
        );

        self.accountant.record(&record).await;
        Ok(record)
    }

    async fn run_legs(&self, route: &Route, cfg: &EngineConfig, progress: &Mutex<ExecutionRecord>) {
        if route.mode == GenerationMode::ParallelSync {
            let mut chains: BTreeMap<usize, Vec<(usize, &Leg)>> = BTreeMap::new();
            for (i, leg) in route.legs.iter().enumerate() {
                chains.entry(leg.chain.unwrap_or(0)).or_default().push((i, leg));
            }
            let runs = chains.into_values().map(|legs| async move {
                for (i, leg) in legs {
                    let outcome = self.run_leg(i, leg, cfg).await;
                    progress.lock().await.push(outcome);
                }
            });
            // Sync point: every chain finishes before the route does.
            join_all(runs).await;
            return;
        }

        for (i, leg) in route.legs.iter().enumerate() {
            let outcome = self.run_leg(i, leg, cfg).await;
            let failed = !outcome.success;
            let mut record = progress.lock().await;
            record.push(outcome);
            if failed && route.mode.aborts_on_failure() {
                debug!(route_id = %route.id, leg = i, "Aborting remaining legs");
                record.aborted = i + 1 < route.legs.len();
                break;
            }
        }
    }

    async fn run_leg(&self, index: usize, leg: &Leg, cfg: &EngineConfig) -> LegOutcome {
        let request = LegRequest::for_leg(index, leg);
        let budget = Duration::from_millis(cfg.leg_timeout_ms);

        match timeout(budget, self.executor.execute_leg(&request)).await {
            Ok(Ok(fill)) if fill.success => {
                let profit = fill.realized_amount - leg.borrow_amount;
                LegOutcome {
                    index,
                    success: true,
                    realized_profit: profit,
                    realized_profit_usd: self.oracle.to_usd(&leg.borrow_asset, profit).await,
                    error: None,
                }
            }
            Ok(Ok(_)) => failed(index, "leg did not fill".to_string()),
            Ok(Err(e)) => {
                warn!(leg = index, error = %e, "Leg execution error");
                failed(
                    index,
                    CascadeError::LegFailed {
                        index,
                        message: e.to_string(),
                    }
                    .to_string(),
                )
            }
            Err(_) => {
                warn!(leg = index, timeout_ms = cfg.leg_timeout_ms, "Leg timed out");
                failed(index, CascadeError::Timeout(cfg.leg_timeout_ms).to_string())
            }
        }
    }
}

fn failed(index: usize, error: String) -> LegOutcome {
    LegOutcome {
        index,
        success: false,
        realized_profit: 0.0,
        realized_profit_usd: 0.0,
        error: Some(error),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
