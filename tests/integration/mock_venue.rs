//! Deterministic venues for integration testing.
//!
//! `OneShotSource` finds exactly one opportunity per generator call and
//! `ScriptedExecutor` fills legs according to a fixed script, so engine
//! scenarios run without randomness or network access.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use cascade::config::EngineConfig;
use cascade::engine::executor::{LegExecutor, LegFill, LegRequest};
use cascade::strategy::{OpportunityQuery, OpportunitySource};
use cascade::types::{GenerationMode, Opportunity};

/// Answers only for the alphabetically ordered venue direction, so a
/// generator fanning out over both directions of a pair sees exactly
/// one opportunity per call. Each call returns a different path.
pub struct OneShotSource {
    pub profit_pct: f64,
    queries: Mutex<Vec<f64>>,
}

impl OneShotSource {
    pub fn new(profit_pct: f64) -> Self {
        Self {
            profit_pct,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Amounts the generator asked about, in call order.
    pub fn amounts(&self) -> Vec<f64> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl OpportunitySource for OneShotSource {
    async fn find(&self, query: &OpportunityQuery<'_>) -> Vec<Opportunity> {
        if query.venues.0 > query.venues.1 {
            return Vec::new();
        }
        let n = {
            let mut queries = self.queries.lock().unwrap();
            queries.push(query.amount);
            queries.len()
        };
        // Rotate through the ordered mid pairs so successive calls differ.
        let mids: Vec<&String> = query.universe.iter().filter(|a| a.as_str() != query.asset).collect();
        let mut pairs = Vec::new();
        for a in &mids {
            for b in &mids {
                if a != b {
                    pairs.push((a.to_string(), b.to_string()));
                }
            }
        }
        let (m1, m2) = pairs[n % pairs.len()].clone();
        vec![Opportunity {
            path: vec![query.asset.into(), m1, m2, query.asset.into()],
            venues: (query.venues.0.into(), query.venues.1.into()),
            amount: query.amount,
            profit: query.amount * self.profit_pct / 100.0,
            profit_pct: self.profit_pct,
            fee_usd: 0.006,
            duration_ms: 1_200,
            bridge: None,
        }]
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Script {
    AlwaysFill,
    NeverFill,
    /// Fail only the leg at this index.
    FailLeg(usize),
    Error,
}

pub struct ScriptedExecutor {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LegExecutor for ScriptedExecutor {
    async fn execute_leg(&self, request: &LegRequest) -> Result<LegFill> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let success = match self.script {
            Script::AlwaysFill => true,
            Script::NeverFill => false,
            Script::FailLeg(i) => request.index != i,
            Script::Error => return Err(anyhow!("venue unavailable")),
        };
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

/// Config under which every `OneShotSource` route is admitted and no
/// throttle gets in the way.
pub fn permissive(mode: GenerationMode) -> EngineConfig {
    EngineConfig {
        mode,
        venues: vec!["jupiter".into(), "orca".into()],
        assets: vec!["USDC".into(), "SOL".into(), "ETH".into(), "BTC".into()],
        max_depth: 3,
        level_multiplier: 1.5,
        base_borrow_amount: 100.0,
        base_borrow_asset: "USDC".into(),
        min_profit_threshold_usd: 0.0,
        min_profit_per_leg_pct: 0.0,
        min_route_profit_pct: 0.0,
        min_execution_spacing_secs: 0,
        max_position_pct: 100.0,
        ..EngineConfig::default()
    }
}
