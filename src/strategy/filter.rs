//! Opportunity filter and ranker.
//!
//! Applies the engine-wide throttles (spacing, daily cap, concurrency)
//! and the per-route admission thresholds (profit, borrow cap, risk,
//! fee budget), then ranks survivors by total profit percent.

use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::types::{saturating_add_secs, Route};

/// Routes riskier than this are never admitted.
pub const MAX_ROUTE_RISK: f64 = 50.0;

/// Engine-wide state the throttles are evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    pub last_execution: Option<DateTime<Utc>>,
    pub daily_routes: u64,
    pub in_flight: usize,
}

/// Why a cycle or a route was not admitted.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    /// Too soon after the previous execution.
    Spacing { remaining_secs: i64 },
    DailyCap { count: u64, cap: u64 },
    Concurrency { in_flight: usize, max: usize },
    ProfitUsd { profit: f64, min: f64 },
    ProfitPct { pct: f64, min: f64 },
    BorrowCap { borrowed: f64, cap: f64 },
    Risk { score: f64 },
    FeeBudget { fee: f64, budget: f64 },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spacing { remaining_secs } => write!(f, "spacing: {remaining_secs}s until next slot"),
            Self::DailyCap { count, cap } => write!(f, "daily cap reached ({count}/{cap})"),
            Self::Concurrency { in_flight, max } => write!(f, "{in_flight}/{max} routes in flight"),
            Self::ProfitUsd { profit, min } => write!(f, "profit ${profit:.2} below ${min:.2}"),
            Self::ProfitPct { pct, min } => write!(f, "profit {pct:.3}% below {min:.3}%"),
            Self::BorrowCap { borrowed, cap } => write!(f, "borrow ${borrowed:.0} over cap ${cap:.0}"),
            Self::Risk { score } => write!(f, "risk {score:.1} over {MAX_ROUTE_RISK:.0}"),
            Self::FeeBudget { fee, budget } => write!(f, "fees ${fee:.3} over budget ${budget:.2}"),
        }
    }
}

/// Ranked admission result for one cycle.
#[derive(Debug, Clone, Default)]
pub struct Ranking {
    /// Admitted routes, best first.
    pub ranked: Vec<Route>,
    pub rejected: Vec<(Uuid, RejectionReason)>,
}

impl Ranking {
    pub fn best(&self) -> Option<&Route> {
        self.ranked.first()
    }
}

/// Engine-wide throttles. `Err` means no route may run this cycle.
pub fn check_throttle(cfg: &EngineConfig, throttle: &Throttle, now: DateTime<Utc>) -> Result<(), RejectionReason> {
    if let Some(last) = throttle.last_execution {
        let next_slot = saturating_add_secs(last, cfg.min_execution_spacing_secs);
        if now < next_slot {
            return Err(RejectionReason::Spacing {
                remaining_secs: (next_slot - now).num_seconds().max(1),
            });
        }
    }
    if throttle.daily_routes >= cfg.max_daily_routes {
        return Err(RejectionReason::DailyCap {
            count: throttle.daily_routes,
            cap: cfg.max_daily_routes,
        });
    }
    if throttle.in_flight >= cfg.max_concurrent_routes {
        return Err(RejectionReason::Concurrency {
            in_flight: throttle.in_flight,
            max: cfg.max_concurrent_routes,
        });
    }
    Ok(())
}

/// Per-route admission thresholds.
pub fn admit(cfg: &EngineConfig, route: &Route) -> Result<(), RejectionReason> {
    if route.total_profit_usd < cfg.min_profit_threshold_usd {
        return Err(RejectionReason::ProfitUsd {
            profit: route.total_profit_usd,
            min: cfg.min_profit_threshold_usd,
        });
    }
    if route.total_profit_pct < cfg.min_route_profit_pct {
        return Err(RejectionReason::ProfitPct {
            pct: route.total_profit_pct,
            min: cfg.min_route_profit_pct,
        });
    }
    if route.total_borrowed_usd > cfg.max_total_borrow_usd {
        return Err(RejectionReason::BorrowCap {
            borrowed: route.total_borrowed_usd,
            cap: cfg.max_total_borrow_usd,
        });
    }
    if route.avg_risk_score > MAX_ROUTE_RISK {
        return Err(RejectionReason::Risk {
            score: route.avg_risk_score,
        });
    }
    if route.total_fee_usd > cfg.max_fee_budget_usd {
        return Err(RejectionReason::FeeBudget {
            fee: route.total_fee_usd,
            budget: cfg.max_fee_budget_usd,
        });
    }
    Ok(())
}

/// Filter and rank a cycle's routes.
///
/// Throttles are checked first; if they fail, nothing is admitted and the
/// reason is returned as the error.
pub fn rank(
    cfg: &EngineConfig,
    routes: Vec<Route>,
    throttle: &Throttle,
    now: DateTime<Utc>,
) -> Result<Ranking, RejectionReason> {
    check_throttle(cfg, throttle, now)?;

    let total = routes.len();
    let mut ranking = Ranking::default();
    for route in routes {
        match admit(cfg, &route) {
            Ok(()) => ranking.ranked.push(route),
            Err(reason) => {
                debug!(route_id = %route.id, reason = %reason, "Route rejected");
                ranking.rejected.push((route.id, reason));
            }
        }
    }

    ranking
        .ranked
        .sort_by(|a, b| b.total_profit_pct.total_cmp(&a.total_profit_pct));

    info!(
        candidates = total,
        admitted = ranking.ranked.len(),
        best = ranking.best().map(|r| format!("{:.3}%", r.total_profit_pct)).unwrap_or_default(),
        "Routes ranked"
    );
    Ok(ranking)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
