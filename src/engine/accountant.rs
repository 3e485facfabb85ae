//! Accountant — the statistics store.
//!
//! Folds each finished `ExecutionRecord` into the long-lived `Statistics`
//! and persists the full document. One writer at a time; readers get a
//! consistent clone.

use chrono::{DateTime, Duration, Timelike, Utc};
use rust_decimal::prelude::*;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::storage::StatsPersistence;
use crate::types::{BestTrade, ExecutionRecord, Statistics};

/// Decimal places kept for USD amounts.
const USD_DP: u32 = 6;

pub fn usd(amount: f64) -> Decimal {
    Decimal::from_f64(amount).unwrap_or_default().round_dp(USD_DP)
}

/// Fold one record into `stats`, as of `now`.
///
/// Every counter is non-decreasing except `daily_routes`, which restarts
/// when 24h have passed since the window opened.
pub fn apply(stats: &mut Statistics, record: &ExecutionRecord, now: DateTime<Utc>) {
    if now - stats.daily_window_start >= Duration::hours(24) {
        debug!(previous = stats.daily_routes, "Daily route window rolled over");
        stats.daily_routes = 0;
        stats.daily_window_start = now;
    }

    stats.total_routes += 1;
    stats.daily_routes += 1;
    if record.is_success() {
        stats.successful_routes += 1;
    } else {
        stats.failed_routes += 1;
    }
    stats.last_execution = Some(record.finished_at);

    stats.total_legs += record.leg_count as u64;
    stats.avg_depth = stats.total_legs as f64 / stats.total_routes as f64;

    for outcome in record.outcomes.iter().filter(|o| o.success) {
        if let Some((a, b)) = record.venues.get(outcome.index) {
            *stats.venue_usage.entry(a.clone()).or_default() += 1;
            if b != a {
                *stats.venue_usage.entry(b.clone()).or_default() += 1;
            }
        }
        if let Some(path) = record.paths.get(outcome.index) {
            // The closing hop repeats the start asset.
            let mut assets: Vec<&String> = path.iter().take(path.len().saturating_sub(1)).collect();
            assets.sort();
            assets.dedup();
            for asset in assets {
                *stats.asset_usage.entry(asset.clone()).or_default() += 1;
            }
        }
    }

    let profit = usd(record.total_profit_usd);
    stats.total_profit_usd += profit;
    stats.hourly_profit[record.finished_at.hour() as usize] += profit;
    if stats.total_legs > 0 {
        stats.avg_profit_per_leg = (stats.total_profit_usd / Decimal::from(stats.total_legs)).round_dp(USD_DP);
    }

    let beats_best = stats.best_trade.as_ref().map_or(true, |best| profit > best.profit_usd);
    if record.is_success() && profit > Decimal::ZERO && beats_best {
        stats.best_trade = Some(BestTrade {
            profit_usd: profit,
            description: record.description.clone(),
            leg_count: record.leg_count,
            timestamp: record.finished_at,
        });
    }
}

pub struct Accountant {
    stats: RwLock<Statistics>,
    store: Arc<dyn StatsPersistence>,
}

impl Accountant {
    /// Resume from the store, or start empty.
    pub fn load(store: Arc<dyn StatsPersistence>) -> Self {
        let stats = match store.load() {
            Ok(Some(stats)) => stats,
            Ok(None) => Statistics::new(Utc::now()),
            Err(e) => {
                warn!(error = %e, "Could not load statistics, starting fresh");
                Statistics::new(Utc::now())
            }
        };
        Self::with_stats(stats, store)
    }

    pub fn with_stats(stats: Statistics, store: Arc<dyn StatsPersistence>) -> Self {
        Self {
            stats: RwLock::new(stats),
            store,
        }
    }

    /// Fold a finished execution in and persist. Persistence failures are
    /// logged, never returned.
    pub async fn record(&self, record: &ExecutionRecord) {
        self.record_at(record, Utc::now()).await
    }

    pub async fn record_at(&self, record: &ExecutionRecord, now: DateTime<Utc>) {
        let mut stats = self.stats.write().await;
        apply(&mut stats, record, now);

        info!(
            route_id = %record.route_id,
            success = record.is_success(),
            legs = format!("{}/{}", record.successful_legs, record.leg_count),
            profit = format!("${:.4}", record.total_profit_usd),
            total_routes = stats.total_routes,
            total_profit = format!("${:.2}", stats.total_profit_usd),
            "Execution recorded"
        );

        // Saved under the write lock so documents land in record order.
        if let Err(e) = self.store.save(&stats) {
            warn!(error = %e, "Failed to persist statistics");
        }
    }

    /// Consistent copy of the current statistics.
    pub async fn snapshot(&self) -> Statistics {
        self.stats.read().await.clone()
    }

    pub async fn flush(&self) {
        let stats = self.stats.read().await;
        match self.store.save(&stats) {
            Ok(()) => debug!(routes = stats.total_routes, "Statistics flushed"),
            Err(e) => warn!(error = %e, "Failed to flush statistics"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
