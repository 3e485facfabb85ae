//! Triangular opportunity finder.
//!
//! Enumerates start → mid1 → mid2 → start cycles over the asset
//! universe, prices each hop through a `QuoteProvider` (hops alternate
//! venue A, B, A), nets out the flash-borrow fee, settlement fees and an
//! optional market-impact discount, and keeps strictly profitable paths.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;

use super::{OpportunityQuery, OpportunitySource, QuoteProvider};
use crate::oracle::OracleClient;
use crate::types::Opportunity;

/// Flash-borrow fee, percent of the borrowed amount.
pub const FLASH_BORROW_FEE_PCT: f64 = 0.35;

/// Settlement fee per hop, USD.
pub const SETTLEMENT_FEE_USD_PER_HOP: f64 = 0.002;

/// Market impact per 1% of 24h volume traded, in percent.
pub const MARKET_IMPACT_FACTOR: f64 = 0.1;

/// Start-asset volume share above which a leg is rejected.
pub const MAX_START_VOLUME_SHARE: f64 = 0.005;

/// Intermediate-asset volume share above which a leg is rejected.
pub const MAX_INTERMEDIATE_VOLUME_SHARE: f64 = 0.01;

/// Extra slippage on a bridged settlement, percent.
pub const BRIDGE_SLIPPAGE_PCT: f64 = 0.15;

/// Bridge fee, USD.
pub const BRIDGE_FEE_USD: f64 = 0.05;

/// Estimated latency of one hop.
pub const HOP_DURATION_MS: u64 = 400;

/// Extra latency of a bridged settlement.
pub const BRIDGE_DURATION_MS: u64 = 15_000;

pub const DEFAULT_RESULT_CAP: usize = 10;

// ---------------------------------------------------------------------------
// Market-size guard
// ---------------------------------------------------------------------------

/// Deviation of a quoted rate from the oracle mid, in percent. An
/// unpriceable mid counts as unbounded slippage.
pub fn hop_slippage_pct(rate: f64, mid: f64) -> f64 {
    if !(mid.is_finite() && mid > 0.0) {
        return f64::INFINITY;
    }
    (rate / mid - 1.0).abs() * 100.0
}

/// Rejects trades too large for the market they move through: more than
/// 0.5% of the start asset's 24h volume, or 1% of any intermediate's.
pub fn passes_size_guard(trade_usd: f64, start_volume: f64, intermediate_volumes: &[f64]) -> bool {
    if trade_usd > start_volume * MAX_START_VOLUME_SHARE {
        return false;
    }
    intermediate_volumes
        .iter()
        .all(|v| trade_usd <= v * MAX_INTERMEDIATE_VOLUME_SHARE)
}

/// Market impact in percent for a trade against the given volumes.
pub fn market_impact_pct(trade_usd: f64, volumes: &[f64]) -> f64 {
    volumes
        .iter()
        .filter(|v| **v > 0.0)
        .map(|v| trade_usd / v * 100.0 * MARKET_IMPACT_FACTOR)
        .sum()
}

// ---------------------------------------------------------------------------
// Finder
// ---------------------------------------------------------------------------

pub struct ArbitrageFinder {
    oracle: Arc<OracleClient>,
    quotes: Arc<dyn QuoteProvider>,
}

impl ArbitrageFinder {
    pub fn new(oracle: Arc<OracleClient>, quotes: Arc<dyn QuoteProvider>) -> Self {
        Self { oracle, quotes }
    }

    /// Quote one hop, or `None` when it strays further from the oracle
    /// mid than `query.max_slippage_pct`.
    async fn hop_rate(&self, query: &OpportunityQuery<'_>, venue: &str, from: &str, to: &str) -> Option<f64> {
        let rate = self.quotes.rate(venue, from, to).await;
        let mid = self.oracle.price(from).await / self.oracle.price(to).await;
        let slippage = hop_slippage_pct(rate, mid);
        if slippage > query.max_slippage_pct {
            debug!(
                venue,
                hop = format!("{from}→{to}"),
                slippage_pct = format!("{slippage:.3}"),
                max_pct = query.max_slippage_pct,
                "Hop exceeds slippage tolerance"
            );
            return None;
        }
        Some(rate)
    }

    /// Price one cycle. Returns `None` when the guard rejects it or the
    /// net result is not strictly positive.
    async fn evaluate(
        &self,
        query: &OpportunityQuery<'_>,
        start: &str,
        mid1: &str,
        mid2: &str,
        trade_usd: f64,
        start_volume: f64,
    ) -> Option<Opportunity> {
        let (venue_a, venue_b) = query.venues;
        let v1 = self.oracle.volume_24h(mid1).await;
        let v2 = self.oracle.volume_24h(mid2).await;

        if !passes_size_guard(trade_usd, start_volume, &[v1, v2]) {
            return None;
        }

        let r1 = self.hop_rate(query, venue_a, start, mid1).await?;
        let r2 = self.hop_rate(query, venue_b, mid1, mid2).await?;
        let r3 = self.hop_rate(query, venue_a, mid2, start).await?;

        let out = query.amount * r1 * r2 * r3;
        let gross_pct = (out / query.amount - 1.0) * 100.0;

        let fee_usd = SETTLEMENT_FEE_USD_PER_HOP * 3.0;
        let fee_pct = fee_usd / trade_usd * 100.0;
        let impact_pct = if query.market_impact {
            market_impact_pct(trade_usd, &[start_volume, v1, v2])
        } else {
            0.0
        };

        let net_pct = gross_pct - FLASH_BORROW_FEE_PCT - fee_pct - impact_pct;
        if !net_pct.is_finite() || net_pct <= 0.0 {
            return None;
        }

        Some(Opportunity {
            path: vec![start.to_string(), mid1.to_string(), mid2.to_string(), start.to_string()],
            venues: (venue_a.to_string(), venue_b.to_string()),
            amount: query.amount,
            profit: query.amount * net_pct / 100.0,
            profit_pct: net_pct,
            fee_usd,
            duration_ms: HOP_DURATION_MS * 3,
            bridge: None,
        })
    }

    /// Cross-venue variants of `best`, one per bridge, that stay profitable.
    fn bridged_variants(best: &Opportunity, bridges: &[String], trade_usd: f64) -> Vec<Opportunity> {
        bridges
            .iter()
            .filter_map(|bridge| {
                let extra_fee_pct = BRIDGE_FEE_USD / trade_usd * 100.0;
                let net_pct = best.profit_pct - BRIDGE_SLIPPAGE_PCT - extra_fee_pct;
                (net_pct > 0.0).then(|| Opportunity {
                    profit: best.amount * net_pct / 100.0,
                    profit_pct: net_pct,
                    fee_usd: best.fee_usd + BRIDGE_FEE_USD,
                    duration_ms: best.duration_ms + BRIDGE_DURATION_MS,
                    bridge: Some(bridge.clone()),
                    ..best.clone()
                })
            })
            .collect()
    }
}

#[async_trait]
impl OpportunitySource for ArbitrageFinder {
    async fn find(&self, query: &OpportunityQuery<'_>) -> Vec<Opportunity> {
        if query.amount <= 0.0 || query.cap == 0 {
            return Vec::new();
        }

        let start = query.asset.to_uppercase();
        let trade_usd = self.oracle.to_usd(&start, query.amount).await;
        if trade_usd <= 0.0 {
            return Vec::new();
        }

        let start_volume = self.oracle.volume_24h(&start).await;
        if trade_usd > start_volume * MAX_START_VOLUME_SHARE {
            debug!(
                asset = %start,
                trade_usd = format!("${trade_usd:.0}"),
                volume = format!("${start_volume:.0}"),
                "Trade exceeds start-asset volume guard"
            );
            return Vec::new();
        }

        let mids: Vec<String> = query
            .universe
            .iter()
            .map(|a| a.to_uppercase())
            .filter(|a| *a != start)
            .collect();

        let mut candidates = Vec::new();
        for m1 in &mids {
            for m2 in &mids {
                if m1 != m2 {
                    candidates.push((m1.as_str(), m2.as_str()));
                }
            }
        }

        let evaluations = candidates
            .into_iter()
            .map(|(m1, m2)| self.evaluate(query, &start, m1, m2, trade_usd, start_volume));
        let mut found: Vec<Opportunity> = join_all(evaluations).await.into_iter().flatten().collect();

        found.sort_by(|a, b| b.profit_pct.total_cmp(&a.profit_pct));

        if !query.bridges.is_empty() {
            if let Some(best) = found.first().cloned() {
                found.extend(Self::bridged_variants(&best, query.bridges, trade_usd));
                found.sort_by(|a, b| b.profit_pct.total_cmp(&a.profit_pct));
            }
        }

        found.truncate(query.cap);

        debug!(
            asset = %start,
            venues = format!("{}/{}", query.venues.0, query.venues.1),
            found = found.len(),
            "Triangular scan complete"
        );
        found
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
