//! Parallel-sync mode: independent chains joined at one sync point.
//!
//! Capital is split evenly across up to three chains. Each chain is
//! extended level by level, round-robin, up to `sync_depth` legs, with
//! its own profit carried into its next level. No path is reused across
//! chains.

use async_trait::async_trait;
use std::collections::HashSet;
use tracing::debug;

use super::{take_unused, GenerationContext, RouteStrategy};
use crate::strategy::finder::DEFAULT_RESULT_CAP;
use crate::types::{GenerationMode, Route};

pub const MAX_CHAINS: usize = 3;

pub struct ParallelSync;

#[async_trait]
impl RouteStrategy for ParallelSync {
    fn mode(&self) -> GenerationMode {
        GenerationMode::ParallelSync
    }

    async fn generate(&self, ctx: &GenerationContext<'_>) -> Vec<Route> {
        let asset = ctx.base_asset();
        let probe = ctx
            .opportunities(ctx.base_amount() / MAX_CHAINS as f64, asset, MAX_CHAINS)
            .await;
        let chains = probe.len().min(MAX_CHAINS);
        if chains == 0 {
            return Vec::new();
        }

        let share = ctx.base_amount() / chains as f64;
        let mut amounts = vec![share; chains];
        let mut open = vec![true; chains];
        let mut used: HashSet<String> = HashSet::new();
        let mut b = ctx.builder(self.mode());

        for level in 0..ctx.config.sync_depth {
            for chain in 0..chains {
                if !open[chain] || b.is_full() {
                    continue;
                }
                let opps = ctx.opportunities(amounts[chain], asset, DEFAULT_RESULT_CAP).await;
                let Some(opp) = take_unused(&opps, &mut used) else {
                    debug!(chain, level, "Chain ran dry");
                    open[chain] = false;
                    continue;
                };
                let profit = opp.profit;
                if b.try_push(ctx.score(&opp, Some(chain)).await) {
                    amounts[chain] += profit;
                } else {
                    open[chain] = false;
                }
            }
        }

        b.build().into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::testing::*;
    use crate::generator::SYNC_OVERHEAD_MS;

    #[tokio::test]
    async fn test_capital_split_across_chains() {
        let h = Harness::new();
        let mut cfg = config(GenerationMode::ParallelSync);
        cfg.max_depth = 8;
        cfg.sync_depth = 2;
        let mut source = FixedSource::new(0.5);
        source.per_call = 3;

        let routes = ParallelSync.generate(&h.ctx(&cfg, &source)).await;
        assert_eq!(routes.len(), 1);
        let r = &routes[0];
        assert_eq!(r.chain_count(), 3);
        assert_eq!(r.leg_count(), 6);

        // First level borrows an even third each
        for leg in r.legs.iter().take(3) {
            assert!((leg.borrow_amount - 100.0 / 3.0).abs() < 1e-9);
        }
        // Two 1.2s legs per chain run side by side
        assert_eq!(r.total_duration_ms, 2 * 1_200 + SYNC_OVERHEAD_MS);
    }

    #[tokio::test]
    async fn test_depth_limit_caps_total_legs() {
        let h = Harness::new();
        let mut cfg = config(GenerationMode::ParallelSync);
        cfg.max_depth = 4;
        cfg.sync_depth = 3;
        let mut source = FixedSource::new(0.5);
        source.per_call = 3;

        let routes = ParallelSync.generate(&h.ctx(&cfg, &source)).await;
        assert_eq!(routes[0].leg_count(), 4);
    }
}
