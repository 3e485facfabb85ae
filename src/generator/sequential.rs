//! Sequential mode: fixed-length combinations of independent opportunities.
//!
//! Every leg borrows the base amount; there is no capital carry-over.

use async_trait::async_trait;
use tracing::debug;

use super::{GenerationContext, RouteStrategy, ScoredLeg};
use crate::strategy::finder::DEFAULT_RESULT_CAP;
use crate::types::{GenerationMode, Route};

/// Upper bound on combinations tried per depth.
const MAX_COMBINATIONS_PER_DEPTH: usize = 64;

pub struct Sequential;

#[async_trait]
impl RouteStrategy for Sequential {
    fn mode(&self) -> GenerationMode {
        GenerationMode::Sequential
    }

    async fn generate(&self, ctx: &GenerationContext<'_>) -> Vec<Route> {
        let opps = ctx
            .opportunities(ctx.base_amount(), ctx.base_asset(), DEFAULT_RESULT_CAP)
            .await;

        let mut legs: Vec<ScoredLeg> = Vec::with_capacity(opps.len());
        for opp in &opps {
            legs.push(ctx.score(opp, None).await);
        }

        let mut routes = Vec::new();
        if legs.len() < 2 || ctx.config.max_depth < 2 {
            // No cascade possible; each leg stands as its own route.
            for leg in legs {
                let mut b = ctx.builder(self.mode());
                if b.try_push(leg) {
                    routes.extend(b.build());
                }
            }
            return routes;
        }

        for depth in 2..=ctx.config.max_depth.min(legs.len()) {
            for combo in combinations(legs.len(), depth, MAX_COMBINATIONS_PER_DEPTH) {
                let mut b = ctx.builder(self.mode());
                if combo.iter().all(|&i| b.try_push(legs[i].clone())) {
                    routes.extend(b.build());
                }
            }
        }

        debug!(opportunities = opps.len(), routes = routes.len(), "Sequential combinations built");
        routes
    }
}

/// Index combinations of size `k` from `0..n`, in lexicographic order,
/// at most `limit` of them.
pub fn combinations(n: usize, k: usize, limit: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    if k == 0 || k > n {
        return out;
    }
    let mut idx: Vec<usize> = (0..k).collect();
    loop {
        out.push(idx.clone());
        if out.len() >= limit {
            return out;
        }
        // Rightmost index that can still advance.
        let Some(i) = (0..k).rev().find(|&i| idx[i] < n - k + i) else {
            return out;
        };
        idx[i] += 1;
        for j in i + 1..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
}
