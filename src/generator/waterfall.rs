//! Waterfall mode: each level borrows more than the last.
//!
//! Level `i + 1` borrows `amount_i × level_multiplier + profit_i`, where
//! `profit_i` is the estimated profit of the leg just added. The top three
//! first-leg candidates are each cascaded independently.

use async_trait::async_trait;
use tracing::debug;

use super::{GenerationContext, RouteStrategy};
use crate::types::{GenerationMode, Route};

/// First-leg candidates explored per cycle.
const FIRST_LEG_CANDIDATES: usize = 3;

pub struct Waterfall;

/// Borrow amount for the level after one that borrowed `amount` and
/// expects `profit`.
pub fn next_amount(amount: f64, multiplier: f64, profit: f64) -> f64 {
    amount * multiplier + profit
}

#[async_trait]
impl RouteStrategy for Waterfall {
    fn mode(&self) -> GenerationMode {
        GenerationMode::Waterfall
    }

    async fn generate(&self, ctx: &GenerationContext<'_>) -> Vec<Route> {
        let asset = ctx.base_asset();
        let firsts = ctx
            .opportunities(ctx.base_amount(), asset, FIRST_LEG_CANDIDATES)
            .await;

        let mut routes = Vec::with_capacity(firsts.len());
        for first in &firsts {
            let mut b = ctx.builder(self.mode());
            let mut amount = first.amount;
            let mut profit = first.profit;
            if !b.try_push(ctx.score(first, None).await) {
                continue;
            }

            while !b.is_full() {
                amount = next_amount(amount, ctx.config.level_multiplier, profit);
                let Some(next) = ctx.opportunities(amount, asset, 1).await.into_iter().next() else {
                    debug!(level = b.len() + 1, amount = format!("{amount:.2}"), "Waterfall ran dry");
                    break;
                };
                profit = next.profit;
                if !b.try_push(ctx.score(&next, None).await) {
                    break;
                }
            }

            routes.extend(b.build());
        }
        routes
    }
}
