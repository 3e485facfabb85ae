//! Fractal mode: an initial leg followed by levels of `2^d` sub-legs.
//!
//! Level `d` (1 ≤ d ≤ 3) borrows `base / 2^d` per leg, plus an even share
//! of the profit pooled from the previous level.

use async_trait::async_trait;
use std::collections::HashSet;
use tracing::debug;

use super::{opportunity_key, take_unused, GenerationContext, RouteStrategy};
use crate::types::{GenerationMode, Route};

pub const MAX_FRACTAL_LEVEL: u32 = 3;

/// Initial-leg candidates explored per cycle.
const INITIAL_CANDIDATES: usize = 3;

pub struct Fractal;

/// Per-leg borrow amount at level `d` given the previous level's pooled
/// profit.
pub fn level_amount(base: f64, level: u32, pooled_profit: f64) -> f64 {
    let width = 2f64.powi(level as i32);
    (base + pooled_profit) / width
}

#[async_trait]
impl RouteStrategy for Fractal {
    fn mode(&self) -> GenerationMode {
        GenerationMode::Fractal
    }

    async fn generate(&self, ctx: &GenerationContext<'_>) -> Vec<Route> {
        let asset = ctx.base_asset();
        let base = ctx.base_amount();
        let initials = ctx.opportunities(base, asset, INITIAL_CANDIDATES).await;

        let mut routes = Vec::with_capacity(initials.len());
        for initial in &initials {
            let mut b = ctx.builder(self.mode());
            let mut used = HashSet::from([opportunity_key(initial)]);
            if !b.try_push(ctx.score(initial, None).await) {
                continue;
            }
            let mut pooled = initial.profit;

            'levels: for level in 1..=MAX_FRACTAL_LEVEL {
                let width = 1usize << level;
                let amount = level_amount(base, level, pooled);
                let opps = ctx.opportunities(amount, asset, width * 2).await;

                let mut level_profit = 0.0;
                let mut added = 0;
                for _ in 0..width {
                    let Some(opp) = take_unused(&opps, &mut used) else {
                        break;
                    };
                    let profit = opp.profit;
                    if !b.try_push(ctx.score(&opp, None).await) {
                        break 'levels;
                    }
                    level_profit += profit;
                    added += 1;
                }

                if added == 0 {
                    debug!(level, amount = format!("{amount:.2}"), "Fractal level found nothing");
                    break;
                }
                pooled = level_profit;
            }

            routes.extend(b.build());
        }
        routes
    }
}
