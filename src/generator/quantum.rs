//! Quantum (probabilistic) mode.
//!
//! Builds a pool of the best opportunities across every start asset, then
//! runs independent weighted random walks over it. At each step the next
//! leg is drawn among pool entries starting at the current asset, with
//! weight `profit_pct × confidence`; the walk then moves to the drawn
//! leg's first intermediate asset.

use async_trait::async_trait;
use futures::future::join_all;
use rand::distributions::{Distribution, WeightedIndex};
use tracing::debug;

use super::{GenerationContext, RouteStrategy, ScoredLeg};
use crate::types::{GenerationMode, Opportunity, Route};

pub const POOL_SIZE: usize = 20;
pub const WALKS: usize = 5;

pub struct Quantum;

pub fn draw_weight(leg: &ScoredLeg) -> f64 {
    (leg.leg.profit_pct * leg.leg.confidence).max(f64::EPSILON)
}

impl Quantum {
    /// Best `POOL_SIZE` opportunities over all start assets, each asset
    /// borrowing the USD equivalent of the base amount.
    async fn pool(&self, ctx: &GenerationContext<'_>) -> Vec<Opportunity> {
        let base_usd = ctx.base_amount() * ctx.oracle.price(ctx.base_asset()).await;

        let searches = ctx.config.assets.iter().map(|asset| async move {
            let price = ctx.oracle.price(asset).await;
            if price <= 0.0 {
                return Vec::new();
            }
            ctx.opportunities(base_usd / price, asset, POOL_SIZE).await
        });

        let mut pool: Vec<Opportunity> = join_all(searches).await.into_iter().flatten().collect();
        pool.sort_by(|a, b| b.profit_pct.total_cmp(&a.profit_pct));
        pool.truncate(POOL_SIZE);
        pool
    }

    async fn walk(&self, ctx: &GenerationContext<'_>, mut remaining: Vec<ScoredLeg>) -> Option<Route> {
        let mut b = ctx.builder(self.mode());
        let mut current = ctx.base_asset().to_string();

        while !b.is_full() {
            let candidates: Vec<usize> = remaining
                .iter()
                .enumerate()
                .filter(|(_, l)| l.leg.path.first() == Some(&current))
                .map(|(i, _)| i)
                .collect();
            if candidates.is_empty() {
                break;
            }

            let Ok(dist) = WeightedIndex::new(candidates.iter().map(|&i| draw_weight(&remaining[i]))) else {
                break;
            };
            let pick = {
                let mut rng = ctx.rng.lock().await;
                candidates[dist.sample(&mut *rng)]
            };

            let drawn = remaining.swap_remove(pick);
            let next = drawn.leg.path.get(1).cloned();
            if !b.try_push(drawn) {
                break;
            }
            match next {
                Some(asset) => current = asset,
                None => break,
            }
        }

        b.build()
    }
}

#[async_trait]
impl RouteStrategy for Quantum {
    fn mode(&self) -> GenerationMode {
        GenerationMode::Quantum
    }

    async fn generate(&self, ctx: &GenerationContext<'_>) -> Vec<Route> {
        let pool = self.pool(ctx).await;
        let mut scored = Vec::with_capacity(pool.len());
        for opp in &pool {
            scored.push(ctx.score(opp, None).await);
        }

        let mut routes = Vec::with_capacity(WALKS);
        for walk in 0..WALKS {
            match self.walk(ctx, scored.clone()).await {
                Some(route) => routes.push(route),
                None => debug!(walk, "Walk found no starting leg"),
            }
        }
        routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::testing::*;

    #[tokio::test]
    async fn test_walks_follow_asset_chain() {
        let h = Harness::new();
        let mut cfg = config(GenerationMode::Quantum);
        cfg.max_depth = 4;
        let mut source = FixedSource::new(0.5);
        source.per_call = 3;

        let routes = Quantum.generate(&h.ctx(&cfg, &source)).await;
        assert!(!routes.is_empty() && routes.len() <= WALKS);
        for r in &routes {
            assert_eq!(r.legs[0].path[0], "USDC");
            for pair in r.legs.windows(2) {
                assert_eq!(pair[1].path[0], pair[0].path[1]);
            }
        }
    }

    #[tokio::test]
    async fn test_pool_spans_start_assets_at_equal_usd() {
        let h = Harness::new();
        let cfg = config(GenerationMode::Quantum);
        let source = FixedSource::new(0.5);

        let pool = Quantum.pool(&h.ctx(&cfg, &source)).await;
        assert!(pool.len() <= POOL_SIZE);
        let sol_price = h.oracle.price("SOL").await;
        let sol = pool.iter().find(|o| o.start_asset() == "SOL").unwrap();
        assert!((sol.amount * sol_price - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_draw_weight_never_zero() {
        let leg = ScoredLeg {
            leg: crate::types::Leg {
                path: vec!["A".into(), "B".into(), "A".into()],
                venues: ("x".into(), "y".into()),
                estimated_profit: 0.0,
                profit_pct: 0.0,
                confidence: 80.0,
                risk_score: 40.0,
                borrow_amount: 1.0,
                borrow_asset: "A".into(),
                estimated_fee_usd: 0.0,
                estimated_duration_ms: 0,
                cross_venue: false,
                target_domain: None,
                chain: None,
            },
            borrow_usd: 1.0,
            profit_usd: 0.0,
        };
        assert!(draw_weight(&leg) > 0.0);
    }
}
