//! AMM router: route discovery and pricing over a pool snapshot.
//!
//! The router holds the current pool set as an immutable [`Snapshot`]. A
//! refresh builds a new set and swaps it in; a route search or pricing call
//! in flight keeps using the set it started with.

use anyhow::Result;
use async_trait::async_trait;
use liquidator_api::{RouteQuote, RouteRequester};
use liquidator_chain::{Pool, PoolId, PoolKind, Route, RouteHop};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{LiquidatorError, LiquidatorResult};
use crate::pricing::{xyk_output, xyk_required_input, ClPricer, ClQuote, ClSwap, CurrentTickPricer};
use crate::snapshot::Snapshot;

/// Default maximum number of hops in a route.
pub const DEFAULT_MAX_HOPS: usize = 2;

type PoolSet = Vec<Arc<Pool>>;

/// Finds and prices swap routes across XYK and concentrated liquidity pools.
#[derive(Debug)]
pub struct AmmRouter {
    pools: Snapshot<PoolSet>,
    pricer: Arc<dyn ClPricer>,
    max_hops: usize,
}

impl Default for AmmRouter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HOPS)
    }
}

impl AmmRouter {
    pub fn new(max_hops: usize) -> Self {
        Self {
            pools: Snapshot::default(),
            pricer: Arc::new(CurrentTickPricer),
            max_hops: max_hops.max(1),
        }
    }

    /// Use a different concentrated liquidity pricing function.
    pub fn with_pricer(mut self, pricer: Arc<dyn ClPricer>) -> Self {
        self.pricer = pricer;
        self
    }

    pub fn max_hops(&self) -> usize {
        self.max_hops
    }

    /// Replace the whole pool set.
    pub fn set_pools(&self, pools: Vec<Pool>) {
        let count = pools.len();
        self.pools.store(pools.into_iter().map(Arc::new).collect());
        debug!(pools = count, "Router pool snapshot replaced");
    }

    /// Current pool set.
    pub fn pools(&self) -> Arc<PoolSet> {
        self.pools.load()
    }

    pub fn pool(&self, id: PoolId) -> LiquidatorResult<Arc<Pool>> {
        self.pools
            .load()
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or(LiquidatorError::PoolNotFound(id))
    }

    /// Expected output of swapping `amount_in` along `route`.
    ///
    /// Exhausted concentrated liquidity zeroes the running amount; later hops
    /// then price a zero input.
    pub fn get_output(&self, amount_in: f64, route: &[RouteHop]) -> LiquidatorResult<f64> {
        if amount_in == 0.0 {
            warn!("Cannot price a token in amount of 0");
            return Ok(0.0);
        }

        let mut amount = amount_in;
        for hop in route {
            let pool = &hop.pool;
            amount = match &pool.kind {
                PoolKind::Xyk { .. } => {
                    let (reserve_in, reserve_out) = xyk_reserves(hop)?;
                    let before_fees = xyk_output(reserve_in, reserve_out, amount);
                    // Fee is taken from the output
                    before_fees - before_fees * pool.swap_fee
                }
                PoolKind::ConcentratedLiquidity(state) => {
                    let zero_to_one = hop.token_in_denom == pool.token0;
                    let swap = ClSwap {
                        denom: &hop.token_in_denom,
                        amount,
                        token0: &pool.token0,
                        liquidity: state.current_tick_liquidity,
                        ticks: if zero_to_one {
                            &state.liquidity_depths.zero_to_one
                        } else {
                            &state.liquidity_depths.one_to_zero
                        },
                        current_sqrt_price: state.current_sqrt_price,
                        swap_fee: pool.swap_fee,
                    };
                    match self.pricer.out_given_in(&swap) {
                        ClQuote::Amount(out) => out,
                        ClQuote::NoMoreTicks => 0.0,
                    }
                }
                PoolKind::Stableswap { .. } => return Err(LiquidatorError::UnsupportedPool(pool.id)),
            };
        }
        Ok(amount)
    }

    /// Input needed to receive `amount_out` at the end of `route`.
    ///
    /// Hops are walked from the last to the first. XYK fees are added as
    /// `amount_out × fee` of each hop rather than inverted exactly.
    pub fn get_required_input(&self, amount_out: f64, route: &[RouteHop]) -> LiquidatorResult<f64> {
        if amount_out == 0.0 {
            warn!("Cannot price a token out amount of 0");
            return Ok(0.0);
        }

        let mut amount = amount_out;
        for hop in route.iter().rev() {
            let pool = &hop.pool;
            amount = match &pool.kind {
                PoolKind::Xyk { .. } => {
                    let (reserve_in, reserve_out) = xyk_reserves(hop)?;
                    xyk_required_input(reserve_in, reserve_out, amount) + amount * pool.swap_fee
                }
                PoolKind::ConcentratedLiquidity(state) => {
                    let zero_to_one = hop.token_in_denom == pool.token0;
                    let swap = ClSwap {
                        denom: &hop.token_out_denom,
                        amount,
                        token0: &pool.token0,
                        liquidity: state.current_tick_liquidity,
                        ticks: if zero_to_one {
                            &state.liquidity_depths.zero_to_one
                        } else {
                            &state.liquidity_depths.one_to_zero
                        },
                        current_sqrt_price: state.current_sqrt_price,
                        swap_fee: pool.swap_fee,
                    };
                    match self.pricer.in_given_out(&swap) {
                        ClQuote::Amount(input) => input,
                        ClQuote::NoMoreTicks => 0.0,
                    }
                }
                PoolKind::Stableswap { .. } => return Err(LiquidatorError::UnsupportedPool(pool.id)),
            };
        }
        Ok(amount)
    }

    /// Every simple route from `denom_in` to `denom_out` within the hop bound.
    ///
    /// A pool is never used twice in a route, and a pool whose other side was
    /// already sold earlier in the route is skipped.
    pub fn get_routes(&self, denom_in: &str, denom_out: &str) -> Vec<Route> {
        let pools = self.pools.load();
        let mut routes = Vec::new();

        let mut frontier: VecDeque<Route> = pools
            .iter()
            .filter_map(|pool| RouteHop::through(pool, denom_in))
            .map(|hop| vec![hop])
            .collect();

        while let Some(route) = frontier.pop_front() {
            let Some(tip) = route.last() else { continue };

            if tip.token_out_denom == denom_out {
                routes.push(route);
                continue;
            }
            if route.len() >= self.max_hops {
                continue;
            }

            for pool in pools.iter() {
                let Some(next) = RouteHop::through(pool, &tip.token_out_denom) else {
                    continue;
                };
                let reused = route.iter().any(|hop| hop.pool_id == pool.id);
                let cycles = route.iter().any(|hop| hop.token_in_denom == next.token_out_denom);
                if reused || cycles {
                    continue;
                }

                let mut extended = route.clone();
                extended.push(next);
                frontier.push_back(extended);
            }
        }

        routes
    }

    /// Route yielding the most output for `amount_in`. Ties keep the first route found.
    pub fn route_with_highest_output(&self, amount_in: f64, routes: Vec<Route>) -> Option<(Route, f64)> {
        let mut best: Option<(Route, f64)> = None;
        for route in routes {
            let output = match self.get_output(amount_in, &route) {
                Ok(output) => output,
                Err(e) => {
                    debug!(error = %e, "Skipping unpriceable route");
                    continue;
                }
            };
            if best.as_ref().map_or(true, |(_, top)| output > *top) {
                best = Some((route, output));
            }
        }
        best
    }

    /// Route needing the least positive input for `amount_out`. Ties keep the first route found.
    pub fn route_with_lowest_input(&self, amount_out: f64, routes: Vec<Route>) -> Option<(Route, f64)> {
        let mut best: Option<(Route, f64)> = None;
        for route in routes {
            let input = match self.get_required_input(amount_out, &route) {
                Ok(input) => input,
                Err(e) => {
                    debug!(error = %e, "Skipping unpriceable route");
                    continue;
                }
            };
            if input.is_nan() || input <= 0.0 {
                continue;
            }
            if best.as_ref().map_or(true, |(_, low)| input < *low) {
                best = Some((route, input));
            }
        }
        best
    }

    /// Best route selling `amount_in` of `denom_in`, with its expected output.
    pub fn best_route_given_input(
        &self,
        denom_in: &str,
        denom_out: &str,
        amount_in: f64,
    ) -> LiquidatorResult<(Route, f64)> {
        let routes = self.get_routes(denom_in, denom_out);
        self.route_with_highest_output(amount_in, routes)
            .ok_or(LiquidatorError::NoRouteForSwap)
    }

    /// Best route buying `amount_out` of `denom_out`, with its required input.
    pub fn best_route_given_output(
        &self,
        denom_in: &str,
        denom_out: &str,
        amount_out: f64,
    ) -> LiquidatorResult<(Route, f64)> {
        let routes = self.get_routes(denom_in, denom_out);
        self.route_with_lowest_input(amount_out, routes)
            .ok_or(LiquidatorError::NoRouteForSwap)
    }
}

fn xyk_reserves(hop: &RouteHop) -> LiquidatorResult<(f64, f64)> {
    match (
        hop.pool.reserve(&hop.token_in_denom),
        hop.pool.reserve(&hop.token_out_denom),
    ) {
        (Some(reserve_in), Some(reserve_out)) => Ok((reserve_in, reserve_out)),
        _ => Err(LiquidatorError::UnsupportedPool(hop.pool_id)),
    }
}

#[async_trait]
impl RouteRequester for AmmRouter {
    fn requester_id(&self) -> &str {
        "amm"
    }

    async fn request_route(&self, denom_in: &str, denom_out: &str, amount: f64) -> Result<RouteQuote> {
        let (route, expected_output) = self.best_route_given_input(denom_in, denom_out, amount)?;
        Ok(RouteQuote {
            route,
            expected_output,
        })
    }
}

/// Drops pools that cannot be priced reliably.
///
/// Concentrated pools need initialized ticks in both directions. XYK pools
/// need one side that has a market and a price, holding more than
/// `min_xyk_liquidity` worth of reserves.
pub fn retain_routable(
    pools: Vec<Pool>,
    prices: &HashMap<String, f64>,
    markets: &HashSet<String>,
    min_xyk_liquidity: f64,
) -> Vec<Pool> {
    let before = pools.len();
    let kept: Vec<Pool> = pools
        .into_iter()
        .filter(|pool| match &pool.kind {
            PoolKind::ConcentratedLiquidity(state) => state.liquidity_depths.is_complete(),
            PoolKind::Xyk { assets } => assets.iter().any(|asset| {
                markets.contains(&asset.denom)
                    && prices
                        .get(&asset.denom)
                        .is_some_and(|price| asset.amount * price > min_xyk_liquidity)
            }),
            PoolKind::Stableswap { .. } => true,
        })
        .collect();
    debug!(before, after = kept.len(), "Filtered routable pools");
    kept
}
