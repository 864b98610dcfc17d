//! Red bank market helpers.

use liquidator_chain::{Market, Route};
use tracing::debug;

use crate::error::{LiquidatorError, LiquidatorResult};
use crate::router::AmmRouter;

/// Scaled amounts are stored with this factor on chain.
const SCALING_FACTOR: f64 = 1e6;

/// Share of a market's liquidity we are willing to borrow.
pub(crate) const LIQUIDITY_BUFFER: f64 = 0.99;

/// A market with its currently borrowable liquidity.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketInfo {
    pub market: Market,
    pub available_liquidity: f64,
}

impl MarketInfo {
    pub fn denom(&self) -> &str {
        &self.market.denom
    }
}

/// Deposits minus borrows, both descaled by their index.
pub fn available_liquidity(market: &Market) -> f64 {
    let deposits = market.collateral_total_scaled * market.liquidity_index / SCALING_FACTOR;
    let borrows = market.debt_total_scaled * market.borrow_index / SCALING_FACTOR;
    deposits - borrows
}

impl From<Market> for MarketInfo {
    fn from(market: Market) -> Self {
        let available_liquidity = available_liquidity(&market);
        Self {
            market,
            available_liquidity,
        }
    }
}

/// How to source a debt asset by borrowing another one and swapping.
#[derive(Debug, Clone)]
pub struct BorrowPlan {
    pub denom: String,
    /// Amount to borrow, kept under the market's liquidity.
    pub amount: f64,
    pub route: Route,
}

struct Candidate<'a> {
    market: &'a MarketInfo,
    route: Route,
    input: f64,
}

impl Candidate<'_> {
    fn sufficient(&self) -> bool {
        self.input < self.market.available_liquidity * LIQUIDITY_BUFFER
    }

    fn coverage(&self) -> f64 {
        self.market.available_liquidity / self.input
    }
}

/// Pick the market to borrow from so that swapping the borrowed asset yields
/// `debt_amount` of `debt_denom`.
///
/// Markets with enough liquidity win over ones without; among those with
/// enough, the cheapest swap wins. If none has enough, the one covering the
/// largest share of the swap input is used and the borrow is capped.
pub fn find_borrow_market(
    markets: &[MarketInfo],
    debt_denom: &str,
    debt_amount: f64,
    router: &AmmRouter,
) -> LiquidatorResult<BorrowPlan> {
    let mut best: Option<Candidate<'_>> = None;

    for market in markets.iter().filter(|m| m.denom() != debt_denom) {
        let Ok((route, input)) = router.best_route_given_output(market.denom(), debt_denom, debt_amount) else {
            continue;
        };
        let candidate = Candidate { market, route, input };

        let better = match &best {
            None => true,
            Some(current) => match (candidate.sufficient(), current.sufficient()) {
                (true, false) => true,
                (false, true) => false,
                (true, true) => candidate.input < current.input,
                (false, false) => candidate.coverage() > current.coverage(),
            },
        };
        if better {
            best = Some(candidate);
        }
    }

    let best = best.ok_or(LiquidatorError::NoValidMarket)?;
    let amount = if best.input > best.market.available_liquidity {
        best.market.available_liquidity * LIQUIDITY_BUFFER
    } else {
        best.input
    };

    debug!(
        market = best.market.denom(),
        debt_denom,
        input = best.input,
        amount,
        "Selected borrow market"
    );
    Ok(BorrowPlan {
        denom: best.market.denom().to_string(),
        amount,
        route: best.route,
    })
}
