//! Swap pricing for the supported pool models.
//!
//! Constant product pools are priced directly. Concentrated liquidity pools
//! go through a [`ClPricer`], so the tick walk can be swapped out without
//! touching the router.

use liquidator_chain::LiquidityDepth;
use std::fmt::Debug;

/// Output of a constant product swap before fees.
///
/// `Δy = Δx / (x + Δx) * y`, with `x` the reserve of the token sold and `y`
/// the reserve of the token bought.
pub fn xyk_output(reserve_in: f64, reserve_out: f64, amount_in: f64) -> f64 {
    amount_in / (reserve_in + amount_in) * reserve_out
}

/// Input required to receive `amount_out` from a constant product pool, before fees.
///
/// `Δx = Δy / (y - Δy) * x`. Infinite or negative once `Δy >= y`.
pub fn xyk_required_input(reserve_in: f64, reserve_out: f64, amount_out: f64) -> f64 {
    amount_out / (reserve_out - amount_out) * reserve_in
}

/// Price impact of selling `amount_in` into a constant product pool, in basis points.
pub fn calculate_slippage_bp(reserve_in: f64, reserve_out: f64, amount_in: f64) -> f64 {
    if reserve_in <= 0.0 || reserve_out <= 0.0 || amount_in <= 0.0 {
        return 0.0;
    }
    let spot_price = reserve_out / reserve_in;
    let execution_price = xyk_output(reserve_in, reserve_out, amount_in) / amount_in;
    (spot_price - execution_price) / spot_price * 10_000.0
}

/// Result of a concentrated liquidity quote.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClQuote {
    Amount(f64),
    /// Liquidity is exhausted in the swap direction.
    NoMoreTicks,
}

/// Inputs to a concentrated liquidity quote.
#[derive(Debug, Clone, Copy)]
pub struct ClSwap<'a> {
    /// Denom of the known side: token in for `out_given_in`, token out for `in_given_out`.
    pub denom: &'a str,
    pub amount: f64,
    pub token0: &'a str,
    pub liquidity: f64,
    /// Initialized ticks in the direction selected by the router.
    pub ticks: &'a [LiquidityDepth],
    pub current_sqrt_price: f64,
    pub swap_fee: f64,
}

/// Concentrated liquidity pricing function.
pub trait ClPricer: Send + Sync + Debug {
    fn out_given_in(&self, swap: &ClSwap<'_>) -> ClQuote;

    fn in_given_out(&self, swap: &ClSwap<'_>) -> ClQuote;
}

/// Prices against the liquidity of the current tick range only.
///
/// Good enough for sizing liquidations, which are small relative to the
/// pools they route through. A direction with no initialized ticks is
/// treated as exhausted.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentTickPricer;

impl ClPricer for CurrentTickPricer {
    fn out_given_in(&self, swap: &ClSwap<'_>) -> ClQuote {
        if swap.ticks.is_empty() || swap.liquidity <= 0.0 || swap.current_sqrt_price <= 0.0 {
            return ClQuote::NoMoreTicks;
        }
        let l = swap.liquidity;
        let sqrt_p = swap.current_sqrt_price;
        let amount_in = swap.amount * (1.0 - swap.swap_fee);

        let out = if swap.denom == swap.token0 {
            // token0 in, price moves down
            let next = l * sqrt_p / (l + amount_in * sqrt_p);
            l * (sqrt_p - next)
        } else {
            let next = sqrt_p + amount_in / l;
            l * (1.0 / sqrt_p - 1.0 / next)
        };
        ClQuote::Amount(out.max(0.0))
    }

    fn in_given_out(&self, swap: &ClSwap<'_>) -> ClQuote {
        if swap.ticks.is_empty() || swap.liquidity <= 0.0 || swap.current_sqrt_price <= 0.0 {
            return ClQuote::NoMoreTicks;
        }
        let l = swap.liquidity;
        let sqrt_p = swap.current_sqrt_price;
        let amount_out = swap.amount;

        let amount_in = if swap.denom == swap.token0 {
            // token0 out, token1 in, price moves up
            let denominator = l - amount_out * sqrt_p;
            if denominator <= 0.0 {
                return ClQuote::NoMoreTicks;
            }
            let next = l * sqrt_p / denominator;
            l * (next - sqrt_p)
        } else {
            let next = sqrt_p - amount_out / l;
            if next <= 0.0 {
                return ClQuote::NoMoreTicks;
            }
            l * (1.0 / next - 1.0 / sqrt_p)
        };
        ClQuote::Amount(amount_in / (1.0 - swap.swap_fee))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick() -> Vec<LiquidityDepth> {
        vec![LiquidityDepth {
            tick_index: 0,
            liquidity_net: 1.0,
        }]
    }

    #[test]
    fn test_xyk_output() {
        assert!((xyk_output(100.0, 100.0, 10.0) - 9.090909090909).abs() < 1e-9);
        assert_eq!(xyk_output(100.0, 100.0, 0.0), 0.0);
    }

    #[test]
    fn test_xyk_required_input_inverts_output() {
        let out = xyk_output(1_000.0, 4_000.0, 50.0);
        let back = xyk_required_input(1_000.0, 4_000.0, out);
        assert!((back - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_slippage_grows_with_size() {
        let small = calculate_slippage_bp(1_000_000.0, 1_000_000.0, 1_000.0);
        let large = calculate_slippage_bp(1_000_000.0, 1_000_000.0, 100_000.0);
        assert!(small > 0.0 && small < 10.0 + 1e-9);
        assert!(large > small);
        assert_eq!(calculate_slippage_bp(0.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_current_tick_round_trip() {
        let ticks = tick();
        let swap = ClSwap {
            denom: "a",
            amount: 1_000.0,
            token0: "a",
            liquidity: 1_000_000.0,
            ticks: &ticks,
            current_sqrt_price: 1.0,
            swap_fee: 0.0,
        };
        let ClQuote::Amount(out) = CurrentTickPricer.out_given_in(&swap) else {
            panic!("expected an amount");
        };
        assert!(out > 0.0 && out < 1_000.0);

        // token1 out, token0 in
        let back = CurrentTickPricer.in_given_out(&ClSwap {
            denom: "b",
            amount: out,
            ..swap
        });
        match back {
            ClQuote::Amount(input) => assert!((input - 1_000.0).abs() < 1e-6),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_current_tick_exhausted() {
        let swap = ClSwap {
            denom: "a",
            amount: 10.0,
            token0: "a",
            liquidity: 100.0,
            ticks: &[],
            current_sqrt_price: 1.0,
            swap_fee: 0.0,
        };
        assert_eq!(CurrentTickPricer.out_given_in(&swap), ClQuote::NoMoreTicks);

        let ticks = tick();
        let too_much = ClSwap {
            denom: "a",
            amount: 1_000.0,
            ticks: &ticks,
            ..swap
        };
        assert_eq!(CurrentTickPricer.in_given_out(&too_much), ClQuote::NoMoreTicks);
    }
}
