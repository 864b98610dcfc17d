//! Position evaluation and liquidation sizing.
//!
//! Values are `amount × price`; a denom without a price is worth zero.
//! Disabled collaterals never count towards collateral value.

use liquidator_chain::types::format_amount;
use liquidator_chain::{
    Asset, AssetParams, Collateral, Debt, LiquidationBonusCurve, LiquidationTx, UserPosition, Valued,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::LiquidationConfig;
use crate::error::{LiquidatorError, LiquidatorResult};

pub type PriceMap = HashMap<String, f64>;
pub type AssetParamsMap = HashMap<String, AssetParams>;

/// Claimable collateral worth less than this is not worth liquidating.
const MIN_CLAIMABLE_VALUE: f64 = 10_000.0;

fn price_of(prices: &PriceMap, denom: &str) -> f64 {
    prices.get(denom).copied().unwrap_or(0.0)
}

/// Sum of `amount × price` over `assets`.
pub fn total_value<T: Valued>(assets: &[T], prices: &PriceMap) -> f64 {
    assets
        .iter()
        .map(|a| a.amount() * price_of(prices, a.denom()))
        .sum()
}

/// Enabled collateral value weighted by each denom's liquidation threshold.
pub fn liquidation_threshold_value(
    collaterals: &[Collateral],
    prices: &PriceMap,
    params: &AssetParamsMap,
) -> f64 {
    collaterals
        .iter()
        .filter(|c| c.enabled)
        .map(|c| {
            let threshold = params.get(&c.denom).map_or(0.0, |p| p.liquidation_threshold);
            c.amount * price_of(prices, &c.denom) * threshold
        })
        .sum()
}

/// Threshold-weighted collateral value over debt value. Below 1 is liquidatable.
pub fn liquidation_threshold_health_factor(
    collaterals: &[Collateral],
    debts: &[Debt],
    prices: &PriceMap,
    params: &AssetParamsMap,
) -> f64 {
    liquidation_threshold_value(collaterals, prices, params) / total_value(debts, prices)
}

/// Total collateral value over total debt value.
pub fn collateral_ratio(debts: &[Debt], collaterals: &[Collateral], prices: &PriceMap) -> f64 {
    total_value(collaterals, prices) / total_value(debts, prices)
}

/// Liquidation bonus for a position.
///
/// `min(start + slope × (1 − hf), max(min(cr − 1, max_lb), min_lb))`
pub fn calculate_liquidation_bonus(
    curve: &LiquidationBonusCurve,
    health_factor: f64,
    collateral_ratio: f64,
) -> f64 {
    let ceiling = (collateral_ratio - 1.0).min(curve.max_lb).max(curve.min_lb);
    (curve.starting_lb + curve.slope * (1.0 - health_factor)).min(ceiling)
}

/// Maximum debt value the protocol lets a liquidator repay.
///
/// `(thf × debt − ltCollateral) / (thf − lt(claimed) × (1 + bonus))`. The
/// denominator is not guarded: NaN and infinities flow through to the caller.
pub fn calculate_max_debt_repayable(
    target_health_factor: f64,
    debts: &[Debt],
    collaterals: &[Collateral],
    params: &AssetParamsMap,
    liquidation_bonus: f64,
    prices: &PriceMap,
    claimed_collateral_denom: &str,
) -> f64 {
    let debt_value = total_value(debts, prices);
    let lt_collateral_value = liquidation_threshold_value(collaterals, prices, params);
    let claimed_threshold = params
        .get(claimed_collateral_denom)
        .map_or(0.0, |p| p.liquidation_threshold);

    let numerator = target_health_factor * debt_value - lt_collateral_value;
    let denominator = target_health_factor - claimed_threshold * (1.0 + liquidation_bonus);
    numerator / denominator
}

/// Highest valued asset. Ties keep the first.
pub fn largest<'a, T: Valued>(assets: impl IntoIterator<Item = &'a T>, prices: &PriceMap) -> Option<&'a T>
where
    T: 'a,
{
    let mut best: Option<(&T, f64)> = None;
    for asset in assets {
        let value = asset.amount() * price_of(prices, asset.denom());
        if best.map_or(true, |(_, top)| value > top) {
            best = Some((asset, value));
        }
    }
    best.map(|(asset, _)| asset)
}

pub fn largest_collateral<'a>(collaterals: &'a [Collateral], prices: &PriceMap) -> Option<&'a Collateral> {
    largest(collaterals.iter().filter(|c| c.enabled), prices)
}

pub fn largest_debt<'a>(debts: &'a [Debt], prices: &PriceMap) -> Option<&'a Debt> {
    largest(debts, prices)
}

/// Liquidations chosen for one pass, and what they need repaid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiquidationPlan {
    pub txs: Vec<LiquidationTx>,
    /// Debt amounts per denom, in first-seen order.
    pub debts_to_repay: Vec<Asset>,
}

impl LiquidationPlan {
    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    fn add_debt(&mut self, denom: &str, amount: f64) {
        match self.debts_to_repay.iter_mut().find(|d| d.denom == denom) {
            Some(existing) => existing.amount += amount,
            None => self.debts_to_repay.push(Asset::new(denom, amount)),
        }
    }
}

/// One sized liquidation before it is turned into a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct SizedLiquidation {
    pub collateral_denom: String,
    pub debt_denom: String,
    pub liquidation_bonus: f64,
    pub max_debt_repayable_value: f64,
    pub amount_to_repay: f64,
    pub debt_price: f64,
}

/// Market data the evaluator reads.
#[derive(Debug, Clone, Copy)]
pub struct MarketView<'a> {
    pub prices: &'a PriceMap,
    pub params: &'a AssetParamsMap,
    pub target_health_factor: f64,
}

/// Picks liquidation targets and sizes them against the neutral balance.
#[derive(Debug, Clone)]
pub struct PositionEvaluator {
    neutral_denom: String,
    config: LiquidationConfig,
}

impl PositionEvaluator {
    pub fn new(neutral_denom: impl Into<String>, config: LiquidationConfig) -> Self {
        Self {
            neutral_denom: neutral_denom.into(),
            config,
        }
    }

    pub fn neutral_denom(&self) -> &str {
        &self.neutral_denom
    }

    /// Size one position given the neutral value still unallocated.
    pub fn size_position(
        &self,
        position: &UserPosition,
        market: MarketView<'_>,
        available_value: f64,
        remaining_value: f64,
    ) -> LiquidatorResult<Option<SizedLiquidation>> {
        let MarketView {
            prices,
            params,
            target_health_factor,
        } = market;

        let (Some(collateral), Some(debt)) = (
            largest_collateral(&position.collaterals, prices),
            largest_debt(&position.debts, prices),
        ) else {
            return Err(LiquidatorError::MissingPositionData(position.address.clone()));
        };

        let collateral_params = params
            .get(&collateral.denom)
            .ok_or_else(|| LiquidatorError::UnsupportedAsset(collateral.denom.clone()))?;
        let collateral_price = prices
            .get(&collateral.denom)
            .copied()
            .ok_or_else(|| LiquidatorError::UnsupportedAsset(collateral.denom.clone()))?;
        let debt_price = prices
            .get(&debt.denom)
            .copied()
            .filter(|p| *p > 0.0)
            .ok_or_else(|| LiquidatorError::UnsupportedAsset(debt.denom.clone()))?;

        let health_factor =
            liquidation_threshold_health_factor(&position.collaterals, &position.debts, prices, params);
        let bonus = calculate_liquidation_bonus(
            &collateral_params.liquidation_bonus,
            health_factor,
            collateral_ratio(&position.debts, &position.collaterals, prices),
        );

        let max_debt_value = calculate_max_debt_repayable(
            target_health_factor,
            &position.debts,
            &position.collaterals,
            params,
            bonus,
            prices,
            &collateral.denom,
        );

        // The bonus comes out of the collateral we claim
        let claimable_value = collateral.amount * (1.0 - bonus) * collateral_price;
        if claimable_value.is_nan() || claimable_value <= MIN_CLAIMABLE_VALUE {
            debug!(user = %position.address, claimable_value, "Claimable collateral too small");
            return Ok(None);
        }

        // f64::min ignores a NaN max debt
        let max_repayable_value = max_debt_value.min(claimable_value);
        let amount_to_repay = if remaining_value > max_repayable_value {
            max_repayable_value / debt_price
        } else {
            remaining_value * self.config.sizing_factor / debt_price
        };
        let cap = debt
            .amount
            .min(available_value / debt_price * self.config.sizing_factor);
        let amount_to_repay = amount_to_repay.min(cap);

        if amount_to_repay.is_nan() || amount_to_repay <= 0.0 {
            debug!(user = %position.address, amount_to_repay, "Nothing to repay");
            return Ok(None);
        }

        debug!(
            user = %position.address,
            collateral = %collateral.denom,
            debt = %debt.denom,
            health_factor,
            bonus,
            max_debt_value,
            max_repayable_value,
            remaining_value,
            amount_to_repay,
            "Sized liquidation"
        );

        Ok(Some(SizedLiquidation {
            collateral_denom: collateral.denom.clone(),
            debt_denom: debt.denom.clone(),
            liquidation_bonus: bonus,
            max_debt_repayable_value: max_debt_value,
            amount_to_repay,
            debt_price,
        }))
    }

    /// Build liquidation instructions for `positions`, sharing one neutral budget.
    ///
    /// Returns an empty plan when the neutral value is at or below the dust floor.
    pub fn produce_liquidation_txs(
        &self,
        positions: &[UserPosition],
        market: MarketView<'_>,
        neutral_balance: f64,
    ) -> LiquidatorResult<LiquidationPlan> {
        if neutral_balance <= 0.0 {
            return Err(LiquidatorError::NoNeutralAsset);
        }
        let available_value = neutral_balance * price_of(market.prices, &self.neutral_denom);
        let mut plan = LiquidationPlan::default();

        if available_value <= self.config.dust_floor {
            warn!(
                available_value,
                dust_floor = self.config.dust_floor,
                "Neutral balance too small to liquidate"
            );
            return Ok(plan);
        }

        let mut total_debt_value = 0.0;
        for position in positions {
            let remaining_value = available_value - total_debt_value;
            let sized = match self.size_position(position, market, available_value, remaining_value) {
                Ok(Some(sized)) => sized,
                Ok(None) => continue,
                Err(e) => {
                    warn!(user = %position.address, error = %e, "Skipping position");
                    continue;
                }
            };

            plan.txs.push(LiquidationTx {
                collateral_denom: sized.collateral_denom.clone(),
                debt_denom: sized.debt_denom.clone(),
                user_address: position.address.clone(),
                amount: format_amount(sized.amount_to_repay * self.config.repay_factor),
            });
            plan.add_debt(&sized.debt_denom, sized.amount_to_repay);
            total_debt_value += sized.amount_to_repay * sized.debt_price;
        }

        info!(
            liquidations = plan.txs.len(),
            total_debt_value,
            available_value,
            "Produced liquidation plan"
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURVE: LiquidationBonusCurve = LiquidationBonusCurve {
        starting_lb: 0.01,
        slope: 2.0,
        min_lb: 0.02,
        max_lb: 0.1,
    };

    fn params(denom: &str, threshold: f64) -> AssetParams {
        AssetParams {
            denom: denom.to_string(),
            max_loan_to_value: threshold - 0.02,
            liquidation_threshold: threshold,
            liquidation_bonus: CURVE,
            protocol_liquidation_fee: 0.0,
            credit_manager: Default::default(),
        }
    }

    fn fixture() -> (Vec<Collateral>, Vec<Debt>, PriceMap, AssetParamsMap) {
        let collaterals = vec![
            Collateral::new("uosmo", 10_000.0, true),
            Collateral::new("ujake", 2_000.0, true),
            Collateral::new("uatom", 900.0, true),
        ];
        let debts = vec![Debt::new("uusdc", 3_000.0), Debt::new("untrn", 1_200.0)];
        let prices: PriceMap = [
            ("uosmo", 3.0),
            ("ujake", 1.0),
            ("uatom", 8.2),
            ("uusdc", 8.5),
            ("untrn", 5.5),
        ]
        .into_iter()
        .map(|(d, p)| (d.to_string(), p))
        .collect();
        let params: AssetParamsMap = [("uosmo", 0.78), ("ujake", 0.55), ("uatom", 0.9)]
            .into_iter()
            .map(|(d, lt)| (d.to_string(), params(d, lt)))
            .collect();
        (collaterals, debts, prices, params)
    }

    fn fixture_bonus() -> f64 {
        let (collaterals, debts, prices, params) = fixture();
        let hf = liquidation_threshold_health_factor(&collaterals, &debts, &prices, &params);
        let cr = collateral_ratio(&debts, &collaterals, &prices);
        calculate_liquidation_bonus(&CURVE, hf, cr)
    }

    #[test]
    fn test_liquidation_bonus_fixture() {
        assert!((fixture_bonus() - 0.0696884735).abs() < 1e-10);
    }

    #[test]
    fn test_max_debt_repayable_fixture() {
        let (collaterals, debts, prices, params) = fixture();
        let max_debt = calculate_max_debt_repayable(
            1.2,
            &debts,
            &collaterals,
            &params,
            fixture_bonus(),
            &prices,
            "uosmo",
        );
        assert_eq!(max_debt.round(), 20178.0);
    }

    #[test]
    fn test_max_debt_denominator_is_unguarded() {
        let (collaterals, debts, prices, params) = fixture();
        // 0.78 × (1 + bonus) == thf
        let bonus = 1.2 / 0.78 - 1.0;
        let max_debt =
            calculate_max_debt_repayable(1.2, &debts, &collaterals, &params, bonus, &prices, "uosmo");
        assert!(!max_debt.is_finite() || max_debt.abs() > 1e12);
    }

    #[test]
    fn test_bonus_monotone_and_capped() {
        for cr_step in 0..=40 {
            let cr = 1.0 + cr_step as f64 * 0.1;
            let ceiling = (cr - 1.0).min(CURVE.max_lb).max(CURVE.min_lb);
            let mut previous = f64::NEG_INFINITY;
            // Health factor from 2 down to 0, so (1 - hf) increases
            for hf_step in (0..=200).rev() {
                let hf = hf_step as f64 * 0.01;
                let bonus = calculate_liquidation_bonus(&CURVE, hf, cr);
                assert!(bonus <= ceiling + 1e-12, "bonus {bonus} above {ceiling}");
                assert!(bonus >= previous - 1e-12, "bonus decreased at hf {hf}, cr {cr}");
                previous = bonus;
            }
        }
    }

    #[test]
    fn test_largest_selection() {
        let (collaterals, debts, prices, _) = fixture();
        assert_eq!(largest_collateral(&collaterals, &prices).unwrap().denom, "uosmo");
        assert_eq!(largest_debt(&debts, &prices).unwrap().denom, "uusdc");

        let mut disabled = collaterals.clone();
        disabled[0].enabled = false;
        assert_eq!(largest_collateral(&disabled, &prices).unwrap().denom, "uatom");

        // Missing price counts as zero
        let unpriced = vec![Debt::new("unknown", 1e12), Debt::new("untrn", 1.0)];
        assert_eq!(largest_debt(&unpriced, &prices).unwrap().denom, "untrn");

        let tied = vec![Debt::new("a", 1.0), Debt::new("b", 1.0)];
        let flat: PriceMap = [("a".to_string(), 1.0), ("b".to_string(), 1.0)].into_iter().collect();
        assert_eq!(largest_debt(&tied, &flat).unwrap().denom, "a");
    }

    #[test]
    fn test_disabled_collateral_excluded_from_threshold_value() {
        let (mut collaterals, _, prices, params) = fixture();
        let all = liquidation_threshold_value(&collaterals, &prices, &params);
        collaterals[2].enabled = false;
        let without_atom = liquidation_threshold_value(&collaterals, &prices, &params);
        assert!((all - without_atom - 900.0 * 8.2 * 0.9).abs() < 1e-9);
    }

    fn scaled_position() -> (UserPosition, PriceMap, AssetParamsMap) {
        let (collaterals, debts, mut prices, params) = fixture();
        let scale = |v: f64| v * 1_000.0;
        let position = UserPosition {
            address: "osmo1user".to_string(),
            collaterals: collaterals
                .into_iter()
                .map(|c| Collateral::new(c.denom, scale(c.amount), true))
                .collect(),
            debts: debts.into_iter().map(|d| Debt::new(d.denom, scale(d.amount))).collect(),
        };
        prices.insert("uneutral".to_string(), 1.0);
        (position, prices, params)
    }

    #[test]
    fn test_dust_neutral_balance_produces_nothing() {
        let (position, prices, params) = scaled_position();
        let evaluator = PositionEvaluator::new("uneutral", LiquidationConfig::default());
        let market = MarketView {
            prices: &prices,
            params: &params,
            target_health_factor: 1.2,
        };

        let plan = evaluator
            .produce_liquidation_txs(&[position.clone()], market, 1_000.0)
            .unwrap();
        assert!(plan.is_empty());

        assert_eq!(
            evaluator.produce_liquidation_txs(&[position], market, 0.0),
            Err(LiquidatorError::NoNeutralAsset)
        );
    }

    #[test]
    fn test_sizing_is_capped_by_neutral_budget() {
        let (position, prices, params) = scaled_position();
        let evaluator = PositionEvaluator::new("uneutral", LiquidationConfig::default());
        let market = MarketView {
            prices: &prices,
            params: &params,
            target_health_factor: 1.2,
        };

        // 100k of neutral value is far below the max repayable value
        let plan = evaluator
            .produce_liquidation_txs(&[position], market, 100_000.0)
            .unwrap();
        assert_eq!(plan.txs.len(), 1);
        let tx = &plan.txs[0];
        assert_eq!(tx.collateral_denom, "uosmo");
        assert_eq!(tx.debt_denom, "uusdc");

        let expected_repay = 100_000.0 * 0.95 / 8.5;
        assert!((plan.debts_to_repay[0].amount - expected_repay).abs() < 1e-6);
        assert_eq!(tx.amount, format_amount(expected_repay * 0.98));
    }

    #[test]
    fn test_sizing_uses_protocol_limit_when_budget_is_large() {
        let (position, prices, params) = scaled_position();
        let evaluator = PositionEvaluator::new("uneutral", LiquidationConfig::default());
        let market = MarketView {
            prices: &prices,
            params: &params,
            target_health_factor: 1.2,
        };

        let sized = evaluator
            .size_position(&position, market, 1e12, 1e12)
            .unwrap()
            .unwrap();
        // Protocol limit scales with the position: ~20178 × 1000 in value
        let expected = sized.max_debt_repayable_value / 8.5;
        assert!((sized.amount_to_repay - expected.min(3_000_000.0)).abs() < 1e-6);
    }

    #[test]
    fn test_debts_accumulate_per_denom() {
        let (position, prices, params) = scaled_position();
        let mut second = position.clone();
        second.address = "osmo1other".to_string();

        let evaluator = PositionEvaluator::new("uneutral", LiquidationConfig::default());
        let market = MarketView {
            prices: &prices,
            params: &params,
            target_health_factor: 1.2,
        };
        let plan = evaluator
            .produce_liquidation_txs(&[position, second], market, 1_000_000.0)
            .unwrap();

        assert_eq!(plan.txs.len(), 2);
        assert_eq!(plan.debts_to_repay.len(), 1);
        assert_eq!(plan.debts_to_repay[0].denom, "uusdc");
    }

    #[test]
    fn test_missing_data_is_an_error() {
        let (_, prices, params) = scaled_position();
        let evaluator = PositionEvaluator::new("uneutral", LiquidationConfig::default());
        let market = MarketView {
            prices: &prices,
            params: &params,
            target_health_factor: 1.2,
        };
        let empty = UserPosition {
            address: "osmo1empty".to_string(),
            ..Default::default()
        };
        assert_eq!(
            evaluator.size_position(&empty, market, 1e6, 1e6),
            Err(LiquidatorError::MissingPositionData("osmo1empty".to_string()))
        );
    }
}
