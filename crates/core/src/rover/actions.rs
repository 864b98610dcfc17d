//! Action list for one credit account liquidation.

use anyhow::Result;
use liquidator_api::RouteRequester;
use liquidator_chain::types::format_amount;
use liquidator_chain::{Action, ActionCoin, Coin, CreditPositions, PoolId, PoolKind, RouteHop, SwapperRoute};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::{best_collateral, best_debt, CollateralKind, RoverCollateral, RoverDebt, VaultMap};
use crate::config::RoverConfig;
use crate::error::{LiquidatorError, LiquidatorResult};
use crate::evaluator::PriceMap;
use crate::market::{find_borrow_market, MarketInfo, LIQUIDITY_BUFFER};
use crate::router::AmmRouter;

/// Debt market coverage below which another market is borrowed from.
const MIN_DEBT_COVERAGE: f64 = 0.5;

const LP_SHARE_PREFIX: &str = "gamm/pool/";

/// Winnings are only known once the liquidation has run.
const WINNINGS_MIN_RECEIVE: &str = "1";

/// Which swapper route format the credit manager expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapVenue {
    Osmosis,
    Astroport,
}

impl SwapVenue {
    pub fn route(self, hops: &[RouteHop]) -> SwapperRoute {
        match self {
            SwapVenue::Osmosis => SwapperRoute::osmo(hops),
            SwapVenue::Astroport => SwapperRoute::astro(hops),
        }
    }
}

/// Everything one liquidation is planned from.
#[derive(Debug, Clone, Copy)]
pub struct RoverInput<'a> {
    pub positions: &'a CreditPositions,
    pub prices: &'a PriceMap,
    pub markets: &'a [MarketInfo],
    /// Denoms the credit manager lets accounts borrow.
    pub whitelisted: &'a HashSet<String>,
    pub vaults: &'a VaultMap,
}

/// How the debt gets into the liquidator's credit account.
#[derive(Debug)]
struct BorrowLeg {
    actions: Vec<Action>,
    /// Denom borrowed and repaid at the end.
    denom: String,
    amount: f64,
    /// Debt repaid by the liquidate action.
    debt_amount: f64,
}

/// Turns a credit account position into an ordered action list.
pub struct ActionGenerator {
    requester: Arc<dyn RouteRequester>,
    router: Arc<AmmRouter>,
    venue: SwapVenue,
    neutral_denom: String,
    config: RoverConfig,
}

impl ActionGenerator {
    pub fn new(
        requester: Arc<dyn RouteRequester>,
        router: Arc<AmmRouter>,
        venue: SwapVenue,
        neutral_denom: impl Into<String>,
        config: RoverConfig,
    ) -> Self {
        Self {
            requester,
            router,
            venue,
            neutral_denom: neutral_denom.into(),
            config,
        }
    }

    pub fn neutral_denom(&self) -> &str {
        &self.neutral_denom
    }

    /// Borrow, liquidate, convert the collateral, repay, swap winnings to
    /// neutral and refund.
    #[instrument(skip(self, input), fields(account_id = %input.positions.account_id))]
    pub async fn generate(&self, input: RoverInput<'_>) -> Result<Vec<Action>> {
        let collateral = best_collateral(input.positions, input.prices, input.vaults)?;
        let debt = best_debt(input.positions, input.prices)?;
        let leg = self.borrow_actions(&debt, &collateral, input.markets, input.whitelisted)?;

        let mut actions = leg.actions.clone();
        actions.push(Action::Liquidate {
            debt_coin: Coin::new(debt.denom.clone(), leg.debt_amount),
            liquidatee_account_id: input.positions.account_id.clone(),
            request: collateral.request(),
        });
        actions.extend(self.collateral_to_borrowed(&collateral, &leg, input).await?);
        actions.push(Action::Repay {
            coin: ActionCoin::account_balance(&leg.denom),
        });
        if debt.value() > self.config.swap_winnings_floor && leg.denom != self.neutral_denom {
            actions.push(self.swap_winnings(&leg).await?);
        }
        actions.push(Action::RefundAllCoinBalances {});

        debug!(
            collateral = %collateral.denom,
            collateral_value = collateral.value,
            debt = %debt.denom,
            borrowed = %leg.denom,
            borrow_amount = leg.amount,
            actions = ?actions.iter().map(Action::name).collect::<Vec<_>>(),
            "Credit account liquidation planned"
        );
        Ok(actions)
    }

    /// Size the repayment and source it from the debt market, or from
    /// another whitelisted market when the debt market is too thin.
    fn borrow_actions(
        &self,
        debt: &RoverDebt,
        collateral: &RoverCollateral,
        markets: &[MarketInfo],
        whitelisted: &HashSet<String>,
    ) -> LiquidatorResult<BorrowLeg> {
        let max_repay_value = (collateral.value * self.config.close_factor).min(self.config.debt_ceiling);
        let debt_value = debt.value();
        let ratio = if debt_value <= max_repay_value {
            1.0
        } else {
            max_repay_value / debt_value
        };
        let debt_amount = (debt.amount * ratio).floor();

        let liquidity = markets
            .iter()
            .find(|m| m.denom() == debt.denom)
            .map(|m| m.available_liquidity);
        let coverage = liquidity.map_or(0.0, |l| l / debt_amount);
        if coverage < MIN_DEBT_COVERAGE {
            return self.borrow_without_liquidity(debt, debt_amount, markets, whitelisted);
        }

        let amount = match liquidity {
            Some(liquidity) if coverage < 1.0 => (liquidity * LIQUIDITY_BUFFER).floor(),
            _ => debt_amount,
        };
        Ok(BorrowLeg {
            actions: vec![Action::Borrow(Coin::new(debt.denom.clone(), amount))],
            denom: debt.denom.clone(),
            amount,
            debt_amount: amount,
        })
    }

    fn borrow_without_liquidity(
        &self,
        debt: &RoverDebt,
        debt_amount: f64,
        markets: &[MarketInfo],
        whitelisted: &HashSet<String>,
    ) -> LiquidatorResult<BorrowLeg> {
        let eligible: Vec<MarketInfo> = markets
            .iter()
            .filter(|m| m.denom() != debt.denom && whitelisted.contains(m.denom()))
            .cloned()
            .collect();
        let plan = find_borrow_market(&eligible, &debt.denom, debt_amount, &self.router)?;
        let amount = plan.amount.floor();
        let output = self.router.get_output(amount, &plan.route)?;
        let received = (output.min(debt_amount) * (1.0 - self.config.swap_slippage)).floor();

        debug!(debt = %debt.denom, borrowed = %plan.denom, amount, received, "Debt market too thin, borrowing elsewhere");
        Ok(BorrowLeg {
            actions: vec![
                Action::Borrow(Coin::new(plan.denom.clone(), amount)),
                Action::SwapExactIn {
                    coin_in: ActionCoin::account_balance(&plan.denom),
                    denom_out: debt.denom.clone(),
                    min_receive: format_amount(received),
                    route: Some(self.venue.route(&plan.route)),
                },
            ],
            denom: plan.denom,
            amount,
            debt_amount: received,
        })
    }

    /// Swap the won collateral into the borrowed denom, unwrapping vault
    /// shares and LP tokens first.
    async fn collateral_to_borrowed(
        &self,
        collateral: &RoverCollateral,
        leg: &BorrowLeg,
        input: RoverInput<'_>,
    ) -> Result<Vec<Action>> {
        if collateral.denom == leg.denom {
            return Ok(Vec::new());
        }

        match collateral.kind {
            CollateralKind::Vault(_) => {
                let info = input
                    .vaults
                    .get(&collateral.denom)
                    .ok_or(LiquidatorError::UnsupportedVault)?;
                self.withdraw_and_swap(&info.base_token, leg, input.prices).await
            }
            _ if collateral.denom.starts_with(LP_SHARE_PREFIX) => {
                self.withdraw_and_swap(&collateral.denom, leg, input.prices).await
            }
            _ => {
                let amount_in = amount_in(&collateral.denom, leg, leg.amount, input.prices)?;
                Ok(vec![self.swap_action(&collateral.denom, &leg.denom, amount_in).await?])
            }
        }
    }

    async fn withdraw_and_swap(&self, lp_denom: &str, leg: &BorrowLeg, prices: &PriceMap) -> Result<Vec<Action>> {
        let underlying = self.underlying(lp_denom)?;
        let mut actions = vec![Action::WithdrawLiquidity {
            lp_token: ActionCoin::account_balance(lp_denom),
            slippage: self.config.withdraw_liquidity_slippage.to_string(),
        }];

        // each side of the pool holds roughly an equal share of the value
        let share = leg.amount / underlying.len() as f64;
        for denom in underlying.iter().filter(|d| **d != leg.denom) {
            let amount_in = amount_in(denom, leg, share, prices)?;
            actions.push(self.swap_action(denom, &leg.denom, amount_in).await?);
        }
        Ok(actions)
    }

    /// Denoms a `gamm/pool/<id>` LP token withdraws into.
    fn underlying(&self, lp_denom: &str) -> LiquidatorResult<Vec<String>> {
        let id = lp_denom
            .strip_prefix(LP_SHARE_PREFIX)
            .and_then(|id| id.parse().ok())
            .map(PoolId)
            .ok_or_else(|| LiquidatorError::UnsupportedAsset(lp_denom.to_string()))?;

        let pool = self.router.pool(id)?;
        match &pool.kind {
            PoolKind::Xyk { assets } => Ok(assets.iter().map(|a| a.denom.clone()).collect()),
            PoolKind::Stableswap { liquidity } => Ok(liquidity.iter().map(|a| a.denom.clone()).collect()),
            PoolKind::ConcentratedLiquidity(_) => Err(LiquidatorError::UnsupportedPool(id)),
        }
    }

    /// Swap the whole balance of `denom_in`, quoted for `amount_in`.
    async fn swap_action(&self, denom_in: &str, denom_out: &str, amount_in: f64) -> Result<Action> {
        let quote = self.requester.request_route(denom_in, denom_out, amount_in).await?;
        if quote.route.is_empty() {
            return Err(LiquidatorError::NoRouteForSwap.into());
        }
        Ok(Action::SwapExactIn {
            coin_in: ActionCoin::account_balance(denom_in),
            denom_out: denom_out.to_string(),
            min_receive: format_amount(quote.min_output(self.config.swap_slippage).floor()),
            route: Some(self.venue.route(&quote.route)),
        })
    }

    async fn swap_winnings(&self, leg: &BorrowLeg) -> Result<Action> {
        let quote = self
            .requester
            .request_route(&leg.denom, &self.neutral_denom, leg.amount)
            .await?;
        if quote.route.is_empty() {
            return Err(LiquidatorError::NoRouteForSwap.into());
        }
        Ok(Action::SwapExactIn {
            coin_in: ActionCoin::account_balance(&leg.denom),
            denom_out: self.neutral_denom.clone(),
            min_receive: WINNINGS_MIN_RECEIVE.to_string(),
            route: Some(self.venue.route(&quote.route)),
        })
    }
}

/// Amount of `denom_in` worth `amount` of the borrowed denom.
fn amount_in(denom_in: &str, leg: &BorrowLeg, amount: f64, prices: &PriceMap) -> LiquidatorResult<f64> {
    let price = |denom: &str| {
        prices
            .get(denom)
            .copied()
            .filter(|p| *p > 0.0)
            .ok_or_else(|| LiquidatorError::UnsupportedAsset(denom.to_string()))
    };
    Ok(amount * price(&leg.denom)? / price(denom_in)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquidator_chain::{
        Debt, LockingVaultAmount, Market, OsmoSwap, Pool, PoolAsset, VaultBase, VaultInfo, VaultPosition,
        VaultPositionAmount, VaultPositionType,
    };
    use serde_json::Value;

    fn router() -> Arc<AmmRouter> {
        let router = Arc::new(AmmRouter::default());
        router.set_pools(vec![
            Pool::xyk(1, PoolAsset::new("uosmo", 1e12), PoolAsset::new("uusdc", 1e12), 0.002),
            Pool::xyk(2, PoolAsset::new("uatom", 1e12), PoolAsset::new("uusdc", 8e12), 0.002),
            Pool::xyk(4, PoolAsset::new("uatom", 1e12), PoolAsset::new("uosmo", 8e12), 0.002),
        ]);
        router
    }

    fn generator(config: RoverConfig) -> ActionGenerator {
        let router = router();
        ActionGenerator::new(
            Arc::clone(&router) as Arc<dyn RouteRequester>,
            router,
            SwapVenue::Osmosis,
            "uusdc",
            config,
        )
    }

    fn market(denom: &str, liquidity: f64) -> MarketInfo {
        Market {
            denom: denom.to_string(),
            collateral_total_scaled: liquidity * 1e6,
            debt_total_scaled: 0.0,
            liquidity_index: 1.0,
            borrow_index: 1.0,
        }
        .into()
    }

    fn prices() -> PriceMap {
        [("uatom", 8.0), ("uusdc", 1.0), ("uosmo", 1.0), ("gamm/pool/4", 2.0), ("gamm/pool/9", 2.0)]
            .into_iter()
            .map(|(d, p)| (d.to_string(), p))
            .collect()
    }

    fn vaults() -> VaultMap {
        let info = VaultInfo {
            address: "osmo1vault".to_string(),
            base_token: "gamm/pool/4".to_string(),
            vault_token: "factory/osmo1vault/vault".to_string(),
            lp_share_ratio: 2.5,
        };
        VaultMap::from([(info.address.clone(), info)])
    }

    fn position(collateral: (&str, f64), debt: (&str, f64)) -> CreditPositions {
        CreditPositions {
            account_id: "7".to_string(),
            deposits: vec![Coin::new(collateral.0, collateral.1)],
            debts: vec![Debt::new(debt.0, debt.1)],
            ..Default::default()
        }
    }

    struct Fixture {
        prices: PriceMap,
        markets: Vec<MarketInfo>,
        whitelisted: HashSet<String>,
        vaults: VaultMap,
    }

    impl Fixture {
        fn new(debt_liquidity: f64) -> Self {
            Self {
                prices: prices(),
                markets: vec![market("uusdc", debt_liquidity), market("uosmo", 1e12), market("uatom", 1e12)],
                whitelisted: ["uusdc", "uosmo"].into_iter().map(String::from).collect(),
                vaults: vaults(),
            }
        }

        fn input<'a>(&'a self, positions: &'a CreditPositions) -> RoverInput<'a> {
            RoverInput {
                positions,
                prices: &self.prices,
                markets: &self.markets,
                whitelisted: &self.whitelisted,
                vaults: &self.vaults,
            }
        }
    }

    fn names(actions: &[Action]) -> Vec<&'static str> {
        actions.iter().map(Action::name).collect()
    }

    fn borrowed(actions: &[Action]) -> Coin {
        actions
            .iter()
            .find_map(|a| match a {
                Action::Borrow(coin) => Some(coin.clone()),
                _ => None,
            })
            .unwrap()
    }

    fn debt_coin(actions: &[Action]) -> Coin {
        actions
            .iter()
            .find_map(|a| match a {
                Action::Liquidate { debt_coin, .. } => Some(debt_coin.clone()),
                _ => None,
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_borrow_debt_then_swap_collateral_back() {
        let fixture = Fixture::new(1e12);
        let positions = position(("uatom", 1_000_000.0), ("uusdc", 3_000_000.0));
        let actions = generator(RoverConfig::default())
            .generate(fixture.input(&positions))
            .await
            .unwrap();

        assert_eq!(
            names(&actions),
            ["borrow", "liquidate", "swap_exact_in", "repay", "refund_all_coin_balances"]
        );
        assert_eq!(borrowed(&actions), Coin::new("uusdc", 3_000_000.0));
        assert_eq!(debt_coin(&actions), Coin::new("uusdc", 3_000_000.0));

        let Action::SwapExactIn { coin_in, denom_out, min_receive, route } = &actions[2] else {
            panic!("expected a swap");
        };
        assert_eq!(coin_in, &ActionCoin::account_balance("uatom"));
        assert_eq!(denom_out, "uusdc");
        assert_eq!(
            route,
            &Some(SwapperRoute::Osmo {
                swaps: vec![OsmoSwap {
                    pool_id: 2,
                    to: "uusdc".to_string()
                }]
            })
        );
        // 375000 uatom quoted, 0.2% fee, 0.5% slippage
        let min_receive: f64 = min_receive.parse().unwrap();
        assert!(min_receive > 2_970_000.0 && min_receive < 2_990_000.0);
    }

    #[tokio::test]
    async fn test_repay_capped_by_close_factor() {
        let fixture = Fixture::new(1e12);
        let positions = position(("uatom", 1_000_000.0), ("uusdc", 6_000_000.0));
        let actions = generator(RoverConfig::default())
            .generate(fixture.input(&positions))
            .await
            .unwrap();

        // half of 8e6 collateral value
        assert_eq!(borrowed(&actions), Coin::new("uusdc", 4_000_000.0));
    }

    #[tokio::test]
    async fn test_repay_capped_by_debt_ceiling() {
        let fixture = Fixture::new(1e12);
        let positions = position(("uatom", 1_000_000.0), ("uusdc", 3_000_000.0));
        let config = RoverConfig {
            debt_ceiling: 1_000_000.0,
            ..Default::default()
        };
        let actions = generator(config).generate(fixture.input(&positions)).await.unwrap();
        assert_eq!(borrowed(&actions), Coin::new("uusdc", 1_000_000.0));
    }

    #[tokio::test]
    async fn test_thin_debt_market_borrows_what_it_has() {
        let fixture = Fixture::new(2_000_000.0);
        let positions = position(("uatom", 1_000_000.0), ("uusdc", 3_000_000.0));
        let actions = generator(RoverConfig::default())
            .generate(fixture.input(&positions))
            .await
            .unwrap();

        assert_eq!(borrowed(&actions), Coin::new("uusdc", 1_980_000.0));
        assert_eq!(debt_coin(&actions), Coin::new("uusdc", 1_980_000.0));
    }

    #[tokio::test]
    async fn test_empty_debt_market_borrows_whitelisted_asset() {
        let fixture = Fixture::new(1_000_000.0);
        let positions = position(("uatom", 1_000_000.0), ("uusdc", 3_000_000.0));
        let actions = generator(RoverConfig::default())
            .generate(fixture.input(&positions))
            .await
            .unwrap();

        assert_eq!(
            names(&actions),
            [
                "borrow",
                "swap_exact_in",
                "liquidate",
                "swap_exact_in",
                "repay",
                "swap_exact_in",
                "refund_all_coin_balances"
            ]
        );
        // uatom is cheaper but not whitelisted
        assert_eq!(borrowed(&actions).denom, "uosmo");

        let repaid = debt_coin(&actions);
        assert_eq!(repaid.denom, "uusdc");
        assert!(repaid.amount_f64() > 2_980_000.0 && repaid.amount_f64() <= 2_985_000.0);
        let Action::SwapExactIn { min_receive, .. } = &actions[1] else {
            panic!("expected a swap");
        };
        assert_eq!(min_receive, &repaid.amount);

        // collateral goes back to the borrowed uosmo, winnings on to neutral
        let Action::SwapExactIn { denom_out, .. } = &actions[3] else {
            panic!("expected a swap");
        };
        assert_eq!(denom_out, "uosmo");
        assert_eq!(actions[4], Action::Repay { coin: ActionCoin::account_balance("uosmo") });
        let Action::SwapExactIn { coin_in, denom_out, min_receive, .. } = &actions[5] else {
            panic!("expected a swap");
        };
        assert_eq!(coin_in.denom, "uosmo");
        assert_eq!(denom_out, "uusdc");
        assert_eq!(min_receive, WINNINGS_MIN_RECEIVE);
    }

    #[tokio::test]
    async fn test_no_whitelisted_market() {
        let mut fixture = Fixture::new(1_000_000.0);
        fixture.whitelisted.clear();
        let positions = position(("uatom", 1_000_000.0), ("uusdc", 3_000_000.0));
        let err = generator(RoverConfig::default())
            .generate(fixture.input(&positions))
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<LiquidatorError>(), Some(&LiquidatorError::NoValidMarket));
    }

    #[tokio::test]
    async fn test_vault_collateral_withdrawn_then_swapped() {
        let fixture = Fixture::new(1e12);
        let positions = CreditPositions {
            account_id: "7".to_string(),
            debts: vec![Debt::new("uusdc", 2_000_000.0)],
            vaults: vec![VaultPosition {
                vault: VaultBase {
                    address: "osmo1vault".to_string(),
                },
                amount: VaultPositionAmount::Locking(LockingVaultAmount {
                    locked: 1_000_000.0,
                    unlocking: Vec::new(),
                }),
            }],
            ..Default::default()
        };
        let actions = generator(RoverConfig::default())
            .generate(fixture.input(&positions))
            .await
            .unwrap();

        assert_eq!(
            names(&actions),
            [
                "borrow",
                "liquidate",
                "withdraw_liquidity",
                "swap_exact_in",
                "swap_exact_in",
                "repay",
                "refund_all_coin_balances"
            ]
        );
        let request = serde_json::to_value(&actions[1]).unwrap();
        assert_eq!(
            request["liquidate"]["request"]["vault"]["position_type"],
            Value::from("l_o_c_k_e_d")
        );
        assert_eq!(
            actions[2],
            Action::WithdrawLiquidity {
                lp_token: ActionCoin::account_balance("gamm/pool/4"),
                slippage: "0.01".to_string(),
            }
        );
        let swapped: Vec<&str> = actions[3..5]
            .iter()
            .filter_map(|a| match a {
                Action::SwapExactIn { coin_in, .. } => Some(coin_in.denom.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(swapped, ["uatom", "uosmo"]);
    }

    #[tokio::test]
    async fn test_vault_without_info() {
        let fixture = Fixture::new(1e12);
        let positions = position(("uatom", 1.0), ("uusdc", 1.0));
        let collateral = RoverCollateral {
            denom: "osmo1unknown".to_string(),
            amount: 100.0,
            value: 100.0,
            kind: CollateralKind::Vault(VaultPositionType::Unlocked),
        };
        let leg = BorrowLeg {
            actions: Vec::new(),
            denom: "uusdc".to_string(),
            amount: 100.0,
            debt_amount: 100.0,
        };

        let err = generator(RoverConfig::default())
            .collateral_to_borrowed(&collateral, &leg, fixture.input(&positions))
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<LiquidatorError>(), Some(&LiquidatorError::UnsupportedVault));
    }

    #[tokio::test]
    async fn test_lp_collateral_from_unknown_pool() {
        let fixture = Fixture::new(1e12);
        let positions = position(("gamm/pool/9", 5_000_000.0), ("uusdc", 2_000_000.0));
        let err = generator(RoverConfig::default())
            .generate(fixture.input(&positions))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<LiquidatorError>(),
            Some(&LiquidatorError::PoolNotFound(PoolId(9)))
        );
    }

    #[test]
    fn test_astroport_venue_routes_by_denom() {
        let router = router();
        let (route, _) = router.best_route_given_input("uatom", "uusdc", 1_000.0).unwrap();
        let SwapperRoute::Astro { swaps } = SwapVenue::Astroport.route(&route) else {
            panic!("expected an astroport route");
        };
        assert_eq!(swaps[0].from, "uatom");
        assert_eq!(swaps.last().map(|s| s.to.as_str()), Some("uusdc"));
    }
}
