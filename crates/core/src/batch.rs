//! Transaction batch building.
//!
//! A liquidation pass produces two transactions. The first sources every
//! debt asset from the neutral balance and liquidates. The second, sent
//! once the first has landed, withdraws the won collateral and swaps it
//! back into the neutral asset. The two are not atomic: whatever the
//! second one does is decided from balances queried after the first.

use anyhow::Result;
use liquidator_api::RouteRequester;
use liquidator_chain::messages::{self, ChainMessage};
use liquidator_chain::types::format_amount;
use liquidator_chain::{Asset, Coin, Debt, Exchange, LiquidationTx, RouteHop};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::LiquidationConfig;
use crate::error::LiquidatorError;
use crate::evaluator::{LiquidationPlan, PriceMap};
use crate::market::{find_borrow_market, MarketInfo};
use crate::pricing::calculate_slippage_bp;
use crate::router::AmmRouter;

/// Ordered messages for one transaction, plus the amounts its swaps are expected to yield.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingBatch {
    messages: Vec<ChainMessage>,
    expected: HashMap<String, f64>,
}

impl PendingBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChainMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChainMessage] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<ChainMessage> {
        self.messages
    }

    /// Projected amount of `denom` produced by this batch's swaps.
    pub fn expected(&self, denom: &str) -> f64 {
        self.expected.get(denom).copied().unwrap_or(0.0)
    }

    pub fn add_expected(&mut self, denom: &str, amount: f64) {
        *self.expected.entry(denom.to_string()).or_insert(0.0) += amount;
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

/// Wallet state for a collateral clean-up transaction.
#[derive(Debug, Clone, Copy)]
pub struct CleanupInput<'a> {
    /// Collateral denoms won by the liquidation transaction.
    pub won_collaterals: &'a [Asset],
    /// Wallet balances queried after the liquidation transaction.
    pub balances: &'a [Coin],
    /// The liquidator's own outstanding red bank debts.
    pub own_debts: &'a [Debt],
    pub prices: &'a PriceMap,
    /// Sweep the neutral surplus to this address.
    pub sweep_to: Option<&'a str>,
}

/// Turns liquidation plans into chain messages.
pub struct BatchBuilder {
    requester: Arc<dyn RouteRequester>,
    exchange: Arc<dyn Exchange>,
    redbank: String,
    neutral_denom: String,
    gas_denom: String,
    config: LiquidationConfig,
    swap_slippage: f64,
    /// Local router used to price borrow-then-swap fallbacks.
    borrow_router: Option<Arc<AmmRouter>>,
}

impl fmt::Debug for BatchBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchBuilder")
            .field("requester", &self.requester.requester_id())
            .field("redbank", &self.redbank)
            .field("neutral_denom", &self.neutral_denom)
            .field("gas_denom", &self.gas_denom)
            .field("swap_slippage", &self.swap_slippage)
            .finish()
    }
}

impl BatchBuilder {
    pub fn new(
        requester: Arc<dyn RouteRequester>,
        exchange: Arc<dyn Exchange>,
        redbank: impl Into<String>,
        neutral_denom: impl Into<String>,
        gas_denom: impl Into<String>,
        config: LiquidationConfig,
    ) -> Self {
        Self {
            requester,
            exchange,
            redbank: redbank.into(),
            neutral_denom: neutral_denom.into(),
            gas_denom: gas_denom.into(),
            config,
            swap_slippage: 0.025,
            borrow_router: None,
        }
    }

    pub fn with_slippage(mut self, swap_slippage: f64) -> Self {
        self.swap_slippage = swap_slippage;
        self
    }

    /// Enable borrowing a liquid asset when no neutral route to a debt exists.
    pub fn with_borrow_router(mut self, router: Arc<AmmRouter>) -> Self {
        self.borrow_router = Some(router);
        self
    }

    pub fn neutral_denom(&self) -> &str {
        &self.neutral_denom
    }

    pub fn liquidation_message(&self, sender: &str, tx: &LiquidationTx) -> ChainMessage {
        messages::liquidate(sender, &self.redbank, tx)
    }

    /// One full withdraw per collateral denom.
    pub fn append_withdraw_messages(&self, batch: &mut PendingBatch, collaterals: &[Asset], sender: &str) {
        let mut seen: Vec<&str> = Vec::with_capacity(collaterals.len());
        for collateral in collaterals {
            if seen.contains(&collateral.denom.as_str()) {
                continue;
            }
            seen.push(&collateral.denom);
            batch.push(messages::withdraw(sender, &self.redbank, &collateral.denom, None));
        }
    }

    /// Swap every non-neutral coin above the dust floor into the neutral asset.
    ///
    /// Returns the total neutral amount expected after slippage. Coins with no
    /// route are left where they are.
    pub async fn append_swap_to_neutral_messages(
        &self,
        batch: &mut PendingBatch,
        coins: &[Asset],
        sender: &str,
    ) -> f64 {
        let mut expected_neutral = 0.0;

        for coin in coins {
            if coin.denom == self.neutral_denom {
                continue;
            }
            let amount = if coin.denom == self.gas_denom {
                coin.amount - self.config.gas_reserve
            } else {
                coin.amount
            };
            if amount <= self.config.dust_floor {
                debug!(denom = %coin.denom, amount, "Skipping dust collateral");
                continue;
            }

            let quote = match self
                .requester
                .request_route(&coin.denom, &self.neutral_denom, amount)
                .await
            {
                Ok(quote) => quote,
                Err(e) => {
                    warn!(denom = %coin.denom, amount, error = %e, "No route to neutral asset");
                    continue;
                }
            };

            let min_output = quote.min_output(self.swap_slippage);
            if let Some(impact_bp) = price_impact_bp(&quote.route, amount) {
                debug!(denom = %coin.denom, amount, impact_bp, "Swap price impact");
            }
            let token_in = Coin::new(coin.denom.clone(), amount);
            match self
                .exchange
                .produce_swap_message(&quote.route, &token_in, &format_amount(min_output), sender)
            {
                Ok(message) => {
                    batch.push(message);
                    batch.add_expected(&self.neutral_denom, min_output);
                    expected_neutral += min_output;
                }
                Err(e) => warn!(denom = %coin.denom, error = %e, "Failed to produce swap"),
            }
        }

        expected_neutral
    }

    /// Source every debt from the neutral budget.
    ///
    /// Debts in the neutral asset are capped by the budget directly. Other
    /// debts are bought through the requester; without a route the debt is
    /// borrowed from the best red bank market and swapped instead. Returns the
    /// neutral budget left over.
    pub async fn append_swap_to_debt_messages(
        &self,
        batch: &mut PendingBatch,
        debts: &[Asset],
        neutral_available: f64,
        prices: &PriceMap,
        markets: &[MarketInfo],
        sender: &str,
    ) -> Result<f64> {
        let neutral_price = prices
            .get(&self.neutral_denom)
            .copied()
            .filter(|p| *p > 0.0)
            .ok_or_else(|| LiquidatorError::UnsupportedAsset(self.neutral_denom.clone()))?;
        let mut remaining = neutral_available;

        for debt in debts {
            if debt.denom == self.neutral_denom {
                let used = debt.amount.min(remaining.max(0.0));
                remaining -= used;
                batch.add_expected(&debt.denom, used);
                continue;
            }

            let debt_price = prices
                .get(&debt.denom)
                .copied()
                .ok_or_else(|| LiquidatorError::UnsupportedAsset(debt.denom.clone()))?;
            let neutral_in = (debt.amount * debt_price * self.config.debt_swap_buffer / neutral_price)
                .min(remaining);
            if neutral_in <= self.config.dust_floor {
                warn!(debt = %debt.denom, neutral_in, remaining, "Neutral budget exhausted");
                continue;
            }

            match self
                .requester
                .request_route(&self.neutral_denom, &debt.denom, neutral_in)
                .await
            {
                Ok(quote) => {
                    let min_output = debt.amount.min(quote.min_output(self.swap_slippage));
                    let message = self.exchange.produce_swap_message(
                        &quote.route,
                        &Coin::new(self.neutral_denom.clone(), neutral_in),
                        &format_amount(min_output),
                        sender,
                    )?;
                    batch.push(message);
                    batch.add_expected(&debt.denom, min_output);
                    remaining -= neutral_in;
                    debug!(debt = %debt.denom, neutral_in, expected = min_output, "Debt swap");
                }
                Err(e) => {
                    warn!(debt = %debt.denom, error = %e, "No neutral route to debt, borrowing instead");
                    self.append_borrow_messages(batch, debt, markets, sender)?;
                }
            }
        }

        Ok(remaining)
    }

    fn append_borrow_messages(
        &self,
        batch: &mut PendingBatch,
        debt: &Asset,
        markets: &[MarketInfo],
        sender: &str,
    ) -> Result<()> {
        let router = self
            .borrow_router
            .as_ref()
            .ok_or(LiquidatorError::NoRouteForSwap)?;
        let plan = find_borrow_market(markets, &debt.denom, debt.amount, router)?;
        let output = router.get_output(plan.amount, &plan.route)?;
        let min_output = debt.amount.min(output * (1.0 - self.swap_slippage));

        let borrowed = Coin::new(plan.denom.clone(), plan.amount);
        batch.push(messages::borrow(sender, &self.redbank, &borrowed.denom, &borrowed.amount));
        batch.push(self.exchange.produce_swap_message(
            &plan.route,
            &borrowed,
            &format_amount(min_output),
            sender,
        )?);
        batch.add_expected(&debt.denom, min_output);

        info!(
            debt = %debt.denom,
            borrow_denom = %plan.denom,
            borrow_amount = plan.amount,
            expected = output,
            "Borrowing to source debt"
        );
        Ok(())
    }

    /// The first transaction: debt sourcing followed by one liquidate per target.
    ///
    /// Each liquidation is capped by what the swaps are guaranteed to deliver
    /// of its debt denom, shared across targets with the same debt. A target
    /// left with nothing is dropped, and a batch with no liquidation is empty.
    pub async fn build_liquidation_batch(
        &self,
        plan: &LiquidationPlan,
        neutral_balance: f64,
        prices: &PriceMap,
        markets: &[MarketInfo],
        sender: &str,
    ) -> Result<PendingBatch> {
        let mut batch = PendingBatch::new();
        if plan.is_empty() {
            return Ok(batch);
        }

        self.append_swap_to_debt_messages(
            &mut batch,
            &plan.debts_to_repay,
            neutral_balance,
            prices,
            markets,
            sender,
        )
        .await?;

        let mut funding: HashMap<&str, f64> = HashMap::new();
        let mut liquidations = 0;
        for tx in &plan.txs {
            let available = funding
                .entry(tx.debt_denom.as_str())
                .or_insert_with(|| batch.expected(&tx.debt_denom));
            let requested: f64 = tx.amount.parse().unwrap_or(0.0);
            let amount = requested.min(*available).floor();
            if amount <= 0.0 {
                warn!(user = %tx.user_address, debt = %tx.debt_denom, requested, "Debt not sourced, dropping liquidation");
                continue;
            }
            *available -= amount;

            if amount < requested {
                debug!(user = %tx.user_address, requested, amount, "Liquidation capped by sourced debt");
                let capped = LiquidationTx {
                    amount: format_amount(amount),
                    ..tx.clone()
                };
                batch.push(self.liquidation_message(sender, &capped));
            } else {
                batch.push(self.liquidation_message(sender, tx));
            }
            liquidations += 1;
        }

        if liquidations == 0 {
            return Ok(PendingBatch::new());
        }

        debug!(messages = batch.len(), liquidations, "Built liquidation batch");
        Ok(batch)
    }

    /// Merge won collaterals with wallet balances, keeping priced coins worth sweeping.
    pub fn combine_balances(&self, collaterals: &[Asset], balances: &[Coin], prices: &PriceMap) -> Vec<Asset> {
        let mut combined: Vec<Asset> = Vec::new();
        let merged = collaterals
            .iter()
            .cloned()
            .chain(balances.iter().map(Asset::from));
        for asset in merged {
            match combined.iter_mut().find(|a| a.denom == asset.denom) {
                Some(existing) => existing.amount += asset.amount,
                None => combined.push(asset),
            }
        }

        combined.retain(|asset| {
            prices
                .get(&asset.denom)
                .is_some_and(|price| asset.amount * price > self.config.collateral_sweep_floor)
        });
        combined
    }

    /// The second transaction: withdraw, repay our own debts, swap to neutral, sweep.
    pub async fn build_collateral_batch(&self, input: CleanupInput<'_>, sender: &str) -> Result<PendingBatch> {
        let mut batch = PendingBatch::new();
        self.append_withdraw_messages(&mut batch, input.won_collaterals, sender);

        let mut balances: Vec<Asset> = input.balances.iter().map(Asset::from).collect();
        for debt in input.own_debts {
            let Some(balance) = balances.iter_mut().find(|b| b.denom == debt.denom) else {
                continue;
            };
            let repay = debt.amount.min(balance.amount);
            if repay <= 0.0 {
                continue;
            }
            balance.amount -= repay;
            batch.push(messages::repay(sender, &self.redbank, Coin::new(debt.denom.clone(), repay)));
            debug!(denom = %debt.denom, repay, "Repaying own debt");
        }

        let remaining: Vec<Coin> = balances.iter().map(Asset::to_coin).collect();
        let coins = self.combine_balances(input.won_collaterals, &remaining, input.prices);
        self.append_swap_to_neutral_messages(&mut batch, &coins, sender).await;

        if let Some(master) = input.sweep_to {
            let neutral = balances
                .iter()
                .find(|b| b.denom == self.neutral_denom)
                .map_or(0.0, |b| b.amount);
            let surplus = neutral - self.config.stable_balance_threshold;
            if surplus > 0.0 {
                batch.push(messages::send(
                    sender,
                    master,
                    vec![Coin::new(self.neutral_denom.clone(), surplus)],
                ));
                info!(to = %master, surplus, "Sweeping neutral surplus");
            }
        }

        debug!(messages = batch.len(), "Built collateral batch");
        Ok(batch)
    }
}

/// Price impact of the first hop, when it is a constant product pool with known reserves.
fn price_impact_bp(route: &[RouteHop], amount_in: f64) -> Option<f64> {
    let hop = route.first()?;
    let reserve_in = hop.pool.reserve(&hop.token_in_denom)?;
    let reserve_out = hop.pool.reserve(&hop.token_out_denom)?;
    Some(calculate_slippage_bp(reserve_in, reserve_out, amount_in))
}
