//! Credit manager liquidation loop.
//!
//! Every liquidator address owns one credit account and liquidates one
//! target per tick. The master address keeps the liquidators topped up with
//! gas and collects their neutral surplus.

use anyhow::{bail, Result};
use futures::future::join_all;
use liquidator_api::{CandidateFeed, LiquidationQueue, PoolProvider};
use liquidator_chain::messages::{self, ChainMessage};
use liquidator_chain::{ChainClient, Coin, FeeEstimator, ProtocolQuerier, TxResponse};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::{ActionGenerator, RoverInput, VaultMap};
use crate::config::BotConfig;
use crate::error::LiquidatorError;
use crate::executor::balance_of;
use crate::router::AmmRouter;
use crate::snapshot::Snapshot;
use crate::state::{claim, MarketState};

/// Counter bumped with the number of credit accounts liquidated per tick.
pub const ROVER_EXECUTED_COUNTER: &str = "executor.rover.liquidations.executed";

/// Liquidation worker for credit manager accounts.
pub struct RoverExecutor {
    client: Arc<dyn ChainClient>,
    fees: FeeEstimator,
    generator: ActionGenerator,
    feed: Arc<dyn CandidateFeed>,
    counter: Option<Arc<dyn LiquidationQueue>>,
    master: String,
    liquidators: Vec<String>,
    gas_denom: String,
    config: BotConfig,
    state: MarketState,

    /// Credit account id by liquidator address.
    credit_accounts: Snapshot<HashMap<String, String>>,
    vaults: Snapshot<VaultMap>,
    vaults_refreshed: Mutex<Option<Instant>>,
    gas_checked: Mutex<Option<Instant>>,
}

impl RoverExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ChainClient>,
        querier: ProtocolQuerier,
        fees: FeeEstimator,
        generator: ActionGenerator,
        router: Arc<AmmRouter>,
        feed: Arc<dyn CandidateFeed>,
        master: impl Into<String>,
        gas_denom: impl Into<String>,
        config: BotConfig,
    ) -> Self {
        Self {
            client,
            fees,
            generator,
            feed,
            counter: None,
            master: master.into(),
            liquidators: Vec::new(),
            gas_denom: gas_denom.into(),
            state: MarketState::new(querier, router, config.clone()),
            config,
            credit_accounts: Snapshot::default(),
            vaults: Snapshot::default(),
            vaults_refreshed: Mutex::new(None),
            gas_checked: Mutex::new(None),
        }
    }

    pub fn with_pool_provider(mut self, provider: Arc<dyn PoolProvider>) -> Self {
        self.state.add_provider(provider);
        self
    }

    /// Liquidate from these addresses. Without any, the master liquidates.
    pub fn with_liquidators(mut self, liquidators: Vec<String>) -> Self {
        self.liquidators = liquidators;
        self
    }

    /// Report executed liquidations through this queue's counters.
    pub fn with_counter(mut self, counter: Arc<dyn LiquidationQueue>) -> Self {
        self.counter = Some(counter);
        self
    }

    fn querier(&self) -> &ProtocolQuerier {
        self.state.querier()
    }

    fn credit_manager(&self) -> &str {
        &self.querier().contracts().credit_manager
    }

    fn liquidators(&self) -> Vec<&str> {
        if self.liquidators.is_empty() {
            vec![self.master.as_str()]
        } else {
            self.liquidators.iter().map(String::as_str).collect()
        }
    }

    pub fn credit_account(&self, liquidator: &str) -> Option<String> {
        self.credit_accounts.load().get(liquidator).cloned()
    }

    pub fn vaults(&self) -> Arc<VaultMap> {
        self.vaults.load()
    }

    /// Load market data and vaults, fund the liquidators with gas and make
    /// sure each of them owns a credit account.
    #[instrument(skip(self))]
    pub async fn initiate(&self) -> Result<()> {
        self.state.initiate().await?;
        self.refresh_vaults().await?;
        *self.vaults_refreshed.lock() = Some(Instant::now());
        self.top_up_gas().await?;
        *self.gas_checked.lock() = Some(Instant::now());

        let liquidators = self.liquidators();
        let created = join_all(liquidators.iter().map(|l| self.ensure_credit_account(l))).await;
        let mut accounts = HashMap::with_capacity(liquidators.len());
        for (liquidator, result) in liquidators.iter().zip(created) {
            accounts.insert(liquidator.to_string(), result?);
        }
        self.credit_accounts.store(accounts);

        info!(
            master = %self.master,
            liquidators = liquidators.len(),
            vaults = self.vaults.load().len(),
            pools = self.state.router().pools().len(),
            "Credit manager executor initiated"
        );
        Ok(())
    }

    async fn broadcast(&self, account: &str, messages: &[ChainMessage]) -> Result<TxResponse> {
        let fee = self.fees.estimate(self.client.as_ref(), account, messages).await?;
        let response = self.client.sign_and_broadcast(account, messages, fee).await?;
        if !response.is_success() {
            error!(
                account,
                code = response.code,
                tx_hash = %response.transaction_hash,
                raw_log = %response.raw_log,
                "Transaction failed"
            );
            bail!("Transaction {} failed with code {}", response.transaction_hash, response.code);
        }
        Ok(response)
    }

    /// The first credit account `liquidator` owns, created when it has none.
    async fn ensure_credit_account(&self, liquidator: &str) -> Result<String> {
        if let Some(id) = self.querier().owned_credit_accounts(liquidator).await?.into_iter().next() {
            return Ok(id);
        }

        info!(liquidator, "Creating credit account");
        self.broadcast(liquidator, &[messages::create_credit_account(liquidator, self.credit_manager())])
            .await?;
        let id = self
            .querier()
            .owned_credit_accounts(liquidator)
            .await?
            .into_iter()
            .next()
            .ok_or(LiquidatorError::NoRoverData)?;
        info!(liquidator, account_id = %id, "Credit account created");
        Ok(id)
    }

    /// Reload vault configs and their share ratios. Vaults whose info query
    /// fails are left out.
    #[instrument(skip(self))]
    pub async fn refresh_vaults(&self) -> Result<()> {
        let configs = self.querier().vault_configs().await?;
        let infos = join_all(configs.iter().map(|c| self.querier().vault_info(&c.addr))).await;

        let mut vaults = VaultMap::with_capacity(configs.len());
        for (config, result) in configs.iter().zip(infos) {
            match result {
                Ok(info) => {
                    vaults.insert(config.addr.clone(), info);
                }
                Err(e) => warn!(vault = %config.addr, error = %e, "Vault info query failed"),
            }
        }
        info!(vaults = vaults.len(), "Vaults refreshed");
        self.vaults.store(vaults);
        Ok(())
    }

    /// Send gas tokens from the master to every liquidator running low.
    pub async fn top_up_gas(&self) -> Result<()> {
        let min_gas = self.config.rover.min_gas_tokens;
        let liquidators: Vec<&str> = self
            .liquidators()
            .into_iter()
            .filter(|l| *l != self.master)
            .collect();
        let balances = join_all(liquidators.iter().map(|l| self.querier().balances(l))).await;

        let mut top_ups = Vec::new();
        for (liquidator, result) in liquidators.iter().zip(balances) {
            let gas = balance_of(&result?, &self.gas_denom);
            if gas < min_gas {
                debug!(liquidator, gas, "Liquidator low on gas");
                top_ups.push(messages::send(
                    &self.master,
                    liquidator,
                    vec![Coin::new(self.gas_denom.clone(), min_gas * 2.0)],
                ));
            }
        }
        if top_ups.is_empty() {
            return Ok(());
        }

        let response = self.broadcast(&self.master, &top_ups).await?;
        info!(liquidators = top_ups.len(), tx_hash = %response.transaction_hash, "Gas topped up");
        Ok(())
    }

    /// Liquidate credit account `account_id` from `liquidator`'s credit account.
    #[instrument(skip(self))]
    pub async fn liquidate(&self, account_id: &str, liquidator: &str) -> Result<()> {
        let credit_account = self.credit_account(liquidator).ok_or(LiquidatorError::NoRoverData)?;
        let (positions, balances) = tokio::try_join!(
            self.querier().credit_account_positions(account_id),
            self.querier().balances(liquidator),
        )?;

        let prices = self.state.prices();
        let protocol = self.state.protocol();
        let whitelisted: HashSet<String> = protocol
            .params
            .values()
            .filter(|p| p.credit_manager.whitelisted)
            .map(|p| p.denom.clone())
            .collect();
        let vaults = self.vaults.load();

        let actions = self
            .generator
            .generate(RoverInput {
                positions: &positions,
                prices: &prices,
                markets: &protocol.markets,
                whitelisted: &whitelisted,
                vaults: &vaults,
            })
            .await?;

        let mut batch = vec![messages::update_credit_account(
            liquidator,
            self.credit_manager(),
            &credit_account,
            &actions,
        )];
        let neutral = self.generator.neutral_denom();
        let stable = balance_of(&balances, neutral);
        if liquidator != self.master && stable > self.config.rover.stable_balance_threshold {
            batch.push(messages::send(liquidator, &self.master, vec![Coin::new(neutral, stable)]));
        }

        let response = self.broadcast(liquidator, &batch).await?;
        info!(
            account_id,
            liquidator,
            credit_account = %credit_account,
            actions = actions.len(),
            tx_hash = %response.transaction_hash,
            "Credit account liquidated"
        );
        Ok(())
    }

    /// One tick. Returns the number of credit accounts liquidated.
    pub async fn run_once(&self) -> Result<usize> {
        self.state.refresh_due().await;
        if claim(&self.vaults_refreshed, self.config.rover.vault_refresh()) {
            if let Err(e) = self.refresh_vaults().await {
                warn!(error = %e, "Vault refresh failed, keeping previous");
            }
        }
        if claim(&self.gas_checked, self.config.rover.balance_refresh()) {
            if let Err(e) = self.top_up_gas().await {
                warn!(error = %e, "Gas top-up failed");
            }
        }

        let liquidators = self.liquidators();
        let limit = liquidators.len().min(self.config.executor.max_liquidators);
        let targets = self.feed.next_targets(limit).await?;
        if targets.is_empty() {
            return Ok(0);
        }

        let tasks = liquidators
            .iter()
            .zip(&targets)
            .map(|(liquidator, target)| async move {
                let result = self.liquidate(target, liquidator).await;
                (liquidator, target, result)
            });

        let mut executed = 0;
        for (liquidator, target, result) in join_all(tasks).await {
            match result {
                Ok(()) => executed += 1,
                Err(e) => error!(liquidator = %liquidator, account_id = %target, error = %e, "Liquidation failed"),
            }
        }

        if executed > 0 {
            if let Some(counter) = &self.counter {
                if let Err(e) = counter.increment_by(ROVER_EXECUTED_COUNTER, executed as u64).await {
                    warn!(error = %e, "Failed to report executed liquidations");
                }
            }
        }
        Ok(executed)
    }

    /// Run until the process stops. Failures are logged and the loop moves on.
    pub async fn run(&self) -> Result<()> {
        info!(feed = self.feed.feed_name(), "Starting credit manager liquidation loop");
        loop {
            match self.run_once().await {
                Ok(0) => tokio::time::sleep(self.config.executor.idle_backoff()).await,
                Ok(executed) => debug!(executed, "Tick complete"),
                Err(e) => {
                    error!(error = %e, "Liquidation tick failed");
                    tokio::time::sleep(self.config.executor.idle_backoff()).await;
                }
            }
        }
    }
}
