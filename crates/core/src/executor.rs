//! Red bank liquidation loop.
//!
//! Each tick refreshes whatever market data is due, withdraws any collateral
//! a previous tick left in the red bank, pulls targets from the candidate
//! feed and liquidates them. With sub-accounts configured, one target is
//! handed to each sub-account and they run concurrently; every task owns its
//! signer and its target, so nothing they write is shared.

use anyhow::{bail, Result};
use futures::future::join_all;
use liquidator_api::{CandidateFeed, LiquidationQueue, PoolProvider};
use liquidator_chain::{
    parse_liquidation_results, Asset, ChainClient, ChainMessage, Coin, Collateral, FeeEstimator,
    LiquidationResult, ProtocolQuerier, TxResponse, UserPosition,
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::batch::{BatchBuilder, CleanupInput};
use crate::config::BotConfig;
use crate::evaluator::{MarketView, PositionEvaluator, PriceMap};
use crate::market::MarketInfo;
use crate::router::AmmRouter;
use crate::state::MarketState;

/// Counter bumped with the number of liquidations executed per tick.
pub const EXECUTED_COUNTER: &str = "executor.liquidations.executed";

/// Liquidation worker for the red bank.
pub struct RedbankExecutor {
    client: Arc<dyn ChainClient>,
    fees: FeeEstimator,
    builder: BatchBuilder,
    evaluator: PositionEvaluator,
    feed: Arc<dyn CandidateFeed>,
    counter: Option<Arc<dyn LiquidationQueue>>,
    liquidator: String,
    sub_accounts: Vec<String>,
    config: BotConfig,
    state: MarketState,
}

impl RedbankExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ChainClient>,
        querier: ProtocolQuerier,
        fees: FeeEstimator,
        builder: BatchBuilder,
        router: Arc<AmmRouter>,
        feed: Arc<dyn CandidateFeed>,
        liquidator: impl Into<String>,
        config: BotConfig,
    ) -> Self {
        let evaluator = PositionEvaluator::new(builder.neutral_denom(), config.liquidation.clone());
        Self {
            client,
            fees,
            builder,
            evaluator,
            feed,
            counter: None,
            liquidator: liquidator.into(),
            sub_accounts: Vec::new(),
            state: MarketState::new(querier, router, config.clone()),
            config,
        }
    }

    pub fn with_pool_provider(mut self, provider: Arc<dyn PoolProvider>) -> Self {
        self.state.add_provider(provider);
        self
    }

    /// Liquidate from these sub-accounts, sweeping surplus to the main address.
    pub fn with_sub_accounts(mut self, sub_accounts: Vec<String>) -> Self {
        self.sub_accounts = sub_accounts;
        self
    }

    /// Report executed liquidations through this queue's counters.
    pub fn with_counter(mut self, counter: Arc<dyn LiquidationQueue>) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn prices(&self) -> Arc<PriceMap> {
        self.state.prices()
    }

    pub fn markets(&self) -> Vec<MarketInfo> {
        self.state.protocol().markets.clone()
    }

    fn querier(&self) -> &ProtocolQuerier {
        self.state.querier()
    }

    /// Run provider setup, then load every snapshot once.
    #[instrument(skip(self))]
    pub async fn initiate(&self) -> Result<()> {
        self.state.initiate().await?;

        info!(
            liquidator = %self.liquidator,
            sub_accounts = self.sub_accounts.len(),
            pools = self.state.router().pools().len(),
            prices = self.state.prices().len(),
            "Executor initiated"
        );
        Ok(())
    }

    /// Reload pools into the router, at most once per refresh window.
    pub async fn refresh_pools(&self) -> bool {
        self.state.refresh_pools().await
    }

    pub async fn fetch_position(&self, address: &str) -> Result<UserPosition> {
        let (collaterals, debts) = tokio::try_join!(
            self.querier().user_collaterals(address),
            self.querier().user_debts(address),
        )?;
        Ok(UserPosition {
            address: address.to_string(),
            collaterals,
            debts,
        })
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

    /// Liquidate `targets` from `account`.
    ///
    /// The liquidation transaction is sent first. Collateral clean-up is built
    /// from the red bank deposits and balances queried after it lands; a
    /// failed clean-up is logged and picked up again on a later tick.
    #[instrument(skip(self, targets, sweep_to), fields(targets = targets.len()))]
    pub async fn liquidate(
        &self,
        account: &str,
        targets: &[String],
        sweep_to: Option<&str>,
    ) -> Result<Vec<LiquidationResult>> {
        let fetched = join_all(targets.iter().map(|t| self.fetch_position(t))).await;
        let mut positions = Vec::with_capacity(fetched.len());
        for (target, result) in targets.iter().zip(fetched) {
            match result {
                Ok(position) => positions.push(position),
                Err(e) => warn!(user = %target, error = %e, "Failed to fetch position"),
            }
        }
        if positions.is_empty() {
            return Ok(Vec::new());
        }

        let prices = self.state.prices();
        let protocol = self.state.protocol();
        let balances = self.querier().balances(account).await?;
        let neutral_balance = balance_of(&balances, self.builder.neutral_denom());

        let market = MarketView {
            prices: &prices,
            params: &protocol.params,
            target_health_factor: protocol.target_health_factor,
        };
        let plan = self
            .evaluator
            .produce_liquidation_txs(&positions, market, neutral_balance)?;
        if plan.is_empty() {
            debug!(account, "Nothing to liquidate");
            return Ok(Vec::new());
        }

        let batch = self
            .builder
            .build_liquidation_batch(&plan, neutral_balance, &prices, &protocol.markets, account)
            .await?;
        if batch.is_empty() {
            warn!(account, "No liquidation could be funded");
            return Ok(Vec::new());
        }
        let response = self.broadcast(account, batch.messages()).await?;
        let results = parse_liquidation_results(&response);
        for result in &results {
            info!(
                account,
                collateral = %result.collateral_denom,
                collateral_received = %result.collateral_received,
                debt = %result.debt_denom,
                debt_repaid = %result.debt_repaid,
                block_height = result.block_height,
                tx_hash = %result.tx_hash,
                "Liquidation executed"
            );
        }

        if let Err(e) = self.clean_up(account, sweep_to).await {
            error!(account, error = %e, "Collateral clean-up failed");
        }
        Ok(results)
    }

    async fn clean_up(&self, account: &str, sweep_to: Option<&str>) -> Result<()> {
        let collaterals = self.querier().user_collaterals(account).await?;
        self.sweep_collaterals(account, collaterals, sweep_to).await
    }

    /// Withdraw `collaterals`, repay own debts and swap everything to neutral.
    async fn sweep_collaterals(
        &self,
        account: &str,
        collaterals: Vec<Collateral>,
        sweep_to: Option<&str>,
    ) -> Result<()> {
        let won: Vec<Asset> = collaterals
            .into_iter()
            .filter(|c| c.amount > 0.0)
            .map(|c| Asset::new(c.denom, c.amount))
            .collect();
        let (balances, own_debts) = tokio::try_join!(
            self.querier().balances(account),
            self.querier().user_debts(account),
        )?;
        let prices = self.state.prices();

        let batch = self
            .builder
            .build_collateral_batch(
                CleanupInput {
                    won_collaterals: &won,
                    balances: &balances,
                    own_debts: &own_debts,
                    prices: &prices,
                    sweep_to,
                },
                account,
            )
            .await?;
        if batch.is_empty() {
            return Ok(());
        }

        let response = self.broadcast(account, batch.messages()).await?;
        info!(
            account,
            messages = batch.len(),
            tx_hash = %response.transaction_hash,
            "Collateral swapped to neutral"
        );
        Ok(())
    }

    /// Withdraw collateral still deposited by any of our accounts.
    ///
    /// A clean-up that failed after its liquidation landed leaves the won
    /// collateral in the red bank; this is where it is picked up again.
    async fn recover_collaterals(&self) {
        let master = self.liquidator.as_str();
        let accounts = std::iter::once((master, None))
            .chain(self.sub_accounts.iter().map(|a| (a.as_str(), Some(master))));

        let tasks = accounts.map(|(account, sweep_to)| async move {
            let result = self.recover_account(account, sweep_to).await;
            (account, result)
        });
        for (account, result) in join_all(tasks).await {
            if let Err(e) = result {
                error!(account, error = %e, "Collateral recovery failed");
            }
        }
    }

    async fn recover_account(&self, account: &str, sweep_to: Option<&str>) -> Result<()> {
        let collaterals = self.querier().user_collaterals(account).await?;
        if !collaterals.iter().any(|c| c.amount > 0.0) {
            return Ok(());
        }
        warn!(
            account,
            denoms = ?collaterals.iter().map(|c| c.denom.as_str()).collect::<Vec<_>>(),
            "Collateral left in the red bank, withdrawing"
        );
        self.sweep_collaterals(account, collaterals, sweep_to).await
    }

    /// One tick. Returns the number of liquidations executed.
    pub async fn run_once(&self) -> Result<usize> {
        self.state.refresh_due().await;
        self.recover_collaterals().await;

        let executed = if self.sub_accounts.is_empty() {
            let targets = self.feed.next_targets(self.config.executor.max_liquidators).await?;
            if targets.is_empty() {
                return Ok(0);
            }
            self.liquidate(&self.liquidator, &targets, None).await?.len()
        } else {
            self.run_sub_accounts().await?
        };

        if executed > 0 {
            if let Some(counter) = &self.counter {
                if let Err(e) = counter.increment_by(EXECUTED_COUNTER, executed as u64).await {
                    warn!(error = %e, "Failed to report executed liquidations");
                }
            }
        }
        Ok(executed)
    }

    async fn run_sub_accounts(&self) -> Result<usize> {
        let limit = self.sub_accounts.len().min(self.config.executor.max_liquidators);
        let targets = self.feed.next_targets(limit).await?;
        if targets.is_empty() {
            return Ok(0);
        }

        let master = self.liquidator.as_str();
        let tasks = self
            .sub_accounts
            .iter()
            .zip(&targets)
            .map(|(account, target)| async move {
                let result = self
                    .liquidate(account, std::slice::from_ref(target), Some(master))
                    .await;
                (account, target, result)
            });

        let mut executed = 0;
        for (account, target, result) in join_all(tasks).await {
            match result {
                Ok(results) => executed += results.len(),
                Err(e) => error!(account = %account, user = %target, error = %e, "Liquidation failed"),
            }
        }
        Ok(executed)
    }

    /// Run until the process stops. Failures are logged and the loop moves on.
    pub async fn run(&self) -> Result<()> {
        info!(feed = self.feed.feed_name(), "Starting liquidation loop");
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

pub(crate) fn balance_of(balances: &[Coin], denom: &str) -> f64 {
    balances
        .iter()
        .find(|c| c.denom == denom)
        .map_or(0.0, Coin::amount_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use liquidator_api::{InMemoryQueue, QueueCandidateFeed};
    use liquidator_chain::{
        EventAttribute, Fee, FixedGasPrice, OsmosisExchange, Pool, PoolAsset, ProtocolContracts,
        TxEvent, TxResponse,
    };
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MASTER: &str = "osmo1master";

    /// In-memory red bank, oracle and signer.
    ///
    /// Liquidations credit the sender with a red bank deposit and withdraws
    /// remove it, as on chain.
    struct MockChain {
        balances: HashMap<String, Vec<Coin>>,
        positions: HashMap<String, (Value, Value)>,
        deposits: Mutex<HashMap<String, Vec<(String, f64)>>>,
        broadcasts: Mutex<Vec<(String, Vec<ChainMessage>)>>,
        fail_code: u32,
        /// Number of upcoming withdraw transactions to reject.
        fail_withdraws: AtomicUsize,
    }

    impl MockChain {
        fn new() -> Self {
            let mut positions = HashMap::new();
            for user in ["osmo1alice", "osmo1bob"] {
                positions.insert(
                    user.to_string(),
                    (
                        json!([{ "denom": "uatom", "amount": "1000000", "enabled": true }]),
                        json!([{ "denom": "uosmo", "amount": "7500000" }]),
                    ),
                );
            }
            let funded = vec![Coin::new("uusdc", 6e9), Coin::new("uosmo", 5e8)];
            let balances = ["osmo1master", "osmo1sub1", "osmo1sub2"]
                .into_iter()
                .map(|a| (a.to_string(), funded.clone()))
                .collect();
            Self {
                balances,
                positions,
                deposits: Mutex::new(HashMap::new()),
                broadcasts: Mutex::new(Vec::new()),
                fail_code: 0,
                fail_withdraws: AtomicUsize::new(0),
            }
        }

        fn broadcasts(&self) -> Vec<(String, Vec<ChainMessage>)> {
            self.broadcasts.lock().clone()
        }

        fn deposit(&self, account: &str, denom: &str, amount: f64) {
            self.deposits
                .lock()
                .entry(account.to_string())
                .or_default()
                .push((denom.to_string(), amount));
        }

        fn deposited(&self, account: &str) -> f64 {
            self.deposits
                .lock()
                .get(account)
                .map_or(0.0, |d| d.iter().map(|(_, amount)| amount).sum())
        }

        fn apply(&self, sender: &str, messages: &[ChainMessage]) {
            for message in messages {
                let ChainMessage::ExecuteContract { msg, .. } = message else {
                    continue;
                };
                if let Some(liquidate) = msg.get("liquidate") {
                    let denom = liquidate["collateral_denom"].as_str().unwrap_or_default();
                    self.deposit(sender, denom, 900_000.0);
                }
                if let Some(withdraw) = msg.get("withdraw") {
                    let denom = withdraw["denom"].as_str().unwrap_or_default();
                    if let Some(deposits) = self.deposits.lock().get_mut(sender) {
                        deposits.retain(|(d, _)| d != denom);
                    }
                }
            }
        }
    }

    fn curve() -> Value {
        json!({ "starting_lb": "0.01", "slope": "2", "min_lb": "0.02", "max_lb": "0.1" })
    }

    fn market(denom: &str) -> Value {
        json!({
            "denom": denom,
            "collateral_total_scaled": "1000000000000000000",
            "debt_total_scaled": "0",
            "liquidity_index": "1",
            "borrow_index": "1"
        })
    }

    #[async_trait]
    impl ChainClient for MockChain {
        async fn query_contract_smart(&self, _contract: &str, msg: &Value) -> Result<Value> {
            let denoms = ["uatom", "uosmo", "uusdc"];
            if msg.get("markets").is_some() {
                return Ok(Value::Array(denoms.iter().map(|d| market(d)).collect()));
            }
            if msg.get("all_asset_params").is_some() {
                return Ok(Value::Array(
                    denoms
                        .iter()
                        .map(|d| {
                            json!({
                                "denom": d,
                                "max_loan_to_value": "0.75",
                                "liquidation_threshold": "0.8",
                                "liquidation_bonus": curve(),
                            })
                        })
                        .collect(),
                ));
            }
            if msg.get("price_sources").is_some() {
                return Ok(Value::Array(denoms.iter().map(|d| json!({ "denom": d })).collect()));
            }
            if let Some(query) = msg.get("price") {
                let denom = query["denom"].as_str().unwrap_or_default();
                let price = if denom == "uatom" { "8" } else { "1" };
                return Ok(json!({ "denom": denom, "price": price }));
            }
            if msg.get("target_health_factor").is_some() {
                return Ok(json!("1.2"));
            }
            if let Some(query) = msg.get("user_collaterals") {
                let user = query["user"].as_str().unwrap_or_default();
                if let Some(position) = self.positions.get(user) {
                    return Ok(position.0.clone());
                }
                let deposits = self.deposits.lock().get(user).cloned().unwrap_or_default();
                return Ok(Value::Array(
                    deposits
                        .iter()
                        .map(|(denom, amount)| json!({ "denom": denom, "amount": amount.to_string(), "enabled": true }))
                        .collect(),
                ));
            }
            if let Some(query) = msg.get("user_debts") {
                let user = query["user"].as_str().unwrap_or_default();
                return Ok(self.positions.get(user).map_or(json!([]), |p| p.1.clone()));
            }
            bail!("unexpected query {msg}")
        }

        async fn get_all_balances(&self, address: &str) -> Result<Vec<Coin>> {
            Ok(self.balances.get(address).cloned().unwrap_or_default())
        }

        async fn simulate(&self, _address: &str, _messages: &[ChainMessage]) -> Result<u64> {
            Ok(500_000)
        }

        async fn sign_and_broadcast(&self, address: &str, messages: &[ChainMessage], _fee: Fee) -> Result<TxResponse> {
            self.broadcasts
                .lock()
                .push((address.to_string(), messages.to_vec()));

            let withdraws = messages.iter().any(|m| m.action() == Some("withdraw"));
            let reject_withdraw = withdraws
                && self
                    .fail_withdraws
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            let code = if reject_withdraw { 5 } else { self.fail_code };
            if code == 0 {
                self.apply(address, messages);
            }

            let events = messages
                .iter()
                .filter_map(|m| match m {
                    ChainMessage::ExecuteContract { msg, .. } => msg.get("liquidate"),
                    _ => None,
                })
                .map(|liquidate| TxEvent {
                    kind: "wasm".to_string(),
                    attributes: [
                        ("action", "liquidate"),
                        ("collateral_denom", liquidate["collateral_denom"].as_str().unwrap_or_default()),
                        ("debt_denom", "uosmo"),
                        ("collateral_amount", "900000"),
                        ("debt_amount", "7000000"),
                    ]
                    .into_iter()
                    .map(|(key, value)| EventAttribute {
                        key: key.to_string(),
                        value: value.to_string(),
                    })
                    .collect(),
                })
                .collect();

            Ok(TxResponse {
                height: 42,
                transaction_hash: format!("TX{}", self.broadcasts.lock().len()),
                code,
                raw_log: String::new(),
                events,
            })
        }
    }

    struct StaticPools {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl PoolProvider for StaticPools {
        fn provider_name(&self) -> &str {
            "static"
        }

        async fn load_pools(&self) -> Result<Vec<Pool>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                Pool::xyk(1, PoolAsset::new("uosmo", 1e12), PoolAsset::new("uusdc", 1e12), 0.002),
                Pool::xyk(2, PoolAsset::new("uatom", 1e12), PoolAsset::new("uusdc", 8e12), 0.002),
                // too shallow to route through
                Pool::xyk(3, PoolAsset::new("uatom", 10.0), PoolAsset::new("uosmo", 80.0), 0.002),
            ])
        }
    }

    fn executor(chain: Arc<MockChain>, queue: Arc<InMemoryQueue>, pools: Arc<StaticPools>) -> RedbankExecutor {
        let router = Arc::new(AmmRouter::default());
        let config = BotConfig::default();
        let builder = BatchBuilder::new(
            Arc::clone(&router) as Arc<dyn liquidator_api::RouteRequester>,
            Arc::new(OsmosisExchange),
            "osmo1redbank",
            "uusdc",
            "uosmo",
            config.liquidation.clone(),
        )
        .with_borrow_router(Arc::clone(&router));
        let querier = ProtocolQuerier::new(chain.clone(), ProtocolContracts::default());
        let fees = FeeEstimator::new(Arc::new(FixedGasPrice(0.025)), "uosmo");

        RedbankExecutor::new(
            chain,
            querier,
            fees,
            builder,
            router,
            Arc::new(QueueCandidateFeed::new(queue.clone())),
            MASTER,
            config,
        )
        .with_pool_provider(pools)
        .with_counter(queue)
    }

    fn pools() -> Arc<StaticPools> {
        Arc::new(StaticPools {
            loads: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_initiate_loads_snapshots() {
        let executor = executor(Arc::new(MockChain::new()), Arc::new(InMemoryQueue::new()), pools());
        executor.initiate().await.unwrap();

        assert_eq!(executor.prices().get("uatom"), Some(&8.0));
        assert_eq!(executor.markets().len(), 3);
        // the shallow pool is filtered out
        assert_eq!(executor.state.router().pools().len(), 2);
    }

    #[tokio::test]
    async fn test_pool_refresh_is_windowed() {
        let pools = pools();
        let executor = executor(Arc::new(MockChain::new()), Arc::new(InMemoryQueue::new()), pools.clone());
        executor.initiate().await.unwrap();

        assert!(!executor.refresh_pools().await);
        assert_eq!(pools.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_idle_tick() {
        let executor = executor(Arc::new(MockChain::new()), Arc::new(InMemoryQueue::new()), pools());
        executor.initiate().await.unwrap();
        assert_eq!(executor.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_liquidation_then_clean_up() {
        let chain = Arc::new(MockChain::new());
        let queue = Arc::new(InMemoryQueue::new());
        queue.push("osmo1alice");
        let executor = executor(chain.clone(), queue.clone(), pools());
        executor.initiate().await.unwrap();

        assert_eq!(executor.run_once().await.unwrap(), 1);

        let broadcasts = chain.broadcasts();
        assert_eq!(broadcasts.len(), 2);

        let (sender, liquidation) = &broadcasts[0];
        assert_eq!(sender, MASTER);
        assert!(liquidation[0].is_swap());
        assert_eq!(liquidation.last().and_then(|m| m.action()), Some("liquidate"));

        let (_, clean_up) = &broadcasts[1];
        assert_eq!(clean_up[0].action(), Some("withdraw"));
        assert!(clean_up.iter().any(|m| m.is_swap()));
        assert_eq!(queue.counter(EXECUTED_COUNTER), 1);
        assert_eq!(chain.deposited(MASTER), 0.0);
    }

    #[tokio::test]
    async fn test_stranded_collateral_withdrawn_on_idle_tick() {
        let chain = Arc::new(MockChain::new());
        chain.deposit(MASTER, "uatom", 5_000_000.0);
        let executor = executor(chain.clone(), Arc::new(InMemoryQueue::new()), pools());
        executor.initiate().await.unwrap();

        for _ in 0..3 {
            assert_eq!(executor.run_once().await.unwrap(), 0);
        }

        let broadcasts = chain.broadcasts();
        assert_eq!(broadcasts.len(), 1);
        let (sender, messages) = &broadcasts[0];
        assert_eq!(sender, MASTER);
        assert_eq!(messages[0].action(), Some("withdraw"));
        assert!(messages.iter().any(|m| m.is_swap()));
        assert_eq!(chain.deposited(MASTER), 0.0);
    }

    #[tokio::test]
    async fn test_failed_clean_up_recovered_next_tick() {
        let chain = Arc::new(MockChain::new());
        chain.fail_withdraws.store(1, Ordering::SeqCst);
        let queue = Arc::new(InMemoryQueue::new());
        queue.push("osmo1alice");
        let executor = executor(chain.clone(), queue.clone(), pools());
        executor.initiate().await.unwrap();

        // the liquidation lands, its clean-up is rejected
        assert_eq!(executor.run_once().await.unwrap(), 1);
        assert_eq!(chain.broadcasts().len(), 2);
        assert_eq!(chain.deposited(MASTER), 900_000.0);

        assert_eq!(executor.run_once().await.unwrap(), 0);
        let broadcasts = chain.broadcasts();
        assert_eq!(broadcasts.len(), 3);
        assert_eq!(broadcasts[2].1[0].action(), Some("withdraw"));
        assert_eq!(chain.deposited(MASTER), 0.0);

        assert_eq!(executor.run_once().await.unwrap(), 0);
        assert_eq!(chain.broadcasts().len(), 3);
    }

    #[tokio::test]
    async fn test_sub_account_collateral_swept_to_master() {
        let chain = Arc::new(MockChain::new());
        chain.deposit("osmo1sub2", "uatom", 2_000_000.0);
        let executor = executor(chain.clone(), Arc::new(InMemoryQueue::new()), pools())
            .with_sub_accounts(vec!["osmo1sub1".to_string(), "osmo1sub2".to_string()]);
        executor.initiate().await.unwrap();

        assert_eq!(executor.run_once().await.unwrap(), 0);

        let broadcasts = chain.broadcasts();
        assert_eq!(broadcasts.len(), 1);
        let (sender, messages) = &broadcasts[0];
        assert_eq!(sender, "osmo1sub2");
        assert_eq!(messages[0].action(), Some("withdraw"));
        // the sub-account holds 6e9 uusdc, above the stable threshold
        assert!(messages
            .iter()
            .any(|m| matches!(m, ChainMessage::Send { to_address, .. } if to_address == MASTER)));
    }

    #[tokio::test]
    async fn test_failed_liquidation_skips_clean_up() {
        let mut mock = MockChain::new();
        mock.fail_code = 5;
        let chain = Arc::new(mock);
        let queue = Arc::new(InMemoryQueue::new());
        queue.push("osmo1alice");
        let executor = executor(chain.clone(), queue.clone(), pools());
        executor.initiate().await.unwrap();

        assert!(executor.run_once().await.is_err());
        assert_eq!(chain.broadcasts().len(), 1);
        assert_eq!(queue.counter(EXECUTED_COUNTER), 0);
    }

    #[tokio::test]
    async fn test_sub_accounts_fan_out() {
        let chain = Arc::new(MockChain::new());
        let queue = Arc::new(InMemoryQueue::new());
        queue.extend(["osmo1alice".to_string(), "osmo1bob".to_string()]);
        let executor = executor(chain.clone(), queue.clone(), pools())
            .with_sub_accounts(vec!["osmo1sub1".to_string(), "osmo1sub2".to_string()]);
        executor.initiate().await.unwrap();

        assert_eq!(executor.run_once().await.unwrap(), 2);

        let broadcasts = chain.broadcasts();
        let senders: HashSet<&str> = broadcasts.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(senders, HashSet::from(["osmo1sub1", "osmo1sub2"]));
        assert!(queue.is_empty());
        assert_eq!(queue.counter(EXECUTED_COUNTER), 2);

        // surplus above the stable threshold goes to the main account
        let swept = broadcasts
            .iter()
            .flat_map(|(_, messages)| messages)
            .filter(|m| matches!(m, ChainMessage::Send { to_address, .. } if to_address == MASTER))
            .count();
        assert_eq!(swept, 2);
    }
}
