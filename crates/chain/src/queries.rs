//! Red bank, oracle, params and credit manager queries.

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::client::ChainClient;
use crate::credit::{CreditPositions, VaultConfig, VaultInfo, REDEEM_BASE};
use crate::types::{decimal, AssetParams, Coin, Collateral, Debt, Market, PriceResponse, PriceSource};

/// Addresses of the protocol contracts the engine talks to.
#[derive(Debug, Clone, Default)]
pub struct ProtocolContracts {
    pub redbank: String,
    pub oracle: String,
    pub params: String,
    pub credit_manager: String,
    pub account_nft: String,
}

/// Retry policy for paginated fetches.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delay: Duration::from_secs(5),
        }
    }
}

/// Page sizes used against each contract.
const MARKETS_PAGE: usize = 5;
const ASSET_PARAMS_PAGE: usize = 5;
const PRICE_SOURCES_PAGE: usize = 10;
const VAULT_CONFIGS_PAGE: usize = 5;

#[derive(Deserialize)]
struct TokensResponse {
    tokens: Vec<String>,
}

#[derive(Deserialize)]
struct VaultInfoResponse {
    base_token: String,
    vault_token: String,
}

/// Typed queries over a [`ChainClient`].
#[derive(Clone)]
pub struct ProtocolQuerier {
    client: Arc<dyn ChainClient>,
    contracts: ProtocolContracts,
    retry: RetryPolicy,
}

impl ProtocolQuerier {
    pub fn new(client: Arc<dyn ChainClient>, contracts: ProtocolContracts) -> Self {
        Self {
            client,
            contracts,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn contracts(&self) -> &ProtocolContracts {
        &self.contracts
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    async fn query<T: DeserializeOwned>(&self, contract: &str, msg: Value) -> Result<T> {
        let data = self.client.query_contract_smart(contract, &msg).await?;
        serde_json::from_value(data).with_context(|| format!("Unexpected response to {}", msg))
    }

    /// Fetch every page of a `start_after`/`limit` query keyed by denom.
    ///
    /// A page is retried up to the policy's limit; running out of retries
    /// fails the whole fetch so callers keep their previous data.
    async fn paginate<T, F>(
        &self,
        contract: &str,
        query_name: &str,
        limit: usize,
        denom_of: F,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> &str,
    {
        let mut items: Vec<T> = Vec::new();
        let mut start_after = String::new();
        let mut retries = 0;

        loop {
            let msg = json!({ query_name: { "limit": limit, "start_after": start_after } });
            match self.query::<Vec<T>>(contract, msg).await {
                Ok(page) => {
                    retries = 0;
                    let full_page = page.len() == limit;
                    if let Some(last) = page.last() {
                        start_after = denom_of(last).to_string();
                    }
                    items.extend(page);
                    if !full_page {
                        break;
                    }
                }
                Err(e) => {
                    retries += 1;
                    if retries > self.retry.max_retries {
                        warn!(query = query_name, retries, "Max retries exceeded");
                        return Err(e);
                    }
                    warn!(query = query_name, retries, error = %e, "Query failed, retrying");
                    tokio::time::sleep(self.retry.delay).await;
                }
            }
        }

        debug!(query = query_name, count = items.len(), "Fetched all pages");
        Ok(items)
    }

    #[instrument(skip(self))]
    pub async fn markets(&self) -> Result<Vec<Market>> {
        self.paginate(&self.contracts.redbank, "markets", MARKETS_PAGE, |m: &Market| {
            m.denom.as_str()
        })
        .await
    }

    pub async fn market(&self, denom: &str) -> Result<Market> {
        self.query(&self.contracts.redbank, json!({ "market": { "denom": denom } }))
            .await
    }

    #[instrument(skip(self))]
    pub async fn all_asset_params(&self) -> Result<Vec<AssetParams>> {
        self.paginate(
            &self.contracts.params,
            "all_asset_params",
            ASSET_PARAMS_PAGE,
            |p: &AssetParams| p.denom.as_str(),
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn price_sources(&self) -> Result<Vec<PriceSource>> {
        self.paginate(
            &self.contracts.oracle,
            "price_sources",
            PRICE_SOURCES_PAGE,
            |s: &PriceSource| s.denom.as_str(),
        )
        .await
    }

    pub async fn price(&self, denom: &str) -> Result<PriceResponse> {
        self.query(&self.contracts.oracle, json!({ "price": { "denom": denom } }))
            .await
    }

    /// Prices for every denom. Denoms whose price query fails are skipped.
    #[instrument(skip(self, denoms), fields(denoms = denoms.len()))]
    pub async fn prices(&self, denoms: &[String]) -> Vec<PriceResponse> {
        let results = join_all(denoms.iter().map(|d| self.price(d))).await;
        let mut prices = Vec::with_capacity(results.len());
        for (denom, result) in denoms.iter().zip(results) {
            match result {
                Ok(price) => prices.push(price),
                Err(e) => warn!(denom = %denom, error = %e, "Failed to fetch oracle price"),
            }
        }
        info!(fetched = prices.len(), "Oracle prices updated");
        prices
    }

    pub async fn user_collaterals(&self, user: &str) -> Result<Vec<Collateral>> {
        self.query(
            &self.contracts.redbank,
            json!({ "user_collaterals": { "user": user } }),
        )
        .await
    }

    pub async fn user_debts(&self, user: &str) -> Result<Vec<Debt>> {
        self.query(&self.contracts.redbank, json!({ "user_debts": { "user": user } }))
            .await
    }

    pub async fn target_health_factor(&self) -> Result<f64> {
        let value: Value = self
            .query(&self.contracts.params, json!({ "target_health_factor": {} }))
            .await?;
        decimal::deserialize(value).context("Invalid target health factor")
    }

    pub async fn balances(&self, address: &str) -> Result<Vec<Coin>> {
        self.client.get_all_balances(address).await
    }

    pub async fn credit_account_positions(&self, account_id: &str) -> Result<CreditPositions> {
        self.query(
            &self.contracts.credit_manager,
            json!({ "positions": { "account_id": account_id } }),
        )
        .await
    }

    /// Credit account ids owned by `owner`.
    pub async fn owned_credit_accounts(&self, owner: &str) -> Result<Vec<String>> {
        let response: TokensResponse = self
            .query(&self.contracts.account_nft, json!({ "tokens": { "owner": owner } }))
            .await?;
        Ok(response.tokens)
    }

    #[instrument(skip(self))]
    pub async fn vault_configs(&self) -> Result<Vec<VaultConfig>> {
        self.paginate(
            &self.contracts.params,
            "all_vault_configs",
            VAULT_CONFIGS_PAGE,
            |v: &VaultConfig| v.addr.as_str(),
        )
        .await
    }

    /// Vault tokens and the LP tokens one vault share redeems for.
    pub async fn vault_info(&self, address: &str) -> Result<VaultInfo> {
        let redeem_base = format!("{REDEEM_BASE:.0}");
        let (info, redeemed) = tokio::try_join!(
            self.query::<VaultInfoResponse>(address, json!({ "info": {} })),
            self.query::<Value>(address, json!({ "preview_redeem": { "amount": redeem_base } })),
        )?;
        let redeemed = decimal::deserialize(redeemed).context("Invalid preview_redeem response")?;

        Ok(VaultInfo {
            address: address.to_string(),
            base_token: info.base_token,
            vault_token: info.vault_token,
            lp_share_ratio: redeemed / REDEEM_BASE,
        })
    }
}
