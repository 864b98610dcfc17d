//! Astroport factory pair provider.

use super::{FetchRetry, PoolProvider};
use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::future::join_all;
use liquidator_chain::types::decimal;
use liquidator_chain::{ChainClient, ConcentratedState, LiquidityDepths, Pool, PoolAsset};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Fee applied to Astroport constant product pairs.
const XYK_FEE: f64 = 0.003;
const PAIRS_PAGE: usize = 10;

/// Asset identifier in Astroport messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetInfo {
    Token { contract_addr: String },
    NativeToken { denom: String },
}

impl AssetInfo {
    pub fn denom(&self) -> &str {
        match self {
            AssetInfo::Token { contract_addr } => contract_addr,
            AssetInfo::NativeToken { denom } => denom,
        }
    }
}

/// Pair type as reported by the factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairType {
    Xyk {},
    Stable {},
    #[serde(alias = "custom")]
    Concentrated(Value),
}

/// A factory pair.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Pair {
    pub asset_infos: Vec<AssetInfo>,
    pub contract_addr: String,
    pub pair_type: PairType,
}

/// Loads Astroport pairs and their reserves through contract queries.
pub struct AstroportPoolProvider {
    client: Arc<dyn ChainClient>,
    factory: String,
    pairs: RwLock<Vec<Pair>>,
    retry: FetchRetry,
}

impl std::fmt::Debug for AstroportPoolProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AstroportPoolProvider")
            .field("factory", &self.factory)
            .field("pairs", &self.pairs.read().len())
            .finish()
    }
}

impl AstroportPoolProvider {
    pub fn new(client: Arc<dyn ChainClient>, factory: impl Into<String>) -> Self {
        Self {
            client,
            factory: factory.into(),
            pairs: RwLock::new(Vec::new()),
            retry: FetchRetry::new(8, Duration::from_secs(1)),
        }
    }

    pub fn with_retry(mut self, retry: FetchRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn set_pairs(&self, pairs: Vec<Pair>) {
        *self.pairs.write() = pairs;
    }

    pub fn pairs(&self) -> Vec<Pair> {
        self.pairs.read().clone()
    }

    async fn fetch_pairs_page(&self, start_after: Option<&[AssetInfo]>) -> Result<Vec<Pair>> {
        let msg = json!({ "pairs": { "limit": PAIRS_PAGE, "start_after": start_after } });
        let data = self.client.query_contract_smart(&self.factory, &msg).await?;
        let body: PairsResponse = serde_json::from_value(data)?;
        Ok(body.pairs)
    }

    /// Walk the factory's pair list. Pages that keep failing end the walk
    /// with what was collected so far.
    #[instrument(skip(self))]
    pub async fn fetch_pairs(&self) -> Vec<Pair> {
        let mut pairs: Vec<Pair> = Vec::new();
        loop {
            let start_after = pairs.last().map(|p| p.asset_infos.clone());
            let page = self
                .retry
                .run("astroport pairs", || self.fetch_pairs_page(start_after.as_deref()))
                .await;

            match page {
                Some(page) if !page.is_empty() => {
                    let full = page.len() == PAIRS_PAGE;
                    pairs.extend(page);
                    if !full {
                        break;
                    }
                }
                Some(_) => break,
                None => {
                    warn!(collected = pairs.len(), "Pair fetch exhausted retries");
                    break;
                }
            }
        }
        debug!(pairs = pairs.len(), "Fetched Astroport pairs");
        pairs
    }

    async fn fetch_reserves(&self, pair: &Pair) -> Result<Vec<PoolAsset>> {
        let data = self
            .client
            .query_contract_smart(&pair.contract_addr, &json!({ "pool": {} }))
            .await?;
        let body: PoolResponse = serde_json::from_value(data)?;
        Ok(body
            .assets
            .into_iter()
            .map(|a| PoolAsset::new(a.info.denom(), a.amount))
            .collect())
    }
}

/// Build a pool from a pair and its reserves.
fn pair_to_pool(index: usize, pair: &Pair, reserves: Vec<PoolAsset>) -> Option<Pool> {
    let id = index as u64;
    let pool = match &pair.pair_type {
        PairType::Xyk {} => {
            let mut assets = reserves.into_iter();
            let first = assets.next()?;
            let second = assets.next()?;
            Pool::xyk(id, first, second, XYK_FEE)
        }
        PairType::Stable {} => Pool::stableswap(id, reserves, XYK_FEE),
        PairType::Concentrated(_) => {
            let token0 = pair.asset_infos.first()?.denom().to_string();
            let token1 = pair.asset_infos.get(1)?.denom().to_string();
            Pool::concentrated(
                id,
                token0,
                token1,
                XYK_FEE,
                ConcentratedState {
                    current_tick_liquidity: 0.0,
                    current_sqrt_price: 0.0,
                    current_tick: 0,
                    liquidity_depths: LiquidityDepths::default(),
                },
            )
        }
    };
    Some(pool.with_address(&pair.contract_addr))
}

#[async_trait]
impl PoolProvider for AstroportPoolProvider {
    fn provider_name(&self) -> &str {
        "astroport"
    }

    async fn initiate(&self) -> Result<()> {
        let pairs = self.fetch_pairs().await;
        info!(pairs = pairs.len(), factory = %self.factory, "Astroport pairs loaded");
        self.set_pairs(pairs);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_pools(&self) -> Result<Vec<Pool>> {
        let pairs = self.pairs();
        if pairs.is_empty() {
            bail!("Pools still not loaded. Ensure you have called initiate()");
        }

        let reserves = join_all(pairs.iter().map(|pair| self.fetch_reserves(pair))).await;

        let pools: Vec<Pool> = pairs
            .iter()
            .zip(reserves)
            .enumerate()
            .filter_map(|(index, (pair, reserves))| match reserves {
                Ok(reserves) => pair_to_pool(index, pair, reserves),
                Err(e) => {
                    debug!(pair = %pair.contract_addr, error = %e, "Skipping pair without reserves");
                    None
                }
            })
            .collect();

        info!(pools = pools.len(), "Loaded Astroport pools");
        Ok(pools)
    }
}

// Contract response types

#[derive(Debug, Deserialize)]
struct PairsResponse {
    pairs: Vec<Pair>,
}

#[derive(Debug, Deserialize)]
struct PoolResponse {
    assets: Vec<ReserveAsset>,
}

#[derive(Debug, Deserialize)]
struct ReserveAsset {
    info: AssetInfo,
    #[serde(with = "decimal")]
    amount: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquidator_chain::{ChainMessage, Coin, Fee, TxResponse};

    /// Factory with 12 xyk pairs; every pair holds 1000/2000 reserves.
    struct FakeChain;

    fn pair_json(i: usize) -> Value {
        json!({
            "asset_infos": [
                {"native_token": {"denom": format!("denom{:02}", i)}},
                {"token": {"contract_addr": "neutron1astro"}}
            ],
            "contract_addr": format!("neutron1pair{:02}", i),
            "liquidity_token": "lp",
            "pair_type": {"xyk": {}}
        })
    }

    #[async_trait]
    impl ChainClient for FakeChain {
        async fn query_contract_smart(&self, contract: &str, msg: &Value) -> Result<Value> {
            if contract == "factory" {
                let start = match msg["pairs"]["start_after"].as_array() {
                    None => 0,
                    Some(infos) => {
                        let denom = infos[0]["native_token"]["denom"].as_str().unwrap_or("");
                        denom.trim_start_matches("denom").parse::<usize>().unwrap_or(0) + 1
                    }
                };
                let pairs: Vec<Value> = (start..12usize.min(start + PAIRS_PAGE)).map(pair_json).collect();
                return Ok(json!({ "pairs": pairs }));
            }
            if contract == "neutron1pair03" {
                bail!("pair query failed");
            }
            Ok(json!({
                "assets": [
                    {"info": {"native_token": {"denom": "x"}}, "amount": "1000"},
                    {"info": {"token": {"contract_addr": "neutron1astro"}}, "amount": "2000"}
                ],
                "total_share": "1414"
            }))
        }

        async fn get_all_balances(&self, _address: &str) -> Result<Vec<Coin>> {
            Ok(vec![])
        }

        async fn simulate(&self, _address: &str, _messages: &[ChainMessage]) -> Result<u64> {
            Ok(0)
        }

        async fn sign_and_broadcast(&self, _address: &str, _messages: &[ChainMessage], _fee: Fee) -> Result<TxResponse> {
            Ok(TxResponse::default())
        }
    }

    #[tokio::test]
    async fn test_load_before_initiate_fails() {
        let provider = AstroportPoolProvider::new(Arc::new(FakeChain), "factory");
        assert!(provider.load_pools().await.is_err());
    }

    #[tokio::test]
    async fn test_initiate_paginates_and_loads_reserves() {
        let provider = AstroportPoolProvider::new(Arc::new(FakeChain), "factory");
        provider.initiate().await.unwrap();
        assert_eq!(provider.pairs().len(), 12);

        let pools = provider.load_pools().await.unwrap();
        assert_eq!(pools.len(), 11);
        assert_eq!(pools[0].address, "neutron1pair00");
        assert_eq!(pools[0].token1, "neutron1astro");
        assert_eq!(pools[0].reserve("neutron1astro"), Some(2000.0));
        assert!((pools[0].swap_fee - 0.003).abs() < 1e-12);
    }

    #[test]
    fn test_pair_type_parsing() {
        let stable: PairType = serde_json::from_str(r#"{"stable": {}}"#).unwrap();
        assert_eq!(stable, PairType::Stable {});
        let custom: PairType = serde_json::from_str(r#"{"custom": "concentrated"}"#).unwrap();
        assert!(matches!(custom, PairType::Concentrated(_)));
    }
}
