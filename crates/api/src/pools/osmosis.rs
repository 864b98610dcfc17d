//! Osmosis pool manager provider.

use super::{FetchRetry, PoolProvider};
use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::future::join_all;
use liquidator_chain::types::{decimal, integer};
use liquidator_chain::{ConcentratedState, LiquidityDepth, LiquidityDepths, Pool, PoolAsset, PoolKind};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Tick bounds used when walking liquidity in each direction.
const MIN_TICK: i64 = -162_000_000;
const MAX_TICK: i64 = 342_000_000;

/// Loads every pool from the Osmosis LCD.
#[derive(Debug, Clone)]
pub struct OsmosisPoolProvider {
    client: reqwest::Client,
    lcd_url: String,
    retry: FetchRetry,
}

impl OsmosisPoolProvider {
    pub fn new(lcd_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            lcd_url: lcd_url.into().trim_end_matches('/').to_string(),
            retry: FetchRetry::new(5, Duration::ZERO),
        }
    }

    pub fn with_retry(mut self, retry: FetchRetry) -> Self {
        self.retry = retry;
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            bail!("Osmosis LCD error: {} ({})", response.status(), url);
        }
        Ok(response.json().await?)
    }

    /// Fetch and classify all pools. Each attempt starts from an empty set.
    async fn fetch_all_pools(&self) -> Result<Vec<Pool>> {
        let url = format!("{}/osmosis/poolmanager/v1beta1/all-pools", self.lcd_url);
        let body: AllPoolsResponse = self.get_json(&url).await?;
        Ok(body.pools.into_iter().filter_map(RawPool::into_pool).collect())
    }

    async fn fetch_depths(&self, pool_id: u64, token_in: &str, bound_tick: i64) -> Vec<LiquidityDepth> {
        let url = format!(
            "{}/osmosis/concentratedliquidity/v1beta1/liquidity_net_in_direction?pool_id={}&token_in={}&use_cur_tick=true&bound_tick={}",
            self.lcd_url, pool_id, token_in, bound_tick
        );
        match self.get_json::<DepthsResponse>(&url).await {
            Ok(body) => body.liquidity_depths,
            Err(e) => {
                debug!(pool_id, token_in, error = %e, "Failed to fetch tick depths");
                Vec::new()
            }
        }
    }

    /// Fill in tick depths for a concentrated pool.
    async fn with_tick_data(&self, mut pool: Pool) -> Pool {
        if !matches!(pool.kind, PoolKind::ConcentratedLiquidity(_)) {
            return pool;
        }

        let zero_to_one = self.fetch_depths(pool.id.0, &pool.token0, MIN_TICK).await;
        let one_to_zero = self.fetch_depths(pool.id.0, &pool.token1, MAX_TICK).await;
        if let PoolKind::ConcentratedLiquidity(state) = &mut pool.kind {
            state.liquidity_depths = LiquidityDepths {
                zero_to_one,
                one_to_zero,
            };
        }
        pool
    }
}

#[async_trait]
impl PoolProvider for OsmosisPoolProvider {
    fn provider_name(&self) -> &str {
        "osmosis"
    }

    #[instrument(skip(self))]
    async fn load_pools(&self) -> Result<Vec<Pool>> {
        let pools = self
            .retry
            .run("osmosis pools", || self.fetch_all_pools())
            .await
            .unwrap_or_default();

        let pools = join_all(pools.into_iter().map(|p| self.with_tick_data(p))).await;

        info!(pools = pools.len(), "Loaded Osmosis pools");
        Ok(pools)
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct AllPoolsResponse {
    pools: Vec<RawPool>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "@type")]
enum RawPool {
    #[serde(rename = "/osmosis.gamm.v1beta1.Pool")]
    Balancer {
        #[serde(with = "integer")]
        id: i64,
        #[serde(default)]
        address: String,
        pool_params: PoolParams,
        pool_assets: Vec<BalancerAsset>,
    },
    #[serde(rename = "/osmosis.concentratedliquidity.v1beta1.Pool")]
    Concentrated {
        #[serde(with = "integer")]
        id: i64,
        #[serde(default)]
        address: String,
        token0: String,
        token1: String,
        #[serde(with = "decimal")]
        spread_factor: f64,
        #[serde(flatten)]
        state: ConcentratedState,
    },
    #[serde(rename = "/osmosis.gamm.poolmodels.stableswap.v1beta1.Pool")]
    Stableswap {
        #[serde(with = "integer")]
        id: i64,
        #[serde(default)]
        address: String,
        pool_params: PoolParams,
        pool_liquidity: Vec<PoolAsset>,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct PoolParams {
    #[serde(with = "decimal")]
    swap_fee: f64,
}

#[derive(Debug, Deserialize)]
struct BalancerAsset {
    token: PoolAsset,
}

impl RawPool {
    fn into_pool(self) -> Option<Pool> {
        match self {
            RawPool::Balancer {
                id,
                address,
                pool_params,
                pool_assets,
            } => {
                let mut assets = pool_assets.into_iter().map(|a| a.token);
                let first = assets.next()?;
                let second = assets.next()?;
                Some(Pool::xyk(id as u64, first, second, pool_params.swap_fee).with_address(address))
            }
            RawPool::Concentrated {
                id,
                address,
                token0,
                token1,
                spread_factor,
                state,
            } => Some(
                Pool::concentrated(id as u64, token0, token1, spread_factor, state)
                    .with_address(address),
            ),
            RawPool::Stableswap {
                id,
                address,
                pool_params,
                pool_liquidity,
            } => Some(
                Pool::stableswap(id as u64, pool_liquidity, pool_params.swap_fee)
                    .with_address(address),
            ),
            RawPool::Unsupported => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DepthsResponse {
    #[serde(default)]
    liquidity_depths: Vec<LiquidityDepth>,
}
