//! Transaction fee estimation.
//!
//! Gas is simulated and padded by a multiplier. The gas price comes from a
//! [`GasPriceSource`] and is floored so that a stale or zero base fee never
//! produces an unpayable transaction.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::client::{ChainClient, Fee};
use crate::messages::ChainMessage;
use crate::types::{decimal, Coin};

/// Default gas padding applied to simulated gas.
pub const DEFAULT_SIMULATE_MULTIPLIER: f64 = 1.3;
/// Lowest gas price ever used.
pub const DEFAULT_MIN_GAS_PRICE: f64 = 0.025;

/// Where the gas price comes from.
#[async_trait]
pub trait GasPriceSource: Send + Sync + Debug {
    async fn gas_price(&self) -> Result<f64>;

    fn source_name(&self) -> &'static str;
}

/// A constant gas price.
#[derive(Debug, Clone)]
pub struct FixedGasPrice(pub f64);

#[async_trait]
impl GasPriceSource for FixedGasPrice {
    async fn gas_price(&self) -> Result<f64> {
        Ok(self.0)
    }

    fn source_name(&self) -> &'static str {
        "fixed"
    }
}

/// Osmosis dynamic base fee read from the txfees module.
#[derive(Debug, Clone)]
pub struct OsmosisBaseFee {
    client: reqwest::Client,
    lcd_url: String,
}

#[derive(Deserialize)]
struct BaseFeeResponse {
    #[serde(with = "decimal")]
    base_fee: f64,
}

impl OsmosisBaseFee {
    pub fn new(lcd_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            lcd_url: lcd_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl GasPriceSource for OsmosisBaseFee {
    async fn gas_price(&self) -> Result<f64> {
        let url = format!("{}/osmosis/txfees/v1beta1/cur_eip_base_fee", self.lcd_url);
        let response: BaseFeeResponse = self.client.get(&url).send().await?.json().await?;
        Ok(response.base_fee)
    }

    fn source_name(&self) -> &'static str {
        "osmosis-eip-base-fee"
    }
}

/// Compute a fee from simulated gas and a price.
pub fn compute_fee(
    gas_used: u64,
    gas_price: f64,
    multiplier: f64,
    min_gas_price: f64,
    gas_denom: &str,
) -> Fee {
    let gas = (gas_used as f64 * multiplier).ceil();
    let price = if gas_price.is_finite() && gas_price >= min_gas_price {
        gas_price
    } else {
        min_gas_price
    };

    Fee {
        amount: vec![Coin::new(gas_denom, gas * price + 1.0)],
        gas: format!("{:.0}", gas),
    }
}

/// Estimates fees for message batches.
#[derive(Debug)]
pub struct FeeEstimator {
    source: Arc<dyn GasPriceSource>,
    gas_denom: String,
    multiplier: f64,
    min_gas_price: f64,
    /// Last price fetched, used when the source fails.
    last_price: RwLock<Option<f64>>,
}

impl FeeEstimator {
    pub fn new(source: Arc<dyn GasPriceSource>, gas_denom: impl Into<String>) -> Self {
        Self {
            source,
            gas_denom: gas_denom.into(),
            multiplier: DEFAULT_SIMULATE_MULTIPLIER,
            min_gas_price: DEFAULT_MIN_GAS_PRICE,
            last_price: RwLock::new(None),
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_min_gas_price(mut self, min_gas_price: f64) -> Self {
        self.min_gas_price = min_gas_price;
        self
    }

    pub fn gas_denom(&self) -> &str {
        &self.gas_denom
    }

    async fn current_price(&self) -> f64 {
        match self.source.gas_price().await {
            Ok(price) => {
                *self.last_price.write() = Some(price);
                price
            }
            Err(e) => {
                let fallback = (*self.last_price.read()).unwrap_or(self.min_gas_price);
                warn!(
                    source = self.source.source_name(),
                    error = %e,
                    fallback,
                    "Gas price fetch failed, using fallback"
                );
                fallback
            }
        }
    }

    /// Simulate `messages` and price the result.
    pub async fn estimate(
        &self,
        client: &dyn ChainClient,
        address: &str,
        messages: &[ChainMessage],
    ) -> Result<Fee> {
        let gas_used = client.simulate(address, messages).await?;
        let price = self.current_price().await;
        let fee = compute_fee(
            gas_used,
            price,
            self.multiplier,
            self.min_gas_price,
            &self.gas_denom,
        );
        debug!(gas_used, gas = %fee.gas, price, "Estimated fee");
        Ok(fee)
    }
}
