//! Chain query and execution collaborator.
//!
//! Queries go straight to the LCD REST API. Simulation and broadcasting are
//! delegated to a signer service that owns the keys.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::messages::ChainMessage;
use crate::types::Coin;

/// Fee attached to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fee {
    pub amount: Vec<Coin>,
    pub gas: String,
}

/// Attribute of a transaction event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
}

/// Event emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<EventAttribute>,
}

/// Result of a broadcast transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResponse {
    pub height: u64,
    #[serde(alias = "txhash")]
    pub transaction_hash: String,
    pub code: u32,
    #[serde(default)]
    pub raw_log: String,
    #[serde(default)]
    pub events: Vec<TxEvent>,
}

impl TxResponse {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Everything the engine needs from the chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Run a smart query against a contract and return its `data` payload.
    async fn query_contract_smart(&self, contract: &str, msg: &Value) -> Result<Value>;

    async fn get_all_balances(&self, address: &str) -> Result<Vec<Coin>>;

    /// Gas used by simulating `messages`.
    async fn simulate(&self, address: &str, messages: &[ChainMessage]) -> Result<u64>;

    async fn sign_and_broadcast(
        &self,
        address: &str,
        messages: &[ChainMessage],
        fee: Fee,
    ) -> Result<TxResponse>;
}

#[derive(Deserialize)]
struct SmartQueryResponse {
    data: Value,
}

#[derive(Deserialize)]
struct BalancesResponse {
    balances: Vec<Coin>,
}

#[derive(Deserialize)]
struct SimulateResponse {
    gas_used: u64,
}

#[derive(Serialize)]
struct SignRequest<'a> {
    address: &'a str,
    messages: &'a [ChainMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    fee: Option<&'a Fee>,
}

/// LCD + signer service backed client.
#[derive(Debug, Clone)]
pub struct RestChainClient {
    client: reqwest::Client,
    lcd_url: String,
    signer_url: String,
    api_key: Option<String>,
}

impl RestChainClient {
    pub fn new(lcd_url: impl Into<String>, signer_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            lcd_url: lcd_url.into().trim_end_matches('/').to_string(),
            signer_url: signer_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    /// Attach an `x-apikey` query parameter to LCD requests.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        self.api_key = (!key.is_empty()).then_some(key);
        self
    }

    pub fn lcd_url(&self) -> &str {
        &self.lcd_url
    }

    async fn lcd_get(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.lcd_url, path);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.query(&[("x-apikey", key)]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            bail!("LCD request failed: {} ({})", response.status(), url);
        }
        Ok(response)
    }

    async fn signer_post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &SignRequest<'_>,
    ) -> Result<T> {
        let url = format!("{}{}", self.signer_url, path);
        let response = self.client.post(&url).json(body).send().await?;
        if !response.status().is_success() {
            bail!("Signer request failed: {} ({})", response.status(), url);
        }
        Ok(response.json().await?)
    }
}

/// Path of a smart query, with the message JSON url-safe base64 encoded.
pub fn smart_query_path(contract: &str, msg: &Value) -> String {
    let encoded = base64::engine::general_purpose::URL_SAFE.encode(msg.to_string());
    format!("/cosmwasm/wasm/v1/contract/{}/smart/{}", contract, encoded)
}

#[async_trait]
impl ChainClient for RestChainClient {
    #[instrument(skip(self, msg))]
    async fn query_contract_smart(&self, contract: &str, msg: &Value) -> Result<Value> {
        let response = self.lcd_get(&smart_query_path(contract, msg)).await?;
        let body: SmartQueryResponse = response
            .json()
            .await
            .with_context(|| format!("Invalid smart query response from {}", contract))?;
        Ok(body.data)
    }

    #[instrument(skip(self))]
    async fn get_all_balances(&self, address: &str) -> Result<Vec<Coin>> {
        let response = self
            .lcd_get(&format!("/cosmos/bank/v1beta1/balances/{}", address))
            .await?;
        let body: BalancesResponse = response.json().await?;
        debug!(address, count = body.balances.len(), "Fetched balances");
        Ok(body.balances)
    }

    #[instrument(skip(self, messages), fields(messages = messages.len()))]
    async fn simulate(&self, address: &str, messages: &[ChainMessage]) -> Result<u64> {
        let body: SimulateResponse = self
            .signer_post(
                "/simulate",
                &SignRequest {
                    address,
                    messages,
                    fee: None,
                },
            )
            .await?;
        Ok(body.gas_used)
    }

    #[instrument(skip(self, messages, fee), fields(messages = messages.len()))]
    async fn sign_and_broadcast(
        &self,
        address: &str,
        messages: &[ChainMessage],
        fee: Fee,
    ) -> Result<TxResponse> {
        self.signer_post(
            "/broadcast",
            &SignRequest {
                address,
                messages,
                fee: Some(&fee),
            },
        )
        .await
    }
}
