//! Swap message producers for the supported venues.

use anyhow::{bail, Result};
use serde_json::{json, Value};

use crate::messages::{execute_contract, ChainMessage, SwapAmountInRoute};
use crate::pool::RouteHop;
use crate::types::Coin;

/// Produces one chain message that performs a swap along a route.
pub trait Exchange: Send + Sync {
    fn produce_swap_message(
        &self,
        route: &[RouteHop],
        token_in: &Coin,
        min_output: &str,
        sender: &str,
    ) -> Result<ChainMessage>;
}

/// Osmosis pool manager swaps.
#[derive(Debug, Clone, Default)]
pub struct OsmosisExchange;

impl Exchange for OsmosisExchange {
    fn produce_swap_message(
        &self,
        route: &[RouteHop],
        token_in: &Coin,
        min_output: &str,
        sender: &str,
    ) -> Result<ChainMessage> {
        if route.is_empty() {
            bail!("Cannot produce a swap for an empty route");
        }

        Ok(ChainMessage::SwapExactAmountIn {
            sender: sender.to_string(),
            routes: route
                .iter()
                .map(|hop| SwapAmountInRoute {
                    pool_id: hop.pool_id.to_string(),
                    token_out_denom: hop.token_out_denom.clone(),
                })
                .collect(),
            token_in: token_in.clone(),
            token_out_min_amount: min_output.to_string(),
        })
    }
}

/// Astroport router contract swaps.
#[derive(Debug, Clone)]
pub struct AstroportExchange {
    router: String,
    /// Bech32 prefix; denoms starting with it are cw20 contracts.
    prefix: String,
}

impl AstroportExchange {
    pub fn new(router: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            router: router.into(),
            prefix: prefix.into(),
        }
    }

    fn asset_info(&self, denom: &str) -> Value {
        if denom.starts_with(&self.prefix) {
            json!({ "token": { "contract_addr": denom } })
        } else {
            json!({ "native_token": { "denom": denom } })
        }
    }
}

impl Exchange for AstroportExchange {
    fn produce_swap_message(
        &self,
        route: &[RouteHop],
        token_in: &Coin,
        min_output: &str,
        sender: &str,
    ) -> Result<ChainMessage> {
        if route.is_empty() {
            bail!("Cannot produce a swap for an empty route");
        }

        let operations: Vec<Value> = route
            .iter()
            .map(|hop| {
                json!({
                    "astro_swap": {
                        "offer_asset_info": self.asset_info(&hop.token_in_denom),
                        "ask_asset_info": self.asset_info(&hop.token_out_denom),
                    }
                })
            })
            .collect();

        Ok(execute_contract(
            sender,
            &self.router,
            json!({
                "execute_swap_operations": {
                    "operations": operations,
                    "minimum_receive": min_output,
                }
            }),
            vec![token_in.clone()],
        ))
    }
}
