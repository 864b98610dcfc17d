//! Route requesting abstractions for liquidation swaps.
//!
//! A [`RouteRequester`] answers "how do I get from `denom_in` to `denom_out`
//! with this much input" with a route and the output it expects. The local
//! AMM router and remote quote servers both implement it, so the batch
//! builder does not care where routes come from.
//!
//! # Supported Requesters
//!
//! - `sqs`: Osmosis sidecar query server
//! - `astroport`: Astroport routing API, for Neutron
//! - the in-process AMM router lives in `liquidator-core`
//!
//! # Example
//!
//! ```rust,ignore
//! use liquidator_api::swap::{RouteRequesterRegistry, SqsRouteRequester};
//!
//! let registry = RouteRequesterRegistry::new()
//!     .with_requester(Arc::new(SqsRouteRequester::new("https://sqs.osmosis.zone")))
//!     .with_requester(amm_router);
//!
//! let quote = registry.request_route("uatom", "uusdc", 1_000_000.0).await?;
//! ```

mod astroport;
mod sqs;

pub use astroport::AstroportRouteRequester;
pub use sqs::SqsRouteRequester;

use anyhow::Result;
use async_trait::async_trait;
use liquidator_chain::Route;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::warn;

/// A priced route.
#[derive(Debug, Clone)]
pub struct RouteQuote {
    pub route: Route,
    /// Output the requester expects for the quoted input.
    pub expected_output: f64,
}

impl RouteQuote {
    /// Output after applying a downward slippage fraction.
    pub fn min_output(&self, slippage: f64) -> f64 {
        self.expected_output * (1.0 - slippage)
    }

    pub fn hops(&self) -> usize {
        self.route.len()
    }
}

/// Source of swap routes.
#[async_trait]
pub trait RouteRequester: Send + Sync + Debug {
    /// Requester identifier (e.g., "sqs", "amm").
    fn requester_id(&self) -> &str;

    /// Find a route swapping `amount` of `denom_in` into `denom_out`.
    async fn request_route(&self, denom_in: &str, denom_out: &str, amount: f64)
        -> Result<RouteQuote>;
}

/// Ordered set of requesters tried in turn.
#[derive(Debug, Default, Clone)]
pub struct RouteRequesterRegistry {
    requesters: Vec<Arc<dyn RouteRequester>>,
}

impl RouteRequesterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a requester. Earlier requesters are preferred.
    pub fn with_requester(mut self, requester: Arc<dyn RouteRequester>) -> Self {
        self.requesters.push(requester);
        self
    }

    pub fn len(&self) -> usize {
        self.requesters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requesters.is_empty()
    }
}

#[async_trait]
impl RouteRequester for RouteRequesterRegistry {
    fn requester_id(&self) -> &str {
        "registry"
    }

    async fn request_route(
        &self,
        denom_in: &str,
        denom_out: &str,
        amount: f64,
    ) -> Result<RouteQuote> {
        let mut last_error = None;
        for requester in &self.requesters {
            match requester.request_route(denom_in, denom_out, amount).await {
                Ok(quote) => return Ok(quote),
                Err(e) => {
                    warn!(
                        requester = requester.requester_id(),
                        denom_in,
                        denom_out,
                        error = %e,
                        "Route requester failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("No route requesters available")))
    }
}
