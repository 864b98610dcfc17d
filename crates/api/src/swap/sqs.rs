//! Osmosis sidecar query server (SQS) route requester.

use super::{RouteQuote, RouteRequester};
use anyhow::{bail, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use liquidator_chain::types::{decimal, format_amount};
use liquidator_chain::{Pool, Route, RouteHop};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Cached quote with timestamp for TTL expiration.
#[derive(Clone)]
struct CachedQuote {
    quote: RouteQuote,
    cached_at: Instant,
}

/// Cache key for quotes.
#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    denom_in: String,
    denom_out: String,
    /// Bucketed amount (rounded to reduce cache misses)
    amount_bucket: u64,
}

/// SQS requester with caching.
#[derive(Clone)]
pub struct SqsRouteRequester {
    client: reqwest::Client,
    base_url: String,
    cache: Arc<DashMap<CacheKey, CachedQuote>>,
    /// Cache TTL (default: 5 seconds)
    cache_ttl: Duration,
}

impl std::fmt::Debug for SqsRouteRequester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqsRouteRequester")
            .field("base_url", &self.base_url)
            .field("cache_size", &self.cache.len())
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

impl SqsRouteRequester {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache: Arc::new(DashMap::new()),
            cache_ttl: Duration::from_secs(5),
        }
    }

    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    /// Bucket amount on a log scale for cache efficiency.
    fn bucket_amount(amount: f64) -> u64 {
        if !(amount > 0.0) {
            return 0;
        }
        (amount.log10() * 100.0) as u64
    }

    fn quote_url(&self, denom_in: &str, denom_out: &str, amount: f64) -> String {
        format!(
            "{}/router/quote?tokenIn={}{}&tokenOutDenom={}",
            self.base_url,
            format_amount(amount),
            denom_in,
            denom_out
        )
    }

    #[instrument(skip(self))]
    async fn fetch_quote(&self, denom_in: &str, denom_out: &str, amount: f64) -> Result<RouteQuote> {
        let url = self.quote_url(denom_in, denom_out, amount);
        debug!(url = %url, "Requesting route from SQS");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            bail!("Failed to fetch route: {}, {}", response.status(), url);
        }

        let body: SqsQuoteResponse = response.json().await?;
        convert_response(denom_in, body)
    }

    /// Clear expired entries from cache.
    pub fn cleanup_cache(&self) {
        self.cache
            .retain(|_, cached| cached.cached_at.elapsed() < self.cache_ttl);
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }
}

/// Convert the first SQS split into hops.
///
/// The quoted output is returned as is; slippage is applied once, by whoever
/// turns the quote into a swap message.
fn convert_response(denom_in: &str, response: SqsQuoteResponse) -> Result<RouteQuote> {
    let Some(split) = response.route.into_iter().next() else {
        bail!("SQS returned no route for {}", denom_in);
    };

    let mut token_in = denom_in.to_string();
    let mut route: Route = Vec::with_capacity(split.pools.len());
    for pool in split.pools {
        let hop_pool = Arc::new(Pool::quoted(
            pool.id,
            token_in.clone(),
            pool.token_out_denom.clone(),
            pool.spread_factor,
        ));
        if let Some(hop) = RouteHop::through(&hop_pool, &token_in) {
            route.push(hop);
        }
        token_in = pool.token_out_denom;
    }

    Ok(RouteQuote {
        route,
        expected_output: response.amount_out,
    })
}

#[async_trait]
impl RouteRequester for SqsRouteRequester {
    fn requester_id(&self) -> &str {
        "sqs"
    }

    async fn request_route(
        &self,
        denom_in: &str,
        denom_out: &str,
        amount: f64,
    ) -> Result<RouteQuote> {
        let cache_key = CacheKey {
            denom_in: denom_in.to_string(),
            denom_out: denom_out.to_string(),
            amount_bucket: Self::bucket_amount(amount),
        };

        if let Some(cached) = self.cache.get(&cache_key) {
            if cached.cached_at.elapsed() < self.cache_ttl {
                debug!(
                    denom_in,
                    denom_out,
                    cache_age_ms = cached.cached_at.elapsed().as_millis(),
                    "Cache hit for route quote"
                );
                return Ok(cached.quote.clone());
            }
        }

        let quote = self.fetch_quote(denom_in, denom_out, amount).await?;
        self.cache.insert(
            cache_key,
            CachedQuote {
                quote: quote.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(quote)
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct SqsQuoteResponse {
    #[serde(with = "decimal")]
    amount_out: f64,
    #[serde(default)]
    route: Vec<SqsSplit>,
}

#[derive(Debug, Deserialize)]
struct SqsSplit {
    pools: Vec<SqsPool>,
}

#[derive(Debug, Deserialize)]
struct SqsPool {
    id: u64,
    #[serde(with = "decimal", default)]
    spread_factor: f64,
    token_out_denom: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_response_chains_hops() {
        let json = r#"{
            "amount_in": {"denom": "uatom", "amount": "1000000"},
            "amount_out": "8000000",
            "route": [{
                "pools": [
                    {"id": 1, "type": 0, "balances": [], "spread_factor": "0.002", "token_out_denom": "uosmo", "taker_fee": "0.001"},
                    {"id": 1221, "type": 2, "balances": [], "spread_factor": "0.0005", "token_out_denom": "uusdc", "taker_fee": "0.001"}
                ],
                "has-cw-pool": false,
                "out_amount": "8000000",
                "in_amount": "1000000"
            }],
            "effective_fee": "0.003",
            "price_impact": "-0.001"
        }"#;

        let response: SqsQuoteResponse = serde_json::from_str(json).unwrap();
        let quote = convert_response("uatom", response).unwrap();

        assert_eq!(quote.route.len(), 2);
        assert_eq!(quote.route[0].token_in_denom, "uatom");
        assert_eq!(quote.route[0].token_out_denom, "uosmo");
        assert_eq!(quote.route[1].token_in_denom, "uosmo");
        assert_eq!(quote.route[1].token_out_denom, "uusdc");
        assert_eq!(quote.route[1].pool_id.0, 1221);
        assert_eq!(quote.expected_output, 8_000_000.0);
    }

    #[test]
    fn test_empty_route_is_an_error() {
        let response: SqsQuoteResponse =
            serde_json::from_str(r#"{"amount_out": "0", "route": []}"#).unwrap();
        assert!(convert_response("uatom", response).is_err());
    }

    #[test]
    fn test_quote_url() {
        let requester = SqsRouteRequester::new("https://sqs.osmosis.zone/");
        assert_eq!(
            requester.quote_url("uatom", "uusdc", 1500.0),
            "https://sqs.osmosis.zone/router/quote?tokenIn=1500uatom&tokenOutDenom=uusdc"
        );
    }

    #[test]
    fn test_amount_bucketing() {
        let b1 = SqsRouteRequester::bucket_amount(1_000_000.0);
        let b2 = SqsRouteRequester::bucket_amount(1_010_000.0);
        assert!((b1 as i64 - b2 as i64).abs() < 5);
        assert!(SqsRouteRequester::bucket_amount(10_000_000.0) > b1);
        assert_eq!(SqsRouteRequester::bucket_amount(0.0), 0);
    }
}
