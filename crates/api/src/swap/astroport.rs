//! Astroport routing API requester.

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

/// Astroport pairs are addressed by contract, not by id.
const ASTROPORT_POOL_ID: u64 = 0;
const ASTROPORT_XYK_FEE: f64 = 0.003;
const ROUTE_LIMIT: usize = 5;

#[derive(Clone)]
struct CachedQuote {
    quote: RouteQuote,
    cached_at: Instant,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    denom_in: String,
    denom_out: String,
    amount_bucket: u64,
}

/// Astroport API requester with caching.
#[derive(Clone)]
pub struct AstroportRouteRequester {
    client: reqwest::Client,
    api_url: String,
    chain_id: String,
    cache: Arc<DashMap<CacheKey, CachedQuote>>,
    cache_ttl: Duration,
}

impl std::fmt::Debug for AstroportRouteRequester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AstroportRouteRequester")
            .field("api_url", &self.api_url)
            .field("chain_id", &self.chain_id)
            .field("cache_size", &self.cache.len())
            .finish()
    }
}

impl AstroportRouteRequester {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            chain_id: "neutron-1".to_string(),
            cache: Arc::new(DashMap::new()),
            cache_ttl: Duration::from_secs(5),
        }
    }

    pub fn with_chain_id(mut self, chain_id: impl Into<String>) -> Self {
        self.chain_id = chain_id.into();
        self
    }

    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    fn bucket_amount(amount: f64) -> u64 {
        if !(amount > 0.0) {
            return 0;
        }
        (amount.log10() * 100.0) as u64
    }

    fn routes_url(&self, denom_in: &str, denom_out: &str, amount: f64) -> String {
        format!(
            "{}/routes?start={}&end={}&amount={}&chainId={}&limit={}",
            self.api_url,
            denom_in,
            denom_out,
            format_amount(amount),
            self.chain_id,
            ROUTE_LIMIT
        )
    }

    #[instrument(skip(self))]
    async fn fetch_quote(&self, denom_in: &str, denom_out: &str, amount: f64) -> Result<RouteQuote> {
        let url = self.routes_url(denom_in, denom_out, amount);
        debug!(url = %url, "Requesting routes from Astroport");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            bail!("Failed to fetch routes: {}, {}", response.status(), url);
        }

        let routes: Vec<AstroportApiRoute> = response.json().await?;
        best_quote(denom_in, denom_out, routes)
    }

    pub fn cleanup_cache(&self) {
        self.cache
            .retain(|_, cached| cached.cached_at.elapsed() < self.cache_ttl);
    }
}

/// Pick the route with the highest `value_out` and turn its swaps into hops.
fn best_quote(denom_in: &str, denom_out: &str, routes: Vec<AstroportApiRoute>) -> Result<RouteQuote> {
    let Some(best) = routes
        .into_iter()
        .filter(|r| !r.swaps.is_empty())
        .max_by(|a, b| a.value_out.total_cmp(&b.value_out))
    else {
        bail!("No route found for {} to {}", denom_in, denom_out);
    };

    let route: Route = best
        .swaps
        .iter()
        .filter_map(|swap| {
            let pool = Arc::new(
                Pool::quoted(ASTROPORT_POOL_ID, swap.from.clone(), swap.to.clone(), ASTROPORT_XYK_FEE)
                    .with_address(swap.contract_addr.clone()),
            );
            RouteHop::through(&pool, &swap.from)
        })
        .collect();

    let expected_output = if best.amount_out > 0.0 {
        best.amount_out
    } else {
        best.value_out
    };
    Ok(RouteQuote { route, expected_output })
}

#[async_trait]
impl RouteRequester for AstroportRouteRequester {
    fn requester_id(&self) -> &str {
        "astroport"
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

#[derive(Debug, Deserialize)]
struct AstroportApiRoute {
    swaps: Vec<AstroportSwap>,
    #[serde(with = "decimal", default)]
    value_out: f64,
    #[serde(with = "decimal", default)]
    amount_out: f64,
}

#[derive(Debug, Deserialize)]
struct AstroportSwap {
    contract_addr: String,
    from: String,
    to: String,
}
