//! Unhealthy position discovery over the Mars HTTP API.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Health factor window used to select liquidation candidates.
///
/// Positions are kept when `min < health_factor < max` and their debt is
/// large enough to be worth a transaction.
#[derive(Debug, Clone)]
pub struct HealthFactorFilter {
    pub min_health_factor: f64,
    pub max_health_factor: f64,
    /// Minimum number of digits in the raw `total_debt` string.
    pub min_debt_digits: usize,
}

impl Default for HealthFactorFilter {
    fn default() -> Self {
        Self {
            min_health_factor: 0.3,
            max_health_factor: 0.97,
            min_debt_digits: 6,
        }
    }
}

impl HealthFactorFilter {
    pub fn new(min_health_factor: f64, max_health_factor: f64) -> Self {
        Self {
            min_health_factor,
            max_health_factor,
            ..Default::default()
        }
    }

    pub fn accepts(&self, position: &CandidatePosition) -> bool {
        let Ok(hf) = position.health_factor.parse::<f64>() else {
            return false;
        };
        hf < self.max_health_factor
            && hf > self.min_health_factor
            && position.total_debt.len() >= self.min_debt_digits
    }
}

/// A position reported as unhealthy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePosition {
    pub account_id: String,
    pub health_factor: String,
    pub total_debt: String,
}

impl CandidatePosition {
    fn debt_value(&self) -> f64 {
        self.total_debt.parse().unwrap_or(0.0)
    }
}

/// Unhealthy positions endpoint version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    #[default]
    V1,
    V2,
}

/// Source of liquidation targets.
#[async_trait]
pub trait CandidateFeed: Send + Sync {
    /// Up to `limit` borrower addresses, most valuable first.
    async fn next_targets(&self, limit: usize) -> Result<Vec<String>>;

    fn feed_name(&self) -> &str;
}

/// Mars API unhealthy positions client.
#[derive(Debug, Clone)]
pub struct HttpCandidateFeed {
    client: reqwest::Client,
    base_url: String,
    chain: String,
    product: String,
    version: ApiVersion,
    filter: HealthFactorFilter,
}

impl HttpCandidateFeed {
    pub fn new(base_url: impl Into<String>, chain: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            chain: chain.into().to_lowercase(),
            product: "redbank".to_string(),
            version: ApiVersion::default(),
            filter: HealthFactorFilter::default(),
        }
    }

    pub fn with_version(mut self, version: ApiVersion) -> Self {
        self.version = version;
        self
    }

    /// Protocol product whose positions are fetched (`redbank`, `creditmanager`).
    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = product.into();
        self
    }

    pub fn with_filter(mut self, filter: HealthFactorFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn filter(&self) -> &HealthFactorFilter {
        &self.filter
    }

    fn url(&self) -> String {
        match self.version {
            ApiVersion::V1 => format!(
                "{}/v1/unhealthy_positions/{}/{}",
                self.base_url, self.chain, self.product
            ),
            ApiVersion::V2 => format!(
                "{}/v2/unhealthy_positions?chain={}&product={}",
                self.base_url, self.chain, self.product
            ),
        }
    }

    /// Fetch and filter candidates, sorted by ascending total debt.
    #[instrument(skip(self))]
    pub async fn fetch_positions(&self) -> Result<Vec<CandidatePosition>> {
        let url = self.url();
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            bail!("Unhealthy positions request failed: {} ({})", response.status(), url);
        }

        let data: PositionsResponse = response.json().await?;
        let total = data.positions.len();
        let positions = select_candidates(data.positions, &self.filter);

        info!(
            total_reported = total,
            candidates = positions.len(),
            "Fetched unhealthy positions"
        );
        Ok(positions)
    }
}

/// Apply the filter and sort by ascending total debt.
pub fn select_candidates(
    positions: Vec<CandidatePosition>,
    filter: &HealthFactorFilter,
) -> Vec<CandidatePosition> {
    let mut selected: Vec<CandidatePosition> =
        positions.into_iter().filter(|p| filter.accepts(p)).collect();
    selected.sort_by(|a, b| a.debt_value().total_cmp(&b.debt_value()));
    selected
}

#[async_trait]
impl CandidateFeed for HttpCandidateFeed {
    async fn next_targets(&self, limit: usize) -> Result<Vec<String>> {
        let positions = self.fetch_positions().await?;
        let targets: Vec<String> = positions
            .into_iter()
            .rev()
            .take(limit)
            .map(|p| p.account_id)
            .collect();
        debug!(targets = targets.len(), "Selected targets");
        Ok(targets)
    }

    fn feed_name(&self) -> &str {
        "http"
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct PositionsResponse {
    #[serde(alias = "data")]
    positions: Vec<CandidatePosition>,
}
