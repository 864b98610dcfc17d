//! Pool snapshot providers.
//!
//! A provider produces the full set of pools on demand. Network failures are
//! retried a bounded number of times; after that the provider returns what it
//! has instead of failing, so a refresh degrades to a partial snapshot.

mod astroport;
mod osmosis;

pub use astroport::AstroportPoolProvider;
pub use osmosis::OsmosisPoolProvider;

use anyhow::Result;
use async_trait::async_trait;
use liquidator_chain::Pool;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Source of pool snapshots.
#[async_trait]
pub trait PoolProvider: Send + Sync {
    fn provider_name(&self) -> &str;

    /// One-time setup. Providers that need it fail `load_pools` until it has run.
    async fn initiate(&self) -> Result<()> {
        Ok(())
    }

    async fn load_pools(&self) -> Result<Vec<Pool>>;
}

/// Bounded retry for pool data fetches.
#[derive(Debug, Clone, Copy)]
pub struct FetchRetry {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl FetchRetry {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Run `op` until it succeeds or attempts run out. `None` when exhausted.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(value) => return Some(value),
                Err(e) => {
                    warn!(what, attempt, max_attempts = self.max_attempts, error = %e, "Fetch failed, retrying");
                    if attempt < self.max_attempts && !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }
        None
    }
}
