//! Market data shared by the executors.
//!
//! Asset params, markets and the target health factor change slowly and are
//! refreshed on one interval. Oracle prices and pools each have their own.
//! Every refresh swaps a whole snapshot, so readers never see a partial one.

use anyhow::{Context, Result};
use futures::future::join_all;
use liquidator_api::PoolProvider;
use liquidator_chain::ProtocolQuerier;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

use crate::config::BotConfig;
use crate::evaluator::{AssetParamsMap, PriceMap};
use crate::market::MarketInfo;
use crate::router::{retain_routable, AmmRouter};
use crate::snapshot::Snapshot;

/// Protocol-wide data refreshed on the slow interval.
#[derive(Debug, Clone, Default)]
pub struct ProtocolState {
    pub params: AssetParamsMap,
    pub markets: Vec<MarketInfo>,
    pub price_denoms: Vec<String>,
    pub target_health_factor: f64,
}

/// Last-run timestamps of the refresh jobs.
#[derive(Debug, Default)]
struct RefreshClock {
    pools: Mutex<Option<Instant>>,
    prices: Mutex<Option<Instant>>,
    params: Mutex<Option<Instant>>,
}

/// Claim a refresh slot if `window` has elapsed since the last claim.
pub(crate) fn claim(slot: &Mutex<Option<Instant>>, window: Duration) -> bool {
    let mut last = slot.lock();
    match *last {
        Some(at) if at.elapsed() < window => false,
        _ => {
            *last = Some(Instant::now());
            true
        }
    }
}

/// Protocol params, oracle prices and router pools.
pub struct MarketState {
    querier: ProtocolQuerier,
    router: Arc<AmmRouter>,
    providers: Vec<Arc<dyn PoolProvider>>,
    config: BotConfig,

    prices: Snapshot<PriceMap>,
    protocol: Snapshot<ProtocolState>,
    clock: RefreshClock,
}

impl MarketState {
    pub fn new(querier: ProtocolQuerier, router: Arc<AmmRouter>, config: BotConfig) -> Self {
        Self {
            querier,
            router,
            providers: Vec::new(),
            config,
            prices: Snapshot::default(),
            protocol: Snapshot::default(),
            clock: RefreshClock::default(),
        }
    }

    pub fn add_provider(&mut self, provider: Arc<dyn PoolProvider>) {
        self.providers.push(provider);
    }

    pub fn querier(&self) -> &ProtocolQuerier {
        &self.querier
    }

    pub fn router(&self) -> &Arc<AmmRouter> {
        &self.router
    }

    pub fn prices(&self) -> Arc<PriceMap> {
        self.prices.load()
    }

    pub fn protocol(&self) -> Arc<ProtocolState> {
        self.protocol.load()
    }

    /// Run provider setup, then load every snapshot once.
    pub async fn initiate(&self) -> Result<()> {
        for provider in &self.providers {
            provider
                .initiate()
                .await
                .with_context(|| format!("Failed to initiate {} pool provider", provider.provider_name()))?;
        }

        self.refresh_params().await?;
        self.refresh_prices().await;
        self.refresh_pools().await;
        Ok(())
    }

    /// Reload asset params, price sources, markets and the target health factor.
    ///
    /// Nothing is installed unless every query succeeds.
    #[instrument(skip(self))]
    pub async fn refresh_params(&self) -> Result<()> {
        let (params, sources, markets, target_health_factor) = tokio::try_join!(
            self.querier.all_asset_params(),
            self.querier.price_sources(),
            self.querier.markets(),
            self.querier.target_health_factor(),
        )?;

        let state = ProtocolState {
            params: params.into_iter().map(|p| (p.denom.clone(), p)).collect(),
            markets: markets.into_iter().map(MarketInfo::from).collect(),
            price_denoms: sources.into_iter().map(|s| s.denom).collect(),
            target_health_factor,
        };
        info!(
            params = state.params.len(),
            markets = state.markets.len(),
            denoms = state.price_denoms.len(),
            target_health_factor,
            "Protocol state refreshed"
        );
        self.protocol.store(state);
        *self.clock.params.lock() = Some(Instant::now());
        Ok(())
    }

    /// Reload oracle prices. An empty result keeps the previous prices.
    pub async fn refresh_prices(&self) {
        let denoms = self.protocol.load().price_denoms.clone();
        let prices: PriceMap = self
            .querier
            .prices(&denoms)
            .await
            .into_iter()
            .map(|p| (p.denom, p.price))
            .collect();

        *self.clock.prices.lock() = Some(Instant::now());
        if prices.is_empty() {
            warn!(denoms = denoms.len(), "No oracle prices fetched, keeping previous");
            return;
        }
        self.prices.store(prices);
    }

    /// Reload pools into the router, at most once per refresh window.
    ///
    /// Returns false when the window has not elapsed yet.
    #[instrument(skip(self))]
    pub async fn refresh_pools(&self) -> bool {
        if !claim(&self.clock.pools, self.config.executor.pools_refresh_window()) {
            return false;
        }

        let loaded = join_all(self.providers.iter().map(|p| p.load_pools())).await;
        let mut pools = Vec::new();
        for (provider, result) in self.providers.iter().zip(loaded) {
            match result {
                Ok(batch) => pools.extend(batch),
                Err(e) => warn!(provider = provider.provider_name(), error = %e, "Pool load failed"),
            }
        }

        let prices = self.prices.load();
        let protocol = self.protocol.load();
        let market_denoms: HashSet<String> = protocol.markets.iter().map(|m| m.denom().to_string()).collect();
        let pools = retain_routable(pools, &prices, &market_denoms, self.config.router.min_xyk_liquidity);

        info!(pools = pools.len(), "Router pools replaced");
        self.router.set_pools(pools);
        true
    }

    /// Run whichever refresh jobs are due. Failures keep the previous snapshot.
    pub async fn refresh_due(&self) {
        if claim(&self.clock.params, self.config.executor.params_refresh()) {
            if let Err(e) = self.refresh_params().await {
                warn!(error = %e, "Protocol state refresh failed, keeping previous");
            }
        }
        if claim(&self.clock.prices, self.config.executor.price_refresh()) {
            self.refresh_prices().await;
        }
        self.refresh_pools().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_respects_window() {
        let slot = Mutex::new(None);
        assert!(claim(&slot, Duration::from_secs(60)));
        assert!(!claim(&slot, Duration::from_secs(60)));
        assert!(claim(&slot, Duration::ZERO));
    }
}
