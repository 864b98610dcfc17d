//! Red Bank Liquidation Bot
//!
//! Liquidation worker for the Mars red bank on Osmosis and Neutron.
//! Features:
//! - Local AMM routing over Osmosis or Astroport pool snapshots
//! - Sidecar query server routes with local fallback
//! - Two-transaction liquidations: debt sourcing, then collateral clean-up
//! - Optional fan-out over liquidator sub-accounts
//! - Credit manager liquidations (`EXECUTOR_TYPE=rover`)

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use liquidator_api::{
    AstroportPoolProvider, AstroportRouteRequester, FetchRetry, HealthFactorFilter, HttpCandidateFeed,
    OsmosisPoolProvider, PoolProvider, RouteRequester, RouteRequesterRegistry, SqsRouteRequester,
};
use liquidator_chain::{
    AstroportExchange, ChainClient, Exchange, FeeEstimator, FixedGasPrice, GasPriceSource,
    OsmosisBaseFee, OsmosisExchange, ProtocolQuerier, RestChainClient, RetryPolicy,
};
use liquidator_core::{
    init_config, ActionGenerator, AmmRouter, BatchBuilder, BotConfig, ChainName, Endpoints, Network,
    NetworkConfig, RedbankExecutor, RoverExecutor, SwapVenue,
};

const DEFAULT_LOG_FILTER: &str = "info,liquidator_core=debug,liquidator_chain=debug,liquidator_api=debug";

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    // Use BOT_PROFILE env var to select: testing, production, or a file path
    let bot_config = BotConfig::from_env();
    bot_config.log_config();
    init_config(bot_config.clone());

    let network = NetworkConfig::from_env()?;
    network.log_config();
    let endpoints = Endpoints::from_env()?;

    let executor = build_executor(bot_config, &network, &endpoints)?;

    info!("Initiating executor...");
    executor.initiate().await?;

    executor.run().await
}

/// The liquidation worker selected by `EXECUTOR_TYPE`.
enum Executor {
    Redbank(RedbankExecutor),
    Rover(RoverExecutor),
}

impl Executor {
    async fn initiate(&self) -> Result<()> {
        match self {
            Executor::Redbank(executor) => executor.initiate().await,
            Executor::Rover(executor) => executor.initiate().await,
        }
    }

    async fn run(&self) -> Result<()> {
        match self {
            Executor::Redbank(executor) => executor.run().await,
            Executor::Rover(executor) => executor.run().await,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
    }
}

fn build_executor(config: BotConfig, network: &NetworkConfig, endpoints: &Endpoints) -> Result<Executor> {
    info!("Initializing components...");

    let mut rest = RestChainClient::new(&endpoints.lcd, &endpoints.signer);
    if let Some(api_key) = &endpoints.api_key {
        rest = rest.with_api_key(api_key);
    }
    let client: Arc<dyn ChainClient> = Arc::new(rest);

    let querier = ProtocolQuerier::new(client.clone(), network.protocol_contracts()).with_retry(RetryPolicy {
        max_retries: config.executor.fetch_retries,
        delay: config.executor.fetch_retry_delay(),
    });

    let gas_source: Arc<dyn GasPriceSource> = match network.chain_name {
        ChainName::Osmosis => Arc::new(OsmosisBaseFee::new(&endpoints.lcd)),
        ChainName::Neutron => Arc::new(FixedGasPrice(config.gas.min_gas_price)),
    };
    let fees = FeeEstimator::new(gas_source, &network.gas_denom)
        .with_multiplier(config.gas.simulate_multiplier)
        .with_min_gas_price(config.gas.min_gas_price);

    let router = Arc::new(AmmRouter::new(config.router.max_hops));

    let mut requesters = RouteRequesterRegistry::new();
    if let Some(sqs) = &endpoints.sqs {
        requesters = requesters.with_requester(Arc::new(SqsRouteRequester::new(sqs)));
    }
    if let (Some(_), Some(api)) = (&network.astroport_router, &endpoints.astroport_api) {
        let chain_id = match network.network {
            Network::Mainnet => "neutron-1",
            Network::Testnet => "pion-1",
        };
        requesters = requesters.with_requester(Arc::new(AstroportRouteRequester::new(api).with_chain_id(chain_id)));
    }
    let requesters = requesters.with_requester(router.clone());
    info!(requesters = requesters.len(), "Route requesters configured");
    let requester: Arc<dyn RouteRequester> = Arc::new(requesters);

    let pool_provider: Arc<dyn PoolProvider> = match &network.astroport_factory {
        Some(factory) => Arc::new(AstroportPoolProvider::new(client.clone(), factory)),
        None => Arc::new(OsmosisPoolProvider::new(&endpoints.lcd).with_retry(FetchRetry::new(
            config.executor.fetch_retries,
            config.executor.fetch_retry_delay(),
        ))),
    };

    let filter = HealthFactorFilter::new(config.liquidation.min_health_factor, config.liquidation.max_health_factor);
    let executor_type = std::env::var("EXECUTOR_TYPE").unwrap_or_else(|_| "redbank".to_string());

    let executor = if executor_type.eq_ignore_ascii_case("rover") {
        let venue = match network.astroport_router {
            Some(_) => SwapVenue::Astroport,
            None => SwapVenue::Osmosis,
        };
        let generator = ActionGenerator::new(
            requester,
            router.clone(),
            venue,
            &network.neutral_denom,
            config.rover.clone(),
        );
        let feed = HttpCandidateFeed::new(&endpoints.mars_api, network.chain_name.as_str())
            .with_product("creditmanager")
            .with_filter(filter);

        Executor::Rover(
            RoverExecutor::new(
                client,
                querier,
                fees,
                generator,
                router,
                Arc::new(feed),
                &endpoints.liquidator_address,
                &network.gas_denom,
                config,
            )
            .with_liquidators(endpoints.sub_addresses.clone())
            .with_pool_provider(pool_provider),
        )
    } else {
        let exchange: Arc<dyn Exchange> = match &network.astroport_router {
            Some(astroport_router) => Arc::new(AstroportExchange::new(astroport_router, &network.prefix)),
            None => Arc::new(OsmosisExchange),
        };

        let builder = BatchBuilder::new(
            requester,
            exchange,
            &network.contracts.redbank,
            &network.neutral_denom,
            &network.gas_denom,
            config.liquidation.clone(),
        )
        .with_slippage(config.router.swap_slippage)
        .with_borrow_router(router.clone());

        let feed = HttpCandidateFeed::new(&endpoints.mars_api, network.chain_name.as_str()).with_filter(filter);

        Executor::Redbank(
            RedbankExecutor::new(
                client,
                querier,
                fees,
                builder,
                router,
                Arc::new(feed),
                &endpoints.liquidator_address,
                config,
            )
            .with_sub_accounts(endpoints.sub_addresses.clone())
            .with_pool_provider(pool_provider),
        )
    };

    info!(
        chain = %network.chain_name,
        executor = %executor_type,
        liquidator = %endpoints.liquidator_address,
        sub_accounts = endpoints.sub_addresses.len(),
        "All components initialized"
    );
    Ok(executor)
}
