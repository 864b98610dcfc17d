//! Configuration for the liquidation worker.
//!
//! - Worker runtime configuration (profiles, thresholds, timing)
//! - Network constants (per chain/network lookup table, env endpoints)

mod bot;
mod network;

pub use bot::{
    config, init_config, BotConfig, ExecutorConfig, GasConfig, LiquidationConfig, RouterConfig,
    RoverConfig,
};
pub use network::{ChainName, Endpoints, Network, NetworkConfig, NetworkContracts};
