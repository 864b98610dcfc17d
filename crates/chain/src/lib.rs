//! Liquidator chain interaction layer.
//!
//! This crate provides:
//! - Domain types for red bank positions, markets and oracle prices
//! - Credit manager positions and account actions
//! - Pool and route representations shared by routers and executors
//! - Typed chain messages and venue specific swap producers
//! - A chain client over the LCD API and an external signer service
//! - Fee estimation and liquidation event parsing
//!
//! Supports Osmosis and Neutron deployments.

mod client;
mod credit;
mod events;
mod exchange;
pub mod gas;
pub mod messages;
mod pool;
mod queries;
pub mod types;

pub use client::{
    smart_query_path, ChainClient, EventAttribute, Fee, RestChainClient, TxEvent, TxResponse,
};
pub use credit::{
    Action, ActionCoin, AstroSwap, CreditPositions, LiquidateRequest, LockingVaultAmount, OsmoSwap,
    SwapperRoute, VaultBase, VaultConfig, VaultInfo, VaultPosition, VaultPositionAmount,
    VaultPositionType, VaultUnlockingPosition, ACCOUNT_BALANCE, REDEEM_BASE,
};
pub use events::{parse_liquidation_results, LiquidationResult};
pub use exchange::{AstroportExchange, Exchange, OsmosisExchange};
pub use gas::{FeeEstimator, FixedGasPrice, GasPriceSource, OsmosisBaseFee};
pub use messages::ChainMessage;
pub use pool::{
    ConcentratedState, LiquidityDepth, LiquidityDepths, Pool, PoolAsset, PoolId, PoolKind, Route,
    RouteHop,
};
pub use queries::{ProtocolContracts, ProtocolQuerier, RetryPolicy};
pub use types::{
    AssetParams, Asset, Coin, Collateral, CreditManagerSettings, Debt, LiquidationBonusCurve,
    LiquidationTx, Market, PriceResponse, PriceSource, UserPosition, Valued,
};
