//! Liquidator core logic.
//!
//! This crate provides the red bank liquidation engine:
//! - AMM router over XYK and concentrated liquidity pool snapshots
//! - Position evaluation and liquidation sizing
//! - Borrow market selection
//! - Transaction batch building (liquidation, then collateral clean-up)
//! - The execution loop, single account or fanned out over sub-accounts
//! - Credit manager liquidations run inside the liquidator's credit account
//!
//! Supports Osmosis and Neutron deployments.

mod batch;
pub mod config;
mod error;
mod evaluator;
mod executor;
mod market;
pub mod pricing;
mod router;
mod rover;
mod snapshot;
mod state;

pub use batch::{BatchBuilder, CleanupInput, PendingBatch};
pub use config::{
    config, init_config, BotConfig, ChainName, Endpoints, Network, NetworkConfig, RoverConfig,
};
pub use error::{LiquidatorError, LiquidatorResult};
pub use evaluator::{
    calculate_liquidation_bonus, calculate_max_debt_repayable, collateral_ratio, largest_collateral,
    largest_debt, liquidation_threshold_health_factor, AssetParamsMap, LiquidationPlan, MarketView,
    PositionEvaluator, PriceMap, SizedLiquidation,
};
pub use executor::{RedbankExecutor, EXECUTED_COUNTER};
pub use market::{available_liquidity, find_borrow_market, BorrowPlan, MarketInfo};
pub use pricing::{calculate_slippage_bp, ClPricer, ClQuote, CurrentTickPricer};
pub use router::{retain_routable, AmmRouter, DEFAULT_MAX_HOPS};
pub use rover::{
    best_collateral, best_debt, vault_value, ActionGenerator, CollateralKind, RoverCollateral, RoverDebt,
    RoverExecutor, RoverInput, SwapVenue, VaultMap, ROVER_EXECUTED_COUNTER,
};
pub use snapshot::Snapshot;
pub use state::{MarketState, ProtocolState};
