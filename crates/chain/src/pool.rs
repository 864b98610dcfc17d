//! Pool snapshots and route hops.
//!
//! Pools are immutable once loaded. A snapshot of them is shared behind an
//! `Arc` and replaced wholesale on refresh.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

use crate::types::{decimal, integer};

/// Numeric pool identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolId(pub u64);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reserve held by a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolAsset {
    pub denom: String,
    #[serde(with = "decimal")]
    pub amount: f64,
}

impl PoolAsset {
    pub fn new(denom: impl Into<String>, amount: f64) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }
}

/// Net liquidity change at an initialized tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidityDepth {
    #[serde(with = "integer")]
    pub tick_index: i64,
    #[serde(with = "decimal")]
    pub liquidity_net: f64,
}

/// Initialized ticks in each swap direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiquidityDepths {
    pub zero_to_one: Vec<LiquidityDepth>,
    pub one_to_zero: Vec<LiquidityDepth>,
}

impl LiquidityDepths {
    /// True when both directions have at least one tick.
    pub fn is_complete(&self) -> bool {
        !self.zero_to_one.is_empty() && !self.one_to_zero.is_empty()
    }
}

/// Concentrated liquidity state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentratedState {
    #[serde(with = "decimal")]
    pub current_tick_liquidity: f64,
    #[serde(with = "decimal")]
    pub current_sqrt_price: f64,
    #[serde(with = "integer")]
    pub current_tick: i64,
    #[serde(default)]
    pub liquidity_depths: LiquidityDepths,
}

/// Type-specific pool state.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolKind {
    /// Constant product pool with its ordered reserves.
    Xyk { assets: SmallVec<[PoolAsset; 2]> },
    ConcentratedLiquidity(ConcentratedState),
    /// Loaded for completeness but never priced.
    Stableswap { liquidity: Vec<PoolAsset> },
}

/// An immutable pool snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Pool {
    pub id: PoolId,
    pub address: String,
    pub token0: String,
    pub token1: String,
    /// Swap fee as a fraction (0.003 = 0.3%).
    pub swap_fee: f64,
    pub kind: PoolKind,
}

impl Pool {
    /// Build a constant product pool. token0/token1 follow reserve order.
    pub fn xyk(id: u64, first: PoolAsset, second: PoolAsset, swap_fee: f64) -> Self {
        Self {
            id: PoolId(id),
            address: String::new(),
            token0: first.denom.clone(),
            token1: second.denom.clone(),
            swap_fee,
            kind: PoolKind::Xyk {
                assets: SmallVec::from_buf([first, second]),
            },
        }
    }

    /// Build a concentrated liquidity pool.
    pub fn concentrated(
        id: u64,
        token0: impl Into<String>,
        token1: impl Into<String>,
        swap_fee: f64,
        state: ConcentratedState,
    ) -> Self {
        Self {
            id: PoolId(id),
            address: String::new(),
            token0: token0.into(),
            token1: token1.into(),
            swap_fee,
            kind: PoolKind::ConcentratedLiquidity(state),
        }
    }

    /// Build a stableswap pool. token0/token1 are the first two assets.
    pub fn stableswap(id: u64, liquidity: Vec<PoolAsset>, swap_fee: f64) -> Self {
        let denom_at = |i: usize| liquidity.get(i).map(|a| a.denom.clone()).unwrap_or_default();
        Self {
            id: PoolId(id),
            address: String::new(),
            token0: denom_at(0),
            token1: denom_at(1),
            swap_fee,
            kind: PoolKind::Stableswap { liquidity },
        }
    }

    /// A pool known only from a remote quote. Reserves are unknown, so it
    /// can be routed through but not priced locally.
    pub fn quoted(id: u64, token_in: impl Into<String>, token_out: impl Into<String>, swap_fee: f64) -> Self {
        Self {
            id: PoolId(id),
            address: String::new(),
            token0: token_in.into(),
            token1: token_out.into(),
            swap_fee,
            kind: PoolKind::Xyk {
                assets: SmallVec::new(),
            },
        }
    }

    /// Set the contract address (Astroport pairs).
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn contains(&self, denom: &str) -> bool {
        self.token0 == denom || self.token1 == denom
    }

    /// The denom on the other side of `denom`, if the pool trades it.
    pub fn other_side(&self, denom: &str) -> Option<&str> {
        if self.token0 == denom {
            Some(&self.token1)
        } else if self.token1 == denom {
            Some(&self.token0)
        } else {
            None
        }
    }

    /// XYK reserve for a denom.
    pub fn reserve(&self, denom: &str) -> Option<f64> {
        match &self.kind {
            PoolKind::Xyk { assets } => assets.iter().find(|a| a.denom == denom).map(|a| a.amount),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            PoolKind::Xyk { .. } => "xyk",
            PoolKind::ConcentratedLiquidity(_) => "concentrated",
            PoolKind::Stableswap { .. } => "stableswap",
        }
    }
}

/// One swap step of a route.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteHop {
    pub pool_id: PoolId,
    pub token_in_denom: String,
    pub token_out_denom: String,
    pub pool: Arc<Pool>,
}

impl RouteHop {
    /// Hop through `pool` entering with `token_in`. None if the pool does not trade it.
    pub fn through(pool: &Arc<Pool>, token_in: &str) -> Option<Self> {
        let token_out = pool.other_side(token_in)?;
        Some(Self {
            pool_id: pool.id,
            token_in_denom: token_in.to_string(),
            token_out_denom: token_out.to_string(),
            pool: Arc::clone(pool),
        })
    }
}

/// An ordered sequence of hops.
pub type Route = Vec<RouteHop>;
