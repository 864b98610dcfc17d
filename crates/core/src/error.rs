//! Named domain errors.
//!
//! Each aborts only the candidate being processed; the execution loop logs
//! it and moves on.

use liquidator_chain::PoolId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LiquidatorError {
    #[error("Failed to find a suitable route for given assets")]
    NoRouteForSwap,

    #[error("Failed to find a valid market to borrow from")]
    NoValidMarket,

    #[error("Failed to find vault by given address")]
    UnsupportedVault,

    #[error("Failed to find price for asset with given denom: {0}")]
    UnsupportedAsset(String),

    #[error("Failed to find specified pool: {0}")]
    PoolNotFound(PoolId),

    #[error("No data returned for given account")]
    NoRoverData,

    #[error("Pool {0} uses an unsupported pricing model")]
    UnsupportedPool(PoolId),

    #[error("Position {0} has no collateral or no debt")]
    MissingPositionData(String),

    #[error("No neutral asset available to liquidate with")]
    NoNeutralAsset,
}

pub type LiquidatorResult<T> = std::result::Result<T, LiquidatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            LiquidatorError::NoRouteForSwap.to_string(),
            "Failed to find a suitable route for given assets"
        );
        assert_eq!(
            LiquidatorError::PoolNotFound(PoolId(7)).to_string(),
            "Failed to find specified pool: 7"
        );
    }

    #[test]
    fn test_converts_into_anyhow() {
        let err: anyhow::Error = LiquidatorError::NoValidMarket.into();
        assert_eq!(err.downcast_ref::<LiquidatorError>(), Some(&LiquidatorError::NoValidMarket));
    }
}
