//! Credit manager liquidations.
//!
//! A credit account is liquidated with one `update_credit_account` call from
//! the liquidator's own credit account. The actions borrow the debt asset,
//! liquidate, turn the won collateral back into the borrowed asset, repay and
//! refund whatever is left to the liquidator's wallet.

mod actions;
mod executor;

pub use actions::{ActionGenerator, RoverInput, SwapVenue};
pub use executor::{RoverExecutor, ROVER_EXECUTED_COUNTER};

use liquidator_chain::{
    CreditPositions, LiquidateRequest, VaultBase, VaultInfo, VaultPosition, VaultPositionType,
};
use std::collections::HashMap;
use tracing::warn;

use crate::error::{LiquidatorError, LiquidatorResult};
use crate::evaluator::PriceMap;

/// Vault info by vault address.
pub type VaultMap = HashMap<String, VaultInfo>;

/// Where a credit account collateral sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollateralKind {
    Deposit,
    Lend,
    Vault(VaultPositionType),
}

/// The collateral a liquidation asks for.
#[derive(Debug, Clone, PartialEq)]
pub struct RoverCollateral {
    /// Coin denom, or the vault address for vault positions.
    pub denom: String,
    pub amount: f64,
    pub value: f64,
    pub kind: CollateralKind,
}

impl RoverCollateral {
    pub fn request(&self) -> LiquidateRequest {
        match self.kind {
            CollateralKind::Deposit => LiquidateRequest::Deposit(self.denom.clone()),
            CollateralKind::Lend => LiquidateRequest::Lend(self.denom.clone()),
            CollateralKind::Vault(position_type) => LiquidateRequest::Vault {
                request_vault: VaultBase {
                    address: self.denom.clone(),
                },
                position_type,
            },
        }
    }
}

/// The debt a liquidation repays.
#[derive(Debug, Clone, PartialEq)]
pub struct RoverDebt {
    pub denom: String,
    pub amount: f64,
    pub price: f64,
}

impl RoverDebt {
    pub fn value(&self) -> f64 {
        self.amount * self.price
    }
}

fn price_of(prices: &PriceMap, denom: &str) -> f64 {
    prices.get(denom).copied().unwrap_or(0.0)
}

/// Value of a vault position and the part of it worth liquidating.
///
/// Locked and unlocked shares are priced through the vault's LP share ratio.
/// The largest unlocking coin is taken instead when it is worth more.
pub fn vault_value(
    position: &VaultPosition,
    vaults: &VaultMap,
    prices: &PriceMap,
) -> LiquidatorResult<(f64, VaultPositionType)> {
    let info = vaults
        .get(&position.vault.address)
        .ok_or(LiquidatorError::UnsupportedVault)?;
    let lp_price = price_of(prices, &info.base_token);
    if lp_price <= 0.0 {
        return Err(LiquidatorError::UnsupportedAsset(info.base_token.clone()));
    }

    let locked = position.amount.locked();
    let unlocked = position.amount.unlocked();
    let (shares, position_type) = if locked > unlocked {
        (locked, VaultPositionType::Locked)
    } else {
        (unlocked, VaultPositionType::Unlocked)
    };
    let shares_value = shares * info.lp_share_ratio * lp_price;

    let unlocking_value = position
        .amount
        .unlocking()
        .iter()
        .map(|u| u.coin.amount_f64() * price_of(prices, &u.coin.denom))
        .fold(0.0, f64::max);

    if unlocking_value > shares_value {
        Ok((unlocking_value, VaultPositionType::Unlocking))
    } else {
        Ok((shares_value, position_type))
    }
}

/// Largest collateral by value across deposits, lends and vaults.
///
/// Vaults that cannot be priced are skipped.
pub fn best_collateral(
    positions: &CreditPositions,
    prices: &PriceMap,
    vaults: &VaultMap,
) -> LiquidatorResult<RoverCollateral> {
    let coins = positions
        .deposits
        .iter()
        .map(|c| (c, CollateralKind::Deposit))
        .chain(positions.lends.iter().map(|c| (c, CollateralKind::Lend)))
        .map(|(coin, kind)| {
            let amount = coin.amount_f64();
            RoverCollateral {
                denom: coin.denom.clone(),
                amount,
                value: amount * price_of(prices, &coin.denom),
                kind,
            }
        });

    let vault_positions = positions.vaults.iter().filter_map(|position| {
        match vault_value(position, vaults, prices) {
            Ok((value, position_type)) => Some(RoverCollateral {
                denom: position.vault.address.clone(),
                amount: match position_type {
                    VaultPositionType::Locked => position.amount.locked(),
                    _ => position.amount.unlocked(),
                },
                value,
                kind: CollateralKind::Vault(position_type),
            }),
            Err(e) => {
                warn!(vault = %position.vault.address, error = %e, "Skipping vault position");
                None
            }
        }
    });

    coins
        .chain(vault_positions)
        .filter(|c| c.value > 0.0)
        .max_by(|a, b| a.value.total_cmp(&b.value))
        .ok_or_else(|| LiquidatorError::MissingPositionData(positions.account_id.clone()))
}

/// Largest debt by value.
pub fn best_debt(positions: &CreditPositions, prices: &PriceMap) -> LiquidatorResult<RoverDebt> {
    let debt = positions
        .debts
        .iter()
        .map(|d| RoverDebt {
            denom: d.denom.clone(),
            amount: d.amount,
            price: price_of(prices, &d.denom),
        })
        .max_by(|a, b| a.value().total_cmp(&b.value()))
        .ok_or_else(|| LiquidatorError::MissingPositionData(positions.account_id.clone()))?;

    if debt.price <= 0.0 {
        return Err(LiquidatorError::UnsupportedAsset(debt.denom));
    }
    Ok(debt)
}
