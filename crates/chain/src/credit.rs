//! Credit manager accounts, vault positions and account actions.
//!
//! A credit account liquidation is a single `update_credit_account` call
//! carrying an ordered list of [`Action`]s that the credit manager executes
//! atomically.

use serde::{Deserialize, Serialize};

use crate::pool::RouteHop;
use crate::types::{decimal, Coin, Debt};

/// Amount placeholder telling the credit manager to use the whole balance.
pub const ACCOUNT_BALANCE: &str = "account_balance";

/// Shares sent to `preview_redeem` when pricing vault shares.
pub const REDEEM_BASE: f64 = 1e16;

/// A credit account and everything it holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreditPositions {
    pub account_id: String,
    #[serde(default)]
    pub deposits: Vec<Coin>,
    #[serde(default)]
    pub lends: Vec<Coin>,
    #[serde(default)]
    pub debts: Vec<Debt>,
    #[serde(default)]
    pub vaults: Vec<VaultPosition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultBase {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultPosition {
    pub vault: VaultBase,
    pub amount: VaultPositionAmount,
}

/// Vault shares, either freely withdrawable or in a lockup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultPositionAmount {
    Unlocked(#[serde(with = "decimal")] f64),
    Locking(LockingVaultAmount),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LockingVaultAmount {
    #[serde(with = "decimal")]
    pub locked: f64,
    #[serde(default)]
    pub unlocking: Vec<VaultUnlockingPosition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultUnlockingPosition {
    pub id: u64,
    /// LP tokens being released.
    pub coin: Coin,
}

impl VaultPositionAmount {
    pub fn locked(&self) -> f64 {
        match self {
            VaultPositionAmount::Locking(locking) => locking.locked,
            VaultPositionAmount::Unlocked(_) => 0.0,
        }
    }

    pub fn unlocked(&self) -> f64 {
        match self {
            VaultPositionAmount::Unlocked(amount) => *amount,
            VaultPositionAmount::Locking(_) => 0.0,
        }
    }

    pub fn unlocking(&self) -> &[VaultUnlockingPosition] {
        match self {
            VaultPositionAmount::Locking(locking) => &locking.unlocking,
            VaultPositionAmount::Unlocked(_) => &[],
        }
    }
}

/// Which part of a vault position a liquidation takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultPositionType {
    #[serde(rename = "l_o_c_k_e_d")]
    Locked,
    #[serde(rename = "u_n_l_o_c_k_e_d")]
    Unlocked,
    #[serde(rename = "u_n_l_o_c_k_i_n_g")]
    Unlocking,
}

/// A vault listed in the params contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultConfig {
    pub addr: String,
}

/// What a vault holds and how its shares convert to LP tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct VaultInfo {
    pub address: String,
    /// LP token the vault is denominated in.
    pub base_token: String,
    pub vault_token: String,
    /// LP tokens per vault share.
    pub lp_share_ratio: f64,
}

/// The position a liquidator asks for in return for repaying debt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidateRequest {
    Deposit(String),
    Lend(String),
    Vault {
        request_vault: VaultBase,
        position_type: VaultPositionType,
    },
}

/// A coin whose amount may be [`ACCOUNT_BALANCE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCoin {
    pub denom: String,
    pub amount: String,
}

impl ActionCoin {
    pub fn account_balance(denom: impl Into<String>) -> Self {
        Self {
            denom: denom.into(),
            amount: ACCOUNT_BALANCE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsmoSwap {
    pub pool_id: u64,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AstroSwap {
    pub from: String,
    pub to: String,
}

/// Route handed to the credit manager's swapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapperRoute {
    Osmo { swaps: Vec<OsmoSwap> },
    Astro { swaps: Vec<AstroSwap> },
}

impl SwapperRoute {
    /// Osmosis pool manager route, one pool id per hop.
    pub fn osmo(route: &[RouteHop]) -> Self {
        SwapperRoute::Osmo {
            swaps: route
                .iter()
                .map(|hop| OsmoSwap {
                    pool_id: hop.pool_id.0,
                    to: hop.token_out_denom.clone(),
                })
                .collect(),
        }
    }

    /// Astroport router operations, addressed by denoms.
    pub fn astro(route: &[RouteHop]) -> Self {
        SwapperRoute::Astro {
            swaps: route
                .iter()
                .map(|hop| AstroSwap {
                    from: hop.token_in_denom.clone(),
                    to: hop.token_out_denom.clone(),
                })
                .collect(),
        }
    }
}

/// One step of an `update_credit_account` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Borrow(Coin),
    Liquidate {
        debt_coin: Coin,
        liquidatee_account_id: String,
        request: LiquidateRequest,
    },
    SwapExactIn {
        coin_in: ActionCoin,
        denom_out: String,
        min_receive: String,
        route: Option<SwapperRoute>,
    },
    WithdrawLiquidity {
        lp_token: ActionCoin,
        slippage: String,
    },
    Repay {
        coin: ActionCoin,
    },
    RefundAllCoinBalances {},
}

impl Action {
    /// The action's wire name.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Borrow(_) => "borrow",
            Action::Liquidate { .. } => "liquidate",
            Action::SwapExactIn { .. } => "swap_exact_in",
            Action::WithdrawLiquidity { .. } => "withdraw_liquidity",
            Action::Repay { .. } => "repay",
            Action::RefundAllCoinBalances {} => "refund_all_coin_balances",
        }
    }
}
