//! Chain messages and their producers.
//!
//! Messages are kept as typed JSON. Protobuf encoding and signing happen in
//! the signer service behind [`crate::ChainClient`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::credit::Action;
use crate::types::{Coin, LiquidationTx};

/// A single Osmosis pool manager route step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapAmountInRoute {
    pub pool_id: String,
    pub token_out_denom: String,
}

/// A chain message ready to be signed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type_url")]
pub enum ChainMessage {
    #[serde(rename = "/cosmwasm.wasm.v1.MsgExecuteContract")]
    ExecuteContract {
        sender: String,
        contract: String,
        msg: Value,
        funds: Vec<Coin>,
    },
    #[serde(rename = "/cosmos.bank.v1beta1.MsgSend")]
    Send {
        from_address: String,
        to_address: String,
        amount: Vec<Coin>,
    },
    #[serde(rename = "/osmosis.poolmanager.v1beta1.MsgSwapExactAmountIn")]
    SwapExactAmountIn {
        sender: String,
        routes: Vec<SwapAmountInRoute>,
        token_in: Coin,
        token_out_min_amount: String,
    },
}

impl ChainMessage {
    pub fn type_url(&self) -> &'static str {
        match self {
            ChainMessage::ExecuteContract { .. } => "/cosmwasm.wasm.v1.MsgExecuteContract",
            ChainMessage::Send { .. } => "/cosmos.bank.v1beta1.MsgSend",
            ChainMessage::SwapExactAmountIn { .. } => {
                "/osmosis.poolmanager.v1beta1.MsgSwapExactAmountIn"
            }
        }
    }

    /// Top-level key of an execute message (`"liquidate"`, `"withdraw"`, ...).
    pub fn action(&self) -> Option<&str> {
        match self {
            ChainMessage::ExecuteContract { msg, .. } => {
                msg.as_object().and_then(|o| o.keys().next()).map(String::as_str)
            }
            _ => None,
        }
    }

    /// True for any swap, native or contract based.
    pub fn is_swap(&self) -> bool {
        match self {
            ChainMessage::SwapExactAmountIn { .. } => true,
            ChainMessage::ExecuteContract { .. } => self.action() == Some("execute_swap_operations"),
            ChainMessage::Send { .. } => false,
        }
    }
}

pub fn execute_contract(
    sender: &str,
    contract: &str,
    msg: Value,
    funds: Vec<Coin>,
) -> ChainMessage {
    ChainMessage::ExecuteContract {
        sender: sender.to_string(),
        contract: contract.to_string(),
        msg,
        funds,
    }
}

/// Liquidate `tx.user_address`, paying with `tx.amount` of the debt denom.
pub fn liquidate(sender: &str, redbank: &str, tx: &LiquidationTx) -> ChainMessage {
    execute_contract(
        sender,
        redbank,
        json!({
            "liquidate": {
                "user": tx.user_address,
                "collateral_denom": tx.collateral_denom,
            }
        }),
        vec![Coin {
            denom: tx.debt_denom.clone(),
            amount: tx.amount.clone(),
        }],
    )
}

/// Withdraw a collateral. Without an amount the full balance is withdrawn.
pub fn withdraw(sender: &str, redbank: &str, denom: &str, amount: Option<&str>) -> ChainMessage {
    let msg = match amount {
        Some(amount) => json!({ "withdraw": { "denom": denom, "amount": amount } }),
        None => json!({ "withdraw": { "denom": denom } }),
    };
    execute_contract(sender, redbank, msg, vec![])
}

pub fn borrow(sender: &str, redbank: &str, denom: &str, amount: &str) -> ChainMessage {
    execute_contract(
        sender,
        redbank,
        json!({ "borrow": { "denom": denom, "amount": amount } }),
        vec![],
    )
}

pub fn repay(sender: &str, redbank: &str, coin: Coin) -> ChainMessage {
    execute_contract(sender, redbank, json!({ "repay": {} }), vec![coin])
}

pub fn deposit(sender: &str, redbank: &str, coins: Vec<Coin>) -> ChainMessage {
    execute_contract(sender, redbank, json!({ "deposit": {} }), coins)
}

/// Run `actions` atomically inside a credit account.
pub fn update_credit_account(
    sender: &str,
    credit_manager: &str,
    account_id: &str,
    actions: &[Action],
) -> ChainMessage {
    execute_contract(
        sender,
        credit_manager,
        json!({ "update_credit_account": { "account_id": account_id, "actions": actions } }),
        vec![],
    )
}

pub fn create_credit_account(sender: &str, credit_manager: &str) -> ChainMessage {
    execute_contract(
        sender,
        credit_manager,
        json!({ "create_credit_account": "default" }),
        vec![],
    )
}

pub fn send(from: &str, to: &str, amount: Vec<Coin>) -> ChainMessage {
    ChainMessage::Send {
        from_address: from.to_string(),
        to_address: to.to_string(),
        amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liquidate_message() {
        let tx = LiquidationTx {
            collateral_denom: "uatom".to_string(),
            debt_denom: "uusdc".to_string(),
            user_address: "osmo1user".to_string(),
            amount: "1000".to_string(),
        };
        let msg = liquidate("osmo1liq", "osmo1redbank", &tx);
        assert_eq!(msg.action(), Some("liquidate"));

        match msg {
            ChainMessage::ExecuteContract { msg, funds, contract, .. } => {
                assert_eq!(contract, "osmo1redbank");
                assert_eq!(msg["liquidate"]["user"], "osmo1user");
                assert_eq!(msg["liquidate"]["collateral_denom"], "uatom");
                assert_eq!(funds, vec![Coin { denom: "uusdc".into(), amount: "1000".into() }]);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_withdraw_optional_amount() {
        let full = withdraw("s", "rb", "uosmo", None);
        let partial = withdraw("s", "rb", "uosmo", Some("5"));
        match (full, partial) {
            (
                ChainMessage::ExecuteContract { msg: a, .. },
                ChainMessage::ExecuteContract { msg: b, .. },
            ) => {
                assert!(a["withdraw"].get("amount").is_none());
                assert_eq!(b["withdraw"]["amount"], "5");
            }
            _ => panic!("expected execute messages"),
        }
    }

    #[test]
    fn test_message_serializes_with_type_url() {
        let msg = send("a", "b", vec![Coin::new("uosmo", 1.0)]);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type_url"], "/cosmos.bank.v1beta1.MsgSend");
        assert_eq!(value["to_address"], "b");
        assert_eq!(msg.type_url(), "/cosmos.bank.v1beta1.MsgSend");
        assert!(!msg.is_swap());
    }

    #[test]
    fn test_update_credit_account_message() {
        let actions = vec![
            Action::Borrow(Coin::new("uusdc", 1000.0)),
            Action::RefundAllCoinBalances {},
        ];
        let msg = update_credit_account("osmo1liq", "osmo1cm", "12", &actions);
        assert_eq!(msg.action(), Some("update_credit_account"));

        match msg {
            ChainMessage::ExecuteContract { msg, funds, .. } => {
                assert_eq!(msg["update_credit_account"]["account_id"], "12");
                assert_eq!(msg["update_credit_account"]["actions"][0]["borrow"]["amount"], "1000");
                assert_eq!(
                    msg["update_credit_account"]["actions"][1],
                    json!({ "refund_all_coin_balances": {} })
                );
                assert!(funds.is_empty());
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
}
