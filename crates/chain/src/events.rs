//! Liquidation result parsing from transaction events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::{TxEvent, TxResponse};

/// Outcome of one executed liquidation, for external logging and metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationResult {
    pub collateral_denom: String,
    pub debt_denom: String,
    pub collateral_received: String,
    pub debt_repaid: String,
    pub block_height: u64,
    pub tx_hash: String,
    pub executed_at: DateTime<Utc>,
}

fn attribute<'a>(event: &'a TxEvent, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| {
        event
            .attributes
            .iter()
            .find(|a| a.key == *key)
            .map(|a| a.value.as_str())
    })
}

/// Extract every liquidation recorded in the `wasm` events of a transaction.
pub fn parse_liquidation_results(tx: &TxResponse) -> Vec<LiquidationResult> {
    tx.events
        .iter()
        .filter(|e| e.kind == "wasm")
        .filter(|e| attribute(e, &["action"]).map_or(true, |a| a == "liquidate"))
        .filter_map(|event| {
            let collateral_denom = attribute(event, &["collateral_denom"])?;
            let debt_denom = attribute(event, &["debt_denom"])?;
            Some(LiquidationResult {
                collateral_denom: collateral_denom.to_string(),
                debt_denom: debt_denom.to_string(),
                collateral_received: attribute(
                    event,
                    &["collateral_amount_received_by_liquidator", "collateral_amount"],
                )
                .unwrap_or("0")
                .to_string(),
                debt_repaid: attribute(event, &["debt_amount_repaid", "debt_amount"])
                    .unwrap_or("0")
                    .to_string(),
                block_height: tx.height,
                tx_hash: tx.transaction_hash.clone(),
                executed_at: Utc::now(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::EventAttribute;

    fn attr(key: &str, value: &str) -> EventAttribute {
        EventAttribute {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_parse_liquidation_event() {
        let tx = TxResponse {
            height: 42,
            transaction_hash: "HASH".to_string(),
            code: 0,
            raw_log: String::new(),
            events: vec![
                TxEvent {
                    kind: "transfer".to_string(),
                    attributes: vec![attr("amount", "1uosmo")],
                },
                TxEvent {
                    kind: "wasm".to_string(),
                    attributes: vec![
                        attr("action", "liquidate"),
                        attr("collateral_denom", "uatom"),
                        attr("debt_denom", "uusdc"),
                        attr("collateral_amount", "500"),
                        attr("debt_amount", "300"),
                    ],
                },
            ],
        };

        let results = parse_liquidation_results(&tx);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].collateral_denom, "uatom");
        assert_eq!(results[0].debt_repaid, "300");
        assert_eq!(results[0].collateral_received, "500");
        assert_eq!(results[0].block_height, 42);
        assert_eq!(results[0].tx_hash, "HASH");
    }

    #[test]
    fn test_other_wasm_actions_are_ignored() {
        let tx = TxResponse {
            events: vec![TxEvent {
                kind: "wasm".to_string(),
                attributes: vec![
                    attr("action", "withdraw"),
                    attr("collateral_denom", "uatom"),
                    attr("debt_denom", "uusdc"),
                ],
            }],
            ..Default::default()
        };
        assert!(parse_liquidation_results(&tx).is_empty());
    }
}
