//! Protocol data model shared by every crate in the workspace.
//!
//! Amounts and decimals arrive from contracts as strings; they are parsed into
//! `f64` through the [`decimal`] serde adapter and written back as integer
//! strings when a coin leaves the process.

use serde::{Deserialize, Serialize};

/// Serde adapter for decimal values encoded as either strings or numbers.
pub mod decimal {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(f64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Str(s) => s.trim().parse().map_err(de::Error::custom),
            Raw::Num(n) => Ok(n),
        }
    }
}

/// Serde adapter for integers encoded as either strings or numbers.
pub mod integer {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(i64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Str(s) => s.trim().parse().map_err(de::Error::custom),
            Raw::Num(n) => Ok(n),
        }
    }
}

/// A coin as it travels on the wire: integer amount encoded as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

impl Coin {
    /// Build a coin from a float amount, rounded to an integer.
    pub fn new(denom: impl Into<String>, amount: f64) -> Self {
        Self {
            denom: denom.into(),
            amount: format_amount(amount),
        }
    }

    /// Parsed amount, zero when the string is not a number.
    pub fn amount_f64(&self) -> f64 {
        self.amount.parse().unwrap_or(0.0)
    }
}

/// Render an amount as an integer string.
pub fn format_amount(amount: f64) -> String {
    if amount.is_finite() {
        format!("{:.0}", amount)
    } else {
        "0".to_string()
    }
}

/// Anything that can be valued as `amount × price[denom]`.
pub trait Valued {
    fn denom(&self) -> &str;
    fn amount(&self) -> f64;
}

/// A (denom, amount) pair used inside the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub denom: String,
    #[serde(with = "decimal")]
    pub amount: f64,
}

impl Asset {
    pub fn new(denom: impl Into<String>, amount: f64) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }

    pub fn to_coin(&self) -> Coin {
        Coin::new(self.denom.clone(), self.amount)
    }
}

impl From<&Coin> for Asset {
    fn from(coin: &Coin) -> Self {
        Self::new(coin.denom.clone(), coin.amount_f64())
    }
}

impl Valued for Asset {
    fn denom(&self) -> &str {
        &self.denom
    }
    fn amount(&self) -> f64 {
        self.amount
    }
}

fn enabled_by_default() -> bool {
    true
}

/// A collateral deposit. Disabled collaterals do not count towards health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collateral {
    pub denom: String,
    #[serde(with = "decimal")]
    pub amount: f64,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl Collateral {
    pub fn new(denom: impl Into<String>, amount: f64, enabled: bool) -> Self {
        Self {
            denom: denom.into(),
            amount,
            enabled,
        }
    }
}

impl Valued for Collateral {
    fn denom(&self) -> &str {
        &self.denom
    }
    fn amount(&self) -> f64 {
        self.amount
    }
}

/// An outstanding debt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Debt {
    pub denom: String,
    #[serde(with = "decimal")]
    pub amount: f64,
}

impl Debt {
    pub fn new(denom: impl Into<String>, amount: f64) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }
}

impl Valued for Debt {
    fn denom(&self) -> &str {
        &self.denom
    }
    fn amount(&self) -> f64 {
        self.amount
    }
}

/// A borrower position as read from the red bank.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPosition {
    pub address: String,
    pub collaterals: Vec<Collateral>,
    pub debts: Vec<Debt>,
}

/// Liquidation bonus curve parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidationBonusCurve {
    #[serde(with = "decimal")]
    pub starting_lb: f64,
    #[serde(with = "decimal")]
    pub slope: f64,
    #[serde(with = "decimal")]
    pub min_lb: f64,
    #[serde(with = "decimal")]
    pub max_lb: f64,
}

/// Risk parameters for a single denom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetParams {
    pub denom: String,
    #[serde(with = "decimal")]
    pub max_loan_to_value: f64,
    #[serde(with = "decimal")]
    pub liquidation_threshold: f64,
    pub liquidation_bonus: LiquidationBonusCurve,
    #[serde(with = "decimal", default)]
    pub protocol_liquidation_fee: f64,
    #[serde(default)]
    pub credit_manager: CreditManagerSettings,
}

/// Credit manager flags of an asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditManagerSettings {
    #[serde(default)]
    pub whitelisted: bool,
}

/// A red bank market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub denom: String,
    #[serde(with = "decimal")]
    pub collateral_total_scaled: f64,
    #[serde(with = "decimal")]
    pub debt_total_scaled: f64,
    #[serde(with = "decimal")]
    pub liquidity_index: f64,
    #[serde(with = "decimal")]
    pub borrow_index: f64,
}

/// Oracle price for a denom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceResponse {
    pub denom: String,
    #[serde(with = "decimal")]
    pub price: f64,
}

/// Oracle price source registration. Only the denom is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSource {
    pub denom: String,
    #[serde(default)]
    pub price_source: serde_json::Value,
}

/// The on-chain liquidation instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationTx {
    pub collateral_denom: String,
    pub debt_denom: String,
    pub user_address: String,
    pub amount: String,
}
