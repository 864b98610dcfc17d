//! Per-chain network constants.
//!
//! Every supported `(chain, network)` pair has one row in [`NETWORKS`]. The
//! entry point resolves a row once and hands the resulting [`NetworkConfig`]
//! to everything else; nothing downstream branches on the chain name.

use anyhow::{anyhow, Context, Result};
use liquidator_chain::ProtocolContracts;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Chains the worker can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainName {
    Osmosis,
    Neutron,
}

impl ChainName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainName::Osmosis => "osmosis",
            ChainName::Neutron => "neutron",
        }
    }
}

impl fmt::Display for ChainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "osmosis" => Ok(ChainName::Osmosis),
            "neutron" => Ok(ChainName::Neutron),
            other => Err(anyhow!("Unsupported chain: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl FromStr for Network {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(anyhow!("Unsupported network: {other}")),
        }
    }
}

/// Contract addresses used by the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkContracts {
    pub redbank: String,
    pub oracle: String,
    #[serde(default)]
    pub params: String,
    #[serde(default)]
    pub credit_manager: String,
    #[serde(default)]
    pub account_nft: String,
    #[serde(default)]
    pub swapper: String,
}

/// Resolved constants for one chain/network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain_name: ChainName,
    pub network: Network,
    /// Bech32 address prefix
    pub prefix: String,
    /// Denom fees are paid in
    pub gas_denom: String,
    /// Settlement asset collaterals are swapped into
    pub neutral_denom: String,
    pub contracts: NetworkContracts,
    #[serde(default)]
    pub astroport_factory: Option<String>,
    #[serde(default)]
    pub astroport_router: Option<String>,
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,
    #[serde(default = "default_profit_margin")]
    pub liquidation_profit_margin_percent: f64,
}

fn default_safety_margin() -> f64 {
    0.05
}

fn default_profit_margin() -> f64 {
    0.01
}

struct NetworkEntry {
    chain_name: ChainName,
    network: Network,
    prefix: &'static str,
    gas_denom: &'static str,
    neutral_denom: &'static str,
    redbank: &'static str,
    oracle: &'static str,
    params: &'static str,
    credit_manager: &'static str,
    account_nft: &'static str,
    swapper: &'static str,
    astroport_factory: Option<&'static str>,
    astroport_router: Option<&'static str>,
}

static NETWORKS: [NetworkEntry; 4] = [
    NetworkEntry {
        chain_name: ChainName::Osmosis,
        network: Network::Mainnet,
        prefix: "osmo",
        gas_denom: "uosmo",
        neutral_denom: "ibc/498A0751C798A0D9A389AA3691123DADA57DAA4FE165D5C75894505B876BA6E4",
        redbank: "osmo1c3ljch9dfw5kf52nfwpxd2zmj2ese7agnx0p9tenkrryasrle5sqf3ftpg",
        oracle: "osmo1mhznfr60vjdp2gejhyv2gax9nvyyzhd3z0qcwseyetkfustjauzqycsy2g",
        params: "osmo1nlmdxt9ctql2jr47qd4fpgzg84cjswxyw6q99u4y4u4q6c2f5ksq7ysent",
        credit_manager: "osmo1f2m24wktq0sw3c0lexlg7fv4kngwyttvzws3a3r3al9ld2s2pvds87jqvf",
        account_nft: "osmo1450hrg6dv2l58c0rvdwx8ec2a0r6dd50hn4frk370tpvqjhy8khqw7sw09",
        swapper: "osmo1wee0z8c7tcawyl647eapqs4a88q8jpa7ddy6nn2nrs7t47p2zhxswetwla",
        astroport_factory: None,
        astroport_router: None,
    },
    NetworkEntry {
        chain_name: ChainName::Osmosis,
        network: Network::Testnet,
        prefix: "osmo",
        gas_denom: "uosmo",
        // No USDC pools on testnet
        neutral_denom: "uosmo",
        redbank: "osmo1t0dl6r27phqetfu0geaxrng0u9zn8qgrdwztapt5xr32adtwptaq6vwg36",
        oracle: "osmo1dqz2u3c8rs5e7w5fnchsr2mpzzsxew69wtdy0aq4jsd76w7upmsstqe0s8",
        params: "",
        credit_manager: "osmo1f2m24wktq0sw3c0lexlg7fv4kngwyttvzws3a3r3al9ld2s2pvds87jqvf",
        account_nft: "osmo1450hrg6dv2l58c0rvdwx8ec2a0r6dd50hn4frk370tpvqjhy8khqw7sw09",
        swapper: "osmo1wee0z8c7tcawyl647eapqs4a88q8jpa7ddy6nn2nrs7t47p2zhxswetwla",
        astroport_factory: None,
        astroport_router: None,
    },
    NetworkEntry {
        chain_name: ChainName::Neutron,
        network: Network::Mainnet,
        prefix: "neutron",
        gas_denom: "untrn",
        neutral_denom: "ibc/2FF082B65C88E4B6D5EF1DB243CDA1D331D002759E938A0F5CD3FFDC5D53B3E349",
        redbank: "neutron1n97wnm7q6d2hrcna3rqlnyqw2we6k0l8uqvmyqq6gsml92epdu7quugyph",
        oracle: "neutron1dwp6m7pdrz6rnhdyrx5ha0acsduydqcpzkylvfgspsz60pj2agxqaqrr7g",
        params: "",
        credit_manager: "neutron1qdzn3l4kn7gsjna2tfpg3g3mwd6kunx4p50lfya59k02846xas6qslgs3r",
        account_nft: "neutron184kvu96rqtetmunkkmhu5hru8yaqg7qfhd8ldu5avjnamdqu69squrh3f5",
        swapper: "neutron1udr9fc3kd743dezrj38v2ac74pxxr6qsx4xt4nfpcfczgw52rvyqyjp5au",
        astroport_factory: Some("neutron1hptk0k5kng7hjy35vmh009qd5m6l33609nypgf2yc6nqnewduqasxplt4e"),
        astroport_router: Some("neutron1rwj6mfxzzrwskur73v326xwuff52vygqk73lr7azkehnfzz5f5wskwekf4"),
    },
    NetworkEntry {
        chain_name: ChainName::Neutron,
        network: Network::Testnet,
        prefix: "neutron",
        gas_denom: "untrn",
        neutral_denom: "ibc/EFB00E728F98F0C4BBE8CA362123ACAB466EDA2826DC6837E49F4C1902F21BBA",
        redbank: "neutron15dld0kmz0zl89zt4yeks4gy8mhmawy3gp4x5rwkcgkj5krqvu9qs4q7wve",
        oracle: "neutron1nx9txtmpmkt58gxka20z72wdkguw4n0606zkeqvelv7q7uc06zmsym3qgx",
        params: "",
        credit_manager: "neutron1zkxezh5e6jvg0h3kj50hz5d0yrgagkp0c3gcdr6stulw7fye9xlqygj2gz",
        account_nft: "neutron1pgk4ttz3ned9xvqlg79f4jumjet0443uqh2rga9ahalzgxqngtrqrszdna",
        swapper: "neutron1dyltrt8aekyprrs3l838r02cpceed48hjtz3x8vqrzm0tukm3ktqtp5j49",
        astroport_factory: Some("neutron1jj0scx400pswhpjes589aujlqagxgcztw04srynmhf0f6zplzn2qqmhwj7"),
        astroport_router: Some("neutron12jm24l9lr9cupufqjuxpdjnnweana4h66tsx5cl800mke26td26sq7m05p"),
    },
];

impl From<&NetworkEntry> for NetworkConfig {
    fn from(entry: &NetworkEntry) -> Self {
        Self {
            chain_name: entry.chain_name,
            network: entry.network,
            prefix: entry.prefix.to_string(),
            gas_denom: entry.gas_denom.to_string(),
            neutral_denom: entry.neutral_denom.to_string(),
            contracts: NetworkContracts {
                redbank: entry.redbank.to_string(),
                oracle: entry.oracle.to_string(),
                params: entry.params.to_string(),
                credit_manager: entry.credit_manager.to_string(),
                account_nft: entry.account_nft.to_string(),
                swapper: entry.swapper.to_string(),
            },
            astroport_factory: entry.astroport_factory.map(str::to_string),
            astroport_router: entry.astroport_router.map(str::to_string),
            safety_margin: default_safety_margin(),
            liquidation_profit_margin_percent: default_profit_margin(),
        }
    }
}

impl NetworkConfig {
    /// Look up the built-in constants for a chain/network pair.
    pub fn lookup(chain_name: ChainName, network: Network) -> Self {
        NETWORKS
            .iter()
            .find(|e| e.chain_name == chain_name && e.network == network)
            .map(NetworkConfig::from)
            // Every (chain, network) combination has a row
            .unwrap_or_else(|| NetworkConfig::from(&NETWORKS[0]))
    }

    /// Load a full network config from a TOML file, expanding `${VAR}` references.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read network config {}", path.display()))?;
        let config: NetworkConfig = toml::from_str(&expand_env(&content))?;
        Ok(config)
    }

    /// Resolve from `CHAIN_NAME`/`NETWORK`, or from the file named by `NETWORK_CONFIG`.
    /// `MARS_PARAMS_ADDRESS`, `CREDIT_MANAGER_ADDRESS`, `ACCOUNT_NFT_ADDRESS` and
    /// `SWAPPER_ADDRESS` override their contract either way.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("NETWORK_CONFIG") {
            Ok(path) if !path.is_empty() => Self::from_file(path)?,
            _ => {
                let chain_name: ChainName = std::env::var("CHAIN_NAME")
                    .unwrap_or_else(|_| "osmosis".to_string())
                    .parse()?;
                let network: Network = std::env::var("NETWORK")
                    .unwrap_or_else(|_| "mainnet".to_string())
                    .parse()?;
                Self::lookup(chain_name, network)
            }
        };

        let overrides = [
            ("MARS_PARAMS_ADDRESS", &mut config.contracts.params),
            ("CREDIT_MANAGER_ADDRESS", &mut config.contracts.credit_manager),
            ("ACCOUNT_NFT_ADDRESS", &mut config.contracts.account_nft),
            ("SWAPPER_ADDRESS", &mut config.contracts.swapper),
        ];
        for (key, slot) in overrides {
            if let Ok(address) = std::env::var(key) {
                if !address.is_empty() {
                    *slot = address;
                }
            }
        }
        Ok(config)
    }

    /// Addresses the protocol querier talks to.
    pub fn protocol_contracts(&self) -> ProtocolContracts {
        ProtocolContracts {
            redbank: self.contracts.redbank.clone(),
            oracle: self.contracts.oracle.clone(),
            params: self.contracts.params.clone(),
            credit_manager: self.contracts.credit_manager.clone(),
            account_nft: self.contracts.account_nft.clone(),
        }
    }

    pub fn uses_astroport(&self) -> bool {
        self.astroport_factory.is_some()
    }

    pub fn log_config(&self) {
        tracing::info!(
            chain = %self.chain_name,
            network = ?self.network,
            gas_denom = %self.gas_denom,
            neutral_denom = %self.neutral_denom,
            redbank = %self.contracts.redbank,
            astroport = self.uses_astroport(),
            "Network configuration loaded"
        );
    }
}

/// Environment-provided endpoints and accounts.
#[derive(Debug, Clone, Default)]
pub struct Endpoints {
    pub lcd: String,
    pub api_key: Option<String>,
    pub signer: String,
    pub sqs: Option<String>,
    pub astroport_api: Option<String>,
    pub mars_api: String,
    pub liquidator_address: String,
    pub sub_addresses: Vec<String>,
}

impl Endpoints {
    pub fn from_env() -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            std::env::var(key).with_context(|| format!("{key} must be set"))
        };
        let optional = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        Ok(Self {
            lcd: required("LCD_ENDPOINT")?,
            api_key: optional("API_KEY"),
            signer: required("SIGNER_ENDPOINT")?,
            sqs: optional("SQS_URL"),
            astroport_api: optional("ASTROPORT_API_URL"),
            mars_api: optional("MARS_API_ENDPOINT")
                .unwrap_or_else(|| "https://api.marsprotocol.io".to_string()),
            liquidator_address: required("LIQUIDATOR_ADDRESS")?,
            sub_addresses: optional("LIQUIDATOR_SUB_ADDRESSES")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
        })
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Expand ${VAR_NAME} patterns with environment variable values.
fn expand_env(s: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([^}]+)\}") else {
        return s.to_string();
    };

    re.replace_all(s, |caps: &regex_lite::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
