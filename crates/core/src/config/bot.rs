//! Configuration management with profile support.
//!
//! Provides centralized configuration for all worker parameters with
//! support for different profiles (testing, production).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure containing all worker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Route search and swap pricing
    #[serde(default)]
    pub router: RouterConfig,

    /// Liquidation sizing and batch construction
    #[serde(default)]
    pub liquidation: LiquidationConfig,

    /// Main loop timing and refresh cadence
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Fee estimation
    #[serde(default)]
    pub gas: GasConfig,

    /// Credit manager liquidations
    #[serde(default)]
    pub rover: RoverConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Route search and swap pricing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Maximum hops in a route
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,

    /// Minimum reserve value for an XYK pool to be routed through
    #[serde(default = "default_min_xyk_liquidity")]
    pub min_xyk_liquidity: f64,

    /// Downward slippage applied to expected swap outputs (fraction)
    #[serde(default = "default_swap_slippage")]
    pub swap_slippage: f64,
}

fn default_max_hops() -> usize {
    2
}
fn default_min_xyk_liquidity() -> f64 {
    20_000_000_000.0
}
fn default_swap_slippage() -> f64 {
    0.025
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_hops: default_max_hops(),
            min_xyk_liquidity: default_min_xyk_liquidity(),
            swap_slippage: default_swap_slippage(),
        }
    }
}

/// Liquidation sizing and batch construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationConfig {
    /// Neutral value at or below which no liquidation is attempted
    #[serde(default = "default_dust_floor")]
    pub dust_floor: f64,

    /// Fraction of available neutral value that may be spent
    #[serde(default = "default_sizing_factor")]
    pub sizing_factor: f64,

    /// Fraction of the sized amount sent with the liquidate message
    #[serde(default = "default_repay_factor")]
    pub repay_factor: f64,

    /// Over-allocation when swapping neutral into a debt asset
    #[serde(default = "default_debt_swap_buffer")]
    pub debt_swap_buffer: f64,

    /// Gas denom amount never swapped away
    #[serde(default = "default_gas_reserve")]
    pub gas_reserve: f64,

    /// Minimum value for a won collateral or wallet coin to be swept
    #[serde(default = "default_collateral_sweep_floor")]
    pub collateral_sweep_floor: f64,

    /// Candidates at or below this health factor are ignored
    #[serde(default = "default_min_health_factor")]
    pub min_health_factor: f64,

    /// Candidates at or above this health factor are ignored
    #[serde(default = "default_max_health_factor")]
    pub max_health_factor: f64,

    /// Sub-account neutral balance above which funds go back to the master
    #[serde(default = "default_stable_balance_threshold")]
    pub stable_balance_threshold: f64,
}

fn default_dust_floor() -> f64 {
    1000.0
}
fn default_sizing_factor() -> f64 {
    0.95
}
fn default_repay_factor() -> f64 {
    0.98
}
fn default_debt_swap_buffer() -> f64 {
    1.02
}
fn default_gas_reserve() -> f64 {
    100_000_000.0
}
fn default_collateral_sweep_floor() -> f64 {
    1_000_000.0
}
fn default_min_health_factor() -> f64 {
    0.3
}
fn default_max_health_factor() -> f64 {
    0.97
}
fn default_stable_balance_threshold() -> f64 {
    5_000_000_000.0
}

impl Default for LiquidationConfig {
    fn default() -> Self {
        Self {
            dust_floor: default_dust_floor(),
            sizing_factor: default_sizing_factor(),
            repay_factor: default_repay_factor(),
            debt_swap_buffer: default_debt_swap_buffer(),
            gas_reserve: default_gas_reserve(),
            collateral_sweep_floor: default_collateral_sweep_floor(),
            min_health_factor: default_min_health_factor(),
            max_health_factor: default_max_health_factor(),
            stable_balance_threshold: default_stable_balance_threshold(),
        }
    }
}

/// Main loop timing and refresh cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Minimum time between pool snapshot refreshes (ms)
    #[serde(default = "default_pools_refresh_window")]
    pub pools_refresh_window_ms: u64,

    /// Sleep when the feed has nothing to liquidate (ms)
    #[serde(default = "default_idle_backoff")]
    pub idle_backoff_ms: u64,

    /// Retries for protocol data fetches
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,

    /// Delay between protocol data retries (ms)
    #[serde(default = "default_fetch_retry_delay")]
    pub fetch_retry_delay_ms: u64,

    /// Oracle price refresh interval (seconds)
    #[serde(default = "default_price_refresh")]
    pub price_refresh_secs: u64,

    /// Asset params, price sources, markets and target HF refresh (seconds)
    #[serde(default = "default_params_refresh")]
    pub params_refresh_secs: u64,

    /// Maximum concurrent liquidations in multi-account mode
    #[serde(default = "default_max_liquidators")]
    pub max_liquidators: usize,
}

fn default_pools_refresh_window() -> u64 {
    60_000
}
fn default_idle_backoff() -> u64 {
    200
}
fn default_fetch_retries() -> u32 {
    5
}
fn default_fetch_retry_delay() -> u64 {
    5_000
}
fn default_price_refresh() -> u64 {
    60
}
fn default_params_refresh() -> u64 {
    600
}
fn default_max_liquidators() -> usize {
    10
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pools_refresh_window_ms: default_pools_refresh_window(),
            idle_backoff_ms: default_idle_backoff(),
            fetch_retries: default_fetch_retries(),
            fetch_retry_delay_ms: default_fetch_retry_delay(),
            price_refresh_secs: default_price_refresh(),
            params_refresh_secs: default_params_refresh(),
            max_liquidators: default_max_liquidators(),
        }
    }
}

impl ExecutorConfig {
    pub fn pools_refresh_window(&self) -> Duration {
        Duration::from_millis(self.pools_refresh_window_ms)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn fetch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_retry_delay_ms)
    }

    pub fn price_refresh(&self) -> Duration {
        Duration::from_secs(self.price_refresh_secs)
    }

    pub fn params_refresh(&self) -> Duration {
        Duration::from_secs(self.params_refresh_secs)
    }
}

/// Fee estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasConfig {
    /// Padding applied to simulated gas
    #[serde(default = "default_simulate_multiplier")]
    pub simulate_multiplier: f64,

    /// Gas price floor
    #[serde(default = "default_min_gas_price")]
    pub min_gas_price: f64,
}

fn default_simulate_multiplier() -> f64 {
    liquidator_chain::gas::DEFAULT_SIMULATE_MULTIPLIER
}
fn default_min_gas_price() -> f64 {
    liquidator_chain::gas::DEFAULT_MIN_GAS_PRICE
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            simulate_multiplier: default_simulate_multiplier(),
            min_gas_price: default_min_gas_price(),
        }
    }
}

/// Credit manager liquidations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoverConfig {
    /// Gas token balance below which a liquidator is topped up
    #[serde(default = "default_min_gas_tokens")]
    pub min_gas_tokens: f64,

    /// Largest debt value repaid in one liquidation
    #[serde(default = "default_debt_ceiling")]
    pub debt_ceiling: f64,

    /// Share of the collateral value a liquidation may repay
    #[serde(default = "default_close_factor")]
    pub close_factor: f64,

    /// Downward slippage on credit account swaps (fraction)
    #[serde(default = "default_rover_swap_slippage")]
    pub swap_slippage: f64,

    /// Slippage passed to `withdraw_liquidity` (fraction)
    #[serde(default = "default_withdraw_liquidity_slippage")]
    pub withdraw_liquidity_slippage: f64,

    /// Debt value above which winnings are swapped to neutral
    #[serde(default = "default_swap_winnings_floor")]
    pub swap_winnings_floor: f64,

    /// Liquidator neutral balance above which funds go back to the master
    #[serde(default = "default_rover_stable_balance_threshold")]
    pub stable_balance_threshold: f64,

    /// Vault list refresh interval (seconds)
    #[serde(default = "default_vault_refresh")]
    pub vault_refresh_secs: u64,

    /// Liquidator balance and gas check interval (seconds)
    #[serde(default = "default_balance_refresh")]
    pub balance_refresh_secs: u64,
}

fn default_min_gas_tokens() -> f64 {
    1_000_000.0
}
fn default_debt_ceiling() -> f64 {
    3_000_000_000.0
}
fn default_close_factor() -> f64 {
    0.5
}
fn default_rover_swap_slippage() -> f64 {
    0.005
}
fn default_withdraw_liquidity_slippage() -> f64 {
    0.01
}
fn default_swap_winnings_floor() -> f64 {
    1_000_000.0
}
fn default_rover_stable_balance_threshold() -> f64 {
    5_000_000.0
}
fn default_vault_refresh() -> u64 {
    1_800
}
fn default_balance_refresh() -> u64 {
    20
}

impl Default for RoverConfig {
    fn default() -> Self {
        Self {
            min_gas_tokens: default_min_gas_tokens(),
            debt_ceiling: default_debt_ceiling(),
            close_factor: default_close_factor(),
            swap_slippage: default_rover_swap_slippage(),
            withdraw_liquidity_slippage: default_withdraw_liquidity_slippage(),
            swap_winnings_floor: default_swap_winnings_floor(),
            stable_balance_threshold: default_rover_stable_balance_threshold(),
            vault_refresh_secs: default_vault_refresh(),
            balance_refresh_secs: default_balance_refresh(),
        }
    }
}

impl RoverConfig {
    pub fn vault_refresh(&self) -> Duration {
        Duration::from_secs(self.vault_refresh_secs)
    }

    pub fn balance_refresh(&self) -> Duration {
        Duration::from_secs(self.balance_refresh_secs)
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            router: RouterConfig::default(),
            liquidation: LiquidationConfig::default(),
            executor: ExecutorConfig::default(),
            gas: GasConfig::default(),
            rover: RoverConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Create a testing profile that accepts small positions.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            router: RouterConfig {
                min_xyk_liquidity: 1_000_000.0, // Testnet pools are shallow
                ..Default::default()
            },
            liquidation: LiquidationConfig {
                collateral_sweep_floor: 10_000.0,
                min_health_factor: 0.0,
                max_health_factor: 1.0,
                stable_balance_threshold: 100_000_000.0,
                ..Default::default()
            },
            executor: ExecutorConfig {
                pools_refresh_window_ms: 15_000,
                fetch_retry_delay_ms: 1_000,
                price_refresh_secs: 15,
                params_refresh_secs: 120,
                max_liquidators: 2,
                ..Default::default()
            },
            gas: GasConfig::default(),
            rover: RoverConfig {
                min_gas_tokens: 100_000.0,
                vault_refresh_secs: 300,
                ..Default::default()
            },
        }
    }

    /// Create a production profile with conservative settings.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            router: RouterConfig::default(),
            liquidation: LiquidationConfig::default(),
            executor: ExecutorConfig {
                max_liquidators: 20,
                ..Default::default()
            },
            gas: GasConfig {
                simulate_multiplier: 1.4,
                ..Default::default()
            },
            rover: RoverConfig::default(),
        }
    }

    /// Get profile from environment variable BOT_PROFILE, or default.
    /// Supported values: testing, production, or a path to a TOML file.
    ///
    /// `MIN_LIQUIDATION_LTV` / `MAX_LIQUIDATION_LTV` override the candidate
    /// health factor window of any profile.
    pub fn from_env() -> Self {
        let profile = std::env::var("BOT_PROFILE").unwrap_or_else(|_| "default".to_string());
        let mut config = match profile.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            path if path.ends_with(".toml") => Self::from_file(&profile).unwrap_or_else(|e| {
                tracing::warn!(path = %profile, error = %e, "Failed to load config file, using defaults");
                Self::default()
            }),
            _ => Self::default(),
        };

        if let Some(min) = env_f64("MIN_LIQUIDATION_LTV") {
            config.liquidation.min_health_factor = min;
        }
        if let Some(max) = env_f64("MAX_LIQUIDATION_LTV") {
            config.liquidation.max_health_factor = max;
        }
        config
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Worker configuration loaded");
        tracing::info!(
            max_hops = self.router.max_hops,
            min_xyk_liquidity = self.router.min_xyk_liquidity,
            swap_slippage = self.router.swap_slippage,
            "Router parameters"
        );
        tracing::info!(
            dust_floor = self.liquidation.dust_floor,
            min_hf = self.liquidation.min_health_factor,
            max_hf = self.liquidation.max_health_factor,
            gas_reserve = self.liquidation.gas_reserve,
            "Liquidation parameters"
        );
        tracing::info!(
            pools_refresh_ms = self.executor.pools_refresh_window_ms,
            price_refresh_secs = self.executor.price_refresh_secs,
            params_refresh_secs = self.executor.params_refresh_secs,
            max_liquidators = self.executor.max_liquidators,
            "Executor timing"
        );
        tracing::info!(
            debt_ceiling = self.rover.debt_ceiling,
            close_factor = self.rover.close_factor,
            swap_slippage = self.rover.swap_slippage,
            min_gas_tokens = self.rover.min_gas_tokens,
            "Credit manager parameters"
        );
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Global configuration holder using lazy initialization.
use std::sync::OnceLock;

static GLOBAL_CONFIG: OnceLock<BotConfig> = OnceLock::new();

/// Initialize global configuration.
pub fn init_config(config: BotConfig) {
    let _ = GLOBAL_CONFIG.set(config);
}

/// Get the global configuration, initializing from environment if needed.
pub fn config() -> &'static BotConfig {
    GLOBAL_CONFIG.get_or_init(BotConfig::from_env)
}
