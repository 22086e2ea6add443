//! Relay configuration loaded from `.env` and the environment

use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::orchestrator::{CircuitBreakerConfig, OrchestratorConfig};
use crate::submitter::RetryConfig;

/// Main configuration for the relay
#[derive(Debug, Clone)]
pub struct Config {
    pub source: SourceChainConfig,
    pub destination: DestinationChainConfig,
    pub relayer: RelayerConfig,
    pub api: ApiConfig,
}

/// Source (lock) chain configuration
#[derive(Debug, Clone)]
pub struct SourceChainConfig {
    pub name: String,
    /// JSON-RPC endpoint; required unless `simulated` is set
    pub rpc_url: Option<String>,
    /// Use the in-process simulated chain instead of an RPC node
    pub simulated: bool,
    pub bridge_address: String,
    pub start_block: u64,
    pub confirmation_blocks: u64,
}

/// Destination (mint) chain configuration
#[derive(Debug, Clone)]
pub struct DestinationChainConfig {
    pub name: String,
    pub rpc_url: Option<String>,
    pub token_address: Option<String>,
    pub submit_delay_ms: u64,
    pub confirm_delay_ms: u64,
    /// Probability that a simulated mint submission fails
    pub sim_failure_rate: f64,
}

/// Relay loop configuration
#[derive(Debug, Clone)]
pub struct RelayerConfig {
    pub poll_interval_ms: u64,
    pub state_file: String,
    pub dead_letter_file: String,
    pub submitter_workers: usize,
    pub max_submit_retries: u32,
    pub drain_timeout_ms: u64,
    pub max_poll_backoff_ms: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_pause_secs: u64,
}

/// Health / metrics server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

/// Default functions
fn default_source_chain_name() -> String {
    "Ethereum-Goerli".to_string()
}

fn default_destination_chain_name() -> String {
    "Polygon-Mumbai".to_string()
}

fn default_confirmation_blocks() -> u64 {
    6
}

fn default_submit_delay() -> u64 {
    2000
}

fn default_confirm_delay() -> u64 {
    3000
}

fn default_poll_interval() -> u64 {
    5000
}

fn default_state_file() -> String {
    "relay_state.json".to_string()
}

fn default_dead_letter_file() -> String {
    "relay_dead_letters.jsonl".to_string()
}

fn default_submitter_workers() -> usize {
    1
}

fn default_max_submit_retries() -> u32 {
    3
}

fn default_drain_timeout() -> u64 {
    30_000
}

fn default_max_poll_backoff() -> u64 {
    60_000
}

fn default_circuit_breaker_threshold() -> u32 {
    10
}

fn default_circuit_breaker_pause() -> u64 {
    300
}

fn default_api_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    9090
}

/// Parse an optional variable, failing loudly on a malformed value
fn parse_var<T>(vars: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match vars(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| eyre!("{} has an invalid value {:?}: {}", key, raw, e)),
        _ => Ok(default),
    }
}

fn non_empty(vars: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    vars(key).filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build and validate a configuration from a variable lookup
    pub fn from_vars(vars: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let source = SourceChainConfig {
            name: non_empty(&vars, "SOURCE_CHAIN_NAME").unwrap_or_else(default_source_chain_name),
            rpc_url: non_empty(&vars, "SOURCE_RPC_URL"),
            simulated: parse_var(&vars, "SOURCE_SIMULATED", true)?,
            bridge_address: non_empty(&vars, "BRIDGE_CONTRACT_ADDRESS")
                .ok_or_else(|| eyre!("BRIDGE_CONTRACT_ADDRESS environment variable is required"))?,
            start_block: parse_var(&vars, "START_BLOCK", 0)?,
            confirmation_blocks: parse_var(
                &vars,
                "CONFIRMATION_BLOCKS",
                default_confirmation_blocks(),
            )?,
        };

        let destination = DestinationChainConfig {
            name: non_empty(&vars, "DEST_CHAIN_NAME")
                .unwrap_or_else(default_destination_chain_name),
            rpc_url: non_empty(&vars, "DEST_RPC_URL"),
            token_address: non_empty(&vars, "DEST_TOKEN_ADDRESS"),
            submit_delay_ms: parse_var(&vars, "SUBMIT_DELAY_MS", default_submit_delay())?,
            confirm_delay_ms: parse_var(&vars, "CONFIRM_DELAY_MS", default_confirm_delay())?,
            sim_failure_rate: parse_var(&vars, "SIM_FAILURE_RATE", 0.0)?,
        };

        let relayer = RelayerConfig {
            poll_interval_ms: parse_var(&vars, "POLL_INTERVAL_MS", default_poll_interval())?,
            state_file: non_empty(&vars, "STATE_FILE").unwrap_or_else(default_state_file),
            dead_letter_file: non_empty(&vars, "DEAD_LETTER_FILE")
                .unwrap_or_else(default_dead_letter_file),
            submitter_workers: parse_var(
                &vars,
                "SUBMITTER_WORKERS",
                default_submitter_workers(),
            )?,
            max_submit_retries: parse_var(
                &vars,
                "MAX_SUBMIT_RETRIES",
                default_max_submit_retries(),
            )?,
            drain_timeout_ms: parse_var(&vars, "DRAIN_TIMEOUT_MS", default_drain_timeout())?,
            max_poll_backoff_ms: parse_var(
                &vars,
                "MAX_POLL_BACKOFF_MS",
                default_max_poll_backoff(),
            )?,
            circuit_breaker_threshold: parse_var(
                &vars,
                "CIRCUIT_BREAKER_THRESHOLD",
                default_circuit_breaker_threshold(),
            )?,
            circuit_breaker_pause_secs: parse_var(
                &vars,
                "CIRCUIT_BREAKER_PAUSE_SECS",
                default_circuit_breaker_pause(),
            )?,
        };

        let api = ApiConfig {
            enabled: parse_var(&vars, "API_ENABLED", true)?,
            bind_address: non_empty(&vars, "API_BIND_ADDRESS")
                .unwrap_or_else(default_api_bind_address),
            port: parse_var(&vars, "API_PORT", default_api_port())?,
        };

        let config = Config {
            source,
            destination,
            relayer,
            api,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.source.name.is_empty() {
            return Err(eyre!("source.name cannot be empty"));
        }

        // Validate bridge contract address
        if self.source.bridge_address.len() != 42 || !self.source.bridge_address.starts_with("0x")
        {
            return Err(eyre!(
                "source.bridge_address must be a valid hex address (42 chars with 0x prefix)"
            ));
        }
        self.bridge_address()?;

        if !self.source.simulated && self.source.rpc_url.is_none() {
            return Err(eyre!(
                "SOURCE_RPC_URL is required when SOURCE_SIMULATED is false"
            ));
        }

        if let Some(token) = &self.destination.token_address {
            Address::from_str(token)
                .map_err(|e| eyre!("destination.token_address is not a valid address: {}", e))?;
        }

        if !(0.0..=1.0).contains(&self.destination.sim_failure_rate) {
            return Err(eyre!(
                "destination.sim_failure_rate must be between 0.0 and 1.0"
            ));
        }

        if self.relayer.poll_interval_ms == 0 {
            return Err(eyre!("relayer.poll_interval_ms must be greater than 0"));
        }

        if self.relayer.submitter_workers == 0 {
            return Err(eyre!("relayer.submitter_workers must be at least 1"));
        }

        if self.relayer.state_file.is_empty() {
            return Err(eyre!("relayer.state_file cannot be empty"));
        }

        if self.relayer.circuit_breaker_threshold == 0 {
            return Err(eyre!("relayer.circuit_breaker_threshold must be at least 1"));
        }

        Ok(())
    }

    pub fn bridge_address(&self) -> Result<Address> {
        Address::from_str(&self.source.bridge_address)
            .map_err(|e| eyre!("Invalid bridge contract address: {}", e))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.relayer.poll_interval_ms)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.relayer.max_submit_retries,
            ..RetryConfig::default()
        }
    }

    /// Settings for the relay orchestrator
    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig> {
        Ok(OrchestratorConfig {
            source_chain_name: self.source.name.clone(),
            destination_chain_name: self.destination.name.clone(),
            bridge_address: self.bridge_address()?,
            confirmations: self.source.confirmation_blocks,
            start_block: self.source.start_block,
            poll_interval: self.poll_interval(),
            max_poll_backoff: Duration::from_millis(self.relayer.max_poll_backoff_ms),
            drain_timeout: Duration::from_millis(self.relayer.drain_timeout_ms),
            submitter_workers: self.relayer.submitter_workers,
            submit_retry: self.retry_config(),
            circuit_breaker: CircuitBreakerConfig {
                threshold: self.relayer.circuit_breaker_threshold,
                pause_duration: Duration::from_secs(self.relayer.circuit_breaker_pause_secs),
            },
        })
    }
}
