use anyhow::{Context, Result};
use std::str::FromStr;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    pub aws_region: String,
    /// KMS key ID, ARN or alias of the secp256k1 signing key.
    pub kms_key_id: String,
    /// Secrets Manager secret holding the chain settings. Unset skips the lookup.
    pub chain_secret_id: Option<String>,

    // Chain defaults, used when the secret is absent or incomplete.
    pub rpc_url: String,
    pub chain_id: u64,
    pub contract_address: Option<String>,
    pub explorer_url: String,
    pub network_name: String,
    pub faucet_url: String,

    pub min_balance_wei: u128,
    pub gas_margin_percent: u64,
    /// Blocks a transaction must be buried under before it counts as confirmed.
    pub confirmations: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub rpc_timeout_secs: u64,
    pub confirmation_timeout_secs: u64,
    pub confirmation_poll_ms: u64,
    pub batch_limit: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            aws_region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            kms_key_id: require_env("KMS_KEY_ID")?,
            chain_secret_id: optional_env("CHAIN_SECRET_ID"),
            rpc_url: std::env::var("RPC_URL")
                .unwrap_or_else(|_| "https://rpc-mumbai.maticvigil.com".to_string()),
            chain_id: parse_env("CHAIN_ID", 80001)?,
            contract_address: optional_env("CONTRACT_ADDRESS"),
            explorer_url: std::env::var("EXPLORER_URL")
                .unwrap_or_else(|_| "https://mumbai.polygonscan.com".to_string()),
            network_name: std::env::var("NETWORK_NAME")
                .unwrap_or_else(|_| "Polygon Mumbai".to_string()),
            faucet_url: std::env::var("FAUCET_URL")
                .unwrap_or_else(|_| "https://faucet.polygon.technology".to_string()),
            min_balance_wei: parse_env("MIN_BALANCE_WEI", 1_000_000_000_000_000)?,
            gas_margin_percent: parse_env("GAS_MARGIN_PERCENT", 20)?,
            confirmations: parse_env("CONFIRMATIONS", 1)?,
            retry_max_attempts: parse_env("RETRY_MAX_ATTEMPTS", 3)?,
            retry_base_delay_ms: parse_env("RETRY_BASE_DELAY_MS", 1000)?,
            retry_max_delay_ms: parse_env("RETRY_MAX_DELAY_MS", 10_000)?,
            rpc_timeout_secs: parse_env("RPC_TIMEOUT_SECS", 30)?,
            confirmation_timeout_secs: parse_env("CONFIRMATION_TIMEOUT_SECS", 120)?,
            confirmation_poll_ms: parse_env("CONFIRMATION_POLL_MS", 2000)?,
            batch_limit: parse_env("BATCH_LIMIT", 50)?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => Ok(default),
    }
}
