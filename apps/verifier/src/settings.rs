//! Chain settings: contract address, RPC endpoint, chain id, explorer.
//!
//! Read once from a Secrets Manager JSON secret at startup and then held by
//! the verification context for the life of the process. A missing secret,
//! a failed fetch or an invalid field falls back to the environment defaults
//! instead of failing startup.

use async_trait::async_trait;
use aws_sdk_secretsmanager::error::DisplayErrorContext;
use aws_sdk_secretsmanager::Client;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::eth::{parse_address, to_checksum, Address};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Secret fetch failed: {0}")]
    Fetch(String),

    #[error("Secret '{0}' has no string value")]
    Empty(String),

    #[error("Secret is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSettings {
    /// `None` (or the zero address) means no contract is deployed.
    pub contract_address: Option<Address>,
    pub rpc_url: String,
    pub chain_id: u64,
    pub explorer_url: String,
    pub network_name: String,
    pub faucet_url: String,
}

impl ChainSettings {
    /// Settings taken purely from the environment.
    pub fn from_config(config: &Config) -> Self {
        let contract_address = config.contract_address.as_deref().and_then(|raw| {
            parse_address(raw)
                .map_err(|e| warn!("Ignoring CONTRACT_ADDRESS: {e}"))
                .ok()
        });

        Self {
            contract_address,
            rpc_url: config.rpc_url.clone(),
            chain_id: config.chain_id,
            explorer_url: config.explorer_url.clone(),
            network_name: config.network_name.clone(),
            faucet_url: config.faucet_url.clone(),
        }
    }

    /// The contract to talk to, or `None` when running in simulation mode.
    pub fn deployed_contract(&self) -> Option<Address> {
        self.contract_address.filter(|address| !address.is_zero())
    }

    pub fn tx_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{tx_hash}", self.explorer_url.trim_end_matches('/'))
    }

    pub fn simulated_network(&self) -> String {
        format!("{} (Simulated)", self.network_name)
    }
}

/// Shape of the chain settings secret. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSecret {
    #[serde(alias = "CONTRACT_ADDRESS")]
    pub contract_address: Option<String>,
    #[serde(alias = "RPC_URL")]
    pub rpc_url: Option<String>,
    /// Accepted as a JSON number or a numeric string.
    #[serde(alias = "CHAIN_ID")]
    pub chain_id: Option<Value>,
    #[serde(alias = "EXPLORER_URL")]
    pub explorer_url: Option<String>,
}

#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn fetch(&self) -> Result<ChainSecret, SettingsError>;
}

pub struct SecretsManagerSource {
    client: Client,
    secret_id: String,
}

impl SecretsManagerSource {
    pub fn new(client: Client, secret_id: impl Into<String>) -> Self {
        Self {
            client,
            secret_id: secret_id.into(),
        }
    }
}

#[async_trait]
impl SecretSource for SecretsManagerSource {
    async fn fetch(&self) -> Result<ChainSecret, SettingsError> {
        let response = self
            .client
            .get_secret_value()
            .secret_id(&self.secret_id)
            .send()
            .await
            .map_err(|e| SettingsError::Fetch(DisplayErrorContext(&e).to_string()))?;

        let raw = response
            .secret_string()
            .ok_or_else(|| SettingsError::Empty(self.secret_id.clone()))?;
        Ok(serde_json::from_str(raw)?)
    }
}

/// Resolves the settings once: secret values win over environment defaults.
pub async fn resolve_settings(
    source: Option<&dyn SecretSource>,
    defaults: ChainSettings,
) -> ChainSettings {
    let settings = match source {
        None => {
            info!("No chain secret configured, using environment settings");
            defaults
        }
        Some(source) => match source.fetch().await {
            Ok(secret) => merge(defaults, secret),
            Err(e) => {
                warn!("Falling back to environment chain settings: {e}");
                defaults
            }
        },
    };

    match settings.deployed_contract() {
        Some(contract) => info!(
            "Chain settings: {} (chain {}), contract {}",
            settings.network_name,
            settings.chain_id,
            to_checksum(&contract)
        ),
        None => warn!(
            "No verification contract configured for {}, verifications will be simulated",
            settings.network_name
        ),
    }
    settings
}

fn merge(mut settings: ChainSettings, secret: ChainSecret) -> ChainSettings {
    if let Some(raw) = secret.contract_address.filter(|v| !v.trim().is_empty()) {
        match parse_address(&raw) {
            Ok(address) => settings.contract_address = Some(address),
            Err(e) => warn!("Ignoring contractAddress from secret: {e}"),
        }
    }
    if let Some(rpc_url) = secret.rpc_url.filter(|v| !v.trim().is_empty()) {
        settings.rpc_url = rpc_url;
    }
    if let Some(chain_id) = secret.chain_id {
        match chain_id_from(&chain_id) {
            Some(id) => settings.chain_id = id,
            None => warn!("Ignoring chainId from secret: {chain_id}"),
        }
    }
    if let Some(explorer_url) = secret.explorer_url.filter(|v| !v.trim().is_empty()) {
        settings.explorer_url = explorer_url;
    }
    settings
}

fn chain_id_from(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
