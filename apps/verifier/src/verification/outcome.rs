//! What a verification produced, and the JSON shapes callers receive.
//!
//! Internally a finished verification is a tagged `Verification`; an
//! already-verified digest is one of its variants, not an error. The
//! serialisable `*Outcome` types flatten that into the wire contract, where
//! failures become `success: false` with a message.

use primitive_types::{H256, U256};
use serde::Serialize;

use crate::digest::HexDigest;
use crate::eth::{to_checksum, to_hex, Address};
use crate::settings::ChainSettings;

/// A successful verification, by how it was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// A transaction was mined with status 1.
    Submitted(Confirmed),
    /// The contract already held a record; nothing was sent.
    AlreadyVerified {
        /// Milliseconds since the epoch.
        timestamp: i64,
        verifier: Address,
    },
    /// No contract configured; a synthetic result was generated.
    Simulated(Simulation),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmed {
    pub tx_hash: H256,
    pub block_number: u64,
    pub gas_used: U256,
    pub gas_price: Option<U256>,
    /// Milliseconds since the epoch, taken when the receipt arrived.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Simulation {
    pub tx_hash: HexDigest,
    pub block_number: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_hash: Option<String>,
    pub transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,
    pub network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub already_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier_address: Option<String>,
}

impl VerificationOutcome {
    pub fn from_verification(
        digest: &HexDigest,
        verification: &Verification,
        settings: &ChainSettings,
    ) -> Self {
        let base = Self {
            success: true,
            resume_hash: Some(digest.to_hex()),
            transaction_hash: None,
            block_number: None,
            timestamp: None,
            gas_used: None,
            gas_price: None,
            explorer_url: None,
            network: settings.network_name.clone(),
            error: None,
            already_verified: None,
            verifier_address: None,
        };

        match verification {
            Verification::Submitted(confirmed) => {
                let tx_hash = to_hex(confirmed.tx_hash.as_bytes());
                Self {
                    explorer_url: Some(settings.tx_url(&tx_hash)),
                    transaction_hash: Some(tx_hash),
                    block_number: Some(confirmed.block_number),
                    timestamp: Some(confirmed.timestamp),
                    gas_used: Some(confirmed.gas_used.to_string()),
                    gas_price: confirmed.gas_price.map(|price| price.to_string()),
                    ..base
                }
            }
            Verification::AlreadyVerified {
                timestamp,
                verifier,
            } => Self {
                timestamp: Some(*timestamp),
                already_verified: Some(true),
                verifier_address: Some(to_checksum(verifier)),
                ..base
            },
            Verification::Simulated(simulation) => Self {
                transaction_hash: Some(simulation.tx_hash.to_hex()),
                block_number: Some(simulation.block_number),
                timestamp: Some(simulation.timestamp),
                network: settings.simulated_network(),
                ..base
            },
        }
    }

    pub fn failed(digest: Option<&HexDigest>, network: String, message: String) -> Self {
        Self {
            success: false,
            resume_hash: digest.map(HexDigest::to_hex),
            transaction_hash: None,
            block_number: None,
            timestamp: None,
            gas_used: None,
            gas_price: None,
            explorer_url: None,
            network,
            error: Some(message),
            already_verified: None,
            verifier_address: None,
        }
    }
}

/// A batch is either submitted as one transaction or simulated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchVerification {
    Submitted { confirmed: Confirmed, count: usize },
    Simulated { simulation: Simulation, count: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub success: bool,
    pub transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    pub verified_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,
    pub network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchOutcome {
    pub fn from_verification(batch: &BatchVerification, settings: &ChainSettings) -> Self {
        match batch {
            BatchVerification::Submitted { confirmed, count } => {
                let tx_hash = to_hex(confirmed.tx_hash.as_bytes());
                Self {
                    success: true,
                    explorer_url: Some(settings.tx_url(&tx_hash)),
                    transaction_hash: Some(tx_hash),
                    block_number: Some(confirmed.block_number),
                    verified_count: *count,
                    timestamp: Some(confirmed.timestamp),
                    gas_used: Some(confirmed.gas_used.to_string()),
                    network: settings.network_name.clone(),
                    error: None,
                }
            }
            BatchVerification::Simulated { simulation, count } => Self {
                success: true,
                transaction_hash: Some(simulation.tx_hash.to_hex()),
                block_number: Some(simulation.block_number),
                verified_count: *count,
                timestamp: Some(simulation.timestamp),
                gas_used: None,
                explorer_url: None,
                network: settings.simulated_network(),
                error: None,
            },
        }
    }

    pub fn failed(network: String, message: String) -> Self {
        Self {
            success: false,
            transaction_hash: None,
            block_number: None,
            verified_count: 0,
            timestamp: None,
            gas_used: None,
            explorer_url: None,
            network,
            error: Some(message),
        }
    }
}

/// Read-only answer to "is this digest on chain?".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_hash: Option<String>,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier_address: Option<String>,
    pub network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub network: String,
    pub chain_id: u64,
    pub contract_address: Option<String>,
    pub simulated: bool,
    pub signer_address: Option<String>,
    /// Signer balance in whole native units, e.g. "0.25".
    pub signer_balance: Option<String>,
    pub total_verifications: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}
