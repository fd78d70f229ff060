//! Chain Client: the JSON-RPC boundary.
//!
//! Every operation is an idempotent read except `broadcast`. Errors are typed
//! so the orchestrator can tell a flaky node (`Network`, retried) from a
//! problem retrying cannot fix (everything else).

use async_trait::async_trait;
use primitive_types::{H256, U256};
use thiserror::Error;

use crate::digest::HexDigest;
use crate::eth::Address;

pub mod abi;
pub mod rpc;
pub mod tx;

#[derive(Debug, Error)]
pub enum ChainError {
    /// Transport failure, timeout, rate limit or 5xx. Safe to retry.
    #[error("Network error: {0}")]
    Network(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Usually means the contract is missing or the call would revert.
    #[error("Gas estimation failed: {0}")]
    GasEstimation(String),

    #[error("Transaction {tx_hash} reverted in block {block_number}")]
    Reverted { tx_hash: String, block_number: u64 },

    #[error("Transaction {tx_hash} was not confirmed within {waited_secs}s")]
    ConfirmationTimeout { tx_hash: String, waited_secs: u64 },

    #[error("Malformed RPC response: {0}")]
    Decode(String),
}

impl ChainError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Network(_))
    }
}

/// Current fee market. EIP-1559 fields are absent on chains without a base fee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeEstimate {
    pub gas_price: U256,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
}

/// The contract's record for one digest. `verified == false` is a normal answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnChainVerification {
    pub verified: bool,
    /// Seconds since the epoch, as stored by the contract.
    pub timestamp: u64,
    pub verifier: Address,
}

/// A message call used for gas estimation.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: H256,
    pub success: bool,
    pub block_number: u64,
    pub gas_used: U256,
    pub effective_gas_price: Option<U256>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_balance(&self, address: Address) -> Result<U256, ChainError>;

    /// Next usable nonce, counting pending transactions.
    async fn get_nonce(&self, address: Address) -> Result<u64, ChainError>;

    async fn get_fee_estimate(&self) -> Result<FeeEstimate, ChainError>;

    async fn estimate_gas(&self, call: &CallRequest) -> Result<U256, ChainError>;

    /// `checkVerification(digest)` on the contract. No gas.
    async fn read_verification(
        &self,
        contract: Address,
        digest: &HexDigest,
    ) -> Result<OnChainVerification, ChainError>;

    async fn total_verifications(&self, contract: Address) -> Result<U256, ChainError>;

    /// Submits a signed, serialised transaction and returns its hash.
    async fn broadcast(&self, raw_tx: &[u8]) -> Result<H256, ChainError>;

    /// Suspends until the transaction is `confirmations` blocks deep.
    /// A reverted receipt is returned as `ChainError::Reverted`.
    async fn wait_for_confirmation(
        &self,
        tx_hash: H256,
        confirmations: u64,
    ) -> Result<Receipt, ChainError>;
}
