use thiserror::Error;

use crate::chain::ChainError;
use crate::digest::DigestError;
use crate::signer::codec::CodecError;
use crate::signer::SignerError;

/// Everything a verification can fail with. Only `Network` is retried.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Invalid hash format: {0}")]
    InvalidHashFormat(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Gas estimation failed: {0}")]
    GasEstimation(String),

    #[error("Signing key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("Malformed signature: {0}")]
    SignatureFormat(String),

    #[error("Signature does not match the signer address: {0}")]
    SignerMismatch(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Transaction {tx_hash} failed on-chain in block {block_number}")]
    TransactionFailed { tx_hash: String, block_number: u64 },

    #[error("Transaction {tx_hash} was not confirmed within {waited_secs}s and may still be mined")]
    ConfirmationTimeout { tx_hash: String, waited_secs: u64 },

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    /// A node answer nothing else covers: JSON-RPC error or undecodable result.
    #[error("Chain error: {0}")]
    Chain(String),
}

impl VerifyError {
    pub fn is_transient(&self) -> bool {
        matches!(self, VerifyError::Network(_))
    }

    /// Stable name for logs and the `VerificationError` metric dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            VerifyError::InvalidHashFormat(_) => "InvalidHashFormat",
            VerifyError::InsufficientFunds(_) => "InsufficientFunds",
            VerifyError::GasEstimation(_) => "GasEstimation",
            VerifyError::KeyUnavailable(_) => "KeyUnavailable",
            VerifyError::SignatureFormat(_) => "SignatureFormat",
            VerifyError::SignerMismatch(_) => "SignerMismatch",
            VerifyError::Network(_) => "Network",
            VerifyError::TransactionFailed { .. } => "TransactionFailed",
            VerifyError::ConfirmationTimeout { .. } => "ConfirmationTimeout",
            VerifyError::InvalidBatch(_) => "InvalidBatch",
            VerifyError::Chain(_) => "Chain",
        }
    }
}

impl From<DigestError> for VerifyError {
    fn from(e: DigestError) -> Self {
        match e {
            DigestError::InvalidFormat(raw) => VerifyError::InvalidHashFormat(format!(
                "expected 0x followed by 64 hex characters, got '{raw}'"
            )),
            DigestError::Serialization(e) => VerifyError::InvalidHashFormat(e.to_string()),
        }
    }
}

impl From<ChainError> for VerifyError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::Network(msg) => VerifyError::Network(msg),
            ChainError::InsufficientFunds(msg) => VerifyError::InsufficientFunds(msg),
            ChainError::GasEstimation(msg) => VerifyError::GasEstimation(msg),
            ChainError::Reverted {
                tx_hash,
                block_number,
            } => VerifyError::TransactionFailed {
                tx_hash,
                block_number,
            },
            ChainError::ConfirmationTimeout {
                tx_hash,
                waited_secs,
            } => VerifyError::ConfirmationTimeout {
                tx_hash,
                waited_secs,
            },
            other @ (ChainError::Rpc { .. } | ChainError::Decode(_)) => {
                VerifyError::Chain(other.to_string())
            }
        }
    }
}

impl From<CodecError> for VerifyError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::SignerMismatch { .. } => VerifyError::SignerMismatch(e.to_string()),
            other => VerifyError::SignatureFormat(other.to_string()),
        }
    }
}

impl From<SignerError> for VerifyError {
    fn from(e: SignerError) -> Self {
        match e {
            SignerError::KeyUnavailable { .. } => VerifyError::KeyUnavailable(e.to_string()),
            SignerError::Transport(msg) => VerifyError::Network(msg),
            SignerError::EmptyResponse(_) => VerifyError::SignatureFormat(e.to_string()),
            SignerError::Codec(codec) => codec.into(),
        }
    }
}
