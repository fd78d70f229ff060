//! Remote Signer: "sign this 32-byte digest under key K" behind a trait.
//!
//! No private key material ever lives in this process. The backend is a
//! managed key service addressed by an opaque key reference; `SigningIdentity`
//! wraps it with the process-lifetime address cache and the signature codec.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

use crate::eth::{to_checksum, Address};

pub mod codec;
pub mod kms;
#[cfg(test)]
pub mod testing;

use codec::{address_from_public_key_der, der_to_eth_signature, CodecError, EthSignature};

#[derive(Debug, Error)]
pub enum SignerError {
    /// Missing key, disabled key or no permission. Retrying cannot help.
    #[error("Signing key '{key_id}' is unavailable: {reason}")]
    KeyUnavailable { key_id: String, reason: String },

    #[error("Key service request failed: {0}")]
    Transport(String),

    #[error("Key service returned no {0}")]
    EmptyResponse(&'static str),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A managed ECDSA secp256k1 key that signs prehashed digests.
#[async_trait]
pub trait RemoteSigner: Send + Sync {
    /// Opaque identifier of the remote key.
    fn key_ref(&self) -> &str;

    /// Signs `digest` (already hashed, never re-hashed). Returns DER.
    async fn sign_digest(&self, digest: &[u8; 32]) -> Result<Vec<u8>, SignerError>;

    /// DER `SubjectPublicKeyInfo` of the key.
    async fn public_key_der(&self) -> Result<Vec<u8>, SignerError>;
}

/// The signing key as the rest of the service sees it: an address plus a
/// way to obtain Ethereum signatures for it.
pub struct SigningIdentity {
    backend: Arc<dyn RemoteSigner>,
    address: OnceCell<Address>,
}

impl SigningIdentity {
    pub fn new(backend: Arc<dyn RemoteSigner>) -> Self {
        Self {
            backend,
            address: OnceCell::new(),
        }
    }

    pub fn key_ref(&self) -> &str {
        self.backend.key_ref()
    }

    /// Fetches the public key once and caches the derived address. A key's
    /// public half never changes, so the cache lives as long as the process.
    pub async fn resolve_address(&self) -> Result<Address, SignerError> {
        let address = self
            .address
            .get_or_try_init(|| async {
                let der = self.backend.public_key_der().await?;
                let address = address_from_public_key_der(&der)?;
                info!(
                    "Resolved signer address {} for key {}",
                    to_checksum(&address),
                    self.backend.key_ref()
                );
                Ok::<_, SignerError>(address)
            })
            .await?;
        Ok(*address)
    }

    /// Signs a transaction hash and returns `(r, s, v)` with `v` chosen by
    /// public key recovery against the resolved address.
    pub async fn sign(&self, digest: &[u8; 32]) -> Result<EthSignature, SignerError> {
        let address = self.resolve_address().await?;
        let der = self.backend.sign_digest(digest).await?;
        Ok(der_to_eth_signature(digest, &der, address)?)
    }
}
