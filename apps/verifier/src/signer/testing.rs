//! In-process stand-in for the key service, used by tests across the crate.
//! Signs with a local `SigningKey` and answers in the same DER shapes KMS does.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use k256::ecdsa::{SigningKey, VerifyingKey};
use k256::pkcs8::EncodePublicKey;

use super::{RemoteSigner, SignerError};
use crate::eth::{address_from_uncompressed, Address};

pub struct LocalKeySigner {
    key: Option<SigningKey>,
    sign_with: Option<SigningKey>,
    sign_calls: AtomicUsize,
    public_key_calls: AtomicUsize,
}

fn key_from_seed(seed: u8) -> SigningKey {
    let mut bytes = [0u8; 32];
    bytes[0] = 0x42;
    bytes[31] = seed;
    SigningKey::from_slice(&bytes).expect("valid test scalar")
}

impl LocalKeySigner {
    pub fn from_seed(seed: u8) -> Self {
        Self {
            key: Some(key_from_seed(seed)),
            sign_with: None,
            sign_calls: AtomicUsize::new(0),
            public_key_calls: AtomicUsize::new(0),
        }
    }

    /// A key reference the service refuses to use.
    pub fn unavailable() -> Self {
        Self {
            key: None,
            sign_with: None,
            sign_calls: AtomicUsize::new(0),
            public_key_calls: AtomicUsize::new(0),
        }
    }

    /// Publishes this key's public half but signs with a different key.
    pub fn with_foreign_signatures(mut self, seed: u8) -> Self {
        self.sign_with = Some(key_from_seed(seed));
        self
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.key.as_ref().expect("key present").verifying_key()
    }

    pub fn address(&self) -> Address {
        address_from_uncompressed(self.verifying_key().to_encoded_point(false).as_bytes())
            .expect("uncompressed point")
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }

    pub fn public_key_calls(&self) -> usize {
        self.public_key_calls.load(Ordering::SeqCst)
    }

    fn unavailable_error(&self) -> SignerError {
        SignerError::KeyUnavailable {
            key_id: self.key_ref().to_string(),
            reason: "NotFoundException: key does not exist".to_string(),
        }
    }
}

#[async_trait]
impl RemoteSigner for LocalKeySigner {
    fn key_ref(&self) -> &str {
        "alias/test-resume-signer"
    }

    async fn sign_digest(&self, digest: &[u8; 32]) -> Result<Vec<u8>, SignerError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        let key = self
            .sign_with
            .as_ref()
            .or(self.key.as_ref())
            .ok_or_else(|| self.unavailable_error())?;
        let (signature, _) = key
            .sign_prehash_recoverable(digest)
            .map_err(|e| SignerError::Transport(e.to_string()))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }

    async fn public_key_der(&self) -> Result<Vec<u8>, SignerError> {
        self.public_key_calls.fetch_add(1, Ordering::SeqCst);
        let key = self.key.as_ref().ok_or_else(|| self.unavailable_error())?;
        let der = key
            .verifying_key()
            .to_public_key_der()
            .map_err(|e| SignerError::Transport(e.to_string()))?;
        Ok(der.as_bytes().to_vec())
    }
}
