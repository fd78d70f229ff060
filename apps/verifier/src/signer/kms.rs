//! AWS KMS backend for the remote signer.
//!
//! The key must be an asymmetric `ECC_SECG_P256K1` signing key. Digests are
//! sent with `MessageType::Digest` so KMS signs them as-is.

use async_trait::async_trait;
use aws_sdk_kms::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::types::{KeySpec, MessageType, SigningAlgorithmSpec};
use aws_sdk_kms::Client;
use tracing::{debug, error};

use super::{RemoteSigner, SignerError};

/// Error codes that mean the key itself cannot be used.
const KEY_UNAVAILABLE_CODES: &[&str] = &[
    "NotFoundException",
    "DisabledException",
    "KeyUnavailableException",
    "KMSInvalidStateException",
    "InvalidKeyUsageException",
    "AccessDeniedException",
];

#[derive(Clone)]
pub struct KmsSigner {
    client: Client,
    key_id: String,
}

impl KmsSigner {
    pub fn new(client: Client, key_id: impl Into<String>) -> Self {
        Self {
            client,
            key_id: key_id.into(),
        }
    }

    fn classify<E, R>(&self, err: SdkError<E, R>) -> SignerError
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: std::fmt::Debug + 'static,
    {
        if let SdkError::ServiceError(_) = &err {
            if let Some(code) = err.code() {
                if KEY_UNAVAILABLE_CODES.contains(&code) {
                    let reason = format!("{code}: {}", err.message().unwrap_or("no details"));
                    error!("KMS key {} unavailable: {reason}", self.key_id);
                    return SignerError::KeyUnavailable {
                        key_id: self.key_id.clone(),
                        reason,
                    };
                }
            }
        }
        SignerError::Transport(DisplayErrorContext(&err).to_string())
    }
}

#[async_trait]
impl RemoteSigner for KmsSigner {
    fn key_ref(&self) -> &str {
        &self.key_id
    }

    async fn sign_digest(&self, digest: &[u8; 32]) -> Result<Vec<u8>, SignerError> {
        debug!("Requesting KMS signature from key {}", self.key_id);

        let response = self
            .client
            .sign()
            .key_id(&self.key_id)
            .message(Blob::new(digest.to_vec()))
            .message_type(MessageType::Digest)
            .signing_algorithm(SigningAlgorithmSpec::EcdsaSha256)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        response
            .signature()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or(SignerError::EmptyResponse("signature"))
    }

    async fn public_key_der(&self) -> Result<Vec<u8>, SignerError> {
        let response = self
            .client
            .get_public_key()
            .key_id(&self.key_id)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        if let Some(spec) = response.key_spec() {
            if *spec != KeySpec::EccSecgP256K1 {
                return Err(SignerError::KeyUnavailable {
                    key_id: self.key_id.clone(),
                    reason: format!("key spec {} is not ECC_SECG_P256K1", spec.as_str()),
                });
            }
        }

        response
            .public_key()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or(SignerError::EmptyResponse("public key"))
    }
}
