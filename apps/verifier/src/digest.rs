//! Deterministic SHA-256 fingerprints of resume content.
//!
//! Every digest is rendered as `0x` followed by 64 lowercase hex characters.
//! Structured values are serialised canonically (object keys sorted) before
//! hashing, so two documents that differ only in key order share a digest.

use std::fmt;

use bytes::Bytes;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Size of a digest in bytes.
pub const DIGEST_LEN: usize = 32;
/// Length of the canonical textual form, including the `0x` prefix.
pub const HEX_DIGEST_LEN: usize = 2 + DIGEST_LEN * 2;

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid hash format: expected 0x followed by 64 hex characters, got '{0}'")]
    InvalidFormat(String),
}

/// Content accepted by the digest function.
#[derive(Debug, Clone)]
pub enum DigestInput {
    /// Raw binary content, hashed as-is.
    Bytes(Bytes),
    /// Text, hashed as its UTF-8 bytes.
    Text(String),
    /// Arbitrary JSON, canonically serialised and then hashed as UTF-8.
    Structured(Value),
}

/// A 32-byte document digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HexDigest([u8; DIGEST_LEN]);

impl HexDigest {
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Parses a caller-supplied hash. A missing `0x` prefix is added before
    /// validation; hex digits are accepted in either case.
    pub fn parse(raw: &str) -> Result<Self, DigestError> {
        let trimmed = raw.trim();
        let prefixed = if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
            format!("0x{}", &trimmed[2..])
        } else {
            format!("0x{trimmed}")
        };

        if prefixed.len() != HEX_DIGEST_LEN {
            return Err(DigestError::InvalidFormat(raw.to_string()));
        }

        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(&prefixed[2..], &mut bytes)
            .map_err(|_| DigestError::InvalidFormat(raw.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for HexDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for HexDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HexDigest({})", self.to_hex())
    }
}

/// Hashes the given content.
pub fn digest(input: &DigestInput) -> Result<HexDigest, DigestError> {
    match input {
        DigestInput::Bytes(bytes) => Ok(digest_bytes(bytes)),
        DigestInput::Text(text) => Ok(digest_bytes(text.as_bytes())),
        DigestInput::Structured(value) => Ok(digest_bytes(canonical_json(value)?.as_bytes())),
    }
}

pub fn digest_bytes(bytes: &[u8]) -> HexDigest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    HexDigest(hasher.finalize().into())
}

/// Compact JSON with object keys in ascending order at every depth.
pub fn canonical_json(value: &Value) -> Result<String, DigestError> {
    Ok(serde_json::to_string(&sort_keys(value))?)
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
