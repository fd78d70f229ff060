//! Signature Codec: turns the DER-encoded ECDSA signature returned by the
//! remote key service into the `(r, s, v)` triple Ethereum transactions carry.
//!
//! `v` is never assumed. Both recovery candidates are tried against the
//! digest and the one whose recovered address equals the known signer wins.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::pkcs8::DecodePublicKey;
use k256::{FieldBytes, PublicKey};
use thiserror::Error;

use crate::eth::{address_from_uncompressed, to_checksum, Address};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed DER signature: {0}")]
    SignatureFormat(String),

    #[error("Malformed public key: {0}")]
    PublicKeyFormat(String),

    #[error("Signature does not recover to signer {expected}")]
    SignerMismatch { expected: String },
}

/// The two 32-byte scalars of an ECDSA signature, big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureParts {
    pub r: [u8; 32],
    pub s: [u8; 32],
}

/// A recoverable Ethereum signature. `v` is 27 or 28.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub v: u8,
}

impl EthSignature {
    /// 0 or 1, as typed (EIP-2718) transactions encode it.
    pub fn y_parity(&self) -> u8 {
        self.v - 27
    }

    /// Chain-adjusted `v` for EIP-155 legacy transactions.
    pub fn eip155_v(&self, chain_id: u64) -> u64 {
        chain_id * 2 + 35 + u64::from(self.y_parity())
    }
}

/// Parses an ASN.1 `SEQUENCE { INTEGER r, INTEGER s }`. Sign-bit padding is
/// stripped and each scalar is left-padded to 32 bytes.
pub fn decode_der(der: &[u8]) -> Result<SignatureParts, CodecError> {
    let signature =
        Signature::from_der(der).map_err(|e| CodecError::SignatureFormat(e.to_string()))?;
    Ok(split(&signature))
}

/// Rewrites `s` into the lower half of the curve order (EIP-2). Key services
/// return either half; nodes reject high-s signatures.
pub fn normalize_low_s(parts: SignatureParts) -> Result<SignatureParts, CodecError> {
    let signature = to_signature(&parts)?;
    Ok(match signature.normalize_s() {
        Some(normalized) => split(&normalized),
        None => parts,
    })
}

/// Recovers the public key for both parities and returns the signature whose
/// recovered address matches `expected`.
pub fn select_recovery_id(
    digest: &[u8; 32],
    parts: &SignatureParts,
    expected: Address,
) -> Result<EthSignature, CodecError> {
    let signature = to_signature(parts)?;

    for parity in 0u8..=1 {
        let recovery_id = RecoveryId::new(parity == 1, false);
        let Ok(key) = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id) else {
            continue;
        };
        if verifying_key_address(&key) == Some(expected) {
            return Ok(EthSignature {
                r: parts.r,
                s: parts.s,
                v: 27 + parity,
            });
        }
    }

    Err(CodecError::SignerMismatch {
        expected: to_checksum(&expected),
    })
}

/// Full pipeline for a signature fresh from the key service.
pub fn der_to_eth_signature(
    digest: &[u8; 32],
    der: &[u8],
    expected: Address,
) -> Result<EthSignature, CodecError> {
    let parts = normalize_low_s(decode_der(der)?)?;
    select_recovery_id(digest, &parts, expected)
}

/// Address of a DER `SubjectPublicKeyInfo`, the format key services export.
pub fn address_from_public_key_der(der: &[u8]) -> Result<Address, CodecError> {
    let public_key = PublicKey::from_public_key_der(der)
        .map_err(|e| CodecError::PublicKeyFormat(e.to_string()))?;
    let point = public_key.to_encoded_point(false);
    address_from_uncompressed(point.as_bytes())
        .ok_or_else(|| CodecError::PublicKeyFormat("not an uncompressed secp256k1 point".into()))
}

fn verifying_key_address(key: &VerifyingKey) -> Option<Address> {
    address_from_uncompressed(key.to_encoded_point(false).as_bytes())
}

fn to_signature(parts: &SignatureParts) -> Result<Signature, CodecError> {
    Signature::from_scalars(FieldBytes::from(parts.r), FieldBytes::from(parts.s))
        .map_err(|e| CodecError::SignatureFormat(e.to_string()))
}

fn split(signature: &Signature) -> SignatureParts {
    let (r_bytes, s_bytes) = signature.split_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&r_bytes);
    s.copy_from_slice(&s_bytes);
    SignatureParts { r, s }
}
