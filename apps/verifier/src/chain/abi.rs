//! ABI encoding for the resume verification contract.
//!
//! Only the four methods the service calls are supported; this is not a
//! general ABI codec.

use primitive_types::U256;

use crate::chain::OnChainVerification;
use crate::digest::HexDigest;
use crate::eth::{keccak256, Address};

pub const VERIFY_RESUME: &str = "verifyResume(bytes32)";
pub const BATCH_VERIFY_RESUMES: &str = "batchVerifyResumes(bytes32[])";
pub const CHECK_VERIFICATION: &str = "checkVerification(bytes32)";
pub const TOTAL_VERIFICATIONS: &str = "totalVerifications()";

const WORD: usize = 32;

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn encode_verify(digest: &HexDigest) -> Vec<u8> {
    let mut data = selector(VERIFY_RESUME).to_vec();
    data.extend_from_slice(digest.as_bytes());
    data
}

/// `batchVerifyResumes(bytes32[])`: head holds the offset of the dynamic
/// array, the tail its length followed by the elements.
pub fn encode_batch_verify(digests: &[HexDigest]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + WORD * (2 + digests.len()));
    data.extend_from_slice(&selector(BATCH_VERIFY_RESUMES));
    data.extend_from_slice(&word(U256::from(WORD)));
    data.extend_from_slice(&word(U256::from(digests.len())));
    for digest in digests {
        data.extend_from_slice(digest.as_bytes());
    }
    data
}

pub fn encode_check_verification(digest: &HexDigest) -> Vec<u8> {
    let mut data = selector(CHECK_VERIFICATION).to_vec();
    data.extend_from_slice(digest.as_bytes());
    data
}

pub fn encode_total_verifications() -> Vec<u8> {
    selector(TOTAL_VERIFICATIONS).to_vec()
}

/// Decodes `(bool verified, uint256 timestamp, address verifier)`.
pub fn decode_verification(data: &[u8]) -> Result<OnChainVerification, String> {
    if data.len() < 3 * WORD {
        return Err(format!(
            "checkVerification returned {} bytes, expected {}",
            data.len(),
            3 * WORD
        ));
    }

    let verified = !U256::from_big_endian(&data[..WORD]).is_zero();
    let timestamp = U256::from_big_endian(&data[WORD..2 * WORD]);
    if timestamp > U256::from(u64::MAX) {
        return Err(format!("timestamp {timestamp} out of range"));
    }
    let verifier = Address::from_slice(&data[2 * WORD + 12..3 * WORD]);

    Ok(OnChainVerification {
        verified,
        timestamp: timestamp.low_u64(),
        verifier,
    })
}

pub fn decode_uint(data: &[u8]) -> Result<U256, String> {
    if data.len() < WORD {
        return Err(format!("expected a 32-byte word, got {} bytes", data.len()));
    }
    Ok(U256::from_big_endian(&data[..WORD]))
}

fn word(value: U256) -> [u8; WORD] {
    let mut out = [0u8; WORD];
    value.to_big_endian(&mut out);
    out
}
