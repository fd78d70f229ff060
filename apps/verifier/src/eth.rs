//! Ethereum primitives shared by the signature codec and the chain client.

use primitive_types::{H160, U256};
use sha3::{Digest, Keccak256};

pub type Address = H160;

/// Wei per native token unit (10^18).
pub const WEI_PER_UNIT_EXP: usize = 18;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// `0x`-prefixed lowercase hex of arbitrary bytes.
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parses a 20-byte hex address with or without the `0x` prefix.
/// Checksum casing is not enforced.
pub fn parse_address(raw: &str) -> Result<Address, String> {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let mut bytes = [0u8; 20];
    hex::decode_to_slice(stripped, &mut bytes)
        .map_err(|e| format!("invalid address '{raw}': {e}"))?;
    Ok(Address::from(bytes))
}

/// EIP-55 mixed-case checksum encoding.
pub fn to_checksum(address: &Address) -> String {
    let lower = hex::encode(address.as_bytes());
    let hash = keccak256(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            hash[i / 2] >> 4
        } else {
            hash[i / 2] & 0x0f
        };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Derives the account address from an uncompressed SEC1 public key
/// (`0x04 || x || y`): the last 20 bytes of `keccak256(x || y)`.
pub fn address_from_uncompressed(point: &[u8]) -> Option<Address> {
    if point.len() != 65 || point[0] != 0x04 {
        return None;
    }
    let hash = keccak256(&point[1..]);
    Some(Address::from_slice(&hash[12..]))
}

/// Parses a JSON-RPC hex quantity (`"0x1a"`). `"0x"` is read as zero.
pub fn parse_quantity(raw: &str) -> Result<U256, String> {
    let digits = raw.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(digits, 16).map_err(|e| format!("invalid quantity '{raw}': {e:?}"))
}

/// Minimal `0x`-prefixed hex quantity, as JSON-RPC expects.
pub fn to_quantity(value: U256) -> String {
    if value.is_zero() {
        return "0x0".to_string();
    }
    format!("0x{value:x}")
}

/// Renders a wei amount in native units, e.g. `1000000000000000` → `"0.001"`.
pub fn format_units(wei: U256) -> String {
    let unit = U256::exp10(WEI_PER_UNIT_EXP);
    let whole = wei / unit;
    let frac = wei % unit;
    if frac.is_zero() {
        return whole.to_string();
    }
    let frac = format!("{:0>width$}", frac.to_string(), width = WEI_PER_UNIT_EXP);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}
