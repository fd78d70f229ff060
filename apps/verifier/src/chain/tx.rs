//! Transaction assembly and RLP serialisation.
//!
//! EIP-1559 (type 2) is used whenever the node reports a base fee; otherwise
//! an EIP-155 legacy transaction with a chain-adjusted `v`.

use primitive_types::U256;
use rlp::RlpStream;

use crate::chain::FeeEstimate;
use crate::eth::{keccak256, Address};
use crate::signer::codec::EthSignature;

const EIP1559_TX_TYPE: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxFees {
    Legacy {
        gas_price: U256,
    },
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl From<&FeeEstimate> for TxFees {
    fn from(estimate: &FeeEstimate) -> Self {
        match (estimate.max_fee_per_gas, estimate.max_priority_fee_per_gas) {
            (Some(max_fee_per_gas), Some(max_priority_fee_per_gas)) => TxFees::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            },
            _ => TxFees::Legacy {
                gas_price: estimate.gas_price,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_limit: U256,
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
    pub fees: TxFees,
}

impl UnsignedTransaction {
    /// The bytes whose keccak256 the signer signs.
    pub fn signing_payload(&self) -> Vec<u8> {
        match &self.fees {
            TxFees::Legacy { gas_price } => {
                let mut stream = RlpStream::new_list(9);
                self.append_legacy_body(&mut stream, gas_price);
                stream.append(&self.chain_id);
                stream.append(&0u8);
                stream.append(&0u8);
                stream.out().to_vec()
            }
            TxFees::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let mut stream = RlpStream::new_list(9);
                self.append_eip1559_body(&mut stream, max_fee_per_gas, max_priority_fee_per_gas);
                typed(stream)
            }
        }
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        keccak256(&self.signing_payload())
    }

    /// Serialises the transaction with its signature, ready for
    /// `eth_sendRawTransaction`.
    pub fn encode_signed(&self, signature: &EthSignature) -> Vec<u8> {
        let r = U256::from_big_endian(&signature.r);
        let s = U256::from_big_endian(&signature.s);

        match &self.fees {
            TxFees::Legacy { gas_price } => {
                let mut stream = RlpStream::new_list(9);
                self.append_legacy_body(&mut stream, gas_price);
                stream.append(&signature.eip155_v(self.chain_id));
                stream.append(&r);
                stream.append(&s);
                stream.out().to_vec()
            }
            TxFees::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let mut stream = RlpStream::new_list(12);
                self.append_eip1559_body(&mut stream, max_fee_per_gas, max_priority_fee_per_gas);
                stream.append(&signature.y_parity());
                stream.append(&r);
                stream.append(&s);
                typed(stream)
            }
        }
    }

    /// Upper bound on the fee this transaction can spend, in wei.
    pub fn max_cost(&self) -> U256 {
        let per_gas = match &self.fees {
            TxFees::Legacy { gas_price } => *gas_price,
            TxFees::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        };
        per_gas.saturating_mul(self.gas_limit).saturating_add(self.value)
    }

    fn append_legacy_body(&self, stream: &mut RlpStream, gas_price: &U256) {
        stream.append(&self.nonce);
        stream.append(gas_price);
        stream.append(&self.gas_limit);
        stream.append(&self.to);
        stream.append(&self.value);
        stream.append(&self.data);
    }

    fn append_eip1559_body(
        &self,
        stream: &mut RlpStream,
        max_fee_per_gas: &U256,
        max_priority_fee_per_gas: &U256,
    ) {
        stream.append(&self.chain_id);
        stream.append(&self.nonce);
        stream.append(max_priority_fee_per_gas);
        stream.append(max_fee_per_gas);
        stream.append(&self.gas_limit);
        stream.append(&self.to);
        stream.append(&self.value);
        stream.append(&self.data);
        // Empty access list.
        stream.begin_list(0);
    }
}

fn typed(stream: RlpStream) -> Vec<u8> {
    let body = stream.out();
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(EIP1559_TX_TYPE);
    out.extend_from_slice(&body);
    out
}

/// `gas * (100 + margin_percent) / 100`
pub fn with_safety_margin(gas: U256, margin_percent: u64) -> U256 {
    gas.saturating_mul(U256::from(100u64.saturating_add(margin_percent))) / U256::from(100)
}
