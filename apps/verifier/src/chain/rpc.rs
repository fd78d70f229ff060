//! JSON-RPC 2.0 over HTTP.
//!
//! The only module that talks to the node. Retrying is left to callers:
//! errors come back classified and `ChainError::is_transient` decides.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use primitive_types::{H256, U256};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::chain::abi;
use crate::chain::{CallRequest, ChainClient, ChainError, FeeEstimate, OnChainVerification, Receipt};
use crate::digest::HexDigest;
use crate::eth::{parse_quantity, to_hex, to_quantity, Address};

/// JSON-RPC code some providers use for "request limit exceeded".
const LIMIT_EXCEEDED_CODE: i64 = -32005;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockHeader {
    base_fee_per_gas: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
    gas_used: String,
    effective_gas_price: Option<String>,
}

pub struct JsonRpcClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
    poll_interval: Duration,
    confirmation_timeout: Duration,
}

impl JsonRpcClient {
    pub fn new(
        url: impl Into<String>,
        request_timeout: Duration,
        poll_interval: Duration,
        confirmation_timeout: Duration,
    ) -> Result<Self, ChainError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ChainError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
            poll_interval,
            confirmation_timeout,
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Network(format!("{method}: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            warn!("RPC {method} returned {status}: {text}");
            return Err(ChainError::Network(format!("{method}: HTTP {status}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ChainError::Rpc {
                code: i64::from(status.as_u16()),
                message: text,
            });
        }

        let envelope: RpcResponse = response
            .json()
            .await
            .map_err(|e| ChainError::Decode(format!("{method}: {e}")))?;

        if let Some(error) = envelope.error {
            return Err(classify_rpc_error(method, error));
        }

        debug!("RPC {method} (id {id}) succeeded");
        serde_json::from_value(envelope.result.unwrap_or(Value::Null))
            .map_err(|e| ChainError::Decode(format!("{method}: {e}")))
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<U256, ChainError> {
        let raw: String = self.request(method, params).await?;
        parse_quantity(&raw).map_err(ChainError::Decode)
    }

    async fn call_contract(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError> {
        let raw: String = self
            .request(
                "eth_call",
                json!([{ "to": to_hex(to.as_bytes()), "data": to_hex(&data) }, "latest"]),
            )
            .await?;
        decode_hex_bytes(&raw)
    }

    async fn fetch_receipt(&self, tx_hash: H256) -> Result<Option<RawReceipt>, ChainError> {
        self.request(
            "eth_getTransactionReceipt",
            json!([to_hex(tx_hash.as_bytes())]),
        )
        .await
    }

    async fn poll_until_confirmed(
        &self,
        tx_hash: H256,
        confirmations: u64,
    ) -> Result<Receipt, ChainError> {
        loop {
            match self.fetch_receipt(tx_hash).await {
                Ok(Some(raw)) if raw.block_number.is_some() => {
                    let receipt = parse_receipt(&raw)?;
                    if confirmations <= 1 {
                        return finish(receipt);
                    }
                    match self.quantity("eth_blockNumber", json!([])).await {
                        Ok(head) => {
                            let depth = head.low_u64().saturating_sub(receipt.block_number) + 1;
                            if depth >= confirmations {
                                return finish(receipt);
                            }
                            debug!("{:?} at depth {depth}/{confirmations}", tx_hash);
                        }
                        Err(e) if e.is_transient() => {
                            warn!("Block number poll for {:?} failed: {e}", tx_hash)
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(_) => debug!("{:?} still pending", tx_hash),
                Err(e) if e.is_transient() => warn!("Receipt poll for {:?} failed: {e}", tx_hash),
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
        self.quantity(
            "eth_getBalance",
            json!([to_hex(address.as_bytes()), "latest"]),
        )
        .await
    }

    async fn get_nonce(&self, address: Address) -> Result<u64, ChainError> {
        let nonce = self
            .quantity(
                "eth_getTransactionCount",
                json!([to_hex(address.as_bytes()), "pending"]),
            )
            .await?;
        if nonce > U256::from(u64::MAX) {
            return Err(ChainError::Decode(format!("nonce {nonce} out of range")));
        }
        Ok(nonce.low_u64())
    }

    async fn get_fee_estimate(&self) -> Result<FeeEstimate, ChainError> {
        let gas_price = self.quantity("eth_gasPrice", json!([])).await?;

        let block: Option<BlockHeader> = self
            .request("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let base_fee = match block.and_then(|b| b.base_fee_per_gas) {
            Some(raw) => parse_quantity(&raw).map_err(ChainError::Decode)?,
            None => {
                debug!("Latest block has no base fee, using legacy pricing");
                return Ok(FeeEstimate {
                    gas_price,
                    max_fee_per_gas: None,
                    max_priority_fee_per_gas: None,
                });
            }
        };

        let priority_fee = match self.quantity("eth_maxPriorityFeePerGas", json!([])).await {
            Ok(fee) => fee,
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => {
                debug!("eth_maxPriorityFeePerGas unsupported ({e}), deriving from gas price");
                gas_price.saturating_sub(base_fee)
            }
        };

        Ok(FeeEstimate {
            gas_price,
            max_fee_per_gas: Some(base_fee.saturating_mul(U256::from(2)).saturating_add(priority_fee)),
            max_priority_fee_per_gas: Some(priority_fee),
        })
    }

    async fn estimate_gas(&self, call: &CallRequest) -> Result<U256, ChainError> {
        let params = json!([{
            "from": to_hex(call.from.as_bytes()),
            "to": to_hex(call.to.as_bytes()),
            "data": to_hex(&call.data),
            "value": to_quantity(U256::zero()),
        }]);
        match self.quantity("eth_estimateGas", params).await {
            Ok(gas) => Ok(gas),
            Err(ChainError::Rpc { message, .. }) => Err(ChainError::GasEstimation(message)),
            Err(e) => Err(e),
        }
    }

    async fn read_verification(
        &self,
        contract: Address,
        digest: &HexDigest,
    ) -> Result<OnChainVerification, ChainError> {
        let output = self
            .call_contract(contract, abi::encode_check_verification(digest))
            .await?;
        abi::decode_verification(&output).map_err(ChainError::Decode)
    }

    async fn total_verifications(&self, contract: Address) -> Result<U256, ChainError> {
        let output = self
            .call_contract(contract, abi::encode_total_verifications())
            .await?;
        abi::decode_uint(&output).map_err(ChainError::Decode)
    }

    async fn broadcast(&self, raw_tx: &[u8]) -> Result<H256, ChainError> {
        let raw: String = self
            .request("eth_sendRawTransaction", json!([to_hex(raw_tx)]))
            .await?;
        parse_h256(&raw)
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: H256,
        confirmations: u64,
    ) -> Result<Receipt, ChainError> {
        tokio::time::timeout(
            self.confirmation_timeout,
            self.poll_until_confirmed(tx_hash, confirmations),
        )
        .await
        .map_err(|_| ChainError::ConfirmationTimeout {
            tx_hash: to_hex(tx_hash.as_bytes()),
            waited_secs: self.confirmation_timeout.as_secs(),
        })?
    }
}

fn classify_rpc_error(method: &str, error: RpcErrorBody) -> ChainError {
    let lower = error.message.to_lowercase();
    if lower.contains("insufficient funds") {
        ChainError::InsufficientFunds(error.message)
    } else if error.code == LIMIT_EXCEEDED_CODE
        || lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("timeout")
        || lower.contains("header not found")
    {
        ChainError::Network(format!("{method}: {}", error.message))
    } else {
        ChainError::Rpc {
            code: error.code,
            message: error.message,
        }
    }
}

fn finish(receipt: Receipt) -> Result<Receipt, ChainError> {
    if receipt.success {
        Ok(receipt)
    } else {
        Err(ChainError::Reverted {
            tx_hash: to_hex(receipt.transaction_hash.as_bytes()),
            block_number: receipt.block_number,
        })
    }
}

fn parse_receipt(raw: &RawReceipt) -> Result<Receipt, ChainError> {
    let decode = |value: &str| parse_quantity(value).map_err(ChainError::Decode);

    let block_number = raw
        .block_number
        .as_deref()
        .map(decode)
        .transpose()?
        .unwrap_or_default();
    // Pre-Byzantium receipts carry no status; treat them as successful.
    let success = match raw.status.as_deref() {
        Some(status) => !decode(status)?.is_zero(),
        None => true,
    };

    Ok(Receipt {
        transaction_hash: parse_h256(&raw.transaction_hash)?,
        success,
        block_number: block_number.low_u64(),
        gas_used: decode(&raw.gas_used)?,
        effective_gas_price: raw
            .effective_gas_price
            .as_deref()
            .map(decode)
            .transpose()?,
    })
}

fn parse_h256(raw: &str) -> Result<H256, ChainError> {
    let bytes = decode_hex_bytes(raw)?;
    if bytes.len() != 32 {
        return Err(ChainError::Decode(format!("expected 32-byte hash, got '{raw}'")));
    }
    Ok(H256::from_slice(&bytes))
}

fn decode_hex_bytes(raw: &str) -> Result<Vec<u8>, ChainError> {
    hex::decode(raw.trim_start_matches("0x"))
        .map_err(|e| ChainError::Decode(format!("invalid hex '{raw}': {e}")))
}
