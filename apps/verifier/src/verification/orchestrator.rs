//! The verification state machine.
//!
//! VALIDATE → CHECK_CONFIG → CHECK_EXISTING → BUILD_TX → SIGN → BROADCAST →
//! CONFIRM → DONE. Any step may fail; every failure is turned into an outcome
//! with `success: false` here, so callers never see an error type. Reads and
//! the broadcast are retried on network errors; signing and confirmation are
//! not.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use primitive_types::{H256, U256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chain::abi;
use crate::chain::tx::{with_safety_margin, TxFees, UnsignedTransaction};
use crate::chain::{CallRequest, ChainClient, ChainError, Receipt};
use crate::config::Config;
use crate::digest::{digest_bytes, HexDigest};
use crate::eth::{format_units, keccak256, to_checksum, to_hex, Address};
use crate::metrics::{self, MetricUnit, MetricsSink};
use crate::settings::ChainSettings;
use crate::signer::SigningIdentity;
use crate::verification::error::VerifyError;
use crate::verification::outcome::{
    BatchOutcome, BatchVerification, CheckOutcome, Confirmed, ServiceStatus, Simulation,
    Verification, VerificationOutcome,
};
use crate::verification::retry::{with_backoff, BackoffPolicy};

/// Synthetic block numbers start here so they look plausible next to real ones.
const SIMULATED_BLOCK_BASE: u64 = 30_000_000;

#[derive(Debug, Clone)]
pub struct VerifierPolicy {
    pub min_balance_wei: U256,
    pub gas_margin_percent: u64,
    pub confirmations: u64,
    pub batch_limit: usize,
    pub retry: BackoffPolicy,
}

impl Default for VerifierPolicy {
    fn default() -> Self {
        Self {
            min_balance_wei: U256::exp10(15),
            gas_margin_percent: 20,
            confirmations: 1,
            batch_limit: 50,
            retry: BackoffPolicy::default(),
        }
    }
}

impl VerifierPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_balance_wei: U256::from(config.min_balance_wei),
            gas_margin_percent: config.gas_margin_percent,
            confirmations: config.confirmations.max(1),
            batch_limit: config.batch_limit,
            retry: BackoffPolicy {
                max_attempts: config.retry_max_attempts,
                base_delay: Duration::from_millis(config.retry_base_delay_ms),
                max_delay: Duration::from_millis(config.retry_max_delay_ms),
            },
        }
    }
}

/// Verification context: resolved settings plus the three collaborators.
pub struct Verifier {
    settings: ChainSettings,
    chain: Arc<dyn ChainClient>,
    signer: Arc<SigningIdentity>,
    metrics: Arc<dyn MetricsSink>,
    policy: VerifierPolicy,
}

impl Verifier {
    pub fn new(
        settings: ChainSettings,
        chain: Arc<dyn ChainClient>,
        signer: Arc<SigningIdentity>,
        metrics: Arc<dyn MetricsSink>,
        policy: VerifierPolicy,
    ) -> Self {
        Self {
            settings,
            chain,
            signer,
            metrics,
            policy,
        }
    }

    pub fn settings(&self) -> &ChainSettings {
        &self.settings
    }

    // ────────────────────────────────────────────────────────────────────────
    // Single verification
    // ────────────────────────────────────────────────────────────────────────

    /// Anchors one digest on chain. Idempotent per digest: a digest the
    /// contract already holds returns its record without a transaction.
    pub async fn verify(&self, raw_hash: &str) -> VerificationOutcome {
        let started = Instant::now();

        let digest = match HexDigest::parse(raw_hash) {
            Ok(digest) => digest,
            Err(e) => {
                let err = VerifyError::from(e);
                self.record_failure(&err);
                return VerificationOutcome::failed(
                    None,
                    self.settings.network_name.clone(),
                    err.to_string(),
                );
            }
        };

        match self.verify_digest(&digest).await {
            Ok(verification) => {
                self.record_verification(&verification, started);
                VerificationOutcome::from_verification(&digest, &verification, &self.settings)
            }
            Err(err) => {
                error!("Verification of {digest} failed ({}): {err}", err.kind());
                self.record_failure(&err);
                VerificationOutcome::failed(
                    Some(&digest),
                    self.settings.network_name.clone(),
                    self.user_message(&err),
                )
            }
        }
    }

    async fn verify_digest(&self, digest: &HexDigest) -> Result<Verification, VerifyError> {
        let Some(contract) = self.settings.deployed_contract() else {
            info!(
                "No contract deployed on {}, simulating verification of {digest}",
                self.settings.network_name
            );
            return Ok(Verification::Simulated(simulate(digest.as_bytes())));
        };

        let existing = with_backoff(&self.policy.retry, "checkVerification", || {
            self.chain.read_verification(contract, digest)
        })
        .await?;

        if existing.verified {
            info!(
                "Resume {digest} already verified by {}",
                to_checksum(&existing.verifier)
            );
            return Ok(Verification::AlreadyVerified {
                timestamp: seconds_to_millis(existing.timestamp),
                verifier: existing.verifier,
            });
        }

        let receipt = self.submit(contract, abi::encode_verify(digest)).await?;
        Ok(Verification::Submitted(confirmed(receipt)))
    }

    // ────────────────────────────────────────────────────────────────────────
    // Batch verification
    // ────────────────────────────────────────────────────────────────────────

    /// Anchors up to `batch_limit` digests in one transaction. The contract
    /// skips digests it already holds, so there is no per-item existence check.
    pub async fn verify_batch(&self, raw_hashes: &[String]) -> BatchOutcome {
        let started = Instant::now();

        match self.verify_batch_inner(raw_hashes).await {
            Ok(batch) => {
                let count = match &batch {
                    BatchVerification::Submitted { confirmed, count } => {
                        self.emit(metrics::GAS_USED, u256_to_f64(confirmed.gas_used), MetricUnit::Count);
                        *count
                    }
                    BatchVerification::Simulated { count, .. } => {
                        self.emit(metrics::VERIFICATION_SIMULATED, 1.0, MetricUnit::Count);
                        *count
                    }
                };
                self.emit(metrics::BATCH_VERIFIED, count as f64, MetricUnit::Count);
                self.emit(
                    metrics::VERIFICATION_DURATION,
                    started.elapsed().as_millis() as f64,
                    MetricUnit::Milliseconds,
                );
                BatchOutcome::from_verification(&batch, &self.settings)
            }
            Err(err) => {
                error!("Batch verification failed ({}): {err}", err.kind());
                self.record_failure(&err);
                BatchOutcome::failed(self.settings.network_name.clone(), self.user_message(&err))
            }
        }
    }

    async fn verify_batch_inner(
        &self,
        raw_hashes: &[String],
    ) -> Result<BatchVerification, VerifyError> {
        let digests = self.parse_batch(raw_hashes)?;
        let count = digests.len();

        let Some(contract) = self.settings.deployed_contract() else {
            info!(
                "No contract deployed on {}, simulating batch of {count}",
                self.settings.network_name
            );
            let seed: Vec<u8> = digests.iter().flat_map(|d| *d.as_bytes()).collect();
            return Ok(BatchVerification::Simulated {
                simulation: simulate(&seed),
                count,
            });
        };

        let receipt = self
            .submit(contract, abi::encode_batch_verify(&digests))
            .await?;
        Ok(BatchVerification::Submitted {
            confirmed: confirmed(receipt),
            count,
        })
    }

    fn parse_batch(&self, raw_hashes: &[String]) -> Result<Vec<HexDigest>, VerifyError> {
        if raw_hashes.is_empty() {
            return Err(VerifyError::InvalidBatch(
                "at least one resume hash is required".to_string(),
            ));
        }
        if raw_hashes.len() > self.policy.batch_limit {
            return Err(VerifyError::InvalidBatch(format!(
                "{} hashes submitted, at most {} are allowed per batch",
                raw_hashes.len(),
                self.policy.batch_limit
            )));
        }

        raw_hashes
            .iter()
            .enumerate()
            .map(|(index, raw)| {
                HexDigest::parse(raw).map_err(|e| {
                    VerifyError::InvalidHashFormat(format!(
                        "item {index}: {}",
                        VerifyError::from(e)
                    ))
                })
            })
            .collect()
    }

    // ────────────────────────────────────────────────────────────────────────
    // Transaction pipeline
    // ────────────────────────────────────────────────────────────────────────

    /// BUILD_TX → SIGN → BROADCAST → CONFIRM for one contract call.
    async fn submit(&self, contract: Address, data: Vec<u8>) -> Result<Receipt, VerifyError> {
        let signer = self.signer.resolve_address().await?;

        let balance = with_backoff(&self.policy.retry, "eth_getBalance", || {
            self.chain.get_balance(signer)
        })
        .await?;
        if balance < self.policy.min_balance_wei {
            return Err(VerifyError::InsufficientFunds(format!(
                "signer {} holds {} but at least {} is required",
                to_checksum(&signer),
                format_units(balance),
                format_units(self.policy.min_balance_wei)
            )));
        }

        let nonce = with_backoff(&self.policy.retry, "eth_getTransactionCount", || {
            self.chain.get_nonce(signer)
        })
        .await?;
        let fees = with_backoff(&self.policy.retry, "feeEstimate", || {
            self.chain.get_fee_estimate()
        })
        .await?;

        let call = CallRequest {
            from: signer,
            to: contract,
            data,
        };
        let estimated = with_backoff(&self.policy.retry, "eth_estimateGas", || {
            self.chain.estimate_gas(&call)
        })
        .await
        .map_err(|e| match e {
            ChainError::Rpc { .. } | ChainError::Decode(_) => {
                VerifyError::GasEstimation(e.to_string())
            }
            other => VerifyError::from(other),
        })?;

        let tx = UnsignedTransaction {
            chain_id: self.settings.chain_id,
            nonce,
            gas_limit: with_safety_margin(estimated, self.policy.gas_margin_percent),
            to: contract,
            value: U256::zero(),
            data: call.data,
            fees: TxFees::from(&fees),
        };

        if balance < tx.max_cost() {
            return Err(VerifyError::InsufficientFunds(format!(
                "signer {} holds {} but this transaction may cost up to {}",
                to_checksum(&signer),
                format_units(balance),
                format_units(tx.max_cost())
            )));
        }

        let signature = self.signer.sign(&tx.signing_hash()).await?;
        let raw_tx = tx.encode_signed(&signature);
        let local_hash = H256(keccak256(&raw_tx));

        // Set once an attempt fails in transit: the node may have accepted it anyway.
        let interrupted = AtomicBool::new(false);
        let broadcast = {
            let chain = &self.chain;
            let raw_tx = &raw_tx;
            let interrupted = &interrupted;
            move || async move {
                let result = chain.broadcast(raw_tx).await;
                if matches!(&result, Err(e) if e.is_transient()) {
                    interrupted.store(true, Ordering::SeqCst);
                }
                result
            }
        };

        let (tx_hash, rejection) =
            match with_backoff(&self.policy.retry, "eth_sendRawTransaction", broadcast).await {
                Ok(hash) => (hash, None),
                // A retried broadcast whose first attempt reached the node.
                Err(ChainError::Rpc { message, .. }) if is_already_known(&message) => {
                    warn!("Node already knows transaction {}", to_hex(local_hash.as_bytes()));
                    (local_hash, None)
                }
                // "nonce too low" and friends after a lost reply can mean our own
                // transaction landed. Only a confirmation settles it.
                Err(e @ ChainError::Rpc { .. }) if interrupted.load(Ordering::SeqCst) => {
                    warn!(
                        "Retried broadcast of {} rejected ({e}), checking whether an earlier attempt landed",
                        to_hex(local_hash.as_bytes())
                    );
                    (local_hash, Some(e))
                }
                Err(e) => return Err(e.into()),
            };
        info!(
            "Broadcast transaction {} (nonce {nonce}, gas limit {})",
            to_hex(tx_hash.as_bytes()),
            tx.gas_limit
        );

        let receipt = match (
            self.chain
                .wait_for_confirmation(tx_hash, self.policy.confirmations)
                .await,
            rejection,
        ) {
            (Ok(receipt), _) => receipt,
            (Err(ChainError::ConfirmationTimeout { .. }), Some(rejected)) => {
                return Err(rejected.into())
            }
            (Err(e), _) => return Err(e.into()),
        };
        info!(
            "Transaction {} confirmed in block {} (gas used {})",
            to_hex(receipt.transaction_hash.as_bytes()),
            receipt.block_number,
            receipt.gas_used
        );
        Ok(receipt)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Read-only queries
    // ────────────────────────────────────────────────────────────────────────

    pub async fn check(&self, raw_hash: &str) -> CheckOutcome {
        let network = self.settings.network_name.clone();
        let digest = match HexDigest::parse(raw_hash) {
            Ok(digest) => digest,
            Err(e) => {
                return CheckOutcome {
                    success: false,
                    resume_hash: None,
                    verified: false,
                    timestamp: None,
                    verifier_address: None,
                    network,
                    error: Some(VerifyError::from(e).to_string()),
                }
            }
        };

        let Some(contract) = self.settings.deployed_contract() else {
            return CheckOutcome {
                success: true,
                resume_hash: Some(digest.to_hex()),
                verified: false,
                timestamp: None,
                verifier_address: None,
                network: self.settings.simulated_network(),
                error: None,
            };
        };

        match with_backoff(&self.policy.retry, "checkVerification", || {
            self.chain.read_verification(contract, &digest)
        })
        .await
        {
            Ok(record) => CheckOutcome {
                success: true,
                resume_hash: Some(digest.to_hex()),
                verified: record.verified,
                timestamp: record
                    .verified
                    .then(|| seconds_to_millis(record.timestamp)),
                verifier_address: record.verified.then(|| to_checksum(&record.verifier)),
                network,
                error: None,
            },
            Err(e) => CheckOutcome {
                success: false,
                resume_hash: Some(digest.to_hex()),
                verified: false,
                timestamp: None,
                verifier_address: None,
                network,
                error: Some(VerifyError::from(e).to_string()),
            },
        }
    }

    /// Network, signer and contract state. Individual read failures are
    /// reported in `errors` instead of failing the whole report.
    pub async fn status(&self) -> ServiceStatus {
        let contract = self.settings.deployed_contract();
        let mut errors = Vec::new();

        let signer = match self.signer.resolve_address().await {
            Ok(address) => Some(address),
            Err(e) => {
                errors.push(format!("signer: {e}"));
                None
            }
        };

        let mut signer_balance = None;
        if let Some(address) = signer {
            match self.chain.get_balance(address).await {
                Ok(balance) => signer_balance = Some(format_units(balance)),
                Err(e) => errors.push(format!("balance: {e}")),
            }
        }

        let mut total_verifications = None;
        if let Some(contract) = contract {
            match self.chain.total_verifications(contract).await {
                Ok(total) => total_verifications = Some(total.to_string()),
                Err(e) => errors.push(format!("totalVerifications: {e}")),
            }
        }

        ServiceStatus {
            network: self.settings.network_name.clone(),
            chain_id: self.settings.chain_id,
            contract_address: contract.map(|c| to_checksum(&c)),
            simulated: contract.is_none(),
            signer_address: signer.map(|s| to_checksum(&s)),
            signer_balance,
            total_verifications,
            errors,
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Messages and metrics
    // ────────────────────────────────────────────────────────────────────────

    fn user_message(&self, err: &VerifyError) -> String {
        match err {
            VerifyError::InsufficientFunds(_) => format!(
                "{err}. Fund the signer wallet with test tokens from {}",
                self.settings.faucet_url
            ),
            VerifyError::ConfirmationTimeout { tx_hash, .. } => {
                format!("{err}. Track it at {}", self.settings.tx_url(tx_hash))
            }
            _ => err.to_string(),
        }
    }

    fn record_verification(&self, verification: &Verification, started: Instant) {
        match verification {
            Verification::Submitted(confirmed) => {
                self.emit(metrics::VERIFICATION_SUCCESS, 1.0, MetricUnit::Count);
                self.emit(metrics::GAS_USED, u256_to_f64(confirmed.gas_used), MetricUnit::Count);
            }
            Verification::AlreadyVerified { .. } => {
                self.emit(metrics::ALREADY_VERIFIED, 1.0, MetricUnit::Count)
            }
            Verification::Simulated(_) => {
                self.emit(metrics::VERIFICATION_SIMULATED, 1.0, MetricUnit::Count)
            }
        }
        self.emit(
            metrics::VERIFICATION_DURATION,
            started.elapsed().as_millis() as f64,
            MetricUnit::Milliseconds,
        );
    }

    fn record_failure(&self, err: &VerifyError) {
        self.emit(metrics::VERIFICATION_ERROR, 1.0, MetricUnit::Count);
        self.emit(
            &format!("{}.{}", metrics::VERIFICATION_ERROR, err.kind()),
            1.0,
            MetricUnit::Count,
        );
    }

    fn emit(&self, name: &str, value: f64, unit: MetricUnit) {
        self.metrics.record_metric(name, value, unit);
    }
}

fn confirmed(receipt: Receipt) -> Confirmed {
    Confirmed {
        tx_hash: receipt.transaction_hash,
        block_number: receipt.block_number,
        gas_used: receipt.gas_used,
        gas_price: receipt.effective_gas_price,
        timestamp: chrono::Utc::now().timestamp_millis(),
    }
}

/// A synthetic transaction for deployments without a contract. The hash is
/// salted so repeated simulations of one digest are distinguishable.
fn simulate(seed: &[u8]) -> Simulation {
    let salt = Uuid::new_v4();
    let mut material = seed.to_vec();
    material.extend_from_slice(salt.as_bytes());

    Simulation {
        tx_hash: digest_bytes(&material),
        block_number: SIMULATED_BLOCK_BASE + (salt.as_u128() % 1_000_000) as u64,
        timestamp: chrono::Utc::now().timestamp_millis(),
    }
}

fn is_already_known(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("already known") || message.contains("known transaction")
}

fn seconds_to_millis(seconds: u64) -> i64 {
    i64::try_from(seconds.saturating_mul(1000)).unwrap_or(i64::MAX)
}

fn u256_to_f64(value: U256) -> f64 {
    if value > U256::from(u64::MAX) {
        u64::MAX as f64
    } else {
        value.low_u64() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

    use crate::chain::{FeeEstimate, OnChainVerification};
    use crate::eth::address_from_uncompressed;
    use crate::signer::testing::LocalKeySigner;

    const GWEI: u64 = 1_000_000_000;

    fn contract() -> Address {
        Address::repeat_byte(0xc0)
    }

    fn dead_hash() -> H256 {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xde;
        bytes[1] = 0xad;
        H256(bytes)
    }

    fn settings(contract_address: Option<Address>) -> ChainSettings {
        ChainSettings {
            contract_address,
            rpc_url: "http://localhost:8545".into(),
            chain_id: 80001,
            explorer_url: "https://mumbai.polygonscan.com".into(),
            network_name: "Polygon Mumbai".into(),
            faucet_url: "https://faucet.polygon.technology".into(),
        }
    }

    struct MockChain {
        record: Option<OnChainVerification>,
        balance: U256,
        fees: FeeEstimate,
        /// Broadcasts that fail with a network error before one succeeds.
        broadcast_failures: AtomicUsize,
        broadcast_error: Option<fn() -> ChainError>,
        estimate_error: Option<fn() -> ChainError>,
        reverts: bool,
        /// The receipt never shows up.
        never_confirms: bool,
        calls: Mutex<Vec<&'static str>>,
        raw_txs: Mutex<Vec<Vec<u8>>>,
        estimates: Mutex<Vec<CallRequest>>,
    }

    impl Default for MockChain {
        fn default() -> Self {
            Self {
                record: None,
                balance: U256::exp10(18),
                fees: FeeEstimate {
                    gas_price: U256::from(30 * GWEI),
                    max_fee_per_gas: Some(U256::from(62 * GWEI)),
                    max_priority_fee_per_gas: Some(U256::from(2 * GWEI)),
                },
                broadcast_failures: AtomicUsize::new(0),
                broadcast_error: None,
                estimate_error: None,
                reverts: false,
                never_confirms: false,
                calls: Mutex::new(Vec::new()),
                raw_txs: Mutex::new(Vec::new()),
                estimates: Mutex::new(Vec::new()),
            }
        }
    }

    impl MockChain {
        fn log(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn count(&self, call: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChainClient for MockChain {
        async fn get_balance(&self, _address: Address) -> Result<U256, ChainError> {
            self.log("get_balance");
            Ok(self.balance)
        }

        async fn get_nonce(&self, _address: Address) -> Result<u64, ChainError> {
            self.log("get_nonce");
            Ok(5)
        }

        async fn get_fee_estimate(&self) -> Result<FeeEstimate, ChainError> {
            self.log("get_fee_estimate");
            Ok(self.fees.clone())
        }

        async fn estimate_gas(&self, call: &CallRequest) -> Result<U256, ChainError> {
            self.log("estimate_gas");
            self.estimates.lock().unwrap().push(call.clone());
            match self.estimate_error {
                Some(make) => Err(make()),
                None => Ok(U256::from(80_000u64)),
            }
        }

        async fn read_verification(
            &self,
            _contract: Address,
            _digest: &HexDigest,
        ) -> Result<OnChainVerification, ChainError> {
            self.log("read_verification");
            Ok(self.record.unwrap_or(OnChainVerification {
                verified: false,
                timestamp: 0,
                verifier: Address::zero(),
            }))
        }

        async fn total_verifications(&self, _contract: Address) -> Result<U256, ChainError> {
            self.log("total_verifications");
            Ok(U256::from(42u64))
        }

        async fn broadcast(&self, raw_tx: &[u8]) -> Result<H256, ChainError> {
            self.log("broadcast");
            self.raw_txs.lock().unwrap().push(raw_tx.to_vec());
            let remaining = self.broadcast_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.broadcast_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ChainError::Network("connection reset by peer".into()));
            }
            if let Some(make) = self.broadcast_error {
                return Err(make());
            }
            Ok(dead_hash())
        }

        async fn wait_for_confirmation(
            &self,
            tx_hash: H256,
            _confirmations: u64,
        ) -> Result<Receipt, ChainError> {
            self.log("wait_for_confirmation");
            if self.never_confirms {
                return Err(ChainError::ConfirmationTimeout {
                    tx_hash: to_hex(tx_hash.as_bytes()),
                    waited_secs: 120,
                });
            }
            if self.reverts {
                return Err(ChainError::Reverted {
                    tx_hash: to_hex(tx_hash.as_bytes()),
                    block_number: 1000,
                });
            }
            Ok(Receipt {
                transaction_hash: tx_hash,
                success: true,
                block_number: 1000,
                gas_used: U256::from(80_000u64),
                effective_gas_price: Some(U256::from(30 * GWEI)),
            })
        }
    }

    #[derive(Default)]
    struct RecordingMetrics {
        recorded: Mutex<Vec<(String, f64, MetricUnit)>>,
    }

    impl RecordingMetrics {
        fn value_of(&self, name: &str) -> Option<f64> {
            self.recorded
                .lock()
                .unwrap()
                .iter()
                .find(|(n, _, _)| n == name)
                .map(|(_, v, _)| *v)
        }
    }

    impl MetricsSink for RecordingMetrics {
        fn record_metric(&self, name: &str, value: f64, unit: MetricUnit) {
            self.recorded
                .lock()
                .unwrap()
                .push((name.to_string(), value, unit));
        }
    }

    struct Harness {
        verifier: Verifier,
        chain: Arc<MockChain>,
        signer: Arc<LocalKeySigner>,
        metrics: Arc<RecordingMetrics>,
    }

    fn harness_with(chain: MockChain, signer: LocalKeySigner, contract: Option<Address>) -> Harness {
        let chain = Arc::new(chain);
        let signer = Arc::new(signer);
        let metrics = Arc::new(RecordingMetrics::default());
        let verifier = Verifier::new(
            settings(contract),
            chain.clone(),
            Arc::new(SigningIdentity::new(signer.clone())),
            metrics.clone(),
            VerifierPolicy::default(),
        );
        Harness {
            verifier,
            chain,
            signer,
            metrics,
        }
    }

    fn harness(chain: MockChain) -> Harness {
        harness_with(chain, LocalKeySigner::from_seed(1), Some(contract()))
    }

    fn zero_hash() -> String {
        format!("0x{}", "0".repeat(64))
    }

    fn recover_sender(raw_tx: &[u8], signing_hash: &[u8; 32]) -> Address {
        assert_eq!(raw_tx[0], 0x02);
        let rlp = rlp::Rlp::new(&raw_tx[1..]);
        let parity: u8 = rlp.val_at(9).unwrap();
        let r: U256 = rlp.val_at(10).unwrap();
        let s: U256 = rlp.val_at(11).unwrap();

        let mut rs = [0u8; 64];
        r.to_big_endian(&mut rs[..32]);
        s.to_big_endian(&mut rs[32..]);
        let signature = Signature::from_slice(&rs).unwrap();
        let key = VerifyingKey::recover_from_prehash(
            signing_hash,
            &signature,
            RecoveryId::new(parity == 1, false),
        )
        .unwrap();
        address_from_uncompressed(key.to_encoded_point(false).as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn test_happy_path_submits_and_confirms() {
        let h = harness(MockChain::default());

        let outcome = h.verifier.verify(&zero_hash()).await;

        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(
            outcome.transaction_hash.as_deref(),
            Some(to_hex(dead_hash().as_bytes()).as_str())
        );
        assert_eq!(outcome.block_number, Some(1000));
        assert_eq!(outcome.gas_used.as_deref(), Some("80000"));
        assert_eq!(outcome.network, "Polygon Mumbai");
        assert_eq!(outcome.resume_hash, Some(zero_hash()));
        assert!(outcome.explorer_url.unwrap().ends_with(&to_hex(dead_hash().as_bytes())));

        assert_eq!(h.chain.count("read_verification"), 1);
        assert_eq!(h.chain.count("broadcast"), 1);
        assert_eq!(h.signer.sign_calls(), 1);

        let estimates = h.chain.estimates.lock().unwrap().clone();
        assert_eq!(estimates[0].from, h.signer.address());
        assert_eq!(estimates[0].to, contract());

        assert_eq!(h.metrics.value_of(metrics::VERIFICATION_SUCCESS), Some(1.0));
        assert_eq!(h.metrics.value_of(metrics::GAS_USED), Some(80_000.0));
        assert!(h.metrics.value_of(metrics::VERIFICATION_DURATION).is_some());
    }

    #[tokio::test]
    async fn test_broadcast_transaction_is_signed_by_the_key() {
        let h = harness(MockChain::default());
        let digest = HexDigest::parse(&zero_hash()).unwrap();

        h.verifier.verify(&zero_hash()).await;

        let expected = UnsignedTransaction {
            chain_id: 80001,
            nonce: 5,
            gas_limit: U256::from(96_000u64),
            to: contract(),
            value: U256::zero(),
            data: abi::encode_verify(&digest),
            fees: TxFees::Eip1559 {
                max_fee_per_gas: U256::from(62 * GWEI),
                max_priority_fee_per_gas: U256::from(2 * GWEI),
            },
        };
        let raw_tx = h.chain.raw_txs.lock().unwrap()[0].clone();
        assert_eq!(
            recover_sender(&raw_tx, &expected.signing_hash()),
            h.signer.address()
        );
    }

    #[tokio::test]
    async fn test_insufficient_funds_stops_before_broadcast() {
        let h = harness(MockChain {
            balance: U256::exp10(14),
            ..MockChain::default()
        });

        let outcome = h.verifier.verify(&zero_hash()).await;

        assert!(!outcome.success);
        assert!(outcome.transaction_hash.is_none());
        let message = outcome.error.unwrap();
        assert!(message.contains("Insufficient funds"), "{message}");
        assert!(message.contains("0.0001"), "{message}");
        assert!(message.contains("https://faucet.polygon.technology"), "{message}");
        assert_eq!(h.chain.count("broadcast"), 0);
        assert_eq!(h.signer.sign_calls(), 0);
        assert_eq!(h.metrics.value_of(metrics::VERIFICATION_ERROR), Some(1.0));
    }

    #[tokio::test]
    async fn test_already_verified_short_circuits() {
        let verifier = Address::repeat_byte(0x77);
        let h = harness(MockChain {
            record: Some(OnChainVerification {
                verified: true,
                timestamp: 1_700_000_000,
                verifier,
            }),
            ..MockChain::default()
        });

        let outcome = h.verifier.verify(&zero_hash()).await;

        assert!(outcome.success);
        assert_eq!(outcome.already_verified, Some(true));
        assert_eq!(outcome.timestamp, Some(1_700_000_000_000));
        assert_eq!(outcome.verifier_address, Some(to_checksum(&verifier)));
        assert!(outcome.transaction_hash.is_none());
        assert_eq!(h.chain.count("broadcast"), 0);
        assert_eq!(h.chain.count("estimate_gas"), 0);
        assert_eq!(h.signer.sign_calls(), 0);
        assert_eq!(h.metrics.value_of(metrics::ALREADY_VERIFIED), Some(1.0));
    }

    #[tokio::test]
    async fn test_simulation_without_contract() {
        let h = harness_with(MockChain::default(), LocalKeySigner::from_seed(1), None);

        let outcome = h.verifier.verify(&zero_hash()).await;

        assert!(outcome.success);
        assert_eq!(outcome.network, "Polygon Mumbai (Simulated)");
        let tx_hash = outcome.transaction_hash.unwrap();
        assert!(tx_hash.starts_with("0x") && tx_hash.len() == 66);
        assert!(outcome.block_number.unwrap() >= SIMULATED_BLOCK_BASE);
        assert!(outcome.explorer_url.is_none());
        assert_eq!(h.chain.total_calls(), 0);
        assert_eq!(h.signer.sign_calls(), 0);
    }

    #[tokio::test]
    async fn test_zero_contract_address_simulates() {
        let h = harness_with(
            MockChain::default(),
            LocalKeySigner::from_seed(1),
            Some(Address::zero()),
        );
        let outcome = h.verifier.verify(&zero_hash()).await;
        assert!(outcome.success);
        assert_eq!(h.chain.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_hash_makes_no_calls() {
        let h = harness(MockChain::default());
        let short = format!("0x{}", "ab".repeat(31));

        for raw in ["not-a-hash", "0x1234", short.as_str()] {
            let outcome = h.verifier.verify(raw).await;

            assert!(!outcome.success, "{raw}");
            assert!(outcome.error.unwrap().contains("Invalid hash format"));
            assert!(outcome.resume_hash.is_none());
        }
        assert_eq!(h.chain.total_calls(), 0);
        assert_eq!(h.signer.public_key_calls(), 0);
        assert_eq!(h.signer.sign_calls(), 0);
    }

    #[tokio::test]
    async fn test_unprefixed_hash_is_accepted() {
        let h = harness(MockChain::default());
        let outcome = h.verifier.verify(&"ab".repeat(32)).await;
        assert!(outcome.success);
        assert_eq!(outcome.resume_hash, Some(format!("0x{}", "ab".repeat(32))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_retries_network_errors() {
        let h = harness(MockChain {
            broadcast_failures: AtomicUsize::new(2),
            ..MockChain::default()
        });
        let started = tokio::time::Instant::now();

        let outcome = h.verifier.verify(&zero_hash()).await;

        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(h.chain.count("broadcast"), 3);
        assert!(started.elapsed() >= Duration::from_millis(3000));
        // The same signed bytes are resent.
        let raw = h.chain.raw_txs.lock().unwrap().clone();
        assert!(raw.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(h.signer.sign_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_gives_up_after_three_attempts() {
        let h = harness(MockChain {
            broadcast_failures: AtomicUsize::new(10),
            ..MockChain::default()
        });

        let outcome = h.verifier.verify(&zero_hash()).await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("Network error"));
        assert_eq!(h.chain.count("broadcast"), 3);
        assert_eq!(h.chain.count("wait_for_confirmation"), 0);
    }

    #[tokio::test]
    async fn test_already_known_broadcast_uses_local_hash() {
        let h = harness(MockChain {
            broadcast_error: Some(|| ChainError::Rpc {
                code: -32000,
                message: "already known".into(),
            }),
            ..MockChain::default()
        });

        let outcome = h.verifier.verify(&zero_hash()).await;

        let raw_tx = h.chain.raw_txs.lock().unwrap()[0].clone();
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.transaction_hash, Some(to_hex(&keccak256(&raw_tx))));
    }

    fn nonce_too_low() -> ChainError {
        ChainError::Rpc {
            code: -32000,
            message: "nonce too low".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_retry_after_lost_reply_waits_for_first_attempt() {
        let h = harness(MockChain {
            broadcast_failures: AtomicUsize::new(1),
            broadcast_error: Some(nonce_too_low),
            ..MockChain::default()
        });

        let outcome = h.verifier.verify(&zero_hash()).await;

        let raw_tx = h.chain.raw_txs.lock().unwrap()[0].clone();
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.transaction_hash, Some(to_hex(&keccak256(&raw_tx))));
        assert_eq!(h.chain.count("broadcast"), 2);
        assert_eq!(h.chain.count("wait_for_confirmation"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_retry_that_never_lands_reports_the_rejection() {
        let h = harness(MockChain {
            broadcast_failures: AtomicUsize::new(1),
            broadcast_error: Some(nonce_too_low),
            never_confirms: true,
            ..MockChain::default()
        });

        let outcome = h.verifier.verify(&zero_hash()).await;

        assert!(!outcome.success);
        let message = outcome.error.unwrap();
        assert!(message.contains("nonce too low"), "{message}");
        assert_eq!(h.chain.count("wait_for_confirmation"), 1);
    }

    #[tokio::test]
    async fn test_first_attempt_rejection_fails_without_waiting() {
        let h = harness(MockChain {
            broadcast_error: Some(nonce_too_low),
            ..MockChain::default()
        });

        let outcome = h.verifier.verify(&zero_hash()).await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("nonce too low"));
        assert_eq!(h.chain.count("broadcast"), 1);
        assert_eq!(h.chain.count("wait_for_confirmation"), 0);
    }

    #[tokio::test]
    async fn test_confirmation_timeout_links_to_explorer() {
        let h = harness(MockChain {
            never_confirms: true,
            ..MockChain::default()
        });

        let outcome = h.verifier.verify(&zero_hash()).await;

        assert!(!outcome.success);
        let message = outcome.error.unwrap();
        let link = format!(
            "https://mumbai.polygonscan.com/tx/{}",
            to_hex(dead_hash().as_bytes())
        );
        assert!(message.contains("not confirmed within 120s"), "{message}");
        assert!(message.contains(&link), "{message}");
    }

    #[tokio::test]
    async fn test_legacy_fees_produce_eip155_transaction() {
        let h = harness(MockChain {
            fees: FeeEstimate {
                gas_price: U256::from(30 * GWEI),
                max_fee_per_gas: None,
                max_priority_fee_per_gas: None,
            },
            ..MockChain::default()
        });
        let digest = HexDigest::parse(&zero_hash()).unwrap();

        let outcome = h.verifier.verify(&zero_hash()).await;
        assert!(outcome.success, "{:?}", outcome.error);

        let raw_tx = h.chain.raw_txs.lock().unwrap()[0].clone();
        // Legacy transactions are a bare RLP list, no type byte.
        assert!(raw_tx[0] >= 0xc0);
        let rlp = rlp::Rlp::new(&raw_tx);
        assert_eq!(rlp.item_count().unwrap(), 9);
        let gas_price: U256 = rlp.val_at(1).unwrap();
        assert_eq!(gas_price, U256::from(30 * GWEI));
        let v: u64 = rlp.val_at(6).unwrap();
        let r: U256 = rlp.val_at(7).unwrap();
        let s: U256 = rlp.val_at(8).unwrap();
        let parity = v - (80001 * 2 + 35);
        assert!(parity <= 1);

        let expected = UnsignedTransaction {
            chain_id: 80001,
            nonce: 5,
            gas_limit: U256::from(96_000u64),
            to: contract(),
            value: U256::zero(),
            data: abi::encode_verify(&digest),
            fees: TxFees::Legacy {
                gas_price: U256::from(30 * GWEI),
            },
        };
        let mut rs = [0u8; 64];
        r.to_big_endian(&mut rs[..32]);
        s.to_big_endian(&mut rs[32..]);
        let signature = Signature::from_slice(&rs).unwrap();
        let key = VerifyingKey::recover_from_prehash(
            &expected.signing_hash(),
            &signature,
            RecoveryId::new(parity == 1, false),
        )
        .unwrap();
        assert_eq!(
            address_from_uncompressed(key.to_encoded_point(false).as_bytes()).unwrap(),
            h.signer.address()
        );
    }

    #[tokio::test]
    async fn test_gas_estimation_failure() {
        let h = harness(MockChain {
            estimate_error: Some(|| ChainError::Rpc {
                code: 3,
                message: "execution reverted".into(),
            }),
            ..MockChain::default()
        });

        let outcome = h.verifier.verify(&zero_hash()).await;

        assert!(!outcome.success);
        let message = outcome.error.unwrap();
        assert!(message.starts_with("Gas estimation failed"), "{message}");
        assert!(message.contains("execution reverted"), "{message}");
        assert_eq!(h.chain.count("broadcast"), 0);
        assert_eq!(h.chain.count("estimate_gas"), 1);
    }

    #[tokio::test]
    async fn test_reverted_transaction_fails() {
        let h = harness(MockChain {
            reverts: true,
            ..MockChain::default()
        });

        let outcome = h.verifier.verify(&zero_hash()).await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("failed on-chain"));
        assert!(outcome.transaction_hash.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_key_fails_without_broadcast() {
        let h = harness_with(
            MockChain::default(),
            LocalKeySigner::unavailable(),
            Some(contract()),
        );

        let outcome = h.verifier.verify(&zero_hash()).await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("Signing key unavailable"));
        assert_eq!(h.chain.count("broadcast"), 0);
        assert_eq!(h.chain.count("get_balance"), 0);
    }

    #[tokio::test]
    async fn test_foreign_signature_is_a_signer_mismatch() {
        let h = harness_with(
            MockChain::default(),
            LocalKeySigner::from_seed(1).with_foreign_signatures(2),
            Some(contract()),
        );

        let outcome = h.verifier.verify(&zero_hash()).await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("Signature does not match"));
        assert_eq!(h.chain.count("broadcast"), 0);
    }

    #[tokio::test]
    async fn test_batch_submits_one_transaction() {
        let h = harness(MockChain::default());
        let hashes: Vec<String> = (0..3u8)
            .map(|i| digest_bytes(&[i]).to_hex())
            .collect();

        let outcome = h.verifier.verify_batch(&hashes).await;

        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.verified_count, 3);
        assert_eq!(outcome.block_number, Some(1000));
        assert_eq!(h.chain.count("read_verification"), 0);
        assert_eq!(h.chain.count("broadcast"), 1);

        let estimates = h.chain.estimates.lock().unwrap().clone();
        let digests: Vec<HexDigest> = hashes.iter().map(|h| HexDigest::parse(h).unwrap()).collect();
        assert_eq!(estimates[0].data, abi::encode_batch_verify(&digests));
        assert_eq!(h.metrics.value_of(metrics::BATCH_VERIFIED), Some(3.0));
    }

    #[tokio::test]
    async fn test_batch_over_limit_is_rejected() {
        let h = harness(MockChain::default());
        let hashes = vec![zero_hash(); 51];

        let outcome = h.verifier.verify_batch(&hashes).await;

        assert!(!outcome.success);
        let message = outcome.error.unwrap();
        assert!(message.starts_with("Invalid batch"), "{message}");
        assert!(message.contains("50"), "{message}");
        assert_eq!(h.chain.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_batch_of_fifty_is_accepted() {
        let h = harness(MockChain::default());
        let outcome = h.verifier.verify_batch(&vec![zero_hash(); 50]).await;
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.verified_count, 50);
    }

    #[tokio::test]
    async fn test_batch_with_invalid_item_names_it() {
        let h = harness(MockChain::default());
        let hashes = vec![zero_hash(), "not-a-hash".to_string()];

        let outcome = h.verifier.verify_batch(&hashes).await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("item 1"));
        assert_eq!(h.chain.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let h = harness(MockChain::default());
        let outcome = h.verifier.verify_batch(&[]).await;
        assert!(!outcome.success);
        assert_eq!(h.chain.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_check_reports_record() {
        let verifier = Address::repeat_byte(0x77);
        let h = harness(MockChain {
            record: Some(OnChainVerification {
                verified: true,
                timestamp: 1_700_000_000,
                verifier,
            }),
            ..MockChain::default()
        });

        let outcome = h.verifier.check(&zero_hash()).await;

        assert!(outcome.success);
        assert!(outcome.verified);
        assert_eq!(outcome.timestamp, Some(1_700_000_000_000));
        assert_eq!(outcome.verifier_address, Some(to_checksum(&verifier)));
        assert_eq!(h.chain.count("broadcast"), 0);
    }

    #[tokio::test]
    async fn test_check_unknown_digest() {
        let h = harness(MockChain::default());
        let outcome = h.verifier.check(&zero_hash()).await;
        assert!(outcome.success);
        assert!(!outcome.verified);
        assert!(outcome.verifier_address.is_none());
    }

    #[tokio::test]
    async fn test_status_reports_signer_and_contract() {
        let h = harness(MockChain::default());

        let status = h.verifier.status().await;

        assert_eq!(status.chain_id, 80001);
        assert!(!status.simulated);
        assert_eq!(status.contract_address, Some(to_checksum(&contract())));
        assert_eq!(status.signer_address, Some(to_checksum(&h.signer.address())));
        assert_eq!(status.signer_balance.as_deref(), Some("1"));
        assert_eq!(status.total_verifications.as_deref(), Some("42"));
        assert!(status.errors.is_empty());
    }

    #[tokio::test]
    async fn test_status_collects_signer_errors() {
        let h = harness_with(MockChain::default(), LocalKeySigner::unavailable(), None);

        let status = h.verifier.status().await;

        assert!(status.simulated);
        assert!(status.signer_address.is_none());
        assert_eq!(status.errors.len(), 1);
        assert_eq!(h.chain.total_calls(), 0);
    }
}
