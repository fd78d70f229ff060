//! Axum route handlers for the Verification API.
//!
//! Verification failures are reported in the body (`success: false`) with a
//! 200 status; only requests that cannot be read at all become `AppError`s.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::digest::{digest, DigestInput};
use crate::errors::AppError;
use crate::state::AppState;
use crate::verification::outcome::{BatchOutcome, CheckOutcome, ServiceStatus, VerificationOutcome};

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HashRequest {
    /// A JSON string is hashed as text, anything else canonically.
    pub content: Value,
}

#[derive(Debug, Serialize)]
pub struct HashResponse {
    pub hash: String,
    pub algorithm: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[serde(alias = "hash")]
    pub resume_hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchVerifyRequest {
    #[serde(alias = "hashes")]
    pub resume_hashes: Vec<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/hash
///
/// `application/json` bodies are read as `{ "content": ... }`; any other
/// content type is hashed as raw bytes.
pub async fn handle_hash(
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<HashResponse>, AppError> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json"))
        .unwrap_or(false);

    let input = if is_json {
        let request: HashRequest = serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("Invalid JSON body: {e}")))?;
        match request.content {
            Value::Null => {
                return Err(AppError::Validation("content cannot be null".to_string()))
            }
            Value::String(text) => DigestInput::Text(text),
            other => DigestInput::Structured(other),
        }
    } else {
        if body.is_empty() {
            return Err(AppError::Validation("Request body is empty".to_string()));
        }
        DigestInput::Bytes(body)
    };

    let hash = digest(&input).map_err(|e| AppError::Validation(e.to_string()))?;

    Ok(Json(HashResponse {
        hash: hash.to_hex(),
        algorithm: "sha256",
    }))
}

/// POST /api/v1/verify
pub async fn handle_verify(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Json<VerificationOutcome> {
    Json(state.verifier.verify(&request.resume_hash).await)
}

/// POST /api/v1/verify/batch
pub async fn handle_verify_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchVerifyRequest>,
) -> Json<BatchOutcome> {
    Json(state.verifier.verify_batch(&request.resume_hashes).await)
}

/// GET /api/v1/verify/:hash
///
/// Read-only; never sends a transaction.
pub async fn handle_check(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Json<CheckOutcome> {
    Json(state.verifier.check(&hash).await)
}

/// GET /api/v1/status
pub async fn handle_status(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(state.verifier.status().await)
}
