//! Proof-of-work check for the account endpoints.
//!
//! The client picks an integer `payload` field such that the SHA-256 of the
//! body, with spaces and newlines removed, starts with the configured
//! number of hex zeros, and sends that hash in `Proof-Of-Work`.

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::AppState;
use super::response::ApiError;

pub const POW_HEADER: &str = "Proof-Of-Work";
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Deserialize)]
struct WithPayload {
    payload: Option<i64>,
}

/// Hex SHA-256 of `body` with spaces and newlines stripped.
#[must_use]
pub fn body_hash(body: &[u8]) -> String {
    let stripped: Vec<u8> = body
        .iter()
        .copied()
        .filter(|b| *b != b'\n' && *b != b' ')
        .collect();
    hex::encode(Sha256::digest(&stripped))
}

/// Checks a proof against a request body. Every failure is the same `false`.
#[must_use]
pub fn verify(body: &[u8], proof: Option<&str>, zero_count: usize) -> bool {
    let Some(proof) = proof.filter(|p| !p.is_empty()) else {
        debug!("Proof-of-work header missing");
        return false;
    };

    match serde_json::from_slice::<WithPayload>(body) {
        Ok(WithPayload { payload: Some(_) }) => {}
        _ => {
            debug!("Proof-of-work payload missing or body malformed");
            return false;
        }
    }

    let expected = body_hash(body);
    if proof != expected {
        debug!("Proof-of-work hash mismatch");
        return false;
    }
    proof.len() >= zero_count && proof.bytes().take(zero_count).all(|b| b == b'0')
}

fn rejection() -> Response {
    ApiError::bad_request("Proof of work validation failed").into_response()
}

/// Middleware for the sign-up and sign-in routes.
pub async fn require_proof_of_work(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let settings = &state.settings.proof_of_work;
    if !settings.enabled {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let Ok(bytes) = to_bytes(body, MAX_BODY_BYTES).await else {
        return rejection();
    };
    let proof = parts
        .headers
        .get(POW_HEADER)
        .and_then(|v| v.to_str().ok());
    if !verify(&bytes, proof, settings.zero_count) {
        return rejection();
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}
