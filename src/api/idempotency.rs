//! Idempotency guard for mutating API requests.
//!
//! Clients attach an `X-Idempotency-Key` (or `Idempotency-Key`) header to
//! POST/PUT/PATCH/DELETE requests under `/api/`. The guard fingerprints the
//! request as (key, method, path, SHA-256 of the body) and:
//!
//! 1. replays the stored status and body when the fingerprint completed
//!    before, without running the handler;
//! 2. otherwise claims the fingerprint, runs the handler and stores its
//!    response;
//! 3. when another request holds the claim, waits for it to finish and
//!    replays its response.
//!
//! 5xx responses are not stored and release the claim so a retry can run.

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use opentelemetry::KeyValue;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::error::ApiError;
use crate::config::IdempotencySettings;
use crate::model::{IdempotencyRecord, RequestFingerprint};
use crate::store::{Claim, IdempotencyStore, StoredResponse};
use crate::telemetry::metrics;

pub const IDEMPOTENCY_KEY_HEADER: &str = "x-idempotency-key";
pub const IDEMPOTENCY_KEY_ALIAS: &str = "idempotency-key";
pub const REPLAY_HEADER: &str = "x-idempotency-replay";

pub const MAX_KEY_LEN: usize = 200;

/// Request bodies above this size are rejected rather than fingerprinted.
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

const MAX_RESPONSE_SIZE: usize = 8 * 1024 * 1024;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Shared state for the guard.
#[derive(Clone)]
pub struct IdempotencyGuard {
    pub store: Arc<dyn IdempotencyStore>,
    pub settings: IdempotencySettings,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn IdempotencyStore>, settings: IdempotencySettings) -> Self {
        Self { store, settings }
    }
}

/// Axum middleware applying the guard. Requests the guard does not cover
/// pass straight through.
pub async fn idempotency_middleware(
    State(guard): State<IdempotencyGuard>,
    request: Request,
    next: Next,
) -> Response {
    if !is_guarded(request.method(), request.uri().path()) {
        return next.run(request).await;
    }

    let key = match extract_key(request.headers()) {
        Ok(Some(key)) => key,
        Ok(None) => {
            count_outcome("bypass");
            return next.run(request).await;
        }
        Err(e) => return e.into_response(),
    };

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_SIZE).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return ApiError::bad_request(format!("failed to read request body: {e}"))
                .into_response();
        }
    };
    let fingerprint = fingerprint(&key, &parts.method, parts.uri.path(), &body);

    match acquire(&guard, &fingerprint).await {
        Ok(Acquired::Run) => {
            count_outcome("miss");
            let request = Request::from_parts(parts, Body::from(body));
            execute(&guard, &fingerprint, next.run(request).await).await
        }
        Ok(Acquired::Replay { record: stored, waited }) => {
            count_outcome(if waited { "wait" } else { "hit" });
            tracing::debug!(key = %fingerprint.key, path = %fingerprint.path, "replaying stored response");
            replay(&stored)
        }
        Err(e) => e.into_response(),
    }
}

enum Acquired {
    Run,
    Replay { record: IdempotencyRecord, waited: bool },
}

/// Look the fingerprint up, claim it, or wait for whoever holds it.
async fn acquire(
    guard: &IdempotencyGuard,
    fingerprint: &RequestFingerprint,
) -> Result<Acquired, ApiError> {
    let deadline = Instant::now() + guard.settings.wait_timeout;
    let mut waited = false;

    loop {
        if let Some(StoredResponse::Complete(record)) = guard
            .store
            .lookup(fingerprint)
            .await
            .map_err(ApiError::from)?
        {
            return Ok(Acquired::Replay { record, waited });
        }

        match guard
            .store
            .claim(fingerprint, guard.settings.stale_after)
            .await
            .map_err(ApiError::from)?
        {
            Claim::Acquired => return Ok(Acquired::Run),
            Claim::Held(StoredResponse::Complete(record)) => {
                return Ok(Acquired::Replay { record, waited });
            }
            Claim::Held(StoredResponse::Pending { claimed_at }) => {
                if Instant::now() >= deadline {
                    count_outcome("in_flight");
                    tracing::warn!(
                        key = %fingerprint.key,
                        claimed_at = %claimed_at,
                        "gave up waiting for in-flight duplicate"
                    );
                    return Err(ApiError::in_flight(&fingerprint.key));
                }
                waited = true;
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
}

/// Buffer the handler's response, persist it unless it is a server error,
/// and hand it back unchanged.
async fn execute(
    guard: &IdempotencyGuard,
    fingerprint: &RequestFingerprint,
    response: Response,
) -> Response {
    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_RESPONSE_SIZE).await {
        Ok(bytes) => bytes,
        Err(e) => {
            release(guard, fingerprint).await;
            return ApiError::internal(format!("failed to buffer response: {e}")).into_response();
        }
    };

    if parts.status.is_server_error() {
        release(guard, fingerprint).await;
    } else if let Err(e) = guard
        .store
        .complete(fingerprint, parts.status.as_u16(), &bytes)
        .await
    {
        tracing::warn!(key = %fingerprint.key, error = %e, "failed to store idempotent response");
        release(guard, fingerprint).await;
    }

    Response::from_parts(parts, Body::from(bytes))
}

async fn release(guard: &IdempotencyGuard, fingerprint: &RequestFingerprint) {
    if let Err(e) = guard.store.release(fingerprint).await {
        tracing::warn!(key = %fingerprint.key, error = %e, "failed to release idempotency claim");
    }
}

fn replay(record: &IdempotencyRecord) -> Response {
    let status = StatusCode::from_u16(record.status_code).unwrap_or(StatusCode::OK);
    let mut response = (status, Body::from(record.response_body.clone())).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(REPLAY_HEADER, HeaderValue::from_static("true"));
    response
}

fn count_outcome(outcome: &'static str) {
    metrics::idempotency().add(1, &[KeyValue::new("outcome", outcome)]);
}

/// Mutating methods under `/api/` are guarded.
pub fn is_guarded(method: &Method, path: &str) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    ) && path.starts_with("/api/")
}

/// The idempotency key, if any. Present but malformed keys are rejected.
pub fn extract_key(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
    let Some(value) = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .or_else(|| headers.get(IDEMPOTENCY_KEY_ALIAS))
    else {
        return Ok(None);
    };
    let key = value
        .to_str()
        .map_err(|_| ApiError::bad_request("idempotency key must be visible ASCII"))?
        .trim();
    if key.is_empty() || key.chars().count() > MAX_KEY_LEN {
        return Err(ApiError::bad_request(format!(
            "idempotency key must be 1 to {MAX_KEY_LEN} characters"
        )));
    }
    Ok(Some(key.to_string()))
}

/// Hex SHA-256 of a request body.
pub fn body_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

pub fn fingerprint(key: &str, method: &Method, path: &str, body: &Bytes) -> RequestFingerprint {
    RequestFingerprint {
        key: key.to_string(),
        method: method.as_str().to_string(),
        path: path.to_string(),
        body_hash: body_hash(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_mutating_api_requests_are_guarded() {
        assert!(is_guarded(&Method::POST, "/api/readings"));
        assert!(is_guarded(&Method::DELETE, "/api/assets/1"));
        assert!(!is_guarded(&Method::GET, "/api/assets/1"));
        assert!(!is_guarded(&Method::POST, "/health"));
    }

    #[test]
    fn key_accepts_either_header_name() {
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_KEY_ALIAS, HeaderValue::from_static("abc"));
        assert_eq!(extract_key(&headers).unwrap().as_deref(), Some("abc"));

        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("primary"));
        assert_eq!(extract_key(&headers).unwrap().as_deref(), Some("primary"));

        assert_eq!(extract_key(&HeaderMap::new()).unwrap(), None);
    }

    #[test]
    fn key_length_is_bounded() {
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static(""));
        assert_eq!(extract_key(&headers).unwrap_err().status, StatusCode::BAD_REQUEST);

        let long = "k".repeat(MAX_KEY_LEN + 1);
        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_str(&long).unwrap());
        assert!(extract_key(&headers).is_err());

        let max = "k".repeat(MAX_KEY_LEN);
        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_str(&max).unwrap());
        assert!(extract_key(&headers).is_ok());
    }

    #[test]
    fn body_hash_is_hex_sha256() {
        assert_eq!(
            body_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn fingerprint_separates_body_and_path() {
        let body = Bytes::from_static(br#"{"new_value":260}"#);
        let a = fingerprint("k1", &Method::POST, "/api/readings", &body);
        let b = fingerprint("k1", &Method::POST, "/api/readings", &body);
        assert_eq!(a, b);

        let other = Bytes::from_static(br#"{"new_value":261}"#);
        assert_ne!(a, fingerprint("k1", &Method::POST, "/api/readings", &other));
        assert_ne!(a, fingerprint("k1", &Method::POST, "/api/reconcile", &body));
    }
}
