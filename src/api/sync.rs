//! Bulk replay of requests queued by offline clients.
//!
//! Each item is dispatched in order through the same router that serves
//! direct calls, idempotency guard included. Items that carry no key get a
//! generated one, so a retried item never runs twice within one batch.

use axum::{
    Json, Router,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::{HeaderName, HeaderValue, Method, Request, header},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tower::ServiceExt;

use super::error::ApiError;
use super::idempotency::{IDEMPOTENCY_KEY_ALIAS, IDEMPOTENCY_KEY_HEADER};

/// The router bulk items are dispatched through.
#[derive(Clone)]
pub struct SyncState {
    pub inner: Router,
}

#[derive(Debug, Deserialize)]
pub struct SyncItem {
    #[serde(default)]
    pub method: Option<String>,
    pub url: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkPayload {
    pub requests: Vec<SyncItem>,
}

#[derive(Debug, Serialize)]
pub struct SyncResult {
    pub ok: bool,
    pub status: u16,
    pub url: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkResponse {
    pub success: usize,
    pub total: usize,
    pub results: Vec<SyncResult>,
}

/// `bulk-` followed by 16 random hex characters.
pub fn generated_key() -> String {
    let id = uuid::Uuid::new_v4();
    format!("bulk-{}", hex::encode(&id.as_bytes()[..8]))
}

pub async fn bulk_sync(
    State(state): State<SyncState>,
    payload: Result<Json<BulkPayload>, JsonRejection>,
) -> Result<Json<BulkResponse>, ApiError> {
    let Json(payload) = payload?;
    let total = payload.requests.len();
    let mut results = Vec::with_capacity(total);

    for item in payload.requests {
        let result = dispatch(&state.inner, item).await;
        results.push(result);
    }

    let success = results.iter().filter(|r| r.ok).count();
    tracing::info!(total, success, "bulk sync processed");
    Ok(Json(BulkResponse {
        success,
        total,
        results,
    }))
}

async fn dispatch(router: &Router, item: SyncItem) -> SyncResult {
    let method_name = item
        .method
        .as_deref()
        .unwrap_or("POST")
        .to_ascii_uppercase();
    let failed = |status: u16, error: String| SyncResult {
        ok: false,
        status,
        url: item.url.clone(),
        method: method_name.clone(),
        body: None,
        error: Some(error),
    };

    if !item.url.starts_with('/') {
        return failed(400, "url must start with /".into());
    }
    let Ok(method) = Method::from_bytes(method_name.as_bytes()) else {
        return failed(400, format!("unsupported method {method_name}"));
    };

    let request = match build_request(method, &item) {
        Ok(request) => request,
        Err(e) => return failed(400, e),
    };

    let response = match router.clone().oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    let status = response.status();
    let bytes = match axum::body::to_bytes(response.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => return failed(500, format!("failed to read response: {e}")),
    };
    let body = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned()));

    SyncResult {
        ok: status.as_u16() < 400,
        status: status.as_u16(),
        url: item.url,
        method: method_name,
        body: Some(body),
        error: None,
    }
}

fn build_request(method: Method, item: &SyncItem) -> Result<Request<Body>, String> {
    let mut builder = Request::builder().method(method).uri(item.url.as_str());

    let mut has_key = false;
    for (name, value) in &item.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| e.to_string())?;
        let value = HeaderValue::from_str(value).map_err(|e| e.to_string())?;
        has_key |= name == IDEMPOTENCY_KEY_HEADER || name == IDEMPOTENCY_KEY_ALIAS;
        builder = builder.header(name, value);
    }
    if !has_key {
        builder = builder.header(IDEMPOTENCY_KEY_HEADER, generated_key());
    }

    let body = match &item.data {
        Some(data) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(data).map_err(|e| e.to_string())?)
        }
        None => Body::empty(),
    };
    builder.body(body).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_bulk_prefix() {
        let key = generated_key();
        assert!(key.starts_with("bulk-"));
        assert_eq!(key.len(), "bulk-".len() + 16);
        assert_ne!(key, generated_key());
    }
}
