use bytes::Bytes;
use hyper::Response;
use hyper::StatusCode;
use prometheus::{Encoder, TextEncoder};
use serde_json::json;

use crate::error::{FirewallError, Result};
use crate::firewall::response::{full, RespBody};

pub fn handle_metrics(registry: &prometheus::Registry) -> Result<Response<RespBody>> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| FirewallError::Http(format!("Failed to encode metrics: {e}")))?;

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", encoder.format_type())
        .body(full(Bytes::from(buffer)))
        .map_err(|e| FirewallError::Http(format!("Failed to build response: {e}")))
}

/// Health check response - always returns 200 if process is running
pub fn health_check_response() -> Result<Response<RespBody>> {
    let body = serde_json::to_vec(&json!({"status": "healthy"})).map_err(|e| {
        FirewallError::Http(format!("Failed to serialize health response: {e}"))
    })?;

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .body(full(body))
        .map_err(|e| FirewallError::Http(format!("Failed to build health response: {e}")))
}
