//! # Health Check Handler
//!
//! Liveness check for load balancers. Needs no tenant and touches no storage.

use axum::Json;
use serde_json::{json, Value};

/// `GET /health`
///
/// ```json
/// { "status": "healthy", "service": "passkey-server", "version": "0.1.0" }
/// ```
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "passkey-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
