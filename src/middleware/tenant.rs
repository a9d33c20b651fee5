//! Tenant resolution.
//!
//! Every ceremony runs for exactly one tenant. Tenant names are restricted to
//! lowercase ASCII letters and digits, which keeps the separator-free alias
//! hash input (`tenant || alias`) unambiguous.

use axum::{extract::Request, middleware::Next, response::Response};

use crate::error::Error;

pub const TENANT_HEADER: &str = "x-tenant";
pub const MAX_TENANT_LEN: usize = 62;

/// Tenant of the current request, inserted as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant(pub String);

pub fn is_valid_tenant(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_TENANT_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Reject requests without a valid `x-tenant` header.
pub async fn require_tenant(mut request: Request, next: Next) -> Result<Response, Error> {
    let tenant = request
        .headers()
        .get(TENANT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|name| is_valid_tenant(name))
        .map(str::to_string)
        .ok_or_else(|| Error::Unauthorized("A valid tenant is required".to_string()))?;

    request.extensions_mut().insert(Tenant(tenant));
    Ok(next.run(request).await)
}
