//! Backend authentication.
//!
//! Minting register tokens, redeeming verification tokens and replacing
//! aliases are calls from a tenant's application backend, never from a
//! browser. Each one carries the tenant's API secret as a bearer token:
//!
//! ```text
//! Authorization: Bearer <base64url(HMAC-SHA256(API_SECRET, tenant))>
//! ```
//!
//! Tenant secrets are derived from the server-wide `API_SECRET`, so a secret
//! only opens the tenant it was issued for. An operator computes one with
//! ```text
//! printf %s acme | openssl dgst -sha256 -hmac "$API_SECRET" -binary | basenc --base64url | tr -d =
//! ```

use std::fmt;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::tenant::Tenant;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const BEARER: &str = "Bearer ";

/// Server-wide secret the per-tenant API secrets are derived from.
#[derive(Clone)]
pub struct ApiSecrets {
    master: Arc<Vec<u8>>,
}

impl ApiSecrets {
    /// ## Errors
    /// - `Configuration`: `master` is empty
    pub fn new(master: &str) -> Result<Self> {
        if master.is_empty() {
            return Err(Error::Configuration("API secret must not be empty".into()));
        }
        Ok(Self {
            master: Arc::new(master.as_bytes().to_vec()),
        })
    }

    /// The secret `tenant`'s backend presents.
    pub fn tenant_secret(&self, tenant: &str) -> Result<String> {
        let tag = self.mac(tenant)?.finalize().into_bytes();
        Ok(URL_SAFE_NO_PAD.encode(tag))
    }

    /// Check the bearer secret in `headers` against `tenant`'s secret.
    ///
    /// The comparison runs in constant time over the decoded tag.
    ///
    /// ## Errors
    /// - `Unauthorized`: no bearer secret, or not the one for `tenant`
    pub fn authorize(&self, tenant: &str, headers: &HeaderMap) -> Result<()> {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix(BEARER))
            .map(str::trim)
            .filter(|secret| !secret.is_empty())
            .ok_or_else(|| Error::Unauthorized("An API secret is required".to_string()))?;

        let wrong = || Error::Unauthorized("Invalid API secret".to_string());
        let tag = URL_SAFE_NO_PAD.decode(presented).map_err(|_| wrong())?;
        self.mac(tenant)?.verify_slice(&tag).map_err(|_| wrong())
    }

    fn mac(&self, tenant: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.master)
            .map_err(|_| Error::Internal("invalid API secret key".into()))?;
        mac.update(tenant.as_bytes());
        Ok(mac)
    }
}

impl fmt::Debug for ApiSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSecrets").finish_non_exhaustive()
    }
}

/// Reject backend calls without the tenant's API secret.
///
/// Runs inside [`super::tenant::require_tenant`], which supplies the tenant.
pub async fn require_api_secret(
    State(secrets): State<ApiSecrets>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, Error> {
    let tenant = request
        .extensions()
        .get::<Tenant>()
        .map(|Tenant(name)| name.clone())
        .ok_or_else(|| Error::Unauthorized("A valid tenant is required".to_string()))?;

    if let Err(err) = secrets.authorize(&tenant, request.headers()) {
        tracing::warn!(tenant = %tenant, path = %request.uri().path(), "Backend call rejected");
        return Err(err);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn secrets() -> ApiSecrets {
        ApiSecrets::new("backend-master-secret").unwrap()
    }

    fn bearer(secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {secret}")).unwrap(),
        );
        headers
    }

    #[test]
    fn test_tenant_secret_opens_its_tenant_only() {
        let secrets = secrets();
        let acme = secrets.tenant_secret("acme").unwrap();

        assert!(secrets.authorize("acme", &bearer(&acme)).is_ok());
        assert!(matches!(
            secrets.authorize("globex", &bearer(&acme)),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_missing_or_malformed_secret() {
        let secrets = secrets();
        let acme = secrets.tenant_secret("acme").unwrap();

        assert!(matches!(
            secrets.authorize("acme", &HeaderMap::new()),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            secrets.authorize("acme", &bearer("%%%")),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            secrets.authorize("acme", &bearer(&acme[..acme.len() - 2])),
            Err(Error::Unauthorized(_))
        ));

        let mut basic = HeaderMap::new();
        basic.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {acme}")).unwrap(),
        );
        assert!(secrets.authorize("acme", &basic).is_err());
    }

    #[test]
    fn test_empty_master_is_a_configuration_error() {
        assert!(matches!(ApiSecrets::new(""), Err(Error::Configuration(_))));
        assert!(!format!("{:?}", secrets()).contains("backend-master-secret"));
    }
}
