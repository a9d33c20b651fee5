//! # HTTP Request Handlers
//!
//! Thin endpoint layer over the ceremony engine. Handlers resolve the
//! tenant-scoped [`crate::webauthn::Fido2Service`], pass the JSON body through
//! unchanged and let [`crate::error::Error`] pick the status code.
//!
//! ## Submodules
//! - `health`: Health check endpoint (for monitoring)
//! - `register`: Register token, begin and complete
//! - `signin`: Sign-in begin, complete and verify
//! - `alias`: Alias management
//!
//! ## Routes
//! All routes except `/health` require the `x-tenant` header.
//!
//! `/register/token`, `/signin/verify` and `/alias` are called by the
//! tenant's application backend. They also require the tenant's API secret
//! (see [`crate::middleware::api_secret`]) and are not mounted at all when no
//! `API_SECRET` is configured. Everything else is called by the browser.

pub mod alias;
pub mod health;
pub mod register;
pub mod signin;

use axum::{
    http::{header, HeaderMap},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};

use crate::middleware::api_secret::require_api_secret;
use crate::middleware::tenant::require_tenant;
use crate::state::AppState;
use crate::webauthn::types::DeviceContext;

/// Edge header carrying the client's ISO country code.
pub const COUNTRY_HEADER: &str = "cf-ipcountry";
const MAX_DEVICE_LEN: usize = 256;

/// Build the API router.
pub fn router(state: AppState) -> Router {
    let mut tenant_routes: Router<AppState> = Router::new()
        .route("/register/begin", post(register::begin))
        .route("/register/complete", post(register::complete))
        .route("/signin/begin", post(signin::begin))
        .route("/signin/complete", post(signin::complete));

    match state.api_secrets.clone() {
        Some(secrets) => {
            let backend_routes: Router<AppState> = Router::new()
                .route("/register/token", post(register::create_token))
                .route("/signin/verify", post(signin::verify))
                .route("/alias", post(alias::set_aliases))
                .layer(axum_middleware::from_fn_with_state(
                    secrets,
                    require_api_secret,
                ));
            tenant_routes = tenant_routes.merge(backend_routes);
        }
        None => tracing::warn!("API_SECRET is not set, backend routes are disabled"),
    }

    // Outermost, so the secret check sees the resolved tenant.
    let tenant_routes = tenant_routes.layer(axum_middleware::from_fn(require_tenant));

    Router::new()
        .route("/health", get(health::health_check))
        .merge(tenant_routes)
        .with_state(state)
}

/// Device description and country of the calling client.
pub(crate) fn device_context(headers: &HeaderMap) -> DeviceContext {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    };

    let mut device = header_value(header::USER_AGENT.as_str());
    if device.is_empty() {
        device = "Unknown".to_string();
    }
    if let Some((cut, _)) = device.char_indices().nth(MAX_DEVICE_LEN) {
        device.truncate(cut);
    }

    DeviceContext {
        device,
        country: header_value(COUNTRY_HEADER).to_ascii_uppercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{HeaderValue, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::db::memory::MemoryStorageProvider;
    use crate::events::TracingEventLogger;
    use crate::features::{Features, StaticFeatures};
    use crate::middleware::api_secret::ApiSecrets;
    use crate::middleware::tenant::TENANT_HEADER;
    use crate::token::keys::TokenSecrets;

    fn state(api_secrets: Option<ApiSecrets>) -> AppState {
        AppState {
            storage: Arc::new(MemoryStorageProvider::new()),
            secrets: TokenSecrets::new(b"test-salt".to_vec()).unwrap(),
            features: Arc::new(StaticFeatures(Features::default())),
            events: Arc::new(TracingEventLogger),
            legacy_alias_salt: None,
            server_name: "Acme".into(),
            api_secrets,
        }
    }

    fn api_secrets() -> ApiSecrets {
        ApiSecrets::new("backend-master-secret").unwrap()
    }

    fn json_post(path: &str, tenant: &str, secret: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::post(path)
            .header(header::CONTENT_TYPE, "application/json")
            .header(TENANT_HEADER, tenant);
        if let Some(secret) = secret {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {secret}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn token_request() -> Value {
        json!({ "userId": "user1", "username": "alice@example.com" })
    }

    #[tokio::test]
    async fn test_register_token_requires_the_tenant_secret() {
        let secrets = api_secrets();
        let app = router(state(Some(secrets.clone())));

        let response = app
            .clone()
            .oneshot(json_post("/register/token", "acme", None, token_request()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Another tenant's secret does not open this one.
        let globex = secrets.tenant_secret("globex").unwrap();
        let response = app
            .clone()
            .oneshot(json_post("/register/token", "acme", Some(&globex), token_request()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let acme = secrets.tenant_secret("acme").unwrap();
        let response = app
            .oneshot(json_post("/register/token", "acme", Some(&acme), token_request()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert!(body["token"].as_str().unwrap().starts_with("register_"));
    }

    #[tokio::test]
    async fn test_verify_and_alias_require_the_tenant_secret() {
        let app = router(state(Some(api_secrets())));

        let verify = json_post(
            "/signin/verify",
            "acme",
            Some("bm9wZQ"),
            json!({ "token": "verify_x" }),
        );
        let response = app.clone().oneshot(verify).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let alias = json_post(
            "/alias",
            "acme",
            None,
            json!({ "userId": "user1", "aliases": ["mallory@example.com"] }),
        );
        let response = app.oneshot(alias).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_backend_routes_are_absent_without_api_secret() {
        let app = router(state(None));

        let response = app
            .oneshot(json_post("/register/token", "acme", None, token_request()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_browser_routes_need_no_secret() {
        let app = router(state(Some(api_secrets())));

        // Reaches the handler, which rejects the bogus register token.
        let begin = json_post(
            "/register/begin",
            "acme",
            None,
            json!({ "token": "register_x", "origin": "https://example.com", "rpId": "example.com" }),
        );
        let response = app.oneshot(begin).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_device_context_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("Mozilla/5.0"));
        headers.insert(COUNTRY_HEADER, HeaderValue::from_static("se"));
        let context = device_context(&headers);
        assert_eq!(context.device, "Mozilla/5.0");
        assert_eq!(context.country, "SE");

        let empty = device_context(&HeaderMap::new());
        assert_eq!(empty.device, "Unknown");
        assert_eq!(empty.country, "");
    }
}
