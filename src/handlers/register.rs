use axum::{extract::State, http::HeaderMap, Extension, Json};
use chrono::Utc;

use super::device_context;
use crate::error::Result;
use crate::middleware::tenant::Tenant;
use crate::state::AppState;
use crate::webauthn::types::{
    RegisterBeginRequest, RegisterBeginResponse, RegisterCompleteRequest, RegisterTokenRequest,
    TokenResponse,
};

pub async fn create_token(
    State(state): State<AppState>,
    Extension(Tenant(tenant)): Extension<Tenant>,
    Json(req): Json<RegisterTokenRequest>,
) -> Result<Json<TokenResponse>> {
    let fido2 = state.fido2(&tenant).await?;
    Ok(Json(fido2.create_register_token(req, Utc::now()).await?))
}

pub async fn begin(
    State(state): State<AppState>,
    Extension(Tenant(tenant)): Extension<Tenant>,
    Json(req): Json<RegisterBeginRequest>,
) -> Result<Json<RegisterBeginResponse>> {
    let fido2 = state.fido2(&tenant).await?;
    let response = fido2
        .register_begin(&req, &state.server_name, Utc::now())
        .await?;
    Ok(Json(response))
}

pub async fn complete(
    State(state): State<AppState>,
    Extension(Tenant(tenant)): Extension<Tenant>,
    headers: HeaderMap,
    Json(req): Json<RegisterCompleteRequest>,
) -> Result<Json<TokenResponse>> {
    let fido2 = state.fido2(&tenant).await?;
    let device = device_context(&headers);
    Ok(Json(fido2.register_complete(&req, &device, Utc::now()).await?))
}
