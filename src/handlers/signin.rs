use axum::{extract::State, http::HeaderMap, Extension, Json};
use chrono::Utc;

use super::device_context;
use crate::error::Result;
use crate::middleware::tenant::Tenant;
use crate::state::AppState;
use crate::token::types::VerifySignInToken;
use crate::webauthn::types::{
    SignInBeginRequest, SignInBeginResponse, SignInCompleteRequest, SignInVerifyRequest,
    TokenResponse,
};

pub async fn begin(
    State(state): State<AppState>,
    Extension(Tenant(tenant)): Extension<Tenant>,
    Json(req): Json<SignInBeginRequest>,
) -> Result<Json<SignInBeginResponse>> {
    let fido2 = state.fido2(&tenant).await?;
    Ok(Json(fido2.sign_in_begin(&req, Utc::now()).await?))
}

pub async fn complete(
    State(state): State<AppState>,
    Extension(Tenant(tenant)): Extension<Tenant>,
    headers: HeaderMap,
    Json(req): Json<SignInCompleteRequest>,
) -> Result<Json<TokenResponse>> {
    let fido2 = state.fido2(&tenant).await?;
    let device = device_context(&headers);
    Ok(Json(fido2.sign_in_complete(&req, &device, Utc::now()).await?))
}

/// Redeem a verification token. Called by the application backend.
pub async fn verify(
    State(state): State<AppState>,
    Extension(Tenant(tenant)): Extension<Tenant>,
    Json(req): Json<SignInVerifyRequest>,
) -> Result<Json<VerifySignInToken>> {
    let fido2 = state.fido2(&tenant).await?;
    Ok(Json(fido2.sign_in_verify(&req, Utc::now()).await?))
}
