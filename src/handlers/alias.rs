use axum::{extract::State, http::StatusCode, Extension, Json};

use crate::error::Result;
use crate::middleware::tenant::Tenant;
use crate::state::AppState;
use crate::webauthn::types::SetAliasRequest;

/// ## Route
/// POST /alias
///
/// Replaces the user's aliases; responds `204 No Content`.
pub async fn set_aliases(
    State(state): State<AppState>,
    Extension(Tenant(tenant)): Extension<Tenant>,
    Json(req): Json<SetAliasRequest>,
) -> Result<StatusCode> {
    let fido2 = state.fido2(&tenant).await?;
    fido2.set_aliases(&req).await?;
    Ok(StatusCode::NO_CONTENT)
}
