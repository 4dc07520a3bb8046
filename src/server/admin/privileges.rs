use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::auth::RequireAdmin;
use crate::error::ErrorKind;
use crate::policy::{ApplyPrivilegesRequest, PrivilegeQuery};
use crate::server::AppState;
use crate::server::keys::RequestScope;
use crate::server::response::ApiError;

/// Applies a batch of grants and revokes. The body is the bare
/// apply-privileges response; per-entry failures live in its `errors`.
pub async fn apply_privileges(
    admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    RequestScope(cache): RequestScope,
    Json(req): Json<ApplyPrivilegesRequest>,
) -> impl IntoResponse {
    let response = state
        .privileges
        .apply(&cache, &admin.doer(), &req.apply_privilege_groups)
        .map_err(|e| match e.kind() {
            ErrorKind::Validation => ApiError::bad_request(e.to_string()),
            _ => ApiError::internal("Failed to apply privileges"),
        })?;

    Ok::<_, ApiError>((StatusCode::CREATED, Json(response)))
}

pub async fn get_privileges(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    RequestScope(cache): RequestScope,
    Json(queries): Json<Vec<PrivilegeQuery>>,
) -> impl IntoResponse {
    let response = state.privileges.get_privileges(&cache, &queries)?;
    Ok::<_, ApiError>(Json(response))
}
