use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::audit::{AuditEvent, AuditRecord};
use crate::auth::RequireUser;
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::{AddKeyRequest, KeyResponse};
use crate::server::response::{ApiError, ApiResponse};
use crate::ssh::AuthorizedKey;

const MAX_TITLE_LEN: usize = 255;

pub async fn add_key(
    caller: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddKeyRequest>,
) -> impl IntoResponse {
    let title = req.title.trim();
    if title.is_empty() || title.len() > MAX_TITLE_LEN {
        return Err(ApiError::bad_request("Key title is required"));
    }

    let doer = caller.doer();
    let added = AuthorizedKey::parse(&req.key).and_then(|key| {
        let content = key.content();
        if state.directory.get_public_key_by_content(&content)?.is_some() {
            return Err(Error::AlreadyExists("SSH key".into()));
        }
        state
            .directory
            .add_public_key(caller.user.id, title, &content, &key.fingerprint())
    });

    let key = match added {
        Ok(key) => key,
        Err(e) => {
            state.audit.record(
                AuditRecord::failure(AuditEvent::SshKeyAdd, &doer, e.to_string())
                    .param("title", title),
            );
            return Err(e.into());
        }
    };
    state.audit.record(
        AuditRecord::success(AuditEvent::SshKeyAdd, &doer)
            .param("key_id", key.id.to_string())
            .param("fingerprint", &key.fingerprint),
    );

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(KeyResponse {
            id: key.id,
            title: key.name,
            fingerprint: key.fingerprint,
            created_at: key.created_at,
        })),
    ))
}
