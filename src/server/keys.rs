//! Resolution of `tenant_key`, `project_key` and `repo_key` query fields
//! before a handler runs.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRequestParts, Query},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use serde_json::json;

use super::AppState;
use super::response::ApiError;
use crate::cache::{RequestCache, ResolvedProject};
use crate::types::Repository;

/// Request-scoped cache shared by every extractor and the handler of one
/// request.
#[derive(Clone)]
pub struct RequestScope(pub Arc<RequestCache>);

impl RequestScope {
    fn of(parts: &mut Parts, state: &Arc<AppState>) -> Self {
        if let Some(scope) = parts.extensions.get::<RequestScope>() {
            return scope.clone();
        }
        let scope = RequestScope(Arc::new(state.request_cache()));
        parts.extensions.insert(scope.clone());
        scope
    }
}

impl FromRequestParts<Arc<AppState>> for RequestScope {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self::of(parts, state))
    }
}

#[derive(Debug)]
pub enum KeysRejection {
    Missing(Vec<String>),
    Failed(ApiError),
}

impl IntoResponse for KeysRejection {
    fn into_response(self) -> Response {
        match self {
            KeysRejection::Missing(messages) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "data": null,
                    "error": "Missing required fields",
                    "messages": messages,
                })),
            )
                .into_response(),
            KeysRejection::Failed(err) => err.into_response(),
        }
    }
}

fn required<'a>(
    query: &'a HashMap<String, String>,
    names: &[&str],
) -> Result<Vec<&'a str>, KeysRejection> {
    let mut values = Vec::with_capacity(names.len());
    let mut missing = Vec::new();
    for name in names {
        match query.get(*name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
            Some(value) => values.push(value),
            None => missing.push(format!("{name} is required")),
        }
    }
    if missing.is_empty() {
        Ok(values)
    } else {
        Err(KeysRejection::Missing(missing))
    }
}

async fn query_of(parts: &mut Parts, state: &Arc<AppState>) -> HashMap<String, String> {
    Query::<HashMap<String, String>>::from_request_parts(parts, state)
        .await
        .map(|Query(q)| q)
        .unwrap_or_default()
}

/// A project named by `tenant_key` and `project_key`.
pub struct ProjectKeys {
    pub scope: RequestScope,
    pub project: ResolvedProject,
}

impl FromRequestParts<Arc<AppState>> for ProjectKeys {
    type Rejection = KeysRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let query = query_of(parts, state).await;
        let keys = required(&query, &["tenant_key", "project_key"])?;
        let scope = RequestScope::of(parts, state);

        let project = scope
            .0
            .project(keys[0], keys[1])
            .map_err(|e| KeysRejection::Failed(ApiError::read_path(e)))?;
        Ok(ProjectKeys { scope, project })
    }
}

/// A repository named by `repo_key`, checked to belong to the project.
pub struct RepoKeys {
    pub scope: RequestScope,
    pub project: ResolvedProject,
    pub repo: Repository,
}

impl FromRequestParts<Arc<AppState>> for RepoKeys {
    type Rejection = KeysRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let query = query_of(parts, state).await;
        let keys = required(&query, &["tenant_key", "project_key", "repo_key"])?;
        let scope = RequestScope::of(parts, state);

        let project = scope
            .0
            .project(keys[0], keys[1])
            .map_err(|e| KeysRejection::Failed(ApiError::read_path(e)))?;
        let repo = state
            .directory
            .get_repository_by_key(keys[2])
            .map_err(|e| KeysRejection::Failed(e.into()))?
            .filter(|r| r.owner_id == project.organization.id)
            .ok_or_else(|| KeysRejection::Failed(ApiError::not_found("Repository not found")))?;

        Ok(RepoKeys {
            scope,
            project,
            repo,
        })
    }
}
