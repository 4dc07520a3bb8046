use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;

use crate::audit::{AuditEvent, AuditRecord};
use crate::auth::{MaybeUser, RequireUser};
use crate::server::AppState;
use crate::server::dto::{CreateRepoRequest, RepoResponse};
use crate::server::keys::{ProjectKeys, RepoKeys};
use crate::server::response::{ApiError, ApiResponse};
use crate::server::validation::{validate_branch_name, validate_repo_name};
use crate::store::NewRepository;
use crate::types::{Action, UNIQUE_CLONES_METRIC_KEY};

const DEFAULT_BRANCH: &str = "main";

/// Registers the repository and initializes it on the backend.
pub async fn create_repo(
    caller: RequireUser,
    State(state): State<Arc<AppState>>,
    keys: ProjectKeys,
    Json(req): Json<CreateRepoRequest>,
) -> impl IntoResponse {
    let project = &keys.project;
    let allowed = state.policy.allowed_cached(
        &keys.scope.0,
        Some(&caller.user),
        &project.tenant.id,
        &project.organization,
        Action::Create,
    )?;
    if !allowed {
        return Err(ApiError::denied(true));
    }

    validate_repo_name(&req.name)?;
    let branch = req.default_branch.as_deref().unwrap_or(DEFAULT_BRANCH);
    validate_branch_name(branch)?;

    let doer = caller.doer();
    let record = |outcome: Result<&str, String>| {
        let base = match outcome {
            Ok(repo_key) => {
                AuditRecord::success(AuditEvent::RepositoryCreate, &doer).param("repo_key", repo_key)
            }
            Err(e) => AuditRecord::failure(AuditEvent::RepositoryCreate, &doer, e),
        };
        state.audit.record(
            base.param("project_key", &project.link.project_key)
                .param("name", &req.name),
        );
    };

    let (repo, repo_key) = state
        .directory
        .create_repository(&NewRepository {
            owner: &project.organization,
            name: &req.name,
            default_branch: branch,
            is_private: req.private,
        })
        .inspect_err(|e| record(Err(e.to_string())))?;

    if let Err(e) = state
        .backend
        .create_repository(&repo.relative_path(), branch)
        .await
    {
        record(Err(e.to_string()));
        if let Err(cleanup) = state.directory.delete_repository(repo.id) {
            error!("Failed to roll back repository {}: {}", repo.id, cleanup);
        }
        return Err(e.into());
    }

    record(Ok(&repo_key.repo_key));
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(RepoResponse::new(
            repo,
            repo_key.repo_key,
            0,
        ))),
    ))
}

/// Read path: a denial is indistinguishable from a missing repository.
pub async fn get_repo(
    caller: MaybeUser,
    State(state): State<Arc<AppState>>,
    keys: RepoKeys,
) -> impl IntoResponse {
    let action = if keys.repo.is_private {
        Action::ReadPrivate
    } else {
        Action::Read
    };
    let project = &keys.project;
    let allowed = state
        .policy
        .allowed_cached(
            &keys.scope.0,
            caller.user.as_ref(),
            &project.tenant.id,
            &project.organization,
            action,
        )
        .map_err(ApiError::read_path)?;
    if !allowed {
        return Err(ApiError::not_found("Repository not found"));
    }

    let unique_clones = state
        .counters
        .get_counter(keys.repo.id, UNIQUE_CLONES_METRIC_KEY)?
        .map_or(0, |c| c.metric_value);
    let repo_key = state
        .directory
        .get_repo_key(keys.repo.id)?
        .map(|k| k.repo_key)
        .unwrap_or_default();

    Ok(Json(ApiResponse::success(RepoResponse::new(
        keys.repo,
        repo_key,
        unique_clones,
    ))))
}
