use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::{error, info};

use crate::audit::{AuditEvent, AuditRecord, Doer};
use crate::auth::{MaybeUser, RequireUser};
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::{
    AddTeamRequest, CreateProjectRequest, ProjectResponse, TeamResponse, UpdateProjectRequest,
};
use crate::server::keys::ProjectKeys;
use crate::server::response::{ApiError, ApiResponse};
use crate::server::validation::{validate_project_name, validate_team_name, validate_visibility};
use crate::types::{Action, Role, User, Visibility};

const OWNER_TEAM: &str = "Owners";

/// Write-path check: a denial is 403 for the signed-in caller.
fn require(
    state: &AppState,
    keys: &ProjectKeys,
    user: &User,
    action: Action,
) -> Result<(), ApiError> {
    let project = &keys.project;
    let allowed = state.policy.allowed_cached(
        &keys.scope.0,
        Some(user),
        &project.tenant.id,
        &project.organization,
        action,
    )?;
    if allowed {
        Ok(())
    } else {
        Err(ApiError::denied(true))
    }
}

fn audit_project(
    state: &AppState,
    event: AuditEvent,
    doer: &Doer,
    keys: &ProjectKeys,
    outcome: Result<(), &Error>,
) {
    let base = match outcome {
        Ok(()) => AuditRecord::success(event, doer),
        Err(e) => AuditRecord::failure(event, doer, e.to_string()),
    };
    state.audit.record(
        base.param("tenant_key", &keys.project.link.org_key)
            .param("project_key", &keys.project.link.project_key),
    );
}

/// Creates an organization inside a tenant and makes the caller its owner.
pub async fn create_project(
    caller: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProjectRequest>,
) -> impl IntoResponse {
    validate_project_name(&req.name)?;
    let project_key = req
        .project_key
        .clone()
        .unwrap_or_else(|| req.name.to_lowercase());
    validate_project_name(&project_key)?;

    let role_mode = state.policy.role_mode_enabled();
    let visibility = match req.visibility.as_deref() {
        Some(v) => validate_visibility(v, role_mode)?,
        None => match state.settings.source_control.default_org_visibility {
            Visibility::Public if role_mode => Visibility::Limited,
            v => v,
        },
    };

    if !caller.user.allow_create_org {
        return Err(ApiError::forbidden("Project creation is not allowed"));
    }

    let tenant = match req.tenant_key.as_deref() {
        Some(key) => state
            .tenancy
            .get_tenant_by_org_key(key)?
            .ok_or_else(|| ApiError::not_found("Tenant not found"))?,
        None => state.tenancy.get_default_tenant()?,
    };
    if !tenant.is_active {
        return Err(Error::TenantNotActive(tenant.name).into());
    }

    let doer = caller.doer();
    let failed = |e: &Error| {
        state.audit.record(
            AuditRecord::failure(AuditEvent::ProjectCreate, &doer, e.to_string())
                .param("tenant_key", &tenant.org_key)
                .param("project_key", &project_key),
        );
    };

    let org = state
        .directory
        .create_organization(&req.name, visibility)
        .inspect_err(failed)?;

    let link = match state.tenancy.link_organization(&tenant, org.id, &project_key) {
        Ok(link) => link,
        Err(e) => {
            failed(&e);
            if let Err(cleanup) = state.directory.delete_organization(org.id) {
                error!("Failed to roll back organization {}: {}", org.id, cleanup);
            }
            return Err(e.into());
        }
    };

    let team = state
        .directory
        .create_team(org.id, OWNER_TEAM, true)
        .inspect_err(failed)?;
    state
        .directory
        .add_team_member(team.id, caller.user.id)
        .inspect_err(failed)?;
    state
        .policy
        .grant(caller.user.id, &tenant.id, org.id, Role::Owner)
        .inspect_err(failed)?;
    if visibility == Visibility::Limited {
        state.policy.add_inner_source(org.id).inspect_err(failed)?;
    }

    state.audit.record(
        AuditRecord::success(AuditEvent::ProjectCreate, &doer)
            .param("tenant_key", &link.org_key)
            .param("project_key", &link.project_key),
    );
    info!(
        "Created project {}/{} for {}",
        link.org_key, link.project_key, caller.user.name
    );

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(ProjectResponse::new(&org, &link))),
    ))
}

pub async fn get_project(
    caller: MaybeUser,
    State(state): State<Arc<AppState>>,
    keys: ProjectKeys,
) -> impl IntoResponse {
    let project = &keys.project;
    let allowed = state
        .policy
        .allowed_cached(
            &keys.scope.0,
            caller.user.as_ref(),
            &project.tenant.id,
            &project.organization,
            Action::Read,
        )
        .map_err(ApiError::read_path)?;
    if !allowed {
        return Err(ApiError::not_found("Not found"));
    }

    Ok(Json(ApiResponse::success(ProjectResponse::new(
        &project.organization,
        &project.link,
    ))))
}

pub async fn update_project(
    caller: RequireUser,
    State(state): State<Arc<AppState>>,
    keys: ProjectKeys,
    Json(req): Json<UpdateProjectRequest>,
) -> impl IntoResponse {
    require(&state, &keys, &caller.user, Action::EditProject)?;

    let mut org = keys.project.organization.clone();
    if let Some(name) = &req.name {
        validate_project_name(name)?;
        org.name = name.clone();
    }
    let previous = org.visibility;
    if let Some(v) = &req.visibility {
        org.visibility = validate_visibility(v, state.policy.role_mode_enabled())?;
    }

    let doer = caller.doer();
    let updated = state.directory.update_organization(&org).and_then(|()| {
        match (previous, org.visibility) {
            (p, Visibility::Limited) if p != Visibility::Limited => {
                state.policy.add_inner_source(org.id)
            }
            (Visibility::Limited, n) if n != Visibility::Limited => {
                state.policy.store().remove_inner_source(org.id)
            }
            _ => Ok(()),
        }
    });
    audit_project(
        &state,
        AuditEvent::ProjectSettingsChange,
        &doer,
        &keys,
        updated.as_ref().map(|_| ()),
    );
    updated?;

    Ok::<_, ApiError>(Json(ApiResponse::success(ProjectResponse::new(
        &org,
        &keys.project.link,
    ))))
}

/// Deletes the organization, its link, teams, bindings and repositories,
/// and forgets their usage.
pub async fn delete_project(
    caller: RequireUser,
    State(state): State<Arc<AppState>>,
    keys: ProjectKeys,
) -> impl IntoResponse {
    require(&state, &keys, &caller.user, Action::Own)?;

    let org_id = keys.project.organization.id;
    let deleted = state
        .directory
        .list_repositories(org_id)
        .and_then(|repos| {
            for repo in repos {
                state.ledger.delete_by_repo(repo.id)?;
            }
            state.directory.delete_organization(org_id)
        })
        .map(|_| ());
    audit_project(
        &state,
        AuditEvent::ProjectDelete,
        &caller.doer(),
        &keys,
        deleted.as_ref().map(|_| ()),
    );
    deleted?;

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

/// Creates a team in the project. Members without any role in the project
/// are bound as readers.
pub async fn add_team(
    caller: RequireUser,
    State(state): State<Arc<AppState>>,
    keys: ProjectKeys,
    Json(req): Json<AddTeamRequest>,
) -> impl IntoResponse {
    require(&state, &keys, &caller.user, Action::EditProject)?;
    validate_team_name(&req.name)?;

    let cache = &keys.scope.0;
    let mut members = Vec::with_capacity(req.user_keys.len());
    for key in &req.user_keys {
        members.push(cache.user(key)?);
    }

    let project = &keys.project;
    let org_id = project.organization.id;
    let created = (|| {
        let team = state.directory.create_team(org_id, &req.name, false)?;
        for member in &members {
            state.directory.add_team_member(team.id, member.id)?;
            if cache.roles_for(member.id, &project.tenant.id, org_id)?.is_empty() {
                state
                    .policy
                    .grant(member.id, &project.tenant.id, org_id, Role::Reader)?;
            }
        }
        Ok::<_, Error>(team)
    })();

    let doer = caller.doer();
    let base = match &created {
        Ok(_) => AuditRecord::success(AuditEvent::TeamAddToProject, &doer),
        Err(e) => AuditRecord::failure(AuditEvent::TeamAddToProject, &doer, e.to_string()),
    };
    state.audit.record(
        base.param("tenant_key", &project.link.org_key)
            .param("project_key", &project.link.project_key)
            .param("team", &req.name),
    );
    let team = created?;

    Ok::<_, ApiError>((
        StatusCode::CREATED,
        Json(ApiResponse::success(TeamResponse {
            id: team.id,
            name: team.name,
            members: members.into_iter().map(|u| u.external_id).collect(),
        })),
    ))
}
