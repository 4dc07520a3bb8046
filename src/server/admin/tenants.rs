use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::audit::{AuditEvent, AuditRecord};
use crate::auth::RequireAdmin;
use crate::server::AppState;
use crate::server::dto::{CreateTenantRequest, TenantResponse, UpdateTenantRequest};
use crate::server::response::{ApiError, ApiResponse};

pub async fn create_tenant(
    admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTenantRequest>,
) -> impl IntoResponse {
    let doer = admin.doer();
    let tenant = state
        .tenancy
        .create_tenant(&req.name, &req.org_key)
        .inspect_err(|e| {
            state.audit.record(
                AuditRecord::failure(AuditEvent::TenantCreate, &doer, e.to_string())
                    .param("name", &req.name)
                    .param("org_key", &req.org_key),
            );
        })?;

    state.audit.record(
        AuditRecord::success(AuditEvent::TenantCreate, &doer)
            .param("tenant_id", &tenant.id)
            .param("name", &tenant.name),
    );

    Ok::<_, ApiError>((
        StatusCode::CREATED,
        Json(ApiResponse::success(TenantResponse::from(tenant))),
    ))
}

pub async fn list_tenants(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let tenants: Vec<TenantResponse> = state
        .tenancy
        .list_tenants()?
        .into_iter()
        .map(TenantResponse::from)
        .collect();

    Ok::<_, ApiError>(Json(ApiResponse::success(tenants)))
}

pub async fn get_tenant(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let tenant = state.tenancy.get_tenant_by_id(&id)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(TenantResponse::from(tenant))))
}

/// Renames and/or (de)activates a tenant. A rename records `TenantEdit`;
/// an activity flip records `TenantActivate` or `TenantDeactivate`.
pub async fn update_tenant(
    admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTenantRequest>,
) -> impl IntoResponse {
    if req.name.is_none() && req.is_active.is_none() {
        return Err(ApiError::bad_request("Nothing to update"));
    }

    let doer = admin.doer();
    let before = state.tenancy.get_tenant_by_id(&id)?;
    let mut events = Vec::new();
    if req.name.as_deref().is_some_and(|n| n != before.name) {
        events.push(AuditEvent::TenantEdit);
    }
    match req.is_active {
        Some(true) if !before.is_active => events.push(AuditEvent::TenantActivate),
        Some(false) if before.is_active => events.push(AuditEvent::TenantDeactivate),
        _ => {}
    }

    let updated = state
        .tenancy
        .update_tenant(&id, req.name.as_deref(), req.is_active);
    let tenant = match updated {
        Ok(tenant) => tenant,
        Err(e) => {
            for event in &events {
                state.audit.record(
                    AuditRecord::failure(*event, &doer, e.to_string()).param("tenant_id", &id),
                );
            }
            return Err(e.into());
        }
    };

    for event in events {
        state.audit.record(
            AuditRecord::success(event, &doer)
                .param("tenant_id", &tenant.id)
                .param("name", &tenant.name),
        );
    }

    Ok(Json(ApiResponse::success(TenantResponse::from(tenant))))
}

pub async fn delete_tenant(
    admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let doer = admin.doer();
    let tenant = state.tenancy.delete_tenant(&id).inspect_err(|e| {
        state.audit.record(
            AuditRecord::failure(AuditEvent::TenantDelete, &doer, e.to_string())
                .param("tenant_id", &id),
        );
    })?;

    state.audit.record(
        AuditRecord::success(AuditEvent::TenantDelete, &doer)
            .param("tenant_id", &tenant.id)
            .param("name", &tenant.name),
    );

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}
