use std::sync::Arc;

use axum::middleware;
use axum::{Router, routing::get};

use super::admin::admin_router;
use super::trace::trace_request;
use super::user::user_router;
use crate::audit::AuditSink;
use crate::auth::{CredentialHasher, PasswordPolicy};
use crate::cache::RequestCache;
use crate::config::Settings;
use crate::error::Result;
use crate::keycloak::KeycloakClient;
use crate::policy::{PolicyEngine, PrivilegeService};
use crate::ssh::RepoBackend;
use crate::store::{CounterStore, DirectoryStore, PolicyStore, SqliteStore, TenantStore};
use crate::tenancy::TenancyService;
use crate::usage::UsageLedger;

pub struct AppState {
    pub settings: Settings,
    pub tenants: Arc<dyn TenantStore>,
    pub directory: Arc<dyn DirectoryStore>,
    pub policy_store: Arc<dyn PolicyStore>,
    pub counters: Arc<dyn CounterStore>,
    pub ledger: UsageLedger,
    pub tenancy: Arc<TenancyService>,
    pub policy: Arc<PolicyEngine>,
    pub privileges: PrivilegeService,
    pub audit: Arc<dyn AuditSink>,
    /// Present when `[keycloak] enabled`; sign-up and sign-in go through it.
    pub keycloak: Option<KeycloakClient>,
    pub hasher: CredentialHasher,
    pub password_policy: PasswordPolicy,
    pub backend: Arc<dyn RepoBackend>,
}

impl AppState {
    pub fn new(
        store: Arc<SqliteStore>,
        settings: Settings,
        audit: Arc<dyn AuditSink>,
        backend: Arc<dyn RepoBackend>,
    ) -> Result<Self> {
        let tenants: Arc<dyn TenantStore> = store.clone();
        let directory: Arc<dyn DirectoryStore> = store.clone();
        let policy_store: Arc<dyn PolicyStore> = store.clone();
        let counters: Arc<dyn CounterStore> = store.clone();

        let source_control = &settings.source_control;
        let tenancy = Arc::new(TenancyService::new(
            tenants.clone(),
            source_control.multi_tenant_enabled,
        ));
        let policy = Arc::new(PolicyEngine::new(
            policy_store.clone(),
            tenants.clone(),
            source_control.role_mode_enabled,
        ));
        let privileges = PrivilegeService::new(policy_store.clone(), audit.clone());

        let keycloak = if settings.keycloak.enabled {
            Some(KeycloakClient::new(settings.keycloak.clone())?)
        } else {
            None
        };
        let password_policy = PasswordPolicy::from_settings(&settings.password)?;

        Ok(Self {
            ledger: UsageLedger::new(store),
            settings,
            tenants,
            directory,
            policy_store,
            counters,
            tenancy,
            policy,
            privileges,
            audit,
            keycloak,
            hasher: CredentialHasher::new(),
            password_policy,
            backend,
        })
    }

    /// A fresh cache for one request.
    #[must_use]
    pub fn request_cache(&self) -> RequestCache {
        RequestCache::new(
            self.tenants.clone(),
            self.directory.clone(),
            self.policy_store.clone(),
        )
    }
}

async fn health() -> &'static str {
    "OK"
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v2/admin", admin_router())
        .nest("/api/v2", user_router(state.clone()))
        .layer(middleware::from_fn_with_state(state.clone(), trace_request))
        .with_state(state)
}
