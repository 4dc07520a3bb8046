//! In-process harness: a router over a temp database, driven with `oneshot`.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use chrono::Utc;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use tenantgate::audit::{AuditEvent, MemoryAuditSink};
use tenantgate::auth::CredentialHasher;
use tenantgate::bootstrap::Bootstrap;
use tenantgate::config::Settings;
use tenantgate::server::{AppState, create_router};
use tenantgate::ssh::LocalBackend;
use tenantgate::store::{DirectoryStore, SqliteStore};
use tenantgate::types::Token;

pub const PASSWORD: &str = "Secret123";

pub struct TestApp {
    pub temp_dir: TempDir,
    pub router: Router,
    pub store: Arc<SqliteStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub admin_token: String,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(mut settings: Settings) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        settings.server.data_dir = temp_dir.path().to_path_buf();

        let store = Arc::new(SqliteStore::new(settings.server.db_path()).expect("open store"));
        store.initialize().expect("migrate");
        Bootstrap {
            tenants: store.as_ref(),
            directory: store.as_ref(),
            policy: store.as_ref(),
        }
        .run()
        .expect("bootstrap");

        let hasher = CredentialHasher::new();
        let (raw, lookup, hash) = hasher.generate_token().expect("generate token");
        store
            .create_token(&Token {
                id: Uuid::new_v4().to_string(),
                token_hash: hash,
                token_lookup: lookup,
                is_admin: true,
                user_id: None,
                created_at: Utc::now(),
                expires_at: None,
                last_used_at: None,
            })
            .expect("store admin token");

        let audit = Arc::new(MemoryAuditSink::new());
        let backend = Arc::new(LocalBackend::new(temp_dir.path().join("repos")));
        let state = AppState::new(store.clone(), settings, audit.clone(), backend)
            .expect("build state");

        Self {
            router: create_router(Arc::new(state)),
            temp_dir,
            store,
            audit,
            admin_token: raw,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).expect("build request")).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        };
        (status, json)
    }

    /// Signs up and signs in; returns the user key and an API token.
    pub async fn user(&self, name: &str) -> (String, String) {
        let (status, body) = self
            .request(
                Method::POST,
                "/api/v2/signUp",
                None,
                Some(serde_json::json!({
                    "name": name,
                    "email": format!("{name}@example.com"),
                    "password": PASSWORD,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "sign-up failed: {body}");
        let user_key = body["data"]["user_key"].as_str().expect("user key").to_string();

        let (status, body) = self
            .request(
                Method::POST,
                "/api/v2/signIn",
                None,
                Some(serde_json::json!({ "login": name, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "sign-in failed: {body}");
        let token = body["data"]["token"].as_str().expect("token").to_string();
        (user_key, token)
    }

    /// Creates a project in the default tenant owned by the token's user.
    pub async fn project(&self, token: &str, name: &str, visibility: &str) {
        let (status, body) = self
            .request(
                Method::POST,
                "/api/v2/projects",
                Some(token),
                Some(serde_json::json!({ "name": name, "visibility": visibility })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create project failed: {body}");
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.audit.events()
    }
}

pub fn project_uri(path: &str, project_key: &str) -> String {
    format!("{path}?tenant_key=tenant&project_key={project_key}")
}
