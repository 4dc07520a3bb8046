//! # Tenantgate
//!
//! Tenant-scoped authorization and usage accounting for a multi-tenant git
//! host, usable both as a standalone binary and as a library.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! tenantgate = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tenantgate::audit::TracingAuditSink;
//! use tenantgate::config::Settings;
//! use tenantgate::server::{AppState, create_router};
//! use tenantgate::ssh::LocalBackend;
//! use tenantgate::store::SqliteStore;
//!
//! let settings = Settings::default();
//! let store = SqliteStore::new(settings.server.db_path()).unwrap();
//! store.initialize().unwrap();
//!
//! let state = Arc::new(AppState::new(
//!     Arc::new(store),
//!     settings,
//!     Arc::new(TracingAuditSink),
//!     Arc::new(LocalBackend::new("./data/repos")),
//! ).unwrap());
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes CLI module. Disable with `default-features = false`.

pub mod audit;
pub mod auth;
pub mod bootstrap;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod keycloak;
pub mod policy;
pub mod server;
pub mod ssh;
pub mod store;
pub mod tenancy;
pub mod types;
pub mod usage;
