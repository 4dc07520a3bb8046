//! Structured audit trail for state-changing operations.
//!
//! Records are flattened JSON objects. Required fields that the caller
//! cannot supply are written as `"unknown"`; they are never dropped.

use std::collections::BTreeMap;
use std::net::{IpAddr, UdpSocket};
use std::sync::{Mutex, OnceLock};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditEvent {
    ProjectCreate,
    ProjectDelete,
    ProjectSettingsChange,
    ProjectAvatarChange,
    ProjectAvatarDelete,
    TeamAddToProject,
    PrivilegesGrant,
    PrivilegesRevoke,
    HookInProjectRemove,
    UserLogin,
    UserLogout,
    UserCreate,
    ApplicationsSettingsOpen,
    SshKeyAdd,
    SshAuthentication,
    RepositoryCreate,
    RepositoryPullOrClone,
    ChangesPush,
    TenantCreate,
    TenantEdit,
    TenantActivate,
    TenantDeactivate,
    TenantDelete,
}

impl AuditEvent {
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::ProjectCreate => "Create project",
            Self::ProjectDelete => "Delete project",
            Self::ProjectSettingsChange => "Change project settings",
            Self::ProjectAvatarChange => "Change project avatar",
            Self::ProjectAvatarDelete => "Delete project avatar",
            Self::TeamAddToProject => "Add team to project",
            Self::PrivilegesGrant => "Grant privileges to user",
            Self::PrivilegesRevoke => "Revoke privileges",
            Self::HookInProjectRemove => "Remove hook in project",
            Self::UserLogin => "User login",
            Self::UserLogout => "Logout user",
            Self::UserCreate => "Create user",
            Self::ApplicationsSettingsOpen => "Open applications settings",
            Self::SshKeyAdd => "Add SSH key",
            Self::SshAuthentication => "SSH authentication",
            Self::RepositoryCreate => "Create repository",
            Self::RepositoryPullOrClone => "Pull or clone repository",
            Self::ChangesPush => "Push changes",
            Self::TenantCreate => "Create tenant",
            Self::TenantEdit => "Edit tenant",
            Self::TenantActivate => "Activate tenant",
            Self::TenantDeactivate => "Deactivate tenant",
            Self::TenantDelete => "Delete tenant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Success,
    Failure,
}

impl AuditStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Who performed an audited operation and from where.
#[derive(Debug, Clone, Default)]
pub struct Doer {
    pub name: Option<String>,
    pub id: Option<String>,
    pub remote_address: Option<String>,
}

impl Doer {
    pub fn user(name: impl Into<String>, id: i64, remote_address: Option<String>) -> Self {
        Self {
            name: Some(name.into()),
            id: Some(id.to_string()),
            remote_address,
        }
    }

    #[must_use]
    pub fn anonymous(remote_address: Option<String>) -> Self {
        Self {
            name: None,
            id: None,
            remote_address,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub event: AuditEvent,
    pub doer: Doer,
    pub status: AuditStatus,
    pub params: BTreeMap<String, String>,
}

impl AuditRecord {
    #[must_use]
    pub fn success(event: AuditEvent, doer: &Doer) -> Self {
        Self {
            event,
            doer: doer.clone(),
            status: AuditStatus::Success,
            params: BTreeMap::new(),
        }
    }

    /// Failed operation. `error` is a business-level description.
    pub fn failure(event: AuditEvent, doer: &Doer, error: impl Into<String>) -> Self {
        let mut record = Self::success(event, doer);
        record.status = AuditStatus::Failure;
        record.params.insert("error".to_string(), error.into());
        record
    }

    #[must_use]
    pub fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Renders the record as one flat JSON object. Params with empty values
    /// are skipped; they never overwrite the fixed fields.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let or_unknown = |v: &Option<String>| match v.as_deref() {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => UNKNOWN.to_string(),
        };

        let mut object = Map::new();
        object.insert("id".into(), uuid::Uuid::new_v4().to_string().into());
        object.insert("event".into(), self.event.description().into());
        object.insert(
            "eventdate".into(),
            Utc::now()
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                .into(),
        );
        object.insert("username".into(), or_unknown(&self.doer.name).into());
        object.insert("internal_id".into(), or_unknown(&self.doer.id).into());
        object.insert("status".into(), self.status.as_str().into());
        object.insert(
            "user_ip".into(),
            self.doer
                .remote_address
                .as_deref()
                .map(split_host)
                .filter(|ip| !ip.is_empty())
                .unwrap_or(UNKNOWN)
                .into(),
        );
        object.insert("host.name".into(), host_name().into());
        object.insert("host.ip".into(), host_ip().into());
        object.insert("format_version".into(), "1".into());

        for (key, value) in &self.params {
            if !value.is_empty() && !object.contains_key(key) {
                object.insert(key.clone(), value.clone().into());
            }
        }
        Value::Object(object)
    }
}

/// Strips the port from `host:port` or `[v6]:port`, returning the input
/// unchanged when it does not split.
#[must_use]
pub fn split_host(addr: &str) -> &str {
    if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
        let ip = sock.ip();
        let rendered = ip.to_string();
        if let Some(pos) = addr.find(&rendered) {
            return &addr[pos..pos + rendered.len()];
        }
    }
    if addr.parse::<IpAddr>().is_ok() {
        return addr;
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => addr,
    }
}

fn host_name() -> &'static str {
    static NAME: OnceLock<String> = OnceLock::new();
    NAME.get_or_init(|| {
        std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.is_empty())
            .or_else(|| {
                std::fs::read_to_string("/etc/hostname")
                    .ok()
                    .map(|h| h.trim().to_string())
            })
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string())
    })
}

fn host_ip() -> &'static str {
    static IP: OnceLock<String> = OnceLock::new();
    IP.get_or_init(|| {
        // Connecting a UDP socket only selects a route; nothing is sent.
        UdpSocket::bind("0.0.0.0:0")
            .and_then(|socket| {
                socket.connect("192.0.2.1:9")?;
                socket.local_addr()
            })
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|_| UNKNOWN.to_string())
    })
}

pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Writes each record as a JSON line on the `tenantgate::audit` target.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        tracing::info!(target: "tenantgate::audit", "{}", record.to_json());
    }
}

/// Keeps records in memory. Used by tests and embedding callers that ship
/// records elsewhere.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.records().into_iter().map(|r| r.event).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }
}
