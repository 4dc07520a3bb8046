use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Role;

/// Metric key for the distinct-cloner count of a repository.
pub const UNIQUE_CLONES_METRIC_KEY: &str = "unique_clones";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub org_key: String,
    pub is_default: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    #[must_use]
    pub fn new(name: impl Into<String>, org_key: impl Into<String>, is_default: bool) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            org_key: org_key.into(),
            is_default,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Link row placing an organization (project) inside a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantOrganization {
    pub id: String,
    pub tenant_id: String,
    pub organization_id: i64,
    pub org_key: String,
    pub project_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Limited,
    Private,
}

impl Visibility {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "limited" => Some(Self::Limited),
            "private" => Some(Self::Private),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Limited => "limited",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    pub visibility: Visibility,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub lower_name: String,
    pub email: String,
    pub login_name: String,
    /// Stable external handle (`user_key`) used by the privileges API.
    pub external_id: String,
    #[serde(skip)]
    pub password_hash: Option<String>,
    pub is_active: bool,
    pub is_admin: bool,
    pub allow_create_org: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub external_id: String,
    pub password_hash: Option<String>,
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub organization_id: i64,
    pub name: String,
    pub is_owner_team: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleBinding {
    pub user_id: i64,
    pub tenant_id: String,
    pub organization_id: i64,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub owner_id: i64,
    pub owner_name: String,
    pub name: String,
    pub lower_name: String,
    pub default_branch: String,
    /// Size as reported by the backend, scaled by 1024.
    pub size: i64,
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Repository {
    /// Path of the bare repository relative to the storage root.
    #[must_use]
    pub fn relative_path(&self) -> String {
        format!("{}/{}.git", self.owner_name.to_lowercase(), self.lower_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoKey {
    pub repo_id: i64,
    pub repo_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKey {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub fingerprint: String,
    /// Normalized `<type> <base64>` without comment.
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    #[serde(skip)]
    pub token_hash: String,
    #[serde(skip)]
    pub token_lookup: String,
    pub is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Unlocked,
    Locked,
    Done,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unlocked => "unlocked",
            Self::Locked => "locked",
            Self::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unlocked" => Some(Self::Unlocked),
            "locked" => Some(Self::Locked),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageAction {
    CloneRepository,
}

impl UsageAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CloneRepository => "clone_repository",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "clone_repository" => Some(Self::CloneRepository),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTask {
    pub id: i64,
    pub user_id: i64,
    pub repo_id: i64,
    pub action: UsageAction,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricCounter {
    pub repo_id: i64,
    pub metric_key: String,
    pub metric_value: i64,
    pub updated_at: DateTime<Utc>,
}
