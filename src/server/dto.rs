use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Organization, Repository, Tenant, TenantOrganization, User};

// Tenants

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
    pub org_key: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTenantRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct TenantResponse {
    pub id: String,
    pub name: String,
    pub org_key: String,
    pub is_default: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Tenant> for TenantResponse {
    fn from(t: Tenant) -> Self {
        Self {
            id: t.id,
            name: t.name,
            org_key: t.org_key,
            is_default: t.is_default,
            is_active: t.is_active,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

// Projects

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    /// Defaults to the lowercased name.
    #[serde(default)]
    pub project_key: Option<String>,
    /// Org key of the target tenant; the default tenant when absent.
    #[serde(default)]
    pub tenant_key: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProjectRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub id: i64,
    pub name: String,
    pub visibility: String,
    pub tenant_key: String,
    pub project_key: String,
    pub created_at: DateTime<Utc>,
}

impl ProjectResponse {
    #[must_use]
    pub fn new(org: &Organization, link: &TenantOrganization) -> Self {
        Self {
            id: org.id,
            name: org.name.clone(),
            visibility: org.visibility.to_string(),
            tenant_key: link.org_key.clone(),
            project_key: link.project_key.clone(),
            created_at: org.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddTeamRequest {
    pub name: String,
    /// External user keys to add as members.
    #[serde(default)]
    pub user_keys: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TeamResponse {
    pub id: i64,
    pub name: String,
    pub members: Vec<String>,
}

// Repositories

#[derive(Debug, Deserialize)]
pub struct CreateRepoRequest {
    pub name: String,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default = "default_private")]
    pub private: bool,
}

fn default_private() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct RepoResponse {
    pub id: i64,
    pub repo_key: String,
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    pub size: i64,
    pub private: bool,
    pub unique_clones: i64,
    pub created_at: DateTime<Utc>,
}

impl RepoResponse {
    #[must_use]
    pub fn new(repo: Repository, repo_key: String, unique_clones: i64) -> Self {
        Self {
            id: repo.id,
            repo_key,
            owner: repo.owner_name,
            name: repo.name,
            default_branch: repo.default_branch,
            size: repo.size,
            private: repo.is_private,
            unique_clones,
            created_at: repo.created_at,
        }
    }
}

// Account

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    /// User name or email.
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub user_key: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            name: u.name,
            email: u.email,
            user_key: u.external_id,
            is_admin: u.is_admin,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SignInResponse {
    pub token: String,
    pub user: UserResponse,
}

// SSH keys

#[derive(Debug, Deserialize)]
pub struct AddKeyRequest {
    pub title: String,
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct KeyResponse {
    pub id: i64,
    pub title: String,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}
