//! Storage interfaces. Each component receives only the trait it needs;
//! [`SqliteStore`] implements all of them over one SQLite database.

pub mod migrations;
mod schema;
mod sqlite;

pub use sqlite::SqliteStore;
#[cfg(test)]
pub(crate) use sqlite::test_support;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::*;

/// Tenant and tenant-organization records.
pub trait TenantStore: Send + Sync {
    fn list_tenants(&self) -> Result<Vec<Tenant>>;
    fn get_tenant_by_id(&self, id: &str) -> Result<Option<Tenant>>;
    fn get_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>>;
    fn get_tenant_by_org_key(&self, org_key: &str) -> Result<Option<Tenant>>;
    fn get_default_tenant(&self) -> Result<Option<Tenant>>;
    fn insert_tenant(&self, tenant: &Tenant) -> Result<()>;
    /// Persists `name`, `is_active` and `updated_at`; other fields are immutable.
    fn update_tenant(&self, tenant: &Tenant) -> Result<()>;
    /// Deletes the tenant, the listed tenant-organization links and every
    /// role binding under the tenant, atomically.
    fn delete_tenant(&self, id: &str, org_ids: &[i64]) -> Result<()>;

    fn insert_tenant_org(&self, link: &TenantOrganization) -> Result<()>;
    fn delete_tenant_org_by_org(&self, org_id: i64) -> Result<bool>;
    fn list_tenant_orgs(&self) -> Result<Vec<TenantOrganization>>;
    fn get_tenant_orgs_by_tenant(&self, tenant_id: &str) -> Result<Vec<TenantOrganization>>;
    fn get_tenant_org_by_org(&self, org_id: i64) -> Result<Option<TenantOrganization>>;
    fn get_tenant_org_by_keys(
        &self,
        org_key: &str,
        project_key: &str,
    ) -> Result<Option<TenantOrganization>>;
    fn get_tenant_org_by_project_key(&self, project_key: &str)
    -> Result<Option<TenantOrganization>>;
    fn tenant_org_exists(&self, tenant_id: &str, org_id: i64) -> Result<bool>;
}

/// Operations executed inside a caller-owned policy transaction.
pub trait PolicyTx {
    fn grant(&self, binding: &RoleBinding) -> Result<()>;
    fn revoke(&self, binding: &RoleBinding, cascade_teams: bool) -> Result<()>;
}

/// Role bindings, inner-source set and team custom privileges.
pub trait PolicyStore: Send + Sync {
    fn roles_for(&self, user_id: i64, tenant_id: &str, org_id: i64) -> Result<Vec<Role>>;
    fn list_org_bindings(&self, org_id: i64) -> Result<Vec<RoleBinding>>;
    fn count_org_bindings(&self, org_id: i64) -> Result<i64>;

    /// Runs `f` inside one transaction. Commits when `f` returns `Ok`.
    fn transaction(&self, f: &mut dyn FnMut(&dyn PolicyTx) -> Result<()>) -> Result<()>;

    fn grant(&self, binding: &RoleBinding) -> Result<()> {
        self.transaction(&mut |tx: &dyn PolicyTx| tx.grant(binding))
    }

    fn revoke(&self, binding: &RoleBinding, cascade_teams: bool) -> Result<()> {
        self.transaction(&mut |tx: &dyn PolicyTx| tx.revoke(binding, cascade_teams))
    }

    fn add_inner_source(&self, org_id: i64) -> Result<()>;
    fn remove_inner_source(&self, org_id: i64) -> Result<()>;
    fn is_inner_source(&self, org_id: i64) -> Result<bool>;

    fn add_team_privilege(
        &self,
        team_id: i64,
        org_id: i64,
        repo_id: i64,
        privilege: CustomPrivilege,
    ) -> Result<()>;
    /// True when the user is in a team of `org_id` holding `privilege` on `repo_id`.
    fn has_team_privilege(
        &self,
        user_id: i64,
        org_id: i64,
        repo_id: i64,
        privilege: CustomPrivilege,
    ) -> Result<bool>;
}

pub struct NewRepository<'a> {
    pub owner: &'a Organization,
    pub name: &'a str,
    pub default_branch: &'a str,
    pub is_private: bool,
}

/// Hosting-layer entities the core reads and occasionally writes.
pub trait DirectoryStore: Send + Sync {
    fn create_user(&self, user: &NewUser) -> Result<User>;
    fn get_user(&self, id: i64) -> Result<Option<User>>;
    fn get_user_by_external_id(&self, external_id: &str) -> Result<Option<User>>;
    /// Matches the lowercased name or the email.
    fn get_user_by_login(&self, login: &str) -> Result<Option<User>>;
    fn set_user_active(&self, id: i64, active: bool) -> Result<()>;

    fn create_organization(&self, name: &str, visibility: Visibility) -> Result<Organization>;
    fn get_organization(&self, id: i64) -> Result<Option<Organization>>;
    fn get_organization_by_name(&self, name: &str) -> Result<Option<Organization>>;
    fn list_organizations(&self) -> Result<Vec<Organization>>;
    fn update_organization(&self, org: &Organization) -> Result<()>;
    fn delete_organization(&self, id: i64) -> Result<bool>;
    /// Rewrites every organization with visibility `from` to `to`.
    fn replace_visibility(&self, from: Visibility, to: Visibility) -> Result<usize>;

    fn add_org_member(&self, org_id: i64, user_id: i64) -> Result<()>;
    fn list_org_members(&self, org_id: i64) -> Result<Vec<User>>;
    fn create_team(&self, org_id: i64, name: &str, is_owner_team: bool) -> Result<Team>;
    fn get_team_by_name(&self, org_id: i64, name: &str) -> Result<Option<Team>>;
    fn get_owner_team(&self, org_id: i64) -> Result<Option<Team>>;
    /// Adds the user to the team and to the team's organization.
    fn add_team_member(&self, team_id: i64, user_id: i64) -> Result<()>;
    fn list_team_members(&self, team_id: i64) -> Result<Vec<User>>;

    /// Creates the repository with its repo key and zeroed metric counter.
    fn create_repository(&self, repo: &NewRepository<'_>) -> Result<(Repository, RepoKey)>;
    fn get_repository(&self, id: i64) -> Result<Option<Repository>>;
    fn get_repository_by_name(&self, owner_name: &str, name: &str) -> Result<Option<Repository>>;
    fn get_repository_by_key(&self, repo_key: &str) -> Result<Option<Repository>>;
    fn get_repo_key(&self, repo_id: i64) -> Result<Option<RepoKey>>;
    fn update_repository_default_branch(&self, id: i64, branch: &str) -> Result<()>;
    fn update_repository_size(&self, id: i64, size: i64) -> Result<()>;
    fn list_repositories(&self, owner_id: i64) -> Result<Vec<Repository>>;
    fn delete_repository(&self, id: i64) -> Result<bool>;

    fn add_public_key(
        &self,
        owner_id: i64,
        name: &str,
        content: &str,
        fingerprint: &str,
    ) -> Result<PublicKey>;
    fn get_public_key(&self, id: i64) -> Result<Option<PublicKey>>;
    fn get_public_key_by_content(&self, content: &str) -> Result<Option<PublicKey>>;

    fn create_token(&self, token: &Token) -> Result<()>;
    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>>;
    fn delete_token(&self, id: &str) -> Result<bool>;
    fn update_token_last_used(&self, id: &str) -> Result<()>;
    fn has_admin_token(&self) -> Result<bool>;
}

/// Durable queue of usage tasks. Transitions are conditional updates on `status`.
pub trait TaskStore: Send + Sync {
    fn insert_task(&self, repo_id: i64, user_id: i64, action: UsageAction) -> Result<i64>;
    fn get_task(&self, id: i64) -> Result<Option<UsageTask>>;
    fn list_unlocked_tasks(&self) -> Result<Vec<UsageTask>>;
    /// `unlocked -> locked`; fails with `TaskAlreadyLocked` when no row moved.
    fn lock_task(&self, id: i64) -> Result<()>;
    /// Back to `unlocked` from any status.
    fn unlock_task(&self, id: i64) -> Result<()>;
    /// `locked -> done`; no-op when the row is not locked.
    fn complete_task(&self, id: i64) -> Result<()>;
    fn delete_task(&self, id: i64) -> Result<()>;
    fn unlock_stale_tasks(&self, locked_before: DateTime<Utc>) -> Result<usize>;
}

/// Set of distinct `(repo, user)` pairs.
pub trait LedgerStore: Send + Sync {
    fn count_by_repo_user(&self, repo_id: i64, user_id: i64) -> Result<i64>;
    fn count_by_repo(&self, repo_id: i64) -> Result<i64>;
    /// Returns false when the pair was already present.
    fn insert_usage(&self, repo_id: i64, user_id: i64) -> Result<bool>;
    fn delete_by_repo(&self, repo_id: i64) -> Result<usize>;
}

pub trait CounterStore: Send + Sync {
    fn list_counters(&self) -> Result<Vec<MetricCounter>>;
    fn get_counter(&self, repo_id: i64, metric_key: &str) -> Result<Option<MetricCounter>>;
    fn upsert_counter(&self, repo_id: i64, metric_key: &str, value: i64) -> Result<()>;
    fn update_counter(&self, repo_id: i64, metric_key: &str, value: i64) -> Result<()>;
}
