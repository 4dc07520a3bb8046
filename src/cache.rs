//! Per-request memoization of user, project and role-binding lookups.
//!
//! A cache lives for one logical request and is dropped with it. Only
//! successful resolutions are remembered; failures are returned every time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::store::{DirectoryStore, PolicyStore, TenantStore};
use crate::types::{Organization, Role, RoleBinding, Tenant, TenantOrganization, User};

/// A project resolved through its keys, with its tenant and organization.
#[derive(Debug, Clone)]
pub struct ResolvedProject {
    pub tenant: Tenant,
    pub link: TenantOrganization,
    pub organization: Organization,
}

#[derive(Default)]
struct Entries {
    users: HashMap<String, User>,
    by_project_key: HashMap<String, ResolvedProject>,
    by_keys: HashMap<String, ResolvedProject>,
    bindings: HashMap<i64, Vec<RoleBinding>>,
}

pub struct RequestCache {
    tenants: Arc<dyn TenantStore>,
    directory: Arc<dyn DirectoryStore>,
    policy: Arc<dyn PolicyStore>,
    entries: Mutex<Entries>,
}

impl RequestCache {
    pub fn new(
        tenants: Arc<dyn TenantStore>,
        directory: Arc<dyn DirectoryStore>,
        policy: Arc<dyn PolicyStore>,
    ) -> Self {
        Self {
            tenants,
            directory,
            policy,
            entries: Mutex::new(Entries::default()),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Active user by external key. Unknown and inactive users both fail
    /// with `UserNotFound`.
    pub fn user(&self, user_key: &str) -> Result<User> {
        if let Some(user) = self.entries().users.get(user_key) {
            return Ok(user.clone());
        }

        let user = self
            .directory
            .get_user_by_external_id(user_key)?
            .filter(|u| u.is_active)
            .ok_or_else(|| Error::UserNotFound(user_key.to_string()))?;

        self.entries()
            .users
            .insert(user_key.to_string(), user.clone());
        Ok(user)
    }

    /// Resolves `(tenant_key, project_key)`, where `tenant_key` is the
    /// tenant's org key.
    pub fn project(&self, tenant_key: &str, project_key: &str) -> Result<ResolvedProject> {
        let cache_key = format!("{tenant_key}|{project_key}");
        if let Some(found) = self.entries().by_keys.get(&cache_key) {
            return Ok(found.clone());
        }

        let link = self
            .tenants
            .get_tenant_org_by_keys(tenant_key, project_key)?
            .ok_or_else(|| Error::TenantByKeysNotExists {
                org_key: tenant_key.to_string(),
                project_key: project_key.to_string(),
            })?;
        let resolved = self.complete(link)?;

        self.entries().by_keys.insert(cache_key, resolved.clone());
        Ok(resolved)
    }

    pub fn project_by_key(&self, project_key: &str) -> Result<ResolvedProject> {
        if let Some(found) = self.entries().by_project_key.get(project_key) {
            return Ok(found.clone());
        }

        let link = self
            .tenants
            .get_tenant_org_by_project_key(project_key)?
            .ok_or_else(|| Error::TenantKeyNotExists(project_key.to_string()))?;
        let resolved = self.complete(link)?;

        self.entries()
            .by_project_key
            .insert(project_key.to_string(), resolved.clone());
        Ok(resolved)
    }

    fn complete(&self, link: TenantOrganization) -> Result<ResolvedProject> {
        let tenant = self
            .tenants
            .get_tenant_by_id(&link.tenant_id)?
            .ok_or_else(|| Error::TenantNotFound(link.tenant_id.clone()))?;
        if !tenant.is_active {
            return Err(Error::TenantNotActive(tenant.name));
        }

        let organization = self
            .directory
            .get_organization(link.organization_id)?
            .filter(|o| o.is_active)
            .ok_or_else(|| Error::NotFound("project".into()))?;

        Ok(ResolvedProject {
            tenant,
            link,
            organization,
        })
    }

    pub fn org_bindings(&self, org_id: i64) -> Result<Vec<RoleBinding>> {
        if let Some(bindings) = self.entries().bindings.get(&org_id) {
            return Ok(bindings.clone());
        }

        let bindings = self.policy.list_org_bindings(org_id)?;
        self.entries().bindings.insert(org_id, bindings.clone());
        Ok(bindings)
    }

    /// Roles held by `user_id` in `(tenant_id, org_id)`, from the memoized
    /// binding list.
    pub fn roles_for(&self, user_id: i64, tenant_id: &str, org_id: i64) -> Result<Vec<Role>> {
        let mut roles: Vec<Role> = self
            .org_bindings(org_id)?
            .into_iter()
            .filter(|b| b.user_id == user_id && b.tenant_id == tenant_id)
            .map(|b| b.role)
            .collect();
        roles.sort();
        Ok(roles)
    }
}
