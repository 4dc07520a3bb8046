use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::error::{Error, Result};
use crate::store::TenantStore;
use crate::types::{Tenant, TenantOrganization};

const MAX_TENANT_FIELD_LEN: usize = 50;

/// Typed façade over [`TenantStore`]: lookups fail with tenant-specific
/// errors instead of returning `None`.
pub struct TenancyService {
    store: Arc<dyn TenantStore>,
    multi_tenant_enabled: bool,
}

impl TenancyService {
    pub fn new(store: Arc<dyn TenantStore>, multi_tenant_enabled: bool) -> Self {
        Self {
            store,
            multi_tenant_enabled,
        }
    }

    pub fn list_tenants(&self) -> Result<Vec<Tenant>> {
        self.store.list_tenants()
    }

    pub fn get_tenant_by_id(&self, id: &str) -> Result<Tenant> {
        self.store
            .get_tenant_by_id(id)?
            .ok_or_else(|| Error::TenantNotFound(id.to_string()))
    }

    pub fn get_tenant_by_name(&self, name: &str) -> Result<Tenant> {
        self.store
            .get_tenant_by_name(name)?
            .ok_or_else(|| Error::TenantNotFound(name.to_string()))
    }

    /// `Ok(None)` means the key is unknown; `Err` is an infrastructure failure.
    pub fn get_tenant_by_org_key(&self, org_key: &str) -> Result<Option<Tenant>> {
        self.store.get_tenant_by_org_key(org_key)
    }

    pub fn get_default_tenant(&self) -> Result<Tenant> {
        self.store
            .get_default_tenant()?
            .ok_or_else(|| Error::TenantNotFound(String::new()))
    }

    pub fn create_tenant(&self, name: &str, org_key: &str) -> Result<Tenant> {
        validate_tenant_field("name", name)?;
        validate_tenant_field("org_key", org_key)?;

        let tenant = Tenant::new(name, org_key, false);
        self.store.insert_tenant(&tenant)?;
        Ok(tenant)
    }

    /// Applies the mutable fields. Returns the updated tenant.
    pub fn update_tenant(
        &self,
        id: &str,
        name: Option<&str>,
        is_active: Option<bool>,
    ) -> Result<Tenant> {
        let mut tenant = self.get_tenant_by_id(id)?;

        if let Some(name) = name {
            validate_tenant_field("name", name)?;
            tenant.name = name.to_string();
        }
        if let Some(active) = is_active {
            if !active && tenant.is_default {
                return Err(Error::Validation(
                    "the default tenant cannot be deactivated".into(),
                ));
            }
            tenant.is_active = active;
        }

        tenant.updated_at = Utc::now();
        self.store.update_tenant(&tenant)?;
        Ok(tenant)
    }

    /// Deletes a non-default tenant together with its organization links and
    /// the role bindings granted under it.
    pub fn delete_tenant(&self, id: &str) -> Result<Tenant> {
        let tenant = self.get_tenant_by_id(id)?;
        if tenant.is_default {
            return Err(Error::Validation("the default tenant cannot be deleted".into()));
        }

        let org_ids: Vec<i64> = self
            .store
            .get_tenant_orgs_by_tenant(id)?
            .into_iter()
            .map(|link| link.organization_id)
            .collect();

        self.store.delete_tenant(id, &org_ids)?;
        Ok(tenant)
    }

    /// Places `org_id` inside `tenant` under `project_key`.
    pub fn link_organization(
        &self,
        tenant: &Tenant,
        org_id: i64,
        project_key: &str,
    ) -> Result<TenantOrganization> {
        let link = TenantOrganization {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant.id.clone(),
            organization_id: org_id,
            org_key: tenant.org_key.clone(),
            project_key: project_key.to_string(),
        };
        self.store.insert_tenant_org(&link)?;
        Ok(link)
    }

    pub fn unlink_organization(&self, org_id: i64) -> Result<()> {
        if !self.store.delete_tenant_org_by_org(org_id)? {
            return Err(Error::TenantOrganizationNotExists(org_id));
        }
        Ok(())
    }

    pub fn get_tenant_orgs_by_tenant(&self, tenant_id: &str) -> Result<Vec<TenantOrganization>> {
        self.store.get_tenant_orgs_by_tenant(tenant_id)
    }

    pub fn get_tenant_org_by_org(&self, org_id: i64) -> Result<TenantOrganization> {
        self.store
            .get_tenant_org_by_org(org_id)?
            .ok_or(Error::TenantOrganizationNotExists(org_id))
    }

    /// Tenant id owning `org_id`, or the default tenant's id when the
    /// organization was never linked. Never fails while a default exists.
    pub fn get_tenant_by_org_or_default(&self, org_id: i64) -> Result<String> {
        if let Some(link) = self.store.get_tenant_org_by_org(org_id)? {
            return Ok(link.tenant_id);
        }

        let default = self.get_default_tenant()?;
        warn!(
            "Organization {} has no tenant link, falling back to default tenant {}",
            org_id, default.id
        );
        Ok(default.id)
    }

    pub fn get_tenant_org_by_keys(
        &self,
        org_key: &str,
        project_key: &str,
    ) -> Result<TenantOrganization> {
        self.store
            .get_tenant_org_by_keys(org_key, project_key)?
            .ok_or_else(|| Error::TenantByKeysNotExists {
                org_key: org_key.to_string(),
                project_key: project_key.to_string(),
            })
    }

    pub fn get_tenant_org_by_project_key(&self, project_key: &str) -> Result<TenantOrganization> {
        self.store
            .get_tenant_org_by_project_key(project_key)?
            .ok_or_else(|| Error::TenantKeyNotExists(project_key.to_string()))
    }

    pub fn tenant_org_exists(&self, tenant_id: &str, org_id: i64) -> Result<bool> {
        self.store.tenant_org_exists(tenant_id, org_id)
    }

    /// Rejects interactions between organizations of different tenants when
    /// multi-tenancy is on.
    pub fn guard_same_tenant(&self, org_a: i64, org_b: i64) -> Result<()> {
        if !self.multi_tenant_enabled || org_a == org_b {
            return Ok(());
        }
        if self.get_tenant_by_org_or_default(org_a)? != self.get_tenant_by_org_or_default(org_b)? {
            return Err(Error::PolicyDenied);
        }
        Ok(())
    }
}

fn validate_tenant_field(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("tenant {field} cannot be empty")));
    }
    if value.chars().count() > MAX_TENANT_FIELD_LEN {
        return Err(Error::Validation(format!(
            "tenant {field} cannot exceed {MAX_TENANT_FIELD_LEN} characters"
        )));
    }
    Ok(())
}
