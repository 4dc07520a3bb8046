//! Start-up seeding for role mode.
//!
//! Every pass checks before it writes, so running the whole bootstrap on
//! each start is a no-op once the data is in shape.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::error::Result;
use crate::store::{DirectoryStore, PolicyStore, TenantStore};
use crate::types::{Organization, Role, RoleBinding, Tenant, TenantOrganization, Visibility};

pub const DEFAULT_TENANT_NAME: &str = "tenant";
pub const DEFAULT_TENANT_ORG_KEY: &str = "tenant";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub tenant_created: bool,
    pub orgs_normalized: usize,
    pub links_created: usize,
    pub bindings_created: usize,
    pub inner_source_added: usize,
}

impl BootstrapReport {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

pub struct Bootstrap<'a> {
    pub tenants: &'a dyn TenantStore,
    pub directory: &'a dyn DirectoryStore,
    pub policy: &'a dyn PolicyStore,
}

impl Bootstrap<'_> {
    pub fn run(&self) -> Result<BootstrapReport> {
        let mut report = BootstrapReport::default();

        let (default, created) = self.ensure_default_tenant()?;
        report.tenant_created = created;
        report.orgs_normalized = self
            .directory
            .replace_visibility(Visibility::Public, Visibility::Limited)?;

        let orgs = self.directory.list_organizations()?;
        report.links_created = self.link_orphan_orgs(&default, &orgs)?;
        report.bindings_created = self.bind_members(&orgs)?;
        report.inner_source_added = self.mark_inner_source(&orgs)?;

        if report.is_noop() {
            info!("Bootstrap: nothing to do");
        } else {
            info!(
                "Bootstrap: tenant_created={} orgs_normalized={} links={} bindings={} inner_source={}",
                report.tenant_created,
                report.orgs_normalized,
                report.links_created,
                report.bindings_created,
                report.inner_source_added
            );
        }
        Ok(report)
    }

    fn ensure_default_tenant(&self) -> Result<(Tenant, bool)> {
        if let Some(tenant) = self.tenants.get_default_tenant()? {
            return Ok((tenant, false));
        }

        let tenant = Tenant::new(DEFAULT_TENANT_NAME, DEFAULT_TENANT_ORG_KEY, true);
        self.tenants.insert_tenant(&tenant)?;
        info!("Created default tenant {}", tenant.id);
        Ok((tenant, true))
    }

    /// Links every unlinked org to the default tenant under its lowercase
    /// name, suffixed with `-2`, `-3`, ... when that project key is taken.
    fn link_orphan_orgs(&self, default: &Tenant, orgs: &[Organization]) -> Result<usize> {
        let links = self.tenants.list_tenant_orgs()?;
        let linked: HashSet<i64> = links.iter().map(|link| link.organization_id).collect();
        let mut taken: HashSet<String> = links
            .into_iter()
            .filter(|link| link.org_key == default.org_key)
            .map(|link| link.project_key)
            .collect();

        let mut created = 0;
        for org in orgs.iter().filter(|o| !linked.contains(&o.id)) {
            let base = org.name.to_lowercase();
            let mut project_key = base.clone();
            let mut n = 2;
            while taken.contains(&project_key) {
                project_key = format!("{base}-{n}");
                n += 1;
            }
            if project_key != base {
                warn!(
                    "Project key {} already used; linking org {} as {}",
                    base, org.id, project_key
                );
            }

            self.tenants.insert_tenant_org(&TenantOrganization {
                id: uuid::Uuid::new_v4().to_string(),
                tenant_id: default.id.clone(),
                organization_id: org.id,
                org_key: default.org_key.clone(),
                project_key: project_key.clone(),
            })?;
            taken.insert(project_key);
            created += 1;
        }
        Ok(created)
    }

    /// Owner-team members become OWNER, other members READER. Orgs that
    /// already have any binding are left alone.
    fn bind_members(&self, orgs: &[Organization]) -> Result<usize> {
        let mut created = 0;
        for org in orgs {
            if self.policy.count_org_bindings(org.id)? > 0 {
                continue;
            }
            let members = self.directory.list_org_members(org.id)?;
            if members.is_empty() {
                continue;
            }

            let owners: HashSet<i64> = match self.directory.get_owner_team(org.id)? {
                Some(team) => self
                    .directory
                    .list_team_members(team.id)?
                    .into_iter()
                    .map(|u| u.id)
                    .collect(),
                None => HashSet::new(),
            };
            let tenant_id = match self.tenants.get_tenant_org_by_org(org.id)? {
                Some(link) => link.tenant_id,
                None => continue,
            };

            let bindings: Vec<RoleBinding> = members
                .iter()
                .map(|member| RoleBinding {
                    user_id: member.id,
                    tenant_id: tenant_id.clone(),
                    organization_id: org.id,
                    role: if owners.contains(&member.id) {
                        Role::Owner
                    } else {
                        Role::Reader
                    },
                })
                .collect();

            self.policy.transaction(&mut |tx| {
                for binding in &bindings {
                    tx.grant(binding)?;
                }
                Ok(())
            })?;
            created += bindings.len();
        }
        Ok(created)
    }

    fn mark_inner_source(&self, orgs: &[Organization]) -> Result<usize> {
        let mut added = 0;
        for org in orgs.iter().filter(|o| o.visibility == Visibility::Limited) {
            if !self.policy.is_inner_source(org.id)? {
                self.policy.add_inner_source(org.id)?;
                added += 1;
            }
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::types::NewUser;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SqliteStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        (temp, store)
    }

    fn bootstrap(store: &SqliteStore) -> Bootstrap<'_> {
        Bootstrap {
            tenants: store,
            directory: store,
            policy: store,
        }
    }

    fn user(store: &SqliteStore, name: &str) -> i64 {
        store
            .create_user(&NewUser {
                name: name.into(),
                email: format!("{name}@example.com"),
                external_id: format!("u-{name}"),
                password_hash: None,
                is_admin: false,
            })
            .unwrap()
            .id
    }

    #[test]
    fn test_empty_database_gets_default_tenant() {
        let (_temp, store) = setup();

        let report = bootstrap(&store).run().unwrap();
        assert!(report.tenant_created);

        let default = store.get_default_tenant().unwrap().unwrap();
        assert_eq!(default.name, DEFAULT_TENANT_NAME);
        assert_eq!(default.org_key, DEFAULT_TENANT_ORG_KEY);
        assert!(default.is_active);

        assert!(bootstrap(&store).run().unwrap().is_noop());
    }

    #[test]
    fn test_existing_orgs_are_backfilled() {
        let (_temp, store) = setup();
        let public = store.create_organization("Open", Visibility::Public).unwrap();
        let private = store.create_organization("closed", Visibility::Private).unwrap();

        let owner = user(&store, "olga");
        let member = user(&store, "mike");
        store.add_org_member(public.id, owner).unwrap();
        store.add_org_member(public.id, member).unwrap();
        let team = store.create_team(public.id, "Owners", true).unwrap();
        store.add_team_member(team.id, owner).unwrap();

        let report = bootstrap(&store).run().unwrap();
        assert_eq!(report.orgs_normalized, 1);
        assert_eq!(report.links_created, 2);
        assert_eq!(report.bindings_created, 2);
        assert_eq!(report.inner_source_added, 1);

        let default = store.get_default_tenant().unwrap().unwrap();
        let link = store.get_tenant_org_by_org(public.id).unwrap().unwrap();
        assert_eq!(link.tenant_id, default.id);
        assert_eq!(link.project_key, "open");
        assert!(store.get_tenant_org_by_org(private.id).unwrap().is_some());

        assert_eq!(
            store.roles_for(owner, &default.id, public.id).unwrap(),
            vec![Role::Owner]
        );
        assert_eq!(
            store.roles_for(member, &default.id, public.id).unwrap(),
            vec![Role::Reader]
        );

        let normalized = store.get_organization(public.id).unwrap().unwrap();
        assert_eq!(normalized.visibility, Visibility::Limited);
        assert!(store.is_inner_source(public.id).unwrap());
        assert!(!store.is_inner_source(private.id).unwrap());

        assert!(bootstrap(&store).run().unwrap().is_noop());
    }

    #[test]
    fn test_taken_project_key_gets_suffix() {
        let (_temp, store) = setup();
        bootstrap(&store).run().unwrap();
        let default = store.get_default_tenant().unwrap().unwrap();

        let custom = store.create_organization("custom", Visibility::Limited).unwrap();
        store
            .insert_tenant_org(&TenantOrganization {
                id: "custom-link".to_string(),
                tenant_id: default.id.clone(),
                organization_id: custom.id,
                org_key: default.org_key.clone(),
                project_key: "legacy".to_string(),
            })
            .unwrap();
        let legacy = store.create_organization("Legacy", Visibility::Limited).unwrap();

        let report = bootstrap(&store).run().unwrap();
        assert_eq!(report.links_created, 1);
        let link = store.get_tenant_org_by_org(legacy.id).unwrap().unwrap();
        assert_eq!(link.project_key, "legacy-2");

        assert!(bootstrap(&store).run().unwrap().is_noop());
    }

    #[test]
    fn test_orgs_with_bindings_are_untouched() {
        let (_temp, store) = setup();
        bootstrap(&store).run().unwrap();
        let default = store.get_default_tenant().unwrap().unwrap();

        let org = store.create_organization("team", Visibility::Private).unwrap();
        let a = user(&store, "anna");
        let b = user(&store, "bert");
        store.add_org_member(org.id, a).unwrap();
        store.add_org_member(org.id, b).unwrap();
        store
            .grant(&RoleBinding {
                user_id: a,
                tenant_id: default.id.clone(),
                organization_id: org.id,
                role: Role::Manager,
            })
            .unwrap();

        let report = bootstrap(&store).run().unwrap();
        assert_eq!(report.links_created, 1);
        assert_eq!(report.bindings_created, 0);
        assert!(store.roles_for(b, &default.id, org.id).unwrap().is_empty());
    }
}
