use std::sync::Arc;

use tracing::debug;

use crate::cache::RequestCache;
use crate::error::Result;
use crate::store::{PolicyStore, TenantStore};
use crate::types::{Action, CustomPrivilege, Organization, Role, RoleBinding, User, Visibility};

/// Inputs of a single decision once all lookups are done.
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub visibility: Visibility,
    pub authenticated: bool,
    pub inner_source: bool,
    pub roles: &'a [Role],
}

/// Pure decision procedure. Read on a public org, or on an inner-source
/// limited org by an authenticated doer, is allowed without a binding;
/// everything else needs a role at least as high as the action requires.
#[must_use]
pub fn decide(input: DecisionInput<'_>, action: Action) -> bool {
    if action == Action::Read {
        match input.visibility {
            Visibility::Public => return true,
            Visibility::Limited if input.authenticated && input.inner_source => return true,
            _ => {}
        }
    }

    let required = action.minimum_role();
    input.roles.iter().any(|role| role.satisfies(required))
}

pub struct PolicyEngine {
    store: Arc<dyn PolicyStore>,
    tenants: Arc<dyn TenantStore>,
    role_mode_enabled: bool,
}

impl PolicyEngine {
    pub fn new(
        store: Arc<dyn PolicyStore>,
        tenants: Arc<dyn TenantStore>,
        role_mode_enabled: bool,
    ) -> Self {
        Self {
            store,
            tenants,
            role_mode_enabled,
        }
    }

    #[must_use]
    pub fn role_mode_enabled(&self) -> bool {
        self.role_mode_enabled
    }

    /// Decides `action` for `doer` (None when anonymous) on `org` inside
    /// `tenant_id`, reading bindings straight from the store.
    pub fn allowed(
        &self,
        doer: Option<&User>,
        tenant_id: &str,
        org: &Organization,
        action: Action,
    ) -> Result<bool> {
        self.evaluate(doer, tenant_id, org, action, |user_id| {
            self.store.roles_for(user_id, tenant_id, org.id)
        })
    }

    /// Same as [`allowed`](Self::allowed) but reads bindings through the
    /// request cache, so repeated checks in one request agree.
    pub fn allowed_cached(
        &self,
        cache: &RequestCache,
        doer: Option<&User>,
        tenant_id: &str,
        org: &Organization,
        action: Action,
    ) -> Result<bool> {
        self.evaluate(doer, tenant_id, org, action, |user_id| {
            cache.roles_for(user_id, tenant_id, org.id)
        })
    }

    fn evaluate(
        &self,
        doer: Option<&User>,
        tenant_id: &str,
        org: &Organization,
        action: Action,
        roles_of: impl FnOnce(i64) -> Result<Vec<Role>>,
    ) -> Result<bool> {
        if !self.role_mode_enabled {
            return Ok(true);
        }

        let tenant_active = self
            .tenants
            .get_tenant_by_id(tenant_id)?
            .is_some_and(|t| t.is_active);
        if !tenant_active || !org.is_active {
            debug!(
                "Denied {} on org {}: tenant or organization inactive",
                action, org.id
            );
            return Ok(false);
        }

        let doer = doer.filter(|u| u.is_active);
        let inner_source = action == Action::Read
            && org.visibility == Visibility::Limited
            && doer.is_some()
            && self.store.is_inner_source(org.id)?;
        let roles = match doer {
            Some(user) => roles_of(user.id)?,
            None => Vec::new(),
        };

        let allowed = decide(
            DecisionInput {
                visibility: org.visibility,
                authenticated: doer.is_some(),
                inner_source,
                roles: &roles,
            },
            action,
        );
        debug!(
            "Policy decision: user={:?} tenant={} org={} action={} allowed={}",
            doer.map(|u| u.id),
            tenant_id,
            org.id,
            action,
            allowed
        );
        Ok(allowed)
    }

    /// Runs the coarse decision for `privilege` and falls back to grants
    /// held by the doer's teams in `org` for `repo_id`.
    pub fn allowed_custom(
        &self,
        doer: Option<&User>,
        tenant_id: &str,
        org: &Organization,
        repo_id: i64,
        privilege: CustomPrivilege,
    ) -> Result<bool> {
        if self.allowed(doer, tenant_id, org, privilege.coarse_action())? {
            return Ok(true);
        }

        let Some(user) = doer.filter(|u| u.is_active) else {
            return Ok(false);
        };
        let tenant_active = self
            .tenants
            .get_tenant_by_id(tenant_id)?
            .is_some_and(|t| t.is_active);
        if !tenant_active || !org.is_active {
            return Ok(false);
        }

        self.store
            .has_team_privilege(user.id, org.id, repo_id, privilege)
    }

    pub fn grant(&self, user_id: i64, tenant_id: &str, org_id: i64, role: Role) -> Result<()> {
        self.store.grant(&RoleBinding {
            user_id,
            tenant_id: tenant_id.to_string(),
            organization_id: org_id,
            role,
        })
    }

    pub fn revoke(
        &self,
        user_id: i64,
        tenant_id: &str,
        org_id: i64,
        role: Role,
        cascade_teams: bool,
    ) -> Result<()> {
        self.store.revoke(
            &RoleBinding {
                user_id,
                tenant_id: tenant_id.to_string(),
                organization_id: org_id,
                role,
            },
            cascade_teams,
        )
    }

    pub fn roles_for(&self, user_id: i64, tenant_id: &str, org_id: i64) -> Result<Vec<Role>> {
        self.store.roles_for(user_id, tenant_id, org_id)
    }

    pub fn add_inner_source(&self, org_id: i64) -> Result<()> {
        self.store.add_inner_source(org_id)
    }

    pub fn store(&self) -> &Arc<dyn PolicyStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DirectoryStore, SqliteStore};
    use crate::types::{NewUser, Tenant};
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        store: Arc<SqliteStore>,
        engine: PolicyEngine,
        tenant: Tenant,
        user: User,
    }

    fn fixture(role_mode: bool) -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::new(temp.path().join("test.db")).unwrap());
        store.initialize().unwrap();
        let tenant = Tenant::new("tenant", "tenant", true);
        store.insert_tenant(&tenant).unwrap();
        let user = store
            .create_user(&NewUser {
                name: "u1".into(),
                email: "u1@example.com".into(),
                external_id: "u1".into(),
                password_hash: None,
                is_admin: false,
            })
            .unwrap();
        let engine = PolicyEngine::new(store.clone(), store.clone(), role_mode);
        Fixture {
            _temp: temp,
            store,
            engine,
            tenant,
            user,
        }
    }

    fn org(f: &Fixture, name: &str, visibility: Visibility) -> Organization {
        f.store.create_organization(name, visibility).unwrap()
    }

    #[test]
    fn test_decide_matrix() {
        let input = |roles: &'static [Role]| DecisionInput {
            visibility: Visibility::Private,
            authenticated: true,
            inner_source: false,
            roles,
        };

        assert!(!decide(input(&[]), Action::Read));
        assert!(decide(input(&[Role::Reader]), Action::Read));
        assert!(decide(input(&[Role::Reader]), Action::ReadPrivate));
        assert!(!decide(input(&[Role::Reader]), Action::Create));
        assert!(decide(input(&[Role::Writer]), Action::Edit));
        assert!(!decide(input(&[Role::Writer]), Action::Delete));
        assert!(decide(input(&[Role::Manager]), Action::Delete));
        assert!(!decide(input(&[Role::Manager]), Action::Own));
        assert!(decide(input(&[Role::Reader, Role::Owner]), Action::Own));
    }

    #[test]
    fn test_public_and_inner_source_reads() {
        let public = DecisionInput {
            visibility: Visibility::Public,
            authenticated: false,
            inner_source: false,
            roles: &[],
        };
        assert!(decide(public, Action::Read));
        assert!(!decide(public, Action::ReadPrivate));

        let limited = DecisionInput {
            visibility: Visibility::Limited,
            authenticated: true,
            inner_source: true,
            roles: &[],
        };
        assert!(decide(limited, Action::Read));
        assert!(!decide(limited, Action::Write));
        assert!(!decide(
            DecisionInput {
                authenticated: false,
                ..limited
            },
            Action::Read
        ));
    }

    #[test]
    fn test_grant_then_check() {
        let f = fixture(true);
        let o1 = org(&f, "o1", Visibility::Limited);

        assert!(!f.engine.allowed(Some(&f.user), &f.tenant.id, &o1, Action::Read).unwrap());
        f.engine.grant(f.user.id, &f.tenant.id, o1.id, Role::Reader).unwrap();
        assert!(f.engine.allowed(Some(&f.user), &f.tenant.id, &o1, Action::Read).unwrap());
        assert!(!f.engine.allowed(Some(&f.user), &f.tenant.id, &o1, Action::Write).unwrap());
    }

    #[test]
    fn test_revoke_restores_previous_decision() {
        let f = fixture(true);
        let o1 = org(&f, "o1", Visibility::Private);
        let before = f
            .engine
            .allowed(Some(&f.user), &f.tenant.id, &o1, Action::Edit)
            .unwrap();

        f.engine.grant(f.user.id, &f.tenant.id, o1.id, Role::Writer).unwrap();
        f.engine.grant(f.user.id, &f.tenant.id, o1.id, Role::Writer).unwrap();
        assert!(f.engine.allowed(Some(&f.user), &f.tenant.id, &o1, Action::Edit).unwrap());

        f.engine
            .revoke(f.user.id, &f.tenant.id, o1.id, Role::Writer, false)
            .unwrap();
        assert_eq!(
            f.engine
                .allowed(Some(&f.user), &f.tenant.id, &o1, Action::Edit)
                .unwrap(),
            before
        );
    }

    #[test]
    fn test_inner_source_requires_membership_in_set() {
        let f = fixture(true);
        let o1 = org(&f, "o1", Visibility::Limited);

        assert!(!f.engine.allowed(Some(&f.user), &f.tenant.id, &o1, Action::Read).unwrap());
        f.engine.add_inner_source(o1.id).unwrap();
        assert!(f.engine.allowed(Some(&f.user), &f.tenant.id, &o1, Action::Read).unwrap());
        assert!(!f.engine.allowed(None, &f.tenant.id, &o1, Action::Read).unwrap());
    }

    #[test]
    fn test_role_mode_disabled_allows_everything() {
        let f = fixture(false);
        let o1 = org(&f, "o1", Visibility::Private);
        assert!(f.engine.allowed(None, "no-such-tenant", &o1, Action::Own).unwrap());
    }

    #[test]
    fn test_deactivated_tenant_denies() {
        let f = fixture(true);
        let mut acme = Tenant::new("acme", "acme", false);
        f.store.insert_tenant(&acme).unwrap();
        let o1 = org(&f, "o1", Visibility::Public);
        f.engine.grant(f.user.id, &acme.id, o1.id, Role::Owner).unwrap();
        assert!(f.engine.allowed(Some(&f.user), &acme.id, &o1, Action::Own).unwrap());

        acme.is_active = false;
        f.store.update_tenant(&acme).unwrap();
        assert!(!f.engine.allowed(Some(&f.user), &acme.id, &o1, Action::Read).unwrap());
    }

    #[test]
    fn test_custom_privilege_falls_back_to_team() {
        let f = fixture(true);
        let o1 = org(&f, "o1", Visibility::Limited);
        f.engine.grant(f.user.id, &f.tenant.id, o1.id, Role::Reader).unwrap();

        assert!(
            !f.engine
                .allowed_custom(Some(&f.user), &f.tenant.id, &o1, 3, CustomPrivilege::ApprovePr)
                .unwrap()
        );

        let team = f.store.create_team(o1.id, "reviewers", false).unwrap();
        f.store.add_team_member(team.id, f.user.id).unwrap();
        f.store
            .add_team_privilege(team.id, o1.id, 3, CustomPrivilege::ApprovePr)
            .unwrap();

        assert!(
            f.engine
                .allowed_custom(Some(&f.user), &f.tenant.id, &o1, 3, CustomPrivilege::ApprovePr)
                .unwrap()
        );
        assert!(
            f.engine
                .allowed_custom(Some(&f.user), &f.tenant.id, &o1, 3, CustomPrivilege::ViewBranch)
                .unwrap()
        );
        assert!(
            !f.engine
                .allowed_custom(Some(&f.user), &f.tenant.id, &o1, 4, CustomPrivilege::ApprovePr)
                .unwrap()
        );
    }

    #[test]
    fn test_cached_decisions_are_stable() {
        let f = fixture(true);
        let o1 = org(&f, "o1", Visibility::Private);
        f.engine.grant(f.user.id, &f.tenant.id, o1.id, Role::Writer).unwrap();

        let cache = RequestCache::new(f.store.clone(), f.store.clone(), f.store.clone());
        let first = f
            .engine
            .allowed_cached(&cache, Some(&f.user), &f.tenant.id, &o1, Action::Write)
            .unwrap();
        f.engine
            .revoke(f.user.id, &f.tenant.id, o1.id, Role::Writer, false)
            .unwrap();
        let second = f
            .engine
            .allowed_cached(&cache, Some(&f.user), &f.tenant.id, &o1, Action::Write)
            .unwrap();
        assert!(first);
        assert_eq!(first, second);
    }
}
