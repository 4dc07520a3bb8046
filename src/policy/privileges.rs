//! Batch privilege-group application and lookup.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::audit::{AuditEvent, AuditRecord, AuditSink, Doer};
use crate::cache::RequestCache;
use crate::error::{Error, Result};
use crate::store::{PolicyStore, PolicyTx};
use crate::types::{Role, RoleBinding};

pub const MAX_USERS_PER_REQUEST: usize = 100;
pub const MAX_GROUPS_PER_USER: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct ApplyPrivilegesRequest {
    pub apply_privilege_groups: PrivilegeGroupChanges,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrivilegeGroupChanges {
    #[serde(default)]
    pub grant: Vec<UserPrivilegeGroups>,
    #[serde(default)]
    pub revoke: Vec<UserPrivilegeGroups>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPrivilegeGroups {
    pub user_key: String,
    pub privilege_groups: Vec<PrivilegeGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeGroup {
    pub tenant_key: String,
    pub project_key: String,
    pub privilege_group: String,
}

impl PrivilegeGroup {
    fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.tenant_key, self.project_key, self.privilege_group
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeGroupError {
    pub tenant_key: String,
    pub project_key: String,
    pub privilege_group: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPrivilegeGroupErrors {
    pub user_key: String,
    pub privilege_groups: Vec<PrivilegeGroupError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedStatus {
    pub granted: Vec<UserPrivilegeGroups>,
    pub revoked: Vec<UserPrivilegeGroups>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeErrors {
    pub grant: Vec<UserPrivilegeGroupErrors>,
    pub revoke: Vec<UserPrivilegeGroupErrors>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyPrivilegesResponse {
    pub applied_status: AppliedStatus,
    pub errors: PrivilegeErrors,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrivilegeQuery {
    pub user_key: String,
    pub tenant_key: String,
    pub project_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectRoles {
    pub tenant_key: String,
    pub project_key: String,
    pub privilege_group: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProjectRoles {
    pub user_key: String,
    pub privilege_groups: Vec<ProjectRoles>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GetPrivilegesResponse {
    pub granted: Vec<UserProjectRoles>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Grant,
    Revoke,
}

impl Direction {
    fn event(self) -> AuditEvent {
        match self {
            Self::Grant => AuditEvent::PrivilegesGrant,
            Self::Revoke => AuditEvent::PrivilegesRevoke,
        }
    }

    fn apply_failure(self) -> &'static str {
        match self {
            Self::Grant => "Error has occurred while granting privileges",
            Self::Revoke => "Error has occurred while revoking privileges",
        }
    }
}

/// One requested group after resolution.
struct Planned {
    direction: Direction,
    user_key: String,
    group: PrivilegeGroup,
    outcome: Outcome,
}

enum Outcome {
    Ready(RoleBinding),
    Applied,
    Failed { audit: &'static str, error: String },
}

pub fn validate_changes(changes: &PrivilegeGroupChanges) -> Result<()> {
    if changes.grant.is_empty() && changes.revoke.is_empty() {
        return Err(Error::Validation(
            "at least one of grant or revoke must be provided".into(),
        ));
    }
    if changes.grant.len() + changes.revoke.len() > MAX_USERS_PER_REQUEST {
        return Err(Error::Validation(format!(
            "no more than {MAX_USERS_PER_REQUEST} users per request"
        )));
    }
    for entry in changes.grant.iter().chain(&changes.revoke) {
        if entry.user_key.is_empty() {
            return Err(Error::Validation("user_key is required".into()));
        }
        if entry.privilege_groups.is_empty() {
            return Err(Error::Validation(format!(
                "privilege_groups for user {} cannot be empty",
                entry.user_key
            )));
        }
        if entry.privilege_groups.len() > MAX_GROUPS_PER_USER {
            return Err(Error::Validation(format!(
                "no more than {MAX_GROUPS_PER_USER} privilege groups per user"
            )));
        }
    }
    Ok(())
}

pub struct PrivilegeService {
    policy: Arc<dyn PolicyStore>,
    audit: Arc<dyn AuditSink>,
}

impl PrivilegeService {
    pub fn new(policy: Arc<dyn PolicyStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { policy, audit }
    }

    /// Applies revokes, then grants, in one transaction. Entries that fail
    /// are reported in `errors` and leave the rest of the batch intact.
    /// An `Err` means the transaction itself failed and nothing was applied.
    pub fn apply(
        &self,
        cache: &RequestCache,
        doer: &Doer,
        changes: &PrivilegeGroupChanges,
    ) -> Result<ApplyPrivilegesResponse> {
        validate_changes(changes)?;

        let mut plan = Vec::new();
        for (direction, entries) in [
            (Direction::Revoke, &changes.revoke),
            (Direction::Grant, &changes.grant),
        ] {
            for entry in entries {
                for group in &entry.privilege_groups {
                    plan.push(Planned {
                        direction,
                        user_key: entry.user_key.clone(),
                        group: group.clone(),
                        outcome: resolve(cache, &entry.user_key, group),
                    });
                }
            }
        }

        let result = self.policy.transaction(&mut |tx: &dyn PolicyTx| {
            for item in plan.iter_mut() {
                let Outcome::Ready(binding) = &item.outcome else {
                    continue;
                };
                let applied = match item.direction {
                    Direction::Grant => tx.grant(binding),
                    Direction::Revoke => tx.revoke(binding, false),
                };
                item.outcome = match applied {
                    Ok(()) => Outcome::Applied,
                    Err(e) => Outcome::Failed {
                        audit: item.direction.apply_failure(),
                        error: e.to_string(),
                    },
                };
            }
            Ok(())
        });

        if let Err(e) = result {
            error!("Error has occurred while applying privileges: {e}");
            for item in &plan {
                self.audit.record(
                    AuditRecord::failure(
                        item.direction.event(),
                        doer,
                        item.direction.apply_failure(),
                    )
                    .param("role", &item.group.privilege_group)
                    .param("tenant_key", &item.group.tenant_key)
                    .param("project_key", &item.group.project_key)
                    .param("user_key", &item.user_key),
                );
            }
            return Err(e);
        }

        let mut response = ApplyPrivilegesResponse::default();
        for item in plan {
            let base = match &item.outcome {
                Outcome::Failed { audit, .. } => {
                    AuditRecord::failure(item.direction.event(), doer, *audit)
                }
                _ => AuditRecord::success(item.direction.event(), doer),
            };
            self.audit.record(
                base.param("role", &item.group.privilege_group)
                    .param("tenant_key", &item.group.tenant_key)
                    .param("project_key", &item.group.project_key)
                    .param("user_key", &item.user_key),
            );

            match item.outcome {
                Outcome::Failed { error, .. } => {
                    let errors = match item.direction {
                        Direction::Grant => &mut response.errors.grant,
                        Direction::Revoke => &mut response.errors.revoke,
                    };
                    push_error(errors, &item.user_key, item.group, error);
                }
                _ => {
                    let applied = match item.direction {
                        Direction::Grant => &mut response.applied_status.granted,
                        Direction::Revoke => &mut response.applied_status.revoked,
                    };
                    push_applied(applied, &item.user_key, item.group);
                }
            }
        }

        debug!(
            "Applied privileges: {} granted users, {} revoked users",
            response.applied_status.granted.len(),
            response.applied_status.revoked.len()
        );
        Ok(response)
    }

    /// Looks up current roles for each query. Queries naming unknown users
    /// or projects, or resolving to no roles, are omitted.
    pub fn get_privileges(
        &self,
        cache: &RequestCache,
        queries: &[PrivilegeQuery],
    ) -> Result<GetPrivilegesResponse> {
        if queries.is_empty() {
            return Err(Error::Validation("at least one query is required".into()));
        }

        let mut response = GetPrivilegesResponse::default();
        for query in queries {
            let resolved = cache
                .user(&query.user_key)
                .and_then(|user| Ok((user, cache.project(&query.tenant_key, &query.project_key)?)));
            let (user, project) = match resolved {
                Ok(found) => found,
                Err(e) if e.is_not_found() || e.kind() == crate::error::ErrorKind::PolicyDenied => {
                    debug!("Skipping privilege query for {}: {e}", query.user_key);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let roles = self
                .policy
                .roles_for(user.id, &project.tenant.id, project.organization.id)?;
            if roles.is_empty() {
                continue;
            }

            let entry = ProjectRoles {
                tenant_key: query.tenant_key.clone(),
                project_key: query.project_key.clone(),
                privilege_group: roles.iter().map(|r| r.as_str().to_string()).collect(),
            };
            match response
                .granted
                .iter_mut()
                .find(|u| u.user_key == query.user_key)
            {
                Some(existing) => {
                    if !existing.privilege_groups.contains(&entry) {
                        existing.privilege_groups.push(entry);
                    }
                }
                None => response.granted.push(UserProjectRoles {
                    user_key: query.user_key.clone(),
                    privilege_groups: vec![entry],
                }),
            }
        }
        Ok(response)
    }
}

/// Role, then tenant, then user. The first failing step names the error.
fn resolve(cache: &RequestCache, user_key: &str, group: &PrivilegeGroup) -> Outcome {
    let Some(role) = Role::parse(&group.privilege_group) else {
        return Outcome::Failed {
            audit: "Error has occurred while searching for a role",
            error: Error::WrongRole(group.privilege_group.clone()).to_string(),
        };
    };

    let project = match cache.project(&group.tenant_key, &group.project_key) {
        Ok(project) => project,
        Err(e) => {
            return Outcome::Failed {
                audit: "Error has occurred while getting tenant",
                error: e.to_string(),
            };
        }
    };

    let user = match cache.user(user_key) {
        Ok(user) => user,
        Err(e) => {
            return Outcome::Failed {
                audit: "Error has occurred while getting user",
                error: e.to_string(),
            };
        }
    };

    Outcome::Ready(RoleBinding {
        user_id: user.id,
        tenant_id: project.tenant.id,
        organization_id: project.organization.id,
        role,
    })
}

/// Adds `group` under `user_key`, merging entries for the same user and
/// dropping duplicate `tenant|project|role` groups.
fn push_applied(applied: &mut Vec<UserPrivilegeGroups>, user_key: &str, group: PrivilegeGroup) {
    match applied.iter_mut().find(|u| u.user_key == user_key) {
        Some(existing) => {
            let seen: HashSet<String> = existing
                .privilege_groups
                .iter()
                .map(PrivilegeGroup::dedup_key)
                .collect();
            if !seen.contains(&group.dedup_key()) {
                existing.privilege_groups.push(group);
            }
        }
        None => applied.push(UserPrivilegeGroups {
            user_key: user_key.to_string(),
            privilege_groups: vec![group],
        }),
    }
}

fn push_error(
    errors: &mut Vec<UserPrivilegeGroupErrors>,
    user_key: &str,
    group: PrivilegeGroup,
    error: String,
) {
    let entry = PrivilegeGroupError {
        tenant_key: group.tenant_key,
        project_key: group.project_key,
        privilege_group: group.privilege_group,
        error,
    };
    match errors.iter_mut().find(|u| u.user_key == user_key) {
        Some(existing) => existing.privilege_groups.push(entry),
        None => errors.push(UserPrivilegeGroupErrors {
            user_key: user_key.to_string(),
            privilege_groups: vec![entry],
        }),
    }
}
