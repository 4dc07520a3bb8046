//! Role-based authorization inside a tenant.

mod engine;
mod privileges;

pub use engine::{DecisionInput, PolicyEngine, decide};
pub use privileges::{
    ApplyPrivilegesRequest, ApplyPrivilegesResponse, AppliedStatus, GetPrivilegesResponse,
    MAX_GROUPS_PER_USER, MAX_USERS_PER_REQUEST, PrivilegeErrors, PrivilegeGroup,
    PrivilegeGroupChanges, PrivilegeGroupError, PrivilegeQuery, PrivilegeService, ProjectRoles,
    UserPrivilegeGroupErrors, UserPrivilegeGroups, UserProjectRoles, validate_changes,
};
