use std::fmt;

use serde::{Deserialize, Serialize};

/// Project role. Declaration order is the privilege order, so `Ord` compares
/// roles directly: `Reader < Writer < Manager < Owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Reader,
    Writer,
    Manager,
    Owner,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Owner, Role::Manager, Role::Writer, Role::Reader];

    /// Parses a privilege-group name, case-insensitively.
    pub fn parse(s: &str) -> Option<Role> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Some(Role::Owner),
            "manager" => Some(Role::Manager),
            "writer" => Some(Role::Writer),
            "reader" => Some(Role::Reader),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Manager => "manager",
            Role::Writer => "writer",
            Role::Reader => "reader",
        }
    }

    /// Returns true if holding `self` satisfies an action that needs `required`.
    #[must_use]
    pub fn satisfies(self, required: Role) -> bool {
        self >= required
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of coarse actions checked by the policy engine. The string
/// forms appear in audit records and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    ReadPrivate,
    ViewBranch,
    Write,
    Create,
    Edit,
    Delete,
    EditProject,
    Own,
    MergeWithoutCheck,
    ManageComments,
}

impl Action {
    /// Lowest role that may perform this action.
    #[must_use]
    pub fn minimum_role(self) -> Role {
        match self {
            Action::Read | Action::ReadPrivate | Action::ViewBranch => Role::Reader,
            Action::Write | Action::Create | Action::Edit => Role::Writer,
            Action::Delete => Role::Manager,
            Action::EditProject
            | Action::Own
            | Action::MergeWithoutCheck
            | Action::ManageComments => Role::Owner,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::ReadPrivate => "read_private",
            Action::ViewBranch => "view_branch",
            Action::Write => "write",
            Action::Create => "create",
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::EditProject => "edit_project",
            Action::Own => "own",
            Action::MergeWithoutCheck => "merge_without_check",
            Action::ManageComments => "manage_comments",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained repository privilege granted to a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CustomPrivilege {
    #[serde(rename = "viewBranch")]
    ViewBranch,
    #[serde(rename = "changeBranch")]
    ChangeBranch,
    #[serde(rename = "createPR")]
    CreatePr,
    #[serde(rename = "approvePR")]
    ApprovePr,
    #[serde(rename = "mergePR")]
    MergePr,
}

impl CustomPrivilege {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "viewBranch" => Some(Self::ViewBranch),
            "changeBranch" => Some(Self::ChangeBranch),
            "createPR" => Some(Self::CreatePr),
            "approvePR" => Some(Self::ApprovePr),
            "mergePR" => Some(Self::MergePr),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ViewBranch => "viewBranch",
            Self::ChangeBranch => "changeBranch",
            Self::CreatePr => "createPR",
            Self::ApprovePr => "approvePR",
            Self::MergePr => "mergePR",
        }
    }

    /// Coarse action consulted before falling back to team grants.
    #[must_use]
    pub fn coarse_action(self) -> Action {
        match self {
            Self::ViewBranch => Action::ViewBranch,
            Self::ChangeBranch | Self::CreatePr | Self::ApprovePr => Action::Write,
            Self::MergePr => Action::MergeWithoutCheck,
        }
    }
}

impl fmt::Display for CustomPrivilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
