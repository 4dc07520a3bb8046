use thiserror::Error;

/// Coarse classification of [`Error`]. Callers branch on the kind, never on
/// the rendered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Validation,
    PolicyDenied,
    TaskAlreadyLocked,
    Backend,
    ExternalAuth,
    Unauthorized,
    Internal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("tenant organization not exists: {0}")]
    TenantOrganizationNotExists(i64),

    #[error("Err: tenant not exists for org_key {org_key} and project_key {project_key}")]
    TenantByKeysNotExists { org_key: String, project_key: String },

    #[error("project key already used: {0}")]
    ProjectKeyAlreadyUsed(String),

    #[error("tenant not active: {0}")]
    TenantNotActive(String),

    #[error("tenant key not exists: {0}")]
    TenantKeyNotExists(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("wrong privilege group: {0}")]
    WrongRole(String),

    #[error("access denied")]
    PolicyDenied,

    #[error("task {0} already locked")]
    TaskAlreadyLocked(i64),

    #[error("backend failure: {0}")]
    Backend(String),

    #[error("account provider returned status {0}")]
    ExternalAuthStatus(u16),

    #[error("account provider request failed: {0}")]
    ExternalAuthRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid token format")]
    InvalidTokenFormat,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TenantNotFound(_)
            | Error::TenantOrganizationNotExists(_)
            | Error::TenantByKeysNotExists { .. }
            | Error::TenantKeyNotExists(_)
            | Error::UserNotFound(_)
            | Error::NotFound(_) => ErrorKind::NotFound,
            Error::ProjectKeyAlreadyUsed(_) | Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::Validation(_) | Error::WrongRole(_) | Error::Config(_) => ErrorKind::Validation,
            Error::TenantNotActive(_) | Error::PolicyDenied => ErrorKind::PolicyDenied,
            Error::TaskAlreadyLocked(_) => ErrorKind::TaskAlreadyLocked,
            Error::Backend(_) => ErrorKind::Backend,
            Error::ExternalAuthStatus(_) | Error::ExternalAuthRequest(_) => ErrorKind::ExternalAuth,
            Error::Unauthorized | Error::InvalidTokenFormat => ErrorKind::Unauthorized,
            Error::Database(_) | Error::Io(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<git2::Error> for Error {
    fn from(err: git2::Error) -> Self {
        Error::Backend(err.message().to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
