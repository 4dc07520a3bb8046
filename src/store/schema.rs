/// Base schema. Contains the legacy `code_hub_counter` table so that the
/// second migration has a uniform starting point on fresh databases.
pub const SCHEMA_V1: &str = r#"
-- Tenants are the top-level namespace; exactly one is the default
CREATE TABLE IF NOT EXISTS sc_tenant (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    org_key TEXT NOT NULL UNIQUE,
    is_default INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

-- Organizations (projects) owned by the hosting layer
CREATE TABLE IF NOT EXISTS organizations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    lower_name TEXT NOT NULL UNIQUE,
    visibility TEXT NOT NULL DEFAULT 'limited',
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT DEFAULT (datetime('now'))
);

-- An organization belongs to at most one tenant
CREATE TABLE IF NOT EXISTS sc_tenant_organizations (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES sc_tenant(id),
    organization_id INTEGER NOT NULL UNIQUE REFERENCES organizations(id) ON DELETE CASCADE,
    org_key TEXT NOT NULL,
    project_key TEXT NOT NULL,
    UNIQUE(tenant_id, organization_id),
    UNIQUE(org_key, project_key)
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    lower_name TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    login_name TEXT NOT NULL,
    external_id TEXT NOT NULL UNIQUE,
    password_hash TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_admin INTEGER NOT NULL DEFAULT 0,
    allow_create_org INTEGER NOT NULL DEFAULT 1,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS org_members (
    organization_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    PRIMARY KEY (organization_id, user_id)
);

CREATE TABLE IF NOT EXISTS teams (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    organization_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    is_owner_team INTEGER NOT NULL DEFAULT 0,
    UNIQUE(organization_id, name)
);

CREATE TABLE IF NOT EXISTS team_users (
    team_id INTEGER NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    organization_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
    PRIMARY KEY (team_id, user_id)
);

-- Policy store: (subject, tenant, org, role) tuples
CREATE TABLE IF NOT EXISTS role_bindings (
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    tenant_id TEXT NOT NULL,
    organization_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    PRIMARY KEY (user_id, tenant_id, organization_id, role)
);

-- Limited-visibility orgs readable by any authenticated user
CREATE TABLE IF NOT EXISTS inner_source_orgs (
    organization_id INTEGER PRIMARY KEY REFERENCES organizations(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS team_custom_privileges (
    team_id INTEGER NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
    organization_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
    repo_id INTEGER NOT NULL,
    privilege TEXT NOT NULL,
    PRIMARY KEY (team_id, repo_id, privilege)
);

CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL REFERENCES organizations(id) ON DELETE CASCADE,
    owner_name TEXT NOT NULL,
    name TEXT NOT NULL,
    lower_name TEXT NOT NULL,
    default_branch TEXT NOT NULL DEFAULT 'main',
    size INTEGER NOT NULL DEFAULT 0,
    is_private INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now')),
    UNIQUE(owner_id, lower_name)
);

-- Stable external handle of a repository
CREATE TABLE IF NOT EXISTS sc_repo_key (
    repo_id INTEGER PRIMARY KEY REFERENCES repositories(id) ON DELETE CASCADE,
    repo_key TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS public_keys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    fingerprint TEXT NOT NULL UNIQUE,
    content TEXT NOT NULL UNIQUE,
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE(owner_id, name)
);

-- API tokens; non-admin tokens belong to a user
CREATE TABLE IF NOT EXISTS tokens (
    id TEXT PRIMARY KEY,
    token_hash TEXT NOT NULL,
    token_lookup TEXT NOT NULL,
    is_admin INTEGER NOT NULL DEFAULT 0,
    user_id INTEGER REFERENCES users(id) ON DELETE CASCADE,
    created_at TEXT DEFAULT (datetime('now')),
    expires_at TEXT,
    last_used_at TEXT
);

-- Usage events waiting for the coordinator
CREATE TABLE IF NOT EXISTS code_hub_counter_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    repo_id INTEGER NOT NULL,
    action TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'unlocked',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS code_hub_unique_usages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE(repo_id, user_id)
);

-- Legacy per-repo counter, replaced by internal_metric_counter
CREATE TABLE IF NOT EXISTS code_hub_counter (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL UNIQUE,
    num_uniq_usages INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_sc_tenant_default ON sc_tenant(is_default) WHERE is_default = 1;
CREATE INDEX IF NOT EXISTS idx_tenant_orgs_tenant ON sc_tenant_organizations(tenant_id);
CREATE INDEX IF NOT EXISTS idx_tenant_orgs_project_key ON sc_tenant_organizations(project_key);
CREATE INDEX IF NOT EXISTS idx_team_users_user ON team_users(user_id);
CREATE INDEX IF NOT EXISTS idx_role_bindings_org ON role_bindings(organization_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_tokens_lookup ON tokens(token_lookup);
CREATE INDEX IF NOT EXISTS idx_tokens_user ON tokens(user_id);
CREATE INDEX IF NOT EXISTS idx_counter_tasks_status ON code_hub_counter_tasks(status, created_at);
"#;

/// Moves the legacy counter into the generic metric table.
pub const METRIC_COUNTER_V2: &str = r#"
CREATE TABLE IF NOT EXISTS internal_metric_counter (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    metric_key TEXT NOT NULL,
    metric_value INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    UNIQUE(repo_id, metric_key)
);

INSERT INTO internal_metric_counter (repo_id, metric_key, metric_value, updated_at)
SELECT repo_id, 'unique_clones', num_uniq_usages, COALESCE(updated_at, datetime('now'))
FROM code_hub_counter;

DROP TABLE code_hub_counter;
"#;
