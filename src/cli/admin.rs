use std::fs;

use anyhow::bail;
use chrono::Utc;
use uuid::Uuid;

use crate::auth::{CredentialHasher, PasswordPolicy};
use crate::bootstrap::Bootstrap;
use crate::config::Settings;
use crate::store::{DirectoryStore, SqliteStore};
use crate::types::{NewUser, Token};

fn create_token(
    hasher: &CredentialHasher,
    is_admin: bool,
    user_id: Option<i64>,
) -> anyhow::Result<(Token, String)> {
    let (raw_token, lookup, hash) = hasher.generate_token()?;
    let token = Token {
        id: Uuid::new_v4().to_string(),
        token_hash: hash,
        token_lookup: lookup,
        is_admin,
        user_id,
        created_at: Utc::now(),
        expires_at: None,
        last_used_at: None,
    };
    Ok((token, raw_token))
}

#[cfg(unix)]
fn set_restrictive_permissions(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::warn!("Failed to set permissions on {}: {e}", path.display());
    }
}

/// Creates the database and the admin token.
pub fn run_init(settings: &Settings, non_interactive: bool) -> anyhow::Result<()> {
    fs::create_dir_all(&settings.server.data_dir)?;

    let store = SqliteStore::new(settings.server.db_path())?;
    store.initialize()?;

    let token_file = settings.server.admin_token_path();

    if store.has_admin_token()? {
        bail!(
            "Server already initialized. Admin token exists at: {}",
            token_file.display()
        );
    }

    let hasher = CredentialHasher::new();
    let (token, raw_token) = create_token(&hasher, true, None)?;

    store.create_token(&token)?;
    fs::write(&token_file, &raw_token)?;

    #[cfg(unix)]
    set_restrictive_permissions(&token_file);

    println!();
    println!("========================================");
    println!("Admin token (save this, it won't be shown again):");
    println!();
    println!("  {raw_token}");
    println!();
    println!("Token also written to: {}", token_file.display());
    println!("========================================");
    println!();

    if settings.source_control.role_mode_enabled {
        run_seed(settings)?;
    }

    if !non_interactive {
        create_default_user_prompt(settings, &store, &hasher)?;
    }

    Ok(())
}

fn create_default_user_prompt(
    settings: &Settings,
    store: &SqliteStore,
    hasher: &CredentialHasher,
) -> anyhow::Result<()> {
    let create_user = inquire::Confirm::new("Would you like to create a default user?")
        .with_default(false)
        .prompt()?;

    if !create_user {
        return Ok(());
    }

    let username = inquire::Text::new("Username:")
        .with_validator(|input: &str| {
            if input.trim().is_empty() {
                Err("Username cannot be empty".into())
            } else if input.contains(char::is_whitespace) {
                Err("Username cannot contain whitespace".into())
            } else {
                Ok(inquire::validator::Validation::Valid)
            }
        })
        .prompt()?;
    let email = inquire::Text::new("Email:").prompt()?;

    let policy = PasswordPolicy::from_settings(&settings.password)?;
    let password = inquire::Password::new("Password:")
        .with_validator(move |input: &str| match policy.check(input) {
            Ok(()) => Ok(inquire::validator::Validation::Valid),
            Err(e) => Ok(inquire::validator::Validation::Invalid(e.to_string().into())),
        })
        .prompt()?;

    let user = store.create_user(&NewUser {
        name: username.clone(),
        email,
        external_id: Uuid::new_v4().to_string(),
        password_hash: Some(hasher.hash(&password)?),
        is_admin: false,
    })?;

    let (user_token, raw_token) = create_token(hasher, false, Some(user.id))?;
    store.create_token(&user_token)?;

    println!();
    println!("========================================");
    println!("Created user '{username}' (key {}) with token:", user.external_id);
    println!();
    println!("  {raw_token}");
    println!();
    println!("========================================");
    println!();

    Ok(())
}

/// Runs the role-mode bootstrap and prints what it changed.
pub fn run_seed(settings: &Settings) -> anyhow::Result<()> {
    let store = super::open_store(settings)?;
    let report = Bootstrap {
        tenants: &store,
        directory: &store,
        policy: &store,
    }
    .run()?;

    if report.is_noop() {
        println!("Nothing to seed.");
        return Ok(());
    }
    if report.tenant_created {
        println!("Created default tenant");
    }
    println!("Organizations made limited: {}", report.orgs_normalized);
    println!("Organizations linked:       {}", report.links_created);
    println!("Role bindings created:      {}", report.bindings_created);
    println!("Inner-source entries added: {}", report.inner_source_added);
    Ok(())
}
