mod admin;
mod commands;
mod serve;
mod ssh;
mod usage;

pub use admin::{run_init, run_seed};
pub use commands::{AdminCommands, SshCommands, UsageCommands};
pub use serve::run_serve;
pub use ssh::{run_ssh_keys, run_ssh_serv};
pub use usage::{run_usage_drain, run_usage_reconcile, run_usage_sweep};

use crate::config::Settings;
use crate::store::SqliteStore;

/// Opens the database of an initialized data directory.
pub fn open_store(settings: &Settings) -> anyhow::Result<SqliteStore> {
    let db_path = settings.server.db_path();

    if !db_path.exists() {
        anyhow::bail!(
            "Database not found at {}. Run 'tenantgate admin init' first.",
            db_path.display()
        );
    }

    let store = SqliteStore::new(&db_path)?;
    store.initialize()?;
    Ok(store)
}
