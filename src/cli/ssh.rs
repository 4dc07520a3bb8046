use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audit::TracingAuditSink;
use crate::config::Settings;
use crate::policy::PolicyEngine;
use crate::ssh::{KeyIdentity, LocalBackend, OfferedKey, SshGateway};
use crate::store::{DirectoryStore, SqliteStore};
use crate::tenancy::TenancyService;
use crate::usage::TaskQueue;

const KEY_OPTIONS: &str = "no-port-forwarding,no-X11-forwarding,no-agent-forwarding,no-pty";
const CERT_SUFFIX: &str = "-cert-v01@openssh.com";
const NO_SHELL: &str = "Hi there! You've successfully authenticated, but shell access is not provided.";

fn gateway(store: Arc<SqliteStore>, settings: &Settings) -> SshGateway {
    let source_control = &settings.source_control;
    SshGateway::new(
        store.clone(),
        Arc::new(TenancyService::new(
            store.clone(),
            source_control.multi_tenant_enabled,
        )),
        Arc::new(PolicyEngine::new(
            store.clone(),
            store.clone(),
            source_control.role_mode_enabled,
        )),
        TaskQueue::new(store),
        Arc::new(LocalBackend::new(
            settings.ssh.repo_root(&settings.server.data_dir),
        )),
        Arc::new(TracingAuditSink),
        settings.ssh.clone(),
    )
}

/// AuthorizedKeysCommand: prints one forced-command line when the offered
/// key belongs to a user, and nothing otherwise.
pub fn run_ssh_keys(
    settings: &Settings,
    config: Option<&Path>,
    user: &str,
    key_type: &str,
    key: &str,
) -> anyhow::Result<()> {
    if key_type.ends_with(CERT_SUFFIX) {
        warn!("Certificate offered to the key lookup; certificates need an embedding transport");
        return Ok(());
    }

    let store = Arc::new(super::open_store(settings)?);
    let line = format!("{key_type} {key}");
    let Some(identity) =
        gateway(store, settings).authenticate(user, &OfferedKey::Plain(line.clone()), "sshd")?
    else {
        return Ok(());
    };

    let exe = std::env::current_exe().context("Failed to locate the tenantgate binary")?;
    let data_dir = std::fs::canonicalize(&settings.server.data_dir)
        .unwrap_or_else(|_| settings.server.data_dir.clone());
    let mut command = format!("{} --data-dir {}", exe.display(), data_dir.display());
    if let Some(config) = config {
        command.push_str(&format!(" --config {}", config.display()));
    }
    println!(
        "command=\"{command} ssh serv key-{}\",{KEY_OPTIONS} {line}",
        identity.key_id
    );
    Ok(())
}

/// Forced command: runs `SSH_ORIGINAL_COMMAND` for the key over the
/// process streams. Returns the exit status for the client.
pub async fn run_ssh_serv(settings: &Settings, key_ref: &str) -> anyhow::Result<i32> {
    let key_id: i64 = key_ref
        .strip_prefix("key-")
        .and_then(|id| id.parse().ok())
        .with_context(|| format!("Invalid key reference '{key_ref}'"))?;

    let store = Arc::new(super::open_store(settings)?);
    let Some(key) = store.get_public_key(key_id)? else {
        eprintln!("Unknown key");
        return Ok(1);
    };
    let identity = KeyIdentity {
        key_id: key.id,
        owner_id: key.owner_id,
    };

    let Ok(raw_command) = std::env::var("SSH_ORIGINAL_COMMAND") else {
        eprintln!("{NO_SHELL}");
        return Ok(1);
    };
    let remote = std::env::var("SSH_CONNECTION")
        .ok()
        .and_then(|c| c.split_whitespace().next().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    info!("Serving {:?} for key {} from {}", raw_command, key_id, remote);
    let code = gateway(store, settings)
        .execute(
            identity,
            &raw_command,
            &remote,
            tokio::io::stdin(),
            tokio::io::stdout(),
            tokio::io::stderr(),
            &cancel,
        )
        .await;
    Ok(code)
}
