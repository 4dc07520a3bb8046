//! CLI integration tests for the tenantgate binary.
//!
//! Each test uses an isolated temp directory for the database, ensuring tests
//! can run in parallel safely.

#![allow(deprecated)] // Command::cargo_bin deprecation only affects custom build dirs

use std::path::Path;

use assert_cmd::Command;
use assert_fs::TempDir;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use predicates::prelude::*;

use tenantgate::store::{
    CounterStore, DirectoryStore, LedgerStore, NewRepository, SqliteStore, TenantStore,
};
use tenantgate::types::{NewUser, UNIQUE_CLONES_METRIC_KEY, Visibility};

struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    fn data_dir_str(&self) -> String {
        self.data_dir().to_string_lossy().to_string()
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("tenantgate").expect("failed to find binary");
        cmd.env("NO_COLOR", "1")
            .env_remove("SSH_ORIGINAL_COMMAND")
            .args(["--data-dir", &self.data_dir_str()]);
        cmd
    }

    fn init(&self) -> assert_cmd::assert::Assert {
        self.cmd()
            .args(["admin", "init", "--non-interactive"])
            .assert()
    }

    fn store(&self) -> SqliteStore {
        SqliteStore::new(self.data_dir().join("tenantgate.db")).expect("open store")
    }
}

fn key_blob(seed: u8) -> String {
    let mut blob = Vec::new();
    blob.extend_from_slice(&11u32.to_be_bytes());
    blob.extend_from_slice(b"ssh-ed25519");
    blob.extend_from_slice(&32u32.to_be_bytes());
    blob.extend_from_slice(&[seed; 32]);
    STANDARD.encode(blob)
}

fn seed_user(store: &SqliteStore, name: &str) -> i64 {
    store
        .create_user(&NewUser {
            name: name.to_string(),
            email: format!("{name}@example.com"),
            external_id: format!("{name}-key"),
            password_hash: None,
            is_admin: false,
        })
        .expect("create user")
        .id
}

#[test]
fn test_init_creates_database_and_token() {
    let ctx = TestContext::new();

    ctx.init()
        .success()
        .stdout(predicate::str::contains("Admin token"));

    let token_path = ctx.data_dir().join(".admin_token");
    let token = std::fs::read_to_string(&token_path).expect("token file");
    assert!(token.starts_with("tg_"));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&token_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    let store = ctx.store();
    assert!(store.get_default_tenant().unwrap().is_some());
}

#[test]
fn test_init_twice_fails() {
    let ctx = TestContext::new();
    ctx.init().success();

    ctx.init()
        .failure()
        .stderr(predicate::str::contains("already initialized"));
}

#[test]
fn test_seed_is_idempotent() {
    let ctx = TestContext::new();
    ctx.init().success();

    let store = ctx.store();
    store
        .create_organization("legacy", Visibility::Public)
        .unwrap();

    ctx.cmd()
        .args(["admin", "seed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Organizations linked:       1"));

    ctx.cmd()
        .args(["admin", "seed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to seed."));
}

#[test]
fn test_commands_require_database() {
    let ctx = TestContext::new();

    ctx.cmd()
        .args(["usage", "drain"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Database not found"));
}

#[test]
fn test_usage_drain_and_reconcile() {
    let ctx = TestContext::new();
    ctx.init().success();

    let store = ctx.store();
    let user_id = seed_user(&store, "alice");
    let org = store.create_organization("alpha", Visibility::Limited).unwrap();
    let (repo, _) = store
        .create_repository(&NewRepository {
            owner: &org,
            name: "app",
            default_branch: "main",
            is_private: false,
        })
        .unwrap();
    store.insert_usage(repo.id, user_id).unwrap();

    ctx.cmd()
        .args(["usage", "drain"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Processed 0 tasks"));

    ctx.cmd()
        .args(["usage", "reconcile"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 updated"));

    let counter = store
        .get_counter(repo.id, UNIQUE_CLONES_METRIC_KEY)
        .unwrap()
        .unwrap();
    assert_eq!(counter.metric_value, 1);

    ctx.cmd()
        .args(["usage", "sweep", "--older-than", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Unlocked 0 stale tasks"));
}

#[test]
fn test_ssh_keys_prints_forced_command() {
    let ctx = TestContext::new();
    ctx.init().success();

    let store = ctx.store();
    let user_id = seed_user(&store, "alice");
    let content = format!("ssh-ed25519 {}", key_blob(1));
    let key = store
        .add_public_key(user_id, "laptop", &content, "SHA256:x")
        .unwrap();

    ctx.cmd()
        .args(["ssh", "keys", "-u", "git", "-t", "ssh-ed25519", "-k", &key_blob(1)])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("ssh serv key-{}", key.id)))
        .stdout(predicate::str::contains("no-pty"));

    ctx.cmd()
        .args(["ssh", "keys", "-u", "root", "-t", "ssh-ed25519", "-k", &key_blob(1)])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    ctx.cmd()
        .args(["ssh", "keys", "-u", "git", "-t", "ssh-ed25519", "-k", &key_blob(2)])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_ssh_serv_rejects_shell_and_unknown_repos() {
    let ctx = TestContext::new();
    ctx.init().success();

    let store = ctx.store();
    let user_id = seed_user(&store, "alice");
    let key = store
        .add_public_key(
            user_id,
            "laptop",
            &format!("ssh-ed25519 {}", key_blob(3)),
            "SHA256:y",
        )
        .unwrap();
    let key_ref = format!("key-{}", key.id);

    ctx.cmd()
        .args(["ssh", "serv", &key_ref])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("shell access"));

    ctx.cmd()
        .args(["ssh", "serv", &key_ref])
        .env("SSH_ORIGINAL_COMMAND", "git-upload-pack 'nobody/nothing.git'")
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "Repository not found or access denied",
        ));

    ctx.cmd()
        .args(["ssh", "serv", "bogus"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid key reference"));
}
