//! SSH front end: key authentication, command dispatch and stream proxying
//! to the repository backend.
//!
//! The gateway does not speak the SSH wire protocol itself. It is driven
//! either by an embedding transport through [`SshGateway::authenticate`] and
//! [`SshGateway::execute`], or by the system daemon through the `ssh keys`
//! and `ssh serv` commands.

mod auth;
mod backend;
mod command;
mod finalize;
mod keys;
mod proxy;

pub use auth::{CertType, KeyIdentity, OfferedCertificate, OfferedKey, authenticate};
pub use backend::{
    BackendStream, Completion, LocalBackend, PushIdentity, RepoBackend, StreamRequest,
};
pub use command::{GitCommand, GitService, parse_command};
pub use finalize::{SIZE_SCALE, finalize_push};
pub use keys::{AuthorizedKey, normalize_key};
pub use proxy::{copy_downstream, copy_upstream, proxy};

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEvent, AuditRecord, AuditSink, Doer};
use crate::config::SshSettings;
use crate::error::{Error, Result};
use crate::policy::PolicyEngine;
use crate::store::DirectoryStore;
use crate::tenancy::TenancyService;
use crate::types::{Repository, UsageAction, User};
use crate::usage::TaskQueue;

const ACCESS_DENIED: &[u8] = b"Repository not found or access denied\n";

/// Best-effort message to the client's stderr. The process may exit right
/// after, so the write is flushed.
async fn tell<E: AsyncWrite + Unpin>(stderr: &mut E, message: &[u8]) {
    let _ = stderr.write_all(message).await;
    let _ = stderr.flush().await;
}

/// Everything a command needs once the repository and doer are known.
struct Target {
    command: GitCommand,
    repo: Repository,
    user: User,
}

pub struct SshGateway {
    directory: Arc<dyn DirectoryStore>,
    tenancy: Arc<TenancyService>,
    policy: Arc<PolicyEngine>,
    queue: TaskQueue,
    backend: Arc<dyn RepoBackend>,
    audit: Arc<dyn AuditSink>,
    settings: SshSettings,
}

impl SshGateway {
    pub fn new(
        directory: Arc<dyn DirectoryStore>,
        tenancy: Arc<TenancyService>,
        policy: Arc<PolicyEngine>,
        queue: TaskQueue,
        backend: Arc<dyn RepoBackend>,
        audit: Arc<dyn AuditSink>,
        settings: SshSettings,
    ) -> Self {
        Self {
            directory,
            tenancy,
            policy,
            queue,
            backend,
            audit,
            settings,
        }
    }

    pub fn settings(&self) -> &SshSettings {
        &self.settings
    }

    /// Authenticates an offered key and records the outcome.
    pub fn authenticate(
        &self,
        username: &str,
        key: &OfferedKey,
        remote: &str,
    ) -> Result<Option<KeyIdentity>> {
        let identity = authenticate(self.directory.as_ref(), &self.settings, username, key, remote)?;

        let doer = match identity {
            Some(id) => self
                .directory
                .get_user(id.owner_id)?
                .map(|u| Doer::user(u.name, u.id, Some(remote.to_string())))
                .unwrap_or_else(|| Doer::anonymous(Some(remote.to_string()))),
            None => Doer::anonymous(Some(remote.to_string())),
        };
        let record = match identity {
            Some(id) => AuditRecord::success(AuditEvent::SshAuthentication, &doer)
                .param("key_id", id.key_id.to_string()),
            None => AuditRecord::failure(AuditEvent::SshAuthentication, &doer, "failed authentication"),
        };
        self.audit.record(record);
        Ok(identity)
    }

    /// Runs one git command for an authenticated key and returns the exit
    /// status for the client.
    pub async fn execute<R, W, E>(
        &self,
        identity: KeyIdentity,
        raw_command: &str,
        remote: &str,
        stdin: R,
        stdout: W,
        mut stderr: E,
        cancel: &CancellationToken,
    ) -> i32
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        let target = match self.resolve(identity, raw_command) {
            Ok(target) => target,
            Err(e) => {
                warn!("Rejected command {:?} from {}: {}", raw_command, remote, e);
                tell(&mut stderr, ACCESS_DENIED).await;
                return 1;
            }
        };

        let doer = Doer::user(&target.user.name, target.user.id, Some(remote.to_string()));
        let service = target.command.service;
        let event = if service.is_write() {
            AuditEvent::ChangesPush
        } else {
            AuditEvent::RepositoryPullOrClone
        };

        let request = StreamRequest {
            repo_path: target.repo.relative_path(),
            identity: service.is_write().then(|| PushIdentity {
                gl_id: identity.owner_id.to_string(),
                gl_repository: target.repo.name.clone(),
                gl_username: target.repo.owner_name.clone(),
            }),
        };

        let stream = match self.backend.open_stream(service, request).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to create stream for {}: {}", target.repo.relative_path(), e);
                tell(&mut stderr, format!("Failed to create stream: {e}\n").as_bytes()).await;
                self.audit
                    .record(AuditRecord::failure(event, &doer, "backend unavailable").param(
                        "repository",
                        target.repo.relative_path(),
                    ));
                return 1;
            }
        };

        let drop_flush = service.is_write() && self.backend.drops_bare_flush();
        let outcome = tokio::select! {
            result = proxy(stream, stdin, stdout, service.is_write(), drop_flush) => result,
            () = cancel.cancelled() => Err(Error::Backend("session cancelled".into())),
        };

        let code = match outcome {
            Ok(code) => code,
            Err(e) => {
                warn!("Stream for {} ended with error: {}", target.repo.relative_path(), e);
                tell(&mut stderr, format!("{e}\n").as_bytes()).await;
                self.audit.record(
                    AuditRecord::failure(event, &doer, "stream failed")
                        .param("repository", target.repo.relative_path()),
                );
                return 1;
            }
        };

        if code == 0 {
            self.after_success(&target).await;
            self.audit.record(
                AuditRecord::success(event, &doer).param("repository", target.repo.relative_path()),
            );
        } else {
            self.audit.record(
                AuditRecord::failure(event, &doer, format!("exit status {code}"))
                    .param("repository", target.repo.relative_path()),
            );
        }
        code
    }

    fn resolve(&self, identity: KeyIdentity, raw_command: &str) -> Result<Target> {
        let command = parse_command(raw_command)?;

        let user = self
            .directory
            .get_user(identity.owner_id)?
            .filter(|u| u.is_active)
            .ok_or_else(|| Error::UserNotFound(identity.owner_id.to_string()))?;
        let repo = self
            .directory
            .get_repository_by_name(&command.owner, &command.repo)?
            .ok_or_else(|| Error::NotFound(format!("repository {}", command.repo_path())))?;
        let org = self
            .directory
            .get_organization(repo.owner_id)?
            .ok_or_else(|| Error::NotFound(format!("organization {}", repo.owner_name)))?;

        let tenant_id = self.tenancy.get_tenant_by_org_or_default(org.id)?;
        let action = command.service.required_action();
        if !self.policy.allowed(Some(&user), &tenant_id, &org, action)? {
            return Err(Error::PolicyDenied);
        }

        debug!(
            "User {} allowed {} on {}",
            user.id,
            command.service.command_name(),
            command.repo_path()
        );
        Ok(Target {
            command,
            repo,
            user,
        })
    }

    /// Side effects of a clean exit. Failures are logged; the client has
    /// already been served.
    async fn after_success(&self, target: &Target) {
        match target.command.service {
            GitService::UploadPack => {
                if let Err(e) =
                    self.queue
                        .enqueue(target.repo.id, target.user.id, UsageAction::CloneRepository)
                {
                    error!("Failed to enqueue usage for repo {}: {}", target.repo.id, e);
                }
            }
            GitService::ReceivePack => {
                match finalize_push(self.backend.as_ref(), self.directory.as_ref(), &target.repo)
                    .await
                {
                    Ok(true) => info!("Default branch converged for {}", target.repo.relative_path()),
                    Ok(false) => {}
                    Err(e) => error!(
                        "Post-push finalize failed for {}: {}",
                        target.repo.relative_path(),
                        e
                    ),
                }
            }
            GitService::UploadArchive => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::policy::PolicyEngine;
    use crate::ssh::keys::sample_key;
    use crate::store::{NewRepository, PolicyStore, SqliteStore, TaskStore, TenantStore};
    use crate::types::{NewUser, Role, RoleBinding, Tenant, Visibility};
    use async_trait::async_trait;
    use std::io;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<u8>>>);

    impl AsyncWrite for Recorder {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        requests: Mutex<Vec<(GitService, StreamRequest)>>,
        received: Recorder,
        head: Mutex<Option<String>>,
        fail_open: bool,
    }

    #[async_trait]
    impl RepoBackend for FakeBackend {
        async fn open_stream(
            &self,
            service: GitService,
            request: StreamRequest,
        ) -> Result<BackendStream> {
            if self.fail_open {
                return Err(Error::Backend("connection refused".into()));
            }
            self.requests.lock().unwrap().push((service, request));
            Ok(BackendStream {
                stdin: Box::pin(self.received.clone()),
                stdout: Box::pin(io::Cursor::new(b"0008NAK\n".to_vec())),
                completion: Box::pin(async { Ok::<_, Error>(0) }),
            })
        }

        async fn repository_exists(&self, _: &str) -> Result<bool> {
            Ok(true)
        }

        async fn create_repository(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }

        async fn repository_size(&self, _: &str) -> Result<i64> {
            Ok(2)
        }

        async fn list_branches(&self, _: &str) -> Result<Vec<String>> {
            Ok(vec!["trunk".into()])
        }

        async fn default_branch(&self, _: &str) -> Result<String> {
            Ok("trunk".into())
        }

        async fn set_head(&self, _: &str, branch: &str) -> Result<()> {
            *self.head.lock().unwrap() = Some(branch.to_string());
            Ok(())
        }
    }

    struct Fixture {
        _temp: TempDir,
        store: Arc<SqliteStore>,
        backend: Arc<FakeBackend>,
        audit: Arc<MemoryAuditSink>,
        gateway: SshGateway,
        identity: KeyIdentity,
        repo: Repository,
    }

    fn fixture(role: Option<Role>, backend: FakeBackend) -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::new(temp.path().join("test.db")).unwrap());
        store.initialize().unwrap();
        let tenant = Tenant::new("tenant", "tenant", true);
        store.insert_tenant(&tenant).unwrap();

        let user = store
            .create_user(&NewUser {
                name: "alice".into(),
                email: "alice@example.com".into(),
                external_id: "u-alice".into(),
                password_hash: None,
                is_admin: false,
            })
            .unwrap();
        let key = store
            .add_public_key(user.id, "laptop", &sample_key(1), "SHA256:x")
            .unwrap();
        let org = store.create_organization("alice", Visibility::Limited).unwrap();
        let (repo, _) = store
            .create_repository(&NewRepository {
                owner: &org,
                name: "repo",
                default_branch: "main",
                is_private: true,
            })
            .unwrap();
        if let Some(role) = role {
            store
                .grant(&RoleBinding {
                    user_id: user.id,
                    tenant_id: tenant.id.clone(),
                    organization_id: org.id,
                    role,
                })
                .unwrap();
        }

        let tenancy = Arc::new(TenancyService::new(store.clone(), false));
        let policy = Arc::new(PolicyEngine::new(store.clone(), store.clone(), true));
        let backend = Arc::new(backend);
        let audit = Arc::new(MemoryAuditSink::new());
        let gateway = SshGateway::new(
            store.clone(),
            tenancy,
            policy,
            TaskQueue::new(store.clone()),
            backend.clone(),
            audit.clone(),
            SshSettings::default(),
        );

        Fixture {
            _temp: temp,
            store,
            backend,
            audit,
            gateway,
            identity: KeyIdentity {
                key_id: key.id,
                owner_id: user.id,
            },
            repo,
        }
    }

    #[tokio::test]
    async fn test_receive_pack_propagates_identity_and_finalizes() {
        let f = fixture(Some(Role::Writer), FakeBackend::default());
        let mut out = Vec::new();

        let code = f
            .gateway
            .execute(
                f.identity,
                "git-receive-pack '/alice/repo.git'",
                "10.0.0.1:5000",
                io::Cursor::new(b"0000".to_vec()),
                &mut out,
                tokio::io::sink(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(code, 0);
        assert_eq!(out, b"0008NAK\n");
        assert_eq!(*f.backend.received.0.lock().unwrap(), b"0000");

        let requests = f.backend.requests.lock().unwrap();
        let (service, request) = &requests[0];
        assert_eq!(*service, GitService::ReceivePack);
        assert_eq!(request.repo_path, "alice/repo.git");
        assert_eq!(
            request.identity,
            Some(PushIdentity {
                gl_id: f.identity.owner_id.to_string(),
                gl_repository: "repo".into(),
                gl_username: "alice".into(),
            })
        );

        assert_eq!(f.backend.head.lock().unwrap().as_deref(), Some("trunk"));
        let stored = f.store.get_repository(f.repo.id).unwrap().unwrap();
        assert_eq!(stored.default_branch, "trunk");
        assert_eq!(stored.size, 2 * SIZE_SCALE);
        assert_eq!(f.audit.events(), vec![AuditEvent::ChangesPush]);
    }

    #[tokio::test]
    async fn test_upload_pack_enqueues_usage() {
        let f = fixture(Some(Role::Reader), FakeBackend::default());

        let code = f
            .gateway
            .execute(
                f.identity,
                "git-upload-pack 'alice/repo.git'",
                "10.0.0.1:5000",
                tokio::io::empty(),
                tokio::io::sink(),
                tokio::io::sink(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(code, 0);
        let requests = f.backend.requests.lock().unwrap();
        assert_eq!(requests[0].1.identity, None);

        let tasks = f.store.list_unlocked_tasks().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].repo_id, f.repo.id);
        assert_eq!(tasks[0].user_id, f.identity.owner_id);
    }

    #[tokio::test]
    async fn test_reader_cannot_push() {
        let f = fixture(Some(Role::Reader), FakeBackend::default());
        let stderr = Recorder::default();

        let code = f
            .gateway
            .execute(
                f.identity,
                "git-receive-pack 'alice/repo.git'",
                "10.0.0.1:5000",
                tokio::io::empty(),
                tokio::io::sink(),
                stderr.clone(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(code, 1);
        assert!(f.backend.requests.lock().unwrap().is_empty());
        assert_eq!(*stderr.0.lock().unwrap(), ACCESS_DENIED);
    }

    #[tokio::test]
    async fn test_missing_repo_and_bad_command_look_the_same() {
        let f = fixture(Some(Role::Owner), FakeBackend::default());

        for command in ["git-upload-pack 'alice/nope.git'", "rm -rf /"] {
            let stderr = Recorder::default();
            let code = f
                .gateway
                .execute(
                    f.identity,
                    command,
                    "10.0.0.1:5000",
                    tokio::io::empty(),
                    tokio::io::sink(),
                    stderr.clone(),
                    &CancellationToken::new(),
                )
                .await;
            assert_eq!(code, 1);
            assert_eq!(*stderr.0.lock().unwrap(), ACCESS_DENIED);
        }
    }

    #[tokio::test]
    async fn test_stream_failure_reports_on_stderr() {
        let backend = FakeBackend {
            fail_open: true,
            ..FakeBackend::default()
        };
        let f = fixture(Some(Role::Reader), backend);
        let stderr = Recorder::default();

        let code = f
            .gateway
            .execute(
                f.identity,
                "git-upload-pack 'alice/repo.git'",
                "10.0.0.1:5000",
                tokio::io::empty(),
                tokio::io::sink(),
                stderr.clone(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(code, 1);
        let message = String::from_utf8(stderr.0.lock().unwrap().clone()).unwrap();
        assert!(message.starts_with("Failed to create stream:"));
        assert!(f.store.list_unlocked_tasks().unwrap().is_empty());
    }

    #[test]
    fn test_authenticate_records_outcome() {
        let f = fixture(None, FakeBackend::default());

        let ok = f
            .gateway
            .authenticate("git", &OfferedKey::Plain(sample_key(1)), "10.0.0.1:5000")
            .unwrap();
        assert_eq!(ok, Some(f.identity));
        let denied = f
            .gateway
            .authenticate("root", &OfferedKey::Plain(sample_key(1)), "10.0.0.1:5000")
            .unwrap();
        assert_eq!(denied, None);

        let records = f.audit.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].to_json()["status"], "success");
        assert_eq!(records[1].to_json()["status"], "failure");
    }
}
