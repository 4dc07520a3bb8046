//! Repository storage behind the SSH gateway.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use async_trait::async_trait;
use git2::{BranchType, Repository};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tracing::debug;

use super::command::GitService;
use crate::error::{Error, Result};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Identity forwarded with `receive-pack` so hooks know who pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushIdentity {
    /// Acting user id (the key owner).
    pub gl_id: String,
    /// Repository short name.
    pub gl_repository: String,
    /// Owner name.
    pub gl_username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// `<owner>/<repo>.git` relative to the backend root.
    pub repo_path: String,
    pub identity: Option<PushIdentity>,
}

pub type Completion = Pin<Box<dyn Future<Output = Result<i32>> + Send>>;

/// An open bidirectional git protocol stream.
pub struct BackendStream {
    pub stdin: Pin<Box<dyn AsyncWrite + Send>>,
    pub stdout: Pin<Box<dyn AsyncRead + Send>>,
    /// Resolves to the backend's exit status once the stream is done.
    pub completion: Completion,
}

#[async_trait]
pub trait RepoBackend: Send + Sync {
    async fn open_stream(&self, service: GitService, request: StreamRequest)
    -> Result<BackendStream>;

    /// Whether a chunk consisting only of a flush packet (`0000`) must be
    /// withheld from the backend's stdin.
    fn drops_bare_flush(&self) -> bool {
        false
    }

    async fn repository_exists(&self, repo_path: &str) -> Result<bool>;
    async fn create_repository(&self, repo_path: &str, default_branch: &str) -> Result<()>;
    /// Size in megabytes.
    async fn repository_size(&self, repo_path: &str) -> Result<i64>;
    async fn list_branches(&self, repo_path: &str) -> Result<Vec<String>>;
    async fn default_branch(&self, repo_path: &str) -> Result<String>;
    async fn set_head(&self, repo_path: &str, branch: &str) -> Result<()>;
}

/// Bare repositories on local disk, served by the `git` binary.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, repo_path: &str) -> Result<PathBuf> {
        let relative = Path::new(repo_path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            return Err(Error::Validation(format!(
                "invalid repository path: {repo_path}"
            )));
        }
        Ok(self.root.join(relative))
    }

    fn open(&self, repo_path: &str) -> Result<Repository> {
        let path = self.path(repo_path)?;
        Repository::open_bare(&path).map_err(|_| Error::NotFound(format!("repository {repo_path}")))
    }
}

#[async_trait]
impl RepoBackend for LocalBackend {
    async fn open_stream(
        &self,
        service: GitService,
        request: StreamRequest,
    ) -> Result<BackendStream> {
        let path = self.path(&request.repo_path)?;
        if !path.is_dir() {
            return Err(Error::NotFound(format!("repository {}", request.repo_path)));
        }

        let subcommand = service
            .command_name()
            .strip_prefix("git-")
            .unwrap_or(service.command_name());
        let mut cmd = Command::new("git");
        cmd.arg(subcommand).arg(&path);
        if let Some(identity) = &request.identity {
            cmd.env("GL_ID", &identity.gl_id)
                .env("GL_REPOSITORY", &identity.gl_repository)
                .env("GL_USERNAME", &identity.gl_username);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(Error::Io)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Backend("backend stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Backend("backend stdout unavailable".into()))?;
        debug!("Started {} for {}", service.command_name(), request.repo_path);

        Ok(BackendStream {
            stdin: Box::pin(stdin),
            stdout: Box::pin(stdout),
            completion: Box::pin(async move {
                let status = child.wait().await.map_err(Error::Io)?;
                Ok(status.code().unwrap_or(1))
            }),
        })
    }

    async fn repository_exists(&self, repo_path: &str) -> Result<bool> {
        Ok(self.open(repo_path).is_ok())
    }

    async fn create_repository(&self, repo_path: &str, default_branch: &str) -> Result<()> {
        let path = self.path(repo_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(Error::Io)?;
        }

        let repo = Repository::init_bare(&path)?;
        repo.set_head(&format!("refs/heads/{default_branch}"))?;
        Ok(())
    }

    async fn repository_size(&self, repo_path: &str) -> Result<i64> {
        let bytes = dir_size(&self.path(repo_path)?).await?;
        Ok(i64::try_from(bytes / BYTES_PER_MB).unwrap_or(i64::MAX))
    }

    async fn list_branches(&self, repo_path: &str) -> Result<Vec<String>> {
        let repo = self.open(repo_path)?;
        let mut names = Vec::new();
        for branch in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// HEAD's branch when it exists, otherwise the first branch by name.
    async fn default_branch(&self, repo_path: &str) -> Result<String> {
        let head_branch = {
            let repo = self.open(repo_path)?;
            repo.find_reference("HEAD")
                .ok()
                .and_then(|r| r.symbolic_target().map(ToString::to_string))
                .filter(|target| repo.find_reference(target).is_ok())
                .and_then(|target| target.strip_prefix("refs/heads/").map(ToString::to_string))
        };
        if let Some(name) = head_branch {
            return Ok(name);
        }

        self.list_branches(repo_path)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("branches in {repo_path}")))
    }

    async fn set_head(&self, repo_path: &str, branch: &str) -> Result<()> {
        let repo = self.open(repo_path)?;
        repo.set_head(&format!("refs/heads/{branch}"))?;
        Ok(())
    }
}

fn dir_size(path: &Path) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
    Box::pin(async move {
        let metadata = fs::metadata(path).await.map_err(Error::Io)?;
        if metadata.is_file() {
            return Ok(metadata.len());
        }
        if !metadata.is_dir() {
            return Ok(0);
        }

        let mut total = 0;
        let mut entries = fs::read_dir(path).await.map_err(Error::Io)?;
        while let Some(entry) = entries.next_entry().await.map_err(Error::Io)? {
            total += dir_size(&entry.path()).await?;
        }
        Ok(total)
    })
}
