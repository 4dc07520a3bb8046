use tracing::{debug, error, info};

use super::backend::RepoBackend;
use crate::error::Result;
use crate::store::DirectoryStore;
use crate::types::Repository;

/// Backend sizes are megabytes; the stored size is scaled by this factor.
pub const SIZE_SCALE: i64 = 1024;

/// Converges HEAD and the stored default branch after a push that left the
/// repository with exactly one branch. Returns whether anything was done.
pub async fn finalize_push(
    backend: &dyn RepoBackend,
    directory: &dyn DirectoryStore,
    repo: &Repository,
) -> Result<bool> {
    let path = repo.relative_path();
    let branches = backend.list_branches(&path).await?;
    if branches.len() != 1 {
        debug!(
            "Skipping finalize for {}: {} branches",
            path,
            branches.len()
        );
        return Ok(false);
    }

    let branch = backend.default_branch(&path).await.inspect_err(|e| {
        error!("Failed to read default branch of {}: {}", path, e);
    })?;

    backend.set_head(&path, &branch).await.inspect_err(|e| {
        error!("Failed to set HEAD of {} to {}: {}", path, branch, e);
    })?;

    directory
        .update_repository_default_branch(repo.id, &branch)
        .inspect_err(|e| {
            error!("Failed to persist default branch of repo {}: {}", repo.id, e);
        })?;

    let size_mb = backend.repository_size(&path).await.inspect_err(|e| {
        error!("Failed to read size of {}: {}", path, e);
    })?;
    directory
        .update_repository_size(repo.id, size_mb.saturating_mul(SIZE_SCALE))
        .inspect_err(|e| {
            error!("Failed to persist size of repo {}: {}", repo.id, e);
        })?;

    info!("Finalized push to {}: default branch {}", path, branch);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::backend::test_support::commit_on_branch;
    use crate::ssh::backend::LocalBackend;
    use crate::store::{NewRepository, SqliteStore};
    use crate::types::Visibility;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SqliteStore, LocalBackend, Repository) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        let org = store.create_organization("alice", Visibility::Limited).unwrap();
        let (repo, _) = store
            .create_repository(&NewRepository {
                owner: &org,
                name: "repo",
                default_branch: "main",
                is_private: true,
            })
            .unwrap();
        let backend = LocalBackend::new(temp.path().join("repos"));
        (temp, store, backend, repo)
    }

    #[tokio::test]
    async fn test_single_branch_converges() {
        let (temp, store, backend, repo) = setup();
        backend
            .create_repository(&repo.relative_path(), "main")
            .await
            .unwrap();
        commit_on_branch(&temp.path().join("repos").join(repo.relative_path()), "trunk");

        assert!(finalize_push(&backend, &store, &repo).await.unwrap());

        let stored = store.get_repository(repo.id).unwrap().unwrap();
        assert_eq!(stored.default_branch, "trunk");
        assert_eq!(
            backend.default_branch(&repo.relative_path()).await.unwrap(),
            "trunk"
        );
    }

    #[tokio::test]
    async fn test_multiple_branches_left_alone() {
        let (temp, store, backend, repo) = setup();
        backend
            .create_repository(&repo.relative_path(), "main")
            .await
            .unwrap();
        let path = temp.path().join("repos").join(repo.relative_path());
        commit_on_branch(&path, "one");
        commit_on_branch(&path, "two");

        assert!(!finalize_push(&backend, &store, &repo).await.unwrap());
        let stored = store.get_repository(repo.id).unwrap().unwrap();
        assert_eq!(stored.default_branch, "main");
    }
}
