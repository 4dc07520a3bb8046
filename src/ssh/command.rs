use crate::error::{Error, Result};
use crate::types::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitService {
    UploadPack,
    UploadArchive,
    ReceivePack,
}

impl GitService {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "git-upload-pack" => Some(Self::UploadPack),
            "git-upload-archive" => Some(Self::UploadArchive),
            "git-receive-pack" => Some(Self::ReceivePack),
            _ => None,
        }
    }

    pub fn command_name(&self) -> &'static str {
        match self {
            Self::UploadPack => "git-upload-pack",
            Self::UploadArchive => "git-upload-archive",
            Self::ReceivePack => "git-receive-pack",
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Self::ReceivePack)
    }

    pub fn required_action(&self) -> Action {
        if self.is_write() {
            Action::Write
        } else {
            Action::Read
        }
    }
}

/// A git command received over SSH, with its repository path normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCommand {
    pub service: GitService,
    /// Lowercased owner (organization) name.
    pub owner: String,
    /// Lowercased repository name without `.git`.
    pub repo: String,
}

impl GitCommand {
    /// `<owner>/<repo>.git`, relative to the repository root.
    #[must_use]
    pub fn repo_path(&self) -> String {
        format!("{}/{}.git", self.owner, self.repo)
    }
}

/// Parses `git-upload-pack '/owner/repo.git'` and its variants.
pub fn parse_command(raw: &str) -> Result<GitCommand> {
    let words = split_words(raw)?;
    let [verb, path] = words.as_slice() else {
        return Err(Error::Validation(format!("unsupported command: {raw}")));
    };

    let service = GitService::from_str(verb)
        .ok_or_else(|| Error::Validation(format!("unsupported command: {verb}")))?;

    let path = path.trim();
    let path = path.strip_prefix('/').unwrap_or(path).to_lowercase();
    let (owner, repo) = path
        .split_once('/')
        .ok_or_else(|| Error::Validation(format!("invalid repository path: {path}")))?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);

    if owner.is_empty() || repo.is_empty() || repo.contains('/') || has_traversal(owner, repo) {
        return Err(Error::Validation(format!("invalid repository path: {path}")));
    }

    Ok(GitCommand {
        service,
        owner: owner.to_string(),
        repo: repo.to_string(),
    })
}

fn has_traversal(owner: &str, repo: &str) -> bool {
    [owner, repo].iter().any(|part| *part == "." || *part == ".." || part.starts_with('.'))
}

/// Splits a command line on whitespace, honoring single and double quotes.
fn split_words(raw: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for c in raw.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if quote.is_some() {
        return Err(Error::Validation("unterminated quote in command".into()));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_service_from_str() {
        assert_eq!(
            GitService::from_str("git-upload-archive"),
            Some(GitService::UploadArchive)
        );
        assert_eq!(GitService::from_str("git-lfs-authenticate"), None);
        assert!(GitService::ReceivePack.is_write());
        assert_eq!(GitService::UploadPack.required_action(), Action::Read);
    }

    #[test]
    fn test_parse_normalizes_path() {
        let cmd = parse_command("git-receive-pack '/Alice/Repo.git'").unwrap();
        assert_eq!(cmd.service, GitService::ReceivePack);
        assert_eq!(cmd.owner, "alice");
        assert_eq!(cmd.repo, "repo");
        assert_eq!(cmd.repo_path(), "alice/repo.git");

        let bare = parse_command("git-upload-pack alice/repo").unwrap();
        assert_eq!(bare.repo_path(), "alice/repo.git");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_command("ls -la").is_err());
        assert!(parse_command("git-upload-pack").is_err());
        assert!(parse_command("git-upload-pack 'noslash'").is_err());
        assert!(parse_command("git-upload-pack '/a/b/c.git'").is_err());
        assert!(parse_command("git-upload-pack '/../etc.git'").is_err());
        assert!(parse_command("git-upload-pack '/alice/repo.git").is_err());
    }
}
