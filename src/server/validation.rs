use crate::config::AvatarSettings;
use crate::server::response::ApiError;
use crate::types::Visibility;

const MAX_PROJECT_NAME_LEN: usize = 40;
const MAX_REPO_NAME_LEN: usize = 100;
const MAX_USER_NAME_LEN: usize = 40;
const MAX_EMAIL_LEN: usize = 254;
const MAX_BRANCH_NAME_LEN: usize = 255;

fn is_valid_name_char(c: char, allow_period: bool) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || (allow_period && c == '.')
}

fn validate_name(
    name: &str,
    entity: &str,
    max_len: usize,
    allow_period: bool,
    forbid_leading_special: bool,
) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{entity} name cannot be empty"));
    }
    if name.len() > max_len {
        return Err(format!("{entity} name cannot exceed {max_len} characters"));
    }
    if !name.chars().all(|c| is_valid_name_char(c, allow_period)) {
        let mut allowed = "alphanumeric characters, hyphens, and underscores".to_string();
        if allow_period {
            allowed.push_str(", and periods");
        }
        return Err(format!("{entity} name can only contain {allowed}"));
    }
    if forbid_leading_special && (name.starts_with('-') || name.starts_with('_')) {
        return Err(format!(
            "{entity} name cannot start with a hyphen or underscore"
        ));
    }
    Ok(())
}

pub fn validate_project_name(name: &str) -> Result<(), ApiError> {
    validate_name(name, "Project", MAX_PROJECT_NAME_LEN, false, true).map_err(ApiError::bad_request)
}

pub fn validate_team_name(name: &str) -> Result<(), ApiError> {
    validate_name(name, "Team", MAX_PROJECT_NAME_LEN, true, true).map_err(ApiError::bad_request)
}

pub fn validate_repo_name(name: &str) -> Result<(), ApiError> {
    validate_name(name, "Repository", MAX_REPO_NAME_LEN, true, false)
        .and_then(|()| {
            if name == "." || name == ".." || name.ends_with(".git") {
                Err("Repository name is reserved".to_string())
            } else {
                Ok(())
            }
        })
        .map_err(ApiError::bad_request)
}

pub fn validate_user_name(name: &str) -> Result<(), ApiError> {
    validate_name(name, "User", MAX_USER_NAME_LEN, true, true).map_err(ApiError::bad_request)
}

/// Parses a visibility string. `public` is refused while role mode is on.
pub fn validate_visibility(value: &str, role_mode_enabled: bool) -> Result<Visibility, ApiError> {
    let visibility = Visibility::parse(value).ok_or_else(|| {
        ApiError::bad_request(format!(
            "Invalid visibility '{value}': expected public, limited or private"
        ))
    })?;
    if role_mode_enabled && visibility == Visibility::Public {
        return Err(ApiError::bad_request(
            "Public projects are not allowed in role mode",
        ));
    }
    Ok(visibility)
}

/// Git ref-name rules for a branch short name.
pub fn validate_branch_name(name: &str) -> Result<(), ApiError> {
    let invalid = |reason: &str| ApiError::bad_request(format!("Invalid branch name '{name}': {reason}"));

    if name.is_empty() || name.len() > MAX_BRANCH_NAME_LEN {
        return Err(invalid("bad length"));
    }
    if name == "@" || name.starts_with('-') || name.starts_with('/') || name.ends_with('/') {
        return Err(invalid("bad start or end"));
    }
    if name.ends_with('.') || name.ends_with(".lock") {
        return Err(invalid("bad suffix"));
    }
    if name.contains("..") || name.contains("//") || name.contains("@{") {
        return Err(invalid("forbidden sequence"));
    }
    if name
        .chars()
        .any(|c| c.is_control() || c == ' ' || "~^:?*[\\".contains(c))
    {
        return Err(invalid("forbidden character"));
    }
    if name.split('/').any(|part| part.starts_with('.')) {
        return Err(invalid("component starts with a period"));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), ApiError> {
    let invalid = || ApiError::bad_request(format!("Invalid email '{email}'"));

    if email.len() > MAX_EMAIL_LEN || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(invalid());
    }
    Ok(())
}

pub fn validate_avatar_dimensions(
    width: u32,
    height: u32,
    limits: &AvatarSettings,
) -> Result<(), ApiError> {
    if width == 0 || height == 0 {
        return Err(ApiError::bad_request("Avatar image is empty"));
    }
    if width > limits.max_width || height > limits.max_height {
        return Err(ApiError::bad_request(format!(
            "Avatar image is too large: {width}x{height} exceeds {}x{}",
            limits.max_width, limits.max_height
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_names() {
        assert!(validate_project_name("alpha-1").is_ok());
        assert!(validate_project_name("").is_err());
        assert!(validate_project_name("-alpha").is_err());
        assert!(validate_project_name("al.pha").is_err());
        assert!(validate_project_name(&"a".repeat(41)).is_err());
        assert!(validate_team_name("core.devs").is_ok());
        assert!(validate_team_name("_core").is_err());
    }

    #[test]
    fn test_repo_names() {
        assert!(validate_repo_name("my.repo").is_ok());
        assert!(validate_repo_name("..").is_err());
        assert!(validate_repo_name("repo.git").is_err());
        assert!(validate_repo_name("a/b").is_err());
    }

    #[test]
    fn test_visibility() {
        assert_eq!(validate_visibility("limited", true).unwrap(), Visibility::Limited);
        assert!(validate_visibility("public", true).is_err());
        assert_eq!(validate_visibility("public", false).unwrap(), Visibility::Public);
        assert!(validate_visibility("secret", false).is_err());
    }

    #[test]
    fn test_branch_names() {
        for ok in ["main", "feature/login", "release-1.2"] {
            assert!(validate_branch_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", "-x", "a..b", "a b", "x.lock", "a//b", "x@{1}", "a/.hidden", "a:b", "dir/"] {
            assert!(validate_branch_name(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_emails() {
        assert!(validate_email("alice@example.com").is_ok());
        for bad in ["alice", "@example.com", "a@b", "a@@b.com", "a b@c.com", "a@b..com"] {
            assert!(validate_email(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_avatar_limits() {
        let limits = AvatarSettings {
            max_width: 100,
            max_height: 50,
        };
        assert!(validate_avatar_dimensions(100, 50, &limits).is_ok());
        assert!(validate_avatar_dimensions(101, 50, &limits).is_err());
        assert!(validate_avatar_dimensions(0, 10, &limits).is_err());
    }
}
