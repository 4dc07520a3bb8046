use chrono::Utc;

use super::{CredentialHasher, parse_token};
use crate::store::DirectoryStore;
use crate::types::{Token, User};

#[derive(Debug)]
pub enum TokenValidationError {
    InvalidScheme,
    InvalidToken,
    TokenExpired,
    InternalError,
}

pub struct ValidatedToken {
    pub token: Token,
    pub user: Option<User>,
}

/// Extracts a token string from a Basic auth header.
/// Expects format: Basic base64(x-token:actual_token)
pub fn extract_basic_auth_token(header: &str) -> Option<String> {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;

    let (username, password) = credentials.split_once(':')?;

    if username != "x-token" {
        return None;
    }

    Some(password.to_string())
}

/// Validates a raw token string against the store.
/// Returns the validated token and its user, if it belongs to one. Tokens of
/// inactive users are rejected.
pub fn validate_token(
    directory: &dyn DirectoryStore,
    hasher: &CredentialHasher,
    raw_token: &str,
) -> Result<ValidatedToken, TokenValidationError> {
    let (lookup, _secret) = parse_token(raw_token).map_err(|_| TokenValidationError::InvalidToken)?;

    let token = directory
        .get_token_by_lookup(&lookup)
        .map_err(|_| TokenValidationError::InternalError)?
        .ok_or(TokenValidationError::InvalidToken)?;

    if !hasher
        .verify(raw_token, &token.token_hash)
        .map_err(|_| TokenValidationError::InternalError)?
    {
        return Err(TokenValidationError::InvalidToken);
    }

    if let Some(expires_at) = &token.expires_at {
        if expires_at < &Utc::now() {
            return Err(TokenValidationError::TokenExpired);
        }
    }

    let user = match token.user_id {
        Some(user_id) => Some(
            directory
                .get_user(user_id)
                .map_err(|_| TokenValidationError::InternalError)?
                .filter(|u| u.is_active)
                .ok_or(TokenValidationError::InvalidToken)?,
        ),
        None => None,
    };

    if let Err(e) = directory.update_token_last_used(&token.id) {
        tracing::warn!("Failed to update token last_used_at: {e}");
    }

    Ok(ValidatedToken { token, user })
}

/// Extracts token from Authorization header (Bearer or Basic).
/// Returns None if no auth header is present.
/// Returns Some(token_string) if auth header is present and valid format.
/// Returns Err if the auth scheme is unsupported.
pub fn extract_token_from_header(
    auth_header: Option<&str>,
) -> Result<Option<String>, TokenValidationError> {
    let Some(header) = auth_header else {
        return Ok(None);
    };
    if let Some(token) = header.strip_prefix("Bearer ") {
        return Ok(Some(token.to_string()));
    }
    if header.starts_with("Basic ") {
        return extract_basic_auth_token(header)
            .ok_or(TokenValidationError::InvalidToken)
            .map(Some);
    }
    Err(TokenValidationError::InvalidScheme)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{open_store, user};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    fn issue(store: &dyn DirectoryStore, hasher: &CredentialHasher, user_id: Option<i64>) -> String {
        let (raw, lookup, hash) = hasher.generate_token().unwrap();
        store
            .create_token(&Token {
                id: uuid::Uuid::new_v4().to_string(),
                token_hash: hash,
                token_lookup: lookup,
                is_admin: user_id.is_none(),
                user_id,
                created_at: Utc::now(),
                expires_at: None,
                last_used_at: None,
            })
            .unwrap();
        raw
    }

    #[test]
    fn test_header_schemes() {
        assert!(extract_token_from_header(None).unwrap().is_none());
        assert_eq!(
            extract_token_from_header(Some("Bearer abc")).unwrap().as_deref(),
            Some("abc")
        );
        let basic = format!("Basic {}", STANDARD.encode("x-token:abc"));
        assert_eq!(
            extract_token_from_header(Some(&basic)).unwrap().as_deref(),
            Some("abc")
        );
        let wrong_user = format!("Basic {}", STANDARD.encode("bob:abc"));
        assert!(matches!(
            extract_token_from_header(Some(&wrong_user)),
            Err(TokenValidationError::InvalidToken)
        ));
        assert!(matches!(
            extract_token_from_header(Some("Digest x")),
            Err(TokenValidationError::InvalidScheme)
        ));
    }

    #[test]
    fn test_user_token_resolves_active_user() {
        let (_temp, store) = open_store();
        let hasher = CredentialHasher::new();
        let alice = user(&store, "alice");
        let raw = issue(&store, &hasher, Some(alice.id));

        let validated = validate_token(&store, &hasher, &raw).unwrap();
        assert_eq!(validated.user.map(|u| u.id), Some(alice.id));

        store.set_user_active(alice.id, false).unwrap();
        assert!(matches!(
            validate_token(&store, &hasher, &raw),
            Err(TokenValidationError::InvalidToken)
        ));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let (_temp, store) = open_store();
        let hasher = CredentialHasher::new();
        let raw = issue(&store, &hasher, None);

        let mut tampered = raw.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '0' { '1' } else { '0' });
        assert!(matches!(
            validate_token(&store, &hasher, &tampered),
            Err(TokenValidationError::InvalidToken)
        ));
        assert!(validate_token(&store, &hasher, &raw).unwrap().user.is_none());
    }
}
