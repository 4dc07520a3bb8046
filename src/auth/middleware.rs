use std::sync::Arc;

use axum::{
    Json,
    extract::FromRequestParts,
    http::{HeaderValue, StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use serde_json::json;

use super::helpers::{TokenValidationError, ValidatedToken, extract_token_from_header, validate_token};
use crate::audit::Doer;
use crate::server::AppState;
use crate::server::trace::TraceContext;
use crate::types::{Token, User};

/// Extractor that requires any valid authentication
pub struct RequireAuth {
    pub token: Token,
    pub user: Option<User>,
    pub remote: Option<String>,
}

/// Extractor that requires admin authentication
pub struct RequireAdmin {
    pub token: Token,
    pub remote: Option<String>,
}

/// Extractor that requires user authentication (non-admin token with user_id)
pub struct RequireUser {
    pub token: Token,
    pub user: User,
    pub remote: Option<String>,
}

/// Extractor for routes open to anonymous callers. A present but invalid
/// token is still rejected.
pub struct MaybeUser {
    pub user: Option<User>,
    pub remote: Option<String>,
}

impl RequireAdmin {
    #[must_use]
    pub fn doer(&self) -> Doer {
        Doer {
            name: Some("admin".to_string()),
            id: Some(self.token.id.clone()),
            remote_address: self.remote.clone(),
        }
    }
}

impl RequireAuth {
    #[must_use]
    pub fn doer(&self) -> Doer {
        match &self.user {
            Some(user) => Doer::user(&user.name, user.id, self.remote.clone()),
            None => Doer {
                name: Some("admin".to_string()),
                id: Some(self.token.id.clone()),
                remote_address: self.remote.clone(),
            },
        }
    }
}

impl RequireUser {
    #[must_use]
    pub fn doer(&self) -> Doer {
        Doer::user(&self.user.name, self.user.id, self.remote.clone())
    }
}

impl MaybeUser {
    #[must_use]
    pub fn doer(&self) -> Doer {
        match &self.user {
            Some(user) => Doer::user(&user.name, user.id, self.remote.clone()),
            None => Doer::anonymous(self.remote.clone()),
        }
    }
}

#[derive(Debug)]
pub enum AuthError {
    MissingAuth,
    InvalidScheme,
    InvalidToken,
    TokenExpired,
    NotAdmin,
    NotUser,
    InternalError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InvalidScheme => (StatusCode::UNAUTHORIZED, "Invalid authorization scheme"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token"),
            AuthError::TokenExpired => (StatusCode::UNAUTHORIZED, "Token expired"),
            AuthError::NotAdmin => (StatusCode::FORBIDDEN, "Admin access required"),
            AuthError::NotUser => (
                StatusCode::FORBIDDEN,
                "User token required for this operation",
            ),
            AuthError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = json!({ "data": null, "error": message });

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                "WWW-Authenticate",
                HeaderValue::from_static("Bearer realm=\"tenantgate\""),
            );
        }

        response
    }
}

impl From<TokenValidationError> for AuthError {
    fn from(err: TokenValidationError) -> Self {
        match err {
            TokenValidationError::InvalidScheme => AuthError::InvalidScheme,
            TokenValidationError::InvalidToken => AuthError::InvalidToken,
            TokenValidationError::TokenExpired => AuthError::TokenExpired,
            TokenValidationError::InternalError => AuthError::InternalError,
        }
    }
}

impl FromRequestParts<Arc<AppState>> for RequireAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let validated = authenticate(parts, state)?.ok_or(AuthError::MissingAuth)?;
        Ok(RequireAuth {
            token: validated.token,
            user: validated.user,
            remote: remote_of(parts),
        })
    }
}

impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let validated = authenticate(parts, state)?.ok_or(AuthError::MissingAuth)?;

        if !validated.token.is_admin {
            return Err(AuthError::NotAdmin);
        }

        Ok(RequireAdmin {
            token: validated.token,
            remote: remote_of(parts),
        })
    }
}

impl FromRequestParts<Arc<AppState>> for RequireUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let validated = authenticate(parts, state)?.ok_or(AuthError::MissingAuth)?;

        if validated.token.is_admin {
            return Err(AuthError::NotUser);
        }
        let user = validated.user.ok_or(AuthError::NotUser)?;

        Ok(RequireUser {
            token: validated.token,
            user,
            remote: remote_of(parts),
        })
    }
}

impl FromRequestParts<Arc<AppState>> for MaybeUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = authenticate(parts, state)?.and_then(|v| v.user);
        Ok(MaybeUser {
            user,
            remote: remote_of(parts),
        })
    }
}

fn remote_of(parts: &Parts) -> Option<String> {
    parts
        .extensions
        .get::<TraceContext>()
        .and_then(|ctx| ctx.remote.clone())
}

/// `Ok(None)` when no credentials were sent. Records the identity for the
/// access log when the token belongs to a user.
fn authenticate(
    parts: &Parts,
    state: &Arc<AppState>,
) -> Result<Option<ValidatedToken>, AuthError> {
    let auth_header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let Some(raw_token) = extract_token_from_header(auth_header)? else {
        return Ok(None);
    };

    let validated = validate_token(state.directory.as_ref(), &state.hasher, &raw_token)?;

    if let Some(ctx) = parts.extensions.get::<TraceContext>() {
        match &validated.user {
            Some(user) => ctx.set_identity(&user.name),
            None if validated.token.is_admin => ctx.set_identity("admin"),
            None => {}
        }
    }
    Ok(Some(validated))
}
