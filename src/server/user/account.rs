use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditRecord, Doer};
use crate::auth::{MaybeUser, RequireAuth};
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::{SignInRequest, SignInResponse, SignUpRequest, UserResponse};
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};
use crate::server::validation::{validate_email, validate_user_name};
use crate::types::{NewUser, Token, User};

fn invalid_credentials() -> ApiError {
    ApiError::unauthorized("Invalid login or password")
}

pub async fn sign_up(
    caller: MaybeUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignUpRequest>,
) -> impl IntoResponse {
    validate_user_name(&req.name)?;
    validate_email(&req.email)?;
    state.password_policy.check(&req.password)?;

    let doer = caller.doer();
    let failed = |e: &Error| {
        state.audit.record(
            AuditRecord::failure(AuditEvent::UserCreate, &doer, e.to_string())
                .param("name", &req.name)
                .param("email", &req.email),
        );
    };

    // The provider owns the password when it is enabled.
    let password_hash = match &state.keycloak {
        Some(keycloak) => {
            keycloak
                .create_user(&req.name, &req.email, &req.password)
                .await
                .inspect_err(failed)?;
            None
        }
        None => Some(
            state
                .hasher
                .hash(&req.password)
                .api_err("Failed to hash password")?,
        ),
    };

    let user = state
        .directory
        .create_user(&NewUser {
            name: req.name.clone(),
            email: req.email.clone(),
            external_id: Uuid::new_v4().to_string(),
            password_hash,
            is_admin: false,
        })
        .inspect_err(failed)?;

    state.audit.record(
        AuditRecord::success(AuditEvent::UserCreate, &doer)
            .param("user_id", user.id.to_string())
            .param("name", &user.name),
    );
    info!("Registered user {}", user.name);

    Ok::<_, ApiError>((
        StatusCode::CREATED,
        Json(ApiResponse::success(UserResponse::from(user))),
    ))
}

async fn check_password(state: &AppState, user: &User, password: &str) -> Result<(), ApiError> {
    if let Some(keycloak) = &state.keycloak {
        return match keycloak.user_token(&user.name, password).await {
            Ok(_) => Ok(()),
            Err(Error::ExternalAuthStatus(400 | 401)) => Err(invalid_credentials()),
            Err(e) => Err(e.into()),
        };
    }

    let Some(hash) = &user.password_hash else {
        return Err(invalid_credentials());
    };
    if state
        .hasher
        .verify(password, hash)
        .api_err("Failed to verify password")?
    {
        Ok(())
    } else {
        Err(invalid_credentials())
    }
}

/// Verifies credentials and issues a user API token.
pub async fn sign_in(
    caller: MaybeUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignInRequest>,
) -> impl IntoResponse {
    let user = state
        .directory
        .get_user_by_login(&req.login)?
        .filter(|u| u.is_active);

    let checked = match user {
        Some(user) => check_password(&state, &user, &req.password)
            .await
            .map(|()| user),
        None => Err(invalid_credentials()),
    };
    let user = match checked {
        Ok(user) => user,
        Err(e) => {
            warn!("Sign-in failed for {}: {}", req.login, e.message);
            state.audit.record(
                AuditRecord::failure(AuditEvent::UserLogin, &caller.doer(), e.message.clone())
                    .param("login", &req.login),
            );
            return Err(e);
        }
    };

    let (raw, lookup, hash) = state
        .hasher
        .generate_token()
        .api_err("Failed to generate token")?;
    let token = Token {
        id: Uuid::new_v4().to_string(),
        token_hash: hash,
        token_lookup: lookup,
        is_admin: false,
        user_id: Some(user.id),
        created_at: Utc::now(),
        expires_at: None,
        last_used_at: None,
    };
    state
        .directory
        .create_token(&token)
        .api_err("Failed to store token")?;

    let doer = Doer::user(&user.name, user.id, caller.remote.clone());
    state.audit.record(AuditRecord::success(AuditEvent::UserLogin, &doer));

    Ok(Json(ApiResponse::success(SignInResponse {
        token: raw,
        user: UserResponse::from(user),
    })))
}

/// Revokes the token the request was made with.
pub async fn sign_out(auth: RequireAuth, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state
        .directory
        .delete_token(&auth.token.id)
        .api_err("Failed to revoke token")?;

    state
        .audit
        .record(AuditRecord::success(AuditEvent::UserLogout, &auth.doer()));

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}
