//! Client for the external account provider.
//!
//! The admin token is shared by the whole process and refreshed lazily under
//! a mutex, so concurrent callers never race two refreshes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::KeycloakSettings;
use crate::error::{Error, Result};

/// Seconds subtracted from a token's lifetime before it counts as expired.
pub const TOKEN_SKEW_SECS: i64 = 5;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: TokenResponse,
    created: DateTime<Utc>,
}

/// True once `created + expires_in - skew` is at or before `now`.
#[must_use]
pub fn expired(created: DateTime<Utc>, expires_in: i64, now: DateTime<Utc>) -> bool {
    created.timestamp() + expires_in - TOKEN_SKEW_SECS - now.timestamp() <= 0
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewRemoteUser<'a> {
    enabled: bool,
    email_verified: bool,
    username: &'a str,
    email: &'a str,
    credentials: [RemoteCredentials<'a>; 1],
}

#[derive(Serialize)]
struct RemoteCredentials<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
    temporary: bool,
}

pub struct KeycloakClient {
    http: reqwest::Client,
    settings: KeycloakSettings,
    token: Mutex<Option<CachedToken>>,
}

impl KeycloakClient {
    pub fn new(settings: KeycloakSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::ExternalAuthRequest(e.to_string()))?;
        Ok(Self {
            http,
            settings,
            token: Mutex::new(None),
        })
    }

    fn token_url(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/token",
            self.settings.url.trim_end_matches('/'),
            self.settings.realm
        )
    }

    fn users_url(&self) -> String {
        format!(
            "{}/admin/realms/{}/users",
            self.settings.url.trim_end_matches('/'),
            self.settings.realm
        )
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(self.token_url())
            .form(form)
            .send()
            .await
            .map_err(|e| Error::ExternalAuthRequest(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            debug!("Account provider token request failed with {}", status);
            return Err(Error::ExternalAuthStatus(status.as_u16()));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::ExternalAuthRequest(e.to_string()))
    }

    /// Admin access token, refreshed through the client-credentials grant
    /// when the cached one has expired.
    pub async fn current_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if !expired(cached.created, cached.token.expires_in, Utc::now()) {
                return Ok(cached.token.access_token.clone());
            }
            debug!("Admin token expired, refreshing");
        }

        let token = self
            .request_token(&[
                ("grant_type", "client_credentials"),
                ("client_id", &self.settings.master_client_id),
                ("client_secret", &self.settings.master_client_secret),
            ])
            .await?;
        let access = token.access_token.clone();
        *guard = Some(CachedToken {
            token,
            created: Utc::now(),
        });
        Ok(access)
    }

    /// Password grant against the realm client. Used by sign-in.
    pub async fn user_token(&self, login: &str, password: &str) -> Result<TokenResponse> {
        self.request_token(&[
            ("grant_type", "password"),
            ("client_id", &self.settings.realm_client_id),
            ("client_secret", &self.settings.realm_client_secret),
            ("username", login),
            ("password", password),
        ])
        .await
    }

    /// Registers the account in the realm. The provider answers 201.
    pub async fn create_user(&self, username: &str, email: &str, password: &str) -> Result<()> {
        let token = self.current_token().await?;
        let body = NewRemoteUser {
            enabled: true,
            email_verified: false,
            username,
            email,
            credentials: [RemoteCredentials {
                kind: "password",
                value: password,
                temporary: false,
            }],
        };

        let response = self
            .http
            .post(self.users_url())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ExternalAuthRequest(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::CREATED {
            warn!(
                "Account provider rejected user {} with status {}",
                username, status
            );
            return Err(Error::ExternalAuthStatus(status.as_u16()));
        }
        Ok(())
    }
}
