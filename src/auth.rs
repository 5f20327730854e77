//! Authenticated session provider.
//!
//! Holds one Google access token for the whole process and refreshes it
//! from the stored refresh token when it is about to expire. The OAuth
//! grant itself happens outside this program; only the refresh exchange
//! lives here.

use chrono::{DateTime, Duration, Utc};
use derive_more::derive::Display;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::{
    error::{AppError, AppResult},
    HttpClient,
};

/// Refresh the token this many seconds before it actually expires.
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, Display)]
pub enum AuthError {
    ExpiredOrRevoked,
    BadOauthResponse,
    #[display("unexpected oauth error: {_0}")]
    Unexpected(String),
}

impl std::error::Error for AuthError {}

#[derive(Debug, Deserialize)]
struct RefreshTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct TokenState {
    access_token: String,
    expires_at: DateTime<Utc>,
}

pub struct SessionProvider {
    http_client: HttpClient,
    token_uri: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    state: Mutex<Option<TokenState>>,
}

impl SessionProvider {
    pub fn new(http_client: HttpClient) -> Self {
        use crate::app_config::cfg;

        Self {
            http_client,
            token_uri: cfg.google.client.token_uri.clone(),
            client_id: cfg.google.client.client_id.clone(),
            client_secret: cfg.google.client.client_secret.clone(),
            refresh_token: cfg.google.refresh_token.clone(),
            state: Mutex::new(None),
        }
    }

    #[cfg(test)]
    pub fn with_credentials(
        http_client: HttpClient,
        token_uri: &str,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Self {
        Self {
            http_client,
            token_uri: token_uri.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            refresh_token: refresh_token.to_string(),
            state: Mutex::new(None),
        }
    }

    /// A provider whose cached token never expires. No refresh traffic.
    #[cfg(test)]
    pub fn with_static_token(token: &str) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            token_uri: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            state: Mutex::new(Some(TokenState {
                access_token: token.to_string(),
                expires_at: Utc::now() + Duration::days(365),
            })),
        }
    }

    /// Returns a valid access token, exchanging the refresh token first
    /// when fewer than [`EXPIRY_SKEW_SECS`] of validity remain.
    pub async fn access_token(&self) -> AppResult<String> {
        let mut state = self.state.lock().await;

        if let Some(current) = state.as_ref() {
            if current.expires_at - Utc::now() > Duration::seconds(EXPIRY_SKEW_SECS) {
                return Ok(current.access_token.clone());
            }
        }

        let resp = self.exchange_refresh_token().await.map_err(|e| {
            if matches!(e, AuthError::ExpiredOrRevoked) {
                tracing::error!("Refresh token expired or revoked; re-authentication required");
            }
            AppError::Oauth2(e)
        })?;

        let expires_at = Utc::now() + Duration::seconds(resp.expires_in as i64);
        tracing::debug!("Refreshed access token, valid until {}", expires_at);
        *state = Some(TokenState {
            access_token: resp.access_token.clone(),
            expires_at,
        });

        Ok(resp.access_token)
    }

    async fn exchange_refresh_token(&self) -> Result<RefreshTokenResponse, AuthError> {
        let resp = self
            .http_client
            .post(&self.token_uri)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Error refreshing token: {:?}", e);
                AuthError::BadOauthResponse
            })?;

        let resp = resp.json::<serde_json::Value>().await.map_err(|e| {
            tracing::error!("Unexpected serde error: {:?}", e);
            AuthError::Unexpected(e.to_string())
        })?;

        if resp.get("error").is_some() {
            match resp.get("error_description").and_then(|d| d.as_str()) {
                Some("Token has been expired or revoked.") => {
                    return Err(AuthError::ExpiredOrRevoked);
                }
                Some(desc) => {
                    tracing::error!("Unexpected error refreshing token: {:?}", desc);
                    return Err(AuthError::Unexpected(desc.to_string()));
                }
                None => {
                    tracing::error!("Unknown error refreshing token: {:?}", resp);
                    return Err(AuthError::Unexpected(resp.to_string()));
                }
            };
        }

        let resp = serde_json::from_value::<RefreshTokenResponse>(resp.clone()).map_err(|_| {
            tracing::error!("Unexpected oauth2 token response: {:?}", resp);
            AuthError::BadOauthResponse
        })?;

        Ok(resp)
    }
}
