//! Refresh-token exchange with the identity provider

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::error::{SessionError, SessionResult};
use crate::models::{seconds, SessionTokens};
use crate::settings::Settings;

/// Access token lifetime assumed when the provider omits `expires_in`
const DEFAULT_ACCESS_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Tokens returned by a refresh-token grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    /// Present only when the provider rotates refresh tokens
    pub refresh_token: Option<String>,
}

impl From<RefreshedTokens> for SessionTokens {
    fn from(tokens: RefreshedTokens) -> Self {
        Self {
            access_token: tokens.access_token,
            access_token_expires_at: tokens.expires_at,
            refresh_token: tokens.refresh_token,
        }
    }
}

/// Identity provider collaborator used by the session manager
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange `refresh_token` for a new access token at `provider`
    ///
    /// # Errors
    ///
    /// Returns `IdentityProvider` if the provider is unknown, unreachable or
    /// rejects the grant
    async fn refresh(&self, provider: &str, refresh_token: &str) -> SessionResult<RefreshedTokens>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
}

#[derive(Debug, Clone)]
struct TokenEndpoint {
    url: Url,
    client_id: String,
    client_secret: Option<String>,
}

/// [`TokenRefresher`] posting `grant_type=refresh_token` to each provider's
/// configured token endpoint
#[derive(Debug, Clone)]
pub struct HttpTokenRefresher {
    http_client: reqwest::Client,
    endpoints: HashMap<String, TokenEndpoint>,
}

impl HttpTokenRefresher {
    /// Build from the enabled providers that declare a token endpoint
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a token endpoint is not a valid URL or a
    /// provider has no client id
    pub fn from_settings(settings: &Settings) -> SessionResult<Self> {
        let mut endpoints = HashMap::new();
        for provider in settings.providers.iter().filter(|p| p.enabled) {
            let Some(token_endpoint) = &provider.token_endpoint else {
                log::debug!("Provider {} has no token endpoint, refresh disabled", provider.name);
                continue;
            };
            let url = Url::parse(token_endpoint).map_err(|e| {
                SessionError::InvalidInput(format!(
                    "token endpoint for provider {}: {e}",
                    provider.name
                ))
            })?;
            let client_id = provider.get_client_id().ok_or_else(|| {
                SessionError::InvalidInput(format!(
                    "client id not configured for provider {}",
                    provider.name
                ))
            })?;
            endpoints.insert(
                provider.name.clone(),
                TokenEndpoint {
                    url,
                    client_id,
                    client_secret: provider.get_client_secret(),
                },
            );
        }

        Ok(Self {
            http_client: reqwest::Client::new(),
            endpoints,
        })
    }

    /// Providers this refresher can serve
    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, provider: &str, refresh_token: &str) -> SessionResult<RefreshedTokens> {
        let endpoint = self.endpoints.get(provider).ok_or_else(|| {
            SessionError::IdentityProvider(format!("no token endpoint configured for {provider}"))
        })?;

        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", endpoint.client_id.as_str()),
        ];
        if let Some(secret) = &endpoint.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        log::debug!("Refreshing access token with provider {provider}");
        let response = self
            .http_client
            .post(endpoint.url.clone())
            .form(&params)
            .send()
            .await
            .map_err(|e| SessionError::IdentityProvider(format!("token refresh request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            log::warn!("Token refresh with {provider} failed with status {status}");
            return Err(SessionError::IdentityProvider(format!(
                "token refresh failed with status {status}: {error_text}"
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| SessionError::IdentityProvider(format!("invalid token response: {e}")))?;

        let lifetime = token_response
            .expires_in
            .unwrap_or(DEFAULT_ACCESS_TOKEN_LIFETIME_SECS);

        Ok(RefreshedTokens {
            access_token: token_response.access_token,
            expires_at: Utc::now() + seconds(lifetime),
            refresh_token: token_response.refresh_token,
        })
    }
}
