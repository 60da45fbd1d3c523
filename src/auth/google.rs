//! Google OAuth 2.0 authorization-code flow.

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use super::FederatedProfile;
use crate::config::GoogleOAuthConfig;

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("OAuth request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("OAuth provider rejected the request: {0}")]
    Provider(String),
    #[error("OAuth profile is missing a verified email")]
    UnverifiedEmail,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct UserInfo {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    name: String,
}

pub struct GoogleOAuth {
    client: Client,
    config: GoogleOAuthConfig,
}

impl GoogleOAuth {
    pub fn new(config: GoogleOAuthConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Consent page URL carrying `state` back to the callback.
    pub fn authorize_url(&self, state: &str) -> Result<String, OAuthError> {
        let url = reqwest::Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.callback_url.as_str()),
                ("response_type", "code"),
                ("scope", "openid email profile"),
                ("state", state),
            ],
        )
        .map_err(|e| OAuthError::Provider(e.to_string()))?;
        Ok(url.into())
    }

    /// Trade an authorization code for the user's profile.
    pub async fn exchange(&self, code: &str) -> Result<FederatedProfile, OAuthError> {
        let resp = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.callback_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(OAuthError::Provider(format!(
                "token exchange returned {status}: {body}"
            )));
        }
        let token: TokenResponse = resp.json().await?;

        let resp = self
            .client
            .get(USERINFO_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(OAuthError::Provider(format!(
                "userinfo returned {}",
                resp.status()
            )));
        }
        let info: UserInfo = resp.json().await?;

        match info.email {
            Some(email) if info.email_verified => Ok(FederatedProfile {
                provider_id: info.sub,
                email,
                name: info.name,
            }),
            _ => Err(OAuthError::UnverifiedEmail),
        }
    }
}
