//! Google identity provider: code exchange and profile lookup.
//!
//! DESIGN
//! ======
//! `IdentityProvider` is the seam between the sign-in state machine and the
//! network. `GoogleProvider` is the real implementation; tests swap in a
//! mock. Response parsing is pure (`parse_token_response`,
//! `parse_profile_response`) so it can be tested without HTTP.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use super::auth::{AuthError, PendingFlow};
use crate::config::{ClientConfig, HttpTimeouts};

// =============================================================================
// TYPES
// =============================================================================

/// Google user profile as returned by the `oauth2/v2/userinfo` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_email: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Any other fields the provider returned.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserProfile {
    /// Name to show in the header: name, else email, else id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else if !self.email.is_empty() {
            &self.email
        } else {
            &self.id
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Num(n) => n.to_string(),
    })
}

/// Tokens granted by the token endpoint.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("scope", &self.scope)
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

// =============================================================================
// PROVIDER TRAIT
// =============================================================================

/// Outbound calls the sign-in flow makes to the identity provider.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange an authorization code for tokens.
    async fn exchange_code(&self, client: &ClientConfig, flow: &PendingFlow, code: &str)
    -> Result<TokenSet, AuthError>;

    /// Look up the profile of the user the tokens belong to.
    async fn fetch_profile(&self, tokens: &TokenSet) -> Result<UserProfile, AuthError>;
}

// =============================================================================
// GOOGLE CLIENT
// =============================================================================

pub struct GoogleProvider {
    http: reqwest::Client,
    userinfo_uri: String,
}

impl GoogleProvider {
    /// Build a provider with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(userinfo_uri: impl Into<String>, timeouts: HttpTimeouts) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()?;
        Ok(Self { http, userinfo_uri: userinfo_uri.into() })
    }
}

#[async_trait::async_trait]
impl IdentityProvider for GoogleProvider {
    async fn exchange_code(
        &self,
        client: &ClientConfig,
        flow: &PendingFlow,
        code: &str,
    ) -> Result<TokenSet, AuthError> {
        let form = [
            ("code", code),
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
            ("redirect_uri", flow.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        let response = self
            .http
            .post(client.token_uri.as_str())
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::TokenExchange(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::TokenExchange(e.to_string()))?;
        parse_token_response(status, &body)
    }

    async fn fetch_profile(&self, tokens: &TokenSet) -> Result<UserProfile, AuthError> {
        let response = self
            .http
            .get(&self.userinfo_uri)
            .bearer_auth(&tokens.access_token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AuthError::ProfileFetch(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::ProfileFetch(e.to_string()))?;
        parse_profile_response(status, &body)
    }
}

// =============================================================================
// PARSING
// =============================================================================

/// Interpret a token endpoint response.
pub(crate) fn parse_token_response(status: u16, body: &str) -> Result<TokenSet, AuthError> {
    if !(200..300).contains(&status) {
        return Err(AuthError::TokenExchange(describe_failure(status, body)));
    }
    let tokens: TokenSet = serde_json::from_str(body)
        .map_err(|e| AuthError::TokenExchange(format!("unexpected token response: {e}")))?;
    if tokens.access_token.is_empty() {
        return Err(AuthError::TokenExchange("token response carried an empty access_token".into()));
    }
    Ok(tokens)
}

/// Interpret a userinfo endpoint response.
pub(crate) fn parse_profile_response(status: u16, body: &str) -> Result<UserProfile, AuthError> {
    if !(200..300).contains(&status) {
        return Err(AuthError::ProfileFetch(describe_failure(status, body)));
    }
    serde_json::from_str(body).map_err(|e| AuthError::ProfileFetch(format!("unexpected profile response: {e}")))
}

fn describe_failure(status: u16, body: &str) -> String {
    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(OAuthErrorBody { error, error_description: Some(desc) }) => format!("{error}: {desc} (status {status})"),
        Ok(OAuthErrorBody { error, error_description: None }) => format!("{error} (status {status})"),
        Err(_) if body.trim().is_empty() => format!("status {status}"),
        Err(_) => format!("status {status}: {}", body.trim()),
    }
}

#[cfg(test)]
#[path = "google_test.rs"]
mod tests;
