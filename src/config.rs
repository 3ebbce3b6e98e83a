//! Runtime configuration parsed from environment variables.
//!
//! DESIGN
//! ======
//! Parsing is a pure function over a lookup closure so tests never touch the
//! process environment. A missing or malformed Google client configuration
//! does not stop the process: the error is kept on `AppConfig` and every page
//! render halts with it until the deployment is fixed.

use std::fmt;
use std::time::Duration;

use url::Url;

pub const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_USERINFO_URI: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
pub const DEFAULT_PORT: u16 = 8501;
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 86_400;
pub const DEFAULT_SESSION_MAX: usize = 10_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {var}")]
    Missing { var: &'static str },
    #[error("invalid URL in {var}: {reason}")]
    InvalidUrl { var: &'static str, reason: String },
}

// =============================================================================
// CLIENT CONFIG
// =============================================================================

/// Google OAuth web-client settings. Read-only for the life of the process.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: Url,
    pub token_uri: Url,
    /// Registered redirect URIs, in preference order.
    pub redirect_uris: Vec<String>,
    /// Origins the app may legitimately be served from (`scheme://host[:port]`).
    pub javascript_origins: Vec<String>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("auth_uri", &self.auth_uri.as_str())
            .field("token_uri", &self.token_uri.as_str())
            .field("redirect_uris", &self.redirect_uris)
            .field("javascript_origins", &self.javascript_origins)
            .finish()
    }
}

impl ClientConfig {
    /// Whether `origin` is one of the configured JavaScript origins.
    #[must_use]
    pub fn allows_origin(&self, origin: &str) -> bool {
        self.javascript_origins.iter().any(|o| o == origin)
    }
}

// =============================================================================
// APP CONFIG
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Google client settings, or the reason they could not be loaded.
    pub client: Result<ClientConfig, ConfigError>,
    /// Canonical base URL of this deployment, without a trailing slash.
    pub deployment_url: String,
    pub userinfo_uri: String,
    /// Require the callback `state` to match the login the session started.
    pub verify_state: bool,
    pub cookie_secure: bool,
    pub session_idle: Duration,
    /// Upper bound on live browser sessions; the least recently seen is evicted first.
    pub session_max: usize,
    pub timeouts: HttpTimeouts,
    pub port: u16,
}

impl AppConfig {
    /// Build config from the process environment.
    ///
    /// Required:
    /// - `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`, `DEPLOYMENT_URL`
    ///
    /// Optional:
    /// - `GOOGLE_AUTH_URI`, `GOOGLE_TOKEN_URI`, `GOOGLE_USERINFO_URI`: Google defaults
    /// - `ADDITIONAL_ORIGINS`: comma-separated extra origins the app is served from
    /// - `OAUTH_VERIFY_STATE`: default true
    /// - `COOKIE_SECURE`: default inferred from an https `DEPLOYMENT_URL`
    /// - `SESSION_IDLE_SECS`: default 86400
    /// - `SESSION_MAX`: default 10000
    /// - `OAUTH_REQUEST_TIMEOUT_SECS`, `OAUTH_CONNECT_TIMEOUT_SECS`: default 30 / 10
    /// - `PORT`: default 8501
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Blank values count as unset.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        let deployment_url = get("DEPLOYMENT_URL")
            .map(|raw| raw.trim_end_matches('/').to_owned())
            .unwrap_or_default();

        let client = load_client(&get, &deployment_url);

        let cookie_secure = get("COOKIE_SECURE")
            .as_deref()
            .and_then(parse_bool)
            .unwrap_or_else(|| deployment_url.starts_with("https://"));

        Self {
            client,
            userinfo_uri: get("GOOGLE_USERINFO_URI").unwrap_or_else(|| DEFAULT_USERINFO_URI.to_owned()),
            verify_state: get("OAUTH_VERIFY_STATE")
                .as_deref()
                .and_then(parse_bool)
                .unwrap_or(true),
            cookie_secure,
            session_idle: Duration::from_secs(parse_or(get("SESSION_IDLE_SECS"), DEFAULT_SESSION_IDLE_SECS)),
            session_max: parse_or(get("SESSION_MAX"), DEFAULT_SESSION_MAX).max(1),
            timeouts: HttpTimeouts {
                request_secs: parse_or(get("OAUTH_REQUEST_TIMEOUT_SECS"), DEFAULT_REQUEST_TIMEOUT_SECS),
                connect_secs: parse_or(get("OAUTH_CONNECT_TIMEOUT_SECS"), DEFAULT_CONNECT_TIMEOUT_SECS),
            },
            port: parse_or(get("PORT"), DEFAULT_PORT),
            deployment_url,
        }
    }
}

fn load_client<G>(get: &G, deployment_url: &str) -> Result<ClientConfig, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let client_id = get("GOOGLE_CLIENT_ID").ok_or(ConfigError::Missing { var: "GOOGLE_CLIENT_ID" })?;
    let client_secret = get("GOOGLE_CLIENT_SECRET").ok_or(ConfigError::Missing { var: "GOOGLE_CLIENT_SECRET" })?;
    if deployment_url.is_empty() {
        return Err(ConfigError::Missing { var: "DEPLOYMENT_URL" });
    }

    let deployment = parse_http_url("DEPLOYMENT_URL", deployment_url)?;
    let auth_uri = parse_http_url(
        "GOOGLE_AUTH_URI",
        &get("GOOGLE_AUTH_URI").unwrap_or_else(|| DEFAULT_AUTH_URI.to_owned()),
    )?;
    let token_uri = parse_http_url(
        "GOOGLE_TOKEN_URI",
        &get("GOOGLE_TOKEN_URI").unwrap_or_else(|| DEFAULT_TOKEN_URI.to_owned()),
    )?;

    let mut javascript_origins = vec![deployment.origin().ascii_serialization()];
    if let Some(extra) = get("ADDITIONAL_ORIGINS") {
        for raw in extra.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let origin = parse_http_url("ADDITIONAL_ORIGINS", raw)?
                .origin()
                .ascii_serialization();
            if !javascript_origins.contains(&origin) {
                javascript_origins.push(origin);
            }
        }
    }

    Ok(ClientConfig {
        client_id,
        client_secret,
        auth_uri,
        token_uri,
        redirect_uris: vec![deployment_url.to_owned(), format!("{deployment_url}/")],
        javascript_origins,
    })
}

fn parse_http_url(var: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl { var, reason: e.to_string() })?;
    if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
        return Err(ConfigError::InvalidUrl { var, reason: format!("expected an absolute http(s) URL, got {raw}") });
    }
    Ok(url)
}

/// Parse a loose boolean (`1/true/yes/on`, `0/false/no/off`).
pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_or<T>(raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr,
{
    raw.and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
