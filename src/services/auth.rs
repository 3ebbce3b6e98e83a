//! Google sign-in flow: authorization URL, callback handling and logout.
//!
//! DESIGN
//! ======
//! `render` is the whole state machine. It takes the session by value plus a
//! description of the incoming request, performs at most one code exchange
//! and one profile lookup, and hands back the updated session together with
//! the `View` the page should show. It never touches HTTP types or global
//! state, so every transition is testable with a mock provider.
//!
//! STATES
//! ======
//! - logged out, no callback: issue a fresh `PendingFlow` and a login URL
//! - logged out, callback: exchange, fetch profile, then redirect to the same
//!   URL without the OAuth parameters (success or failure)
//! - logged in: show the user until logout

use serde::Serialize;
use url::Url;
use url::form_urlencoded;

use super::google::{IdentityProvider, UserProfile};
use super::session::{AuthState, Session, generate_token};
use crate::config::{ClientConfig, ConfigError};

/// Scopes requested on every login.
pub const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/userinfo.profile",
    "https://www.googleapis.com/auth/userinfo.email",
];

/// Query parameters Google appends to the redirect URI.
const CALLBACK_PARAMS: [&str; 8] = ["code", "state", "scope", "authuser", "prompt", "hd", "error", "error_description"];

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("google auth is not configured: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to generate authentication URL: {0}")]
    AuthUrl(String),
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
    #[error("profile lookup failed: {0}")]
    ProfileFetch(String),
}

// =============================================================================
// PENDING FLOW
// =============================================================================

/// One login attempt: what we asked Google for and where it should come back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFlow {
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    /// Anti-forgery token echoed back by Google in the callback.
    pub state: String,
}

impl PendingFlow {
    #[must_use]
    pub fn new(redirect_uri: impl Into<String>) -> Self {
        Self {
            scopes: SCOPES.iter().map(|s| (*s).to_owned()).collect(),
            redirect_uri: redirect_uri.into(),
            state: generate_token(),
        }
    }

    /// Build the Google consent-screen URL for this attempt.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::AuthUrl` if the redirect URI is not an absolute
    /// http(s) URL or the authorization endpoint cannot carry a query.
    pub fn authorization_url(&self, client: &ClientConfig) -> Result<String, AuthError> {
        let redirect = Url::parse(&self.redirect_uri)
            .map_err(|e| AuthError::AuthUrl(format!("invalid redirect URI {:?}: {e}", self.redirect_uri)))?;
        if !matches!(redirect.scheme(), "http" | "https") {
            return Err(AuthError::AuthUrl(format!("redirect URI must be http(s): {}", self.redirect_uri)));
        }

        let mut url = client.auth_uri.clone();
        if url.cannot_be_a_base() {
            return Err(AuthError::AuthUrl(format!("unusable authorization endpoint: {}", client.auth_uri)));
        }
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &client.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", &self.state)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("include_granted_scopes", "true");
        Ok(url.into())
    }
}

/// Pick the redirect URI for a new login: the origin of `base_url` when it is
/// a usable http(s) URL, otherwise the first configured redirect URI.
///
/// # Errors
///
/// Returns `AuthError::AuthUrl` when neither source yields a URI.
pub fn resolve_redirect_uri(base_url: &str, client: &ClientConfig) -> Result<String, AuthError> {
    if let Ok(url) = Url::parse(base_url) {
        if matches!(url.scheme(), "http" | "https") && url.has_host() {
            return Ok(url.origin().ascii_serialization());
        }
    }
    client
        .redirect_uris
        .first()
        .cloned()
        .ok_or_else(|| AuthError::AuthUrl("no redirect URI configured".into()))
}

// =============================================================================
// REQUEST / VIEW
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageAction {
    #[default]
    Show,
    Logout,
}

/// The parts of an incoming request the flow cares about.
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub path: String,
    pub params: Vec<(String, String)>,
    /// Trusted origin the browser used, if it is one we serve from.
    pub origin: Option<String>,
    pub action: PageAction,
}

impl PageRequest {
    /// Build from a path and raw query string.
    #[must_use]
    pub fn new(path: &str, query: Option<&str>) -> Self {
        let params = query
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        Self { path: path.to_owned(), params, origin: None, action: PageAction::Show }
    }

    #[must_use]
    pub fn with_origin(mut self, origin: Option<String>) -> Self {
        self.origin = origin;
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: PageAction) -> Self {
        self.action = action;
        self
    }

    /// First value of a query parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// True when Google redirected back here, either with a code or an error.
    #[must_use]
    pub fn is_callback(&self) -> bool {
        self.param("code").is_some() || self.param("error").is_some()
    }

    /// The current path and query with every OAuth callback parameter removed.
    #[must_use]
    pub fn location_without_callback(&self) -> String {
        let path = if self.path.is_empty() { "/" } else { self.path.as_str() };
        let mut kept = form_urlencoded::Serializer::new(String::new());
        let mut any = false;
        for (k, v) in &self.params {
            if !CALLBACK_PARAMS.contains(&k.as_str()) {
                kept.append_pair(k, v);
                any = true;
            }
        }
        if any { format!("{path}?{}", kept.finish()) } else { path.to_owned() }
    }
}

/// What the page should show after a render.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum View {
    /// Configuration is broken; show only this message.
    Halted { message: String },
    /// The request was consumed (callback or logout); navigate here.
    Redirect { location: String },
    /// Signed out. `login_url` is absent when no URL could be built.
    LoggedOut { banners: Vec<String>, login_url: Option<String> },
    /// Signed in.
    LoggedIn { display_name: String, user: UserProfile },
}

/// Result of one render: the session to store back and the view to show.
#[derive(Debug)]
pub struct Rendered {
    pub session: Session,
    pub view: View,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowOptions {
    /// Reject callbacks whose `state` does not match the session's pending login.
    pub verify_state: bool,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self { verify_state: true }
    }
}

// =============================================================================
// RENDER
// =============================================================================

/// Advance the sign-in state machine for one request.
pub async fn render(
    client: Result<&ClientConfig, &ConfigError>,
    provider: &dyn IdentityProvider,
    options: FlowOptions,
    mut session: Session,
    request: &PageRequest,
) -> Rendered {
    if let Some(origin) = &request.origin {
        session.base_url.clone_from(origin);
    }

    if request.action == PageAction::Logout {
        if session.state() == AuthState::LoggedIn {
            tracing::info!("user logged out");
        }
        session.logout();
        return Rendered { session, view: View::Redirect { location: "/".into() } };
    }

    let client = match client {
        Ok(client) => client,
        Err(e) => {
            let err = AuthError::from(e.clone());
            tracing::error!(error = %err, "refusing to render without client config");
            return Rendered { session, view: View::Halted { message: err.to_string() } };
        }
    };

    if request.is_callback() {
        let location = request.location_without_callback();
        match session.state() {
            AuthState::LoggedIn => {
                tracing::debug!("ignoring callback for signed-in session");
            }
            AuthState::LoggedOut => match complete_login(client, provider, options, &mut session, request).await {
                Ok(user) => {
                    tracing::info!(user_id = %user.id, "google sign-in completed");
                    session.sign_in(user);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "google sign-in failed");
                    session.fail(&e);
                }
            },
        }
        return Rendered { session, view: View::Redirect { location } };
    }

    if let Some(user) = &session.user {
        let view = View::LoggedIn { display_name: user.display_name().to_owned(), user: user.clone() };
        return Rendered { session, view };
    }

    let mut banners: Vec<String> = session.auth_error.take().into_iter().collect();
    let login_url = match begin_login(client, &mut session) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::warn!(error = %e, "could not build authorization URL");
            banners.push(capitalize(&e.to_string()));
            None
        }
    };
    Rendered { session, view: View::LoggedOut { banners, login_url } }
}

/// Start a new login attempt, replacing any earlier one.
fn begin_login(client: &ClientConfig, session: &mut Session) -> Result<String, AuthError> {
    let redirect_uri = resolve_redirect_uri(&session.base_url, client)?;
    let flow = PendingFlow::new(redirect_uri);
    let url = flow.authorization_url(client)?;
    session.pending = Some(flow);
    Ok(url)
}

async fn complete_login(
    client: &ClientConfig,
    provider: &dyn IdentityProvider,
    options: FlowOptions,
    session: &mut Session,
    request: &PageRequest,
) -> Result<UserProfile, AuthError> {
    let pending = session.pending.take();

    if let Some(reason) = request.param("error") {
        return Err(AuthError::TokenExchange(format!("provider returned {reason}")));
    }
    let code = request
        .param("code")
        .ok_or_else(|| AuthError::TokenExchange("callback carried no code".into()))?;

    let flow = match (options.verify_state, pending) {
        (true, Some(flow)) => {
            if request.param("state") != Some(flow.state.as_str()) {
                return Err(AuthError::TokenExchange("state mismatch, please start the login again".into()));
            }
            flow
        }
        (true, None) => {
            return Err(AuthError::TokenExchange("no login in progress for this session".into()));
        }
        (false, Some(flow)) => flow,
        (false, None) => PendingFlow::new(resolve_redirect_uri(&session.base_url, client)?),
    };

    let tokens = provider.exchange_code(client, &flow, code).await?;
    provider.fetch_profile(&tokens).await
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
