//! Page routes: session cookie handling and HTML output.
//!
//! Handlers translate HTTP into a `PageRequest`, run the sign-in state
//! machine against the browser's session, and turn the resulting `View`
//! into a response. No flow logic lives here.

use std::fmt::Write;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{Html, IntoResponse, Json, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use html_escape::{encode_double_quoted_attribute, encode_text};
use url::Url;

use crate::config::AppConfig;
use crate::services::auth::{self, PageAction, PageRequest, View};
use crate::state::AppState;

const COOKIE_NAME: &str = "chatbot_session";
const FORWARDED_PROTO: &str = "x-forwarded-proto";
const TITLE: &str = "YouTube Chatbot";

// =============================================================================
// HANDLERS
// =============================================================================

/// `GET /`: the page, including Google's callback.
pub async fn show(State(state): State<AppState>, jar: CookieJar, headers: HeaderMap, uri: Uri) -> Response {
    let request = page_request(&state.config, &headers, &uri, PageAction::Show);
    let (jar, view) = run(&state, jar, &request).await;
    (jar, view_response(&view)).into_response()
}

/// `POST /logout`: clear the signed-in user and go back to `/`.
pub async fn logout(State(state): State<AppState>, jar: CookieJar, headers: HeaderMap) -> Response {
    let request = PageRequest::new("/", None)
        .with_origin(request_origin(&state.config, &headers))
        .with_action(PageAction::Logout);
    let (jar, view) = run(&state, jar, &request).await;
    (jar, view_response(&view)).into_response()
}

/// `GET /api/view`: the render outcome as JSON.
pub async fn view_json(State(state): State<AppState>, jar: CookieJar, headers: HeaderMap, uri: Uri) -> Response {
    let request = page_request(&state.config, &headers, &uri, PageAction::Show);
    let (jar, view) = run(&state, jar, &request).await;
    let status = if matches!(view, View::Halted { .. }) { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK };
    (status, jar, Json(view)).into_response()
}

/// Render once against the browser's session, issuing a cookie if the
/// session is new.
async fn run(state: &AppState, jar: CookieJar, request: &PageRequest) -> (CookieJar, View) {
    let presented = jar.get(COOKIE_NAME).map(|c| c.value().to_owned());
    let (id, mut session) = state
        .sessions
        .checkout(presented.as_deref(), &state.config.deployment_url)
        .await;

    // Render against a copy; the stored session only changes once the render
    // completes, so a dropped request leaves it as it was.
    let rendered = auth::render(
        state.config.client.as_ref(),
        state.provider.as_ref(),
        state.flow_options(),
        session.clone(),
        request,
    )
    .await;
    *session = rendered.session;
    drop(session);

    let jar = if presented.as_deref() == Some(id.as_str()) {
        jar
    } else {
        jar.add(session_cookie(id, state.config.cookie_secure))
    };
    (jar, rendered.view)
}

fn session_cookie(id: String, secure: bool) -> Cookie<'static> {
    Cookie::build((COOKIE_NAME, id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

fn page_request(config: &AppConfig, headers: &HeaderMap, uri: &Uri, action: PageAction) -> PageRequest {
    PageRequest::new(uri.path(), uri.query())
        .with_origin(request_origin(config, headers))
        .with_action(action)
}

/// Origin the browser used (`scheme://host[:port]`), but only when it is one
/// of the configured JavaScript origins.
pub(crate) fn request_origin(config: &AppConfig, headers: &HeaderMap) -> Option<String> {
    let client = config.client.as_ref().ok()?;
    let host = headers.get(header::HOST)?.to_str().ok()?;
    let scheme = headers
        .get(FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map_or("http", str::trim);
    let origin = Url::parse(&format!("{scheme}://{host}"))
        .ok()?
        .origin()
        .ascii_serialization();
    client.allows_origin(&origin).then_some(origin)
}

// =============================================================================
// OUTPUT
// =============================================================================

fn view_response(view: &View) -> Response {
    match view {
        View::Redirect { location } => Redirect::to(location).into_response(),
        View::Halted { .. } => (StatusCode::SERVICE_UNAVAILABLE, Html(render_html(view))).into_response(),
        View::LoggedOut { .. } | View::LoggedIn { .. } => Html(render_html(view)).into_response(),
    }
}

/// Minimal HTML for a view.
pub(crate) fn render_html(view: &View) -> String {
    let mut body = String::new();
    match view {
        View::Halted { message } => {
            let _ = writeln!(body, r#"<p class="error">{}</p>"#, encode_text(message));
        }
        View::Redirect { location } => {
            let _ = writeln!(body, r#"<p><a href="{}">Continue</a></p>"#, encode_double_quoted_attribute(location));
        }
        View::LoggedOut { banners, login_url } => {
            for banner in banners {
                let _ = writeln!(body, r#"<p class="error">{}</p>"#, encode_text(banner));
            }
            body.push_str("<p>Please login to continue</p>\n");
            if let Some(url) = login_url {
                let _ = writeln!(
                    body,
                    r#"<p><a class="login" href="{}" target="_self">Sign in with Google</a></p>"#,
                    encode_double_quoted_attribute(url)
                );
            }
        }
        View::LoggedIn { display_name, .. } => {
            let name = encode_text(display_name);
            let _ = writeln!(body, r#"<header><span class="user">👤 {name}</span>"#);
            body.push_str(
                "<form method=\"post\" action=\"/logout\"><button type=\"submit\">Logout</button></form></header>\n",
            );
            body.push_str("<hr>\n");
            body.push_str(r#"<p class="success">You're successfully logged in! The chatbot is ready to use.</p>"#);
            body.push_str("\n<p>Your chatbot interface goes here!</p>\n");
        }
    }
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>{TITLE}</title></head>\n<body>\n<h1>🤖 {TITLE}</h1>\n{body}</body>\n</html>\n"
    )
}

#[cfg(test)]
#[path = "page_test.rs"]
mod tests;
