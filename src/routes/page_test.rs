use super::*;
use crate::services::auth::PendingFlow;
use crate::state::test_helpers::{MockOutcome, MockProvider, profile, test_app_state, test_config};
use axum::http::HeaderValue;
use axum::http::header::{COOKIE, LOCATION, SET_COOKIE};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// render_html
// =============================================================================

#[test]
fn render_html_escapes_text_and_attributes() {
    let view = View::LoggedOut {
        banners: vec![r#"Tom & "Jerry" <b>"#.into()],
        login_url: Some(r#"https://accounts.google.com/?q="><script>"#.into()),
    };
    let html = render_html(&view);
    assert!(html.contains(r#"Tom &amp; "Jerry" &lt;b&gt;"#));
    assert!(html.contains(r#"href="https://accounts.google.com/?q=&quot;&gt;&lt;script&gt;""#));
    assert!(!html.contains("<script>"));
}

#[test]
fn render_html_logged_out_with_banner() {
    let view = View::LoggedOut {
        banners: vec!["Authentication failed: <boom>".into()],
        login_url: Some("https://accounts.google.com/o/oauth2/auth?a=1&b=2".into()),
    };
    let html = render_html(&view);
    assert!(html.contains("Authentication failed: &lt;boom&gt;"));
    assert!(html.contains("Please login to continue"));
    assert!(html.contains(r#"href="https://accounts.google.com/o/oauth2/auth?a=1&amp;b=2""#));
    assert!(html.contains("Sign in with Google"));
}

#[test]
fn render_html_logged_out_without_login_url() {
    let view = View::LoggedOut { banners: vec!["Failed to generate authentication URL: x".into()], login_url: None };
    let html = render_html(&view);
    assert!(!html.contains("Sign in with Google"));
    assert!(html.contains("Failed to generate authentication URL"));
}

#[test]
fn render_html_logged_in_escapes_name() {
    let user = profile("1", "<script>alert(1)</script>");
    let view = View::LoggedIn { display_name: user.name.clone(), user };
    let html = render_html(&view);
    assert!(html.contains("&lt;script&gt;"));
    assert!(!html.contains("<script>"));
    assert!(html.contains(r#"action="/logout""#));
    assert!(html.contains("You're successfully logged in! The chatbot is ready to use."));
    assert!(html.contains("Your chatbot interface goes here!"));
}

#[test]
fn render_html_halted_shows_only_message() {
    let view = View::Halted { message: "google auth is not configured: missing required setting GOOGLE_CLIENT_ID".into() };
    let html = render_html(&view);
    assert!(html.contains("GOOGLE_CLIENT_ID"));
    assert!(!html.contains("Please login"));
    assert!(!html.contains("Logout"));
}

// =============================================================================
// request_origin
// =============================================================================

fn headers(host: &'static str, proto: Option<&'static str>) -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(header::HOST, HeaderValue::from_static(host));
    if let Some(proto) = proto {
        h.insert(FORWARDED_PROTO, HeaderValue::from_static(proto));
    }
    h
}

#[test]
fn request_origin_accepts_configured_origin() {
    let config = test_config(&[("ADDITIONAL_ORIGINS", "http://localhost:8501")]);
    assert_eq!(
        request_origin(&config, &headers("chat.example.com", Some("https"))).as_deref(),
        Some("https://chat.example.com")
    );
    assert_eq!(
        request_origin(&config, &headers("localhost:8501", None)).as_deref(),
        Some("http://localhost:8501")
    );
}

#[test]
fn request_origin_uses_first_forwarded_proto() {
    let config = test_config(&[]);
    assert_eq!(
        request_origin(&config, &headers("chat.example.com", Some("https, http"))).as_deref(),
        Some("https://chat.example.com")
    );
}

#[test]
fn request_origin_rejects_unknown_host() {
    let config = test_config(&[]);
    assert!(request_origin(&config, &headers("evil.example.com", Some("https"))).is_none());
    // Scheme matters too.
    assert!(request_origin(&config, &headers("chat.example.com", None)).is_none());
}

#[test]
fn request_origin_none_without_client_config() {
    let config = test_config(&[("GOOGLE_CLIENT_ID", "")]);
    assert!(request_origin(&config, &headers("chat.example.com", Some("https"))).is_none());
}

// =============================================================================
// router end-to-end
// =============================================================================

async fn spawn_app(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, crate::routes::app(state))
            .await
            .expect("server failed");
    });
    format!("http://{addr}")
}

fn http() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("client should build")
}

/// `chatbot_session=<id>` from a response, if it set one.
fn session_cookie_of(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("chatbot_session="))
        .and_then(|v| v.split(';').next())
        .map(str::to_owned)
}

fn location_of(resp: &reqwest::Response) -> String {
    resp.headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("redirect should carry a location")
        .to_owned()
}

#[tokio::test]
async fn healthz_ok() {
    let state = test_app_state(test_config(&[]), Arc::new(MockProvider::returning("1", "x")));
    let base = spawn_app(state).await;
    let resp = http().get(format!("{base}/healthz")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn first_visit_sets_cookie_and_shows_login() {
    let state = test_app_state(test_config(&[]), Arc::new(MockProvider::returning("1", "x")));
    let base = spawn_app(state).await;

    let resp = http().get(format!("{base}/")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let raw_cookie = resp
        .headers()
        .get(SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_owned();
    assert!(raw_cookie.starts_with("chatbot_session="));
    assert!(raw_cookie.contains("HttpOnly"));
    assert!(raw_cookie.contains("SameSite=Lax"));
    assert!(raw_cookie.contains("Secure"));

    let body = resp.text().await.unwrap();
    assert!(body.contains("Sign in with Google"));
    assert!(body.contains("userinfo.profile"));
    assert!(body.contains("access_type=offline&amp;prompt=consent"));
}

#[tokio::test]
async fn full_login_and_logout_flow() {
    let provider = Arc::new(MockProvider::returning("123", "Ada Lovelace"));
    let state = test_app_state(test_config(&[]), Arc::clone(&provider));
    let base = spawn_app(state).await;
    let http = http();

    // Logged-out view as JSON, to read the login URL.
    let resp = http.get(format!("{base}/api/view")).send().await.unwrap();
    let cookie = session_cookie_of(&resp).expect("new session cookie");
    let view: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(view["view"], "logged_out");
    let login_url = view["login_url"].as_str().unwrap();
    let oauth_state = Url::parse(login_url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    // Google sends the browser back with a code.
    let resp = http
        .get(format!("{base}/?code=VALIDCODE&state={oauth_state}&scope=email"))
        .header(COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::SEE_OTHER);
    assert_eq!(location_of(&resp), "/");
    assert!(session_cookie_of(&resp).is_none(), "existing session keeps its cookie");

    let resp = http.get(format!("{base}/")).header(COOKIE, &cookie).send().await.unwrap();
    let body = resp.text().await.unwrap();
    assert!(body.contains("Ada Lovelace"));
    assert!(body.contains("Logout"));
    assert!(!body.contains("Sign in with Google"));

    let resp = http.post(format!("{base}/logout")).header(COOKIE, &cookie).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::SEE_OTHER);
    assert_eq!(location_of(&resp), "/");

    let resp = http.get(format!("{base}/")).header(COOKIE, &cookie).send().await.unwrap();
    let body = resp.text().await.unwrap();
    assert!(body.contains("Sign in with Google"));
    assert!(!body.contains("Ada Lovelace"));
    assert_eq!(provider.exchange_count(), 1);
}

#[tokio::test]
async fn bad_code_shows_banner_on_next_page() {
    let provider = Arc::new(MockProvider::new(MockOutcome::TokenError("invalid_grant".into())));
    let state = test_app_state(test_config(&[("OAUTH_VERIFY_STATE", "false")]), Arc::clone(&provider));
    let base = spawn_app(state).await;
    let http = http();

    let resp = http.get(format!("{base}/?code=BADCODE")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::SEE_OTHER);
    assert_eq!(location_of(&resp), "/");
    let cookie = session_cookie_of(&resp).expect("new session cookie");

    let resp = http.get(format!("{base}/")).header(COOKIE, &cookie).send().await.unwrap();
    let body = resp.text().await.unwrap();
    assert!(body.contains("Authentication failed"));
    assert!(body.contains("Sign in with Google"));

    let resp = http.get(format!("{base}/")).header(COOKIE, &cookie).send().await.unwrap();
    let body = resp.text().await.unwrap();
    assert!(!body.contains("Authentication failed"));
    assert_eq!(provider.exchange_count(), 1);
}

#[tokio::test]
async fn missing_config_halts_every_page() {
    let state = test_app_state(
        test_config(&[("GOOGLE_CLIENT_ID", "")]),
        Arc::new(MockProvider::returning("1", "x")),
    );
    let base = spawn_app(state).await;
    let http = http();

    let resp = http.get(format!("{base}/")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    let body = resp.text().await.unwrap();
    assert!(body.contains("GOOGLE_CLIENT_ID"));
    assert!(!body.contains("Sign in with Google"));

    let resp = http.get(format!("{base}/api/view")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    let view: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(view["view"], "halted");
}

#[tokio::test]
async fn dropped_render_leaves_stored_session_intact() {
    let provider = Arc::new(MockProvider::new(MockOutcome::Stall));
    let state = test_app_state(test_config(&[("OAUTH_VERIFY_STATE", "false")]), Arc::clone(&provider));

    let (id, mut session) = state.sessions.checkout(None, "https://chat.example.com").await;
    session.base_url = "https://alt.example.com".into();
    session.auth_error = Some("Authentication failed: earlier".into());
    session.pending = Some(PendingFlow::new("https://alt.example.com"));
    let pending = session.pending.clone();
    drop(session);

    let jar = CookieJar::new().add(Cookie::new(COOKIE_NAME, id.clone()));
    let request = PageRequest::new("/", Some("code=VALIDCODE"));
    let task = {
        let state = state.clone();
        tokio::spawn(async move { run(&state, jar, &request).await })
    };

    // Wait until the render is inside the exchange, then drop it.
    tokio::time::timeout(Duration::from_secs(5), async {
        while provider.exchange_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("exchange should start");
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    let (again, session) = state.sessions.checkout(Some(&id), "https://chat.example.com").await;
    assert_eq!(again, id);
    assert_eq!(session.base_url, "https://alt.example.com");
    assert_eq!(session.pending, pending);
    assert_eq!(session.auth_error.as_deref(), Some("Authentication failed: earlier"));
    assert!(session.user.is_none());
}
