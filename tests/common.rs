//! Demo application shared by the integration tests.
//!
//! A small axum site exercising everything the harness observes: plain
//! pages, query strings, form posts, login/logout cookies, a server-side
//! session counter, header echoes, a panicking handler and a not-found
//! fallback.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use apphost::runtime::{ActionFilter, PostHandlerHook, RuntimeFault};
use apphost::{
    AppHost, ApplicationRuntime, RequestContext, RouterRuntime, SessionHandle, SimulatedRequest,
};
use axum::extract::{Form, Query, State};
use axum::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE, USER_AGENT};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Router};
use parking_lot::Mutex;
use serde::Deserialize;
use tempfile::TempDir;

/// Server-side state of the demo site.
#[derive(Clone, Default)]
pub struct DemoState {
    counters: Arc<Mutex<HashMap<String, u32>>>,
}

#[derive(Deserialize)]
struct Login {
    email: String,
    password: String,
}

pub fn demo_app() -> Router {
    Router::new()
        .route("/default", get(|| async { "ready" }))
        .route("/home/index", get(|| async { "Welcome home" }))
        .route("/search", get(search))
        .route("/account/login", post(login))
        .route("/account/logout", get(logout))
        .route("/account/signout", get(signout))
        .route("/account/whoami", get(whoami))
        .route("/account/flash", get(flash))
        .route("/session/counter", get(counter))
        .route("/cookies/echo", get(echo_cookies))
        .route("/headers/echo", get(echo_headers))
        .route("/echo/form", post(echo_form))
        .route("/echo/fields", post(echo_fields))
        .route("/boom", get(boom))
        .fallback(|| async { (StatusCode::NOT_FOUND, "no such page") })
        .with_state(DemoState::default())
}

async fn search(Query(params): Query<HashMap<String, String>>) -> String {
    format!("results for {}", params.get("q").map_or("", String::as_str))
}

async fn login(Form(login): Form<Login>) -> impl IntoResponse {
    if login.password.is_empty() {
        return (StatusCode::UNAUTHORIZED, "password required").into_response();
    }
    (
        [(SET_COOKIE, format!("auth={}; Path=/; HttpOnly", login.email))],
        format!("logged in as {}", login.email),
    )
        .into_response()
}

async fn logout() -> impl IntoResponse {
    (
        [(SET_COOKIE, "auth=; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT")],
        "logged out",
    )
}

/// Logout with the dashed cookie date layout older frameworks emit.
async fn signout() -> impl IntoResponse {
    (
        [(SET_COOKIE, "auth=; expires=Thu, 01-Jan-1970 00:00:00 GMT; path=/")],
        "signed out",
    )
}

async fn whoami(headers: HeaderMap) -> String {
    match cookie(&headers, "auth") {
        Some(user) => format!("user: {user}"),
        None => "anonymous".to_string(),
    }
}

/// Sets a cookie that is already expired on arrival.
async fn flash() -> impl IntoResponse {
    ([(SET_COOKIE, "flash=hello; Max-Age=0")], "flashed")
}

async fn counter(State(state): State<DemoState>, headers: HeaderMap) -> impl IntoResponse {
    let (sid, issued) = match cookie(&headers, "sid") {
        Some(sid) => (sid, false),
        None => (uuid::Uuid::new_v4().to_string(), true),
    };

    let count = {
        let mut counters = state.counters.lock();
        let count = counters.entry(sid.clone()).or_default();
        *count += 1;
        *count
    };

    let mut response = (
        Extension(SessionHandle::new(sid.clone()).with_value("count", count)),
        format!("count={count}"),
    )
        .into_response();
    if issued
        && let Ok(value) = HeaderValue::from_str(&format!("sid={sid}; Path=/"))
    {
        response.headers_mut().append(SET_COOKIE, value);
    }
    response
}

async fn echo_cookies(headers: HeaderMap) -> String {
    headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

async fn echo_headers(headers: HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string()
    };
    format!(
        "user-agent: {}; x-trace: {}",
        header(USER_AGENT.as_str()),
        header("x-trace")
    )
}

async fn echo_form(headers: HeaderMap, body: String) -> String {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    format!("{content_type}\n{body}")
}

async fn echo_fields(Form(fields): Form<BTreeMap<String, String>>) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

async fn boom() -> &'static str {
    panic!("handler exploded")
}

fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}

/// Boot the demo site in a fresh host rooted at a temporary directory.
pub fn demo_host() -> (AppHost, TempDir) {
    demo_host_at("/")
}

pub fn demo_host_at(virtual_path: &str) -> (AppHost, TempDir) {
    let root = tempfile::tempdir().expect("create application root");
    let host = AppHost::create(root.path(), virtual_path, || RouterRuntime::new(demo_app()))
        .expect("boot demo host");
    (host, root)
}

/// Lifecycle calls observed by [`ObservedRuntime`].
pub type Events = Arc<Mutex<Vec<String>>>;

/// Wraps a runtime and records every lifecycle call made on it.
pub struct ObservedRuntime<R> {
    inner: R,
    events: Events,
}

impl<R> ObservedRuntime<R> {
    pub fn new(inner: R, events: Events) -> Self {
        Self { inner, events }
    }

    fn note(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }
}

impl<R: ApplicationRuntime> ApplicationRuntime for ObservedRuntime<R> {
    fn boot(&mut self, root: &Path, virtual_path: &str) -> Result<(), RuntimeFault> {
        self.note("boot");
        self.inner.boot(root, virtual_path)
    }

    fn add_post_handler_hook(&mut self, hook: Arc<dyn PostHandlerHook>) {
        self.note("hook");
        self.inner.add_post_handler_hook(hook);
    }

    fn add_filter(&mut self, filter: Arc<dyn ActionFilter>) {
        self.note("filter");
        self.inner.add_filter(filter);
    }

    fn rebuild_pipeline(&mut self) {
        self.note("rebuild");
        self.inner.rebuild_pipeline();
    }

    fn process_request(
        &mut self,
        request: &SimulatedRequest,
        context: &mut RequestContext,
        output: &mut String,
    ) -> Result<(), RuntimeFault> {
        self.note(format!("request {}", request.raw_url()));
        self.inner.process_request(request, context, output)
    }

    fn shutdown(&mut self) {
        self.note("shutdown");
        self.inner.shutdown();
    }
}
