//! Application runtime backed by an `axum::Router`.
//!
//! Requests never touch a socket: each one is handed to the router with
//! `tower::ServiceExt::oneshot` on a private current-thread tokio runtime.
//!
//! Extension points map onto the router like this:
//! - filters run as a route layer, so only requests that matched a route
//!   report action/result execution (a 404 from the fallback reports nothing)
//! - post-processing hooks run as an outer layer once dispatch has finished
//! - handlers expose session state by returning `Extension(SessionHandle)`
//!
//! The router must contain at least one route before filters are added;
//! axum refuses route layers on an empty router.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::body::Body;
use axum::extract::{MatchedPath, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use chrono::Utc;
use futures::FutureExt;
use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, SET_COOKIE};
use parking_lot::Mutex;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use super::types::{
    ActionExecutedContext, Cookie, ResultExecutedContext, RuntimeFault, RuntimeResponse,
    SessionHandle,
};
use super::{ActionFilter, ApplicationRuntime, PostHandlerHook};
use crate::browsing::SimulatedRequest;
use crate::interception::RequestContext;

type Filters = Arc<[Arc<dyn ActionFilter>]>;
type Hooks = Arc<[Arc<dyn PostHandlerHook>]>;

/// Per-request context shared with the middleware for one dispatch.
#[derive(Clone)]
struct RequestScope(Arc<Mutex<RequestContext>>);

impl RequestScope {
    fn new(context: RequestContext) -> Self {
        Self(Arc::new(Mutex::new(context)))
    }

    fn into_inner(self) -> RequestContext {
        match Arc::try_unwrap(self.0) {
            Ok(mutex) => mutex.into_inner(),
            Err(shared) => std::mem::take(&mut *shared.lock()),
        }
    }
}

/// [`ApplicationRuntime`] hosting an axum application in-process.
pub struct RouterRuntime {
    app: Router,
    pipeline: Router,
    filters: Vec<Arc<dyn ActionFilter>>,
    hooks: Vec<Arc<dyn PostHandlerHook>>,
    executor: tokio::runtime::Runtime,
    root: Option<PathBuf>,
    virtual_path: String,
    on_shutdown: Vec<Box<dyn FnOnce() + Send>>,
}

impl RouterRuntime {
    /// Wrap an application router.
    ///
    /// # Errors
    ///
    /// Returns an error if the private tokio runtime cannot be built.
    pub fn new(app: Router) -> anyhow::Result<Self> {
        let executor = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build router executor")?;

        Ok(Self {
            pipeline: app.clone(),
            app,
            filters: Vec::new(),
            hooks: Vec::new(),
            executor,
            root: None,
            virtual_path: crate::constants::DEFAULT_VIRTUAL_PATH.to_string(),
            on_shutdown: Vec::new(),
        })
    }

    /// Register application-end cleanup, run once when the runtime shuts down.
    #[must_use]
    pub fn on_shutdown(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_shutdown.push(Box::new(callback));
        self
    }

    /// Application root passed to [`ApplicationRuntime::boot`].
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    fn compose(&self) -> Router {
        let mut pipeline = self.app.clone();

        if !self.filters.is_empty() {
            let filters: Filters = self.filters.iter().cloned().collect();
            pipeline = pipeline.route_layer(middleware::from_fn_with_state(filters, filter_layer));
        }

        let mount = self.virtual_path.trim_end_matches('/');
        if !mount.is_empty() {
            pipeline = Router::new().nest(mount, pipeline);
        }

        if !self.hooks.is_empty() {
            let hooks: Hooks = self.hooks.iter().cloned().collect();
            pipeline = pipeline.layer(middleware::from_fn_with_state(hooks, completion_layer));
        }

        pipeline
    }
}

impl ApplicationRuntime for RouterRuntime {
    fn boot(&mut self, root: &Path, virtual_path: &str) -> Result<(), RuntimeFault> {
        if !root.is_dir() {
            return Err(RuntimeFault::new(format!(
                "application root {} is not a directory",
                root.display()
            )));
        }
        if !virtual_path.starts_with('/') {
            return Err(RuntimeFault::new(format!(
                "virtual path '{virtual_path}' must start with '/'"
            )));
        }

        self.root = Some(root.to_path_buf());
        self.virtual_path = virtual_path.to_string();
        self.pipeline = self.compose();
        info!(root = %root.display(), virtual_path, "Router application booted");
        Ok(())
    }

    fn add_post_handler_hook(&mut self, hook: Arc<dyn PostHandlerHook>) {
        self.hooks.push(hook);
    }

    fn add_filter(&mut self, filter: Arc<dyn ActionFilter>) {
        self.filters.push(filter);
    }

    fn rebuild_pipeline(&mut self) {
        self.pipeline = self.compose();
        debug!(
            filters = self.filters.len(),
            hooks = self.hooks.len(),
            "Rebuilt router pipeline"
        );
    }

    fn process_request(
        &mut self,
        request: &SimulatedRequest,
        context: &mut RequestContext,
        output: &mut String,
    ) -> Result<(), RuntimeFault> {
        let http_request = request
            .to_http_request()
            .map_err(|e| RuntimeFault::new(e.to_string()))?;
        let (mut parts, body) = http_request.into_parts();

        let scope = RequestScope::new(std::mem::take(context));
        parts.extensions.insert(scope.clone());
        let http_request = Request::from_parts(parts, Body::new(body));

        let service = self.pipeline.clone();
        let dispatch = async move {
            let response = match service.oneshot(http_request).await {
                Ok(response) => response,
                Err(never) => match never {},
            };
            response
                .into_body()
                .collect()
                .await
                .map(http_body_util::Collected::to_bytes)
                .map_err(|e| RuntimeFault::new(format!("failed to read response body: {e}")))
        };
        let outcome = self
            .executor
            .block_on(AssertUnwindSafe(dispatch).catch_unwind());

        *context = scope.into_inner();

        match outcome {
            Ok(Ok(bytes)) => {
                output.push_str(&String::from_utf8_lossy(&bytes));
                Ok(())
            },
            Ok(Err(fault)) => Err(fault),
            Err(panic) => Err(RuntimeFault::new(format!(
                "handler panicked: {}",
                crate::panic_message(panic.as_ref())
            ))),
        }
    }

    fn shutdown(&mut self) {
        info!(root = ?self.root, "Router application shutting down");
        for callback in self.on_shutdown.drain(..) {
            callback();
        }
    }
}

/// Route layer: reports action execution, renders the body, reports result
/// execution.
async fn filter_layer(State(filters): State<Filters>, req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| req.uri().path().to_string(), |p| p.as_str().to_string());
    let Some(scope) = req.extensions().get::<RequestScope>().cloned() else {
        return next.run(req).await;
    };

    let response = next.run(req).await;
    let status = response.status().as_u16();

    let executed = ActionExecutedContext {
        method,
        route: route.clone(),
        status,
    };
    {
        let mut context = scope.0.lock();
        for filter in filters.iter() {
            filter.on_action_executed(&mut context, &executed);
        }
    }

    let (parts, body) = response.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            // No result execution to report; hand the error on to the caller
            warn!(route = %route, error = %e, "Failed to render response body");
            let failed = futures::stream::once(futures::future::ready(Err::<Bytes, _>(e)));
            return Response::from_parts(parts, Body::from_stream(failed));
        },
    };

    let rendered = ResultExecutedContext {
        route,
        status,
        content_type: parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body_len: bytes.len(),
    };
    {
        let mut context = scope.0.lock();
        for filter in filters.iter() {
            filter.on_result_executed(&mut context, &rendered);
        }
    }

    Response::from_parts(parts, Body::from(bytes))
}

/// Outer layer: hands the session handle and response to the hooks.
async fn completion_layer(State(hooks): State<Hooks>, req: Request, next: Next) -> Response {
    let scope = req.extensions().get::<RequestScope>().cloned();
    let response = next.run(req).await;

    if let Some(scope) = scope {
        let session = response.extensions().get::<SessionHandle>().cloned();
        let snapshot = snapshot_response(&response);
        let mut context = scope.0.lock();
        for hook in hooks.iter() {
            hook.post_handler_execute(&mut context, session.as_ref(), &snapshot);
        }
    }

    response
}

fn snapshot_response(response: &Response) -> RuntimeResponse {
    let now = Utc::now();
    let headers = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect();
    let cookies = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| Cookie::parse_set_cookie(v, now))
        .collect();

    RuntimeResponse {
        status: response.status().as_u16(),
        headers,
        cookies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browsing::HttpVerb;
    use crate::interception::{CaptureHook, InterceptionFilter};
    use axum::Extension;
    use axum::http::StatusCode;
    use axum::routing::get;

    fn app() -> Router {
        Router::new()
            .route("/home/index", get(|| async { "home" }))
            .route(
                "/users/{id}",
                get(|| async {
                    (
                        Extension(SessionHandle::new("s-42")),
                        [(SET_COOKIE, "seen=1; Path=/")],
                        "user",
                    )
                }),
            )
            .route("/boom", get(boom))
            .route("/torn", get(torn))
            .fallback(|| async { (StatusCode::NOT_FOUND, "no such page") })
    }

    async fn boom() -> &'static str {
        panic!("exploded")
    }

    async fn torn() -> Body {
        Body::from_stream(futures::stream::iter([
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::other("connection torn")),
        ]))
    }

    fn booted(virtual_path: &str) -> (RouterRuntime, tempfile::TempDir) {
        let root = tempfile::tempdir().unwrap();
        let mut runtime = RouterRuntime::new(app()).unwrap();
        runtime.boot(root.path(), virtual_path).unwrap();
        runtime.add_post_handler_hook(Arc::new(CaptureHook));
        runtime.add_filter(Arc::new(InterceptionFilter));
        runtime.rebuild_pipeline();
        (runtime, root)
    }

    fn submit(
        runtime: &mut RouterRuntime,
        request: &SimulatedRequest,
    ) -> (Result<(), RuntimeFault>, RequestContext, String) {
        let mut context = RequestContext::new();
        let mut output = String::new();
        let result = runtime.process_request(request, &mut context, &mut output);
        (result, context, output)
    }

    #[test]
    fn test_boot_rejects_missing_root() {
        let mut runtime = RouterRuntime::new(app()).unwrap();
        let fault = runtime
            .boot(Path::new("/definitely/not/here"), "/")
            .unwrap_err();
        assert!(fault.message.contains("not a directory"));
    }

    #[test]
    fn test_matched_route_records_action_and_result() {
        let (mut runtime, _root) = booted("/");
        let request = SimulatedRequest::new(HttpVerb::Get, "users/7", "");
        let (result, context, output) = submit(&mut runtime, &request);

        assert!(result.is_ok());
        assert_eq!(output, "user");

        let action = context.record.action_executed().unwrap();
        assert_eq!(action.route, "/users/{id}");
        assert_eq!(action.method, "GET");
        assert_eq!(action.status, 200);

        let rendered = context.record.result_executed().unwrap();
        assert_eq!(rendered.body_len, 4);

        assert_eq!(context.capture.session().map(|s| s.id.as_str()), Some("s-42"));
        let response = context.capture.response().unwrap();
        assert_eq!(response.cookie("seen").map(|c| c.value.as_str()), Some("1"));
    }

    #[test]
    fn test_not_found_skips_filters_but_runs_hook() {
        let (mut runtime, _root) = booted("/");
        let request = SimulatedRequest::new(HttpVerb::Get, "missing/page", "");
        let (result, context, output) = submit(&mut runtime, &request);

        assert!(result.is_ok());
        assert_eq!(output, "no such page");
        assert!(context.record.is_empty());
        assert_eq!(context.capture.response().map(|r| r.status), Some(404));
    }

    #[test]
    fn test_panicking_handler_is_a_fault_and_runtime_survives() {
        let (mut runtime, _root) = booted("/");
        let request = SimulatedRequest::new(HttpVerb::Get, "boom", "");
        let (result, _, _) = submit(&mut runtime, &request);
        let fault = result.unwrap_err();
        assert!(fault.message.contains("exploded"));

        let request = SimulatedRequest::new(HttpVerb::Get, "home/index", "");
        let (result, _, output) = submit(&mut runtime, &request);
        assert!(result.is_ok());
        assert_eq!(output, "home");
    }

    #[test]
    fn test_body_failure_is_a_fault_not_an_empty_render() {
        let (mut runtime, _root) = booted("/");
        let request = SimulatedRequest::new(HttpVerb::Get, "torn", "");
        let (result, context, output) = submit(&mut runtime, &request);

        let fault = result.unwrap_err();
        assert!(fault.message.contains("failed to read response body"));
        assert!(output.is_empty());
        assert!(context.record.action_executed().is_some());
        assert!(context.record.result_executed().is_none());

        let request = SimulatedRequest::new(HttpVerb::Get, "home/index", "");
        let (result, _, output) = submit(&mut runtime, &request);
        assert!(result.is_ok());
        assert_eq!(output, "home");
    }

    #[test]
    fn test_virtual_path_mount() {
        let (mut runtime, _root) = booted("/shop/");
        let request =
            SimulatedRequest::new(HttpVerb::Get, "home/index", "").with_virtual_path("/shop/");
        let (result, context, output) = submit(&mut runtime, &request);

        assert!(result.is_ok());
        assert_eq!(output, "home");
        assert!(context.record.action_executed().is_some());
    }

    #[test]
    fn test_shutdown_runs_callbacks_once() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut runtime = RouterRuntime::new(app()).unwrap().on_shutdown(move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        runtime.shutdown();
        runtime.shutdown();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_without_registrations_nothing_is_recorded() {
        let root = tempfile::tempdir().unwrap();
        let mut runtime = RouterRuntime::new(app()).unwrap();
        runtime.boot(root.path(), "/").unwrap();

        let request = SimulatedRequest::new(HttpVerb::Get, "home/index", "");
        let (result, context, output) = submit(&mut runtime, &request);
        assert!(result.is_ok());
        assert_eq!(output, "home");
        assert!(context.is_empty());
    }
}
