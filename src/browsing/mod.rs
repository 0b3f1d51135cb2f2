//! Browsing session: one simulated client across a sequence of requests.
//!
//! A [`BrowsingSession`] owns the client's cookie jar and the last session
//! handle the application issued. Every request goes through the same
//! submission path:
//!
//! 1. normalise the path and split off the query
//! 2. reset the per-request [`RequestContext`]
//! 3. build a [`SimulatedRequest`] carrying the current cookie jar
//! 4. hand it to the [`ApplicationRuntime`] and collect the response text
//! 5. read back what the completion hook and interception filter recorded
//! 6. merge response cookies into the jar (expired ones are rescinded)
//! 7. keep the session handle if one was captured
//! 8. return a [`RequestResult`]

pub mod cookies;
pub mod form;
pub mod request;

pub use cookies::{CookieJar, MergeOutcome};
pub use form::FormFields;
pub use request::{HttpVerb, KnownHeader, SimulatedRequest};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::DEFAULT_VIRTUAL_PATH;
use crate::error::{Error, Result};
use crate::interception::RequestContext;
use crate::runtime::{
    ActionExecutedContext, ApplicationRuntime, ResultExecutedContext, RuntimeResponse,
    SessionHandle,
};

/// Immutable snapshot of one request's outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestResult {
    pub response_text: String,
    /// `None` if the pipeline never dispatched to an action.
    pub action_executed: Option<ActionExecutedContext>,
    /// `None` if no result was rendered.
    pub result_executed: Option<ResultExecutedContext>,
    /// `None` if the completion hook never ran.
    pub response: Option<RuntimeResponse>,
}

impl RequestResult {
    pub fn response_text(&self) -> &str {
        &self.response_text
    }

    pub fn action_executed(&self) -> Option<&ActionExecutedContext> {
        self.action_executed.as_ref()
    }

    pub fn result_executed(&self) -> Option<&ResultExecutedContext> {
        self.result_executed.as_ref()
    }

    pub fn response(&self) -> Option<&RuntimeResponse> {
        self.response.as_ref()
    }

    /// Status code of the captured response.
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }
}

/// Strip one leading `~/` or `/` and split off the query string.
///
/// # Errors
///
/// Returns `InvalidArgument` for an empty url.
///
/// # Examples
///
/// ```
/// use apphost::browsing::normalize_url;
///
/// assert_eq!(normalize_url("~/home/index").unwrap(), ("home/index".into(), String::new()));
/// assert_eq!(normalize_url("search?q=test").unwrap(), ("search".into(), "q=test".into()));
/// ```
pub fn normalize_url(url: &str) -> Result<(String, String)> {
    if url.is_empty() {
        return Err(Error::invalid_argument("url must not be empty"));
    }

    let url = url
        .strip_prefix("~/")
        .or_else(|| url.strip_prefix('/'))
        .unwrap_or(url);

    Ok(match url.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (url.to_string(), String::new()),
    })
}

/// One simulated client bound to a runtime.
pub struct BrowsingSession<'rt> {
    runtime: &'rt mut dyn ApplicationRuntime,
    virtual_path: String,
    cookies: CookieJar,
    session: Option<SessionHandle>,
    context: RequestContext,
}

impl<'rt> BrowsingSession<'rt> {
    pub fn new(runtime: &'rt mut dyn ApplicationRuntime) -> Self {
        Self {
            runtime,
            virtual_path: DEFAULT_VIRTUAL_PATH.to_string(),
            cookies: CookieJar::new(),
            session: None,
            context: RequestContext::new(),
        }
    }

    /// Virtual path requests are issued under.
    #[must_use]
    pub fn with_virtual_path(mut self, virtual_path: impl Into<String>) -> Self {
        self.virtual_path = virtual_path.into();
        self
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    /// Mutable jar, e.g. to preload cookies before the first request.
    pub fn cookies_mut(&mut self) -> &mut CookieJar {
        &mut self.cookies
    }

    /// Session handle from the most recent response that carried one.
    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    /// The runtime this session drives.
    pub fn runtime_mut(&mut self) -> &mut (dyn ApplicationRuntime + 'rt) {
        &mut *self.runtime
    }

    /// Submit a GET with no body and no explicit headers.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty url, `PipelineExhausted` if the
    /// runtime faults.
    pub fn get(&mut self, url: &str) -> Result<RequestResult> {
        self.request(HttpVerb::Get, url, Some(FormFields::new()), None)
    }

    /// Submit a POST with `form` flattened into url-encoded fields.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty url or a form value without named
    /// fields, `PipelineExhausted` if the runtime faults.
    pub fn post<T: Serialize + ?Sized>(&mut self, url: &str, form: &T) -> Result<RequestResult> {
        let fields = FormFields::from_serialize(form)?;
        self.post_form(url, fields)
    }

    /// Submit a POST with already flattened fields.
    ///
    /// # Errors
    ///
    /// Same as [`BrowsingSession::post`].
    pub fn post_form(&mut self, url: &str, fields: FormFields) -> Result<RequestResult> {
        self.request(HttpVerb::Post, url, Some(fields), None)
    }

    /// Submit an arbitrary request.
    ///
    /// # Errors
    ///
    /// Same as [`BrowsingSession::get`]. A header the runtime cannot
    /// represent surfaces as `PipelineExhausted` as well.
    pub fn request(
        &mut self,
        verb: HttpVerb,
        url: &str,
        form: Option<FormFields>,
        headers: Option<Vec<(String, String)>>,
    ) -> Result<RequestResult> {
        let (path, query) = normalize_url(url)?;

        self.context.reset();

        let request = SimulatedRequest::new(verb, path, query)
            .with_virtual_path(self.virtual_path.clone())
            .with_cookie_header(self.cookies.to_cookie_header())
            .with_headers(headers)
            .with_form(form);

        debug!(
            verb = %verb,
            path = request.path(),
            query = request.query(),
            cookies = self.cookies.len(),
            "Submitting simulated request"
        );

        let mut output = String::new();
        if let Err(fault) = self
            .runtime
            .process_request(&request, &mut self.context, &mut output)
        {
            warn!(path = request.path(), error = %fault, "Runtime faulted");
            self.context.reset();
            return Err(Error::pipeline_exhausted(request.path(), fault.message));
        }

        let (session, response) = self.context.capture.take();
        let (action_executed, result_executed) = self.context.record.take();

        if let Some(response) = &response {
            let merged = self.cookies.merge(&response.cookies, Utc::now());
            if merged.stored + merged.rescinded > 0 {
                debug!(
                    stored = merged.stored,
                    rescinded = merged.rescinded,
                    "Merged response cookies"
                );
            }
        }
        if session.is_some() {
            self.session = session;
        }

        Ok(RequestResult {
            response_text: output,
            action_executed,
            result_executed,
            response,
        })
    }
}

impl std::fmt::Debug for BrowsingSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowsingSession")
            .field("virtual_path", &self.virtual_path)
            .field("cookies", &self.cookies)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
