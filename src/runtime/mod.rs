//! Application runtime contract.
//!
//! The harness never reimplements routing, dispatch or rendering. It drives
//! an [`ApplicationRuntime`] through a fixed integration contract:
//!
//! - one throwaway request after [`ApplicationRuntime::boot`] to wake it up
//! - one post-processing hook ([`PostHandlerHook`]) that sees the session and
//!   response objects before the runtime discards them
//! - one pipeline filter ([`ActionFilter`]) that observes action and result
//!   execution
//! - [`ApplicationRuntime::rebuild_pipeline`] so registrations made after the
//!   runtime composed its pipeline take effect
//!
//! [`RouterRuntime`] implements the contract for an `axum::Router`.
//!
//! # Examples
//!
//! ```no_run
//! use apphost::runtime::RouterRuntime;
//! use apphost::BrowsingSession;
//! use axum::{Router, routing::get};
//!
//! # fn example() -> anyhow::Result<()> {
//! let app = Router::new().route("/home/index", get(|| async { "hello" }));
//! let mut runtime = RouterRuntime::new(app)?;
//!
//! let mut session = BrowsingSession::new(&mut runtime);
//! let result = session.get("home/index")?;
//! assert_eq!(result.response_text(), "hello");
//! # Ok(())
//! # }
//! ```

pub mod router;
pub mod types;

pub use router::RouterRuntime;
pub use types::{
    ActionExecutedContext, Cookie, ResultExecutedContext, RuntimeFault, RuntimeResponse,
    SessionHandle,
};

use std::path::Path;
use std::sync::Arc;

use crate::browsing::SimulatedRequest;
use crate::interception::RequestContext;

/// Hook attached to the runtime's post-processing stage.
///
/// Called once per request after the handler ran, while the session and
/// response objects are still reachable.
pub trait PostHandlerHook: Send + Sync {
    fn post_handler_execute(
        &self,
        context: &mut RequestContext,
        session: Option<&SessionHandle>,
        response: &RuntimeResponse,
    );
}

/// Filter registered in the runtime's action pipeline.
///
/// Neither callback fires for requests that never reach dispatch.
pub trait ActionFilter: Send + Sync {
    fn on_action_executed(&self, _context: &mut RequestContext, _executed: &ActionExecutedContext) {
    }

    fn on_result_executed(&self, _context: &mut RequestContext, _executed: &ResultExecutedContext) {
    }
}

/// The hosted web application and its framework.
///
/// Implementations live inside the isolation boundary and are only ever
/// driven from one thread, one request at a time.
pub trait ApplicationRuntime {
    /// Prepare the application rooted at `root`, mounted at `virtual_path`.
    ///
    /// # Errors
    ///
    /// Returns a fault if the application cannot start.
    fn boot(&mut self, root: &Path, virtual_path: &str) -> Result<(), RuntimeFault>;

    /// Register the post-processing hook.
    fn add_post_handler_hook(&mut self, hook: Arc<dyn PostHandlerHook>);

    /// Register a pipeline filter.
    fn add_filter(&mut self, filter: Arc<dyn ActionFilter>);

    /// Recompose the request pipeline so earlier registrations take effect.
    fn rebuild_pipeline(&mut self);

    /// Process one simulated request, appending the response text to
    /// `output`. Hooks and filters receive `context`.
    ///
    /// # Errors
    ///
    /// Returns a fault only when the runtime hits an unhandled internal
    /// error. Ordinary error responses (404, 500 pages) are `Ok`.
    fn process_request(
        &mut self,
        request: &SimulatedRequest,
        context: &mut RequestContext,
        output: &mut String,
    ) -> Result<(), RuntimeFault>;

    /// Application end notification, fired when the host is torn down.
    fn shutdown(&mut self) {}
}
