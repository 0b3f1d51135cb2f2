//! In-process integration test host for web applications.
//!
//! `apphost` drives an application's full request pipeline (routing,
//! dispatch, filters, session and cookie handling) without opening a
//! socket. Requests are fabricated in memory, submitted to the hosted
//! application, and their outcome is captured for inspection.
//!
//! # Pieces
//!
//! - [`AppHost`]: owns one hosted application behind an isolation boundary
//!   (a dedicated thread) and runs test scripts inside it
//! - [`BrowsingSession`]: one simulated client carrying cookies and the
//!   application's session handle from request to request
//! - [`ApplicationRuntime`]: the contract a hosted application implements;
//!   [`RouterRuntime`] implements it for any `axum::Router`
//! - [`interception`]: the completion hook and action filter that rescue
//!   per-request state for the session to read back
//!
//! # Example
//!
//! ```no_run
//! use apphost::{AppHost, RouterRuntime};
//! use axum::{Router, routing::get};
//!
//! # fn main() -> apphost::Result<()> {
//! let app = Router::new().route("/home/index", get(|| async { "Welcome" }));
//! let host = AppHost::create("./site", "/", move || RouterRuntime::new(app))?;
//!
//! let mut pages_seen = 0u32;
//! host.run_function(&mut pages_seen, |pages_seen, session| {
//!     let result = session.get("~/home/index")?;
//!     assert!(result.action_executed().is_some());
//!     *pages_seen += 1;
//!     Ok(())
//! })?;
//! assert_eq!(pages_seen, 1);
//! # Ok(())
//! # }
//! ```

pub mod browsing;
pub mod config;
pub mod constants;
pub mod error;
pub mod hosting;
pub mod interception;
pub mod logging;
pub mod runtime;

pub use browsing::{
    BrowsingSession, CookieJar, FormFields, HttpVerb, KnownHeader, RequestResult, SimulatedRequest,
};
pub use config::HarnessConfig;
pub use error::{Error, Result};
pub use hosting::{AppHost, AppHostBuilder};
pub use interception::RequestContext;
pub use runtime::{ApplicationRuntime, Cookie, RouterRuntime, RuntimeResponse, SessionHandle};

use std::any::Any;

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
