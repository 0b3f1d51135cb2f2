//! Per-request interception state.
//!
//! A [`RequestContext`] is passed explicitly through every
//! [`ApplicationRuntime::process_request`](crate::runtime::ApplicationRuntime::process_request)
//! call. It is reset before submission, written by the runtime's hook and
//! filter during the request, and read once afterwards.

pub mod capture;

pub use capture::{CaptureHook, CrossRequestCapture};

use serde::{Deserialize, Serialize};

use crate::runtime::{ActionExecutedContext, ActionFilter, ResultExecutedContext};

/// Action and result execution outcomes recorded for one request.
///
/// Both stay empty when the request never reached dispatch (e.g. not found).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptionRecord {
    action_executed: Option<ActionExecutedContext>,
    result_executed: Option<ResultExecutedContext>,
}

impl InterceptionRecord {
    pub fn reset(&mut self) {
        self.action_executed = None;
        self.result_executed = None;
    }

    pub fn record_action(&mut self, executed: &ActionExecutedContext) {
        self.action_executed = Some(executed.clone());
    }

    pub fn record_result(&mut self, executed: &ResultExecutedContext) {
        self.result_executed = Some(executed.clone());
    }

    pub fn action_executed(&self) -> Option<&ActionExecutedContext> {
        self.action_executed.as_ref()
    }

    pub fn result_executed(&self) -> Option<&ResultExecutedContext> {
        self.result_executed.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.action_executed.is_none() && self.result_executed.is_none()
    }

    /// Move both records out, leaving this one empty.
    pub fn take(&mut self) -> (Option<ActionExecutedContext>, Option<ResultExecutedContext>) {
        (self.action_executed.take(), self.result_executed.take())
    }
}

/// Everything the runtime's extension points write during one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub capture: CrossRequestCapture,
    pub record: InterceptionRecord,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.capture.reset();
        self.record.reset();
    }

    pub fn is_empty(&self) -> bool {
        self.capture.is_empty() && self.record.is_empty()
    }
}

/// Pipeline filter that records action and result execution.
///
/// Registered once when the host initialises, never per request.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterceptionFilter;

impl ActionFilter for InterceptionFilter {
    fn on_action_executed(&self, context: &mut RequestContext, executed: &ActionExecutedContext) {
        context.record.record_action(executed);
    }

    fn on_result_executed(&self, context: &mut RequestContext, executed: &ResultExecutedContext) {
        context.record.record_result(executed);
    }
}
