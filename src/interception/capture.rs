//! Cross-request state capture.
//!
//! The runtime tears down its session and response objects once a request
//! completes. [`CaptureHook`] copies them into a [`CrossRequestCapture`] at
//! the last moment they are valid.

use serde::{Deserialize, Serialize};

use super::RequestContext;
use crate::runtime::{PostHandlerHook, RuntimeResponse, SessionHandle};

/// Write-once-per-request slots for the session handle and response.
///
/// Must be reset before every submission, otherwise the previous request's
/// objects would be read back as the current one's.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossRequestCapture {
    session: Option<SessionHandle>,
    response: Option<RuntimeResponse>,
}

impl CrossRequestCapture {
    pub fn reset(&mut self) {
        self.session = None;
        self.response = None;
    }

    /// Store the session handle unless one was already captured.
    ///
    /// Returns whether the slot was written.
    pub fn set_session_if_empty(&mut self, session: &SessionHandle) -> bool {
        if self.session.is_some() {
            return false;
        }
        self.session = Some(session.clone());
        true
    }

    /// Store the response unless one was already captured.
    pub fn set_response_if_empty(&mut self, response: &RuntimeResponse) -> bool {
        if self.response.is_some() {
            return false;
        }
        self.response = Some(response.clone());
        true
    }

    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    pub fn response(&self) -> Option<&RuntimeResponse> {
        self.response.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.session.is_none() && self.response.is_none()
    }

    /// Move both slots out, leaving the capture empty.
    pub fn take(&mut self) -> (Option<SessionHandle>, Option<RuntimeResponse>) {
        (self.session.take(), self.response.take())
    }
}

/// Post-processing hook that feeds [`CrossRequestCapture`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CaptureHook;

impl PostHandlerHook for CaptureHook {
    fn post_handler_execute(
        &self,
        context: &mut RequestContext,
        session: Option<&SessionHandle>,
        response: &RuntimeResponse,
    ) {
        if let Some(session) = session {
            context.capture.set_session_if_empty(session);
        }
        context.capture.set_response_if_empty(response);
    }
}
