//! Messages crossing the isolation boundary.

use std::path::PathBuf;

use crate::browsing::BrowsingSession;

/// Unit of work executed on the boundary thread against the shared session.
///
/// Jobs carry their own reply channel; the boundary never sends anything
/// back on its own.
pub(crate) type Job = Box<dyn FnOnce(&mut BrowsingSession<'_>) + Send>;

/// Message from the host handle to the boundary thread.
pub(crate) enum BoundaryMessage {
    Run(Job),
    Shutdown,
}

impl std::fmt::Debug for BoundaryMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Run(_) => f.write_str("Run(..)"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Everything the boundary thread needs to boot the application.
#[derive(Debug, Clone)]
pub(crate) struct BootSettings {
    pub root: PathBuf,
    pub virtual_path: String,
    pub bootstrap_path: String,
}
