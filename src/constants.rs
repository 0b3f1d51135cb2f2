//! Shared defaults for the harness.

/// Configuration file looked up by [`crate::config::HarnessConfig::load`].
pub const CONFIG_FILE_NAME: &str = "apphost.toml";

/// Virtual directory the application is mounted under.
pub const DEFAULT_VIRTUAL_PATH: &str = "/";

/// Path of the throwaway request issued to wake the application up.
pub const DEFAULT_BOOTSTRAP_PATH: &str = "default";

/// Default `EnvFilter` directive when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Content type the framework's form binding requires for posted fields.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Authority used when a simulated request needs an absolute URI.
pub const SIMULATED_HOST: &str = "localhost";

/// Name given to the boundary thread.
pub const BOUNDARY_THREAD_NAME: &str = "apphost-boundary";
