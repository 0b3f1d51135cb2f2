//! Isolated execution host.
//!
//! An [`AppHost`] owns one hosted application behind an isolation boundary:
//! a dedicated OS thread that constructs the runtime, boots it, and then
//! serves jobs from an inbox until it is told to stop. Test code never
//! touches the runtime directly. Every operation is a message carrying a
//! script; the caller blocks on a reply channel until the script finished.
//!
//! The boundary thread keeps a single [`BrowsingSession`], so cookies and
//! the session handle persist across scripts for the life of the host.
//!
//! ```no_run
//! use apphost::{AppHost, RouterRuntime};
//! use axum::{Router, routing::get};
//!
//! # fn main() -> apphost::Result<()> {
//! let host = AppHost::builder("./site").start(|| {
//!     RouterRuntime::new(Router::new().route("/home/index", get(|| async { "hello" })))
//! })?;
//!
//! let text = host.run_function(&mut (), |_, session| {
//!     Ok(session.get("~/home/index")?.response_text)
//! })?;
//! assert_eq!(text, "hello");
//! # Ok(())
//! # }
//! ```

pub mod delegate;
mod types;

pub use delegate::{
    DelegateOutcome, SerializableDelegate, merge_matching_fields, sync_closure_state,
};

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::browsing::BrowsingSession;
use crate::config::HarnessConfig;
use crate::constants::{BOUNDARY_THREAD_NAME, DEFAULT_BOOTSTRAP_PATH, DEFAULT_VIRTUAL_PATH};
use crate::error::{Error, Result};
use crate::interception::{CaptureHook, InterceptionFilter};
use crate::runtime::ApplicationRuntime;
use types::{BootSettings, BoundaryMessage, Job};

/// Builder for [`AppHost`].
#[derive(Debug, Clone)]
#[must_use]
pub struct AppHostBuilder {
    settings: BootSettings,
}

impl AppHostBuilder {
    /// Virtual path the application is mounted under. Defaults to `/`.
    pub fn virtual_path(mut self, virtual_path: impl Into<String>) -> Self {
        self.settings.virtual_path = virtual_path.into();
        self
    }

    /// Path of the throwaway request issued to warm the application up.
    pub fn bootstrap_path(mut self, bootstrap_path: impl Into<String>) -> Self {
        self.settings.bootstrap_path = bootstrap_path.into();
        self
    }

    /// Spawn the boundary, construct the runtime inside it and boot it.
    ///
    /// `factory` runs on the boundary thread, so the runtime itself does
    /// not need to be `Send`.
    ///
    /// # Errors
    ///
    /// Returns `Initialization` if the root is not a directory, the factory
    /// fails, the runtime refuses to boot or the bootstrap request faults.
    pub fn start<R, F>(self, factory: F) -> Result<AppHost>
    where
        R: ApplicationRuntime + 'static,
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
    {
        let settings = self.settings;
        if !settings.root.is_dir() {
            return Err(Error::initialization(
                &settings.root,
                "application root is not an existing directory",
            ));
        }

        let id = Uuid::new_v4();
        let (inbox_tx, inbox_rx) = mpsc::channel::<BoundaryMessage>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let boundary_settings = settings.clone();
        let boundary = thread::Builder::new()
            .name(BOUNDARY_THREAD_NAME.to_string())
            .spawn(move || serve(id, boundary_settings, factory, &ready_tx, &inbox_rx))
            .map_err(|e| Error::io("spawning isolation boundary", e))?;

        let booted = ready_rx.recv().unwrap_or_else(|_| {
            Err(Error::initialization(
                &settings.root,
                "boundary thread exited before the application booted",
            ))
        });
        if let Err(e) = booted {
            let _ = boundary.join();
            return Err(e);
        }

        info!(
            host = %id,
            root = %settings.root.display(),
            virtual_path = %settings.virtual_path,
            "Application host ready"
        );

        Ok(AppHost {
            id,
            root: settings.root,
            virtual_path: settings.virtual_path,
            inbox: Some(inbox_tx),
            boundary: Some(boundary),
        })
    }
}

/// Handle to one hosted application instance.
///
/// Dropping the handle shuts the boundary down and fires the runtime's
/// `shutdown` notification.
pub struct AppHost {
    id: Uuid,
    root: PathBuf,
    virtual_path: String,
    inbox: Option<Sender<BoundaryMessage>>,
    boundary: Option<JoinHandle<()>>,
}

impl AppHost {
    pub fn builder(root: impl Into<PathBuf>) -> AppHostBuilder {
        AppHostBuilder {
            settings: BootSettings {
                root: root.into(),
                virtual_path: DEFAULT_VIRTUAL_PATH.to_string(),
                bootstrap_path: DEFAULT_BOOTSTRAP_PATH.to_string(),
            },
        }
    }

    /// Boot the application at `root` mounted under `virtual_path`.
    ///
    /// # Errors
    ///
    /// See [`AppHostBuilder::start`].
    pub fn create<R, F>(root: impl Into<PathBuf>, virtual_path: &str, factory: F) -> Result<Self>
    where
        R: ApplicationRuntime + 'static,
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
    {
        Self::builder(root).virtual_path(virtual_path).start(factory)
    }

    /// Boot the application described by a harness configuration.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration is invalid, otherwise see
    /// [`AppHostBuilder::start`].
    pub fn from_config<R, F>(config: &HarnessConfig, factory: F) -> Result<Self>
    where
        R: ApplicationRuntime + 'static,
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
    {
        let validation = config.validate()?;
        for warning in &validation.warnings {
            warn!(warning = %warning, "Harness configuration warning");
        }

        Self::builder(&config.app.root)
            .virtual_path(&config.app.virtual_path)
            .bootstrap_path(&config.app.bootstrap_path)
            .start(factory)
    }

    /// Unique id of this host, used to correlate log lines.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn virtual_path(&self) -> &str {
        &self.virtual_path
    }

    /// Whether the boundary is still accepting scripts.
    pub fn is_running(&self) -> bool {
        self.inbox.is_some()
    }

    /// Run a script against the shared browsing session.
    ///
    /// # Errors
    ///
    /// Returns `ScriptExecution` if the script fails or panics, `Boundary`
    /// if the host has been shut down.
    pub fn run<F>(&self, script: F) -> Result<()>
    where
        F: FnOnce(&mut BrowsingSession<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        let delegate = SerializableDelegate::action(script);
        self.submit(move |session| delegate.invoke(session).map(|_| ()))
    }

    /// Run a result-producing script that captures `state`.
    ///
    /// The script works on a copy of `state` inside the boundary. When it
    /// returns, fields present both in the copy and in `state` with the
    /// same shape are written back, so the caller observes the script's
    /// mutations. Fields unique to one side are dropped.
    ///
    /// # Errors
    ///
    /// Returns `ScriptExecution` if the script fails or panics (`state` is
    /// left untouched), `InvalidArgument` if `state` does not serialise,
    /// `Boundary` if the host has been shut down or the result does not
    /// survive the trip back.
    pub fn run_function<S, R, F>(&self, state: &mut S, script: F) -> Result<R>
    where
        S: Serialize + DeserializeOwned + 'static,
        R: Serialize + DeserializeOwned + 'static,
        F: FnOnce(&mut S, &mut BrowsingSession<'_>) -> anyhow::Result<R> + Send + 'static,
    {
        let delegate = SerializableDelegate::capture(state, script)?;
        let outcome = self.submit(move |session| delegate.invoke(session))?;

        sync_closure_state(state, outcome.state)?;
        serde_json::from_value(outcome.result)
            .map_err(|e| Error::boundary(format!("script result did not survive transfer: {e}")))
    }

    /// Run code directly against the hosted runtime.
    ///
    /// # Errors
    ///
    /// Returns `ScriptExecution` if the code fails or panics, `Boundary` if
    /// the host has been shut down.
    pub fn execute<R, F>(&self, code: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn ApplicationRuntime) -> anyhow::Result<R> + Send + 'static,
    {
        self.submit(move |session| code(session.runtime_mut()).map_err(Error::script))
    }

    /// Stop the boundary and fire the runtime's shutdown notification.
    ///
    /// Idempotent: later calls, and the eventual drop, do nothing.
    ///
    /// # Errors
    ///
    /// Returns `Boundary` if the boundary thread died instead of exiting.
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(inbox) = self.inbox.take() else {
            return Ok(());
        };
        // The boundary may already be gone; joining reports that below.
        let _ = inbox.send(BoundaryMessage::Shutdown);

        if let Some(boundary) = self.boundary.take()
            && boundary.join().is_err()
        {
            return Err(Error::boundary("boundary thread panicked during shutdown"));
        }
        info!(host = %self.id, "Application host stopped");
        Ok(())
    }

    fn submit<R, F>(&self, job: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut BrowsingSession<'_>) -> Result<R> + Send + 'static,
    {
        let inbox = self
            .inbox
            .as_ref()
            .ok_or_else(|| Error::boundary("host has been shut down"))?;

        let (reply_tx, reply_rx) = mpsc::channel();
        let job: Job = Box::new(move |session| {
            let _ = reply_tx.send(dispatch(session, job));
        });

        inbox
            .send(BoundaryMessage::Run(job))
            .map_err(|_| Error::boundary("boundary thread has exited"))?;
        reply_rx
            .recv()
            .map_err(|_| Error::boundary("boundary thread exited without replying"))?
    }
}

impl Drop for AppHost {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(host = %self.id, error = %e, "Application host did not stop cleanly");
        }
    }
}

impl std::fmt::Debug for AppHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppHost")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("virtual_path", &self.virtual_path)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Run a job, turning a panic into a script error.
fn dispatch<R>(
    session: &mut BrowsingSession<'_>,
    job: impl FnOnce(&mut BrowsingSession<'_>) -> Result<R>,
) -> Result<R> {
    let outcome = catch_unwind(AssertUnwindSafe(|| job(session))).unwrap_or_else(|panic| {
        Err(Error::script(anyhow::anyhow!(
            "script panicked: {}",
            crate::panic_message(panic.as_ref())
        )))
    });

    if let Err(e) = &outcome {
        warn!(error = %e, "Script failed inside the boundary");
    }
    outcome
}

/// Body of the boundary thread.
fn serve<R, F>(
    id: Uuid,
    settings: BootSettings,
    factory: F,
    ready: &Sender<Result<()>>,
    inbox: &Receiver<BoundaryMessage>,
) where
    R: ApplicationRuntime,
    F: FnOnce() -> anyhow::Result<R>,
{
    let mut runtime = match boot(factory, &settings) {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(host = %id, error = %e, "Application failed to boot");
            let _ = ready.send(Err(e));
            return;
        },
    };
    if ready.send(Ok(())).is_err() {
        runtime.shutdown();
        return;
    }

    {
        let mut session =
            BrowsingSession::new(&mut runtime).with_virtual_path(settings.virtual_path.clone());

        while let Ok(message) = inbox.recv() {
            match message {
                BoundaryMessage::Run(job) => job(&mut session),
                BoundaryMessage::Shutdown => break,
            }
        }
        debug!(host = %id, session = ?session, "Boundary inbox closed");
    }

    runtime.shutdown();
}

/// Construct, boot and warm up the runtime, then register the hook and
/// filter once for its whole life.
fn boot<R, F>(factory: F, settings: &BootSettings) -> Result<R>
where
    R: ApplicationRuntime,
    F: FnOnce() -> anyhow::Result<R>,
{
    let root = &settings.root;
    let mut runtime = match catch_unwind(AssertUnwindSafe(factory)) {
        Ok(Ok(runtime)) => runtime,
        Ok(Err(e)) => return Err(Error::initialization(root, format!("{e:#}"))),
        Err(panic) => {
            return Err(Error::initialization(
                root,
                format!("runtime factory panicked: {}", crate::panic_message(panic.as_ref())),
            ));
        },
    };

    runtime
        .boot(root, &settings.virtual_path)
        .map_err(|fault| Error::initialization(root, fault.message))?;

    // Throwaway request so the application finishes its lazy start-up. Its
    // cookies belong to nobody, hence the separate session.
    BrowsingSession::new(&mut runtime)
        .with_virtual_path(settings.virtual_path.clone())
        .get(&settings.bootstrap_path)
        .map_err(|e| Error::initialization(root, format!("bootstrap request failed: {e}")))?;

    runtime.add_filter(std::sync::Arc::new(InterceptionFilter));
    runtime.add_post_handler_hook(std::sync::Arc::new(CaptureHook));
    runtime.rebuild_pipeline();

    debug!(bootstrap_path = %settings.bootstrap_path, "Application warmed up");
    Ok(runtime)
}
