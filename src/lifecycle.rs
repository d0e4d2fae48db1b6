//! Server/Session Lifecycle Orchestration
//!
//! Drives backend acquisition, session resolution, health monitoring, and
//! restart for one UI surface. Two shapes share this type: a long-lived
//! workspace-wide instance that resolves only the server port, and a
//! short-lived per-tab instance that additionally restores and persists
//! `{sessionId, port}` across structural UI moves.
//!
//! All public operations assume a single logical owner (the UI surface);
//! transitions are guarded against re-entrant duplicates, not against
//! genuinely concurrent multi-caller use of one instance.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{BridgeConfig, Settings};
use crate::editor_state::EditorState;
use crate::opencode::binary::is_opencode_installed;
use crate::opencode::client::SessionClient;
use crate::opencode::server::ServerManager;

const INSTALL_HINT: &str =
    "opencode CLI not found. Install with: curl -fsSL https://opencode.ai/install | bash";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Initializing,
    Running,
    Exited,
    Restarting,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Initializing => "initializing",
            LifecycleState::Running => "running",
            LifecycleState::Exited => "exited",
            LifecycleState::Restarting => "restarting",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("{0}")]
    Startup(String),
    #[error("{0}")]
    SessionResolution(String),
    #[error("Lifecycle already disposed")]
    Disposed,
}

/// Callback surface implemented by the host UI. Default impls are empty so
/// hosts subscribe only to what they render.
pub trait LifecycleObserver: Send + Sync {
    fn on_state_changed(&self, _state: LifecycleState) {}
    fn on_port_ready(&self, _port: u16) {}
    fn on_session_and_port_ready(&self, _session_id: &str, _port: u16) {}
    fn on_error(&self, _message: &str) {}
    fn on_process_exited(&self) {}
}

#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Resolve a session in addition to the server port (the per-tab
    /// shape). When false only `on_port_ready` fires.
    pub resolve_session: bool,
    /// Title for a freshly created session
    pub session_title: Option<String>,
    /// Retention limit applied after creations
    pub max_sessions: usize,
    /// Monitor polling interval
    pub health_check_interval: Duration,
    /// Explicit opencode executable, overriding discovery
    pub binary_path: Option<String>,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            resolve_session: true,
            session_title: None,
            max_sessions: 10,
            health_check_interval: Duration::from_secs(1),
            binary_path: None,
        }
    }
}

impl LifecycleOptions {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            max_sessions: config.max_sessions,
            health_check_interval: Duration::from_millis(config.health_check_interval_ms),
            binary_path: config.binary_path.clone(),
            ..Default::default()
        }
    }
}

struct MachineState {
    state: LifecycleState,
    port: Option<u16>,
    session_id: Option<String>,
    client: Option<Arc<SessionClient>>,
    /// Restoration inputs for the next `initialize`
    restored: EditorState,
}

struct LifecycleInner {
    server: Arc<ServerManager>,
    settings: Arc<dyn Settings>,
    observer: Mutex<Option<Arc<dyn LifecycleObserver>>>,
    options: LifecycleOptions,
    state: Mutex<MachineState>,
    monitoring: AtomicBool,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
    restart_in_flight: AtomicBool,
    disposed: AtomicBool,
}

/// The lifecycle state machine for one UI surface.
pub struct Lifecycle {
    inner: Arc<LifecycleInner>,
}

impl Lifecycle {
    pub fn new(
        server: Arc<ServerManager>,
        settings: Arc<dyn Settings>,
        observer: Arc<dyn LifecycleObserver>,
        options: LifecycleOptions,
    ) -> Self {
        Self {
            inner: Arc::new(LifecycleInner {
                server,
                settings,
                observer: Mutex::new(Some(observer)),
                options,
                state: Mutex::new(MachineState {
                    state: LifecycleState::Initializing,
                    port: None,
                    session_id: None,
                    client: None,
                    restored: EditorState::default(),
                }),
                monitoring: AtomicBool::new(false),
                monitor_task: Mutex::new(None),
                restart_in_flight: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state.lock().state
    }

    pub fn current_port(&self) -> Option<u16> {
        self.inner.state.lock().port
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.inner.state.lock().session_id.clone()
    }

    /// The session API client bound to the current port, once resolved.
    /// Hosts use it to drive session pickers and share actions.
    pub fn session_client(&self) -> Option<Arc<SessionClient>> {
        self.inner.state.lock().client.clone()
    }

    /// Snapshot the identity the host should persist. Pure, no I/O.
    pub fn serialize_state(&self) -> EditorState {
        let st = self.inner.state.lock();
        // Fall back to the restored inputs so identity survives a
        // structural move that happens before initialize completes.
        EditorState::new(
            st.session_id
                .clone()
                .or_else(|| st.restored.session_id.clone()),
            st.port.or(st.restored.port),
        )
    }

    /// Apply a persisted snapshot as the next `initialize`'s restoration
    /// inputs. No I/O or validation happens here; `initialize` validates.
    pub fn restore_state(&self, snapshot: EditorState) {
        self.inner.state.lock().restored = snapshot;
    }

    /// Resolve server and session, transition to RUNNING, and start the
    /// monitor. On failure the machine stays in INITIALIZING and the error
    /// is also reported through `on_error`; no retry is scheduled.
    pub async fn initialize(&self) -> Result<(), LifecycleError> {
        self.inner.clone().initialize().await
    }

    /// Tear down the current resolution and run `initialize` again with a
    /// forced fresh server acquisition. A duplicate call while a restart
    /// cycle is in flight is silently ignored.
    pub async fn restart(&self) -> Result<(), LifecycleError> {
        self.inner.clone().restart().await
    }

    /// React to the backend process dying. No-op unless RUNNING.
    pub async fn handle_process_exit(&self, auto_restart: bool) {
        self.inner.clone().handle_process_exit(auto_restart).await;
    }

    pub fn stop_process_monitoring(&self) {
        self.inner.stop_process_monitoring();
    }

    /// Stop monitoring, drop cached identity, detach the observer.
    /// Idempotent and terminal.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl LifecycleInner {
    fn emit(&self, f: impl FnOnce(&dyn LifecycleObserver)) {
        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            f(&*observer);
        }
    }

    fn set_state(&self, new_state: LifecycleState) {
        self.state.lock().state = new_state;
        debug!(state = %new_state, "Lifecycle state changed");
        self.emit(|o| o.on_state_changed(new_state));
    }

    fn report_error(&self, message: &str) {
        warn!(message = message, "Lifecycle error");
        self.emit(|o| o.on_error(message));
    }

    async fn initialize(self: Arc<Self>) -> Result<(), LifecycleError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(LifecycleError::Disposed);
        }
        self.set_state(LifecycleState::Initializing);

        if !is_opencode_installed(self.options.binary_path.as_deref()) {
            self.report_error(INSTALL_HINT);
            return Err(LifecycleError::Startup(INSTALL_HINT.to_string()));
        }

        // Server resolution: reuse the restored port only if something
        // actually answers on it.
        let restored_port = self.state.lock().restored.port;
        let port = match restored_port {
            Some(p) if self.server.is_running(p).await => {
                debug!(port = p, "Reusing restored server port");
                p
            }
            _ => match self.server.get_or_start().await {
                Ok(p) => p,
                Err(e) => {
                    let msg = format!("Failed to start opencode server: {e}");
                    self.report_error(&msg);
                    return Err(LifecycleError::Startup(msg));
                }
            },
        };

        let client = Arc::new(SessionClient::new(port, self.options.max_sessions));
        {
            let mut st = self.state.lock();
            st.port = Some(port);
            st.client = Some(client.clone());
        }

        // Session resolution is independent of server resolution: either
        // side may reuse while the other is freshly created.
        let session_id = if self.options.resolve_session {
            Some(self.resolve_session(&client).await?)
        } else {
            None
        };

        self.set_state(LifecycleState::Running);
        match &session_id {
            Some(id) => {
                info!(session = %id, port = port, "Lifecycle running");
                self.emit(|o| o.on_session_and_port_ready(id, port));
            }
            None => {
                info!(port = port, "Lifecycle running");
                self.emit(|o| o.on_port_ready(port));
            }
        }
        self.start_process_monitoring();
        Ok(())
    }

    async fn resolve_session(&self, client: &Arc<SessionClient>) -> Result<String, LifecycleError> {
        let restored_id = self.state.lock().restored.session_id.clone();
        let reused = match restored_id {
            Some(id) => match client.get(&id).await {
                Ok(found) => {
                    if found.is_none() {
                        debug!(id = %id, "Restored session is gone, creating a new one");
                    }
                    found.map(|s| s.id)
                }
                Err(e) => {
                    let msg = format!("Failed to restore session: {e}");
                    self.report_error(&msg);
                    return Err(LifecycleError::SessionResolution(msg));
                }
            },
            None => None,
        };

        let session_id = match reused {
            Some(id) => id,
            None => match client.create(self.options.session_title.as_deref()).await {
                Ok(session) => session.id,
                Err(e) => {
                    let msg = format!("Failed to create session: {e}");
                    self.report_error(&msg);
                    return Err(LifecycleError::SessionResolution(msg));
                }
            },
        };

        self.state.lock().session_id = Some(session_id.clone());
        Ok(session_id)
    }

    async fn handle_process_exit(self: Arc<Self>, auto_restart: bool) {
        {
            let mut st = self.state.lock();
            if st.state != LifecycleState::Running {
                debug!(state = %st.state, "Ignoring duplicate process exit signal");
                return;
            }
            st.state = LifecycleState::Exited;
        }
        debug!("Lifecycle state changed to exited");
        self.emit(|o| o.on_state_changed(LifecycleState::Exited));
        self.stop_process_monitoring();
        self.emit(|o| o.on_process_exited());

        if auto_restart {
            let _ = self.restart().await;
        }
    }

    async fn restart(self: Arc<Self>) -> Result<(), LifecycleError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(LifecycleError::Disposed);
        }
        // The guard spans the whole restart-triggered resolution cycle, so
        // a duplicate arriving after RESTARTING has already given way to
        // INITIALIZING is still recognized as a duplicate.
        if self.restart_in_flight.swap(true, Ordering::SeqCst) {
            debug!("Restart already in progress, ignoring duplicate request");
            return Ok(());
        }

        self.set_state(LifecycleState::Restarting);
        self.stop_process_monitoring();
        {
            let mut st = self.state.lock();
            // Force a fresh server acquisition, but keep the session
            // identity so a surviving backend session is re-attached.
            st.port = None;
            st.client = None;
            st.restored.port = None;
            let current = st.session_id.take();
            if current.is_some() {
                st.restored.session_id = current;
            }
        }

        // Boxed to break the monitor -> exit -> restart -> initialize
        // future cycle.
        let this = Arc::clone(&self);
        let fut: BoxFuture<'static, Result<(), LifecycleError>> =
            Box::pin(async move { this.initialize().await });
        let result = fut.await;

        self.restart_in_flight.store(false, Ordering::SeqCst);
        result
    }

    fn start_process_monitoring(self: Arc<Self>) {
        self.stop_process_monitoring();
        self.monitoring.store(true, Ordering::SeqCst);

        let inner = Arc::clone(&self);
        let interval = self.options.health_check_interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !inner.monitoring.load(Ordering::SeqCst) {
                    break;
                }
                let port = {
                    let st = inner.state.lock();
                    if st.state != LifecycleState::Running {
                        None
                    } else {
                        st.port
                    }
                };
                let Some(port) = port else { break };
                if !inner.server.is_running(port).await {
                    info!(port = port, "Health check failed, treating server as exited");
                    // Settings are read at the moment the exit is handled.
                    let auto_restart = inner.settings.auto_restart_on_exit();
                    inner.clone().handle_process_exit(auto_restart).await;
                    break;
                }
            }
        });
        *self.monitor_task.lock() = Some(handle);
    }

    fn stop_process_monitoring(&self) {
        self.monitoring.store(false, Ordering::SeqCst);
        if let Some(handle) = self.monitor_task.lock().take() {
            // The exit path runs on the monitor task itself; aborting the
            // task we are on would cancel the restart mid-flight. It exits
            // through the flag instead.
            if tokio::task::try_id() != Some(handle.id()) {
                handle.abort();
            }
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Disposing lifecycle");
        self.stop_process_monitoring();
        {
            let mut st = self.state.lock();
            st.port = None;
            st.session_id = None;
            st.client = None;
            st.restored = EditorState::default();
        }
        *self.observer.lock() = None;
    }
}
