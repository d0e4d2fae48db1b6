//! OpenCode Server Lifecycle
//!
//! Spawns, reuses, and stops the one opencode server process per
//! workspace. `get_or_start` is idempotent under concurrent callers: the
//! already-running check is the fast path, and the spawn-and-wait path is
//! serialized so a second caller observes the first caller's result
//! instead of spawning a duplicate.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{app_data_dir, BridgeConfig};

use super::binary::resolve_binary_path;
use super::health::{HealthCheck, HttpHealthProbe};

pub(crate) const SERVER_HOST: &str = "127.0.0.1";

/// Stderr of the spawned server lands here for debugging
const SERVER_LOG_FILE: &str = "opencode-server.log";

/// Readiness poll backoff, doubled per attempt up to the cap
const POLL_INITIAL_MS: u64 = 100;
const POLL_MAX_MS: u64 = 1_000;

/// How long a SIGTERM gets before escalating to SIGKILL
const GRACEFUL_STOP: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("{0}")]
    NotInstalled(String),
    #[error("Server failed to start: {0}")]
    StartFailed(String),
    #[error("Server did not become healthy within {0:?}")]
    StartTimeout(Duration),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Server health status for diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub running: bool,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub uptime_seconds: Option<u64>,
}

/// One owned server process and the port it is bound to
struct ServerProcess {
    child: Child,
    port: u16,
    started_at: Instant,
}

impl ServerProcess {
    fn spawn(binary: &Path, port: u16, log_dir: Option<&Path>) -> Result<Self, ServerError> {
        // Redirect stderr to a log file for debugging; a log failure only
        // downgrades to discarding stderr.
        let stderr_target = log_dir
            .and_then(|dir| {
                std::fs::create_dir_all(dir).ok()?;
                let log_path = dir.join(SERVER_LOG_FILE);
                match File::create(&log_path) {
                    Ok(f) => {
                        debug!(path = %log_path.display(), "Redirecting opencode stderr to log file");
                        Some(Stdio::from(f))
                    }
                    Err(e) => {
                        warn!(error = %e, "Could not create opencode log file, suppressing stderr");
                        None
                    }
                }
            })
            .unwrap_or_else(Stdio::null);

        let child = Command::new(binary)
            .args(["serve", "--hostname", SERVER_HOST, "--port", &port.to_string()])
            .stdout(Stdio::null())
            .stderr(stderr_target)
            .spawn()
            .map_err(|e| {
                ServerError::StartFailed(format!("Failed to spawn {}: {}", binary.display(), e))
            })?;

        Ok(Self {
            child,
            port,
            started_at: Instant::now(),
        })
    }

    fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) | Err(_) => false,
        }
    }

    #[cfg(unix)]
    fn terminate(&self) {
        // Send SIGTERM via kill command
        let _ = Command::new("kill")
            .args(["-TERM", &self.child.id().to_string()])
            .output();
    }

    fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            self.kill();
        }
    }
}

/// Shut a process down gracefully: SIGTERM, bounded wait, then SIGKILL.
async fn shutdown(mut proc: ServerProcess) {
    #[cfg(unix)]
    {
        proc.terminate();
        let deadline = Instant::now() + GRACEFUL_STOP;
        while Instant::now() < deadline {
            if !proc.is_alive() {
                debug!(port = proc.port, "opencode server stopped gracefully");
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        warn!(port = proc.port, "Forced SIGKILL on opencode server");
    }
    proc.kill();
}

/// Pick an ephemeral port by binding and immediately releasing it.
fn free_port() -> Result<u16, ServerError> {
    let listener = std::net::TcpListener::bind((SERVER_HOST, 0))?;
    Ok(listener.local_addr()?.port())
}

/// Owns acquisition of the workspace's server process. One instance per
/// workspace, shared across every UI surface of that workspace.
pub struct ServerManager {
    binary_override: Option<String>,
    log_dir: Option<PathBuf>,
    probe: Arc<dyn HealthCheck>,
    start_timeout: Duration,
    inner: Mutex<Option<ServerProcess>>,
}

impl ServerManager {
    pub fn new(config: &BridgeConfig) -> Self {
        Self::with_probe(
            config.binary_path.clone(),
            app_data_dir().ok(),
            Arc::new(HttpHealthProbe::new()),
            Duration::from_millis(config.server_start_timeout_ms),
        )
    }

    /// Construct with an injected probe. Hosts and tests use this to
    /// substitute the readiness check.
    pub fn with_probe(
        binary_override: Option<String>,
        log_dir: Option<PathBuf>,
        probe: Arc<dyn HealthCheck>,
        start_timeout: Duration,
    ) -> Self {
        Self {
            binary_override,
            log_dir,
            probe,
            start_timeout,
            inner: Mutex::new(None),
        }
    }

    /// Return the port of the running server, spawning one if needed.
    ///
    /// The lock is held across the whole spawn-and-wait sequence, so
    /// concurrent callers with no running server queue up behind the first
    /// spawn and then take the fast path.
    pub async fn get_or_start(&self) -> Result<u16, ServerError> {
        let mut guard = self.inner.lock().await;

        if let Some(proc) = guard.as_mut() {
            if proc.is_alive() {
                debug!(port = proc.port, "Reusing running opencode server");
                return Ok(proc.port);
            }
            warn!(port = proc.port, "Owned opencode server has exited, respawning");
            *guard = None;
        }

        let binary = resolve_binary_path(self.binary_override.as_deref())?;
        let port = free_port()?;
        let mut proc = ServerProcess::spawn(&binary, port, self.log_dir.as_deref())?;
        info!(pid = proc.child.id(), port = port, "Started opencode server");

        // Poll until healthy, with backoff, bounded by the start timeout.
        // Dropping `proc` on the error paths kills the child.
        let deadline = Instant::now() + self.start_timeout;
        let mut delay = Duration::from_millis(POLL_INITIAL_MS);
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if self.probe.is_reachable(port).await {
                info!(port = port, attempts = attempts, "opencode server healthy");
                break;
            }
            if !proc.is_alive() {
                error!(port = port, "opencode server exited before becoming healthy");
                return Err(ServerError::StartFailed(
                    "process exited during startup".to_string(),
                ));
            }
            if Instant::now() + delay >= deadline {
                error!(port = port, timeout = ?self.start_timeout, "opencode server health wait timed out");
                return Err(ServerError::StartTimeout(self.start_timeout));
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_millis(POLL_MAX_MS));
        }

        *guard = Some(proc);
        Ok(port)
    }

    /// Reachability of a backend on `port`. Failures yield `false`, never
    /// an error.
    pub async fn is_running(&self, port: u16) -> bool {
        self.probe.is_reachable(port).await
    }

    /// Terminate the owned process if any; no-op otherwise.
    pub async fn stop(&self) {
        let proc = self.inner.lock().await.take();
        if let Some(proc) = proc {
            info!(port = proc.port, "Stopping opencode server");
            shutdown(proc).await;
        }
    }

    pub async fn status(&self) -> ServerStatus {
        let mut guard = self.inner.lock().await;
        match guard.as_mut() {
            Some(proc) => {
                let running = proc.is_alive();
                ServerStatus {
                    running,
                    port: Some(proc.port),
                    pid: running.then(|| proc.child.id()),
                    uptime_seconds: running.then(|| proc.started_at.elapsed().as_secs()),
                }
            }
            None => ServerStatus {
                running: false,
                port: None,
                pid: None,
                uptime_seconds: None,
            },
        }
    }
}
