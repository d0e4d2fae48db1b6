//! Backend Health Probe
//!
//! A bounded-timeout reachability check against a backend port. The probe
//! never errors: connection refusal, timeout, and DNS weirdness all
//! collapse to `false`. A negative result is the designed signal into the
//! lifecycle's exit path, not an exception.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::trace;

/// Per-request budget; the monitor loop must never block on a probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Whether a backend answers on `port`. Must return within the probe
    /// timeout and must not panic or error.
    async fn is_reachable(&self, port: u16) -> bool;
}

/// HTTP probe against the session API. Any HTTP response counts as
/// reachable; only transport failures mean the backend is gone.
pub struct HttpHealthProbe {
    http: Client,
}

impl HttpHealthProbe {
    pub fn new() -> Self {
        let http = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .connect_timeout(PROBE_CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { http }
    }
}

impl Default for HttpHealthProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthCheck for HttpHealthProbe {
    async fn is_reachable(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{port}/session");
        let reachable = self.http.get(&url).send().await.is_ok();
        trace!(port = port, reachable = reachable, "Health probe");
        reachable
    }
}
