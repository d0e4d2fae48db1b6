//! Session Overflow Cleanup
//!
//! After each session creation the backend session set is trimmed to the
//! N most recently updated. Deletion failures are logged and never roll
//! back the creation that triggered them.

use tracing::{debug, info, warn};

use super::client::{SessionApiError, SessionClient};

/// Default retention limit
pub const DEFAULT_MAX_SESSIONS: usize = 10;

/// Retains only the most-recently-updated sessions.
#[derive(Debug, Clone, Copy)]
pub struct CleanupPolicy {
    pub max_sessions: usize,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

impl CleanupPolicy {
    pub fn new(max_sessions: usize) -> Self {
        Self { max_sessions }
    }

    /// Re-list and delete oldest-by-`updatedAt` sessions until the limit
    /// holds. Returns how many were removed. Individual deletion failures
    /// are logged and skipped.
    pub async fn enforce(&self, client: &SessionClient) -> Result<usize, SessionApiError> {
        let mut sessions = client.list(true).await?;
        if sessions.len() <= self.max_sessions {
            debug!(
                count = sessions.len(),
                limit = self.max_sessions,
                "Session count within limit"
            );
            return Ok(0);
        }

        // Newest first; everything past the limit goes.
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let excess = sessions.split_off(self.max_sessions);

        let mut removed = 0;
        for session in excess {
            match client.delete(&session.id).await {
                Ok(true) => removed += 1,
                Ok(false) => warn!(id = %session.id, "Session vanished before cleanup"),
                Err(e) => warn!(id = %session.id, error = %e, "Failed to delete session during cleanup"),
            }
        }
        info!(removed = removed, limit = self.max_sessions, "Trimmed session set");
        Ok(removed)
    }
}
