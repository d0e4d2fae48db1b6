//! Session API Client
//!
//! Thin CRUD facade over the opencode server's session HTTP API, with a
//! small invalidate-on-write cache. Absent sessions (404) are a normal
//! outcome, surfaced as `None`/`false` rather than errors.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::cleanup::CleanupPolicy;
use super::server::SERVER_HOST;

#[derive(Error, Debug)]
pub enum SessionApiError {
    #[error("Session API HTTP error: {0}")]
    Http(String),
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

impl From<reqwest::Error> for SessionApiError {
    fn from(e: reqwest::Error) -> Self {
        SessionApiError::Http(e.to_string())
    }
}

/// A session as the backend reports it. The backend owns this data; the
/// client only caches copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub directory: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShareInfo {
    url: String,
}

/// Cached copies of backend sessions. Cleared by any mutating call or an
/// explicit force-refresh; never by time alone.
#[derive(Default)]
struct SessionCache {
    by_id: HashMap<String, Session>,
    list: Option<Vec<Session>>,
}

/// HTTP client for one backend instance (one port).
pub struct SessionClient {
    http: Client,
    base_url: String,
    cache: Mutex<SessionCache>,
    cleanup: CleanupPolicy,
}

impl SessionClient {
    pub fn new(port: u16, max_sessions: usize) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: format!("http://{SERVER_HOST}:{port}"),
            cache: Mutex::new(SessionCache::default()),
            cleanup: CleanupPolicy::new(max_sessions),
        }
    }

    /// Create a session, then trim the backend session set to the retention
    /// limit. Cleanup failures are logged and never undo the creation.
    pub async fn create(&self, title: Option<&str>) -> Result<Session, SessionApiError> {
        let mut body = json!({});
        if let Some(t) = title {
            body["title"] = json!(t);
        }

        let resp = self
            .http
            .post(format!("{}/session", self.base_url))
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            error!(status = %status, "Session create failed");
            return Err(SessionApiError::Http(format!(
                "Create session failed ({status}): {text}"
            )));
        }

        let session: Session = serde_json::from_str(&text)
            .map_err(|e| SessionApiError::Deserialize(format!("{e}: {text}")))?;
        info!(id = %session.id, "Created session");
        self.invalidate();

        if let Err(e) = self.cleanup.enforce(self).await {
            warn!(error = %e, "Session cleanup after create failed");
        }

        Ok(session)
    }

    /// List sessions, serving the cached snapshot unless forced or empty.
    pub async fn list(&self, force_refresh: bool) -> Result<Vec<Session>, SessionApiError> {
        if !force_refresh {
            if let Some(cached) = self.cache.lock().list.clone() {
                debug!(count = cached.len(), "Session list served from cache");
                return Ok(cached);
            }
        }

        let resp = self
            .http
            .get(format!("{}/session", self.base_url))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SessionApiError::Http(format!(
                "List sessions failed: {}",
                resp.status()
            )));
        }
        let sessions: Vec<Session> = resp
            .json()
            .await
            .map_err(|e| SessionApiError::Deserialize(e.to_string()))?;

        let mut cache = self.cache.lock();
        cache.by_id = sessions.iter().map(|s| (s.id.clone(), s.clone())).collect();
        cache.list = Some(sessions.clone());
        debug!(count = sessions.len(), "Refreshed session list");
        Ok(sessions)
    }

    /// Single-item fetch. `None` means the session no longer exists
    /// server-side, which is a normal outcome.
    pub async fn get(&self, id: &str) -> Result<Option<Session>, SessionApiError> {
        if let Some(cached) = self.cache.lock().by_id.get(id).cloned() {
            return Ok(Some(cached));
        }

        let resp = self
            .http
            .get(format!("{}/session/{}", self.base_url, id))
            .send()
            .await?;
        if resp.status().as_u16() == 404 {
            debug!(id = %id, "Session not found on backend");
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(SessionApiError::Http(format!(
                "Get session failed: {}",
                resp.status()
            )));
        }
        let session: Session = resp
            .json()
            .await
            .map_err(|e| SessionApiError::Deserialize(e.to_string()))?;
        self.cache
            .lock()
            .by_id
            .insert(session.id.clone(), session.clone());
        Ok(Some(session))
    }

    /// Delete a session. `false` means it was already gone.
    pub async fn delete(&self, id: &str) -> Result<bool, SessionApiError> {
        let resp = self
            .http
            .delete(format!("{}/session/{}", self.base_url, id))
            .send()
            .await?;
        if resp.status().as_u16() == 404 {
            warn!(id = %id, "Session already deleted (404)");
            return Ok(false);
        }
        if !resp.status().is_success() {
            return Err(SessionApiError::Http(format!(
                "Delete session failed: {}",
                resp.status()
            )));
        }
        info!(id = %id, "Deleted session");
        self.invalidate();
        Ok(true)
    }

    /// Share a session, returning its share URL. `None` means the session
    /// no longer exists.
    pub async fn share(&self, id: &str) -> Result<Option<String>, SessionApiError> {
        let resp = self
            .http
            .post(format!("{}/session/{}/share", self.base_url, id))
            .send()
            .await?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(SessionApiError::Http(format!(
                "Share session failed: {}",
                resp.status()
            )));
        }
        let share: ShareInfo = resp
            .json()
            .await
            .map_err(|e| SessionApiError::Deserialize(e.to_string()))?;
        info!(id = %id, "Shared session");
        self.invalidate();
        Ok(Some(share.url))
    }

    /// Revoke a session's share URL.
    pub async fn unshare(&self, id: &str) -> Result<bool, SessionApiError> {
        let resp = self
            .http
            .delete(format!("{}/session/{}/share", self.base_url, id))
            .send()
            .await?;
        if resp.status().as_u16() == 404 {
            return Ok(false);
        }
        if !resp.status().is_success() {
            return Err(SessionApiError::Http(format!(
                "Unshare session failed: {}",
                resp.status()
            )));
        }
        info!(id = %id, "Unshared session");
        self.invalidate();
        Ok(true)
    }

    /// Drop all cached copies. The next read fetches fresh data.
    pub fn invalidate(&self) {
        let mut cache = self.cache.lock();
        cache.by_id.clear();
        cache.list = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session_json(id: &str, minutes_old: i64) -> serde_json::Value {
        let t = Utc::now() - chrono::Duration::minutes(minutes_old);
        json!({
            "id": id,
            "title": format!("session {id}"),
            "directory": "/workspace",
            "createdAt": t,
            "updatedAt": t,
        })
    }

    fn client_for(server: &MockServer, max_sessions: usize) -> SessionClient {
        SessionClient::new(server.address().port(), max_sessions)
    }

    #[tokio::test]
    async fn test_list_serves_cache_until_forced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([session_json("ses_1", 5), session_json("ses_2", 1)])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        let fresh = client.list(true).await.unwrap();
        let cached = client.list(false).await.unwrap();
        assert_eq!(fresh.len(), 2);
        assert_eq!(
            fresh.iter().map(|s| &s.id).collect::<Vec<_>>(),
            cached.iter().map(|s| &s.id).collect::<Vec<_>>()
        );
        // expect(1) verifies the second call never reached the backend
    }

    #[tokio::test]
    async fn test_empty_cache_fetches_even_unforced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        assert!(client.list(false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_returns_session_and_refreshes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_json("ses_new", 0)))
            .expect(1)
            .mount(&server)
            .await;
        // One list from the post-create cleanup pass, none from the cached
        // read afterwards.
        Mock::given(method("GET"))
            .and(path("/session"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([session_json("ses_new", 0)])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        let created = client.create(Some("scratch")).await.unwrap();
        assert_eq!(created.id, "ses_new");

        let listed = client.list(false).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "ses_new");
    }

    #[tokio::test]
    async fn test_get_absent_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session/ses_old"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        assert!(client.get("ses_old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_caches_single_item() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session/ses_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_json("ses_1", 1)))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        assert!(client.get("ses_1").await.unwrap().is_some());
        assert!(client.get("ses_1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_invalidates_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/session"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([session_json("ses_1", 1)])),
            )
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/session/ses_1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        client.list(true).await.unwrap();
        assert!(client.delete("ses_1").await.unwrap());
        // Cache was cleared, so the unforced list hits the backend again.
        client.list(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing_is_false() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/session/ses_gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        assert!(!client.delete("ses_gone").await.unwrap());
    }

    #[tokio::test]
    async fn test_share_and_unshare() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session/ses_1/share"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"url": "https://opencode.ai/s/abc"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/session/ses_1/share"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/ses_gone/share"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        assert_eq!(
            client.share("ses_1").await.unwrap().as_deref(),
            Some("https://opencode.ai/s/abc")
        );
        assert!(client.unshare("ses_1").await.unwrap());
        assert!(client.share("ses_gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_trims_oldest_sessions() {
        let server = MockServer::start().await;
        let sessions: Vec<_> = (0..15).map(|i| session_json(&format!("ses_{i}"), i)).collect();

        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_json("ses_0", 0)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(sessions)))
            .mount(&server)
            .await;
        // ses_10..ses_14 are the five oldest by updatedAt.
        for i in 10..15 {
            Mock::given(method("DELETE"))
                .and(path(format!("/session/ses_{i}")))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server)
                .await;
        }
        // Nothing newer may be deleted.
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        client.create(None).await.unwrap();
    }
}
