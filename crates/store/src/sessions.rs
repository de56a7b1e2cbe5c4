//! In-memory per-workspace sessions with idle expiry.
//!
//! A session is created on a workspace's first gateway contact and touched
//! on every request. A periodic sweep expires idle sessions and reports
//! them over the expiry channel; the host shell wires that channel to
//! workspace auto-cleanup, keeping this store ignorant of the supervisor.

use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

use {
    tokio::sync::{Mutex, mpsc},
    tracing::{debug, info},
};

use mcphost_config::SessionTimings;

/// A session expired by the sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredSession {
    pub session_id: String,
    pub workspace_id: String,
}

#[derive(Debug, Clone)]
struct Session {
    id: String,
    workspace_id: String,
    last_activity: Instant,
    ttl: Duration,
}

#[derive(Default)]
struct SessionsInner {
    by_id: HashMap<String, Session>,
    by_workspace: HashMap<String, HashSet<String>>,
    expiry_tx: Option<mpsc::UnboundedSender<ExpiredSession>>,
}

/// In-memory session state, keyed by id with a workspace index.
pub struct SessionStore {
    timings: SessionTimings,
    inner: Mutex<SessionsInner>,
}

impl SessionStore {
    #[must_use]
    pub fn new(timings: SessionTimings) -> Self {
        Self {
            timings,
            inner: Mutex::new(SessionsInner::default()),
        }
    }

    /// Register the channel the sweep reports expired sessions on.
    pub async fn set_expiry_channel(&self, tx: mpsc::UnboundedSender<ExpiredSession>) {
        self.inner.lock().await.expiry_tx = Some(tx);
    }

    /// Record activity for a workspace, creating a session on first
    /// contact. Returns the session id.
    pub async fn touch(&self, workspace_id: &str, ttl_override: Option<Duration>) -> String {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let ttl = ttl_override.unwrap_or(self.timings.default_ttl);

        if let Some(existing) = inner
            .by_workspace
            .get(workspace_id)
            .and_then(|ids| ids.iter().next())
            .cloned()
            && let Some(session) = inner.by_id.get_mut(&existing)
        {
            session.last_activity = now;
            session.ttl = ttl;
            return existing;
        }

        let id = uuid::Uuid::new_v4().to_string();
        inner.by_id.insert(id.clone(), Session {
            id: id.clone(),
            workspace_id: workspace_id.to_string(),
            last_activity: now,
            ttl,
        });
        inner
            .by_workspace
            .entry(workspace_id.to_string())
            .or_default()
            .insert(id.clone());
        debug!(workspace = %workspace_id, session = %id, "created session");
        id
    }

    /// Number of live sessions referencing a workspace.
    pub async fn count_for(&self, workspace_id: &str) -> usize {
        self.inner
            .lock()
            .await
            .by_workspace
            .get(workspace_id)
            .map_or(0, HashSet::len)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every session of a workspace (workspace delete).
    pub async fn remove_workspace(&self, workspace_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(ids) = inner.by_workspace.remove(workspace_id) {
            for id in ids {
                inner.by_id.remove(&id);
            }
        }
    }

    /// Expire idle sessions. Removed sessions are reported on the expiry
    /// channel. Exposed for tests; production runs it via [`run_sweeper`].
    ///
    /// [`run_sweeper`]: Self::run_sweeper
    pub async fn sweep(&self) -> Vec<ExpiredSession> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        let expired: Vec<Session> = inner
            .by_id
            .values()
            .filter(|s| now.duration_since(s.last_activity) > s.ttl)
            .cloned()
            .collect();

        let mut out = Vec::with_capacity(expired.len());
        for session in expired {
            inner.by_id.remove(&session.id);
            if let Some(ids) = inner.by_workspace.get_mut(&session.workspace_id) {
                ids.remove(&session.id);
                if ids.is_empty() {
                    inner.by_workspace.remove(&session.workspace_id);
                }
            }
            info!(
                workspace = %session.workspace_id,
                session = %session.id,
                "session expired"
            );
            let expired = ExpiredSession {
                session_id: session.id,
                workspace_id: session.workspace_id,
            };
            if let Some(tx) = &inner.expiry_tx {
                let _ = tx.send(expired.clone());
            }
            out.push(expired);
        }
        out
    }

    /// Run the periodic sweep until the store is dropped by every holder.
    pub async fn run_sweeper(self: std::sync::Arc<Self>) {
        let mut interval = tokio::time::interval(self.timings.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            interval.tick().await;
            self.sweep().await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn store_with_ttl(ttl: Duration) -> SessionStore {
        SessionStore::new(SessionTimings {
            sweep_interval: Duration::from_millis(10),
            default_ttl: ttl,
        })
    }

    #[tokio::test]
    async fn touch_reuses_workspace_session() {
        let store = store_with_ttl(Duration::from_secs(60));
        let a = store.touch("w1", None).await;
        let b = store.touch("w1", None).await;
        assert_eq!(a, b);
        assert_eq!(store.count_for("w1").await, 1);

        let other = store.touch("w2", None).await;
        assert_ne!(a, other);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn sweep_expires_idle_sessions_and_reports_them() {
        let store = store_with_ttl(Duration::from_millis(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        store.set_expiry_channel(tx).await;

        let id = store.touch("w1", None).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let expired = store.sweep().await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].session_id, id);
        assert_eq!(expired[0].workspace_id, "w1");
        assert_eq!(store.count_for("w1").await, 0);

        let reported = rx.recv().await.unwrap();
        assert_eq!(reported, expired[0]);
    }

    #[tokio::test]
    async fn touch_keeps_session_alive() {
        let store = store_with_ttl(Duration::from_millis(50));
        store.touch("w1", None).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.touch("w1", None).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Touched 30ms ago, ttl 50ms: still alive.
        assert!(store.sweep().await.is_empty());
        assert_eq!(store.count_for("w1").await, 1);
    }

    #[tokio::test]
    async fn ttl_override_wins_over_default() {
        let store = store_with_ttl(Duration::from_secs(3600));
        store
            .touch("w1", Some(Duration::from_millis(0)))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.sweep().await.len(), 1);
    }

    #[tokio::test]
    async fn remove_workspace_drops_sessions() {
        let store = store_with_ttl(Duration::from_secs(60));
        store.touch("w1", None).await;
        store.touch("w2", None).await;
        store.remove_workspace("w1").await;
        assert_eq!(store.count_for("w1").await, 0);
        assert_eq!(store.len().await, 1);
    }
}
