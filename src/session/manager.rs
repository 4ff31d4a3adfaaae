//! Session manager: registry, capacity, close paths and idle sweep.

use super::types::{Session, SessionInfo, SessionResource, SessionState};
use crate::bridge::{BridgeError, BridgeFactory, ExecutionBridge};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Error type for session management operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Maximum sessions ({0}) reached")]
    CapacityExceeded(usize),
    #[error("Session initialization failed: {0}")]
    InitFailed(String),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Limits and timings applied by the manager.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Ceiling on sessions that are not `Closed`.
    pub max_concurrent: usize,
    /// Idle time before the sweep closes a session. Zero disables eviction.
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    /// How long a graceful close waits for the release item and worker exit.
    pub release_timeout: Duration,
    /// Per-session queue bound, `0` for unbounded.
    pub max_queue_depth: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            idle_timeout: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(300),
            release_timeout: Duration::from_secs(30),
            max_queue_depth: 64,
        }
    }
}

/// How long a closed id is remembered, so a late close still succeeds.
const CLOSED_ID_RETENTION: Duration = Duration::from_secs(300);

/// Owns every live session and the background sweep.
pub struct SessionManager<R> {
    /// Map of session ID to session.
    sessions: RwLock<HashMap<String, Arc<Session<R>>>>,
    /// Ids removed from `sessions` by a close, with the removal time.
    closed: Mutex<HashMap<String, Instant>>,
    settings: SessionSettings,
    factory: BridgeFactory<R>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<R: SessionResource + 'static> SessionManager<R> {
    /// Create a manager. `factory` builds one resource per session, on that
    /// session's worker thread.
    pub fn new(settings: SessionSettings, factory: BridgeFactory<R>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            closed: Mutex::new(HashMap::new()),
            settings,
            factory,
            sweeper: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start a session and wait until its resource is built.
    pub async fn create_session(
        &self,
        metadata: Map<String, Value>,
    ) -> Result<SessionInfo, SessionError> {
        let session_id = Uuid::new_v4().to_string();
        let worker_name = format!(
            "tia-session-{}",
            session_id.get(..8).unwrap_or(&session_id)
        );

        let (session, ready) = {
            let mut sessions = self.sessions.write().await;
            let live = sessions.values().filter(|s| !s.is_closed()).count();
            if live >= self.settings.max_concurrent {
                warn!(
                    live,
                    max = self.settings.max_concurrent,
                    "Session capacity reached"
                );
                return Err(SessionError::CapacityExceeded(self.settings.max_concurrent));
            }

            let (bridge, ready) = ExecutionBridge::spawn(
                worker_name,
                self.factory.clone(),
                self.settings.max_queue_depth,
            )?;
            let session = Arc::new(Session::new(session_id.clone(), metadata, bridge));
            sessions.insert(session_id.clone(), session.clone());
            (session, ready)
        };

        let failure = match ready.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("worker exited before reporting readiness".to_string()),
        };

        if let Some(reason) = failure {
            error!(session_id = %session_id, error = %reason, "Session startup failed");
            session.begin_close();
            session.bridge().shutdown();
            self.sessions.write().await.remove(&session_id);
            return Err(SessionError::InitFailed(reason));
        }

        info!(session_id = %session_id, "Session created");
        Ok(session.info())
    }

    /// Look up a live session. Closed or closing sessions are not found.
    pub async fn get_session(&self, session_id: &str) -> Result<Arc<Session<R>>, SessionError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .filter(|s| !s.is_closed())
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Gracefully close a session.
    ///
    /// Only the caller that moves the session to `Closed` performs the
    /// release; any other close of the same id returns `Ok` without touching
    /// the resource, including one that arrives after the session has left
    /// the registry. The session leaves the registry after the release item
    /// has completed, failed or timed out.
    pub async fn close_session(&self, session_id: &str) -> Result<(), SessionError> {
        let Some(session) = self.lookup(session_id).await else {
            return self.closed_earlier(session_id);
        };
        if !session.begin_close() {
            debug!(session_id = %session_id, "Session already closing");
            return Ok(());
        }

        info!(session_id = %session_id, "Closing session");
        self.finish_close(&session).await;
        Ok(())
    }

    /// Forced close for operators: the release item is queued but not
    /// awaited and the session leaves the registry at once. An operation
    /// still running on the worker finishes in the background.
    pub async fn terminate_session(&self, session_id: &str) -> Result<(), SessionError> {
        let Some(session) = self.lookup(session_id).await else {
            return self.closed_earlier(session_id);
        };
        let won = session.begin_close();
        self.remove(session_id).await;
        if won {
            warn!(
                session_id = %session_id,
                busy = !session.bridge().is_idle(),
                "Terminating session"
            );
            self.release(&session, false).await;
        }
        Ok(())
    }

    /// Snapshot of every registered session.
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut infos: Vec<SessionInfo> = sessions.values().map(|s| s.info()).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    /// Get session statistics.
    pub async fn stats(&self) -> SessionStats {
        let sessions = self.sessions.read().await;
        let count = |state: SessionState| sessions.values().filter(|s| s.state() == state).count();

        SessionStats {
            total_sessions: sessions.len(),
            created: count(SessionState::Created),
            resource_attached: count(SessionState::ResourceAttached),
            closing: count(SessionState::Closed),
            suspect: sessions.values().filter(|s| s.is_suspect()).count(),
            max_concurrent: self.settings.max_concurrent,
            idle_timeout_secs: self.settings.idle_timeout.as_secs(),
        }
    }

    /// One sweep pass. Closes sessions that are idle past the timeout,
    /// whose worker faulted, or that are suspect and have drained.
    /// Returns the ids that this pass closed.
    ///
    /// Each verdict is taken again at the moment of the `Closed` transition,
    /// so a session that saw activity after the scan, or that a caller
    /// closed in the meantime, is skipped.
    pub async fn sweep_once(&self) -> Vec<String> {
        let candidates: Vec<Arc<Session<R>>> = {
            let sessions = self.sessions.read().await;
            sessions.values().filter(|s| !s.is_closed()).cloned().collect()
        };

        let mut closed = Vec::new();
        for session in candidates {
            let mut reason = None;
            let won = session.begin_close_if(|idle| {
                reason = self.eviction_reason(&session, idle);
                reason.is_some()
            });
            let Some(reason) = reason.filter(|_| won) else {
                continue;
            };

            info!(session_id = %session.id(), reason, "Sweep closing session");
            self.finish_close(&session).await;
            closed.push(session.id().to_string());
        }
        closed
    }

    /// Runs under the session's lifecycle lock: atomics only.
    fn eviction_reason(&self, session: &Session<R>, idle: Duration) -> Option<&'static str> {
        let bridge = session.bridge();
        if bridge.is_faulted() {
            return Some("faulted");
        }
        if session.is_suspect() && bridge.is_idle() {
            return Some("suspect");
        }
        let idle_timeout = self.settings.idle_timeout;
        if !idle_timeout.is_zero() && bridge.is_idle() && idle >= idle_timeout {
            return Some("idle");
        }
        None
    }

    /// Start the periodic sweep. Calling twice replaces nothing.
    pub fn start(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if sweeper.is_some() {
            return;
        }

        let manager = Arc::downgrade(self);
        let period = self.settings.sweep_interval;
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let closed = manager.sweep_once().await;
                if !closed.is_empty() {
                    info!(count = closed.len(), "Sweep closed sessions");
                }
            }
        }));
        info!(
            interval_secs = period.as_secs(),
            idle_timeout_secs = self.settings.idle_timeout.as_secs(),
            "Session sweep started"
        );
    }

    /// Stop the sweep and close every session.
    pub async fn stop(&self) {
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.shutdown_all().await;
    }

    /// Close all sessions.
    pub async fn shutdown_all(&self) {
        let session_ids: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions.keys().cloned().collect()
        };

        for session_id in session_ids {
            if let Err(e) = self.close_session(&session_id).await {
                warn!(session_id = %session_id, error = %e, "Failed to close session during shutdown");
            }
        }
    }

    /// Registry lookup that also returns sessions already `Closed`.
    async fn lookup(&self, session_id: &str) -> Option<Arc<Session<R>>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Outcome of a close for an id no longer in the registry.
    fn closed_earlier(&self, session_id: &str) -> Result<(), SessionError> {
        let closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
        if closed.contains_key(session_id) {
            debug!(session_id = %session_id, "Session already closed");
            Ok(())
        } else {
            Err(SessionError::NotFound(session_id.to_string()))
        }
    }

    /// Release a session this caller moved to `Closed`, then drop it from
    /// the registry.
    async fn finish_close(&self, session: &Session<R>) {
        self.release(session, true).await;
        self.remove(session.id()).await;
    }

    /// Drop an id from the registry and remember it as closed. Both happen
    /// under the registry write lock, so a lookup that misses the id always
    /// finds it in `closed`.
    async fn remove(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id);

        let mut closed = self.closed.lock().unwrap_or_else(|e| e.into_inner());
        closed.retain(|_, at| at.elapsed() < CLOSED_ID_RETENTION);
        closed.insert(session_id.to_string(), Instant::now());
    }

    /// Queue `release` as the final item and stop the worker. A faulted
    /// worker has already discarded its resource, so nothing is queued.
    async fn release(&self, session: &Session<R>, wait: bool) {
        let bridge = session.bridge();
        let session_id = session.id();
        let limit = self.settings.release_timeout;

        if bridge.is_faulted() {
            warn!(
                session_id = %session_id,
                worker = bridge.name(),
                "Worker faulted, discarding resource without release"
            );
        } else {
            match bridge.submit_unbounded(|resource: &mut R| resource.release()) {
                Ok(done) if wait => match done.wait_timeout(limit).await {
                    Ok(Ok(())) => debug!(session_id = %session_id, "Resource released"),
                    Ok(Err(e)) => warn!(session_id = %session_id, error = %e, "Release failed"),
                    Err(e) => warn!(session_id = %session_id, error = %e, "Release did not complete"),
                },
                Ok(_detached) => {}
                Err(e) => warn!(session_id = %session_id, error = %e, "Could not queue release"),
            }
        }

        bridge.shutdown();
        if wait && !bridge.wait_stopped(limit).await {
            warn!(
                session_id = %session_id,
                worker = bridge.name(),
                "Worker still busy after close, detaching"
            );
        }
    }
}

/// Statistics about sessions.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub created: usize,
    pub resource_attached: usize,
    /// Closed but still releasing.
    pub closing: usize,
    pub suspect: usize,
    pub max_concurrent: usize,
    pub idle_timeout_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{failing_factory, fake_factory, FakeBackend, FakeCounters};

    fn settings(max: usize) -> SessionSettings {
        SessionSettings {
            max_concurrent: max,
            idle_timeout: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(3600),
            release_timeout: Duration::from_secs(5),
            max_queue_depth: 0,
        }
    }

    fn manager(max: usize) -> (Arc<SessionManager<FakeBackend>>, Arc<FakeCounters>) {
        let counters = Arc::new(FakeCounters::default());
        let mgr = SessionManager::new(settings(max), fake_factory(counters.clone()));
        (Arc::new(mgr), counters)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_respect_capacity() {
        let (mgr, _) = manager(3);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mgr = mgr.clone();
                tokio::spawn(async move { mgr.create_session(Map::new()).await })
            })
            .collect();

        let mut ok = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(SessionError::CapacityExceeded(3)) => rejected += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!((ok, rejected), (3, 1));
        assert_eq!(mgr.list_sessions().await.len(), 3);
        mgr.stop().await;
    }

    #[tokio::test]
    async fn closing_frees_a_slot() {
        let (mgr, _) = manager(2);
        let s1 = mgr.create_session(Map::new()).await.unwrap();
        let _s2 = mgr.create_session(Map::new()).await.unwrap();

        assert!(matches!(
            mgr.create_session(Map::new()).await,
            Err(SessionError::CapacityExceeded(2))
        ));

        mgr.close_session(&s1.id).await.unwrap();
        let s3 = mgr.create_session(Map::new()).await.unwrap();
        assert_eq!(s3.state, SessionState::Created);
        mgr.stop().await;
    }

    #[tokio::test]
    async fn double_close_releases_once() {
        let (mgr, counters) = manager(2);
        let s = mgr.create_session(Map::new()).await.unwrap();
        let session = mgr.get_session(&s.id).await.unwrap();

        // Hold the worker so both closes overlap the pending release.
        let busy = session
            .bridge()
            .submit(|_: &mut FakeBackend| std::thread::sleep(Duration::from_millis(100)))
            .unwrap();

        let (a, b) = tokio::join!(mgr.close_session(&s.id), mgr.close_session(&s.id));
        assert!(a.is_ok());
        assert!(b.is_ok());
        busy.wait().await.unwrap();
        assert_eq!(counters.releases(), 1);

        assert!(matches!(
            mgr.get_session(&s.id).await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn late_close_after_removal_is_ok() {
        let (mgr, counters) = manager(1);
        let s = mgr.create_session(Map::new()).await.unwrap();

        mgr.close_session(&s.id).await.unwrap();
        assert!(mgr.list_sessions().await.is_empty());

        mgr.close_session(&s.id).await.unwrap();
        mgr.terminate_session(&s.id).await.unwrap();
        assert_eq!(counters.releases(), 1);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (mgr, _) = manager(1);
        assert!(matches!(
            mgr.get_session("nope").await,
            Err(SessionError::NotFound(id)) if id == "nope"
        ));
        assert!(matches!(
            mgr.close_session("nope").await,
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            mgr.terminate_session("nope").await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn sweep_evicts_idle_sessions() {
        let counters = Arc::new(FakeCounters::default());
        let mut cfg = settings(2);
        cfg.idle_timeout = Duration::from_millis(50);
        let mgr = SessionManager::new(cfg, fake_factory(counters.clone()));

        let s = mgr.create_session(Map::new()).await.unwrap();
        assert!(mgr.sweep_once().await.is_empty());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(mgr.sweep_once().await, vec![s.id.clone()]);
        assert!(mgr.list_sessions().await.is_empty());
        assert_eq!(counters.releases(), 1);

        // Already gone: a manual close afterwards never releases again.
        assert!(mgr.close_session(&s.id).await.is_ok());
        assert_eq!(counters.releases(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sweep_racing_a_close_releases_once() {
        let counters = Arc::new(FakeCounters::default());
        let mut cfg = settings(1);
        cfg.idle_timeout = Duration::from_millis(20);
        let mgr = SessionManager::new(cfg, fake_factory(counters.clone()));

        let s = mgr.create_session(Map::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let (swept, closed) = tokio::join!(mgr.sweep_once(), mgr.close_session(&s.id));
        assert!(closed.is_ok());
        assert!(swept.len() <= 1);
        assert_eq!(counters.releases(), 1);
        assert!(mgr.list_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn eviction_is_decided_with_the_close() {
        let (mgr, _) = manager(1);
        let s = mgr.create_session(Map::new()).await.unwrap();
        let session = mgr.get_session(&s.id).await.unwrap();

        assert!(!session.begin_close_if(|_| false));
        assert_eq!(session.state(), SessionState::Created);

        assert!(session.begin_close_if(|_| true));
        assert!(session.is_closed());

        let mut asked = false;
        assert!(!session.begin_close_if(|_| {
            asked = true;
            true
        }));
        assert!(!asked);
        session.bridge().shutdown();
    }

    #[tokio::test]
    async fn recent_activity_saves_a_session_from_the_sweep() {
        let counters = Arc::new(FakeCounters::default());
        let mut cfg = settings(1);
        cfg.idle_timeout = Duration::from_millis(50);
        let mgr = SessionManager::new(cfg, fake_factory(counters.clone()));

        let s = mgr.create_session(Map::new()).await.unwrap();
        let session = mgr.get_session(&s.id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        session.touch();
        assert!(mgr.sweep_once().await.is_empty());
        assert_eq!(session.state(), SessionState::Created);
        assert_eq!(counters.releases(), 0);
        mgr.stop().await;
    }

    #[tokio::test]
    async fn zero_idle_timeout_disables_eviction() {
        let counters = Arc::new(FakeCounters::default());
        let mut cfg = settings(1);
        cfg.idle_timeout = Duration::ZERO;
        let mgr = SessionManager::new(cfg, fake_factory(counters));

        mgr.create_session(Map::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(mgr.sweep_once().await.is_empty());
        assert_eq!(mgr.list_sessions().await.len(), 1);
        mgr.stop().await;
    }

    #[tokio::test]
    async fn sweep_closes_faulted_sessions_without_release() {
        let (mgr, counters) = manager(1);
        let s = mgr.create_session(Map::new()).await.unwrap();
        let session = mgr.get_session(&s.id).await.unwrap();

        let crashed = session
            .bridge()
            .submit(|_: &mut FakeBackend| -> u32 { panic!("native crash") })
            .unwrap();
        assert_eq!(crashed.wait().await, Err(BridgeError::Faulted));

        assert_eq!(mgr.sweep_once().await, vec![s.id.clone()]);
        assert_eq!(counters.releases(), 0);
        assert!(mgr.list_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn suspect_session_is_swept_once_drained() {
        let (mgr, counters) = manager(1);
        let s = mgr.create_session(Map::new()).await.unwrap();
        let session = mgr.get_session(&s.id).await.unwrap();

        let slow = session
            .bridge()
            .submit(|_: &mut FakeBackend| std::thread::sleep(Duration::from_millis(150)))
            .unwrap();
        session.mark_suspect();
        assert!(mgr.sweep_once().await.is_empty());

        slow.wait().await.unwrap();
        assert_eq!(mgr.sweep_once().await, vec![s.id.clone()]);
        assert_eq!(counters.releases(), 1);
    }

    #[tokio::test]
    async fn failed_initialization_frees_the_slot() {
        let mgr = SessionManager::<FakeBackend>::new(settings(1), failing_factory());
        assert!(matches!(
            mgr.create_session(Map::new()).await,
            Err(SessionError::InitFailed(_))
        ));
        assert!(mgr.list_sessions().await.is_empty());
        assert_eq!(mgr.stats().await.total_sessions, 0);
    }

    #[tokio::test]
    async fn terminate_removes_immediately() {
        let (mgr, counters) = manager(1);
        let s = mgr.create_session(Map::new()).await.unwrap();
        let session = mgr.get_session(&s.id).await.unwrap();

        let long = session
            .bridge()
            .submit(|_: &mut FakeBackend| std::thread::sleep(Duration::from_millis(200)))
            .unwrap();

        mgr.terminate_session(&s.id).await.unwrap();
        assert!(mgr.list_sessions().await.is_empty());
        // The slot is free even though the worker is still busy.
        let replacement = mgr.create_session(Map::new()).await.unwrap();

        long.wait().await.unwrap();
        assert!(session.bridge().wait_stopped(Duration::from_secs(2)).await);
        assert_eq!(counters.releases(), 1);

        mgr.close_session(&replacement.id).await.unwrap();
        assert_eq!(counters.releases(), 2);
    }

    #[tokio::test]
    async fn listing_is_a_snapshot_with_metadata() {
        let (mgr, _) = manager(2);
        let mut metadata = Map::new();
        metadata.insert("owner".to_string(), Value::from("line-3"));
        let s = mgr.create_session(metadata).await.unwrap();

        let listed = mgr.list_sessions().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, s.id);
        assert_eq!(listed[0].metadata["owner"], "line-3");
        assert_eq!(listed[0].state, SessionState::Created);

        let session = mgr.get_session(&s.id).await.unwrap();
        session.attach("Plant");
        assert_eq!(listed[0].attached, None);
        assert_eq!(
            mgr.list_sessions().await[0].attached.as_deref(),
            Some("Plant")
        );

        let stats = mgr.stats().await;
        assert_eq!(stats.resource_attached, 1);
        assert_eq!(stats.max_concurrent, 2);
        mgr.stop().await;
        assert!(mgr.list_sessions().await.is_empty());
    }
}
