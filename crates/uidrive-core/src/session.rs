//! Lifecycle management for a single remote automation session.
//!
//! [`SessionClient`] owns at most one live session at a time and hides
//! creation, liveness checks, and recreation behind
//! [`get_or_recreate`](SessionClient::get_or_recreate), the single entry point
//! the resolver and page layers use.
//!
//! # Lifecycle
//!
//! ```text
//! Unstarted --start--> Live --probe fails--> Stale --get_or_recreate--> (new) Live
//!                        |                     |
//!                        +------stop-----------+-----> Terminated
//! ```
//!
//! A stale session is never reused: recovery always creates a new session
//! with a new id and a higher [`generation`](SessionHandle::generation).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use uidrive_core::config::SessionConfig;
//! use uidrive_core::session::SessionClient;
//! use uidrive_core::webdriver::WebDriverClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::load();
//! let driver = Arc::new(WebDriverClient::new(&config.server_url)?);
//! let client = SessionClient::new(driver, config);
//!
//! let session = client.get_or_recreate().await?;
//! println!("session {}", session.session_id);
//! client.stop().await;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::SessionConfig;
use crate::driver::{DriverError, RemoteDriver};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Unstarted,
    Live,
    /// A liveness probe failed; the session will be replaced, never reused.
    Stale,
    Terminated,
}

/// Identity and state of one remote session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    /// Opaque id assigned by the server.
    pub session_id: String,
    pub state: SessionState,
    /// Monotonic counter, incremented for every session this client creates.
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub last_verified_at: Option<DateTime<Utc>>,
}

impl SessionHandle {
    pub(crate) fn new(session_id: String, generation: u64) -> Self {
        Self {
            session_id,
            state: SessionState::Unstarted,
            generation,
            created_at: Utc::now(),
            last_verified_at: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.state == SessionState::Live
    }
}

/// A session could not be created within the configured retries.
#[derive(Error, Debug)]
#[error("Failed to start session after {attempts} attempt(s): {source}")]
pub struct SessionStartError {
    /// How many creation attempts were made.
    pub attempts: u32,
    /// The failure of the last attempt.
    pub source: DriverError,
}

/// Owns exactly one live remote automation session at a time.
///
/// All methods take `&self`; the current handle is kept behind a
/// [`tokio::sync::Mutex`] so concurrent callers are serialized and never
/// create two sessions at once. A client is meant to be used by one test
/// scenario at a time.
pub struct SessionClient {
    driver: Arc<dyn RemoteDriver>,
    config: SessionConfig,
    current: Mutex<Option<SessionHandle>>,
    generation: AtomicU64,
}

impl SessionClient {
    pub fn new(driver: Arc<dyn RemoteDriver>, config: SessionConfig) -> Self {
        Self {
            driver,
            config,
            current: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// The driver sessions are created on.
    pub fn driver(&self) -> &Arc<dyn RemoteDriver> {
        &self.driver
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// A snapshot of the current handle, if a session was ever started.
    pub async fn current(&self) -> Option<SessionHandle> {
        self.current.lock().await.clone()
    }

    /// Create a new session, replacing any existing one.
    ///
    /// Makes up to `max_start_retries` attempts with a fixed `start_backoff`
    /// between them.
    ///
    /// # Errors
    ///
    /// [`SessionStartError`] carrying the last underlying cause when every
    /// attempt failed.
    pub async fn start(&self) -> Result<SessionHandle, SessionStartError> {
        let mut slot = self.current.lock().await;
        self.start_locked(&mut slot).await
    }

    /// Probe whether `handle` still responds.
    ///
    /// Issues the cheap foreground-activity query bounded by
    /// `liveness_timeout`. Any error or timeout yields `false`; this never
    /// fails.
    pub async fn verify_live(&self, handle: &SessionHandle) -> bool {
        let alive = self.probe(handle).await;
        if alive {
            let mut slot = self.current.lock().await;
            if let Some(current) = slot.as_mut().filter(|c| c.session_id == handle.session_id) {
                current.last_verified_at = Some(Utc::now());
            }
        }
        alive
    }

    /// Return the current session if it is live, otherwise replace it.
    ///
    /// A session that fails its liveness probe is marked stale, stopped on a
    /// best-effort basis, and a new one is started. Callers always receive a
    /// live handle or an error.
    pub async fn get_or_recreate(&self) -> Result<SessionHandle, SessionStartError> {
        let mut slot = self.current.lock().await;

        if let Some(handle) = slot.as_mut() {
            if handle.is_live() {
                if self.probe(handle).await {
                    handle.last_verified_at = Some(Utc::now());
                    return Ok(handle.clone());
                }
                warn!(session_id = %handle.session_id, "liveness probe failed, recreating session");
                handle.state = SessionState::Stale;
            }
        }

        self.start_locked(&mut slot).await
    }

    /// Mark the current session stale so the next
    /// [`get_or_recreate`](Self::get_or_recreate) replaces it.
    pub async fn invalidate(&self) {
        let mut slot = self.current.lock().await;
        if let Some(handle) = slot.as_mut().filter(|h| h.is_live()) {
            debug!(session_id = %handle.session_id, "session invalidated");
            handle.state = SessionState::Stale;
        }
    }

    /// Like [`invalidate`](Self::invalidate), but only if `session_id` is
    /// still the current session.
    ///
    /// A failure reported by a session that was already replaced says
    /// nothing about its successor.
    pub async fn invalidate_session(&self, session_id: &str) {
        let mut slot = self.current.lock().await;
        match slot.as_mut().filter(|h| h.is_live()) {
            Some(handle) if handle.session_id == session_id => {
                debug!(session_id, "session invalidated");
                handle.state = SessionState::Stale;
            }
            Some(handle) => {
                debug!(failed = session_id, current = %handle.session_id, "ignoring failure from replaced session");
            }
            None => {}
        }
    }

    /// Terminate the current session.
    ///
    /// Best effort and idempotent: failures are logged and swallowed.
    pub async fn stop(&self) {
        let mut slot = self.current.lock().await;
        if let Some(handle) = slot.as_mut() {
            self.stop_handle(handle).await;
        }
    }

    // -----------------------------------------------------------------------
    // Internals (caller holds the slot lock)
    // -----------------------------------------------------------------------

    #[instrument(skip(self, slot), level = "debug")]
    async fn start_locked(
        &self,
        slot: &mut Option<SessionHandle>,
    ) -> Result<SessionHandle, SessionStartError> {
        if let Some(old) = slot.as_mut() {
            self.stop_handle(old).await;
        }

        let attempts = self.config.max_start_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.driver.create_session(&self.config.capabilities).await {
                Ok(session_id) => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let mut handle = SessionHandle::new(session_id, generation);
                    handle.state = SessionState::Live;
                    handle.last_verified_at = Some(handle.created_at);
                    info!(session_id = %handle.session_id, generation, attempt, "session started");
                    *slot = Some(handle.clone());
                    return Ok(handle);
                }
                Err(e) => {
                    warn!(attempt, max = attempts, error = %e, "session start failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.start_backoff).await;
                    }
                }
            }
        }

        Err(SessionStartError {
            attempts,
            source: last_error
                .unwrap_or_else(|| DriverError::SessionNotCreated("no attempt made".into())),
        })
    }

    async fn probe(&self, handle: &SessionHandle) -> bool {
        if !handle.is_live() {
            return false;
        }
        let check = self.driver.current_activity(&handle.session_id);
        match tokio::time::timeout(self.config.liveness_timeout, check).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(session_id = %handle.session_id, error = %e, "liveness probe error");
                false
            }
            Err(_) => {
                debug!(session_id = %handle.session_id, "liveness probe timed out");
                false
            }
        }
    }

    async fn stop_handle(&self, handle: &mut SessionHandle) {
        match handle.state {
            SessionState::Live | SessionState::Stale => {
                if let Err(e) = self.driver.delete_session(&handle.session_id).await {
                    warn!(session_id = %handle.session_id, error = %e, "failed to delete session");
                } else {
                    info!(session_id = %handle.session_id, "session stopped");
                }
                handle.state = SessionState::Terminated;
            }
            SessionState::Unstarted => handle.state = SessionState::Terminated,
            SessionState::Terminated => {}
        }
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("server_url", &self.config.server_url)
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::mock::MockDriver;

    fn client(driver: Arc<MockDriver>) -> SessionClient {
        SessionClient::new(driver, SessionConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn start_returns_live_handle() {
        let driver = Arc::new(MockDriver::new());
        let client = client(driver.clone());

        let handle = client.start().await.unwrap();
        assert!(handle.is_live());
        assert_eq!(handle.generation, 1);
        assert_eq!(client.current().await, Some(handle));
        assert_eq!(driver.create_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_retries_with_fixed_backoff() {
        let driver = Arc::new(MockDriver::new());
        driver.fail_next_starts(2);
        let client = client(driver.clone());

        let begin = tokio::time::Instant::now();
        let handle = client.start().await.unwrap();
        let elapsed = begin.elapsed();

        assert!(handle.is_live());
        assert_eq!(driver.create_calls(), 3);
        assert!(elapsed >= Duration::from_secs(4), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(4100), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn start_gives_up_after_max_retries() {
        let driver = Arc::new(MockDriver::new());
        driver.fail_next_starts(10);
        let client = client(driver.clone());

        let err = client.start().await.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert!(matches!(err.source, DriverError::SessionNotCreated(_)));
        assert_eq!(driver.create_calls(), 3);
        assert!(client.current().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn start_replaces_existing_session() {
        let driver = Arc::new(MockDriver::new());
        let client = client(driver.clone());

        let first = client.start().await.unwrap();
        let second = client.start().await.unwrap();

        assert_ne!(first.session_id, second.session_id);
        assert_eq!(driver.deleted_sessions(), vec![first.session_id]);
        assert_eq!(driver.live_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn verify_live_false_for_dead_session() {
        let driver = Arc::new(MockDriver::new());
        let client = client(driver.clone());
        let handle = client.start().await.unwrap();

        assert!(client.verify_live(&handle).await);
        driver.kill_session(&handle.session_id);
        assert!(!client.verify_live(&handle).await);
    }

    #[tokio::test(start_paused = true)]
    async fn verify_live_is_bounded_by_liveness_timeout() {
        let driver = Arc::new(MockDriver::new());
        let client = client(driver.clone());
        let handle = client.start().await.unwrap();

        driver.hang_probes(true);
        let begin = tokio::time::Instant::now();
        assert!(!client.verify_live(&handle).await);
        assert!(begin.elapsed() <= Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn get_or_recreate_reuses_live_session() {
        let driver = Arc::new(MockDriver::new());
        let client = client(driver.clone());

        let first = client.get_or_recreate().await.unwrap();
        let second = client.get_or_recreate().await.unwrap();

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(driver.create_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn get_or_recreate_replaces_dead_session() {
        let driver = Arc::new(MockDriver::new());
        let client = client(driver.clone());

        let first = client.get_or_recreate().await.unwrap();
        driver.kill_session(&first.session_id);
        let second = client.get_or_recreate().await.unwrap();

        assert_ne!(first.session_id, second.session_id);
        assert_eq!(second.generation, first.generation + 1);
        assert!(second.is_live());
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_recreation() {
        let driver = Arc::new(MockDriver::new());
        let client = client(driver.clone());

        let first = client.get_or_recreate().await.unwrap();
        client.invalidate().await;
        assert_eq!(client.current().await.unwrap().state, SessionState::Stale);

        let second = client.get_or_recreate().await.unwrap();
        assert_ne!(first.session_id, second.session_id);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_from_replaced_session_is_ignored() {
        let driver = Arc::new(MockDriver::new());
        let client = client(driver.clone());

        let first = client.get_or_recreate().await.unwrap();
        driver.kill_session(&first.session_id);
        let second = client.get_or_recreate().await.unwrap();

        client.invalidate_session(&first.session_id).await;
        assert_eq!(client.current().await.unwrap().state, SessionState::Live);
        assert_eq!(client.get_or_recreate().await.unwrap().session_id, second.session_id);

        client.invalidate_session(&second.session_id).await;
        assert_eq!(client.current().await.unwrap().state, SessionState::Stale);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_swallows_errors() {
        let driver = Arc::new(MockDriver::new());
        let client = client(driver.clone());

        client.stop().await;

        let handle = client.start().await.unwrap();
        driver.fail_deletes(true);
        client.stop().await;
        client.stop().await;

        let current = client.current().await.unwrap();
        assert_eq!(current.session_id, handle.session_id);
        assert_eq!(current.state, SessionState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn terminated_session_is_restarted_on_demand() {
        let driver = Arc::new(MockDriver::new());
        let client = client(driver.clone());

        let first = client.start().await.unwrap();
        client.stop().await;
        let second = client.get_or_recreate().await.unwrap();

        assert_ne!(first.session_id, second.session_id);
    }
}
