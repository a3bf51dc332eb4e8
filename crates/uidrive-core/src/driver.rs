//! Remote driver trait for backend-agnostic UI automation.
//!
//! This module defines the [`RemoteDriver`] trait, the seam between the
//! session/resolution layers and whatever speaks to the automation server.
//! [`WebDriverClient`](crate::webdriver::WebDriverClient) implements it over
//! W3C WebDriver HTTP; [`MockDriver`](crate::mock::MockDriver) implements it
//! in memory for tests.
//!
//! Every call is keyed by the session id returned from
//! [`create_session`](RemoteDriver::create_session). The driver itself keeps
//! no session state; lifecycle decisions belong to
//! [`SessionClient`](crate::session::SessionClient).

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::Capabilities;
use crate::element::{ElementFrame, RemoteElement};
use crate::locator::Strategy;

/// Errors that can occur while talking to the automation server.
///
/// Backends map their native failures onto these variants so that the
/// retry policy can classify them uniformly.
#[derive(Error, Debug)]
pub enum DriverError {
    /// No element matched the query.
    #[error("No such element: {0}")]
    NoSuchElement(String),

    /// The element reference no longer matches the current UI.
    #[error("Stale element reference: {0}")]
    StaleElement(String),

    /// The session id is unknown to the server or the session has died.
    #[error("Invalid session: {0}")]
    InvalidSession(String),

    /// The server rejected the requested capabilities or could not create a session.
    #[error("Session not created: {0}")]
    SessionNotCreated(String),

    /// An operation timed out.
    #[error("Operation timed out")]
    Timeout,

    /// The HTTP transport failed (connection refused, reset, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The server answered with something that is not a valid protocol message.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server reported any other command failure.
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse JSON data.
    #[error("JSON parse error: {0}")]
    JsonParse(String),
}

impl DriverError {
    /// Returns `true` for the transient "element re-rendered" condition that
    /// an action may retry after re-resolving.
    pub fn is_stale(&self) -> bool {
        matches!(self, DriverError::StaleElement(_))
    }

    /// Returns `true` if the error means the session itself is unusable and
    /// must be recreated.
    pub fn is_session_lost(&self) -> bool {
        matches!(
            self,
            DriverError::InvalidSession(_) | DriverError::Http(_) | DriverError::Io(_)
        )
    }

    /// Returns `true` if the error only means the element is not (yet) there.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::NoSuchElement(_))
    }
}

/// Trait for talking to a remote automation server.
///
/// Implementors provide session management, element queries, and the
/// handful of gestures the page layer needs. [`find_element`] has a default
/// implementation on top of [`find_elements`].
///
/// [`find_element`]: RemoteDriver::find_element
/// [`find_elements`]: RemoteDriver::find_elements
#[async_trait]
pub trait RemoteDriver: Send + Sync {
    /// Request a new session and return its id.
    async fn create_session(&self, capabilities: &Capabilities) -> Result<String, DriverError>;

    /// Terminate a session.
    async fn delete_session(&self, session_id: &str) -> Result<(), DriverError>;

    /// Name of the foreground activity. Used as the cheap liveness probe.
    async fn current_activity(&self, session_id: &str) -> Result<String, DriverError>;

    /// Every element matching the query, in document order.
    ///
    /// An empty result is not an error.
    async fn find_elements(
        &self,
        session_id: &str,
        strategy: Strategy,
        value: &str,
    ) -> Result<Vec<RemoteElement>, DriverError>;

    /// The first element matching the query, if any.
    async fn find_element(
        &self,
        session_id: &str,
        strategy: Strategy,
        value: &str,
    ) -> Result<Option<RemoteElement>, DriverError> {
        let mut found = self.find_elements(session_id, strategy, value).await?;
        Ok(if found.is_empty() { None } else { Some(found.swap_remove(0)) })
    }

    async fn is_displayed(&self, session_id: &str, element_id: &str) -> Result<bool, DriverError>;

    async fn is_enabled(&self, session_id: &str, element_id: &str) -> Result<bool, DriverError>;

    async fn click(&self, session_id: &str, element_id: &str) -> Result<(), DriverError>;

    async fn clear(&self, session_id: &str, element_id: &str) -> Result<(), DriverError>;

    async fn send_keys(
        &self,
        session_id: &str,
        element_id: &str,
        text: &str,
    ) -> Result<(), DriverError>;

    async fn text(&self, session_id: &str, element_id: &str) -> Result<String, DriverError>;

    /// Size and position of the application window.
    async fn window_rect(&self, session_id: &str) -> Result<ElementFrame, DriverError>;

    /// Press at one point, move to another over `duration`, release.
    async fn swipe(
        &self,
        session_id: &str,
        from: (i32, i32),
        to: (i32, i32),
        duration: Duration,
    ) -> Result<(), DriverError>;

    /// Press the platform back button.
    async fn back(&self, session_id: &str) -> Result<(), DriverError>;

    /// Dismiss the soft keyboard.
    async fn hide_keyboard(&self, session_id: &str) -> Result<(), DriverError>;

    /// Raw PNG bytes of the current screen.
    async fn screenshot(&self, session_id: &str) -> Result<Vec<u8>, DriverError>;

    /// XML dump of the current UI hierarchy.
    async fn page_source(&self, session_id: &str) -> Result<String, DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::CommandFailed("tap failed".to_string());
        assert!(err.to_string().contains("tap failed"));

        let err = DriverError::InvalidSession("gone".to_string());
        assert!(err.to_string().contains("Invalid session"));

        let err = DriverError::Timeout;
        assert!(err.to_string().contains("timed out"));

        let err = DriverError::JsonParse("unexpected token".to_string());
        assert!(err.to_string().contains("unexpected token"));
    }

    #[test]
    fn test_error_classifiers() {
        assert!(DriverError::StaleElement("x".into()).is_stale());
        assert!(!DriverError::NoSuchElement("x".into()).is_stale());

        assert!(DriverError::InvalidSession("x".into()).is_session_lost());
        assert!(DriverError::Http("refused".into()).is_session_lost());
        assert!(DriverError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "b")).is_session_lost());
        assert!(!DriverError::Timeout.is_session_lost());
        assert!(!DriverError::StaleElement("x".into()).is_session_lost());

        assert!(DriverError::NoSuchElement("x".into()).is_not_found());
        assert!(!DriverError::CommandFailed("x".into()).is_not_found());
    }
}
