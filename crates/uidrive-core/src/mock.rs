//! Scripted in-memory [`RemoteDriver`] for testing page objects.
//!
//! [`MockDriver`] models a single screen as a list of [`MockElement`]s.
//! Elements can be made to appear after a delay (measured on the tokio clock,
//! so `start_paused` tests are deterministic) or only after a number of
//! scroll gestures. Failure injection covers session start failures, dead
//! sessions, hanging liveness probes, and stale-element actions.
//!
//! Element ids are scoped to the session that found them: after a session is
//! recreated, operations on old ids fail with
//! [`DriverError::StaleElement`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use uidrive_core::locator::Strategy;
//! use uidrive_core::mock::{MockDriver, MockElement};
//!
//! let driver = MockDriver::new();
//! driver.add_element(
//!     MockElement::new(Strategy::Id, "btn_sign_in")
//!         .text("Sign In")
//!         .appears_after(Duration::from_secs(2)),
//! );
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::config::Capabilities;
use crate::driver::{DriverError, RemoteDriver};
use crate::element::{ElementFrame, RemoteElement};
use crate::locator::Strategy;

/// One element of the simulated screen.
#[derive(Debug, Clone)]
pub struct MockElement {
    pub strategy: Strategy,
    pub value: String,
    pub text: String,
    pub displayed: bool,
    pub enabled: bool,
    /// Present only once this much time has passed since the mock was built.
    pub appears_after: Duration,
    /// Present only once this many scroll gestures have been made.
    pub after_scrolls: u32,
    /// Gone from the screen; its ids turn stale.
    pub removed: bool,
}

impl MockElement {
    pub fn new(strategy: Strategy, value: impl Into<String>) -> Self {
        Self {
            strategy,
            value: value.into(),
            text: String::new(),
            displayed: true,
            enabled: true,
            appears_after: Duration::ZERO,
            after_scrolls: 0,
            removed: false,
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.displayed = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn appears_after(mut self, delay: Duration) -> Self {
        self.appears_after = delay;
        self
    }

    pub fn after_scrolls(mut self, scrolls: u32) -> Self {
        self.after_scrolls = scrolls;
        self
    }
}

/// A remote call recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    CreateSession,
    DeleteSession(String),
    CurrentActivity(String),
    Find { strategy: Strategy, value: String },
    Click(String),
    Clear(String),
    SendKeys { element: String, text: String },
    Text(String),
    Swipe,
    Back,
    HideKeyboard,
    Screenshot,
}

#[derive(Default)]
struct MockState {
    next_session: u64,
    live: HashSet<String>,
    elements: Vec<MockElement>,
    values: HashMap<usize, String>,
    scrolls: u32,
    start_failures: u32,
    stale_actions: u32,
    hang_probes: bool,
    fail_deletes: bool,
    deleted: Vec<String>,
    calls: Vec<MockCall>,
}

/// In-memory [`RemoteDriver`] with scripted behavior.
pub struct MockDriver {
    epoch: Instant,
    state: Mutex<MockState>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -----------------------------------------------------------------------
    // Scripting
    // -----------------------------------------------------------------------

    pub fn add_element(&self, element: MockElement) {
        self.state().elements.push(element);
    }

    /// Take every element matching the query off the screen.
    ///
    /// Ids handed out for the other elements stay valid.
    pub fn remove_element(&self, strategy: Strategy, value: &str) {
        for element in self.state().elements.iter_mut() {
            if element.strategy == strategy && element.value == value {
                element.removed = true;
            }
        }
    }

    /// Make the next `n` session creations fail.
    pub fn fail_next_starts(&self, n: u32) {
        self.state().start_failures = n;
    }

    /// Make the next `n` element actions fail with a stale-element error.
    pub fn stale_next_actions(&self, n: u32) {
        self.state().stale_actions = n;
    }

    /// Forget a session server-side, as if the app or server crashed.
    pub fn kill_session(&self, session_id: &str) {
        self.state().live.remove(session_id);
    }

    /// Forget every live session.
    pub fn kill_all_sessions(&self) {
        self.state().live.clear();
    }

    /// Make liveness probes block far beyond any sensible timeout.
    pub fn hang_probes(&self, hang: bool) {
        self.state().hang_probes = hang;
    }

    /// Make session deletion fail.
    pub fn fail_deletes(&self, fail: bool) {
        self.state().fail_deletes = fail;
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.count(|c| matches!(c, MockCall::CreateSession))
    }

    /// Number of find requests issued for `value`.
    pub fn find_calls(&self, value: &str) -> usize {
        self.count(|c| matches!(c, MockCall::Find { value: v, .. } if v == value))
    }

    pub fn clicks(&self) -> usize {
        self.count(|c| matches!(c, MockCall::Click(_)))
    }

    pub fn scrolls(&self) -> u32 {
        self.state().scrolls
    }

    pub fn live_sessions(&self) -> usize {
        self.state().live.len()
    }

    pub fn deleted_sessions(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    /// Text typed into the element matching `value`, if any.
    pub fn typed_value(&self, value: &str) -> Option<String> {
        let state = self.state();
        let index = state.elements.iter().position(|e| e.value == value)?;
        state.values.get(&index).cloned()
    }

    fn count(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.state().calls.iter().filter(|&c| pred(c)).count()
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn check_session(state: &MockState, session_id: &str) -> Result<(), DriverError> {
        if state.live.contains(session_id) {
            Ok(())
        } else {
            Err(DriverError::InvalidSession(format!("unknown session {session_id}")))
        }
    }

    fn is_present(&self, state: &MockState, element: &MockElement) -> bool {
        !element.removed
            && self.epoch.elapsed() >= element.appears_after
            && state.scrolls >= element.after_scrolls
    }

    /// Resolve an element id of the form `<session>/<index>`.
    fn element_index(
        &self,
        state: &MockState,
        session_id: &str,
        element_id: &str,
    ) -> Result<usize, DriverError> {
        Self::check_session(state, session_id)?;
        let stale = || DriverError::StaleElement(element_id.to_string());
        let (owner, index) = element_id.rsplit_once('/').ok_or_else(stale)?;
        if owner != session_id {
            return Err(stale());
        }
        let index: usize = index.parse().map_err(|_| stale())?;
        match state.elements.get(index) {
            Some(element) if self.is_present(state, element) => Ok(index),
            _ => Err(stale()),
        }
    }

    fn action(
        &self,
        session_id: &str,
        element_id: &str,
        call: MockCall,
    ) -> Result<usize, DriverError> {
        let mut state = self.state();
        state.calls.push(call);
        let index = self.element_index(&state, session_id, element_id)?;
        if state.stale_actions > 0 {
            state.stale_actions -= 1;
            return Err(DriverError::StaleElement(element_id.to_string()));
        }
        Ok(index)
    }
}

#[async_trait]
impl RemoteDriver for MockDriver {
    async fn create_session(&self, _capabilities: &Capabilities) -> Result<String, DriverError> {
        let mut state = self.state();
        state.calls.push(MockCall::CreateSession);
        if state.start_failures > 0 {
            state.start_failures -= 1;
            return Err(DriverError::SessionNotCreated("injected start failure".into()));
        }
        state.next_session += 1;
        let id = format!("mock-session-{}", state.next_session);
        state.live.insert(id.clone());
        Ok(id)
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), DriverError> {
        let mut state = self.state();
        state.calls.push(MockCall::DeleteSession(session_id.to_string()));
        if state.fail_deletes {
            return Err(DriverError::Http("injected delete failure".into()));
        }
        state.live.remove(session_id);
        state.deleted.push(session_id.to_string());
        Ok(())
    }

    async fn current_activity(&self, session_id: &str) -> Result<String, DriverError> {
        let hang = {
            let mut state = self.state();
            state.calls.push(MockCall::CurrentActivity(session_id.to_string()));
            Self::check_session(&state, session_id)?;
            state.hang_probes
        };
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(".MainActivity".to_string())
    }

    async fn find_elements(
        &self,
        session_id: &str,
        strategy: Strategy,
        value: &str,
    ) -> Result<Vec<RemoteElement>, DriverError> {
        let mut state = self.state();
        state.calls.push(MockCall::Find {
            strategy,
            value: value.to_string(),
        });
        Self::check_session(&state, session_id)?;
        Ok(state
            .elements
            .iter()
            .enumerate()
            .filter(|(_, e)| e.strategy == strategy && e.value == value && self.is_present(&state, e))
            .map(|(i, _)| RemoteElement::new(format!("{session_id}/{i}")))
            .collect())
    }

    async fn is_displayed(&self, session_id: &str, element_id: &str) -> Result<bool, DriverError> {
        let state = self.state();
        let index = self.element_index(&state, session_id, element_id)?;
        Ok(state.elements[index].displayed)
    }

    async fn is_enabled(&self, session_id: &str, element_id: &str) -> Result<bool, DriverError> {
        let state = self.state();
        let index = self.element_index(&state, session_id, element_id)?;
        Ok(state.elements[index].enabled)
    }

    async fn click(&self, session_id: &str, element_id: &str) -> Result<(), DriverError> {
        self.action(session_id, element_id, MockCall::Click(element_id.to_string()))?;
        Ok(())
    }

    async fn clear(&self, session_id: &str, element_id: &str) -> Result<(), DriverError> {
        let index = self.action(session_id, element_id, MockCall::Clear(element_id.to_string()))?;
        self.state().values.remove(&index);
        Ok(())
    }

    async fn send_keys(
        &self,
        session_id: &str,
        element_id: &str,
        text: &str,
    ) -> Result<(), DriverError> {
        let call = MockCall::SendKeys {
            element: element_id.to_string(),
            text: text.to_string(),
        };
        let index = self.action(session_id, element_id, call)?;
        self.state().values.entry(index).or_default().push_str(text);
        Ok(())
    }

    async fn text(&self, session_id: &str, element_id: &str) -> Result<String, DriverError> {
        let index = self.action(session_id, element_id, MockCall::Text(element_id.to_string()))?;
        let state = self.state();
        Ok(state
            .values
            .get(&index)
            .cloned()
            .unwrap_or_else(|| state.elements[index].text.clone()))
    }

    async fn window_rect(&self, session_id: &str) -> Result<ElementFrame, DriverError> {
        Self::check_session(&self.state(), session_id)?;
        Ok(ElementFrame {
            x: 0.0,
            y: 0.0,
            width: 1080.0,
            height: 2400.0,
        })
    }

    async fn swipe(
        &self,
        session_id: &str,
        _from: (i32, i32),
        _to: (i32, i32),
        _duration: Duration,
    ) -> Result<(), DriverError> {
        let mut state = self.state();
        state.calls.push(MockCall::Swipe);
        Self::check_session(&state, session_id)?;
        state.scrolls += 1;
        Ok(())
    }

    async fn back(&self, session_id: &str) -> Result<(), DriverError> {
        let mut state = self.state();
        state.calls.push(MockCall::Back);
        Self::check_session(&state, session_id)
    }

    async fn hide_keyboard(&self, session_id: &str) -> Result<(), DriverError> {
        let mut state = self.state();
        state.calls.push(MockCall::HideKeyboard);
        Self::check_session(&state, session_id)?;
        Err(DriverError::CommandFailed("soft keyboard not present".into()))
    }

    async fn screenshot(&self, session_id: &str) -> Result<Vec<u8>, DriverError> {
        let mut state = self.state();
        state.calls.push(MockCall::Screenshot);
        Self::check_session(&state, session_id)?;
        Ok(vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A])
    }

    async fn page_source(&self, session_id: &str) -> Result<String, DriverError> {
        let state = self.state();
        Self::check_session(&state, session_id)?;
        let mut xml = String::from("<hierarchy>");
        for element in state.elements.iter().filter(|e| self.is_present(&state, e)) {
            xml.push_str(&format!("<node text=\"{}\"/>", element.text));
        }
        xml.push_str("</hierarchy>");
        Ok(xml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn session(driver: &MockDriver) -> String {
        driver.create_session(&Capabilities::default()).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn elements_appear_after_delay() {
        let driver = MockDriver::new();
        driver.add_element(MockElement::new(Strategy::Id, "late").appears_after(Duration::from_secs(2)));
        let sid = session(&driver).await;

        assert!(driver.find_elements(&sid, Strategy::Id, "late").await.unwrap().is_empty());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(driver.find_elements(&sid, Strategy::Id, "late").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn element_ids_are_scoped_to_session() {
        let driver = MockDriver::new();
        driver.add_element(MockElement::new(Strategy::Id, "btn"));
        let first = session(&driver).await;
        let element = driver.find_element(&first, Strategy::Id, "btn").await.unwrap().unwrap();

        let second = session(&driver).await;
        let err = driver.click(&second, &element.id).await.unwrap_err();
        assert!(err.is_stale());

        driver.kill_session(&first);
        let err = driver.click(&first, &element.id).await.unwrap_err();
        assert!(matches!(err, DriverError::InvalidSession(_)));
    }

    #[tokio::test]
    async fn send_keys_then_text_reads_back_value() {
        let driver = MockDriver::new();
        driver.add_element(MockElement::new(Strategy::Id, "email").text("Email"));
        let sid = session(&driver).await;
        let el = driver.find_element(&sid, Strategy::Id, "email").await.unwrap().unwrap();

        assert_eq!(driver.text(&sid, &el.id).await.unwrap(), "Email");
        driver.send_keys(&sid, &el.id, "a@b.c").await.unwrap();
        assert_eq!(driver.text(&sid, &el.id).await.unwrap(), "a@b.c");
        assert_eq!(driver.typed_value("email").as_deref(), Some("a@b.c"));
    }

    #[tokio::test]
    async fn stale_actions_are_consumed() {
        let driver = MockDriver::new();
        driver.add_element(MockElement::new(Strategy::Id, "btn"));
        let sid = session(&driver).await;
        let el = driver.find_element(&sid, Strategy::Id, "btn").await.unwrap().unwrap();

        driver.stale_next_actions(1);
        assert!(driver.click(&sid, &el.id).await.unwrap_err().is_stale());
        assert!(driver.click(&sid, &el.id).await.is_ok());
        assert_eq!(driver.clicks(), 2);
    }

    #[tokio::test]
    async fn removed_elements_go_stale_without_shifting_ids() {
        let driver = MockDriver::new();
        driver.add_element(MockElement::new(Strategy::Id, "banner"));
        driver.add_element(MockElement::new(Strategy::Id, "btn").text("Go"));
        let sid = session(&driver).await;
        let banner = driver.find_element(&sid, Strategy::Id, "banner").await.unwrap().unwrap();
        let btn = driver.find_element(&sid, Strategy::Id, "btn").await.unwrap().unwrap();

        driver.remove_element(Strategy::Id, "banner");

        assert!(driver.click(&sid, &banner.id).await.unwrap_err().is_stale());
        assert!(driver.find_elements(&sid, Strategy::Id, "banner").await.unwrap().is_empty());
        assert_eq!(driver.text(&sid, &btn.id).await.unwrap(), "Go");
    }
}
