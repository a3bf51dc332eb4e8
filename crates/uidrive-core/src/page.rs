//! Page objects: named locators plus retrying actions.
//!
//! A [`PageDescriptor`] names the elements of one screen and says how to tell
//! that the screen is showing. A [`Page`] binds a descriptor to a session and
//! exposes the operations tests use (`click`, `type_text`, `get_text`,
//! `scroll_until_visible`, ...). Every operation resolves its element afresh
//! through [`ResilientLocator`], so no element reference survives a session
//! recreation.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use uidrive_core::locator::Locator;
//! use uidrive_core::page::{Page, PageDescriptor, ReadySignal};
//! # use uidrive_core::session::SessionClient;
//!
//! # async fn example(session: Arc<SessionClient>) -> Result<(), Box<dyn std::error::Error>> {
//! let login = PageDescriptor::new("login", ReadySignal::Elements(vec!["email".into()]))
//!     .element("email", Locator::id("com.example:id/edit_email"))
//!     .element("password", Locator::id("com.example:id/edit_password"))
//!     .element("sign_in", Locator::id("com.example:id/btn_sign_in").or(Locator::text("Sign In")));
//!
//! let page = Page::from_session(Arc::new(login), session);
//! page.wait_until_loaded(None).await?;
//! page.type_text("email", "user@example.com").await?;
//! page.click("sign_in").await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::{ConfigError, PagePolicy};
use crate::driver::{DriverError, RemoteDriver};
use crate::element::ElementHandle;
use crate::gesture::{swipe_points, ScrollDirection};
use crate::locator::{Locator, LocatorError};
use crate::resolver::{ElementNotFoundError, ResilientLocator, ResolveError};
use crate::session::{SessionClient, SessionHandle, SessionStartError};

/// Errors from [`Page`] operations.
#[derive(Error, Debug)]
pub enum PageError {
    /// The ready signal did not appear in time.
    #[error("Page '{page}' did not load within {}ms: {source}", .timeout.as_millis())]
    PageLoadTimeout {
        page: String,
        timeout: Duration,
        source: ElementNotFoundError,
    },

    /// An action kept failing after local retries and a rebind.
    #[error("Action on '{element}' failed: {cause}")]
    ActionFailed {
        element: String,
        #[source]
        cause: DriverError,
    },

    /// A named element could not be resolved (or scrolled into view).
    #[error("Element '{element}' not found: {source}")]
    ElementNotFound {
        element: String,
        source: ElementNotFoundError,
    },

    /// The descriptor has no element with this name.
    #[error("Page '{page}' has no element named '{element}'")]
    UnknownElement { page: String, element: String },

    #[error("Invalid page descriptor: {0}")]
    InvalidDescriptor(String),

    #[error(transparent)]
    Session(#[from] SessionStartError),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// How to tell that a page is showing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadySignal {
    /// A single locator, not necessarily one of the named elements.
    Locator(Locator),
    /// Every one of these named elements must be displayed.
    Elements(Vec<String>),
}

/// The static description of one screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDescriptor {
    pub name: String,
    #[serde(default)]
    pub locators: BTreeMap<String, Locator>,
    pub ready_signal: ReadySignal,
}

impl PageDescriptor {
    pub fn new(name: impl Into<String>, ready_signal: ReadySignal) -> Self {
        Self {
            name: name.into(),
            locators: BTreeMap::new(),
            ready_signal,
        }
    }

    /// Adds a named element.
    pub fn element(mut self, name: impl Into<String>, locator: Locator) -> Self {
        self.locators.insert(name.into(), locator);
        self
    }

    /// Reads and validates a descriptor from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let descriptor: PageDescriptor = serde_json::from_str(&contents)?;
        descriptor
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(descriptor)
    }

    /// Checks every locator and that the ready signal refers to known elements.
    pub fn validate(&self) -> Result<(), PageError> {
        if self.name.trim().is_empty() {
            return Err(PageError::InvalidDescriptor("page name must not be empty".into()));
        }
        for (name, locator) in &self.locators {
            locator
                .validate()
                .map_err(|e| invalid_element(name, e))?;
        }
        match &self.ready_signal {
            ReadySignal::Locator(locator) => locator
                .validate()
                .map_err(|e| PageError::InvalidDescriptor(format!("ready signal: {e}"))),
            ReadySignal::Elements(names) if names.is_empty() => Err(PageError::InvalidDescriptor(
                "ready signal lists no elements".into(),
            )),
            ReadySignal::Elements(names) => match names.iter().find(|n| !self.locators.contains_key(*n)) {
                Some(missing) => Err(PageError::UnknownElement {
                    page: self.name.clone(),
                    element: missing.clone(),
                }),
                None => Ok(()),
            },
        }
    }
}

/// Whether a [`Page`] has been associated with the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindState {
    Unbound,
    Bound { generation: u64 },
    Stale,
}

enum Action<'a> {
    Click,
    Type(&'a str),
    ReadText,
}

/// A page descriptor bound to a session.
pub struct Page {
    descriptor: Arc<PageDescriptor>,
    resolver: ResilientLocator,
    policy: PagePolicy,
    state: Mutex<BindState>,
}

impl Page {
    pub fn new(descriptor: Arc<PageDescriptor>, resolver: ResilientLocator, policy: PagePolicy) -> Self {
        Self {
            descriptor,
            resolver,
            policy,
            state: Mutex::new(BindState::Unbound),
        }
    }

    /// A page using the wait and page policies of the session's config.
    pub fn from_session(descriptor: Arc<PageDescriptor>, session: Arc<SessionClient>) -> Self {
        let wait = session.config().wait;
        let policy = session.config().page;
        Self::new(descriptor, ResilientLocator::new(session, wait), policy)
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &Arc<PageDescriptor> {
        &self.descriptor
    }

    pub fn resolver(&self) -> &ResilientLocator {
        &self.resolver
    }

    pub async fn bind_state(&self) -> BindState {
        *self.state.lock().await
    }

    /// The locator registered under `name`.
    pub fn locator(&self, name: &str) -> Result<&Locator, PageError> {
        self.descriptor
            .locators
            .get(name)
            .ok_or_else(|| PageError::UnknownElement {
                page: self.descriptor.name.clone(),
                element: name.to_string(),
            })
    }

    fn driver(&self) -> &Arc<dyn RemoteDriver> {
        self.resolver.session().driver()
    }

    // -----------------------------------------------------------------------
    // Binding
    // -----------------------------------------------------------------------

    /// Make sure the page is bound to the current live session.
    ///
    /// A page bound to an older session generation is rebound.
    pub async fn ensure_bound(&self) -> Result<SessionHandle, PageError> {
        let session = self.resolver.session().get_or_recreate().await?;
        let mut state = self.state.lock().await;
        match *state {
            BindState::Bound { generation } if generation == session.generation => {}
            BindState::Bound { generation } => {
                debug!(page = %self.descriptor.name, old = generation, new = session.generation, "session replaced, rebinding");
                *state = BindState::Bound { generation: session.generation };
            }
            BindState::Unbound | BindState::Stale => {
                *state = BindState::Bound { generation: session.generation };
            }
        }
        Ok(session)
    }

    /// Drop the current binding and bind again.
    pub async fn rebind(&self) -> Result<SessionHandle, PageError> {
        *self.state.lock().await = BindState::Stale;
        self.ensure_bound().await
    }

    async fn mark_stale(&self) {
        *self.state.lock().await = BindState::Stale;
    }

    /// A command sent to `session_id` failed.
    async fn session_error(&self, session_id: &str, error: DriverError) -> PageError {
        if error.is_session_lost() {
            self.resolver.session().invalidate_session(session_id).await;
            self.mark_stale().await;
        }
        PageError::Driver(error)
    }

    /// A resolver snapshot failed; the resolver has already invalidated
    /// the session it ran on.
    async fn snapshot_error(&self, error: DriverError) -> PageError {
        if error.is_session_lost() {
            self.mark_stale().await;
        }
        PageError::Driver(error)
    }

    // -----------------------------------------------------------------------
    // Load detection
    // -----------------------------------------------------------------------

    /// Returns `true` if the ready signal appears within `timeout`.
    ///
    /// Never fails: every error is reported as "not loaded".
    pub async fn is_loaded(&self, timeout: Duration) -> bool {
        match self.wait_until_loaded(Some(timeout)).await {
            Ok(_) => true,
            Err(e) => {
                debug!(page = %self.descriptor.name, error = %e, "page not loaded");
                false
            }
        }
    }

    /// Wait for the ready signal, returning the element that satisfied it.
    ///
    /// For [`ReadySignal::Elements`] all elements share one deadline and the
    /// handle of the last one is returned.
    #[instrument(skip(self), fields(page = %self.descriptor.name))]
    pub async fn wait_until_loaded(&self, timeout: Option<Duration>) -> Result<ElementHandle, PageError> {
        let timeout = timeout.unwrap_or(self.policy.load_timeout);
        self.ensure_bound().await?;

        let locators: Vec<Locator> = match &self.descriptor.ready_signal {
            ReadySignal::Locator(locator) => vec![locator.clone()],
            ReadySignal::Elements(names) => names
                .iter()
                .map(|n| self.locator(n).cloned())
                .collect::<Result<_, _>>()?,
        };

        let deadline = Instant::now() + timeout;
        let mut last = None;
        for locator in &locators {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.resolver.resolve(locator, Some(remaining)).await {
                Ok(handle) => last = Some(handle),
                Err(ResolveError::NotFound(source)) => {
                    return Err(PageError::PageLoadTimeout {
                        page: self.descriptor.name.clone(),
                        timeout,
                        source,
                    })
                }
                Err(ResolveError::Session(e)) => return Err(e.into()),
                Err(ResolveError::Driver(e)) => return Err(self.snapshot_error(e).await),
                Err(ResolveError::InvalidLocator(e)) => {
                    return Err(PageError::InvalidDescriptor(format!("ready signal: {e}")))
                }
            }
        }

        last.ok_or_else(|| PageError::InvalidDescriptor("ready signal lists no elements".into()))
    }

    // -----------------------------------------------------------------------
    // Element actions
    // -----------------------------------------------------------------------

    /// Resolve a named element, waiting up to the page's element timeout.
    pub async fn element(&self, name: &str) -> Result<ElementHandle, PageError> {
        let locator = self.locator(name)?;
        self.ensure_bound().await?;
        self.resolve_named(name, locator, self.policy.element_timeout).await
    }

    async fn resolve_named(
        &self,
        name: &str,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<ElementHandle, PageError> {
        match self.resolver.resolve(locator, Some(timeout)).await {
            Ok(handle) => Ok(handle),
            Err(ResolveError::NotFound(source)) => Err(PageError::ElementNotFound {
                element: name.to_string(),
                source,
            }),
            Err(ResolveError::Session(e)) => Err(e.into()),
            Err(ResolveError::Driver(e)) => Err(self.snapshot_error(e).await),
            Err(ResolveError::InvalidLocator(e)) => Err(invalid_element(name, e)),
        }
    }

    pub async fn click(&self, name: &str) -> Result<(), PageError> {
        self.act(name, Action::Click).await.map(drop)
    }

    /// Clear the field, then type `text` into it.
    pub async fn type_text(&self, name: &str, text: &str) -> Result<(), PageError> {
        self.act(name, Action::Type(text)).await.map(drop)
    }

    pub async fn get_text(&self, name: &str) -> Result<String, PageError> {
        self.act(name, Action::ReadText)
            .await
            .map(Option::unwrap_or_default)
    }

    /// Resolve `name` and run `action` on it.
    ///
    /// Stale-element failures are retried `action_retries` times, then the
    /// page is rebound and the action tried once more. Other driver failures
    /// are not retried.
    #[instrument(skip(self, action), fields(page = %self.descriptor.name))]
    async fn act(&self, name: &str, action: Action<'_>) -> Result<Option<String>, PageError> {
        let locator = self.locator(name)?;
        let attempts = self.policy.action_retries + 2;
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt == attempts {
                debug!(element = name, "rebinding before final attempt");
                self.rebind().await?;
            } else {
                self.ensure_bound().await?;
            }
            // The session may be replaced while resolving; the element id
            // is only valid on the session it was found on.
            let handle = self
                .resolve_named(name, locator, self.policy.element_timeout)
                .await?;

            match self.perform(handle.session_id(), handle.element_id(), &action).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_stale() => {
                    debug!(element = name, attempt, "stale element");
                    last_error = Some(e);
                }
                Err(e) if e.is_session_lost() => {
                    warn!(element = name, attempt, error = %e, "session lost during action");
                    self.resolver.session().invalidate_session(handle.session_id()).await;
                    self.mark_stale().await;
                    last_error = Some(e);
                }
                Err(cause) => {
                    return Err(PageError::ActionFailed {
                        element: name.to_string(),
                        cause,
                    })
                }
            }
        }

        Err(PageError::ActionFailed {
            element: name.to_string(),
            cause: last_error.unwrap_or_else(|| DriverError::CommandFailed("no attempt made".into())),
        })
    }

    async fn perform(
        &self,
        session_id: &str,
        element_id: &str,
        action: &Action<'_>,
    ) -> Result<Option<String>, DriverError> {
        let driver = self.driver();
        match action {
            Action::Click => driver.click(session_id, element_id).await.map(|_| None),
            Action::Type(text) => {
                driver.clear(session_id, element_id).await?;
                driver.send_keys(session_id, element_id, text).await?;
                Ok(None)
            }
            Action::ReadText => driver.text(session_id, element_id).await.map(Some),
        }
    }

    // -----------------------------------------------------------------------
    // Soft probes
    // -----------------------------------------------------------------------

    /// Returns `true` if `name` is displayed right now. Never waits or fails.
    pub async fn is_displayed(&self, name: &str) -> bool {
        let Ok(locator) = self.locator(name) else {
            return false;
        };
        if self.ensure_bound().await.is_err() {
            return false;
        }
        matches!(self.resolver.find_once(locator).await, Ok(Some(_)))
    }

    /// Returns `true` if `name` is displayed and enabled right now.
    pub async fn is_enabled(&self, name: &str) -> bool {
        let Ok(locator) = self.locator(name) else {
            return false;
        };
        if self.ensure_bound().await.is_err() {
            return false;
        }
        match self.resolver.find_once(locator).await {
            Ok(Some(handle)) => self
                .driver()
                .is_enabled(handle.session_id(), handle.element_id())
                .await
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Number of elements currently matching `name`.
    pub async fn count(&self, name: &str) -> Result<usize, PageError> {
        let locator = self.locator(name)?;
        self.ensure_bound().await?;
        match self.resolver.resolve_all(locator).await {
            Ok(all) => Ok(all.len()),
            Err(ResolveError::Session(e)) => Err(e.into()),
            Err(ResolveError::Driver(e)) => Err(self.snapshot_error(e).await),
            Err(ResolveError::InvalidLocator(e)) => Err(invalid_element(name, e)),
            Err(ResolveError::NotFound(_)) => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Gestures
    // -----------------------------------------------------------------------

    /// One scroll gesture over the whole window.
    pub async fn scroll(&self, direction: ScrollDirection) -> Result<(), PageError> {
        let session = self.ensure_bound().await?;
        let sid = session.session_id.as_str();
        let window = match self.driver().window_rect(sid).await {
            Ok(window) => window,
            Err(e) => return Err(self.session_error(sid, e).await),
        };
        let (from, to) = swipe_points(&window, direction);
        debug!(%direction, ?from, ?to, "scroll");
        if let Err(e) = self
            .driver()
            .swipe(sid, from, to, self.policy.scroll_duration)
            .await
        {
            return Err(self.session_error(sid, e).await);
        }
        Ok(())
    }

    /// Scroll down until `name` is displayed, at most `max_scrolls` times.
    ///
    /// The element is checked before the first scroll and after each one.
    ///
    /// # Errors
    ///
    /// [`PageError::ElementNotFound`] whose `scroll_attempts` equals
    /// `max_scrolls` when the element never showed up.
    #[instrument(skip(self), fields(page = %self.descriptor.name))]
    pub async fn scroll_until_visible(&self, name: &str, max_scrolls: u32) -> Result<ElementHandle, PageError> {
        let locator = self.locator(name)?;
        let started = Instant::now();
        self.ensure_bound().await?;

        if let Ok(Some(handle)) = self.resolver.find_once(locator).await {
            return Ok(handle);
        }

        for scroll in 1..=max_scrolls {
            self.scroll(ScrollDirection::Down).await?;
            match self
                .resolve_named(name, locator, self.policy.scroll_probe_timeout)
                .await
            {
                Ok(handle) => {
                    info!(element = name, scrolls = scroll, "element scrolled into view");
                    return Ok(handle);
                }
                Err(PageError::ElementNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Err(PageError::ElementNotFound {
            element: name.to_string(),
            source: ElementNotFoundError {
                locator: locator.clone(),
                tried_alternates: locator.candidates().into_iter().skip(1).collect(),
                elapsed: started.elapsed(),
                last_error: None,
                scroll_attempts: max_scrolls,
            },
        })
    }

    pub async fn go_back(&self) -> Result<(), PageError> {
        let session = self.ensure_bound().await?;
        if let Err(e) = self.driver().back(&session.session_id).await {
            return Err(self.session_error(&session.session_id, e).await);
        }
        Ok(())
    }

    /// Dismiss the soft keyboard if it is showing. Failures are ignored.
    pub async fn hide_keyboard(&self) {
        let Ok(session) = self.ensure_bound().await else {
            return;
        };
        if let Err(e) = self.driver().hide_keyboard(&session.session_id).await {
            debug!(error = %e, "hide_keyboard ignored");
        }
    }

    /// Base64-encoded PNG of the current screen.
    pub async fn screenshot(&self) -> Result<String, PageError> {
        let session = self.ensure_bound().await?;
        match self.driver().screenshot(&session.session_id).await {
            Ok(png) => Ok(base64::engine::general_purpose::STANDARD.encode(png)),
            Err(e) => Err(self.session_error(&session.session_id, e).await),
        }
    }
}

fn invalid_element(name: &str, error: LocatorError) -> PageError {
    PageError::InvalidDescriptor(format!("element '{name}': {error}"))
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("name", &self.descriptor.name)
            .field("policy", &self.policy)
            .finish()
    }
}

/// A concrete screen built on top of a [`Page`].
///
/// Implementors only supply [`page`](Screen::page); override
/// [`is_loaded`](Screen::is_loaded) when the ready signal alone cannot tell
/// this screen apart from its neighbours.
#[async_trait]
pub trait Screen: Send + Sync {
    fn page(&self) -> &Page;

    fn title(&self) -> &str {
        self.page().name()
    }

    async fn is_loaded(&self, timeout: Duration) -> bool {
        self.page().is_loaded(timeout).await
    }
}
