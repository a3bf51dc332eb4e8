//! Element references handed out by the remote server and by the resolver.
//!
//! The server identifies elements with opaque ids that are only meaningful
//! inside the session that produced them. [`ElementHandle`] therefore keeps
//! the session id and generation next to the element id so callers can tell
//! when a handle has outlived its session and must be re-resolved.

use serde::{Deserialize, Serialize};

use crate::locator::Locator;
use crate::session::SessionHandle;

/// A raw element reference as returned by a find request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteElement {
    /// The server-assigned element id.
    pub id: String,
}

impl RemoteElement {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// The on-screen rectangle of an element or window, in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementFrame {
    /// The x-coordinate of the top-left corner.
    pub x: f64,
    /// The y-coordinate of the top-left corner.
    pub y: f64,
    /// The width in pixels.
    pub width: f64,
    /// The height in pixels.
    pub height: f64,
}

/// A lazily-resolved, possibly-stale reference to a remote UI element.
///
/// Handles carry no ownership over the remote element: only the locator and
/// the identity of the session that produced them. Once that session is
/// recreated the handle is no longer [current](Self::is_current) and has to
/// be resolved again through its [`locator`](Self::locator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    locator: Locator,
    matched: Locator,
    session_id: String,
    generation: u64,
    element_id: String,
}

impl ElementHandle {
    pub(crate) fn new(
        locator: Locator,
        matched: Locator,
        session: &SessionHandle,
        element: RemoteElement,
    ) -> Self {
        Self {
            locator,
            matched,
            session_id: session.session_id.clone(),
            generation: session.generation,
            element_id: element.id,
        }
    }

    /// The locator (with alternates) that was asked for.
    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// The single candidate that actually matched.
    pub fn matched(&self) -> &Locator {
        &self.matched
    }

    /// Returns `true` if the element was found through an alternate rather
    /// than the primary locator.
    pub fn via_alternate(&self) -> bool {
        self.matched != self.locator.primary()
    }

    /// The id of the session that produced this handle.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The generation of the session that produced this handle.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The server-assigned element id.
    pub fn element_id(&self) -> &str {
        &self.element_id
    }

    /// Returns `true` if `session` is still the session that produced this
    /// handle and it is live.
    pub fn is_current(&self, session: &SessionHandle) -> bool {
        session.is_live()
            && session.generation == self.generation
            && session.session_id == self.session_id
    }
}
