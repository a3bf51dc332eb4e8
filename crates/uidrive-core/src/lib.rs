//! # uidrive-core
//!
//! Resilient session management and element resolution for remote mobile UI
//! automation against an Appium-compatible WebDriver server.
//!
//! Tests written on top of this crate never touch raw element references.
//! They name elements through [`page::PageDescriptor`]s and act on them
//! through [`page::Page`], which re-resolves every element through
//! [`resolver::ResilientLocator`] and obtains a live session from
//! [`session::SessionClient`] each time. A dead session is replaced, a
//! re-rendered element is looked up again, and every wait is bounded.
//!
//! ## Modules
//!
//! - [`locator`] - Element locators with ordered fallback alternates
//! - [`element`] - Element handles tied to the session that produced them
//! - [`driver`] - The [`driver::RemoteDriver`] trait and error classification
//! - [`webdriver`] - W3C WebDriver HTTP implementation of the driver
//! - [`mock`] - Scripted in-memory driver for tests
//! - [`session`] - Session lifecycle with liveness probing and recreation
//! - [`resolver`] - Bounded polling resolution across alternates
//! - [`gesture`] - Swipe geometry for scrolling
//! - [`page`] - Page objects with retrying actions
//! - [`report`] - Step reporting to pluggable sinks
//! - [`config`] - Session configuration, persisted in `~/.uidrive/config.json`
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use uidrive_core::config::SessionConfig;
//! use uidrive_core::locator::Locator;
//! use uidrive_core::page::{Page, PageDescriptor, ReadySignal};
//! use uidrive_core::session::SessionClient;
//! use uidrive_core::webdriver::WebDriverClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::load();
//! let driver = Arc::new(WebDriverClient::new(&config.server_url)?);
//! let session = Arc::new(SessionClient::new(driver, config));
//!
//! let home = PageDescriptor::new("home", ReadySignal::Locator(Locator::id("toolbar")))
//!     .element("search", Locator::accessibility_id("Search").or(Locator::text("Search")));
//! let page = Page::from_session(Arc::new(home), session.clone());
//!
//! if page.is_loaded(std::time::Duration::from_secs(10)).await {
//!     page.click("search").await?;
//! }
//! session.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod element;
pub mod gesture;
pub mod locator;
pub mod mock;
pub mod page;
pub mod report;
pub mod resolver;
pub mod session;
pub mod webdriver;
