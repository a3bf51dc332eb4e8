//! Bounded, polling element resolution with ordered fallbacks.
//!
//! [`ResilientLocator`] turns a [`Locator`] into an [`ElementHandle`]. The
//! primary locator is polled for the full timeout; only when it never shows
//! up are the alternates tried, each with a shorter sub-timeout. Every poll
//! goes through [`SessionClient::get_or_recreate`], so a session that died
//! mid-wait is replaced and the search continues on the new one.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::config::WaitPolicy;
use crate::driver::DriverError;
use crate::element::ElementHandle;
use crate::locator::{Locator, LocatorError};
use crate::session::{SessionClient, SessionStartError};

/// No candidate of a locator produced a displayed element in time.
#[derive(Error, Debug, Clone)]
#[error(
    "Element {locator} not found after {}ms ({} alternate(s) tried){}",
    .elapsed.as_millis(),
    .tried_alternates.len(),
    .last_error.as_deref().map(|e| format!(", last error: {e}")).unwrap_or_default()
)]
pub struct ElementNotFoundError {
    /// The locator that was asked for.
    pub locator: Locator,
    /// Alternates that were attempted after the primary, in order.
    pub tried_alternates: Vec<Locator>,
    /// Total time spent searching.
    pub elapsed: Duration,
    /// The last non-"not found" failure seen while probing, if any.
    pub last_error: Option<String>,
    /// Scroll gestures made while searching (zero unless scrolling).
    pub scroll_attempts: u32,
}

/// Errors from [`ResilientLocator`].
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    NotFound(#[from] ElementNotFoundError),

    /// No session could be obtained; retrying the lookup is pointless.
    #[error(transparent)]
    Session(#[from] SessionStartError),

    /// The server failed a snapshot query for a reason other than "not found".
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The locator can never match; nothing was sent to the server.
    #[error(transparent)]
    InvalidLocator(#[from] LocatorError),
}

enum Probe {
    Found(ElementHandle),
    Missing,
    Failed(DriverError),
}

/// Resolves locators against the session owned by a [`SessionClient`].
#[derive(Debug, Clone)]
pub struct ResilientLocator {
    session: Arc<SessionClient>,
    policy: WaitPolicy,
}

impl ResilientLocator {
    pub fn new(session: Arc<SessionClient>, policy: WaitPolicy) -> Self {
        Self { session, policy }
    }

    pub fn session(&self) -> &Arc<SessionClient> {
        &self.session
    }

    pub fn policy(&self) -> &WaitPolicy {
        &self.policy
    }

    /// Wait for `locator` to match a displayed element.
    ///
    /// The primary is polled every `poll_interval` until `timeout` (or the
    /// policy's `default_timeout`) elapses. Each alternate is then polled in
    /// declared order for `min(alternate_timeout, timeout)`. At least one
    /// attempt is made per candidate, even for a zero timeout.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::NotFound`] when no candidate matched in time
    /// - [`ResolveError::Session`] when no session could be started
    /// - [`ResolveError::InvalidLocator`] for an empty value or a chain that
    ///   revisits a candidate
    #[instrument(skip(self, locator), fields(locator = %locator))]
    pub async fn resolve(
        &self,
        locator: &Locator,
        timeout: Option<Duration>,
    ) -> Result<ElementHandle, ResolveError> {
        locator.validate()?;
        let timeout = timeout.unwrap_or(self.policy.default_timeout);
        let started = Instant::now();
        let mut tried_alternates = Vec::new();
        let mut last_error = None;

        for (index, candidate) in locator.candidates().into_iter().enumerate() {
            let budget = if index == 0 {
                timeout
            } else {
                tried_alternates.push(candidate.clone());
                self.policy.alternate_timeout.min(timeout)
            };

            if let Some(handle) = self.poll(locator, &candidate, budget, &mut last_error).await? {
                debug!(
                    matched = %handle.matched(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "element resolved"
                );
                return Ok(handle);
            }
            debug!(candidate = %candidate, "candidate exhausted");
        }

        Err(ElementNotFoundError {
            locator: locator.clone(),
            tried_alternates,
            elapsed: started.elapsed(),
            last_error,
            scroll_attempts: 0,
        }
        .into())
    }

    /// Every element matching the first candidate that matches anything.
    ///
    /// A single snapshot with no waiting; an empty vector means nothing
    /// matched. Hidden elements are included.
    pub async fn resolve_all(&self, locator: &Locator) -> Result<Vec<ElementHandle>, ResolveError> {
        locator.validate()?;
        let session = self.session.get_or_recreate().await?;
        let driver = self.session.driver();

        for candidate in locator.candidates() {
            let found = match driver
                .find_elements(&session.session_id, candidate.strategy, &candidate.value)
                .await
            {
                Ok(found) => found,
                Err(e) if e.is_not_found() => continue,
                Err(e) => {
                    if e.is_session_lost() {
                        self.session.invalidate_session(&session.session_id).await;
                    }
                    return Err(e.into());
                }
            };
            if !found.is_empty() {
                return Ok(found
                    .into_iter()
                    .map(|el| ElementHandle::new(locator.clone(), candidate.clone(), &session, el))
                    .collect());
            }
        }
        Ok(Vec::new())
    }

    /// Probe each candidate once, in order, without waiting.
    ///
    /// Driver failures count as "not displayed"; a lost session is
    /// invalidated so the next candidate runs on a fresh one.
    pub async fn find_once(&self, locator: &Locator) -> Result<Option<ElementHandle>, ResolveError> {
        locator.validate()?;
        for candidate in locator.candidates() {
            match self.probe(locator, &candidate).await? {
                Probe::Found(handle) => return Ok(Some(handle)),
                Probe::Missing => {}
                Probe::Failed(e) => debug!(candidate = %candidate, error = %e, "probe failed"),
            }
        }
        Ok(None)
    }

    /// Poll one candidate until it is found or `budget` runs out.
    async fn poll(
        &self,
        locator: &Locator,
        candidate: &Locator,
        budget: Duration,
        last_error: &mut Option<String>,
    ) -> Result<Option<ElementHandle>, SessionStartError> {
        let deadline = Instant::now() + budget;
        loop {
            match self.probe(locator, candidate).await? {
                Probe::Found(handle) => return Ok(Some(handle)),
                Probe::Missing => {}
                Probe::Failed(e) => *last_error = Some(e.to_string()),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.policy.poll_interval.min(deadline - now)).await;
        }
    }

    /// A single find-and-check-displayed attempt for one candidate.
    async fn probe(&self, locator: &Locator, candidate: &Locator) -> Result<Probe, SessionStartError> {
        let session = self.session.get_or_recreate().await?;
        let driver = self.session.driver();
        let sid = session.session_id.as_str();

        let found = match driver.find_elements(sid, candidate.strategy, &candidate.value).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => return Ok(Probe::Missing),
            Err(e) => return Ok(self.failed(sid, e).await),
        };

        for element in found {
            match driver.is_displayed(sid, &element.id).await {
                Ok(true) => {
                    return Ok(Probe::Found(ElementHandle::new(
                        locator.clone(),
                        candidate.clone(),
                        &session,
                        element,
                    )))
                }
                Ok(false) => {}
                // Element re-rendered between find and check.
                Err(e) if e.is_stale() || e.is_not_found() => {}
                Err(e) => return Ok(self.failed(sid, e).await),
            }
        }
        Ok(Probe::Missing)
    }

    async fn failed(&self, session_id: &str, error: DriverError) -> Probe {
        if error.is_session_lost() {
            debug!(session_id, error = %error, "session lost during probe");
            self.session.invalidate_session(session_id).await;
        }
        Probe::Failed(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::SessionConfig;
    use crate::locator::Strategy;
    use crate::mock::{MockDriver, MockElement};

    fn resolver(driver: Arc<MockDriver>) -> ResilientLocator {
        let client = Arc::new(SessionClient::new(driver, SessionConfig::default()));
        ResilientLocator::new(client, WaitPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn primary_wins_when_present() {
        let driver = Arc::new(MockDriver::new());
        driver.add_element(MockElement::new(Strategy::Id, "primary"));
        driver.add_element(MockElement::new(Strategy::XPath, "//alt"));
        let resolver = resolver(driver.clone());

        let locator = Locator::id("primary").or(Locator::xpath("//alt"));
        let handle = resolver.resolve(&locator, None).await.unwrap();

        assert!(!handle.via_alternate());
        assert_eq!(driver.find_calls("//alt"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_element_is_not_resolved() {
        let driver = Arc::new(MockDriver::new());
        driver.add_element(MockElement::new(Strategy::Id, "ghost").hidden());
        let resolver = resolver(driver.clone());

        let err = resolver
            .resolve(&Locator::id("ghost"), Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_makes_one_attempt_per_candidate() {
        let driver = Arc::new(MockDriver::new());
        let resolver = resolver(driver.clone());
        let locator = Locator::id("a").or(Locator::id("b"));

        let begin = Instant::now();
        let err = resolver.resolve(&locator, Some(Duration::ZERO)).await.unwrap_err();

        assert_eq!(begin.elapsed(), Duration::ZERO);
        assert_eq!(driver.find_calls("a"), 1);
        assert_eq!(driver.find_calls("b"), 1);
        match err {
            ResolveError::NotFound(e) => {
                assert_eq!(e.tried_alternates, vec![Locator::id("b")]);
                assert_eq!(e.scroll_attempts, 0);
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn alternates_use_the_shorter_sub_timeout() {
        let driver = Arc::new(MockDriver::new());
        let resolver = resolver(driver.clone());
        let locator = Locator::id("a").or(Locator::id("b"));

        let begin = Instant::now();
        let err = resolver
            .resolve(&locator, Some(Duration::from_secs(3)))
            .await
            .unwrap_err();

        // 3s on the primary, then min(2s, 3s) on the alternate.
        let elapsed = begin.elapsed();
        assert!(elapsed >= Duration::from_secs(5), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(5100), "elapsed {elapsed:?}");
        let ResolveError::NotFound(e) = err else { panic!("expected NotFound") };
        assert!(e.elapsed >= Duration::from_secs(5));
        assert!(e.to_string().contains("1 alternate(s) tried"));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_locator_fails_without_polling() {
        let driver = Arc::new(MockDriver::new());
        let resolver = resolver(driver.clone());
        let begin = Instant::now();

        let err = resolver.resolve(&Locator::id(""), None).await.unwrap_err();
        assert!(matches!(err, ResolveError::InvalidLocator(LocatorError::EmptyValue(Strategy::Id))));

        let looping = Locator::id("a").or(Locator::xpath("//a")).or(Locator::id("a"));
        let err = resolver.resolve(&looping, None).await.unwrap_err();
        assert!(matches!(err, ResolveError::InvalidLocator(LocatorError::Cycle { .. })));
        assert!(matches!(
            resolver.find_once(&Locator::xpath(" ")).await,
            Err(ResolveError::InvalidLocator(_))
        ));

        assert_eq!(begin.elapsed(), Duration::ZERO);
        assert_eq!(driver.create_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn session_start_failure_is_fatal() {
        let driver = Arc::new(MockDriver::new());
        driver.fail_next_starts(10);
        let resolver = resolver(driver.clone());

        let err = resolver.resolve(&Locator::id("x"), None).await.unwrap_err();
        assert!(matches!(err, ResolveError::Session(_)));
        assert_eq!(driver.find_calls("x"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn session_death_mid_wait_recovers() {
        let driver = Arc::new(MockDriver::new());
        driver.add_element(MockElement::new(Strategy::Id, "late").appears_after(Duration::from_secs(2)));
        let resolver = resolver(driver.clone());

        let first = resolver.session().get_or_recreate().await.unwrap();
        driver.kill_session(&first.session_id);

        let handle = resolver.resolve(&Locator::id("late"), None).await.unwrap();
        assert_ne!(handle.session_id(), first.session_id);
        assert_eq!(handle.generation(), first.generation + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_all_snapshots_first_matching_candidate() {
        let driver = Arc::new(MockDriver::new());
        driver.add_element(MockElement::new(Strategy::ClassName, "row"));
        driver.add_element(MockElement::new(Strategy::ClassName, "row").hidden());
        driver.add_element(MockElement::new(Strategy::Id, "other"));
        let resolver = resolver(driver.clone());

        let locator = Locator::id("missing").or(Locator::class_name("row"));
        let all = resolver.resolve_all(&locator).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|h| h.via_alternate()));

        let none = resolver.resolve_all(&Locator::id("nope")).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn find_once_does_not_wait() {
        let driver = Arc::new(MockDriver::new());
        driver.add_element(MockElement::new(Strategy::Id, "late").appears_after(Duration::from_secs(1)));
        let resolver = resolver(driver.clone());

        let begin = Instant::now();
        assert!(resolver.find_once(&Locator::id("late")).await.unwrap().is_none());
        assert_eq!(begin.elapsed(), Duration::ZERO);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(resolver.find_once(&Locator::id("late")).await.unwrap().is_some());
    }
}
