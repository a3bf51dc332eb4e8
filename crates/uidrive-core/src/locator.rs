//! Declarative descriptions of how to find a UI element.
//!
//! A [`Locator`] pairs a [`Strategy`] with a value and an ordered list of
//! alternate locators. Resolution tries the primary first and then each
//! alternate in declared order, so fallback chains are data rather than
//! nested probing code.
//!
//! # Example
//!
//! ```
//! use uidrive_core::locator::{Locator, Strategy};
//!
//! let login = Locator::id("com.example.app:id/btn_sign_in")
//!     .or(Locator::xpath("//android.widget.Button[@text='Sign In']"))
//!     .or(Locator::accessibility_id("sign-in"));
//!
//! assert_eq!(login.strategy, Strategy::Id);
//! assert_eq!(login.candidates().len(), 3);
//! assert!(login.validate().is_ok());
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the remote server should search for an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Android resource id (e.g. `com.example.app:id/edit_email`).
    Id,
    /// XPath over the page source.
    #[serde(alias = "x_path")]
    XPath,
    /// Widget class name (e.g. `androidx.recyclerview.widget.RecyclerView`).
    ClassName,
    /// Content description / accessibility id.
    AccessibilityId,
}

impl Strategy {
    /// The W3C WebDriver `using` value for this strategy.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Strategy::Id => "id",
            Strategy::XPath => "xpath",
            Strategy::ClassName => "class name",
            Strategy::AccessibilityId => "accessibility id",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Id => "id",
            Strategy::XPath => "xpath",
            Strategy::ClassName => "class_name",
            Strategy::AccessibilityId => "accessibility_id",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Strategy {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', ' '], "_").as_str() {
            "id" => Ok(Strategy::Id),
            "xpath" | "x_path" => Ok(Strategy::XPath),
            "class_name" | "class" => Ok(Strategy::ClassName),
            "accessibility_id" | "a11y" => Ok(Strategy::AccessibilityId),
            other => Err(LocatorError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Errors raised when a locator violates its invariants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocatorError {
    /// The locator value is empty or whitespace.
    #[error("Locator value must not be empty (strategy {0})")]
    EmptyValue(Strategy),

    /// An alternate repeats a candidate already tried earlier in the chain.
    #[error("Locator chain revisits {strategy}={value}")]
    Cycle {
        /// Strategy of the repeated candidate.
        strategy: Strategy,
        /// Value of the repeated candidate.
        value: String,
    },

    /// The strategy name could not be parsed.
    #[error("Unknown locator strategy '{0}'")]
    UnknownStrategy(String),
}

/// An immutable description of how to find one UI element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    /// The search strategy.
    pub strategy: Strategy,
    /// The strategy-specific query.
    pub value: String,
    /// Fallbacks tried in order when the primary does not resolve.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternates: Vec<Locator>,
}

impl Locator {
    /// Creates a locator with no alternates.
    ///
    /// This does not check the value; use [`try_new`](Self::try_new) for
    /// untrusted input or call [`validate`](Self::validate) later.
    pub fn new(strategy: Strategy, value: impl Into<String>) -> Self {
        Self {
            strategy,
            value: value.into(),
            alternates: Vec::new(),
        }
    }

    /// Creates a locator, rejecting an empty value.
    pub fn try_new(strategy: Strategy, value: impl Into<String>) -> Result<Self, LocatorError> {
        let locator = Self::new(strategy, value);
        locator.validate()?;
        Ok(locator)
    }

    pub fn id(value: impl Into<String>) -> Self {
        Self::new(Strategy::Id, value)
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self::new(Strategy::XPath, value)
    }

    pub fn class_name(value: impl Into<String>) -> Self {
        Self::new(Strategy::ClassName, value)
    }

    pub fn accessibility_id(value: impl Into<String>) -> Self {
        Self::new(Strategy::AccessibilityId, value)
    }

    /// Matches any element whose visible text equals `text` exactly.
    pub fn text(text: &str) -> Self {
        Self::xpath(format!("//*[@text={}]", xpath_literal(text)))
    }

    /// Appends an alternate to the end of the fallback chain.
    pub fn or(mut self, alternate: Locator) -> Self {
        self.alternates.push(alternate);
        self
    }

    /// The primary locator alone, without alternates.
    pub fn primary(&self) -> Locator {
        Locator::new(self.strategy, self.value.clone())
    }

    /// Every candidate in resolution order: the primary followed by the
    /// alternates, each alternate's own alternates flattened depth-first.
    pub fn candidates(&self) -> Vec<Locator> {
        let mut out = Vec::with_capacity(1 + self.alternates.len());
        self.collect_candidates(&mut out);
        out
    }

    fn collect_candidates(&self, out: &mut Vec<Locator>) {
        out.push(self.primary());
        for alternate in &self.alternates {
            alternate.collect_candidates(out);
        }
    }

    /// Checks that every value is non-empty and that no candidate repeats
    /// an earlier one.
    pub fn validate(&self) -> Result<(), LocatorError> {
        let mut seen: Vec<(Strategy, &str)> = Vec::new();
        self.validate_into(&mut seen)
    }

    fn validate_into<'a>(&'a self, seen: &mut Vec<(Strategy, &'a str)>) -> Result<(), LocatorError> {
        if self.value.trim().is_empty() {
            return Err(LocatorError::EmptyValue(self.strategy));
        }
        if seen.contains(&(self.strategy, self.value.as_str())) {
            return Err(LocatorError::Cycle {
                strategy: self.strategy,
                value: self.value.clone(),
            });
        }
        seen.push((self.strategy, self.value.as_str()));
        for alternate in &self.alternates {
            alternate.validate_into(seen)?;
        }
        Ok(())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.strategy, self.value)?;
        if !self.alternates.is_empty() {
            write!(f, " (+{} alternates)", self.candidates().len() - 1)?;
        }
        Ok(())
    }
}

/// Quotes a string as an XPath 1.0 literal, falling back to `concat()`
/// when it contains both quote characters.
fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{text}'")
    } else if !text.contains('"') {
        format!("\"{text}\"")
    } else {
        let parts: Vec<String> = text.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}
