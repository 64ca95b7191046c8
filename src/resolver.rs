//! Selector resolution with an ordered fallback chain.
//!
//! UI locators break as markup changes. A test names several ways of
//! finding the same element (test id, ARIA role, visible text, CSS path)
//! and the [`SelectorResolver`] tries them front to back, stopping at the
//! first strategy that matches anything.
//!
//! # Example
//!
//! ```rust,ignore
//! use testmend::resolver::{SelectorResolver, SelectorStrategy, SelectorArgs};
//!
//! let strategies = vec![
//!     SelectorStrategy::literal("test-id", "[data-testid=login]"),
//!     SelectorStrategy::literal("role", "role=button[name=Login]"),
//!     SelectorStrategy::template("text", |args| format!("text={}", args["label"])),
//! ];
//! let resolution = resolver.resolve(page, &strategies, &args).await;
//! ```

use crate::driver::{Element, Page};
use crate::handoff::{FailureEntry, HandoffRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Test name used for failures synthesized by the resolver.
pub const ELEMENT_LOCATION_TEST: &str = "Element Location";

/// Runtime values substituted into templated selectors.
pub type SelectorArgs = HashMap<String, String>;

type SelectorTemplate = Arc<dyn Fn(&SelectorArgs) -> String + Send + Sync>;

/// Where a strategy's selector comes from.
#[derive(Clone)]
pub enum SelectorSource {
    /// A fixed selector string.
    Literal(String),
    /// A selector computed from runtime arguments.
    Template(SelectorTemplate),
}

impl fmt::Debug for SelectorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            Self::Template(_) => f.write_str("Template(..)"),
        }
    }
}

/// One named way of locating an element.
#[derive(Debug, Clone)]
pub struct SelectorStrategy {
    pub name: String,
    pub source: SelectorSource,
}

impl SelectorStrategy {
    pub fn literal(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: SelectorSource::Literal(selector.into()),
        }
    }

    pub fn template<F>(name: impl Into<String>, template: F) -> Self
    where
        F: Fn(&SelectorArgs) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            source: SelectorSource::Template(Arc::new(template)),
        }
    }

    /// The concrete selector for these arguments.
    #[must_use]
    pub fn selector(&self, args: &SelectorArgs) -> String {
        match &self.source {
            SelectorSource::Literal(s) => s.clone(),
            SelectorSource::Template(template) => template(args),
        }
    }
}

/// Record of trying one strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorAttempt {
    pub strategy: String,
    pub selector: String,
    /// Number of matching elements (0 on error).
    pub found: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SelectorAttempt {
    #[must_use]
    pub fn matched(&self) -> bool {
        self.error.is_none() && self.found > 0
    }
}

/// Result of one resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub element: Option<Element>,
    /// Strategies tried, in order, up to and including the winner.
    pub attempts: Vec<SelectorAttempt>,
    /// Set when every strategy was exhausted without a match.
    pub failure: Option<FailureEntry>,
}

impl Resolution {
    /// Name of the strategy that produced the element.
    #[must_use]
    pub fn winning_strategy(&self) -> Option<&str> {
        self.element
            .as_ref()
            .and_then(|_| self.attempts.last())
            .map(|a| a.strategy.as_str())
    }
}

/// Tries selector strategies in order until one matches.
///
/// Every attempt, successful or not, is kept in an attempt log for later
/// replay.
#[derive(Debug, Default)]
pub struct SelectorResolver {
    log: Mutex<Vec<SelectorAttempt>>,
}

impl SelectorResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self) -> MutexGuard<'_, Vec<SelectorAttempt>> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolve an element. Never fails: lookup errors are recorded per
    /// strategy, and exhaustion is reported through `Resolution::failure`.
    pub async fn resolve(
        &self,
        page: &dyn Page,
        strategies: &[SelectorStrategy],
        args: &SelectorArgs,
    ) -> Resolution {
        let mut attempts = Vec::with_capacity(strategies.len());

        for strategy in strategies {
            let selector = strategy.selector(args);
            let outcome = match page.count(&selector).await {
                Ok(0) => Ok(None),
                Ok(found) => page.first(&selector).await.map(|el| Some((found, el))),
                Err(e) => Err(e),
            };

            let attempt = match &outcome {
                Ok(Some((found, _))) => SelectorAttempt {
                    strategy: strategy.name.clone(),
                    selector: selector.clone(),
                    found: *found,
                    error: None,
                },
                Ok(None) => SelectorAttempt {
                    strategy: strategy.name.clone(),
                    selector: selector.clone(),
                    found: 0,
                    error: None,
                },
                Err(e) => {
                    debug!(strategy = %strategy.name, %selector, error = %e, "Selector lookup failed");
                    SelectorAttempt {
                        strategy: strategy.name.clone(),
                        selector: selector.clone(),
                        found: 0,
                        error: Some(e.to_string()),
                    }
                }
            };

            self.log().push(attempt.clone());
            attempts.push(attempt);

            if let Ok(Some((_, element))) = outcome {
                debug!(strategy = %strategy.name, %selector, "Element located");
                return Resolution {
                    element: Some(element),
                    attempts,
                    failure: None,
                };
            }
        }

        warn!(
            strategies = strategies.len(),
            "All selector strategies exhausted"
        );

        let screenshot = page.screenshot().await.ok();
        let url = page.url().await.ok();
        let tried: Vec<&str> = attempts.iter().map(|a| a.selector.as_str()).collect();
        let failure = FailureEntry::new(
            ELEMENT_LOCATION_TEST,
            format!(
                "Element not found with any of {} strategies: {}",
                strategies.len(),
                tried.join(", ")
            ),
        )
        .with_attempts(attempts.clone())
        .with_screenshot(screenshot)
        .with_url(url);

        Resolution {
            element: None,
            attempts,
            failure: Some(failure),
        }
    }

    /// Resolve and append any exhaustion failure to `handoff`.
    pub async fn resolve_into(
        &self,
        page: &dyn Page,
        strategies: &[SelectorStrategy],
        args: &SelectorArgs,
        handoff: &mut HandoffRecord,
    ) -> Option<Element> {
        let resolution = self.resolve(page, strategies, args).await;
        if let Some(failure) = resolution.failure {
            handoff.add_failure(failure);
        }
        resolution.element
    }

    /// Every attempt recorded since creation or the last clear.
    #[must_use]
    pub fn attempt_log(&self) -> Vec<SelectorAttempt> {
        self.log().clone()
    }

    pub fn clear_attempt_log(&self) {
        self.log().clear();
    }
}
