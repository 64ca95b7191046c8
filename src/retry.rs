//! Error-aware retry with per-class exponential backoff.
//!
//! The retry classification here is intentionally coarser than the
//! diagnoser's failure categories and is computed independently: it only
//! picks a backoff curve, it never drives remediation.
//!
//! ```text
//! attempt k fails ──classify──> RetryClass ──table──> wait * multiplier^k ──sleep──> attempt k+1
//! ```

use crate::config::{MendConfig, ResolvedFailurePolicy};
use crate::driver::Page;
use crate::error::{MendError, Result};
use crate::executor::{TestExecutor, TestResult, UiTest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

// ============================================================================
// Retry Classification
// ============================================================================

/// Backoff bucket for a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RetryClass {
    TimeoutError,
    NetworkError,
    ElementNotFound,
    Default,
}

impl RetryClass {
    /// Classify an error message. Matching is case-sensitive and checked in
    /// this order: `Timeout`, `net::`, `not found`.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        if message.contains("Timeout") {
            Self::TimeoutError
        } else if message.contains("net::") {
            Self::NetworkError
        } else if message.contains("not found") {
            Self::ElementNotFound
        } else {
            Self::Default
        }
    }

    /// Built-in backoff for this class.
    #[must_use]
    pub fn default_backoff(&self) -> BackoffStrategy {
        match self {
            Self::TimeoutError => BackoffStrategy::new(2000, 2.0),
            Self::NetworkError => BackoffStrategy::new(1000, 1.5),
            Self::ElementNotFound => BackoffStrategy::new(500, 1.0),
            Self::Default => BackoffStrategy::new(1000, 1.0),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeoutError => "TimeoutError",
            Self::NetworkError => "NetworkError",
            Self::ElementNotFound => "ElementNotFound",
            Self::Default => "Default",
        }
    }

    #[must_use]
    pub fn all() -> [Self; 4] {
        [
            Self::TimeoutError,
            Self::NetworkError,
            Self::ElementNotFound,
            Self::Default,
        ]
    }
}

impl std::fmt::Display for RetryClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Backoff
// ============================================================================

/// Base wait and growth factor for one retry class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffStrategy {
    pub wait_ms: u64,
    pub multiplier: f64,
}

impl BackoffStrategy {
    #[must_use]
    pub fn new(wait_ms: u64, multiplier: f64) -> Self {
        Self {
            wait_ms,
            multiplier,
        }
    }

    /// Delay after the failed attempt with 0-based index `attempt`:
    /// `wait * multiplier^attempt`, rounded to the millisecond.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = (self.wait_ms as f64) * self.multiplier.powi(exponent);
        if millis.is_finite() && millis > 0.0 {
            Duration::from_millis(millis.round().min(u64::MAX as f64) as u64)
        } else if millis.is_infinite() {
            Duration::from_millis(u64::MAX)
        } else {
            Duration::ZERO
        }
    }

    /// The first `attempts` delays of this curve.
    #[must_use]
    pub fn schedule(&self, attempts: u32) -> Vec<Duration> {
        (0..attempts).map(|k| self.delay_for_attempt(k)).collect()
    }
}

// ============================================================================
// Retry Controller
// ============================================================================

/// One failed attempt observed by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryRecord {
    pub test_name: String,
    pub attempt: u32,
    pub class: RetryClass,
    /// Wait before the next attempt; `None` when no attempt followed.
    pub delay_ms: Option<u64>,
    pub error: String,
}

/// Re-runs a test through the executor until it passes or the attempt bound
/// is reached.
///
/// The executor records a failure entry for every failed attempt; the
/// controller only sets their retry counts and, depending on
/// [`ResolvedFailurePolicy`], marks them resolved once a later attempt
/// passes.
#[derive(Debug, Clone)]
pub struct RetryController {
    table: BTreeMap<RetryClass, BackoffStrategy>,
    max_retries: u32,
    resolved_policy: ResolvedFailurePolicy,
    history: Vec<RetryRecord>,
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(&MendConfig::default())
    }
}

impl RetryController {
    #[must_use]
    pub fn new(config: &MendConfig) -> Self {
        let table = RetryClass::all()
            .into_iter()
            .map(|class| (class, config.backoff_for(class)))
            .collect();
        Self {
            table,
            max_retries: config.retry.max_retries,
            resolved_policy: config.retry.resolved_failures,
            history: Vec::new(),
        }
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn strategy(&self, class: RetryClass) -> BackoffStrategy {
        self.table
            .get(&class)
            .copied()
            .unwrap_or_else(|| class.default_backoff())
    }

    /// Wait after failed attempt `attempt` (0-based) with an error of `class`.
    #[must_use]
    pub fn delay_for(&self, class: RetryClass, attempt: u32) -> Duration {
        self.strategy(class).delay_for_attempt(attempt)
    }

    /// Failed attempts observed so far, across tests.
    #[must_use]
    pub fn history(&self) -> &[RetryRecord] {
        &self.history
    }

    /// Retry with the configured attempt bound.
    pub async fn intelligent_retry(
        &mut self,
        executor: &mut TestExecutor,
        page: &dyn Page,
        test: &UiTest,
    ) -> Result<TestResult> {
        let max = self.max_retries;
        self.intelligent_retry_with(executor, page, test, max).await
    }

    /// Run `test` up to `max_retries` times (at least once).
    ///
    /// Returns the first passing result, with `retries` set to the number of
    /// failed attempts before it. When every attempt fails the last error is
    /// returned as [`MendError::RetriesExhausted`].
    pub async fn intelligent_retry_with(
        &mut self,
        executor: &mut TestExecutor,
        page: &dyn Page,
        test: &UiTest,
        max_retries: u32,
    ) -> Result<TestResult> {
        let attempts = max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            let mut result = executor.run(page, test).await;

            if result.passed {
                result.retries = attempt;
                if attempt > 0 {
                    info!(test = %test.name(), attempt, "Test passed on retry");
                    if self.resolved_policy == ResolvedFailurePolicy::MarkResolved {
                        executor.handoff_mut().mark_resolved(test.name());
                    }
                }
                return Ok(result);
            }

            if let Some(ref id) = result.failure_id {
                executor.handoff_mut().add_retries(id, attempt);
            }

            last_error = result.error.unwrap_or_default();
            let class = RetryClass::classify(&last_error);
            let has_next = attempt + 1 < attempts;
            let delay = has_next.then(|| self.delay_for(class, attempt));

            self.history.push(RetryRecord {
                test_name: test.name().to_string(),
                attempt,
                class,
                delay_ms: delay.map(|d| d.as_millis() as u64),
                error: last_error.clone(),
            });

            if let Some(delay) = delay {
                info!(
                    test = %test.name(),
                    attempt,
                    class = %class,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }

        warn!(test = %test.name(), attempts, error = %last_error, "Retries exhausted");
        Err(MendError::RetriesExhausted {
            test_name: test.name().to_string(),
            attempts,
            last_error,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
