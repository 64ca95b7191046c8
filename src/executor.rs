//! Single-test execution with failure capture.
//!
//! [`TestExecutor::run`] never propagates a test's error. Whatever the body
//! returns as an error or panics with is turned into a [`FailureEntry`] on the active handoff record
//! together with the console output, failed network responses, a screenshot
//! and the page URL, and the caller gets a [`TestResult`] back. One broken
//! test therefore cannot abort the rest of a suite.

use crate::driver::{CaptureScope, Element, Page};
use crate::handoff::{FailureEntry, HandoffRecord, RunContext};
use crate::resolver::{Resolution, SelectorArgs, SelectorResolver, SelectorStrategy};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Future returned by a test body.
pub type TestFuture<'a> = BoxFuture<'a, anyhow::Result<()>>;

type TestBody = Arc<dyn for<'a> Fn(&'a TestContext<'a>) -> TestFuture<'a> + Send + Sync>;

/// A named UI test.
///
/// ```rust,ignore
/// use futures::FutureExt;
///
/// let test = UiTest::new("Login", |ctx| async move {
///     let button = ctx.find(&login_strategies()).await
///         .ok_or_else(|| anyhow::anyhow!("login button not found"))?;
///     Ok(())
/// }.boxed());
/// ```
#[derive(Clone)]
pub struct UiTest {
    name: String,
    body: TestBody,
}

impl fmt::Debug for UiTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiTest")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl UiTest {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: for<'a> Fn(&'a TestContext<'a>) -> TestFuture<'a> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(body),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(&self, ctx: &'a TestContext<'a>) -> TestFuture<'a> {
        (self.body)(ctx)
    }
}

/// What a test body can reach: the page, and selector resolution whose
/// exhaustion failures land in the run's handoff record.
pub struct TestContext<'a> {
    page: &'a dyn Page,
    resolver: &'a SelectorResolver,
    pending: Mutex<Vec<FailureEntry>>,
}

impl<'a> TestContext<'a> {
    fn new(page: &'a dyn Page, resolver: &'a SelectorResolver) -> Self {
        Self {
            page,
            resolver,
            pending: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn page(&self) -> &'a dyn Page {
        self.page
    }

    /// Locate an element through a fallback chain. `None` means every
    /// strategy missed; the test decides whether that is fatal.
    pub async fn find(&self, strategies: &[SelectorStrategy]) -> Option<Element> {
        self.find_with(strategies, &SelectorArgs::new()).await
    }

    /// Like [`TestContext::find`], for templated strategies.
    pub async fn find_with(
        &self,
        strategies: &[SelectorStrategy],
        args: &SelectorArgs,
    ) -> Option<Element> {
        let Resolution {
            element, failure, ..
        } = self.resolver.resolve(self.page, strategies, args).await;
        if let Some(failure) = failure {
            self.pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(failure);
        }
        element
    }

    fn take_pending(&self) -> Vec<FailureEntry> {
        std::mem::take(
            &mut *self
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

/// Outcome of running one test once (or, via the retry controller, until
/// it passed or ran out of attempts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    /// Wall-clock milliseconds, including evidence capture.
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retries: u32,
    /// Failure entry recorded for this attempt, if it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_id: Option<String>,
}

/// Runs tests against a page and owns the run's active handoff record.
#[derive(Debug)]
pub struct TestExecutor {
    handoff: HandoffRecord,
    resolver: SelectorResolver,
}

impl TestExecutor {
    /// Start a run with a fresh handoff record.
    #[must_use]
    pub fn new(context: RunContext) -> Self {
        Self {
            handoff: HandoffRecord::new(context),
            resolver: SelectorResolver::new(),
        }
    }

    /// The active handoff record.
    #[must_use]
    pub fn handoff(&self) -> &HandoffRecord {
        &self.handoff
    }

    pub(crate) fn handoff_mut(&mut self) -> &mut HandoffRecord {
        &mut self.handoff
    }

    #[must_use]
    pub fn resolver(&self) -> &SelectorResolver {
        &self.resolver
    }

    /// Execute `test` once.
    pub async fn run(&mut self, page: &dyn Page, test: &UiTest) -> TestResult {
        let started = Instant::now();
        debug!(test = %test.name(), "Running test");

        let scope = CaptureScope::attach(page);
        let ctx = TestContext::new(page, &self.resolver);
        let outcome = match AssertUnwindSafe(async { test.invoke(&ctx).await })
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(test = %test.name(), error = %message, "Test panicked");
                Err(anyhow::anyhow!(message))
            }
        };
        let captured = scope.finish();

        for failure in ctx.take_pending() {
            self.handoff.add_failure(failure);
        }

        match outcome {
            Ok(()) => {
                let duration = started.elapsed().as_millis() as u64;
                info!(test = %test.name(), duration_ms = duration, "Test passed");
                TestResult {
                    name: test.name().to_string(),
                    passed: true,
                    duration,
                    error: None,
                    retries: 0,
                    failure_id: None,
                }
            }
            Err(err) => {
                let message = err.to_string();
                let screenshot = match page.screenshot().await {
                    Ok(shot) => Some(shot),
                    Err(e) => {
                        warn!(test = %test.name(), error = %e, "Screenshot capture failed");
                        None
                    }
                };
                let url = page.url().await.ok();

                let mut failure = FailureEntry::new(test.name(), &message)
                    .with_console_logs(captured.console.clone())
                    .with_network_logs(captured.failed_responses())
                    .with_screenshot(screenshot)
                    .with_url(url);
                if let Some(stack) = error_stack(&err) {
                    failure = failure.with_stack(stack);
                }

                let failure_id = self.handoff.add_failure(failure);
                let duration = started.elapsed().as_millis() as u64;
                warn!(test = %test.name(), duration_ms = duration, error = %message, "Test failed");

                TestResult {
                    name: test.name().to_string(),
                    passed: false,
                    duration,
                    error: Some(message),
                    retries: 0,
                    failure_id: Some(failure_id),
                }
            }
        }
    }

    /// Count a test's final outcome in the run metrics.
    pub fn tally(&mut self, result: &TestResult) {
        if result.passed {
            self.handoff.record_passed();
        } else {
            self.handoff.record_failed();
        }
    }

    /// Count a test that was not executed.
    pub fn tally_skipped(&mut self) {
        self.handoff.record_skipped();
    }

    /// Finalize the metrics and return a copy of the handoff record.
    pub fn finalize_handoff(&mut self) -> HandoffRecord {
        self.handoff.finalize();
        self.handoff.clone()
    }
}

/// Text of a panic payload raised by `panic!`, `assert!` or `unwrap`.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "test panicked".to_string()
    }
}

/// The cause chain below the top-level message, one cause per line.
fn error_stack(err: &anyhow::Error) -> Option<String> {
    let causes: Vec<String> = err.chain().skip(1).map(|c| format!("caused by: {c}")).collect();
    (!causes.is_empty()).then(|| causes.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ConsoleLevel, ConsoleMessage, NetworkResponse};
    use crate::testing::MockPage;
    use anyhow::Context;
    use futures::FutureExt;
    use std::time::Duration;

    fn executor() -> TestExecutor {
        TestExecutor::new(RunContext::capture("test", "mock"))
    }

    #[tokio::test]
    async fn test_passing_test_records_no_failure() {
        let page = MockPage::new();
        let mut exec = executor();
        let test = UiTest::new("Home loads", |_ctx| async { Ok(()) }.boxed());

        let result = exec.run(&page, &test).await;

        assert!(result.passed);
        assert!(result.error.is_none());
        assert!(exec.handoff().failures.is_empty());
    }

    #[tokio::test]
    async fn test_failure_captures_evidence() {
        let page = Arc::new(
            MockPage::new()
                .with_screenshot("data:image/png;base64,AAAA")
                .with_url("https://app.test/checkout"),
        );
        let emitter = Arc::clone(&page);
        let mut exec = executor();
        let test = UiTest::new("Checkout", move |_ctx| {
            let page = Arc::clone(&emitter);
            async move {
                page.emit_console(ConsoleMessage::new(ConsoleLevel::Error, "Uncaught TypeError"));
                page.emit_console(ConsoleMessage::new(ConsoleLevel::Info, "render"));
                page.emit_response(NetworkResponse::new("/api/cart", 200));
                page.emit_response(NetworkResponse::new("/api/pay", 502));
                anyhow::bail!("net::ERR_CONNECTION_REFUSED")
            }
            .boxed()
        });

        let result = exec.run(page.as_ref(), &test).await;

        assert!(!result.passed);
        assert_eq!(result.error.as_deref(), Some("net::ERR_CONNECTION_REFUSED"));
        let failure = exec.handoff().failure(result.failure_id.as_deref().unwrap()).unwrap();
        assert_eq!(failure.test_name, "Checkout");
        assert_eq!(failure.console_logs.len(), 2);
        assert_eq!(failure.network_logs.len(), 1);
        assert_eq!(failure.network_logs[0].status, 502);
        assert_eq!(failure.screenshot.as_deref(), Some("data:image/png;base64,AAAA"));
        assert_eq!(failure.url.as_deref(), Some("https://app.test/checkout"));
        assert_eq!(failure.retries, 0);
        assert_eq!(page.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_error_chain_becomes_stack() {
        let page = MockPage::new();
        let mut exec = executor();
        let test = UiTest::new("Profile", |_ctx| {
            async {
                Err(anyhow::anyhow!("Timeout 30000ms exceeded"))
                    .context("waiting for profile avatar")
            }
            .boxed()
        });

        let result = exec.run(&page, &test).await;
        let failure = &exec.handoff().failures[0];
        assert_eq!(result.error.as_deref(), Some("waiting for profile avatar"));
        assert!(failure.stack.as_deref().unwrap().contains("Timeout 30000ms"));
    }

    #[tokio::test]
    async fn test_screenshot_failure_does_not_propagate() {
        let page = MockPage::new().with_screenshot_error("target closed");
        let mut exec = executor();
        let test = UiTest::new("Broken", |_ctx| async { anyhow::bail!("boom") }.boxed());

        let result = exec.run(&page, &test).await;
        assert!(!result.passed);
        assert!(exec.handoff().failures[0].screenshot.is_none());
    }

    #[tokio::test]
    async fn test_resolver_exhaustion_lands_in_handoff() {
        let page = MockPage::new();
        let mut exec = executor();
        let test = UiTest::new("Login", |ctx| {
            async move {
                let strategies = vec![
                    SelectorStrategy::literal("test-id", "[data-testid=login]"),
                    SelectorStrategy::literal("text", "text=Login"),
                ];
                ctx.find(&strategies)
                    .await
                    .ok_or_else(|| anyhow::anyhow!("Login button not found"))?;
                Ok(())
            }
            .boxed()
        });

        let result = exec.run(&page, &test).await;

        assert!(!result.passed);
        let names: Vec<&str> = exec
            .handoff()
            .failures
            .iter()
            .map(|f| f.test_name.as_str())
            .collect();
        assert_eq!(names, vec!["Element Location", "Login"]);
        assert_eq!(exec.handoff().failures[0].attempts.len(), 2);
    }

    #[tokio::test]
    async fn test_panicking_body_becomes_failure() {
        let page = MockPage::new().with_url("https://app.test/cart");
        let mut exec = executor();
        let cart = UiTest::new("Cart total", |_ctx| {
            async {
                assert_eq!(1, 2, "cart total mismatch");
                Ok(())
            }
            .boxed()
        });
        let after = UiTest::new("After", |_ctx| async { Ok(()) }.boxed());

        let first = exec.run(&page, &cart).await;
        exec.tally(&first);
        let second = exec.run(&page, &after).await;
        exec.tally(&second);

        assert!(!first.passed);
        assert!(first.error.as_deref().unwrap().contains("cart total mismatch"));
        assert!(second.passed);

        let handoff = exec.finalize_handoff();
        assert_eq!(handoff.metrics.failed, 1);
        assert_eq!(handoff.metrics.passed, 1);
        assert_eq!(handoff.failures.len(), 1);
        assert_eq!(handoff.failures[0].url.as_deref(), Some("https://app.test/cart"));
        assert_eq!(page.listener_count(), 0);
    }

    #[tokio::test]
    #[allow(unreachable_code)]
    async fn test_panic_with_non_string_payload() {
        let page = MockPage::new();
        let mut exec = executor();
        let test = UiTest::new("Odd", |_ctx| {
            async {
                std::panic::panic_any(42_u32);
                Ok(())
            }
            .boxed()
        });

        let result = exec.run(&page, &test).await;
        assert_eq!(result.error.as_deref(), Some("test panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_includes_evidence_capture() {
        let page = MockPage::new().with_screenshot_delay(Duration::from_millis(750));
        let mut exec = executor();
        let test = UiTest::new("Slow capture", |_ctx| {
            async {
                tokio::time::sleep(Duration::from_millis(250)).await;
                anyhow::bail!("boom")
            }
            .boxed()
        });

        let result = exec.run(&page, &test).await;
        assert!(!result.passed);
        assert!(result.duration >= 1000, "duration was {}ms", result.duration);
    }

    #[tokio::test]
    async fn test_tally_and_finalize() {
        let page = MockPage::new();
        let mut exec = executor();
        let pass = UiTest::new("a", |_ctx| async { Ok(()) }.boxed());
        let fail = UiTest::new("b", |_ctx| async { anyhow::bail!("x") }.boxed());

        let r1 = exec.run(&page, &pass).await;
        exec.tally(&r1);
        let r2 = exec.run(&page, &fail).await;
        exec.tally(&r2);
        exec.tally_skipped();

        let handoff = exec.finalize_handoff();
        assert_eq!(handoff.metrics.passed, 1);
        assert_eq!(handoff.metrics.failed, 1);
        assert_eq!(handoff.metrics.skipped, 1);
        assert_eq!(handoff.metrics.total_tests, 3);
        assert!(handoff.metrics.duration.is_some());
    }
}
