//! Mock implementations of the pipeline's external collaborators.
//!
//! These mocks provide controllable test doubles for the page driver, the
//! fix script runner and the diagnosis store, enabling deterministic tests
//! of the whole pipeline.

use crate::diagnosis::RunDiagnosis;
use crate::driver::{
    ConsoleListener, ConsoleMessage, Element, ListenerId, NetworkResponse, Page, ResponseListener,
};
use crate::error::{MendError, Result};
use crate::fixes::{ScriptLanguage, ScriptOutput, ScriptRunner};
use crate::stores::DiagnosisStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Mock Page
// ============================================================================

/// Scriptable page driver.
///
/// Selectors without a scripted count match nothing.
///
/// # Example
///
/// ```rust,ignore
/// let page = MockPage::new()
///     .with_count("[data-testid=login]", 0)
///     .with_count("text=Login", 1)
///     .with_url("https://app.test/login");
///
/// page.emit_console(ConsoleMessage::new(ConsoleLevel::Error, "boom"));
/// ```
pub struct MockPage {
    counts: HashMap<String, std::result::Result<usize, String>>,
    screenshot: std::result::Result<String, String>,
    screenshot_delay: Option<Duration>,
    url: String,
    count_calls: Mutex<Vec<String>>,
    console_listeners: Mutex<Vec<(ListenerId, ConsoleListener)>>,
    response_listeners: Mutex<Vec<(ListenerId, ResponseListener)>>,
    next_listener: AtomicU64,
}

impl Default for MockPage {
    fn default() -> Self {
        Self {
            counts: HashMap::new(),
            screenshot: Ok("mock://screenshot.png".to_string()),
            screenshot_delay: None,
            url: "about:blank".to_string(),
            count_calls: Mutex::new(Vec::new()),
            console_listeners: Mutex::new(Vec::new()),
            response_listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }
}

impl fmt::Debug for MockPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockPage")
            .field("counts", &self.counts)
            .field("url", &self.url)
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

impl MockPage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `selector` match `count` elements.
    #[must_use]
    pub fn with_count(mut self, selector: &str, count: usize) -> Self {
        self.counts.insert(selector.to_string(), Ok(count));
        self
    }

    /// Make lookups of `selector` fail with `message`.
    #[must_use]
    pub fn with_count_error(mut self, selector: &str, message: &str) -> Self {
        self.counts
            .insert(selector.to_string(), Err(message.to_string()));
        self
    }

    #[must_use]
    pub fn with_screenshot(mut self, screenshot: &str) -> Self {
        self.screenshot = Ok(screenshot.to_string());
        self
    }

    #[must_use]
    pub fn with_screenshot_error(mut self, message: &str) -> Self {
        self.screenshot = Err(message.to_string());
        self
    }

    /// Make every screenshot take `delay` (tokio time, so paused clocks work).
    #[must_use]
    pub fn with_screenshot_delay(mut self, delay: Duration) -> Self {
        self.screenshot_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    /// Selectors passed to `count`, in call order.
    #[must_use]
    pub fn count_calls(&self) -> Vec<String> {
        lock(&self.count_calls).clone()
    }

    /// Currently attached console and response listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        lock(&self.console_listeners).len() + lock(&self.response_listeners).len()
    }

    /// Deliver a console message to attached listeners.
    pub fn emit_console(&self, message: ConsoleMessage) {
        let listeners: Vec<ConsoleListener> = lock(&self.console_listeners)
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(&message);
        }
    }

    /// Deliver a network response to attached listeners.
    pub fn emit_response(&self, response: NetworkResponse) {
        let listeners: Vec<ResponseListener> = lock(&self.response_listeners)
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(&response);
        }
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst))
    }

    fn lookup(&self, selector: &str) -> Result<usize> {
        match self.counts.get(selector) {
            Some(Ok(count)) => Ok(*count),
            Some(Err(message)) => Err(MendError::driver("count", message.clone())),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl Page for MockPage {
    async fn count(&self, selector: &str) -> Result<usize> {
        lock(&self.count_calls).push(selector.to_string());
        self.lookup(selector)
    }

    async fn first(&self, selector: &str) -> Result<Element> {
        match self.lookup(selector)? {
            0 => Err(MendError::driver(
                "first",
                format!("no element matches {selector}"),
            )),
            _ => Ok(Element {
                selector: selector.to_string(),
            }),
        }
    }

    async fn screenshot(&self) -> Result<String> {
        if let Some(delay) = self.screenshot_delay {
            tokio::time::sleep(delay).await;
        }
        self.screenshot
            .clone()
            .map_err(|message| MendError::driver("screenshot", message))
    }

    async fn url(&self) -> Result<String> {
        Ok(self.url.clone())
    }

    fn on_console(&self, listener: ConsoleListener) -> ListenerId {
        let id = self.next_id();
        lock(&self.console_listeners).push((id, listener));
        id
    }

    fn on_response(&self, listener: ResponseListener) -> ListenerId {
        let id = self.next_id();
        lock(&self.response_listeners).push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        lock(&self.console_listeners).retain(|(l, _)| *l != id);
        lock(&self.response_listeners).retain(|(l, _)| *l != id);
    }
}

// ============================================================================
// Mock Script Runner
// ============================================================================

#[derive(Debug, Clone)]
enum ScriptBehavior {
    Succeed(String),
    Fail { exit_code: i32, stderr: String },
    TimeOut,
}

/// Script runner that records paths instead of spawning processes.
///
/// # Example
///
/// ```rust,ignore
/// let runner = MockScriptRunner::failing(1, "psql: not found");
/// ```
#[derive(Debug)]
pub struct MockScriptRunner {
    behavior: ScriptBehavior,
    calls: Mutex<Vec<String>>,
}

impl Default for MockScriptRunner {
    fn default() -> Self {
        Self {
            behavior: ScriptBehavior::Succeed("applied".to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockScriptRunner {
    /// Runner whose scripts always succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_stdout(mut self, stdout: &str) -> Self {
        self.behavior = ScriptBehavior::Succeed(stdout.to_string());
        self
    }

    /// Runner whose scripts exit with `exit_code`.
    #[must_use]
    pub fn failing(exit_code: i32, stderr: &str) -> Self {
        Self {
            behavior: ScriptBehavior::Fail {
                exit_code,
                stderr: stderr.to_string(),
            },
            ..Self::default()
        }
    }

    /// Runner whose scripts always exceed their timeout.
    #[must_use]
    pub fn timing_out() -> Self {
        Self {
            behavior: ScriptBehavior::TimeOut,
            ..Self::default()
        }
    }

    /// Script paths run so far.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ScriptRunner for MockScriptRunner {
    async fn run(
        &self,
        path: &str,
        _language: ScriptLanguage,
        timeout: Duration,
    ) -> Result<ScriptOutput> {
        lock(&self.calls).push(path.to_string());
        match &self.behavior {
            ScriptBehavior::Succeed(stdout) => Ok(ScriptOutput {
                stdout: stdout.clone(),
                stderr: String::new(),
            }),
            ScriptBehavior::Fail { exit_code, stderr } => Err(MendError::FixScript {
                path: path.to_string(),
                exit_code: *exit_code,
                stderr: stderr.clone(),
            }),
            ScriptBehavior::TimeOut => Err(MendError::FixTimeout {
                path: path.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

// ============================================================================
// Mock Diagnosis Store
// ============================================================================

/// In-memory diagnosis store, optionally rejecting every insert.
#[derive(Debug, Default)]
pub struct MockDiagnosisStore {
    records: Mutex<Vec<RunDiagnosis>>,
    error: Option<String>,
}

impl MockDiagnosisStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that fails every insert with `message`.
    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn records(&self) -> Vec<RunDiagnosis> {
        lock(&self.records).clone()
    }
}

impl DiagnosisStore for MockDiagnosisStore {
    fn insert(&self, record: &RunDiagnosis) -> Result<()> {
        if let Some(message) = &self.error {
            return Err(MendError::store(message.clone()));
        }
        lock(&self.records).push(record.clone());
        Ok(())
    }
}
