//! The handoff record exchanged between the testing and debugging roles.
//!
//! One [`HandoffRecord`] is created per suite run. The executor appends a
//! [`FailureEntry`] for every failed test attempt, the retry controller bumps
//! retry counts, and the coordinator finalizes the metrics once all tests
//! have run. The record is plain data and serializes to the camelCase JSON
//! shape CI wrappers consume.

use crate::driver::{ConsoleMessage, NetworkResponse};
use crate::error::Result;
use crate::resolver::SelectorAttempt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Environment the run executed in. Captured once at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContext {
    pub environment: String,
    pub browser_name: String,
    pub platform: String,
    pub runtime_version: String,
}

impl RunContext {
    /// Capture the context of the current process.
    #[must_use]
    pub fn capture(environment: impl Into<String>, browser_name: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            browser_name: browser_name.into(),
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            runtime_version: concat!("testmend ", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// References to evidence collected during the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunArtifacts {
    pub screenshots: Vec<String>,
    pub logs: Vec<String>,
    pub network_capture: Option<String>,
    pub videos: Vec<String>,
}

/// Pass/fail counters and timing for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub total_tests: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    /// Milliseconds between start and end; absent until finalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

impl RunMetrics {
    fn starting_now() -> Self {
        Self {
            start_time: Utc::now(),
            end_time: None,
            total_tests: 0,
            passed: 0,
            failed: 0,
            skipped: 0,
            duration: None,
        }
    }

    /// Fraction of executed tests that passed, if any ran.
    #[must_use]
    pub fn pass_rate(&self) -> Option<f64> {
        let executed = self.passed + self.failed;
        (executed > 0).then(|| f64::from(self.passed) / f64::from(executed))
    }
}

/// One captured test failure.
///
/// Created by the executor (or the selector resolver on exhaustion) and
/// never mutated afterwards except for `retries` and the `resolved` flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEntry {
    pub id: String,
    pub test_name: String,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub console_logs: Vec<ConsoleMessage>,
    /// Failed responses only; successful requests are not retained.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_logs: Vec<NetworkResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Selector strategies tried before giving up (resolver failures only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<SelectorAttempt>,
    pub timestamp: DateTime<Utc>,
    pub retries: u32,
    /// Set when a later retry of the same test passed.
    #[serde(default)]
    pub resolved: bool,
}

impl FailureEntry {
    /// Create a failure with a fresh id and the current timestamp.
    pub fn new(test_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            test_name: test_name.into(),
            error: error.into(),
            stack: None,
            screenshot: None,
            console_logs: Vec::new(),
            network_logs: Vec::new(),
            url: None,
            attempts: Vec::new(),
            timestamp: Utc::now(),
            retries: 0,
            resolved: false,
        }
    }

    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    #[must_use]
    pub fn with_screenshot(mut self, screenshot: Option<String>) -> Self {
        self.screenshot = screenshot;
        self
    }

    #[must_use]
    pub fn with_console_logs(mut self, logs: Vec<ConsoleMessage>) -> Self {
        self.console_logs = logs;
        self
    }

    #[must_use]
    pub fn with_network_logs(mut self, logs: Vec<NetworkResponse>) -> Self {
        self.network_logs = logs;
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }

    #[must_use]
    pub fn with_attempts(mut self, attempts: Vec<SelectorAttempt>) -> Self {
        self.attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Error message and stack joined, the text classification runs against.
    #[must_use]
    pub fn searchable_text(&self) -> String {
        match &self.stack {
            Some(stack) => format!("{} {}", self.error, stack),
            None => self.error.clone(),
        }
    }
}

/// Aggregate of one run's failures, artifacts, and metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffRecord {
    pub run_id: String,
    pub failures: Vec<FailureEntry>,
    pub context: RunContext,
    pub artifacts: RunArtifacts,
    pub metrics: RunMetrics,
}

impl HandoffRecord {
    /// Start a new record; the start time is taken now.
    #[must_use]
    pub fn new(context: RunContext) -> Self {
        Self {
            run_id: format!("run-{}", Uuid::new_v4()),
            failures: Vec::new(),
            context,
            artifacts: RunArtifacts::default(),
            metrics: RunMetrics::starting_now(),
        }
    }

    /// Append a failure and return its id.
    pub fn add_failure(&mut self, failure: FailureEntry) -> String {
        if let Some(ref shot) = failure.screenshot {
            self.artifacts.screenshots.push(shot.clone());
        }
        let id = failure.id.clone();
        self.failures.push(failure);
        id
    }

    /// Look up a failure by id.
    #[must_use]
    pub fn failure(&self, id: &str) -> Option<&FailureEntry> {
        self.failures.iter().find(|f| f.id == id)
    }

    /// Increase a failure's retry count. Returns false if the id is unknown.
    pub fn add_retries(&mut self, id: &str, count: u32) -> bool {
        match self.failures.iter_mut().find(|f| f.id == id) {
            Some(failure) => {
                failure.retries = failure.retries.saturating_add(count);
                true
            }
            None => false,
        }
    }

    /// Flag every recorded failure of `test_name` as resolved. Returns how
    /// many entries changed.
    pub fn mark_resolved(&mut self, test_name: &str) -> usize {
        let mut changed = 0;
        for failure in self
            .failures
            .iter_mut()
            .filter(|f| f.test_name == test_name && !f.resolved)
        {
            failure.resolved = true;
            changed += 1;
        }
        changed
    }

    /// Failures not flagged as resolved.
    pub fn open_failures(&self) -> impl Iterator<Item = &FailureEntry> {
        self.failures.iter().filter(|f| !f.resolved)
    }

    /// Attach a log reference to the run's artifacts.
    pub fn add_log(&mut self, log: impl Into<String>) {
        self.artifacts.logs.push(log.into());
    }

    pub fn record_passed(&mut self) {
        self.metrics.passed += 1;
    }

    pub fn record_failed(&mut self) {
        self.metrics.failed += 1;
    }

    pub fn record_skipped(&mut self) {
        self.metrics.skipped += 1;
    }

    /// Close the run: stamp the end time, compute the duration, and make
    /// `total_tests` agree with the counters.
    ///
    /// Calling this again recomputes end time and duration against the
    /// original start time.
    pub fn finalize(&mut self) {
        let end = Utc::now();
        let elapsed = (end - self.metrics.start_time).num_milliseconds().max(0);
        self.metrics.end_time = Some(end);
        self.metrics.duration = Some(elapsed as u64);
        self.metrics.total_tests = self.metrics.passed + self.metrics.failed + self.metrics.skipped;
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.metrics.duration.is_some()
    }

    /// Serialize as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a record from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the record to `path` as JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    /// Read a record previously written with [`HandoffRecord::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}
