//! Suite orchestration.
//!
//! The [`Coordinator`] runs tests one after another, feeds failures through
//! diagnosis and fix application, and publishes every step on an
//! [`EventBus`]. Built-in reactions form the pipeline:
//!
//! ```text
//! test:failed ──> diagnose ──> diagnosis:ready ──> auto-apply fix ──> fix:applied ──> test:retry
//!                                    │
//!                                    └── CRITICAL: left for a human
//! ```
//!
//! Subscribers see each event before the built-in reaction runs. Nothing
//! consumes `test:retry` unless a caller subscribes to it.

use crate::artifacts::{ArtifactSink, FsArtifactSink};
use crate::config::MendConfig;
use crate::diagnosis::{Diagnoser, Diagnosis, RunDiagnosis, Severity};
use crate::driver::Page;
use crate::error::MendError;
use crate::events::{EventBus, EventKind, PipelineEvent};
use crate::executor::{TestExecutor, TestResult, UiTest};
use crate::fixes::{FixDescriptor, FixRegistry, ProcessScriptRunner, ScriptRunner};
use crate::handoff::{FailureEntry, HandoffRecord, RunContext};
use crate::retry::RetryController;
use crate::stores::{AgentMetadataStore, DiagnosisStore, JsonDirDiagnosisStore};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Roles whose backstories are shown when a suite starts.
const ROLES: [&str; 2] = ["testing", "debugging"];

// ============================================================================
// Suite Phase
// ============================================================================

/// Lifecycle of one suite run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuitePhase {
    Init,
    ExecutingTests,
    Aggregating,
    Diagnosing,
    Complete,
}

impl SuitePhase {
    #[must_use]
    pub fn can_transition_to(&self, target: SuitePhase) -> bool {
        use SuitePhase::*;
        matches!(
            (self, target),
            (Init, ExecutingTests)
                | (ExecutingTests, Aggregating)
                | (Aggregating, Diagnosing)
                | (Diagnosing, Complete)
                // A finished coordinator can start another run
                | (Complete, Init)
        )
    }
}

// ============================================================================
// Fix Outcome
// ============================================================================

/// Result of trying to apply a fix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixOutcome {
    /// The script ran and exited successfully.
    Applied { output: String },
    /// The script ran and failed, or could not be started.
    Failed { error: String },
    /// The script exceeded the configured timeout and was killed.
    TimedOut { timeout_ms: u64 },
    /// The fix needs a human; these are the steps to follow.
    Manual { steps: Vec<String> },
    /// Nothing could be run.
    Skipped { reason: String },
}

impl FixOutcome {
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Everything a suite run produced.
#[derive(Debug, Clone)]
pub struct SuiteReport {
    pub handoff: HandoffRecord,
    pub diagnosis: RunDiagnosis,
    pub results: Vec<TestResult>,
}

/// Drives suites through execution, diagnosis and remediation.
pub struct Coordinator {
    config: MendConfig,
    diagnoser: Diagnoser,
    registry: FixRegistry,
    runner: Arc<dyn ScriptRunner>,
    store: Option<Arc<dyn DiagnosisStore>>,
    metadata: Option<Arc<dyn AgentMetadataStore>>,
    bus: EventBus,
    phase: SuitePhase,
    diagnoses: Vec<Diagnosis>,
    outcomes: Vec<(String, FixOutcome)>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("phase", &self.phase)
            .field("bus", &self.bus)
            .field("diagnoses", &self.diagnoses.len())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    pub fn new(
        config: MendConfig,
        sink: Arc<dyn ArtifactSink>,
        runner: Arc<dyn ScriptRunner>,
    ) -> Self {
        Self {
            diagnoser: Diagnoser::from_config(&config),
            registry: FixRegistry::new(sink),
            runner,
            store: None,
            metadata: None,
            bus: EventBus::new(),
            phase: SuitePhase::Init,
            diagnoses: Vec::new(),
            outcomes: Vec::new(),
            config,
        }
    }

    /// Coordinator backed by the filesystem: fix scripts under the
    /// configured artifact dir, run as child processes from `project_dir`,
    /// and diagnoses stored as JSON when persistence is enabled.
    pub fn for_project(config: MendConfig, project_dir: &Path) -> Self {
        let artifact_dir = MendConfig::resolve_path(project_dir, &config.fixes.artifact_dir);
        let store_dir = MendConfig::resolve_path(project_dir, &config.diagnosis.store_dir);
        let persist = config.diagnosis.persist;

        let coordinator = Self::new(
            config,
            Arc::new(FsArtifactSink::new(artifact_dir)),
            Arc::new(ProcessScriptRunner::new().with_working_dir(project_dir)),
        );
        if persist {
            coordinator.with_store(Arc::new(JsonDirDiagnosisStore::new(store_dir)))
        } else {
            coordinator
        }
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn DiagnosisStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Arc<dyn AgentMetadataStore>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[must_use]
    pub fn phase(&self) -> SuitePhase {
        self.phase
    }

    #[must_use]
    pub fn config(&self) -> &MendConfig {
        &self.config
    }

    /// Per-failure diagnoses produced by the current or last run.
    #[must_use]
    pub fn diagnoses(&self) -> &[Diagnosis] {
        &self.diagnoses
    }

    /// Fix ids and outcomes from automatic application in the current or
    /// last run.
    #[must_use]
    pub fn fix_outcomes(&self) -> &[(String, FixOutcome)] {
        &self.outcomes
    }

    /// Subscribe to an event. Handlers run in registration order.
    pub fn on<F>(&mut self, kind: EventKind, handler: F)
    where
        F: Fn(&PipelineEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.on(kind, handler);
    }

    /// Publish an event and run the pipeline reactions it triggers.
    pub async fn emit(&mut self, event: PipelineEvent) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            debug!(event = %event.kind(), "Dispatching");
            self.bus.emit(&event);
            if let Some(next) = self.react(&event).await {
                queue.push_back(next);
            }
        }
    }

    async fn react(&mut self, event: &PipelineEvent) -> Option<PipelineEvent> {
        match event {
            PipelineEvent::TestFailed { failure, .. } => {
                let diagnosis = self.diagnoser.diagnose_failure(failure);
                self.diagnoses.push(diagnosis.clone());
                Some(PipelineEvent::DiagnosisReady { diagnosis })
            }
            PipelineEvent::DiagnosisReady { diagnosis } => self
                .auto_fix(diagnosis)
                .await
                .map(|fix| PipelineEvent::FixApplied { fix }),
            PipelineEvent::FixApplied { fix } => Some(PipelineEvent::TestRetry {
                test_name: fix.test_name.clone(),
            }),
            PipelineEvent::TestStarted { .. }
            | PipelineEvent::TestPassed { .. }
            | PipelineEvent::TestRetry { .. } => None,
        }
    }

    async fn auto_fix(&mut self, diagnosis: &Diagnosis) -> Option<FixDescriptor> {
        if diagnosis.severity == Severity::Critical {
            warn!(
                test = %diagnosis.test_name,
                category = %diagnosis.category,
                "Critical failure left for human review"
            );
            return None;
        }
        if diagnosis.suggested_fix.is_empty() || !self.config.fixes.auto_apply {
            return None;
        }

        let fix = match self.registry.generate_fix(diagnosis) {
            Ok(Some(fix)) => fix,
            Ok(None) => return None,
            Err(e) => {
                warn!(test = %diagnosis.test_name, error = %e, "Could not generate fix");
                return None;
            }
        };

        let outcome = self.execute_fix(&fix).await;
        let applied = outcome.is_applied();
        self.outcomes.push((fix.id.clone(), outcome));
        applied.then_some(fix)
    }

    /// Apply a fix: run its script when it is auto-executable, otherwise log
    /// the manual steps. Emits `fix:applied` when the script succeeded.
    pub async fn apply_fix(&mut self, fix: &FixDescriptor) -> FixOutcome {
        let outcome = self.execute_fix(fix).await;
        if outcome.is_applied() {
            self.emit(PipelineEvent::FixApplied { fix: fix.clone() })
                .await;
        }
        outcome
    }

    async fn execute_fix(&self, fix: &FixDescriptor) -> FixOutcome {
        if !fix.auto_executable {
            info!(fix = %fix.id, test = %fix.test_name, "{}", fix.description);
            if let Some(path) = &fix.path {
                info!(fix = %fix.id, %path, "Review the generated script before running it");
            }
            for (i, step) in fix.manual_steps.iter().enumerate() {
                info!(fix = %fix.id, "Manual step {}: {}", i + 1, step);
            }
            return FixOutcome::Manual {
                steps: fix.manual_steps.clone(),
            };
        }

        let (Some(script), Some(path)) = (&fix.script, &fix.path) else {
            warn!(fix = %fix.id, "Auto-executable fix has no persisted script");
            return FixOutcome::Skipped {
                reason: "no persisted script".to_string(),
            };
        };

        let timeout = Duration::from_millis(self.config.fixes.fix_timeout_ms);
        match self.runner.run(path, script.language, timeout).await {
            Ok(output) => {
                info!(fix = %fix.id, test = %fix.test_name, "Fix applied");
                FixOutcome::Applied {
                    output: output.stdout,
                }
            }
            Err(MendError::FixTimeout { timeout_ms, .. }) => {
                error!(fix = %fix.id, timeout_ms, "Fix script timed out");
                FixOutcome::TimedOut { timeout_ms }
            }
            Err(e) => {
                error!(fix = %fix.id, error = %e, "Fix script failed");
                FixOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    fn advance(&mut self, next: SuitePhase) {
        if !self.phase.can_transition_to(next) {
            warn!(from = ?self.phase, to = ?next, "Unexpected suite phase transition");
        }
        debug!(phase = ?next, "Suite phase");
        self.phase = next;
    }

    fn announce(&self) {
        let Some(metadata) = &self.metadata else {
            return;
        };
        for role in ROLES {
            if let Some(backstory) = metadata.backstory(role) {
                info!(role, "{}", backstory);
            }
        }
    }

    /// Run `tests` sequentially against `page` and diagnose the run.
    ///
    /// Test failures never abort the suite. After each failure the
    /// coordinator waits the configured settle delay before the next test.
    pub async fn run_test_suite(&mut self, page: &dyn Page, tests: &[UiTest]) -> SuiteReport {
        if self.phase == SuitePhase::Complete {
            self.advance(SuitePhase::Init);
        }
        self.diagnoses.clear();
        self.outcomes.clear();
        self.announce();

        self.advance(SuitePhase::ExecutingTests);
        info!(tests = tests.len(), "Starting suite");

        let context = RunContext::capture(
            self.config.suite.environment.clone(),
            self.config.suite.browser_name.clone(),
        );
        let mut executor = TestExecutor::new(context);
        let mut retry = RetryController::new(&self.config);
        let settle = Duration::from_millis(self.config.suite.settle_delay_ms);
        let mut results = Vec::with_capacity(tests.len());

        for test in tests {
            self.emit(PipelineEvent::TestStarted {
                test_name: test.name().to_string(),
            })
            .await;

            let result = if self.config.suite.retry_failed_tests {
                // Duration spans every attempt and backoff wait
                let started = Instant::now();
                let outcome = retry.intelligent_retry(&mut executor, page, test).await;
                let duration = started.elapsed().as_millis() as u64;
                match outcome {
                    Ok(result) => TestResult { duration, ..result },
                    Err(e) => exhausted_result(&executor, test, &e, duration),
                }
            } else {
                executor.run(page, test).await
            };
            executor.tally(&result);

            if result.passed {
                self.emit(PipelineEvent::TestPassed {
                    result: result.clone(),
                })
                .await;
            } else {
                let failure = result
                    .failure_id
                    .as_deref()
                    .and_then(|id| executor.handoff().failure(id))
                    .cloned()
                    .unwrap_or_else(|| {
                        FailureEntry::new(test.name(), result.error.clone().unwrap_or_default())
                    });
                self.emit(PipelineEvent::TestFailed {
                    result: result.clone(),
                    failure,
                })
                .await;
                tokio::time::sleep(settle).await;
            }

            results.push(result);
        }

        self.advance(SuitePhase::Aggregating);
        let handoff = executor.finalize_handoff();

        self.advance(SuitePhase::Diagnosing);
        let diagnosis = self.diagnoser.analyze_handoff(&handoff, &self.registry);
        if self.config.diagnosis.persist {
            if let Some(store) = &self.store {
                if let Err(e) = store.insert(&diagnosis) {
                    warn!(run = %handoff.run_id, error = %e, "Failed to persist diagnosis");
                }
            }
        }

        self.advance(SuitePhase::Complete);
        info!(
            run = %handoff.run_id,
            passed = handoff.metrics.passed,
            failed = handoff.metrics.failed,
            "Suite complete"
        );

        SuiteReport {
            handoff,
            diagnosis,
            results,
        }
    }
}

/// Failed result for a test whose retries ran out, pointing at the failure
/// recorded by its last attempt.
fn exhausted_result(
    executor: &TestExecutor,
    test: &UiTest,
    err: &MendError,
    duration: u64,
) -> TestResult {
    let last = executor
        .handoff()
        .failures
        .iter()
        .rev()
        .find(|f| f.test_name == test.name());

    let (error, attempts) = match err {
        MendError::RetriesExhausted {
            last_error,
            attempts,
            ..
        } => (last_error.clone(), *attempts),
        other => (other.to_string(), 1),
    };

    TestResult {
        name: test.name().to_string(),
        passed: false,
        duration,
        error: Some(error),
        retries: attempts.saturating_sub(1),
        failure_id: last.map(|f| f.id.clone()),
    }
}
