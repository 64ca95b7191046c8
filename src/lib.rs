//! testmend - Self-healing UI test execution
//!
//! Runs UI tests against a page driver and recovers from the failures it
//! can: unstable locators fall back through ordered selector strategies,
//! failing tests are retried with error-aware backoff, and every failure is
//! classified, diagnosed and paired with a generated fix.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`handoff`] - Run record exchanged between the testing and debugging roles
//! - [`driver`] - Page driver capability and console/network capture
//! - [`resolver`] - Selector fallback chains
//! - [`executor`] - Single-test execution with failure capture
//! - [`retry`] - Retry controller and backoff table
//! - [`diagnosis`] - Failure classification, severity and run analysis
//! - [`fixes`] - Fix generation and script execution
//! - [`artifacts`] / [`stores`] - Where fix scripts and diagnoses are kept
//! - [`events`] - Typed pipeline events
//! - [`coordinator`] - Suite orchestration wiring everything together
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Custom error types and handling
//! - [`testing`] - Testing infrastructure (mocks, assertions)
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::FutureExt;
//! use testmend::{Coordinator, MendConfig, UiTest};
//!
//! let config = MendConfig::load(project_dir)?;
//! let mut coordinator = Coordinator::for_project(config, project_dir);
//!
//! let tests = vec![UiTest::new("Login", |ctx| async move {
//!     ctx.find(&login_strategies()).await
//!         .ok_or_else(|| anyhow::anyhow!("login button not found"))?;
//!     Ok(())
//! }.boxed())];
//!
//! let report = coordinator.run_test_suite(&page, &tests).await;
//! println!("{}", serde_json::to_string_pretty(&report.diagnosis)?);
//! ```

pub mod artifacts;
pub mod config;
pub mod coordinator;
pub mod diagnosis;
pub mod driver;
pub mod error;
pub mod events;
pub mod executor;
pub mod fixes;
pub mod handoff;
pub mod resolver;
pub mod retry;
pub mod stores;
pub mod testing;

// Re-export commonly used types
pub use error::{MendError, Result};

// Re-export config types
pub use config::{MendConfig, ResolvedFailurePolicy, DEFAULT_MAX_RETRIES, STATE_DIR};

// Re-export pipeline types
pub use coordinator::{Coordinator, FixOutcome, SuitePhase, SuiteReport};
pub use diagnosis::{
    Diagnoser, Diagnosis, FailureCategory, Recommendation, RunDiagnosis, Severity,
};
pub use driver::{ConsoleLevel, ConsoleMessage, Element, NetworkResponse, Page};
pub use events::{EventBus, EventKind, PipelineEvent};
pub use executor::{TestContext, TestExecutor, TestResult, UiTest};
pub use fixes::{FixDescriptor, FixKind, FixRegistry, ScriptLanguage, ScriptRunner};
pub use handoff::{FailureEntry, HandoffRecord, RunContext};
pub use resolver::{SelectorAttempt, SelectorResolver, SelectorStrategy};
pub use retry::{BackoffStrategy, RetryClass, RetryController};

// Re-export storage types
pub use artifacts::{ArtifactSink, FsArtifactSink, MemoryArtifactSink};
pub use stores::{AgentMetadataStore, DiagnosisStore, JsonDirDiagnosisStore};
