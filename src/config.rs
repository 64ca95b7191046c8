//! Configuration for the testmend pipeline.
//!
//! A single [`MendConfig`] is built once (from defaults, a JSON settings
//! file, or a TOML file) and handed to each component's constructor.
//!
//! # Example settings.json
//!
//! ```json
//! {
//!   "retry": {
//!     "maxRetries": 3,
//!     "backoff": { "NetworkError": { "waitMs": 1000, "multiplier": 1.5 } },
//!     "resolvedFailures": "markResolved"
//!   },
//!   "suite": { "settleDelayMs": 1000 },
//!   "fixes": { "fixTimeoutMs": 30000 }
//! }
//! ```

use crate::error::{MendError, Result};
use crate::retry::{BackoffStrategy, RetryClass};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Directory (relative to the project root) holding testmend state.
pub const STATE_DIR: &str = ".testmend";

/// Default retry bound shared by the retry controller and flakiness scoring.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// What to do with failure entries of a test that later passed on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolvedFailurePolicy {
    /// Leave the entries untouched; they remain open issues.
    #[default]
    KeepOpen,
    /// Flag the entries as resolved so aggregate diagnosis skips them.
    MarkResolved,
}

/// Retry controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum attempts per test.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff overrides per retry class; classes not listed keep defaults.
    #[serde(default)]
    pub backoff: BTreeMap<RetryClass, BackoffStrategy>,

    /// Handling of failures that a later attempt recovered from.
    #[serde(default)]
    pub resolved_failures: ResolvedFailurePolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: BTreeMap::new(),
            resolved_failures: ResolvedFailurePolicy::default(),
        }
    }
}

/// Suite execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteConfig {
    /// Pause after a failed test so diagnosis handlers can settle.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Run each test through the retry controller instead of a single attempt.
    #[serde(default)]
    pub retry_failed_tests: bool,

    /// Environment label recorded in the handoff context.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Browser name recorded in the handoff context.
    #[serde(default = "default_browser")]
    pub browser_name: String,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            retry_failed_tests: false,
            environment: default_environment(),
            browser_name: default_browser(),
        }
    }
}

/// Fix generation and application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixConfig {
    /// Where the filesystem artifact sink writes fix scripts.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    /// Auto-apply eligible fixes when a diagnosis is ready.
    #[serde(default = "default_true")]
    pub auto_apply: bool,

    /// Upper bound on a spawned fix script's runtime.
    #[serde(default = "default_fix_timeout_ms")]
    pub fix_timeout_ms: u64,
}

impl Default for FixConfig {
    fn default() -> Self {
        Self {
            artifact_dir: default_artifact_dir(),
            auto_apply: true,
            fix_timeout_ms: default_fix_timeout_ms(),
        }
    }
}

/// Diagnoser and persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisConfig {
    /// Retry count that maps to a flakiness contribution of 1.0.
    #[serde(default = "default_max_retries")]
    pub max_retries_for_flakiness: u32,

    /// Persist each run diagnosis through the diagnosis store.
    #[serde(default = "default_true")]
    pub persist: bool,

    /// Directory used by the JSON diagnosis store.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
}

impl Default for DiagnosisConfig {
    fn default() -> Self {
        Self {
            max_retries_for_flakiness: DEFAULT_MAX_RETRIES,
            persist: true,
            store_dir: default_store_dir(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MendConfig {
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub suite: SuiteConfig,

    #[serde(default)]
    pub fixes: FixConfig,

    #[serde(default)]
    pub diagnosis: DiagnosisConfig,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_environment() -> String {
    "test".to_string()
}

fn default_browser() -> String {
    "chromium".to_string()
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(STATE_DIR).join("fixes")
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(STATE_DIR).join("diagnoses")
}

fn default_fix_timeout_ms() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}

impl MendConfig {
    /// Load configuration for a project, falling back to defaults when no
    /// settings file exists.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let settings_path = Self::settings_path(project_dir);
        if settings_path.exists() {
            Self::load_file(&settings_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file. `.toml` files are parsed as
    /// TOML, everything else as JSON.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MendError::config_with_path(e.to_string(), path.to_path_buf()))?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let parsed = if is_toml {
            toml::from_str(&content).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        };

        parsed.map_err(|message| MendError::config_with_path(message, path.to_path_buf()))
    }

    /// Get the settings.json path for a project
    pub fn settings_path(project_dir: &Path) -> PathBuf {
        project_dir.join(STATE_DIR).join("settings.json")
    }

    /// Resolve a configured path against the project directory.
    pub fn resolve_path(project_dir: &Path, configured: &Path) -> PathBuf {
        if configured.is_absolute() {
            configured.to_path_buf()
        } else {
            project_dir.join(configured)
        }
    }

    /// Backoff strategy for a retry class, honoring overrides.
    #[must_use]
    pub fn backoff_for(&self, class: RetryClass) -> BackoffStrategy {
        self.retry
            .backoff
            .get(&class)
            .copied()
            .unwrap_or_else(|| class.default_backoff())
    }

    /// Check the configuration for values that would make the pipeline
    /// misbehave. Returns one message per problem.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.retry.max_retries == 0 {
            problems.push("retry.maxRetries must be at least 1".to_string());
        }

        for (class, strategy) in &self.retry.backoff {
            if strategy.multiplier < 1.0 {
                problems.push(format!(
                    "retry.backoff.{class}: multiplier {} shrinks delays (must be >= 1.0)",
                    strategy.multiplier
                ));
            }
            if strategy.wait_ms == 0 && strategy.multiplier > 1.0 {
                problems.push(format!(
                    "retry.backoff.{class}: multiplier has no effect with waitMs = 0"
                ));
            }
        }

        if self.fixes.fix_timeout_ms == 0 {
            problems.push("fixes.fixTimeoutMs must be greater than 0".to_string());
        }

        if self.diagnosis.max_retries_for_flakiness == 0 {
            problems.push("diagnosis.maxRetriesForFlakiness must be at least 1".to_string());
        }

        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = MendConfig::default();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.suite.settle_delay_ms, 1000);
        assert_eq!(config.fixes.fix_timeout_ms, 60_000);
        assert_eq!(
            config.retry.resolved_failures,
            ResolvedFailurePolicy::KeepOpen
        );
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config = MendConfig::load(temp.path()).unwrap();
        assert_eq!(config.retry.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_load_json_settings() {
        let temp = TempDir::new().unwrap();
        let path = MendConfig::settings_path(temp.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{
                "retry": {
                    "maxRetries": 5,
                    "backoff": { "TimeoutError": { "waitMs": 10, "multiplier": 3.0 } },
                    "resolvedFailures": "markResolved"
                },
                "suite": { "settleDelayMs": 0 }
            }"#,
        )
        .unwrap();

        let config = MendConfig::load(temp.path()).unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.suite.settle_delay_ms, 0);
        assert_eq!(
            config.retry.resolved_failures,
            ResolvedFailurePolicy::MarkResolved
        );

        let timeout = config.backoff_for(RetryClass::TimeoutError);
        assert_eq!(timeout.wait_ms, 10);
        assert!((timeout.multiplier - 3.0).abs() < f64::EPSILON);

        // Untouched classes keep their defaults
        let network = config.backoff_for(RetryClass::NetworkError);
        assert_eq!(network, RetryClass::NetworkError.default_backoff());
    }

    #[test]
    fn test_load_toml_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("testmend.toml");
        std::fs::write(
            &path,
            "[suite]\nsettleDelayMs = 25\nenvironment = \"staging\"\n\n[fixes]\nautoApply = false\n",
        )
        .unwrap();

        let config = MendConfig::load_file(&path).unwrap();
        assert_eq!(config.suite.settle_delay_ms, 25);
        assert_eq!(config.suite.environment, "staging");
        assert!(!config.fixes.auto_apply);
    }

    #[test]
    fn test_invalid_json_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        match MendConfig::load_file(&path) {
            Err(MendError::Config { path: Some(p), .. }) => assert_eq!(p, path),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_flags_shrinking_multiplier() {
        let mut config = MendConfig::default();
        config.retry.backoff.insert(
            RetryClass::Default,
            BackoffStrategy {
                wait_ms: 100,
                multiplier: 0.5,
            },
        );
        config.fixes.fix_timeout_ms = 0;

        let problems = config.validate();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("multiplier"));
        assert!(problems[1].contains("fixTimeoutMs"));
    }

    #[test]
    fn test_resolve_path() {
        let project = Path::new("/work/app");
        assert_eq!(
            MendConfig::resolve_path(project, Path::new(".testmend/fixes")),
            PathBuf::from("/work/app/.testmend/fixes")
        );
        assert_eq!(
            MendConfig::resolve_path(project, Path::new("/var/fixes")),
            PathBuf::from("/var/fixes")
        );
    }
}
