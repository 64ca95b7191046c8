//! Failure diagnosis.
//!
//! The diagnoser classifies a captured failure into a fixed category using
//! an ordered pattern table (first match wins), derives a severity, gathers
//! supporting evidence and looks up a suggested remedy.
//!
//! # Architecture
//!
//! ```text
//! FailureEntry ──classify──> FailureCategory ──┬──> Severity (name override first)
//!                                              ├──> root cause / suggested fix
//!                                              └──> Evidence (console errors, failed requests)
//!
//! HandoffRecord ──analyze──> RunDiagnosis { summary, issues, recommendations, fixScripts }
//! ```
//!
//! These categories drive remediation only. Backoff decisions use the
//! separate [`RetryClass`](crate::retry::RetryClass) taxonomy.

pub mod analysis;

pub use analysis::{Effort, Priority, Recommendation, RunDiagnosis, RunSummary};

use crate::config::{MendConfig, DEFAULT_MAX_RETRIES};
use crate::driver::NetworkResponse;
use crate::handoff::{FailureEntry, HandoffRecord};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// Categories and Severity
// ============================================================================

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCategory {
    ElementNotFound,
    Timeout,
    NetworkError,
    PermissionDenied,
    DatabaseError,
    Unknown,
}

impl FailureCategory {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ElementNotFound => "ELEMENT_NOT_FOUND",
            Self::Timeout => "TIMEOUT",
            Self::NetworkError => "NETWORK_ERROR",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }

    #[must_use]
    pub fn root_cause(&self) -> &'static str {
        match self {
            Self::ElementNotFound => "UI element missing or selector incorrect",
            Self::Timeout => "Operation exceeded time limit",
            Self::NetworkError => "Network request failed",
            Self::PermissionDenied => "Insufficient permissions",
            Self::DatabaseError => "Database operation failed",
            Self::Unknown => "Unable to determine root cause automatically",
        }
    }

    #[must_use]
    pub fn suggested_fix(&self) -> &'static str {
        match self {
            Self::ElementNotFound => {
                "Add data-testid attributes to the element and list them first in the selector fallback chain"
            }
            Self::Timeout => {
                "Wait for an explicit condition (element visible, network idle) or raise the timeout for this step"
            }
            Self::NetworkError => {
                "Verify the API server is reachable from the test host and CORS allows the test origin"
            }
            Self::PermissionDenied => {
                "Check the test account's roles and the access policies guarding the resource"
            }
            Self::DatabaseError => {
                "Check database connectivity and confirm all migrations have been applied"
            }
            Self::Unknown => {
                "Review the stack trace, console output and screenshot to investigate manually"
            }
        }
    }

    #[must_use]
    pub fn all() -> [Self; 6] {
        [
            Self::ElementNotFound,
            Self::Timeout,
            Self::NetworkError,
            Self::PermissionDenied,
            Self::DatabaseError,
            Self::Unknown,
        ]
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How urgently a diagnosis needs attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Larger is more urgent.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 3,
            Self::High => 2,
            Self::Medium => 1,
            Self::Low => 0,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Diagnosis
// ============================================================================

/// Supporting evidence attached to a diagnosis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Evidence {
    /// Console messages logged at error level.
    ConsoleErrors { messages: Vec<String> },
    /// Responses with a non-success status.
    NetworkFailures { responses: Vec<NetworkResponse> },
}

/// Classified explanation of one failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub failure_id: String,
    pub test_name: String,
    pub category: FailureCategory,
    pub severity: Severity,
    pub root_cause: String,
    pub evidence: Vec<Evidence>,
    pub suggested_fix: String,
    /// The original error message.
    pub error: String,
}

impl Diagnosis {
    /// Failed network responses carried as evidence.
    pub fn network_failures(&self) -> impl Iterator<Item = &NetworkResponse> {
        self.evidence.iter().flat_map(|e| match e {
            Evidence::NetworkFailures { responses } => responses.as_slice(),
            Evidence::ConsoleErrors { .. } => &[],
        })
    }
}

// ============================================================================
// Diagnoser
// ============================================================================

/// Classifies failures and aggregates run diagnoses.
pub struct Diagnoser {
    patterns: Vec<(Regex, FailureCategory)>,
    max_retries: u32,
}

impl std::fmt::Debug for Diagnoser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnoser")
            .field("patterns", &self.patterns.len())
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl Default for Diagnoser {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnoser {
    /// Create a diagnoser with the built-in pattern table.
    #[must_use]
    pub fn new() -> Self {
        // Order matters: the first matching pattern decides the category
        let patterns = [
            (r"(?i)not found|cannot find", FailureCategory::ElementNotFound),
            (r"(?i)timeout|timed out", FailureCategory::Timeout),
            (r"(?i)network|fetch|xhr|net::", FailureCategory::NetworkError),
            (
                r"(?i)permission|denied|unauthorized",
                FailureCategory::PermissionDenied,
            ),
            (r"(?i)database|sql|postgres", FailureCategory::DatabaseError),
        ];

        let compiled = patterns
            .into_iter()
            .filter_map(|(pattern, category)| Regex::new(pattern).ok().map(|re| (re, category)))
            .collect();

        Self {
            patterns: compiled,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Create a diagnoser honoring the configured flakiness scale.
    #[must_use]
    pub fn from_config(config: &MendConfig) -> Self {
        Self {
            max_retries: config.diagnosis.max_retries_for_flakiness.max(1),
            ..Self::new()
        }
    }

    /// Category for an error text; `Unknown` when nothing matches.
    #[must_use]
    pub fn classify(&self, text: &str) -> FailureCategory {
        self.patterns
            .iter()
            .find(|(re, _)| re.is_match(text))
            .map(|(_, category)| *category)
            .unwrap_or(FailureCategory::Unknown)
    }

    /// Severity for a test/category pair. Tests touching authentication or
    /// payments are always critical.
    #[must_use]
    pub fn severity(test_name: &str, category: FailureCategory) -> Severity {
        let name = test_name.to_lowercase();
        if name.contains("auth") || name.contains("payment") {
            return Severity::Critical;
        }
        match category {
            FailureCategory::NetworkError | FailureCategory::DatabaseError => Severity::High,
            FailureCategory::ElementNotFound => Severity::Low,
            FailureCategory::Timeout
            | FailureCategory::PermissionDenied
            | FailureCategory::Unknown => Severity::Medium,
        }
    }

    /// Diagnose one failure.
    #[must_use]
    pub fn diagnose_failure(&self, failure: &FailureEntry) -> Diagnosis {
        let category = self.classify(&failure.searchable_text());
        let severity = Self::severity(&failure.test_name, category);
        debug!(
            test = %failure.test_name,
            category = %category,
            severity = %severity,
            "Failure diagnosed"
        );

        Diagnosis {
            failure_id: failure.id.clone(),
            test_name: failure.test_name.clone(),
            category,
            severity,
            root_cause: category.root_cause().to_string(),
            evidence: Self::collect_evidence(failure),
            suggested_fix: category.suggested_fix().to_string(),
            error: failure.error.clone(),
        }
    }

    fn collect_evidence(failure: &FailureEntry) -> Vec<Evidence> {
        let mut evidence = Vec::new();

        let console_errors: Vec<String> = failure
            .console_logs
            .iter()
            .filter(|m| m.is_error())
            .map(|m| m.text.clone())
            .collect();
        if !console_errors.is_empty() {
            evidence.push(Evidence::ConsoleErrors {
                messages: console_errors,
            });
        }

        let failed: Vec<NetworkResponse> = failure
            .network_logs
            .iter()
            .filter(|r| !r.ok)
            .cloned()
            .collect();
        if !failed.is_empty() {
            evidence.push(Evidence::NetworkFailures { responses: failed });
        }

        evidence
    }

    /// How retry-dependent the run's failures were, in `[0, 1]`.
    ///
    /// Each failure contributes `retries / max_retries`; the mean is clamped
    /// to 1.0. Returns `None` for a handoff without failures.
    #[must_use]
    pub fn calculate_flakiness(&self, handoff: &HandoffRecord) -> Option<f64> {
        if handoff.failures.is_empty() {
            return None;
        }
        let scale = f64::from(self.max_retries.max(1));
        let total: f64 = handoff
            .failures
            .iter()
            .map(|f| f64::from(f.retries) / scale)
            .sum();
        Some((total / handoff.failures.len() as f64).min(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ConsoleLevel, ConsoleMessage};
    use crate::handoff::RunContext;

    fn failure(test: &str, error: &str) -> FailureEntry {
        FailureEntry::new(test, error)
    }

    #[test]
    fn test_pattern_table_order() {
        let d = Diagnoser::new();
        assert_eq!(d.classify("Element not found"), FailureCategory::ElementNotFound);
        assert_eq!(d.classify("Cannot find module"), FailureCategory::ElementNotFound);
        assert_eq!(d.classify("Operation TIMED OUT"), FailureCategory::Timeout);
        assert_eq!(d.classify("Failed to fetch"), FailureCategory::NetworkError);
        assert_eq!(d.classify("XHR aborted"), FailureCategory::NetworkError);
        assert_eq!(d.classify("401 Unauthorized"), FailureCategory::PermissionDenied);
        assert_eq!(d.classify("Postgres connection refused"), FailureCategory::DatabaseError);
        assert_eq!(d.classify("boom"), FailureCategory::Unknown);
        // First match wins
        assert_eq!(
            d.classify("network request timed out"),
            FailureCategory::Timeout
        );
        assert_eq!(
            d.classify("row not found in sql result"),
            FailureCategory::ElementNotFound
        );
    }

    #[test]
    fn test_chromium_net_error_is_network_category() {
        let d = Diagnoser::new();
        let diagnosis = d.diagnose_failure(&failure("Load feed", "net::ERR_CONNECTION_REFUSED"));
        assert_eq!(diagnosis.category, FailureCategory::NetworkError);
        assert_eq!(diagnosis.severity, Severity::High);
    }

    #[test]
    fn test_stack_participates_in_classification() {
        let d = Diagnoser::new();
        let entry = failure("Orders", "query failed").with_stack("at SqlClient.exec (db.js:4)");
        assert_eq!(
            d.diagnose_failure(&entry).category,
            FailureCategory::DatabaseError
        );
    }

    #[test]
    fn test_severity_rules() {
        use FailureCategory::*;
        assert_eq!(Diagnoser::severity("Search", NetworkError), Severity::High);
        assert_eq!(Diagnoser::severity("Search", DatabaseError), Severity::High);
        assert_eq!(Diagnoser::severity("Search", ElementNotFound), Severity::Low);
        assert_eq!(Diagnoser::severity("Search", Timeout), Severity::Medium);
        assert_eq!(Diagnoser::severity("Search", PermissionDenied), Severity::Medium);
        assert_eq!(Diagnoser::severity("Search", Unknown), Severity::Medium);
    }

    #[test]
    fn test_name_override_always_wins() {
        for category in FailureCategory::all() {
            assert_eq!(
                Diagnoser::severity("Auth Login Flow", category),
                Severity::Critical
            );
            assert_eq!(
                Diagnoser::severity("Payment Checkout", category),
                Severity::Critical
            );
        }
        assert_eq!(
            Diagnoser::severity("OAUTH callback", FailureCategory::ElementNotFound),
            Severity::Critical
        );
    }

    #[test]
    fn test_payment_network_failure_is_critical() {
        let d = Diagnoser::new();
        let diagnosis = d.diagnose_failure(&failure("Payment Checkout", "Failed to fetch /api/pay"));
        assert_eq!(diagnosis.category, FailureCategory::NetworkError);
        assert_eq!(diagnosis.severity, Severity::Critical);
    }

    #[test]
    fn test_evidence_collection() {
        let d = Diagnoser::new();
        let entry = failure("Cart", "Failed to fetch")
            .with_console_logs(vec![
                ConsoleMessage::new(ConsoleLevel::Error, "TypeError: x is undefined"),
                ConsoleMessage::new(ConsoleLevel::Log, "mounted"),
            ])
            .with_network_logs(vec![NetworkResponse::new("/api/cart", 500)]);

        let diagnosis = d.diagnose_failure(&entry);
        assert_eq!(diagnosis.evidence.len(), 2);
        assert_eq!(
            diagnosis.evidence[0],
            Evidence::ConsoleErrors {
                messages: vec!["TypeError: x is undefined".into()]
            }
        );
        assert_eq!(diagnosis.network_failures().count(), 1);
        assert_eq!(diagnosis.suggested_fix, FailureCategory::NetworkError.suggested_fix());
        assert_eq!(diagnosis.root_cause, "Network request failed");
    }

    #[test]
    fn test_no_evidence_without_errors() {
        let d = Diagnoser::new();
        let entry = failure("Cart", "boom")
            .with_console_logs(vec![ConsoleMessage::new(ConsoleLevel::Info, "hello")]);
        assert!(d.diagnose_failure(&entry).evidence.is_empty());
    }

    #[test]
    fn test_evidence_serializes_with_type_tag() {
        let evidence = Evidence::ConsoleErrors {
            messages: vec!["x".into()],
        };
        let json = serde_json::to_value(&evidence).unwrap();
        assert_eq!(json["type"], "console_errors");
    }

    fn handoff_with_retries(retries: &[u32]) -> HandoffRecord {
        let mut handoff = HandoffRecord::new(RunContext::capture("test", "mock"));
        for (i, r) in retries.iter().enumerate() {
            handoff.add_failure(failure(&format!("t{i}"), "boom").with_retries(*r));
        }
        handoff
    }

    #[test]
    fn test_flakiness_mean_of_retry_ratios() {
        let d = Diagnoser::new();
        assert_eq!(d.calculate_flakiness(&handoff_with_retries(&[3, 0])), Some(0.5));
        let third = d.calculate_flakiness(&handoff_with_retries(&[1])).unwrap();
        assert!((third - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_flakiness_clamped_to_one() {
        let d = Diagnoser::new();
        assert_eq!(d.calculate_flakiness(&handoff_with_retries(&[9, 6])), Some(1.0));
    }

    #[test]
    fn test_flakiness_undefined_without_failures() {
        let d = Diagnoser::new();
        assert_eq!(d.calculate_flakiness(&handoff_with_retries(&[])), None);
    }

    #[test]
    fn test_flakiness_scale_from_config() {
        let mut config = MendConfig::default();
        config.diagnosis.max_retries_for_flakiness = 4;
        let d = Diagnoser::from_config(&config);
        assert_eq!(d.calculate_flakiness(&handoff_with_retries(&[2])), Some(0.5));
    }
}
