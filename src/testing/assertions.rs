//! Custom assertions for domain-specific testing.
//!
//! Provides expressive assertions for diagnoses, fixes and handoff records.

use crate::diagnosis::{Diagnosis, FailureCategory, Severity};
use crate::fixes::FixDescriptor;
use crate::handoff::HandoffRecord;

/// Assert that a diagnosis has the expected category and severity.
///
/// # Panics
///
/// Panics with the full diagnosis if either field differs.
///
/// # Example
///
/// ```rust,ignore
/// let diagnosis = diagnoser.diagnose_failure(&failure);
/// assert_diagnosed(&diagnosis, FailureCategory::NetworkError, Severity::High);
/// ```
pub fn assert_diagnosed(diagnosis: &Diagnosis, category: FailureCategory, severity: Severity) {
    assert!(
        diagnosis.category == category && diagnosis.severity == severity,
        "Expected {} / {} for '{}', got {} / {}.\nDiagnosis: {:#?}",
        category,
        severity,
        diagnosis.test_name,
        diagnosis.category,
        diagnosis.severity,
        diagnosis
    );
}

/// Assert that a fix must be handled by a person.
///
/// # Panics
///
/// Panics if the fix would be run automatically.
pub fn assert_manual_fix(fix: &FixDescriptor) {
    assert!(
        !fix.can_auto_apply(),
        "Expected fix {} to require manual action, but it is auto-executable",
        fix.id
    );
}

/// Assert that a fix carries a persisted script that runs without review.
///
/// # Panics
///
/// Panics if the fix is not auto-executable or its script was not persisted.
pub fn assert_auto_fix(fix: &FixDescriptor) {
    assert!(
        fix.can_auto_apply() && fix.path.is_some(),
        "Expected fix {} to be auto-executable with a persisted script.\nFix: {:#?}",
        fix.id,
        fix
    );
}

/// Assert the number of failures recorded for one test.
///
/// # Panics
///
/// Panics if the count doesn't match.
pub fn assert_failure_count(handoff: &HandoffRecord, test_name: &str, expected: usize) {
    let actual = handoff
        .failures
        .iter()
        .filter(|f| f.test_name == test_name)
        .count();
    assert_eq!(
        actual, expected,
        "Expected {} failures for '{}', but got {}.\nRecorded tests: {:?}",
        expected,
        test_name,
        actual,
        handoff
            .failures
            .iter()
            .map(|f| f.test_name.as_str())
            .collect::<Vec<_>>()
    );
}

/// Assert that run metrics add up.
///
/// # Panics
///
/// Panics if the record is not finalized or the totals are inconsistent.
pub fn assert_metrics_consistent(handoff: &HandoffRecord) {
    let m = &handoff.metrics;
    assert!(handoff.is_finalized(), "Handoff {} was not finalized", handoff.run_id);
    assert_eq!(
        m.total_tests,
        m.passed + m.failed + m.skipped,
        "totalTests must equal passed + failed + skipped"
    );
}
