//! Run-level aggregation: summary, open issues, grouped recommendations and
//! generated fix scripts.

use super::{Diagnoser, Diagnosis, FailureCategory, Severity};
use crate::fixes::{FixDescriptor, FixRegistry};
use crate::handoff::HandoffRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Counts and timing for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    /// Run duration in milliseconds.
    pub duration: u64,
    /// 0.0 when the run had no failures.
    pub flakiness: f64,
}

/// How soon a recommendation should be acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Immediate,
    High,
    Medium,
    Low,
}

impl From<Severity> for Priority {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Critical => Self::Immediate,
            Severity::High => Self::High,
            Severity::Medium => Self::Medium,
            Severity::Low => Self::Low,
        }
    }
}

/// Rough cost of carrying out a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    Medium,
    High,
}

/// A structural improvement suggested for one failure category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub category: FailureCategory,
    pub priority: Priority,
    pub effort: Effort,
    pub title: String,
    pub strategy: String,
    pub affected_tests: Vec<String>,
}

/// Aggregate diagnosis for a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDiagnosis {
    pub handoff_id: String,
    pub summary: RunSummary,
    /// One diagnosis per unresolved failure.
    pub issues: Vec<Diagnosis>,
    pub recommendations: Vec<Recommendation>,
    pub fix_scripts: Vec<FixDescriptor>,
}

impl RunDiagnosis {
    /// Fixes that need manual action or review.
    pub fn manual_fixes(&self) -> impl Iterator<Item = &FixDescriptor> {
        self.fix_scripts
            .iter()
            .filter(|f| !f.auto_executable || f.requires_review)
    }

    #[must_use]
    pub fn has_critical(&self) -> bool {
        self.issues.iter().any(|d| d.severity == Severity::Critical)
    }
}

fn strategy_for(category: FailureCategory) -> (&'static str, &'static str, Effort) {
    match category {
        FailureCategory::ElementNotFound => (
            "Create a resilient selector strategy",
            "Give interactive elements data-testid attributes and locate them through an ordered fallback chain (test id, role, text, CSS)",
            Effort::Medium,
        ),
        FailureCategory::Timeout => (
            "Adopt adaptive waits",
            "Replace fixed sleeps with explicit conditions and derive timeouts from observed response times",
            Effort::Medium,
        ),
        FailureCategory::NetworkError => (
            "Add service health checks",
            "Probe backend health before the suite starts and skip dependent tests when a service is unavailable",
            Effort::Low,
        ),
        FailureCategory::PermissionDenied => (
            "Review test account access",
            "Align the test users' roles with the access policies the suite exercises",
            Effort::Low,
        ),
        FailureCategory::DatabaseError => (
            "Isolate test data",
            "Seed per-run test data and verify migrations before running the suite",
            Effort::Medium,
        ),
        FailureCategory::Unknown => (
            "Investigate unclassified failures",
            "Reproduce locally with verbose logging and extend the failure patterns once the cause is known",
            Effort::High,
        ),
    }
}

fn recommendations(issues: &[Diagnosis]) -> Vec<Recommendation> {
    let mut groups: BTreeMap<FailureCategory, Vec<&Diagnosis>> = BTreeMap::new();
    for issue in issues {
        groups.entry(issue.category).or_default().push(issue);
    }

    let mut recs: Vec<Recommendation> = groups
        .into_iter()
        .map(|(category, group)| {
            let worst = group
                .iter()
                .map(|d| d.severity)
                .max_by_key(Severity::rank)
                .unwrap_or(Severity::Low);
            let mut affected: Vec<String> = group.iter().map(|d| d.test_name.clone()).collect();
            affected.dedup();
            let (title, strategy, effort) = strategy_for(category);
            Recommendation {
                category,
                priority: worst.into(),
                effort,
                title: title.to_string(),
                strategy: strategy.to_string(),
                affected_tests: affected,
            }
        })
        .collect();

    // Most urgent first; ties keep category order
    recs.sort_by_key(|r| std::cmp::Reverse(priority_rank(r.priority)));
    recs
}

fn priority_rank(priority: Priority) -> u8 {
    match priority {
        Priority::Immediate => 3,
        Priority::High => 2,
        Priority::Medium => 1,
        Priority::Low => 0,
    }
}

impl Diagnoser {
    /// Diagnose every open failure in `handoff` and build the run report.
    ///
    /// Resolved failures are left out of `issues` but still count toward
    /// flakiness. Fix generation problems are logged and skipped.
    pub fn analyze_handoff(&self, handoff: &HandoffRecord, fixes: &FixRegistry) -> RunDiagnosis {
        let issues: Vec<Diagnosis> = handoff
            .open_failures()
            .map(|f| self.diagnose_failure(f))
            .collect();

        let mut fix_scripts = Vec::new();
        for issue in &issues {
            match fixes.generate_fix(issue) {
                Ok(Some(fix)) => fix_scripts.push(fix),
                Ok(None) => {}
                Err(e) => warn!(failure = %issue.failure_id, error = %e, "Fix generation failed"),
            }
        }

        let summary = RunSummary {
            total: handoff.metrics.total_tests,
            passed: handoff.metrics.passed,
            failed: handoff.metrics.failed,
            duration: handoff.metrics.duration.unwrap_or(0),
            flakiness: self.calculate_flakiness(handoff).unwrap_or(0.0),
        };

        info!(
            run = %handoff.run_id,
            issues = issues.len(),
            fixes = fix_scripts.len(),
            "Run analyzed"
        );

        RunDiagnosis {
            handoff_id: handoff.run_id.clone(),
            summary,
            recommendations: recommendations(&issues),
            issues,
            fix_scripts,
        }
    }
}
