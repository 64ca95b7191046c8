//! Fix generation.
//!
//! Each [`FailureCategory`] maps to at most one [`FixKind`] through an
//! exhaustive match, so a new category cannot be added without deciding
//! what (if anything) fixes it. Generated scripts are persisted through an
//! [`ArtifactSink`] before the descriptor is returned.

pub mod runner;

pub use runner::{ProcessScriptRunner, ScriptOutput, ScriptRunner};

use crate::artifacts::ArtifactSink;
use crate::diagnosis::{Diagnosis, FailureCategory};
use crate::error::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Language a fix script is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLanguage {
    Shell,
    JavaScript,
}

impl ScriptLanguage {
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Shell => "sh",
            Self::JavaScript => "js",
        }
    }

    /// Program used to run a script of this language.
    #[must_use]
    pub fn interpreter(&self) -> &'static str {
        match self {
            Self::Shell => "sh",
            Self::JavaScript => "node",
        }
    }
}

/// Script body plus its language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixScript {
    pub language: ScriptLanguage,
    pub body: String,
}

/// Closed set of remedies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixKind {
    ElementNotFound,
    /// Timeouts of API requests, as opposed to plain UI waits.
    ApiTimeout,
    NetworkError,
    PermissionDenied,
    DatabaseError,
}

/// A proposed remedy for one diagnosis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixDescriptor {
    /// `fix-<failureId>`
    pub id: String,
    pub failure_id: String,
    pub test_name: String,
    #[serde(rename = "type")]
    pub kind: FixKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<FixScript>,
    /// Location of the persisted script; set only when `script` is present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub auto_executable: bool,
    pub requires_review: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manual_steps: Vec<String>,
}

impl FixDescriptor {
    fn new(kind: FixKind, diagnosis: &Diagnosis, description: impl Into<String>) -> Self {
        Self {
            id: format!("fix-{}", diagnosis.failure_id),
            failure_id: diagnosis.failure_id.clone(),
            test_name: diagnosis.test_name.clone(),
            kind,
            description: description.into(),
            script: None,
            path: None,
            auto_executable: false,
            requires_review: false,
            manual_steps: Vec::new(),
        }
    }

    fn with_script(mut self, language: ScriptLanguage, body: String) -> Self {
        self.script = Some(FixScript { language, body });
        self
    }

    fn with_manual_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manual_steps = steps.into_iter().map(Into::into).collect();
        self
    }

    /// True when the fix can be run without a human.
    #[must_use]
    pub fn can_auto_apply(&self) -> bool {
        self.auto_executable && self.script.is_some()
    }
}

impl FixKind {
    /// Remedy for a diagnosis, if one exists.
    #[must_use]
    pub fn for_diagnosis(diagnosis: &Diagnosis) -> Option<Self> {
        match diagnosis.category {
            FailureCategory::ElementNotFound => Some(Self::ElementNotFound),
            FailureCategory::Timeout => is_api_related(diagnosis).then_some(Self::ApiTimeout),
            FailureCategory::NetworkError => Some(Self::NetworkError),
            FailureCategory::PermissionDenied => Some(Self::PermissionDenied),
            FailureCategory::DatabaseError => Some(Self::DatabaseError),
            FailureCategory::Unknown => None,
        }
    }

    fn build(&self, diagnosis: &Diagnosis) -> FixDescriptor {
        match self {
            Self::ElementNotFound => element_not_found_fix(diagnosis),
            Self::ApiTimeout => api_timeout_fix(diagnosis),
            Self::NetworkError => network_error_fix(diagnosis),
            Self::PermissionDenied => permission_denied_fix(diagnosis),
            Self::DatabaseError => database_error_fix(diagnosis),
        }
    }
}

fn is_api_related(diagnosis: &Diagnosis) -> bool {
    if diagnosis.network_failures().next().is_some() {
        return true;
    }
    Regex::new(r"(?i)/api/|\bapi\b")
        .map(|re| re.is_match(&diagnosis.error))
        .unwrap_or(false)
}

fn script_header(comment: &str, diagnosis: &Diagnosis) -> String {
    format!(
        "{comment} Generated by testmend for failure {} ({})\n{comment} {}\n",
        diagnosis.failure_id, diagnosis.test_name, diagnosis.root_cause
    )
}

fn element_not_found_fix(diagnosis: &Diagnosis) -> FixDescriptor {
    let mut body = script_header("//", diagnosis);
    body.push_str(&format!("// Error: {}\n", diagnosis.error));
    body.push_str(
        r#"//
// The element could not be located by any selector strategy. Give it a
// stable test id in the component markup:
//
//   <button data-testid="submit-order">Place order</button>
//
// then list the test id first in the test's selector chain:
//
//   [data-testid="submit-order"]
//
const missing = process.argv.slice(2);
if (missing.length === 0) {
  console.log('Pass the element names that need data-testid attributes.');
}
for (const name of missing) {
  console.log(`Add data-testid="${name}" to the element and select it with [data-testid="${name}"]`);
}
"#,
    );

    let mut fix = FixDescriptor::new(
        FixKind::ElementNotFound,
        diagnosis,
        "Add data-testid attributes to the missing element and prefer them in the selector fallback chain",
    )
    .with_script(ScriptLanguage::JavaScript, body);
    fix.requires_review = true;
    fix
}

fn api_timeout_fix(diagnosis: &Diagnosis) -> FixDescriptor {
    let mut body = String::from("#!/bin/sh\n");
    body.push_str(&script_header("#", diagnosis));
    body.push_str(
        r#"# Raises API request timeouts and enables request retries for UI tests.
set -e

CONFIG_DIR="${TESTMEND_CONFIG_DIR:-.testmend}"
mkdir -p "$CONFIG_DIR"
cat > "$CONFIG_DIR/api-timeouts.json" <<'JSON'
{
  "requestTimeoutMs": 30000,
  "retries": 3,
  "retryBackoffMs": 1000
}
JSON
echo "Updated $CONFIG_DIR/api-timeouts.json"
"#,
    );

    let mut fix = FixDescriptor::new(
        FixKind::ApiTimeout,
        diagnosis,
        "Raise API request timeouts and enable request retries for the test environment",
    )
    .with_script(ScriptLanguage::Shell, body);
    fix.auto_executable = true;
    fix
}

fn network_error_fix(diagnosis: &Diagnosis) -> FixDescriptor {
    let target = diagnosis
        .network_failures()
        .next()
        .map(|r| r.url.clone())
        .unwrap_or_else(|| "<failing url>".to_string());

    FixDescriptor::new(
        FixKind::NetworkError,
        diagnosis,
        "Network request failed; verify the backend is reachable from the test host",
    )
    .with_manual_steps([
        "Check that the API server is running and reachable from the test host".to_string(),
        "Verify CORS allows requests from the test origin".to_string(),
        "Check firewall and proxy rules between the test runner and the server".to_string(),
        format!("Isolate the request with curl: curl -v {target}"),
    ])
}

fn permission_denied_fix(diagnosis: &Diagnosis) -> FixDescriptor {
    FixDescriptor::new(
        FixKind::PermissionDenied,
        diagnosis,
        "Access was denied; review the test account and the access policies it exercises",
    )
    .with_manual_steps([
        "Confirm the test user's role grants access to the resource",
        "Review the access policies on the affected table or endpoint",
        "Check that the session token is present and not expired",
        "Re-run with an account that has the expected permissions to confirm",
    ])
}

fn database_error_fix(diagnosis: &Diagnosis) -> FixDescriptor {
    let mut body = String::from("#!/bin/sh\n");
    body.push_str(&script_header("#", diagnosis));
    body.push_str(
        r#"# Read-only database diagnostics: connectivity and migration state.

: "${DATABASE_URL:?DATABASE_URL must be set}"

echo "Checking connectivity..."
if psql "$DATABASE_URL" -c 'SELECT 1' >/dev/null 2>&1; then
  echo "Connection OK"
else
  echo "Cannot connect to database" >&2
  exit 1
fi

echo "Most recent migrations:"
psql "$DATABASE_URL" -c 'SELECT version FROM schema_migrations ORDER BY version DESC LIMIT 5'
"#,
    );

    let mut fix = FixDescriptor::new(
        FixKind::DatabaseError,
        diagnosis,
        "Database operation failed; run the diagnostic script to check connectivity and migrations",
    )
    .with_script(ScriptLanguage::Shell, body);
    fix.requires_review = true;
    fix
}

/// Produces fixes for diagnoses and persists their scripts.
#[derive(Clone)]
pub struct FixRegistry {
    sink: Arc<dyn ArtifactSink>,
}

impl std::fmt::Debug for FixRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixRegistry").finish_non_exhaustive()
    }
}

impl FixRegistry {
    pub fn new(sink: Arc<dyn ArtifactSink>) -> Self {
        Self { sink }
    }

    /// Fix for `diagnosis`, or `None` when no remedy exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact sink cannot store the script.
    pub fn generate_fix(&self, diagnosis: &Diagnosis) -> Result<Option<FixDescriptor>> {
        let Some(kind) = FixKind::for_diagnosis(diagnosis) else {
            debug!(category = %diagnosis.category, "No fix available");
            return Ok(None);
        };

        let mut fix = kind.build(diagnosis);
        if let Some(script) = &fix.script {
            let path = self
                .sink
                .write(&fix.id, script.language.extension(), &script.body)?;
            fix.path = Some(path);
        }

        debug!(fix = %fix.id, kind = ?fix.kind, "Fix generated");
        Ok(Some(fix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::MemoryArtifactSink;
    use crate::diagnosis::{Diagnoser, Evidence, Severity};
    use crate::driver::NetworkResponse;
    use crate::error::MendError;
    use crate::handoff::FailureEntry;

    fn diagnosis(test: &str, error: &str) -> Diagnosis {
        Diagnoser::new().diagnose_failure(&FailureEntry::new(test, error))
    }

    fn registry() -> (Arc<MemoryArtifactSink>, FixRegistry) {
        let sink = Arc::new(MemoryArtifactSink::new());
        (sink.clone(), FixRegistry::new(sink))
    }

    #[test]
    fn test_unknown_category_has_no_fix() {
        let (sink, registry) = registry();
        let d = diagnosis("Search", "something odd happened");
        assert_eq!(d.category, FailureCategory::Unknown);
        assert!(registry.generate_fix(&d).unwrap().is_none());
        assert!(sink.locations().is_empty());
    }

    #[test]
    fn test_element_not_found_fix_needs_review() {
        let (sink, registry) = registry();
        let d = diagnosis("Search", "Element not found: #q");
        let fix = registry.generate_fix(&d).unwrap().unwrap();

        assert_eq!(fix.kind, FixKind::ElementNotFound);
        assert_eq!(fix.id, format!("fix-{}", d.failure_id));
        assert!(!fix.auto_executable);
        assert!(fix.requires_review);
        assert!(fix.description.contains("data-testid"));

        let path = fix.path.unwrap();
        assert!(path.ends_with(".js"));
        assert!(sink.get(&path).unwrap().contains("data-testid"));
    }

    #[test]
    fn test_api_timeout_fix_is_auto_executable() {
        let (_, registry) = registry();
        let d = diagnosis("Orders", "Timeout waiting for /api/orders");
        let fix = registry.generate_fix(&d).unwrap().unwrap();

        assert_eq!(fix.kind, FixKind::ApiTimeout);
        assert!(fix.can_auto_apply());
        assert!(!fix.requires_review);
        assert!(fix.path.unwrap().ends_with(".sh"));
    }

    #[test]
    fn test_timeout_with_network_evidence_is_api_timeout() {
        let mut d = diagnosis("Orders", "Timed out after 30000ms");
        d.evidence.push(Evidence::NetworkFailures {
            responses: vec![NetworkResponse::new("https://app/orders", 504)],
        });
        assert_eq!(FixKind::for_diagnosis(&d), Some(FixKind::ApiTimeout));
    }

    #[test]
    fn test_plain_ui_timeout_has_no_fix() {
        let d = diagnosis("Orders", "Timeout 5000ms exceeded waiting for selector");
        assert_eq!(FixKind::for_diagnosis(&d), None);
        // "rapid" must not count as an API reference
        let d = diagnosis("Orders", "rapid animation timed out");
        assert_eq!(FixKind::for_diagnosis(&d), None);
    }

    #[test]
    fn test_network_fix_is_manual() {
        let (sink, registry) = registry();
        let mut d = diagnosis("Feed", "Failed to fetch");
        d.evidence.push(Evidence::NetworkFailures {
            responses: vec![NetworkResponse::new("https://app/api/feed", 502)],
        });
        let fix = registry.generate_fix(&d).unwrap().unwrap();

        assert!(fix.script.is_none());
        assert!(fix.path.is_none());
        assert!(!fix.auto_executable);
        assert_eq!(fix.manual_steps.len(), 4);
        assert!(fix.manual_steps[3].contains("https://app/api/feed"));
        assert!(sink.locations().is_empty());
    }

    #[test]
    fn test_permission_fix_is_manual() {
        let (_, registry) = registry();
        let d = diagnosis("Admin panel", "403 permission denied");
        let fix = registry.generate_fix(&d).unwrap().unwrap();
        assert_eq!(fix.kind, FixKind::PermissionDenied);
        assert!(!fix.auto_executable);
        assert!(!fix.manual_steps.is_empty());
    }

    #[test]
    fn test_database_fix_is_reviewed_script() {
        let (sink, registry) = registry();
        let d = diagnosis("Reports", "postgres: relation does not exist");
        assert_eq!(d.severity, Severity::High);
        let fix = registry.generate_fix(&d).unwrap().unwrap();

        assert_eq!(fix.kind, FixKind::DatabaseError);
        assert!(!fix.auto_executable);
        assert!(fix.requires_review);
        let body = sink.get(fix.path.as_deref().unwrap()).unwrap();
        assert!(body.starts_with("#!/bin/sh"));
        assert!(body.contains("schema_migrations"));
    }

    struct FailingSink;

    impl ArtifactSink for FailingSink {
        fn write(&self, id: &str, _extension: &str, _content: &str) -> Result<String> {
            Err(MendError::artifact(id, "disk full"))
        }
    }

    #[test]
    fn test_sink_failure_propagates() {
        let registry = FixRegistry::new(Arc::new(FailingSink));
        let d = diagnosis("Search", "Element not found");
        let err = registry.generate_fix(&d).unwrap_err();
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_descriptor_serializes_kind_as_type() {
        let (_, registry) = registry();
        let fix = registry
            .generate_fix(&diagnosis("Search", "Element not found"))
            .unwrap()
            .unwrap();
        let json = serde_json::to_value(&fix).unwrap();
        assert_eq!(json["type"], "ELEMENT_NOT_FOUND");
        assert_eq!(json["autoExecutable"], false);
        assert_eq!(json["script"]["language"], "javascript");
    }
}
