//! Page driver capability consumed by the pipeline.
//!
//! testmend does not drive a browser itself. Anything that can count and
//! pick elements for a selector, take a screenshot, report the current URL,
//! and publish console and response events can back a run by implementing
//! [`Page`].

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// Severity of a console message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Debug,
    Info,
    Warning,
    Error,
}

/// One message written to the browser console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleMessage {
    #[serde(rename = "type")]
    pub level: ConsoleLevel,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConsoleMessage {
    pub fn new(level: ConsoleLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.level == ConsoleLevel::Error
    }
}

/// A network response observed while a test ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkResponse {
    pub url: String,
    pub status: u16,
    /// True for 2xx/3xx statuses.
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl NetworkResponse {
    pub fn new(url: impl Into<String>, status: u16) -> Self {
        Self {
            url: url.into(),
            status,
            ok: (200..400).contains(&status),
            method: None,
        }
    }

    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }
}

/// Handle to the first element matched by a selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub selector: String,
}

/// Identifies a registered listener so it can be detached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

pub type ConsoleListener = Arc<dyn Fn(&ConsoleMessage) + Send + Sync>;
pub type ResponseListener = Arc<dyn Fn(&NetworkResponse) + Send + Sync>;

/// The browser page a suite runs against.
///
/// A single page is shared by every test in a run; tests execute one at a
/// time, so implementations do not need to handle concurrent callers.
#[async_trait]
pub trait Page: Send + Sync {
    /// Number of elements currently matching `selector`.
    async fn count(&self, selector: &str) -> Result<usize>;

    /// First element matching `selector`.
    async fn first(&self, selector: &str) -> Result<Element>;

    /// Capture the page. Returns an encoded image or a reference to one.
    async fn screenshot(&self) -> Result<String>;

    /// URL of the current document.
    async fn url(&self) -> Result<String>;

    /// Subscribe to console messages.
    fn on_console(&self, listener: ConsoleListener) -> ListenerId;

    /// Subscribe to network responses.
    fn on_response(&self, listener: ResponseListener) -> ListenerId;

    /// Detach a listener registered with `on_console` or `on_response`.
    fn remove_listener(&self, id: ListenerId);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Console and network observers scoped to one test invocation.
///
/// Listeners are attached on creation and detached when the scope is
/// finished or dropped, so events from one test never leak into the next.
pub struct CaptureScope<'p> {
    page: &'p dyn Page,
    console: Arc<Mutex<Vec<ConsoleMessage>>>,
    responses: Arc<Mutex<Vec<NetworkResponse>>>,
    listeners: Vec<ListenerId>,
}

/// What a [`CaptureScope`] saw.
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub console: Vec<ConsoleMessage>,
    pub responses: Vec<NetworkResponse>,
}

impl Captured {
    /// Responses with a non-success status.
    #[must_use]
    pub fn failed_responses(&self) -> Vec<NetworkResponse> {
        self.responses.iter().filter(|r| !r.ok).cloned().collect()
    }
}

impl<'p> CaptureScope<'p> {
    /// Attach console and response observers to `page`.
    pub fn attach(page: &'p dyn Page) -> Self {
        let console = Arc::new(Mutex::new(Vec::new()));
        let responses = Arc::new(Mutex::new(Vec::new()));

        let console_sink = Arc::clone(&console);
        let console_id = page.on_console(Arc::new(move |msg: &ConsoleMessage| {
            lock(&console_sink).push(msg.clone());
        }));

        let response_sink = Arc::clone(&responses);
        let response_id = page.on_response(Arc::new(move |resp: &NetworkResponse| {
            lock(&response_sink).push(resp.clone());
        }));

        Self {
            page,
            console,
            responses,
            listeners: vec![console_id, response_id],
        }
    }

    /// Snapshot what has been observed so far without detaching.
    #[must_use]
    pub fn snapshot(&self) -> Captured {
        Captured {
            console: lock(&self.console).clone(),
            responses: lock(&self.responses).clone(),
        }
    }

    /// Detach the observers and return everything captured.
    pub fn finish(mut self) -> Captured {
        self.detach();
        self.snapshot()
    }

    fn detach(&mut self) {
        for id in self.listeners.drain(..) {
            self.page.remove_listener(id);
        }
    }
}

impl Drop for CaptureScope<'_> {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPage;

    #[test]
    fn test_network_response_ok_range() {
        assert!(NetworkResponse::new("/a", 200).ok);
        assert!(NetworkResponse::new("/a", 302).ok);
        assert!(!NetworkResponse::new("/a", 404).ok);
        assert!(!NetworkResponse::new("/a", 500).ok);
        assert!(!NetworkResponse::new("/a", 199).ok);
    }

    #[test]
    fn test_console_message_serializes_level_as_type() {
        let msg = ConsoleMessage::new(ConsoleLevel::Error, "boom");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "error");
        assert!(msg.is_error());
    }

    #[test]
    fn test_capture_scope_collects_and_detaches() {
        let page = MockPage::new();
        let scope = CaptureScope::attach(&page);
        assert_eq!(page.listener_count(), 2);

        page.emit_console(ConsoleMessage::new(ConsoleLevel::Warning, "slow"));
        page.emit_response(NetworkResponse::new("/api/ok", 200));
        page.emit_response(NetworkResponse::new("/api/fail", 503));

        let captured = scope.finish();
        assert_eq!(page.listener_count(), 0);
        assert_eq!(captured.console.len(), 1);
        assert_eq!(captured.responses.len(), 2);
        assert_eq!(captured.failed_responses().len(), 1);
        assert_eq!(captured.failed_responses()[0].status, 503);

        // Nothing is captured after finishing
        page.emit_console(ConsoleMessage::new(ConsoleLevel::Error, "late"));
        assert_eq!(page.listener_count(), 0);
    }

    #[test]
    fn test_capture_scope_detaches_on_drop() {
        let page = MockPage::new();
        {
            let _scope = CaptureScope::attach(&page);
            assert_eq!(page.listener_count(), 2);
        }
        assert_eq!(page.listener_count(), 0);
    }
}
