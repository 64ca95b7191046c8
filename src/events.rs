//! Typed pipeline events and a subscriber registry.
//!
//! Handlers for an event run in registration order. Each handler is
//! isolated: an `Err` or a panic is logged and dispatch continues with the
//! next subscriber.

use crate::diagnosis::Diagnosis;
use crate::executor::TestResult;
use crate::fixes::FixDescriptor;
use crate::handoff::FailureEntry;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{error, warn};

/// Event names, used for subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    TestStarted,
    TestPassed,
    TestFailed,
    DiagnosisReady,
    FixApplied,
    TestRetry,
}

impl EventKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TestStarted => "test:started",
            Self::TestPassed => "test:passed",
            Self::TestFailed => "test:failed",
            Self::DiagnosisReady => "diagnosis:ready",
            Self::FixApplied => "fix:applied",
            Self::TestRetry => "test:retry",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event and its payload.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    TestStarted { test_name: String },
    TestPassed { result: TestResult },
    TestFailed {
        result: TestResult,
        failure: FailureEntry,
    },
    DiagnosisReady { diagnosis: Diagnosis },
    FixApplied { fix: FixDescriptor },
    /// Nothing consumes this by default; subscribe to act on it.
    TestRetry { test_name: String },
}

impl PipelineEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TestStarted { .. } => EventKind::TestStarted,
            Self::TestPassed { .. } => EventKind::TestPassed,
            Self::TestFailed { .. } => EventKind::TestFailed,
            Self::DiagnosisReady { .. } => EventKind::DiagnosisReady,
            Self::FixApplied { .. } => EventKind::FixApplied,
            Self::TestRetry { .. } => EventKind::TestRetry,
        }
    }
}

/// Subscriber callback.
pub type EventHandler = Box<dyn Fn(&PipelineEvent) -> anyhow::Result<()> + Send + Sync>;

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dispatch {
    pub delivered: usize,
    pub failed: usize,
}

/// Ordered registry of event subscribers.
#[derive(Default)]
pub struct EventBus {
    handlers: Vec<(EventKind, EventHandler)>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `kind`.
    pub fn on<F>(&mut self, kind: EventKind, handler: F)
    where
        F: Fn(&PipelineEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.push((kind, Box::new(handler)));
    }

    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers.iter().filter(|(k, _)| *k == kind).count()
    }

    /// Deliver `event` to every subscriber of its kind.
    pub fn emit(&self, event: &PipelineEvent) -> Dispatch {
        let kind = event.kind();
        let mut dispatch = Dispatch::default();

        for (index, (_, handler)) in self
            .handlers
            .iter()
            .filter(|(k, _)| *k == kind)
            .enumerate()
        {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => dispatch.delivered += 1,
                Ok(Err(e)) => {
                    warn!(event = %kind, handler = index, error = %e, "Event handler failed");
                    dispatch.failed += 1;
                }
                Err(_) => {
                    error!(event = %kind, handler = index, "Event handler panicked");
                    dispatch.failed += 1;
                }
            }
        }

        dispatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn retry(name: &str) -> PipelineEvent {
        PipelineEvent::TestRetry {
            test_name: name.to_string(),
        }
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        for i in 0..3 {
            let seen = Arc::clone(&seen);
            bus.on(EventKind::TestRetry, move |_| {
                seen.lock().unwrap().push(i);
                Ok(())
            });
        }

        let dispatch = bus.emit(&retry("a"));
        assert_eq!(dispatch.delivered, 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_only_matching_kind_is_called() {
        let calls = Arc::new(Mutex::new(0));
        let mut bus = EventBus::new();
        let counter = Arc::clone(&calls);
        bus.on(EventKind::TestStarted, move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        assert_eq!(bus.emit(&retry("a")), Dispatch::default());
        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(bus.subscriber_count(EventKind::TestStarted), 1);
    }

    #[test]
    fn test_failing_and_panicking_handlers_are_isolated() {
        let reached = Arc::new(Mutex::new(false));
        let mut bus = EventBus::new();
        bus.on(EventKind::TestRetry, |_| anyhow::bail!("subscriber broke"));
        bus.on(EventKind::TestRetry, |_| panic!("subscriber panicked"));
        let flag = Arc::clone(&reached);
        bus.on(EventKind::TestRetry, move |event| {
            if let PipelineEvent::TestRetry { test_name } = event {
                *flag.lock().unwrap() = test_name == "checkout";
            }
            Ok(())
        });

        let dispatch = bus.emit(&retry("checkout"));
        assert_eq!(dispatch, Dispatch { delivered: 1, failed: 2 });
        assert!(*reached.lock().unwrap());
    }

    #[test]
    fn test_event_names() {
        assert_eq!(EventKind::TestFailed.to_string(), "test:failed");
        assert_eq!(retry("x").kind().as_str(), "test:retry");
    }
}
