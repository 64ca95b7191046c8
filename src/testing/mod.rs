//! Testing infrastructure for testmend.
//!
//! This module provides mocks and assertions for exercising the pipeline
//! without a real browser, child processes or a database.
//!
//! # Architecture
//!
//! The testing infrastructure is organized into:
//! - **Mocks**: Test doubles for the page driver, the fix script runner and
//!   the diagnosis store
//! - **Assertions**: Custom assertions for diagnoses, fixes and handoffs
//!
//! # Example
//!
//! ```rust,ignore
//! use testmend::testing::{MockPage, MockScriptRunner};
//!
//! let page = MockPage::new()
//!     .with_count("[data-testid=submit]", 1)
//!     .with_url("https://app.test/checkout");
//!
//! let runner = MockScriptRunner::timing_out();
//! ```

pub mod assertions;
pub mod mocks;

// Re-export commonly used types
pub use assertions::*;
pub use mocks::*;
