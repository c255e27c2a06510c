//! Common utilities and abstractions for the chorus runtime.
//!
//! This crate provides the error model and logging bootstrap shared by the
//! other workspace members.

pub mod error;
pub mod logging;

pub use error::{ChorusError, Diagnose, ErrorCategory, ErrorContext, ErrorSeverity, Result};
pub use logging::init_tracing;
