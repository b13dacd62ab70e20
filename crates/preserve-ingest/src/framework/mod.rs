//! Shared machinery for pipeline stages

pub mod apply;
pub mod error_log;

pub use apply::{ApplyOptions, ApplyOutcome, FileApplier, FileTask};
pub use error_log::ErrorLog;
