use preserve_common::PreserveError;
use serde::{Deserialize, Serialize};
use std::panic::Location;

/// An error reported by a stage about one object or file.
///
/// `source` is the `file:line` where the error was constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingError {
    pub work_item_id: i64,
    pub identifier: String,
    pub message: String,
    pub is_fatal: bool,
    pub source: String,
}

impl ProcessingError {
    #[track_caller]
    pub fn new(
        work_item_id: i64,
        identifier: impl Into<String>,
        message: impl Into<String>,
        is_fatal: bool,
    ) -> Self {
        let location = Location::caller();
        Self {
            work_item_id,
            identifier: identifier.into(),
            message: message.into(),
            is_fatal,
            source: format!("{}:{}", location.file(), location.line()),
        }
    }

    #[track_caller]
    pub fn fatal(work_item_id: i64, identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(work_item_id, identifier, message, true)
    }

    #[track_caller]
    pub fn transient(
        work_item_id: i64,
        identifier: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(work_item_id, identifier, message, false)
    }

    /// Wrap a collaborator error, keeping its fatal classification.
    #[track_caller]
    pub fn from_error(work_item_id: i64, identifier: impl Into<String>, err: &PreserveError) -> Self {
        Self::new(work_item_id, identifier, err.to_string(), err.is_fatal())
    }
}

impl std::fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "WorkItem {} / {}: {} (fatal: {}, at {})",
            self.work_item_id, self.identifier, self.message, self.is_fatal, self.source
        )
    }
}

impl std::error::Error for ProcessingError {}
