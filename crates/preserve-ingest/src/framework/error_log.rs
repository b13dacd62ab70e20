use crate::models::ProcessingError;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Errors collected while a stage runs.
///
/// Keeps at most `cap` entries but counts every error, so the error budget
/// is enforced even after the list stops growing.
#[derive(Debug)]
pub struct ErrorLog {
    cap: usize,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    errors: Vec<ProcessingError>,
    total: usize,
}

impl ErrorLog {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            cap,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, error: ProcessingError) {
        warn!(
            work_item_id = error.work_item_id,
            identifier = %error.identifier,
            fatal = error.is_fatal,
            source = %error.source,
            "{}",
            error.message
        );
        let mut inner = self.inner();
        inner.total += 1;
        if inner.errors.len() < self.cap {
            inner.errors.push(error);
        }
    }

    pub fn extend(&self, errors: impl IntoIterator<Item = ProcessingError>) {
        for error in errors {
            self.push(error);
        }
    }

    /// Every error pushed so far, including ones beyond the cap.
    pub fn total(&self) -> usize {
        self.inner().total
    }

    pub fn has_fatal(&self) -> bool {
        self.inner().errors.iter().any(|e| e.is_fatal)
    }

    pub fn into_errors(self) -> Vec<ProcessingError> {
        self.inner
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_limits_stored_errors_not_count() {
        let log = ErrorLog::with_cap(2);
        for i in 0..5 {
            log.push(ProcessingError::transient(1, format!("file{}", i), "boom"));
        }
        assert_eq!(log.total(), 5);
        assert!(!log.has_fatal());
        assert_eq!(log.into_errors().len(), 2);
    }
}
