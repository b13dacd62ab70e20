//! Batch apply engine
//!
//! Every file-level stage is "for each file of a WorkItem, run F". The
//! engine pages through the metadata store, retries F, enforces the stage's
//! error budget and optionally persists each record after F runs.

use super::ErrorLog;
use crate::models::{IngestFile, ProcessingError};
use crate::store::MetadataStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_SIZE: u64 = 100;

/// Per-stage knobs for the apply engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Stop once the cumulative error count goes above this.
    pub max_errors: usize,
    /// Extra attempts after a failed one. Fatal errors are not retried.
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Save each record after F runs, whether or not F reported errors.
    pub persist_changes: bool,
    pub batch_size: u64,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            max_errors: 10,
            max_retries: 1,
            retry_delay: Duration::ZERO,
            persist_changes: true,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ApplyOptions {
    pub const fn new(max_errors: usize, max_retries: u32, retry_delay_ms: u64, persist_changes: bool) -> Self {
        Self {
            max_errors,
            max_retries,
            retry_delay: Duration::from_millis(retry_delay_ms),
            persist_changes,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// The per-file function run by the engine.
#[async_trait]
pub trait FileTask: Send + Sync {
    async fn run(&self, file: &mut IngestFile) -> Vec<ProcessingError>;
}

#[derive(Debug, Default)]
pub struct ApplyOutcome {
    /// Files whose final attempt reported no errors.
    pub count: usize,
    pub errors: Vec<ProcessingError>,
}

pub struct FileApplier {
    store: Arc<dyn MetadataStore>,
    work_item_id: i64,
}

impl FileApplier {
    pub fn new(store: Arc<dyn MetadataStore>, work_item_id: i64) -> Self {
        Self {
            store,
            work_item_id,
        }
    }

    pub async fn apply<T>(&self, options: &ApplyOptions, task: &T) -> ApplyOutcome
    where
        T: FileTask + ?Sized,
    {
        let log = ErrorLog::with_cap(options.max_errors.saturating_add(1));
        let mut count = 0;
        let mut offset = 0;

        'pages: loop {
            let batch = match self
                .store
                .file_batch(self.work_item_id, offset, options.batch_size)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    log.push(ProcessingError::from_error(
                        self.work_item_id,
                        format!("file batch at offset {}", offset),
                        &e,
                    ));
                    break;
                },
            };
            debug!(
                work_item_id = self.work_item_id,
                offset,
                files = batch.files.len(),
                "Applying to file batch"
            );

            for mut file in batch.files {
                let mut errors = self.run_with_retries(options, task, &mut file).await;

                if options.persist_changes {
                    if let Err(e) = self.store.file_save(self.work_item_id, &file).await {
                        errors.push(ProcessingError::from_error(
                            self.work_item_id,
                            file.identifier(),
                            &e,
                        ));
                    }
                }

                if errors.is_empty() {
                    count += 1;
                } else {
                    log.extend(errors);
                }

                if log.total() > options.max_errors {
                    warn!(
                        work_item_id = self.work_item_id,
                        errors = log.total(),
                        max_errors = options.max_errors,
                        "Error budget exceeded, stopping"
                    );
                    break 'pages;
                }
            }

            match batch.next_offset {
                Some(next) => offset = next,
                None => break,
            }
        }

        info!(
            work_item_id = self.work_item_id,
            count,
            errors = log.total(),
            "Apply finished"
        );
        ApplyOutcome {
            count,
            errors: log.into_errors(),
        }
    }

    async fn run_with_retries<T>(
        &self,
        options: &ApplyOptions,
        task: &T,
        file: &mut IngestFile,
    ) -> Vec<ProcessingError>
    where
        T: FileTask + ?Sized,
    {
        let mut attempt = 0;
        loop {
            let errors = task.run(file).await;
            if errors.is_empty() || errors.iter().any(|e| e.is_fatal) || attempt >= options.max_retries {
                return errors;
            }
            attempt += 1;
            warn!(
                work_item_id = self.work_item_id,
                identifier = %file.identifier(),
                attempt,
                max_retries = options.max_retries,
                "{} error(s), retrying",
                errors.len()
            );
            if !options.retry_delay.is_zero() {
                tokio::time::sleep(options.retry_delay).await;
            }
        }
    }
}
