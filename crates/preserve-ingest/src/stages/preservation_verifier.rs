//! Confirm each preservation copy exists with the expected size.

use super::StageResult;
use crate::config::IngestConfig;
use crate::context::IngestContext;
use crate::framework::{ApplyOptions, FileApplier, FileTask};
use crate::models::{IngestFile, IngestObject, ProcessingError};
use crate::storage::StorageClients;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub const APPLY_OPTIONS: ApplyOptions = ApplyOptions::new(30, 3, 1000, true);

pub struct PreservationVerifier {
    ctx: IngestContext,
    work_item_id: i64,
}

impl PreservationVerifier {
    pub fn new(ctx: IngestContext, work_item_id: i64) -> Self {
        Self { ctx, work_item_id }
    }

    #[instrument(skip(self, object), fields(work_item_id = self.work_item_id, object = %object.identifier()))]
    pub async fn run(&self, object: &mut IngestObject) -> StageResult {
        let task = VerifyCopies {
            config: self.ctx.config.clone(),
            storage: self.ctx.storage.clone(),
            storage_option: object.storage_option.clone(),
            work_item_id: self.work_item_id,
        };
        let options = APPLY_OPTIONS.with_batch_size(self.ctx.config.batch_size);
        let result: StageResult = FileApplier::new(self.ctx.store.clone(), self.work_item_id)
            .apply(&options, &task)
            .await
            .into();
        info!(files = result.count, errors = result.errors.len(), "Verification finished");
        result
    }
}

struct VerifyCopies {
    config: Arc<IngestConfig>,
    storage: StorageClients,
    storage_option: String,
    work_item_id: i64,
}

impl VerifyCopies {
    /// Every target of the file's tier must hold a verified copy.
    fn missing_placements(&self, file: &IngestFile) -> bool {
        if !file.needs_save || !file.has_preservable_name() {
            return false;
        }
        let option = if file.storage_option.is_empty() {
            &self.storage_option
        } else {
            &file.storage_option
        };
        let targets = self.config.targets_for(option);
        !file.is_fully_preserved(targets.iter().map(|t| (t.provider.as_str(), t.bucket.as_str())))
    }

    /// Region of a placement, taken from the configured target.
    fn region_of(&self, provider: &str, bucket: &str) -> &str {
        self.config
            .targets
            .iter()
            .find(|t| t.provider == provider && t.bucket == bucket)
            .map(|t| t.region.as_str())
            .unwrap_or_default()
    }
}

#[async_trait]
impl FileTask for VerifyCopies {
    async fn run(&self, file: &mut IngestFile) -> Vec<ProcessingError> {
        let identifier = file.identifier();
        let expected_size = file.size;
        let uuid = file.uuid.clone();
        let mut errors = Vec::new();

        for record in file.storage_records.iter_mut() {
            if record.verified_at.is_some() || record.stored_at.is_none() {
                continue;
            }
            let client = match self
                .storage
                .client(&record.provider, self.region_of(&record.provider, &record.bucket))
            {
                Ok(client) => client,
                Err(e) => {
                    errors.push(ProcessingError::from_error(self.work_item_id, &identifier, &e));
                    continue;
                },
            };

            match client.stat(&record.bucket, &uuid).await {
                Ok(info) if info.size == expected_size => {
                    record.verified_at = Some(Utc::now());
                    record.size = info.size;
                    record.etag = Some(info.etag);
                    record.error = None;
                },
                Ok(info) => {
                    let message = format!(
                        "Size mismatch at {}/{}: expected {}, found {}",
                        record.bucket, uuid, expected_size, info.size
                    );
                    warn!(identifier = %identifier, "{}", message);
                    record.error = Some(message.clone());
                    errors.push(ProcessingError::transient(self.work_item_id, &identifier, message));
                },
                Err(e) => {
                    record.error = Some(e.to_string());
                    errors.push(ProcessingError::from_error(self.work_item_id, &identifier, &e));
                },
            }
        }

        if errors.is_empty() && self.missing_placements(file) {
            errors.push(ProcessingError::transient(
                self.work_item_id,
                &identifier,
                format!("{} is not verified at every target for its storage option", identifier),
            ));
        }
        errors
    }
}
