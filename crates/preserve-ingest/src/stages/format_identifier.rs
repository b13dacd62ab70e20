//! Refine each file's format from the leading bytes of its staged copy.

use super::StageResult;
use crate::context::IngestContext;
use crate::format::{FormatEngine, IDENTIFIED_BY_SIGNATURE};
use crate::framework::{ApplyOptions, FileApplier, FileTask};
use crate::models::{IngestFile, IngestObject, ProcessingError};
use crate::storage::ObjectStore;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument};

pub const APPLY_OPTIONS: ApplyOptions = ApplyOptions::new(30, 3, 1000, true);

pub struct FormatIdentifier {
    ctx: IngestContext,
    work_item_id: i64,
}

impl FormatIdentifier {
    pub fn new(ctx: IngestContext, work_item_id: i64) -> Self {
        Self { ctx, work_item_id }
    }

    #[instrument(skip(self, object), fields(work_item_id = self.work_item_id, object = %object.identifier()))]
    pub async fn run(&self, object: &mut IngestObject) -> StageResult {
        let staging = match self.ctx.staging_client() {
            Ok(client) => client,
            Err(e) => {
                return StageResult::new(
                    0,
                    vec![ProcessingError::from_error(self.work_item_id, object.identifier(), &e)],
                )
            },
        };

        let task = IdentifyFormat {
            staging,
            bucket: self.ctx.config.staging.bucket.clone(),
            engine: self.ctx.format_engine.clone(),
            sniff_bytes: self.ctx.config.format_sniff_bytes,
            work_item_id: self.work_item_id,
        };
        let options = APPLY_OPTIONS.with_batch_size(self.ctx.config.batch_size);
        let result: StageResult = FileApplier::new(self.ctx.store.clone(), self.work_item_id)
            .apply(&options, &task)
            .await
            .into();
        info!(files = result.count, errors = result.errors.len(), "Identified formats");
        result
    }
}

struct IdentifyFormat {
    staging: Arc<dyn ObjectStore>,
    bucket: String,
    engine: Arc<dyn FormatEngine>,
    sniff_bytes: usize,
    work_item_id: i64,
}

#[async_trait]
impl FileTask for IdentifyFormat {
    async fn run(&self, file: &mut IngestFile) -> Vec<ProcessingError> {
        if file.format_identified_by == IDENTIFIED_BY_SIGNATURE
            || !file.needs_save
            || !file.has_preservable_name()
        {
            return Vec::new();
        }

        let key = file.staging_key(self.work_item_id);
        let reader = match self.staging.get(&self.bucket, &key).await {
            Ok(reader) => reader,
            Err(e) => return vec![ProcessingError::from_error(self.work_item_id, file.identifier(), &e)],
        };
        let mut head = Vec::with_capacity(self.sniff_bytes);
        if let Err(e) = reader.take(self.sniff_bytes as u64).read_to_end(&mut head).await {
            return vec![ProcessingError::transient(
                self.work_item_id,
                file.identifier(),
                format!("Failed to read staged copy: {}", e),
            )];
        }

        match self.engine.identify(&head, &file.path_in_bag) {
            Some(found) => {
                debug!(
                    identifier = %file.identifier(),
                    previous = %file.file_format,
                    identified = %found.mime_type,
                    "Format identified"
                );
                file.file_format = found.mime_type;
                file.format_identified_by = self.engine.name().to_string();
                file.format_match_type = found.match_type;
            },
            None => {
                debug!(identifier = %file.identifier(), "No signature match, keeping extension guess");
            },
        }
        file.format_identified_at = Some(Utc::now());
        Vec::new()
    }
}
