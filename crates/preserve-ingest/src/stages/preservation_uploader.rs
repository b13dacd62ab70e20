//! Copy staged files to every preservation target of their storage tier.
//!
//! Targets that share provider and region with staging get a server-side
//! copy (composed from ranged part copies above the single-copy limit).
//! Everything else is streamed through this process.

use super::StageResult;
use crate::config::{IngestConfig, PreservationTarget};
use crate::context::IngestContext;
use crate::framework::{ApplyOptions, FileApplier, FileTask};
use crate::models::{IngestFile, IngestObject, ProcessingError, StorageRecord};
use crate::storage::{object_url, PutOptions, StorageClients};
use async_trait::async_trait;
use chrono::Utc;
use preserve_common::{PreserveError, Result};
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub const APPLY_OPTIONS: ApplyOptions = ApplyOptions::new(30, 3, 1000, true);

pub struct PreservationUploader {
    ctx: IngestContext,
    work_item_id: i64,
}

impl PreservationUploader {
    pub fn new(ctx: IngestContext, work_item_id: i64) -> Self {
        Self { ctx, work_item_id }
    }

    #[instrument(skip(self, object), fields(work_item_id = self.work_item_id, object = %object.identifier()))]
    pub async fn run(&self, object: &mut IngestObject) -> StageResult {
        if self.ctx.config.targets_for(&object.storage_option).is_empty() {
            return StageResult::new(
                0,
                vec![ProcessingError::fatal(
                    self.work_item_id,
                    object.identifier(),
                    format!("No preservation targets for storage option '{}'", object.storage_option),
                )],
            );
        }

        let task = PreserveCopies {
            config: self.ctx.config.clone(),
            storage: self.ctx.storage.clone(),
            object: object.clone(),
            work_item_id: self.work_item_id,
        };
        let options = APPLY_OPTIONS.with_batch_size(self.ctx.config.batch_size);
        let result: StageResult = FileApplier::new(self.ctx.store.clone(), self.work_item_id)
            .apply(&options, &task)
            .await
            .into();
        info!(files = result.count, errors = result.errors.len(), "Preservation upload finished");
        result
    }
}

struct PreserveCopies {
    config: Arc<IngestConfig>,
    storage: StorageClients,
    object: IngestObject,
    work_item_id: i64,
}

impl PreserveCopies {
    /// A tier pinned on the file by the reingest check wins over the
    /// object's requested tier.
    fn storage_option<'a>(&'a self, file: &'a IngestFile) -> &'a str {
        if file.storage_option.is_empty() {
            &self.object.storage_option
        } else {
            &file.storage_option
        }
    }

    async fn copy_to(&self, file: &IngestFile, target: &PreservationTarget) -> Result<()> {
        let staging = &self.config.staging;
        let staging_key = file.staging_key(self.work_item_id);
        let options =
            PutOptions::for_file(&self.object, file).with_storage_class(target.storage_class.clone());
        let client = self.storage.client(&target.provider, &target.region)?;

        if self.config.is_same_region_as_staging(target) {
            if file.size > self.config.max_server_side_copy_size {
                debug!(identifier = %file.identifier(), bucket = %target.bucket, "Composing server-side copy");
                client
                    .compose(&staging.bucket, &staging_key, &target.bucket, &file.uuid, file.size, &options)
                    .await?;
            } else {
                debug!(identifier = %file.identifier(), bucket = %target.bucket, "Server-side copy");
                client
                    .copy(&staging.bucket, &staging_key, &target.bucket, &file.uuid, &options)
                    .await?;
            }
            return Ok(());
        }

        debug!(identifier = %file.identifier(), bucket = %target.bucket, "Streaming copy");
        let source = self
            .storage
            .client(&staging.provider, &staging.region)?
            .get(&staging.bucket, &staging_key)
            .await?;
        let written = client
            .put(&target.bucket, &file.uuid, source, file.size, &options)
            .await?;
        if written != file.size {
            return Err(PreserveError::Storage(format!(
                "Short write to {}/{}: {} of {} bytes",
                target.bucket, file.uuid, written, file.size
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl FileTask for PreserveCopies {
    async fn run(&self, file: &mut IngestFile) -> Vec<ProcessingError> {
        if !file.needs_save || !file.has_preservable_name() {
            return Vec::new();
        }

        let storage_option = self.storage_option(file).to_string();
        let targets = self.config.targets_for(&storage_option);
        if targets.is_empty() {
            return vec![ProcessingError::fatal(
                self.work_item_id,
                file.identifier(),
                format!("No preservation targets for storage option '{}'", storage_option),
            )];
        }

        let mut errors = Vec::new();
        for target in targets {
            if !file.needs_save_at(&target.provider, &target.bucket) {
                continue;
            }
            match self.copy_to(file, target).await {
                Ok(()) => {
                    let mut record = StorageRecord::new(
                        &target.provider,
                        &target.bucket,
                        object_url(&target.host, &target.bucket, &file.uuid),
                    );
                    record.stored_at = Some(Utc::now());
                    file.set_storage_record(record);
                },
                Err(e) => errors.push(ProcessingError::from_error(self.work_item_id, file.identifier(), &e)),
            }
        }
        errors
    }
}
