//! Remove staged copies, the WorkItem's records and, once everything is
//! safely recorded, the original tar in the receiving bucket.

use super::StageResult;
use crate::context::IngestContext;
use crate::models::{IngestObject, ProcessingError};
use chrono::Utc;
use preserve_common::PreserveError;
use tracing::{debug, info, instrument, warn};

/// Deletion stops once more errors than this have piled up.
const MAX_DELETE_ERRORS: usize = 10;

/// Only staging and receiving buckets may be deleted from. The check is
/// case-sensitive.
pub fn bucket_unsafe_for_deletion(bucket: &str) -> bool {
    !bucket.contains("staging") && !bucket.contains("receiving")
}

pub struct Cleanup {
    ctx: IngestContext,
    work_item_id: i64,
}

impl Cleanup {
    pub fn new(ctx: IngestContext, work_item_id: i64) -> Self {
        Self { ctx, work_item_id }
    }

    #[instrument(skip(self, object), fields(work_item_id = self.work_item_id, object = %object.identifier()))]
    pub async fn run(&self, object: &mut IngestObject) -> StageResult {
        let identifier = object.identifier();
        let mut errors = Vec::new();
        let staging_bucket = &self.ctx.config.staging.bucket;

        if bucket_unsafe_for_deletion(staging_bucket) {
            let e = PreserveError::UnsafeDeletion(staging_bucket.clone());
            return StageResult::new(0, vec![ProcessingError::from_error(self.work_item_id, &identifier, &e)]);
        }

        let removed = self.delete_staged(&identifier, &mut errors).await;

        if let Err(e) = self.ctx.store.work_item_delete(self.work_item_id).await {
            errors.push(ProcessingError::from_error(self.work_item_id, &identifier, &e));
        }

        if object.should_delete_from_receiving && errors.is_empty() {
            if let Err(error) = self.delete_from_receiving(object).await {
                errors.push(error);
            }
        } else {
            debug!(
                should_delete = object.should_delete_from_receiving,
                errors = errors.len(),
                "Leaving original in receiving bucket"
            );
        }

        info!(removed, errors = errors.len(), "Cleanup finished");
        StageResult::new(removed, errors)
    }

    async fn delete_staged(&self, identifier: &str, errors: &mut Vec<ProcessingError>) -> usize {
        let bucket = &self.ctx.config.staging.bucket;
        let staging = match self.ctx.staging_client() {
            Ok(client) => client,
            Err(e) => {
                errors.push(ProcessingError::from_error(self.work_item_id, identifier, &e));
                return 0;
            },
        };
        let keys = match staging.list(bucket, &format!("{}/", self.work_item_id)).await {
            Ok(keys) => keys,
            Err(e) => {
                errors.push(ProcessingError::from_error(self.work_item_id, identifier, &e));
                return 0;
            },
        };

        let mut removed = 0;
        for key in keys {
            match staging.remove(bucket, &key).await {
                Ok(()) => removed += 1,
                Err(e) if e.is_not_found() => {},
                Err(e) => {
                    errors.push(ProcessingError::from_error(
                        self.work_item_id,
                        format!("{}/{}", bucket, key),
                        &e,
                    ));
                    if errors.len() > MAX_DELETE_ERRORS {
                        warn!("Too many errors deleting staged files, giving up");
                        break;
                    }
                },
            }
        }
        removed
    }

    async fn delete_from_receiving(&self, object: &mut IngestObject) -> Result<(), ProcessingError> {
        let identifier = object.identifier();
        if bucket_unsafe_for_deletion(&object.s3_bucket) {
            let e = PreserveError::UnsafeDeletion(object.s3_bucket.clone());
            return Err(ProcessingError::from_error(self.work_item_id, &identifier, &e));
        }
        let receiving = self
            .ctx
            .receiving_client()
            .map_err(|e| ProcessingError::from_error(self.work_item_id, &identifier, &e))?;
        match receiving.remove(&object.s3_bucket, &object.s3_key).await {
            Ok(()) => {},
            Err(e) if e.is_not_found() => debug!("Original already gone from receiving"),
            Err(e) => return Err(ProcessingError::from_error(self.work_item_id, &identifier, &e)),
        }
        object.deleted_from_receiving_at = Some(Utc::now());
        info!(bucket = %object.s3_bucket, key = %object.s3_key, "Deleted original from receiving");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_unsafe_for_deletion() {
        assert!(bucket_unsafe_for_deletion("preserve.preservation.va"));
        assert!(bucket_unsafe_for_deletion("STAGING-bucket"));
        assert!(bucket_unsafe_for_deletion("Receiving.example.edu"));
        assert!(!bucket_unsafe_for_deletion("preserve.staging"));
        assert!(!bucket_unsafe_for_deletion("receiving.example.edu"));
        assert!(!bucket_unsafe_for_deletion("my-receiving-test"));
    }
}
