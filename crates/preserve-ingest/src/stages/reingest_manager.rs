//! Reingest detection
//!
//! When the catalog already holds this object, every file that it also
//! holds takes over the catalog's UUID and storage tier, and is only marked
//! for saving when its content differs from the newest catalog digests.

use super::StageResult;
use crate::catalog::{Catalog, CatalogChecksum};
use crate::context::IngestContext;
use crate::framework::{ApplyOptions, FileApplier, FileTask};
use crate::models::{IngestFile, IngestObject, ProcessingError};
use async_trait::async_trait;
use preserve_common::{ChecksumAlgorithm, ChecksumSource};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

pub const APPLY_OPTIONS: ApplyOptions = ApplyOptions::new(10, 1, 0, true);

pub struct ReingestManager {
    ctx: IngestContext,
    work_item_id: i64,
}

impl ReingestManager {
    pub fn new(ctx: IngestContext, work_item_id: i64) -> Self {
        Self { ctx, work_item_id }
    }

    #[instrument(skip(self, object), fields(work_item_id = self.work_item_id, object = %object.identifier()))]
    pub async fn run(&self, object: &mut IngestObject) -> StageResult {
        let identifier = object.identifier();
        let catalog_object = match self.ctx.catalog.object_get(&identifier).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                info!("Object is new to the catalog");
                return StageResult::default();
            },
            Err(e) => {
                return StageResult::new(
                    0,
                    vec![ProcessingError::from_error(self.work_item_id, &identifier, &e)],
                )
            },
        };

        info!(catalog_id = ?catalog_object.id, "Object is a reingest");
        object.is_reingest = true;
        object.id = catalog_object.id;
        if let Err(e) = self.ctx.store.object_save(self.work_item_id, object).await {
            return StageResult::new(
                0,
                vec![ProcessingError::from_error(self.work_item_id, &identifier, &e)],
            );
        }

        let check = ReingestCheck {
            catalog: self.ctx.catalog.clone(),
            work_item_id: self.work_item_id,
            pinned_storage_option: Mutex::new(None),
        };
        let options = APPLY_OPTIONS.with_batch_size(self.ctx.config.batch_size);
        let mut result: StageResult = FileApplier::new(self.ctx.store.clone(), self.work_item_id)
            .apply(&options, &check)
            .await
            .into();

        if let Some(pinned) = check.pinned_storage_option() {
            if pinned != object.storage_option {
                warn!(
                    requested = %object.storage_option,
                    pinned = %pinned,
                    "Keeping storage option from first ingest"
                );
            }
            object.storage_option = pinned;
            if let Err(e) = self.ctx.store.object_save(self.work_item_id, object).await {
                result
                    .errors
                    .push(ProcessingError::from_error(self.work_item_id, &identifier, &e));
            }
        }
        result
    }
}

struct ReingestCheck {
    catalog: Arc<dyn Catalog>,
    work_item_id: i64,
    pinned_storage_option: Mutex<Option<String>>,
}

impl ReingestCheck {
    fn pin(&self, storage_option: &str) {
        let mut pinned = self
            .pinned_storage_option
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if pinned.is_none() {
            *pinned = Some(storage_option.to_string());
        }
    }

    fn pinned_storage_option(&self) -> Option<String> {
        self.pinned_storage_option
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl FileTask for ReingestCheck {
    async fn run(&self, file: &mut IngestFile) -> Vec<ProcessingError> {
        let identifier = file.identifier();
        let catalog_file = match self.catalog.file_get(&identifier).await {
            Ok(Some(found)) => found,
            Ok(None) => return Vec::new(),
            Err(e) => return vec![ProcessingError::from_error(self.work_item_id, &identifier, &e)],
        };

        file.is_reingest = true;
        file.uuid = catalog_file.uuid.clone();
        file.id = catalog_file.id;
        file.intellectual_object_id = catalog_file.intellectual_object_id;
        if catalog_file.is_active() && !catalog_file.storage_option.is_empty() {
            file.storage_option = catalog_file.storage_option.clone();
            self.pin(&catalog_file.storage_option);
        }

        let checksums = match self.catalog.checksums(&identifier).await {
            Ok(checksums) => checksums,
            Err(e) => return vec![ProcessingError::from_error(self.work_item_id, &identifier, &e)],
        };
        file.needs_save = content_changed(file, &checksums);
        debug!(identifier = %identifier, needs_save = file.needs_save, "Compared with catalog digests");

        match self.catalog.storage_records(&identifier).await {
            Ok(records) => {
                for record in records {
                    if !file.has_registry_url(&record.url) {
                        file.registry_urls.push(record.url);
                    }
                }
                Vec::new()
            },
            Err(e) => vec![ProcessingError::from_error(self.work_item_id, &identifier, &e)],
        }
    }
}

/// Newest catalog digest for each algorithm.
fn latest_checksums(checksums: &[CatalogChecksum]) -> HashMap<ChecksumAlgorithm, &CatalogChecksum> {
    let mut latest: HashMap<ChecksumAlgorithm, &CatalogChecksum> = HashMap::new();
    for checksum in checksums {
        latest
            .entry(checksum.algorithm)
            .and_modify(|current| {
                if checksum.date_time > current.date_time {
                    *current = checksum;
                }
            })
            .or_insert(checksum);
    }
    latest
}

/// True when the newest catalog digest of any preferred algorithm differs
/// from the ingest digest. Nothing comparable means unchanged.
pub fn content_changed(file: &IngestFile, catalog_checksums: &[CatalogChecksum]) -> bool {
    let latest = latest_checksums(catalog_checksums);
    let mut compared = 0;
    for algorithm in ChecksumAlgorithm::PREFERRED {
        let (Some(recorded), Some(ingest)) = (
            latest.get(&algorithm),
            file.checksum(ChecksumSource::Ingest, algorithm),
        ) else {
            continue;
        };
        if !recorded.digest.eq_ignore_ascii_case(&ingest.digest) {
            return true;
        }
        compared += 1;
    }
    if compared == 0 {
        debug!(identifier = %file.identifier(), "No catalog digest to compare against");
    }
    false
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::IngestChecksum;
    use chrono::{Duration, Utc};

    fn recorded(algorithm: ChecksumAlgorithm, digest: &str, days_ago: i64) -> CatalogChecksum {
        CatalogChecksum {
            algorithm,
            digest: digest.to_string(),
            date_time: Utc::now() - Duration::days(days_ago),
        }
    }

    fn ingested(md5: &str, sha256: &str) -> IngestFile {
        let mut file = IngestFile::new("example.edu/bag", "data/a.txt");
        file.set_checksum(IngestChecksum::new(ChecksumAlgorithm::Md5, md5, ChecksumSource::Ingest));
        file.set_checksum(IngestChecksum::new(
            ChecksumAlgorithm::Sha256,
            sha256,
            ChecksumSource::Ingest,
        ));
        file
    }

    #[test]
    fn test_unchanged_content() {
        let file = ingested("m1", "s1");
        let history = vec![
            recorded(ChecksumAlgorithm::Md5, "m1", 1),
            recorded(ChecksumAlgorithm::Sha256, "S1", 1),
        ];
        assert!(!content_changed(&file, &history));
    }

    #[test]
    fn test_newest_catalog_digest_wins() {
        let file = ingested("m2", "s2");
        let history = vec![
            recorded(ChecksumAlgorithm::Sha256, "s2", 30),
            recorded(ChecksumAlgorithm::Sha256, "s3", 1),
        ];
        assert!(content_changed(&file, &history));

        let history = vec![
            recorded(ChecksumAlgorithm::Sha256, "s1", 30),
            recorded(ChecksumAlgorithm::Sha256, "s2", 1),
        ];
        assert!(!content_changed(&file, &history));
    }

    #[test]
    fn test_any_mismatch_means_changed() {
        let file = ingested("m1", "s1");
        let history = vec![
            recorded(ChecksumAlgorithm::Sha256, "s1", 1),
            recorded(ChecksumAlgorithm::Md5, "different", 1),
        ];
        assert!(content_changed(&file, &history));
    }

    #[test]
    fn test_nothing_comparable_means_unchanged() {
        let mut file = IngestFile::new("example.edu/bag", "data/a.txt");
        file.set_checksum(IngestChecksum::new(ChecksumAlgorithm::Md5, "m1", ChecksumSource::Ingest));
        let history = vec![recorded(ChecksumAlgorithm::Sha512, "x", 1)];
        assert!(!content_changed(&file, &history));
        assert!(!content_changed(&file, &[]));

        let file = ingested("m1", "s1");
        assert!(!content_changed(&file, &history));
    }
}
