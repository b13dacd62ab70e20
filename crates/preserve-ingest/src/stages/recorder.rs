//! Record the object, its files and their provenance events in the catalog.
//!
//! Event lists are generated once and persisted before any event is sent.
//! Resubmitting after a partial failure sends the same event identifiers,
//! which the catalog accepts without creating duplicates.

use super::StageResult;
use crate::catalog::{Catalog, CatalogChecksum, CatalogFile, CatalogObject, CatalogStorageRecord, STATE_ACTIVE};
use crate::context::IngestContext;
use crate::framework::{ApplyOptions, FileApplier, FileTask};
use crate::models::{IdentifierKind, IngestFile, IngestObject, PremisEvent, ProcessingError};
use crate::store::MetadataStore;
use async_trait::async_trait;
use chrono::Utc;
use preserve_common::{ChecksumAlgorithm, ChecksumSource, Result};
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub const APPLY_OPTIONS: ApplyOptions = ApplyOptions::new(10, 1, 0, true);

pub struct Recorder {
    ctx: IngestContext,
    work_item_id: i64,
}

impl Recorder {
    pub fn new(ctx: IngestContext, work_item_id: i64) -> Self {
        Self { ctx, work_item_id }
    }

    #[instrument(skip(self, object), fields(work_item_id = self.work_item_id, object = %object.identifier()))]
    pub async fn run(&self, object: &mut IngestObject) -> StageResult {
        let identifier = object.identifier();
        let object_error = |e| StageResult::new(0, vec![ProcessingError::from_error(self.work_item_id, &identifier, &e)]);

        if let Err(e) = self.save_object(object).await {
            return object_error(e);
        }
        if let Err(e) = self.record_object_events(object).await {
            return object_error(e);
        }

        let task = RecordFile {
            catalog: self.ctx.catalog.clone(),
            store: self.ctx.store.clone(),
            object_identifier: identifier.clone(),
            object_id: object.id,
            institution_id: object.institution_id,
            storage_option: object.storage_option.clone(),
            work_item_id: self.work_item_id,
        };
        let options = APPLY_OPTIONS.with_batch_size(self.ctx.config.batch_size);
        let mut result: StageResult = FileApplier::new(self.ctx.store.clone(), self.work_item_id)
            .apply(&options, &task)
            .await
            .into();

        if result.is_ok() {
            object.should_delete_from_receiving = true;
            if let Err(e) = self.ctx.store.object_save(self.work_item_id, object).await {
                result
                    .errors
                    .push(ProcessingError::from_error(self.work_item_id, &identifier, &e));
            }
        }
        info!(files = result.count, errors = result.errors.len(), "Recorded in catalog");
        result
    }

    async fn save_object(&self, object: &mut IngestObject) -> Result<()> {
        if object.saved_to_catalog_at.is_some() {
            return Ok(());
        }
        let saved = self.ctx.catalog.object_save(&catalog_object(object)).await?;
        debug!(catalog_id = ?saved.id, "Saved object to catalog");
        object.id = saved.id;
        object.saved_to_catalog_at = Some(Utc::now());
        self.ctx.store.object_save(self.work_item_id, object).await
    }

    async fn record_object_events(&self, object: &mut IngestObject) -> Result<()> {
        if object.premis_events.is_empty() {
            object.premis_events = object.build_ingest_events(object.file_count);
            self.ctx.store.object_save(self.work_item_id, object).await?;
        }

        let mut outcome = Ok(());
        for event in object.premis_events.iter_mut().filter(|e| !e.is_recorded()) {
            match self.ctx.catalog.event_save(event).await {
                Ok(saved) => event.id = saved.id,
                Err(e) => {
                    outcome = Err(e);
                    break;
                },
            }
        }
        self.ctx.store.object_save(self.work_item_id, object).await?;
        outcome
    }
}

fn catalog_object(object: &IngestObject) -> CatalogObject {
    CatalogObject {
        id: object.id,
        identifier: object.identifier(),
        bag_name: object.bag_name.clone(),
        institution_id: object.institution_id,
        title: object.title().to_string(),
        description: object.description().to_string(),
        access: object.access().to_string(),
        alt_identifier: object.alt_identifier().to_string(),
        bag_group_identifier: object.bag_group_identifier().to_string(),
        source_organization: object.source_organization().to_string(),
        bagit_profile_identifier: object.bagit_profile_identifier().to_string(),
        storage_option: object.storage_option.clone(),
        etag: object.etag.clone(),
        state: STATE_ACTIVE.to_string(),
    }
}

/// Provenance events for one file.
///
/// Identifier assignment only happens for files the catalog has not seen.
pub fn file_events(file: &IngestFile) -> Vec<PremisEvent> {
    let now = Utc::now();
    let mut events = Vec::new();
    let primary = file.storage_records.first();

    if !file.is_reingest {
        events.push(PremisEvent::file_identifier_assignment(
            now,
            IdentifierKind::BagPath,
            &file.identifier(),
        ));
        if let Some(primary) = primary {
            events.push(PremisEvent::file_identifier_assignment(
                now,
                IdentifierKind::StorageUrl,
                &primary.url,
            ));
        }
    }

    for checksum in &file.checksums {
        if checksum.source == ChecksumSource::Ingest {
            events.push(PremisEvent::file_digest_calculation(
                checksum.date_time,
                checksum.algorithm.as_str(),
                &checksum.digest,
            ));
        } else if checksum.source.is_manifest() {
            events.push(PremisEvent::file_fixity_check(
                checksum.date_time,
                checksum.algorithm.as_str(),
                &checksum.digest,
            ));
        }
    }

    if let Some(primary) = primary {
        let md5 = file
            .checksum(ChecksumSource::Ingest, ChecksumAlgorithm::Md5)
            .map(|c| c.digest.as_str())
            .unwrap_or_default();
        events.push(PremisEvent::file_ingestion(
            primary.stored_at.unwrap_or(now),
            md5,
            &file.uuid,
        ));
    }
    for replica in file.storage_records.iter().skip(1) {
        events.push(PremisEvent::file_replication(
            replica.stored_at.unwrap_or(now),
            &replica.url,
        ));
    }

    let object_identifier = file.object_identifier.clone();
    let file_identifier = file.identifier();
    events
        .into_iter()
        .map(|e| e.for_file(&object_identifier, &file_identifier))
        .collect()
}

struct RecordFile {
    catalog: Arc<dyn Catalog>,
    store: Arc<dyn MetadataStore>,
    object_identifier: String,
    object_id: Option<i64>,
    institution_id: i64,
    storage_option: String,
    work_item_id: i64,
}

impl RecordFile {
    fn catalog_file(&self, file: &IngestFile) -> CatalogFile {
        CatalogFile {
            id: file.id,
            identifier: file.identifier(),
            intellectual_object_id: file.intellectual_object_id.or(self.object_id),
            institution_id: if file.institution_id == 0 {
                self.institution_id
            } else {
                file.institution_id
            },
            uuid: file.uuid.clone(),
            size: file.size,
            file_format: file.file_format.clone(),
            storage_option: if file.storage_option.is_empty() {
                self.storage_option.clone()
            } else {
                file.storage_option.clone()
            },
            state: STATE_ACTIVE.to_string(),
            file_modified: file.file_modified,
            checksums: file
                .checksums
                .iter()
                .filter(|c| c.source == ChecksumSource::Ingest)
                .map(|c| CatalogChecksum {
                    algorithm: c.algorithm,
                    digest: c.digest.clone(),
                    date_time: c.date_time,
                })
                .collect(),
            storage_records: file
                .storage_records
                .iter()
                .filter(|r| r.stored_at.is_some() && !file.has_registry_url(&r.url))
                .map(|r| CatalogStorageRecord { url: r.url.clone() })
                .collect(),
            premis_events: file
                .premis_events
                .iter()
                .filter(|e| !e.is_recorded())
                .cloned()
                .collect(),
        }
    }

    async fn record(&self, file: &mut IngestFile) -> Result<()> {
        if file.premis_events.is_empty() {
            file.premis_events = file_events(file);
            self.store.file_save(self.work_item_id, file).await?;
        }

        let request = self.catalog_file(file);
        let sent_urls: Vec<String> = request.storage_records.iter().map(|r| r.url.clone()).collect();
        let saved = self.catalog.file_save(&request).await?;

        file.id = saved.id;
        file.intellectual_object_id = saved.intellectual_object_id;
        for event in file.premis_events.iter_mut() {
            if let Some(accepted) = saved
                .premis_events
                .iter()
                .find(|e| e.identifier == event.identifier)
            {
                event.id = accepted.id;
            }
        }
        for url in sent_urls {
            if !file.has_registry_url(&url) {
                file.registry_urls.push(url);
            }
        }
        file.saved_to_catalog_at = Some(Utc::now());
        debug!(identifier = %file.identifier(), catalog_id = ?file.id, "Saved file to catalog");
        Ok(())
    }
}

#[async_trait]
impl FileTask for RecordFile {
    async fn run(&self, file: &mut IngestFile) -> Vec<ProcessingError> {
        if !file.has_preservable_name() || !file.needs_save || file.saved_to_catalog_at.is_some() {
            return Vec::new();
        }
        if file.object_identifier != self.object_identifier {
            return vec![ProcessingError::fatal(
                self.work_item_id,
                file.identifier(),
                format!("File does not belong to {}", self.object_identifier),
            )];
        }
        match self.record(file).await {
            Ok(()) => Vec::new(),
            Err(e) => vec![ProcessingError::from_error(self.work_item_id, file.identifier(), &e)],
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{EventType, IngestChecksum, StorageRecord};

    fn preserved_file(is_reingest: bool) -> IngestFile {
        let mut file = IngestFile::new("example.edu/bag", "data/a.txt");
        file.is_reingest = is_reingest;
        file.set_checksum(IngestChecksum::new(ChecksumAlgorithm::Md5, "m", ChecksumSource::Ingest));
        file.set_checksum(IngestChecksum::new(ChecksumAlgorithm::Sha256, "s", ChecksumSource::Ingest));
        file.set_checksum(IngestChecksum::new(
            ChecksumAlgorithm::Md5,
            "m",
            ChecksumSource::PayloadManifest,
        ));
        for (bucket, host) in [("va", "s3.amazonaws.com"), ("or", "s3.us-west-2.amazonaws.com")] {
            let mut record = StorageRecord::new("aws", bucket, format!("https://{}/{}/{}", host, bucket, file.uuid));
            record.stored_at = Some(Utc::now());
            file.set_storage_record(record);
        }
        file
    }

    fn types(events: &[PremisEvent]) -> Vec<EventType> {
        events.iter().map(|e| e.event_type).collect()
    }

    #[test]
    fn test_new_file_events() {
        let events = file_events(&preserved_file(false));
        assert_eq!(
            types(&events),
            vec![
                EventType::IdentifierAssignment,
                EventType::IdentifierAssignment,
                EventType::DigestCalculation,
                EventType::DigestCalculation,
                EventType::FixityCheck,
                EventType::Ingestion,
                EventType::Replication,
            ]
        );
        assert!(events
            .iter()
            .all(|e| e.generic_file_identifier.as_deref() == Some("example.edu/bag/data/a.txt")));
    }

    #[test]
    fn test_reingested_file_keeps_identifiers() {
        let events = file_events(&preserved_file(true));
        assert!(!types(&events).contains(&EventType::IdentifierAssignment));
        assert_eq!(events.len(), 5);
    }

    #[test]
    fn test_known_urls_are_not_resent() {
        let mut file = preserved_file(true);
        let known = file.storage_records[0].url.clone();
        file.registry_urls.push(known.clone());
        let task = RecordFile {
            catalog: Arc::new(crate::catalog::MemoryCatalog::new()),
            store: Arc::new(crate::store::MemoryMetadataStore::new()),
            object_identifier: "example.edu/bag".into(),
            object_id: Some(4),
            institution_id: 2,
            storage_option: "Standard".into(),
            work_item_id: 1,
        };
        let request = task.catalog_file(&file);
        assert_eq!(request.storage_records.len(), 1);
        assert_ne!(request.storage_records[0].url, known);
        assert_eq!(request.checksums.len(), 2);
        assert_eq!(request.intellectual_object_id, Some(4));
        assert_eq!(request.institution_id, 2);
    }
}
