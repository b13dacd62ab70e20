//! End-to-end pipeline tests against in-memory collaborators
//!
//! Each test builds a tarred bag, drops it in the receiving bucket and runs
//! some or all of the stages. Stages before cleanup are run separately when
//! a test needs to look at the metadata store, since cleanup removes every
//! record of the WorkItem.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use async_trait::async_trait;
use common::*;
use preserve_common::{PreserveError, Result};
use preserve_ingest::format::{FormatEngine, FormatMatch};
use preserve_ingest::models::{EventType, IngestFile, IngestObject};
use preserve_ingest::stages::Stage;
use preserve_ingest::storage::StorageClients;
use preserve_ingest::store::{FileBatch, MemoryMetadataStore, MetadataStore};
use preserve_ingest::{IngestContext, Pipeline};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const BEFORE_CLEANUP: [Stage; 7] = [
    Stage::GatherMetadata,
    Stage::Reingest,
    Stage::StageFiles,
    Stage::IdentifyFormats,
    Stage::PreservationUpload,
    Stage::PreservationVerify,
    Stage::Record,
];

async fn stored_files(harness: &TestHarness, work_item_id: i64) -> HashMap<String, IngestFile> {
    let batch = harness.store.file_batch(work_item_id, 0, 1000).await.unwrap();
    assert!(batch.next_offset.is_none());
    batch
        .files
        .into_iter()
        .map(|f| (f.path_in_bag.clone(), f))
        .collect()
}

#[tokio::test]
async fn test_full_ingest_of_good_bag() {
    let harness = TestHarness::new();
    harness.put_bag(&sample_good_bag());
    let item = harness.work_item(1);
    let pipeline = harness.pipeline();

    let report = pipeline.run_stages(&item, &BEFORE_CLEANUP).await.unwrap();
    assert!(report.is_success(), "errors: {:?}", report.errors);
    assert_eq!(report.completed.len(), 7);

    let files = stored_files(&harness, 1).await;
    assert_eq!(files.len(), 16);
    assert!(files.values().all(|f| f.needs_save && !f.is_reingest));

    let preservable: Vec<&IngestFile> = files.values().filter(|f| f.has_preservable_name()).collect();
    assert_eq!(preservable.len(), 11);
    for file in &preservable {
        assert!(file.copied_to_staging_at.is_some(), "{} not staged", file.path_in_bag);
        assert!(file.format_identified_at.is_some());
        assert!(file.saved_to_catalog_at.is_some());
        assert_eq!(file.storage_records.len(), 2);
        assert!(file
            .storage_records
            .iter()
            .all(|r| r.stored_at.is_some() && r.verified_at.is_some() && r.size == file.size));
    }
    for name in ["bagit.txt", "manifest-md5.txt", "tagmanifest-sha256.txt"] {
        let file = &files[name];
        assert!(file.storage_records.is_empty());
        assert!(file.copied_to_staging_at.is_none());
    }

    // Ingest digests match the manifest digests.
    let json = &files["data/sample.json"];
    assert_eq!(json.checksums.len(), 4);
    assert_eq!(json.file_format, "application/json");
    assert_eq!(files["data/image.png"].file_format, "image/png");
    assert_eq!(files["data/image.png"].format_identified_by, "signature");
    assert_eq!(files["bag-info.txt"].checksums.len(), 4);

    let object = harness
        .store
        .object_get(1, &format!("{}/{}", INSTITUTION, SAMPLE_BAG))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(object.file_count, 16);
    assert_eq!(object.storage_option, "Standard");
    assert_eq!(object.manifests.len(), 2);
    assert_eq!(object.tag_manifests.len(), 2);
    assert_eq!(object.parsable_tag_files.len(), 3);
    assert!(object.should_delete_from_receiving);

    assert_eq!(harness.east.keys(VA_BUCKET).len(), 11);
    assert_eq!(harness.west.keys(OR_BUCKET).len(), 11);
    assert_eq!(harness.east.keys(STAGING_BUCKET).len(), 7 + 11);
    assert_eq!(harness.scratch_entries(), 0);

    let uuid = &files["data/report.pdf"].uuid;
    assert_eq!(
        harness.west.bytes(OR_BUCKET, uuid).unwrap(),
        b"%PDF-1.4\n%sample\n".to_vec()
    );

    assert_eq!(harness.catalog.file_count(), 11);
    let catalog_object = harness
        .catalog
        .object(&format!("{}/{}", INSTITUTION, SAMPLE_BAG))
        .unwrap();
    assert_eq!(catalog_object.title, "Sample Good Bag");
    assert_eq!(catalog_object.source_organization, "Example University");
    let catalog_file = harness.catalog.file(&file_identifier("data/report.pdf")).unwrap();
    assert_eq!(catalog_file.uuid, *uuid);
    assert_eq!(catalog_file.storage_records.len(), 2);

    let events = harness.catalog.events();
    let object_events: Vec<_> = events.iter().filter(|e| e.generic_file_identifier.is_none()).collect();
    assert_eq!(object_events.len(), 4);
    assert!(events.iter().any(|e| {
        e.event_type == EventType::Replication
            && e.generic_file_identifier.as_deref() == Some(file_identifier("data/report.pdf").as_str())
    }));

    let report = pipeline.run_from(&item, Stage::Cleanup).await.unwrap();
    assert!(report.is_success(), "errors: {:?}", report.errors);
    assert!(harness.east.keys(STAGING_BUCKET).is_empty());
    assert!(harness.east.keys(RECEIVING_BUCKET).is_empty());
    assert_eq!(harness.store.file_count(1).await.unwrap(), 0);
    assert_eq!(harness.east.keys(VA_BUCKET).len(), 11);
}

#[tokio::test]
async fn test_reingest_of_unchanged_bag_copies_nothing() {
    let harness = TestHarness::new();
    let pipeline = harness.pipeline();
    harness.put_bag(&sample_good_bag());
    let report = pipeline.run(&harness.work_item(1)).await.unwrap();
    assert!(report.is_success(), "errors: {:?}", report.errors);

    let copies = harness.east.copy_count();
    let west_puts = harness.west.put_count();
    let first_uuid = harness.catalog.file(&file_identifier("data/sample.json")).unwrap().uuid;

    harness.put_bag(&sample_good_bag());
    let item = harness.work_item(2);
    let report = pipeline.run_stages(&item, &BEFORE_CLEANUP).await.unwrap();
    assert!(report.is_success(), "errors: {:?}", report.errors);

    let files = stored_files(&harness, 2).await;
    for file in files.values().filter(|f| f.has_preservable_name()) {
        assert!(file.is_reingest);
        assert!(!file.needs_save, "{} marked for saving", file.path_in_bag);
        assert!(file.storage_records.is_empty());
        assert_eq!(file.registry_urls.len(), 2);
    }
    assert_eq!(files["data/sample.json"].uuid, first_uuid);

    assert_eq!(harness.east.copy_count(), copies);
    assert_eq!(harness.west.put_count(), west_puts);
    assert_eq!(harness.east.keys(VA_BUCKET).len(), 11);
    assert_eq!(harness.west.keys(OR_BUCKET).len(), 11);
    assert_eq!(
        harness
            .catalog
            .file(&file_identifier("data/sample.json"))
            .unwrap()
            .checksums
            .len(),
        2
    );

    let report = pipeline.run_from(&item, Stage::Cleanup).await.unwrap();
    assert!(report.is_success(), "errors: {:?}", report.errors);

    let events = harness.catalog.events();
    let object_events = |event_type: EventType| {
        events
            .iter()
            .filter(|e| e.event_type == event_type && e.generic_file_identifier.is_none())
            .count()
    };
    assert_eq!(object_events(EventType::Creation), 1);
    assert_eq!(object_events(EventType::Ingestion), 2);
}

#[tokio::test]
async fn test_reingest_keeps_first_storage_option() {
    let harness = TestHarness::new();
    let pipeline = harness.pipeline();
    harness.put_bag(&sample_good_bag());
    let report = pipeline.run(&harness.work_item(1)).await.unwrap();
    assert!(report.is_success(), "errors: {:?}", report.errors);

    let bag = sample_good_bag()
        .tag_file(
            "aptrust-info.txt",
            "Title: Sample Good Bag\nAccess: Institution\nStorage-Option: Glacier-OR\n",
        )
        .payload("sample.json", "{\"sample\": false}\n");
    harness.put_bag(&bag);
    let item = harness.work_item(2);

    // The object record carries the reingest flag as soon as the check runs.
    let report = pipeline
        .run_stages(&item, &[Stage::GatherMetadata, Stage::Reingest])
        .await
        .unwrap();
    assert!(report.is_success(), "errors: {:?}", report.errors);
    let object = harness
        .store
        .object_get(2, &format!("{}/{}", INSTITUTION, SAMPLE_BAG))
        .await
        .unwrap()
        .unwrap();
    assert!(object.is_reingest);
    assert!(object.id.is_some());
    assert_eq!(object.storage_option, "Standard");
    assert_eq!(object.requested_storage_option(), Some("Glacier-OR"));

    let report = pipeline.run_from(&item, Stage::StageFiles).await.unwrap();
    assert!(report.is_success(), "errors: {:?}", report.errors);

    let catalog_object = harness
        .catalog
        .object(&format!("{}/{}", INSTITUTION, SAMPLE_BAG))
        .unwrap();
    assert_eq!(catalog_object.storage_option, "Standard");
    let json = harness.catalog.file(&file_identifier("data/sample.json")).unwrap();
    assert_eq!(json.storage_option, "Standard");
    assert_eq!(json.storage_records.len(), 2);
    assert!(harness.west.keys("preserve.glacier.or").is_empty());
    assert_eq!(harness.east.keys(VA_BUCKET).len(), 11);
    assert_eq!(harness.west.keys(OR_BUCKET).len(), 11);
}

#[tokio::test]
async fn test_reingest_with_one_changed_file() {
    let harness = TestHarness::new();
    let pipeline = harness.pipeline();
    harness.put_bag(&sample_good_bag());
    let report = pipeline.run(&harness.work_item(1)).await.unwrap();
    assert!(report.is_success(), "errors: {:?}", report.errors);
    let uuid = harness.catalog.file(&file_identifier("data/sample.json")).unwrap().uuid;
    let west_puts = harness.west.put_count();

    let changed = sample_good_bag().payload("sample.json", "{\"sample\": false}\n");
    harness.put_bag(&changed);
    let item = harness.work_item(2);
    let report = pipeline.run_stages(&item, &BEFORE_CLEANUP).await.unwrap();
    assert!(report.is_success(), "errors: {:?}", report.errors);

    let files = stored_files(&harness, 2).await;
    let needs_save: Vec<&str> = files
        .values()
        .filter(|f| f.has_preservable_name() && f.needs_save)
        .map(|f| f.path_in_bag.as_str())
        .collect();
    assert_eq!(needs_save, vec!["data/sample.json"]);
    assert_eq!(files["data/sample.json"].uuid, uuid);

    assert_eq!(harness.west.put_count(), west_puts + 1);
    assert_eq!(
        harness.east.bytes(VA_BUCKET, &uuid).unwrap(),
        b"{\"sample\": false}\n".to_vec()
    );
    assert_eq!(
        harness.west.bytes(OR_BUCKET, &uuid).unwrap(),
        b"{\"sample\": false}\n".to_vec()
    );

    let catalog_file = harness.catalog.file(&file_identifier("data/sample.json")).unwrap();
    assert_eq!(catalog_file.checksums.len(), 4);
    // Same UUID, so the storage URLs are not sent twice.
    assert_eq!(catalog_file.storage_records.len(), 2);
    assert_eq!(harness.catalog.file_count(), 11);
}

#[tokio::test]
async fn test_rescan_keeps_uuids() {
    let harness = TestHarness::new();
    harness.put_bag(&sample_good_bag());
    let item = harness.work_item(1);
    let pipeline = harness.pipeline();

    let report = pipeline.run_stages(&item, &[Stage::GatherMetadata]).await.unwrap();
    assert!(report.is_success(), "errors: {:?}", report.errors);
    let first: HashMap<String, String> = stored_files(&harness, 1)
        .await
        .into_iter()
        .map(|(path, f)| (path, f.uuid))
        .collect();

    let report = pipeline.run_stages(&item, &[Stage::GatherMetadata]).await.unwrap();
    assert!(report.is_success(), "errors: {:?}", report.errors);
    let second = stored_files(&harness, 1).await;

    assert_eq!(second.len(), first.len());
    for (path, file) in &second {
        assert_eq!(&file.uuid, &first[path], "UUID changed for {}", path);
    }
    assert_eq!(second["data/sample.json"].checksums.len(), 4);
}

#[tokio::test]
async fn test_uuids_survive_reingest_cycles() {
    let harness = TestHarness::new();
    let pipeline = harness.pipeline();
    let identifiers: Vec<String> = sample_good_bag()
        .files()
        .into_iter()
        .map(|(path, _)| path)
        .filter(|path| preserve_ingest::bagit::has_preservable_name(path))
        .map(|path| file_identifier(&path))
        .collect();
    assert_eq!(identifiers.len(), 11);

    let mut first: Option<HashMap<String, String>> = None;
    for (cycle, wid) in (1..=3).enumerate() {
        let bag = sample_good_bag().payload("notes/readme.txt", format!("Revision {}\n", cycle));
        harness.put_bag(&bag);
        let report = pipeline.run(&harness.work_item(wid)).await.unwrap();
        assert!(report.is_success(), "cycle {}: {:?}", cycle, report.errors);

        let uuids: HashMap<String, String> = identifiers
            .iter()
            .map(|id| (id.clone(), harness.catalog.file(id).unwrap().uuid))
            .collect();
        match &first {
            None => first = Some(uuids),
            Some(first) => assert_eq!(&uuids, first, "UUIDs changed in cycle {}", cycle),
        }
    }

    assert_eq!(harness.catalog.file_count(), 11);
    assert_eq!(harness.east.keys(VA_BUCKET).len(), 11);
    assert_eq!(harness.west.keys(OR_BUCKET).len(), 11);
    let readme = harness.catalog.file(&file_identifier("data/notes/readme.txt")).unwrap();
    // md5 and sha256 from each of the three ingests
    assert_eq!(readme.checksums.len(), 6);
}

#[tokio::test]
async fn test_missing_source_is_fatal() {
    let harness = TestHarness::new();
    let report = harness.pipeline().run(&harness.work_item(1)).await.unwrap();

    assert_eq!(report.stopped_at, Some(Stage::GatherMetadata));
    assert!(report.has_fatal_error());
    assert!(report.completed.is_empty());
}

/// Labels Fedora datastream exports as XML and nothing else.
struct DatastreamEngine;

impl FormatEngine for DatastreamEngine {
    fn name(&self) -> &str {
        "datastream rules"
    }

    fn identify(&self, head: &[u8], path_in_bag: &str) -> Option<FormatMatch> {
        let is_datastream = path_in_bag.rsplit('/').next()?.starts_with("datastream-");
        (is_datastream && head.starts_with(b"<")).then(|| FormatMatch {
            mime_type: "application/xml".to_string(),
            match_type: "rule".to_string(),
        })
    }
}

#[tokio::test]
async fn test_custom_format_engine() {
    let harness = TestHarness::new();
    harness.put_bag(&sample_good_bag());
    let item = harness.work_item(1);
    let pipeline = Pipeline::new(harness.context().with_format_engine(Arc::new(DatastreamEngine)));

    let report = pipeline.run_stages(&item, &BEFORE_CLEANUP).await.unwrap();
    assert!(report.is_success(), "errors: {:?}", report.errors);

    let files = stored_files(&harness, 1).await;
    let dc = &files["data/datastream-DC"];
    assert_eq!(dc.file_format, "application/xml");
    assert_eq!(dc.format_identified_by, "datastream rules");
    assert_eq!(dc.format_match_type, "rule");

    // MARC is not markup, so the extension guess stands.
    let marc = &files["data/datastream-MARC"];
    assert_ne!(marc.format_identified_by, "datastream rules");
    assert!(marc.format_identified_at.is_some());
}

#[tokio::test]
async fn test_manifest_entry_without_file_is_fatal() {
    let harness = TestHarness::new();
    harness.put_bag(&sample_good_bag().missing_payload("missing.txt", ""));
    let item = harness.work_item(1);

    let report = harness.pipeline().run(&item).await.unwrap();
    assert_eq!(report.stopped_at, Some(Stage::GatherMetadata));
    assert!(report.has_fatal_error());
    let missing = file_identifier("data/missing.txt");
    assert!(report
        .errors
        .iter()
        .any(|e| e.is_fatal && e.identifier == missing));

    assert!(harness.store.file_get(1, &missing).await.unwrap().is_none());
    assert!(harness.east.keys(STAGING_BUCKET).iter().all(|k| !k.contains("missing")));
    assert_eq!(harness.catalog.file_count(), 0);
}

/// Delegates to a memory store but fails every file save.
struct FailingFileSaves {
    inner: MemoryMetadataStore,
    saves: AtomicUsize,
}

#[async_trait]
impl MetadataStore for FailingFileSaves {
    async fn object_get(&self, work_item_id: i64, identifier: &str) -> Result<Option<IngestObject>> {
        self.inner.object_get(work_item_id, identifier).await
    }

    async fn object_save(&self, work_item_id: i64, object: &IngestObject) -> Result<()> {
        self.inner.object_save(work_item_id, object).await
    }

    async fn object_delete(&self, work_item_id: i64, identifier: &str) -> Result<()> {
        self.inner.object_delete(work_item_id, identifier).await
    }

    async fn file_get(&self, work_item_id: i64, identifier: &str) -> Result<Option<IngestFile>> {
        self.inner.file_get(work_item_id, identifier).await
    }

    async fn file_save(&self, _work_item_id: i64, _file: &IngestFile) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Err(PreserveError::MetadataStore("connection reset".to_string()))
    }

    async fn file_delete(&self, work_item_id: i64, identifier: &str) -> Result<()> {
        self.inner.file_delete(work_item_id, identifier).await
    }

    async fn file_batch(&self, work_item_id: i64, offset: u64, limit: u64) -> Result<FileBatch> {
        self.inner.file_batch(work_item_id, offset, limit).await
    }

    async fn file_count(&self, work_item_id: i64) -> Result<u64> {
        self.inner.file_count(work_item_id).await
    }

    async fn work_item_delete(&self, work_item_id: i64) -> Result<u64> {
        self.inner.work_item_delete(work_item_id).await
    }
}

#[tokio::test]
async fn test_gatherer_stops_saving_after_error_budget() {
    let harness = TestHarness::new();
    let mut bag = BagBuilder::new("example.edu.many_files");
    for i in 0..150 {
        bag = bag.payload(&format!("file{:03}.txt", i), format!("file {}\n", i));
    }
    harness.put_bag(&bag);

    let store = Arc::new(FailingFileSaves {
        inner: MemoryMetadataStore::new(),
        saves: AtomicUsize::new(0),
    });
    let storage = StorageClients::new()
        .with("aws", "us-east-1", harness.east.clone())
        .with("aws", "us-west-2", harness.west.clone());
    let pipeline = Pipeline::new(IngestContext::new(
        harness.config.clone(),
        store.clone(),
        storage,
        harness.catalog.clone(),
    ));

    let item = harness.work_item_for(1, bag.name());
    let report = pipeline.run(&item).await.unwrap();
    assert_eq!(report.stopped_at, Some(Stage::GatherMetadata));
    assert!(!report.has_fatal_error());
    assert_eq!(report.errors.len(), 100);
    assert_eq!(store.saves.load(Ordering::SeqCst), 101);
    assert!(store.object_get(1, "example.edu/example.edu.many_files").await.unwrap().is_none());
}

#[tokio::test]
async fn test_resume_after_preservation_failure() {
    let harness = TestHarness::new();
    harness.put_bag(&sample_good_bag());
    let item = harness.work_item(1);

    // No client for the Oregon region.
    let storage = StorageClients::new().with("aws", "us-east-1", harness.east.clone());
    let partial = Pipeline::new(IngestContext::new(
        harness.config.clone(),
        harness.store.clone(),
        storage,
        harness.catalog.clone(),
    ));
    let report = partial.run(&item).await.unwrap();
    assert_eq!(report.stopped_at, Some(Stage::PreservationUpload));
    assert_eq!(report.errors.len(), 11);
    assert_eq!(harness.east.keys(VA_BUCKET).len(), 11);
    let copies = harness.east.copy_count();

    let report = harness
        .pipeline()
        .run_from(&item, Stage::PreservationUpload)
        .await
        .unwrap();
    assert!(report.is_success(), "errors: {:?}", report.errors);
    assert_eq!(harness.east.copy_count(), copies);
    assert_eq!(harness.west.keys(OR_BUCKET).len(), 11);
    assert_eq!(harness.catalog.file_count(), 11);
    assert!(harness.east.keys(RECEIVING_BUCKET).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_verify_flags_missing_placements() {
    let harness = TestHarness::new();
    harness.put_bag(&sample_good_bag());
    let item = harness.work_item(1);

    let storage = StorageClients::new().with("aws", "us-east-1", harness.east.clone());
    let partial = Pipeline::new(IngestContext::new(
        harness.config.clone(),
        harness.store.clone(),
        storage,
        harness.catalog.clone(),
    ));
    let report = partial.run(&item).await.unwrap();
    assert_eq!(report.stopped_at, Some(Stage::PreservationUpload));

    // Virginia copies verify, but nothing reached Oregon.
    let report = partial
        .run_stages(&item, &[Stage::PreservationVerify])
        .await
        .unwrap();
    assert_eq!(report.stopped_at, Some(Stage::PreservationVerify));
    assert_eq!(report.errors.len(), 11);
    assert!(!report.has_fatal_error());

    let files = stored_files(&harness, 1).await;
    let readme = &files["data/notes/readme.txt"];
    let va = readme.storage_record("aws", VA_BUCKET).unwrap();
    assert!(va.verified_at.is_some());
    assert!(!readme.is_fully_preserved([("aws", VA_BUCKET), ("aws", OR_BUCKET)]));
    assert_eq!(harness.catalog.file_count(), 0);
}

#[tokio::test]
async fn test_cleanup_refuses_unsafe_staging_bucket() {
    let mut harness = TestHarness::new();
    harness.config.staging.bucket = "preserve.archive".to_string();
    harness.put_bag(&sample_good_bag());

    let report = harness.pipeline().run(&harness.work_item(1)).await.unwrap();
    assert_eq!(report.stopped_at, Some(Stage::Cleanup));
    assert!(report.has_fatal_error());
    assert!(!harness.east.keys("preserve.archive").is_empty());
    assert_eq!(harness.east.keys(RECEIVING_BUCKET).len(), 1);
}

#[tokio::test]
async fn test_cleanup_keeps_original_in_unsafe_receiving_bucket() {
    let harness = TestHarness::new();
    let bag = sample_good_bag();
    harness
        .east
        .insert("deposits.example.edu", &tar_key(bag.name()), bag.build());
    let mut item = harness.work_item(1);
    item.bucket = "deposits.example.edu".to_string();

    let report = harness.pipeline().run(&item).await.unwrap();
    assert_eq!(report.stopped_at, Some(Stage::Cleanup));
    assert!(report.has_fatal_error());
    assert_eq!(harness.east.keys("deposits.example.edu").len(), 1);
    // Staged copies are still removed.
    assert!(harness.east.keys(STAGING_BUCKET).is_empty());
}
