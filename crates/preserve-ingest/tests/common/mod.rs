//! Shared fixtures for pipeline integration tests
//!
//! Builds tarred bags in memory and wires a pipeline to in-memory
//! collaborators: one object store per storage region, a metadata store and
//! a catalog.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{sample_good_bag, TestHarness};
//!
//! #[tokio::test]
//! async fn test_ingest() {
//!     let harness = TestHarness::new();
//!     harness.put_bag(&sample_good_bag());
//!     let report = harness.pipeline().run(&harness.work_item(1)).await.unwrap();
//!     assert!(report.is_success());
//! }
//! ```

#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use preserve_common::checksum::digest_reader;
use preserve_ingest::catalog::MemoryCatalog;
use preserve_ingest::config::{default_targets, IngestConfig};
use preserve_ingest::models::WorkItem;
use preserve_ingest::storage::{MemoryObjectStore, StorageClients};
use preserve_ingest::store::MemoryMetadataStore;
use preserve_ingest::{IngestContext, Pipeline};
use std::io::Cursor;
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;

pub const INSTITUTION: &str = "example.edu";
pub const INSTITUTION_ID: i64 = 7;
pub const RECEIVING_BUCKET: &str = "receiving.example.edu";
pub const STAGING_BUCKET: &str = "preserve.staging";
pub const VA_BUCKET: &str = "preserve.preservation.va";
pub const OR_BUCKET: &str = "preserve.preservation.or";
pub const SAMPLE_BAG: &str = "example.edu.sample_good";

static TRACING: Once = Once::new();

/// Log to the test writer at debug level. Safe to call from every test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("preserve_ingest=debug")
            .with_test_writer()
            .try_init();
    });
}

/// A tarred bag built in memory. Manifests and tag manifests for md5 and
/// sha256 are generated from the files added.
pub struct BagBuilder {
    name: String,
    payload: Vec<(String, Vec<u8>)>,
    /// Listed in the payload manifests but left out of the tar.
    missing: Vec<(String, Vec<u8>)>,
    tag_files: Vec<(String, Vec<u8>)>,
}

impl BagBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            payload: Vec::new(),
            missing: Vec::new(),
            tag_files: vec![(
                "bagit.txt".to_string(),
                b"BagIt-Version: 0.97\nTag-File-Character-Encoding: UTF-8\n".to_vec(),
            )],
        }
    }

    /// Add a payload file under `data/`, replacing one at the same path.
    pub fn payload(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        let path = format!("data/{}", path);
        self.payload.retain(|(p, _)| *p != path);
        self.payload.push((path, data.into()));
        self
    }

    /// List a payload file in the manifests without adding it to the tar.
    pub fn missing_payload(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.missing.push((format!("data/{}", path), data.into()));
        self
    }

    /// Add a tag file, replacing one at the same path.
    pub fn tag_file(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.tag_files.retain(|(p, _)| p != path);
        self.tag_files.push((path.to_string(), data.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn manifest(files: &[(String, Vec<u8>)], sha256: bool) -> Vec<u8> {
        let mut out = String::new();
        for (path, data) in files {
            let digests = digest_reader(&mut Cursor::new(data)).unwrap();
            let digest = if sha256 { digests.sha256 } else { digests.md5 };
            out.push_str(&format!("{}  {}\n", digest, path));
        }
        out.into_bytes()
    }

    /// Every file of the bag by path, manifests included.
    pub fn files(&self) -> Vec<(String, Vec<u8>)> {
        let mut files = self.tag_files.clone();
        let listed: Vec<_> = self.payload.iter().chain(&self.missing).cloned().collect();
        files.push(("manifest-md5.txt".to_string(), Self::manifest(&listed, false)));
        files.push(("manifest-sha256.txt".to_string(), Self::manifest(&listed, true)));

        let tagged = files.clone();
        files.push(("tagmanifest-md5.txt".to_string(), Self::manifest(&tagged, false)));
        files.push(("tagmanifest-sha256.txt".to_string(), Self::manifest(&tagged, true)));
        files.extend(self.payload.iter().cloned());
        files
    }

    pub fn build(&self) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in self.files() {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(1_700_000_000);
            header.set_entry_type(tar::EntryType::Regular);
            builder
                .append_data(&mut header, format!("{}/{}", self.name, path), data.as_slice())
                .unwrap();
        }
        builder.into_inner().unwrap()
    }
}

/// Sixteen files: eight payload files, three preservable tag files, bagit.txt
/// and four manifests. Seven of them are copied to scratch.
pub fn sample_good_bag() -> BagBuilder {
    BagBuilder::new(SAMPLE_BAG)
        .tag_file(
            "bag-info.txt",
            "Source-Organization: Example University\n\
             Bagging-Date: 2024-05-01\n\
             Internal-Sender-Identifier: sample-0001\n\
             Internal-Sender-Description: Sample bag for ingest tests\n\
             Storage-Option: Standard\n",
        )
        .tag_file(
            "aptrust-info.txt",
            "Title: Sample Good Bag\nAccess: Institution\nStorage-Option: Standard\n",
        )
        .tag_file("custom_tags/tracked_tag_file.txt", "Tracked-Value: kept\n")
        .payload("datastream-DC", "<dc><title>Sample</title></dc>\n")
        .payload("datastream-descMetadata", "<mods><titleInfo>Sample</titleInfo></mods>\n")
        .payload("datastream-MARC", "00714cam a2200205 a 4500\n")
        .payload("datastream-RELS-EXT", "<rdf:RDF></rdf:RDF>\n")
        .payload("sample.json", "{\"sample\": true}\n")
        .payload("notes/readme.txt", "Plain text notes for the sample bag.\n")
        .payload("image.png", b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR".to_vec())
        .payload("report.pdf", "%PDF-1.4\n%sample\n")
}

/// In-memory collaborators for one or more pipeline runs.
pub struct TestHarness {
    pub config: IngestConfig,
    pub store: Arc<MemoryMetadataStore>,
    /// Staging, receiving and the Virginia preservation bucket.
    pub east: Arc<MemoryObjectStore>,
    /// The Oregon preservation bucket.
    pub west: Arc<MemoryObjectStore>,
    pub catalog: Arc<MemoryCatalog>,
    scratch: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        init_tracing();
        let scratch = tempfile::tempdir().unwrap();

        let mut config = IngestConfig::default();
        config.scratch_dir = scratch.path().to_path_buf();
        config.staging.bucket = STAGING_BUCKET.to_string();
        config.staging.provider = "aws".to_string();
        config.staging.region = "us-east-1".to_string();
        config.targets = default_targets();
        config.batch_size = 5;
        config.manifest_lookup_delay = Duration::ZERO;

        Self {
            config,
            store: Arc::new(MemoryMetadataStore::new()),
            east: Arc::new(MemoryObjectStore::new("aws")),
            west: Arc::new(MemoryObjectStore::new("aws")),
            catalog: Arc::new(MemoryCatalog::new()),
            scratch,
        }
    }

    pub fn context(&self) -> IngestContext {
        let storage = StorageClients::new()
            .with("aws", "us-east-1", self.east.clone())
            .with("aws", "us-west-2", self.west.clone());
        IngestContext::new(
            self.config.clone(),
            self.store.clone(),
            storage,
            self.catalog.clone(),
        )
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.context())
    }

    /// Place the bag's tar in the receiving bucket.
    pub fn put_bag(&self, bag: &BagBuilder) {
        self.east
            .insert(RECEIVING_BUCKET, &tar_key(bag.name()), bag.build());
    }

    pub fn work_item(&self, id: i64) -> WorkItem {
        self.work_item_for(id, SAMPLE_BAG)
    }

    pub fn work_item_for(&self, id: i64, bag_name: &str) -> WorkItem {
        WorkItem {
            id,
            institution: INSTITUTION.to_string(),
            institution_id: INSTITUTION_ID,
            bucket: RECEIVING_BUCKET.to_string(),
            key: tar_key(bag_name),
            etag: String::new(),
            size: 0,
        }
    }

    /// Entries left in the scratch root.
    pub fn scratch_entries(&self) -> usize {
        std::fs::read_dir(self.scratch.path()).unwrap().count()
    }
}

pub fn tar_key(bag_name: &str) -> String {
    format!("{}.tar", bag_name)
}

/// Catalog identifier of a file in the sample bag.
pub fn file_identifier(path_in_bag: &str) -> String {
    format!("{}/{}/{}", INSTITUTION, SAMPLE_BAG, path_in_bag)
}
