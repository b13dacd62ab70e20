//! Catalog (registry) of preserved objects, files and events
//!
//! The catalog is the long-term record. The reingest check reads from it and
//! the recorder writes to it. Event identifiers are stable, so submitting an
//! event the catalog already holds is a no-op.

use crate::models::PremisEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use preserve_common::{ChecksumAlgorithm, Result};
use serde::{Deserialize, Serialize};

pub mod http;
pub mod memory;

pub use http::HttpCatalog;
pub use memory::MemoryCatalog;

/// State of an active (not deleted) catalog record.
pub const STATE_ACTIVE: &str = "A";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub identifier: String,
    pub bag_name: String,
    pub institution_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub access: String,
    #[serde(default)]
    pub alt_identifier: String,
    #[serde(default)]
    pub bag_group_identifier: String,
    #[serde(default)]
    pub source_organization: String,
    #[serde(default)]
    pub bagit_profile_identifier: String,
    pub storage_option: String,
    #[serde(default)]
    pub etag: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogChecksum {
    pub algorithm: ChecksumAlgorithm,
    pub digest: String,
    pub date_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStorageRecord {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intellectual_object_id: Option<i64>,
    pub institution_id: i64,
    pub uuid: String,
    pub size: u64,
    #[serde(default)]
    pub file_format: String,
    pub storage_option: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub checksums: Vec<CatalogChecksum>,
    #[serde(default)]
    pub storage_records: Vec<CatalogStorageRecord>,
    #[serde(default)]
    pub premis_events: Vec<PremisEvent>,
}

impl CatalogFile {
    pub fn is_active(&self) -> bool {
        self.state == STATE_ACTIVE
    }
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn object_get(&self, identifier: &str) -> Result<Option<CatalogObject>>;

    /// Create the object when it has no id, update it otherwise.
    async fn object_save(&self, object: &CatalogObject) -> Result<CatalogObject>;

    async fn file_get(&self, identifier: &str) -> Result<Option<CatalogFile>>;

    /// Create or update a file together with its new checksums, storage
    /// records and events.
    async fn file_save(&self, file: &CatalogFile) -> Result<CatalogFile>;

    /// Every checksum ever recorded for a file, oldest first.
    async fn checksums(&self, file_identifier: &str) -> Result<Vec<CatalogChecksum>>;

    async fn storage_records(&self, file_identifier: &str) -> Result<Vec<CatalogStorageRecord>>;

    /// Record an event. An identifier the catalog already holds is accepted
    /// without creating a duplicate.
    async fn event_save(&self, event: &PremisEvent) -> Result<PremisEvent>;
}
