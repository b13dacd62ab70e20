use crate::bagit::{self, FileKind};
use crate::models::{IngestChecksum, PremisEvent, StorageRecord};
use chrono::{DateTime, Utc};
use preserve_common::{ChecksumAlgorithm, ChecksumSource};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_true() -> bool {
    true
}

/// Everything the pipeline knows about one regular file inside a bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestFile {
    pub object_identifier: String,
    pub path_in_bag: String,
    #[serde(default)]
    pub size: u64,
    pub uuid: String,
    #[serde(default)]
    pub checksums: Vec<IngestChecksum>,
    #[serde(default)]
    pub storage_records: Vec<StorageRecord>,

    #[serde(default)]
    pub file_format: String,
    #[serde(default)]
    pub format_identified_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_identified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub format_match_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_modified: Option<DateTime<Utc>>,

    /// False once the reingest check found this exact file already
    /// preserved.
    #[serde(default = "default_true")]
    pub needs_save: bool,
    #[serde(default)]
    pub is_reingest: bool,

    /// Catalog ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub institution_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intellectual_object_id: Option<i64>,

    #[serde(default)]
    pub storage_option: String,
    /// Storage URLs the catalog already has for this file.
    #[serde(default)]
    pub registry_urls: Vec<String>,
    #[serde(default)]
    pub premis_events: Vec<PremisEvent>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copied_to_staging_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_to_catalog_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl IngestFile {
    /// A new file record with a freshly minted UUID.
    pub fn new(object_identifier: impl Into<String>, path_in_bag: impl Into<String>) -> Self {
        Self {
            object_identifier: object_identifier.into(),
            path_in_bag: path_in_bag.into(),
            size: 0,
            uuid: Uuid::new_v4().to_string(),
            checksums: Vec::new(),
            storage_records: Vec::new(),
            file_format: String::new(),
            format_identified_by: String::new(),
            format_identified_at: None,
            format_match_type: String::new(),
            file_modified: None,
            needs_save: true,
            is_reingest: false,
            id: None,
            institution_id: 0,
            intellectual_object_id: None,
            storage_option: String::new(),
            registry_urls: Vec::new(),
            premis_events: Vec::new(),
            copied_to_staging_at: None,
            saved_to_catalog_at: None,
            error_message: None,
        }
    }

    /// `institution/bag_name/path/in/bag`
    pub fn identifier(&self) -> String {
        format!("{}/{}", self.object_identifier, self.path_in_bag)
    }

    pub fn file_type(&self) -> FileKind {
        bagit::file_kind(&self.path_in_bag)
    }

    pub fn is_parsable_tag_file(&self) -> bool {
        bagit::is_parsable_tag_file(&self.path_in_bag)
    }

    pub fn has_preservable_name(&self) -> bool {
        bagit::has_preservable_name(&self.path_in_bag)
    }

    /// Insert or overwrite the checksum with the same source and algorithm.
    pub fn set_checksum(&mut self, checksum: IngestChecksum) {
        match self
            .checksums
            .iter_mut()
            .find(|c| c.source == checksum.source && c.algorithm == checksum.algorithm)
        {
            Some(existing) => *existing = checksum,
            None => self.checksums.push(checksum),
        }
    }

    pub fn checksum(
        &self,
        source: ChecksumSource,
        algorithm: ChecksumAlgorithm,
    ) -> Option<&IngestChecksum> {
        self.checksums
            .iter()
            .find(|c| c.source == source && c.algorithm == algorithm)
    }

    /// Insert or replace the record for the same provider and bucket.
    pub fn set_storage_record(&mut self, record: StorageRecord) {
        match self
            .storage_records
            .iter_mut()
            .find(|r| r.is_at(&record.provider, &record.bucket))
        {
            Some(existing) => *existing = record,
            None => self.storage_records.push(record),
        }
    }

    pub fn storage_record(&self, provider: &str, bucket: &str) -> Option<&StorageRecord> {
        self.storage_records.iter().find(|r| r.is_at(provider, bucket))
    }

    /// True when this file still has to be copied to `provider`/`bucket`.
    pub fn needs_save_at(&self, provider: &str, bucket: &str) -> bool {
        self.needs_save
            && self.has_preservable_name()
            && !self
                .storage_record(provider, bucket)
                .is_some_and(|r| r.stored_at.is_some())
    }

    pub fn has_registry_url(&self, url: &str) -> bool {
        self.registry_urls.iter().any(|u| u == url)
    }

    /// True when every placement in `targets` is stored and verified.
    pub fn is_fully_preserved<'a, I>(&self, targets: I) -> bool
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        targets.into_iter().all(|(provider, bucket)| {
            self.storage_record(provider, bucket)
                .is_some_and(|r| r.stored_at.is_some() && r.verified_at.is_some())
        })
    }

    /// Key of the staged copy: `{work_item_id}/{uuid}`.
    pub fn staging_key(&self, work_item_id: i64) -> String {
        format!("{}/{}", work_item_id, self.uuid)
    }
}
