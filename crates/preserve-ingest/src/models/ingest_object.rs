use crate::bagit::{self, APTRUST_INFO_TXT, BAG_INFO_TXT};
use crate::models::{PremisEvent, Tag, WorkItem};
use chrono::{DateTime, Utc};
use preserve_common::Result;
use serde::{Deserialize, Serialize};

pub const DEFAULT_STORAGE_OPTION: &str = "Standard";
pub const DEFAULT_ACCESS: &str = "Institution";
const TAR_SERIALIZATION: &str = "application/tar";

/// One submitted package and everything learned about it so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestObject {
    /// Catalog id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub institution: String,
    pub institution_id: i64,
    pub bag_name: String,
    pub s3_bucket: String,
    pub s3_key: String,
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub serialization: String,
    #[serde(default)]
    pub file_count: usize,
    #[serde(default)]
    pub storage_option: String,
    #[serde(default)]
    pub has_fetch_txt: bool,
    #[serde(default)]
    pub is_reingest: bool,

    #[serde(default)]
    pub manifests: Vec<String>,
    #[serde(default)]
    pub tag_manifests: Vec<String>,
    #[serde(default)]
    pub parsable_tag_files: Vec<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub premis_events: Vec<PremisEvent>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copied_to_staging_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_to_catalog_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_from_receiving_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub should_delete_from_receiving: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl IngestObject {
    pub fn from_work_item(item: &WorkItem) -> Result<Self> {
        Ok(Self {
            id: None,
            institution: item.institution.clone(),
            institution_id: item.institution_id,
            bag_name: bagit::clean_bag_name(&item.key)?,
            s3_bucket: item.bucket.clone(),
            s3_key: item.key.clone(),
            etag: item.etag.clone(),
            size: item.size,
            serialization: TAR_SERIALIZATION.to_string(),
            file_count: 0,
            storage_option: String::new(),
            has_fetch_txt: false,
            is_reingest: false,
            manifests: Vec::new(),
            tag_manifests: Vec::new(),
            parsable_tag_files: Vec::new(),
            tags: Vec::new(),
            premis_events: Vec::new(),
            copied_to_staging_at: None,
            saved_to_catalog_at: None,
            deleted_from_receiving_at: None,
            should_delete_from_receiving: false,
            error_message: None,
        })
    }

    /// `institution/bag_name`
    pub fn identifier(&self) -> String {
        format!("{}/{}", self.institution, self.bag_name)
    }

    /// First value of `label` in `tag_file`, ignoring blank values.
    pub fn tag_value(&self, tag_file: &str, label: &str) -> Option<&str> {
        self.tags
            .iter()
            .filter(|t| t.tag_file == tag_file && t.label.eq_ignore_ascii_case(label))
            .map(|t| t.value.trim())
            .find(|v| !v.is_empty())
    }

    fn first_tag_value(&self, candidates: &[(&str, &str)]) -> Option<&str> {
        candidates
            .iter()
            .find_map(|(file, label)| self.tag_value(file, label))
    }

    /// Storage tier requested by the depositor, if any.
    pub fn requested_storage_option(&self) -> Option<&str> {
        self.first_tag_value(&[
            (APTRUST_INFO_TXT, "Storage-Option"),
            (BAG_INFO_TXT, "Storage-Option"),
        ])
    }

    pub fn access(&self) -> &str {
        self.first_tag_value(&[(APTRUST_INFO_TXT, "Access"), (BAG_INFO_TXT, "Access")])
            .unwrap_or(DEFAULT_ACCESS)
    }

    pub fn title(&self) -> &str {
        self.first_tag_value(&[(APTRUST_INFO_TXT, "Title"), (BAG_INFO_TXT, "Title")])
            .unwrap_or("")
    }

    pub fn description(&self) -> &str {
        self.first_tag_value(&[
            (APTRUST_INFO_TXT, "Description"),
            (BAG_INFO_TXT, "Internal-Sender-Description"),
            (BAG_INFO_TXT, "External-Description"),
        ])
        .unwrap_or("")
    }

    pub fn alt_identifier(&self) -> &str {
        self.tag_value(BAG_INFO_TXT, "Internal-Sender-Identifier")
            .unwrap_or("")
    }

    pub fn bag_group_identifier(&self) -> &str {
        self.tag_value(BAG_INFO_TXT, "Bag-Group-Identifier")
            .unwrap_or("")
    }

    pub fn source_organization(&self) -> &str {
        self.tag_value(BAG_INFO_TXT, "Source-Organization")
            .unwrap_or("")
    }

    pub fn bagit_profile_identifier(&self) -> &str {
        self.tag_value(BAG_INFO_TXT, "BagIt-Profile-Identifier")
            .unwrap_or("")
    }

    /// Build the object-level provenance events for this ingest.
    ///
    /// Creation and identifier assignment happen only on the first ingest of
    /// an identifier; ingestion and rights assignment happen every time.
    pub fn build_ingest_events(&self, files_ingested: usize) -> Vec<PremisEvent> {
        let identifier = self.identifier();
        let mut events = Vec::with_capacity(4);
        if !self.is_reingest {
            events.push(PremisEvent::object_creation());
            events.push(PremisEvent::object_identifier_assignment(&identifier));
        }
        events.push(PremisEvent::object_ingestion(files_ingested));
        events.push(PremisEvent::object_rights(self.access()));
        events
            .into_iter()
            .map(|e| e.for_object(&identifier))
            .collect()
    }
}
