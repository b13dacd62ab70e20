//! Provenance events recorded in the catalog
//!
//! Every event gets a UUID identifier when it is generated. The generated
//! list is persisted before any event is submitted, so a resubmission after a
//! crash sends the same identifiers and the catalog treats them as no-ops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const AGENT: &str = "https://github.com/datadir-lab/preserve";
const OBJECT: &str = "preserve-ingest";
const OUTCOME_SUCCESS: &str = "Success";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Creation,
    IdentifierAssignment,
    Ingestion,
    AccessAssignment,
    DigestCalculation,
    FixityCheck,
    Replication,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Creation => "creation",
            EventType::IdentifierAssignment => "identifier assignment",
            EventType::Ingestion => "ingestion",
            EventType::AccessAssignment => "access assignment",
            EventType::DigestCalculation => "message digest calculation",
            EventType::FixityCheck => "fixity check",
            EventType::Replication => "replication",
        }
    }
}

/// The two identifiers a new file receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    /// Object identifier + path in bag.
    BagPath,
    /// URL of the primary preservation copy.
    StorageUrl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PremisEvent {
    pub identifier: String,
    pub event_type: EventType,
    pub date_time: DateTime<Utc>,
    pub detail: String,
    pub outcome: String,
    pub outcome_detail: String,
    pub outcome_information: String,
    pub object: String,
    pub agent: String,
    pub intellectual_object_identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic_file_identifier: Option<String>,
    /// Catalog id, set once the catalog has accepted the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl PremisEvent {
    fn new(
        event_type: EventType,
        date_time: DateTime<Utc>,
        detail: impl Into<String>,
        outcome_detail: impl Into<String>,
        outcome_information: impl Into<String>,
    ) -> Self {
        Self {
            identifier: Uuid::new_v4().to_string(),
            event_type,
            date_time,
            detail: detail.into(),
            outcome: OUTCOME_SUCCESS.to_string(),
            outcome_detail: outcome_detail.into(),
            outcome_information: outcome_information.into(),
            object: OBJECT.to_string(),
            agent: AGENT.to_string(),
            intellectual_object_identifier: String::new(),
            generic_file_identifier: None,
            id: None,
        }
    }

    pub fn for_object(mut self, object_identifier: &str) -> Self {
        self.intellectual_object_identifier = object_identifier.to_string();
        self
    }

    pub fn for_file(mut self, object_identifier: &str, file_identifier: &str) -> Self {
        self.intellectual_object_identifier = object_identifier.to_string();
        self.generic_file_identifier = Some(file_identifier.to_string());
        self
    }

    pub fn is_recorded(&self) -> bool {
        self.id.is_some()
    }

    pub fn object_creation() -> Self {
        Self::new(
            EventType::Creation,
            Utc::now(),
            "Object created",
            "Intellectual object created",
            "Object created, files copied to preservation storage",
        )
    }

    pub fn object_ingestion(files_ingested: usize) -> Self {
        Self::new(
            EventType::Ingestion,
            Utc::now(),
            "Copied files to preservation storage",
            format!("{} files copied", files_ingested),
            "Put using ingest md5 and sha256 digests",
        )
    }

    pub fn object_identifier_assignment(object_identifier: &str) -> Self {
        Self::new(
            EventType::IdentifierAssignment,
            Utc::now(),
            format!("Assigned object identifier {}", object_identifier),
            object_identifier,
            "Institution identifier + tar file name",
        )
    }

    pub fn object_rights(access: &str) -> Self {
        Self::new(
            EventType::AccessAssignment,
            Utc::now(),
            "Assigned object access rights",
            access,
            format!("Set access to {}", access),
        )
    }

    pub fn file_ingestion(stored_at: DateTime<Utc>, md5: &str, uuid: &str) -> Self {
        Self::new(
            EventType::Ingestion,
            stored_at,
            format!("Completed copy to preservation storage ({})", uuid),
            format!("md5:{}", md5),
            "Put using md5 checksum",
        )
    }

    pub fn file_fixity_check(checked_at: DateTime<Utc>, algorithm: &str, digest: &str) -> Self {
        Self::new(
            EventType::FixityCheck,
            checked_at,
            "Fixity check against registered hash",
            format!("{}:{}", algorithm, digest),
            "Fixity matches",
        )
    }

    pub fn file_digest_calculation(calculated_at: DateTime<Utc>, algorithm: &str, digest: &str) -> Self {
        Self::new(
            EventType::DigestCalculation,
            calculated_at,
            "Calculated fixity value",
            format!("{}:{}", algorithm, digest),
            "Calculated fixity value",
        )
    }

    pub fn file_identifier_assignment(
        assigned_at: DateTime<Utc>,
        kind: IdentifierKind,
        identifier: &str,
    ) -> Self {
        let (detail, info) = match kind {
            IdentifierKind::BagPath => (
                "Assigned new institution.bag/path identifier",
                "Assigned bag/filepath identifier",
            ),
            IdentifierKind::StorageUrl => (
                "Assigned new storage URL identifier",
                "Assigned url identifier",
            ),
        };
        Self::new(EventType::IdentifierAssignment, assigned_at, detail, identifier, info)
    }

    pub fn file_replication(replicated_at: DateTime<Utc>, url: &str) -> Self {
        Self::new(
            EventType::Replication,
            replicated_at,
            "Copied to replication storage and assigned replication URL identifier",
            url,
            "Replicated to secondary storage",
        )
    }
}
