use serde::{Deserialize, Serialize};

/// The unit of work handed to the pipeline: one tarred bag sitting in a
/// receiving bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: i64,
    /// Institution identifier, e.g. `example.edu`.
    pub institution: String,
    pub institution_id: i64,
    pub bucket: String,
    pub key: String,
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub size: u64,
}
