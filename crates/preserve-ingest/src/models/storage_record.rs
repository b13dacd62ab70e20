use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A placement of one file in one preservation bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRecord {
    pub provider: String,
    pub bucket: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StorageRecord {
    pub fn new(provider: impl Into<String>, bucket: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            bucket: bucket.into(),
            url: url.into(),
            stored_at: None,
            verified_at: None,
            size: 0,
            etag: None,
            error: None,
        }
    }

    pub fn is_at(&self, provider: &str, bucket: &str) -> bool {
        self.provider == provider && self.bucket == bucket
    }
}
