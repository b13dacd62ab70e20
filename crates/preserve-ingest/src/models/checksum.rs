use chrono::{DateTime, Utc};
use preserve_common::{ChecksumAlgorithm, ChecksumSource};
use serde::{Deserialize, Serialize};

/// One digest of one file, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestChecksum {
    pub algorithm: ChecksumAlgorithm,
    pub digest: String,
    pub date_time: DateTime<Utc>,
    pub source: ChecksumSource,
}

impl IngestChecksum {
    pub fn new(
        algorithm: ChecksumAlgorithm,
        digest: impl Into<String>,
        source: ChecksumSource,
    ) -> Self {
        Self {
            algorithm,
            digest: digest.into(),
            date_time: Utc::now(),
            source,
        }
    }
}
