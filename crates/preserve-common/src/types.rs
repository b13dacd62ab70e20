//! Common types used across the ingest workspace

use serde::{Deserialize, Serialize};

/// Digest algorithm of a checksum.
///
/// Only md5 and sha256 are computed at ingest; sha1 and sha512 can still
/// arrive through bag manifests or from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    /// Strongest first. Used when comparing a new ingest against the catalog.
    pub const PREFERRED: [ChecksumAlgorithm; 3] = [
        ChecksumAlgorithm::Sha512,
        ChecksumAlgorithm::Sha256,
        ChecksumAlgorithm::Md5,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }
}

impl std::str::FromStr for ChecksumAlgorithm {
    type Err = crate::PreserveError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha1" => Ok(ChecksumAlgorithm::Sha1),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            _ => Err(crate::PreserveError::Parse(format!(
                "Unsupported checksum algorithm: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a checksum value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumSource {
    /// Computed by the scanner while reading the tar.
    Ingest,
    /// Listed in a payload manifest.
    PayloadManifest,
    /// Listed in a tag manifest.
    TagManifest,
    /// Previously recorded in the catalog.
    Catalog,
}

impl ChecksumSource {
    /// True for the two sources that come from the bag's own manifests.
    pub fn is_manifest(&self) -> bool {
        matches!(
            self,
            ChecksumSource::PayloadManifest | ChecksumSource::TagManifest
        )
    }
}

impl std::fmt::Display for ChecksumSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumSource::Ingest => write!(f, "ingest"),
            ChecksumSource::PayloadManifest => write!(f, "payload-manifest"),
            ChecksumSource::TagManifest => write!(f, "tag-manifest"),
            ChecksumSource::Catalog => write!(f, "catalog"),
        }
    }
}
