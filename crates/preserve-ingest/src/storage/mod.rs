//! Object storage
//!
//! [`ObjectStore`] is the seam between the pipeline and S3-compatible
//! providers. Receiving, staging and preservation buckets are all reached
//! through it; [`StorageClients`] picks the client for a provider and region.

use crate::models::{IngestFile, IngestObject};
use async_trait::async_trait;
use preserve_common::{PreserveError, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncRead;

pub mod config;
pub mod memory;
pub mod s3;

pub use config::S3ProviderConfig;
pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Result of a stat call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size: u64,
    /// ETag without surrounding quotes.
    pub etag: String,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Options attached to a put or copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub storage_class: Option<String>,
}

impl PutOptions {
    /// Metadata stored with every staged and preserved copy of a file.
    ///
    /// A bag path with characters outside printable ASCII cannot travel in a
    /// metadata header as-is; it goes out URL-encoded as `bagpath-encoded`
    /// instead.
    pub fn for_file(object: &IngestObject, file: &IngestFile) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("institution".to_string(), object.institution.clone());
        metadata.insert("bag".to_string(), object.identifier());
        if file.path_in_bag.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
            metadata.insert("bagpath".to_string(), file.path_in_bag.clone());
        } else {
            metadata.insert(
                "bagpath-encoded".to_string(),
                urlencoding::encode(&file.path_in_bag).into_owned(),
            );
        }
        for checksum in file
            .checksums
            .iter()
            .filter(|c| c.source == preserve_common::ChecksumSource::Ingest)
        {
            metadata.insert(checksum.algorithm.to_string(), checksum.digest.clone());
        }

        let content_type = if file.file_format.is_empty() {
            None
        } else {
            Some(file.file_format.clone())
        };

        Self {
            content_type,
            metadata,
            storage_class: None,
        }
    }

    pub fn with_storage_class(mut self, storage_class: Option<String>) -> Self {
        self.storage_class = storage_class;
        self
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Provider name, e.g. `aws` or `wasabi`.
    fn provider(&self) -> &str;

    async fn get(&self, bucket: &str, key: &str) -> Result<ObjectReader>;

    /// Stream `reader` into `bucket/key`. `size` is the expected length.
    /// Returns the number of bytes written.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        reader: ObjectReader,
        size: u64,
        options: &PutOptions,
    ) -> Result<u64>;

    async fn put_file(&self, bucket: &str, key: &str, path: &Path, options: &PutOptions) -> Result<u64> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        self.put(bucket, key, Box::pin(file), size, options).await
    }

    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectInfo>;

    /// Server-side copy within this provider.
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        options: &PutOptions,
    ) -> Result<()>;

    /// Server-side copy of an object too large for a single copy call,
    /// assembled from ranged part copies.
    async fn compose(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        size: u64,
        options: &PutOptions,
    ) -> Result<()>;

    async fn remove(&self, bucket: &str, key: &str) -> Result<()>;

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
}

/// Object store clients by provider and region.
///
/// A client registered with an empty region serves every region of its
/// provider.
#[derive(Clone, Default)]
pub struct StorageClients {
    clients: HashMap<(String, String), Arc<dyn ObjectStore>>,
}

impl StorageClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        provider: impl Into<String>,
        region: impl Into<String>,
        client: Arc<dyn ObjectStore>,
    ) {
        self.clients
            .insert((provider.into(), region.into()), client);
    }

    pub fn with(
        mut self,
        provider: impl Into<String>,
        region: impl Into<String>,
        client: Arc<dyn ObjectStore>,
    ) -> Self {
        self.register(provider, region, client);
        self
    }

    pub fn client(&self, provider: &str, region: &str) -> Result<Arc<dyn ObjectStore>> {
        self.clients
            .get(&(provider.to_string(), region.to_string()))
            .or_else(|| self.clients.get(&(provider.to_string(), String::new())))
            .cloned()
            .ok_or_else(|| {
                PreserveError::Config(format!(
                    "No storage client for provider '{}' in region '{}'",
                    provider, region
                ))
            })
    }
}

/// `https://{host}/{bucket}/{key}`
pub fn object_url(host: &str, bucket: &str, key: &str) -> String {
    format!("https://{}/{}/{}", host, bucket, key)
}
