use super::{ObjectInfo, ObjectReader, ObjectStore, PutOptions};
use async_trait::async_trait;
use preserve_common::{PreserveError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::io::AsyncReadExt;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    options: PutOptions,
}

/// Object store held in memory, used by tests and local runs.
///
/// Counts puts and copies so callers can check that already-preserved files
/// are not sent again.
pub struct MemoryObjectStore {
    provider: String,
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    puts: AtomicUsize,
    copies: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            objects: Mutex::new(BTreeMap::new()),
            puts: AtomicUsize::new(0),
            copies: AtomicUsize::new(0),
        }
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<(String, String), StoredObject>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn not_found(bucket: &str, key: &str) -> PreserveError {
        PreserveError::NotFound(format!("{}/{}", bucket, key))
    }

    /// Store bytes directly, bypassing the put counter.
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Vec<u8>>) {
        self.objects().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: data.into(),
                options: PutOptions::default(),
            },
        );
    }

    pub fn bytes(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
    }

    pub fn metadata(&self, bucket: &str, key: &str) -> Option<BTreeMap<String, String>> {
        self.objects()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.options.metadata.clone())
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn copy_count(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }

    fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        options: &PutOptions,
    ) -> Result<()> {
        let mut objects = self.objects();
        let data = objects
            .get(&(src_bucket.to_string(), src_key.to_string()))
            .map(|o| o.data.clone())
            .ok_or_else(|| Self::not_found(src_bucket, src_key))?;
        objects.insert(
            (dst_bucket.to_string(), dst_key.to_string()),
            StoredObject {
                data,
                options: options.clone(),
            },
        );
        self.copies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<ObjectReader> {
        let data = self
            .bytes(bucket, key)
            .ok_or_else(|| Self::not_found(bucket, key))?;
        Ok(Box::pin(std::io::Cursor::new(data)))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        mut reader: ObjectReader,
        _size: u64,
        options: &PutOptions,
    ) -> Result<u64> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        let written = data.len() as u64;
        self.objects().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                options: options.clone(),
            },
        );
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(written)
    }

    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectInfo> {
        let objects = self.objects();
        let object = objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| Self::not_found(bucket, key))?;
        Ok(ObjectInfo {
            size: object.data.len() as u64,
            etag: format!("{:x}", md5::compute(&object.data)),
            content_type: object.options.content_type.clone(),
            metadata: object
                .options
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<HashMap<_, _>>(),
        })
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        options: &PutOptions,
    ) -> Result<()> {
        self.copy_object(src_bucket, src_key, dst_bucket, dst_key, options)
    }

    async fn compose(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        _size: u64,
        options: &PutOptions,
    ) -> Result<()> {
        self.copy_object(src_bucket, src_key, dst_bucket, dst_key, options)
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<()> {
        self.objects()
            .remove(&(bucket.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(bucket, key))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .keys(bucket)
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}
