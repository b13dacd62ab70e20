//! Metadata store: durable per-WorkItem state
//!
//! Records are keyed by `(work_item_id, identifier)`, with objects and files
//! in separate namespaces. Implementations must give read-your-writes
//! consistency for a single WorkItem; stages still treat a missing record
//! right after a save as transient and retry a bounded number of times.

use crate::models::{IngestFile, IngestObject};
use async_trait::async_trait;
use preserve_common::Result;

pub mod memory;
pub mod postgres;

pub use memory::MemoryMetadataStore;
pub use postgres::PgMetadataStore;

/// One page of file records.
#[derive(Debug, Clone, Default)]
pub struct FileBatch {
    pub files: Vec<IngestFile>,
    /// Offset of the next page, `None` once the listing is exhausted.
    pub next_offset: Option<u64>,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn object_get(&self, work_item_id: i64, identifier: &str) -> Result<Option<IngestObject>>;

    async fn object_save(&self, work_item_id: i64, object: &IngestObject) -> Result<()>;

    async fn object_delete(&self, work_item_id: i64, identifier: &str) -> Result<()>;

    async fn file_get(&self, work_item_id: i64, identifier: &str) -> Result<Option<IngestFile>>;

    async fn file_save(&self, work_item_id: i64, file: &IngestFile) -> Result<()>;

    async fn file_delete(&self, work_item_id: i64, identifier: &str) -> Result<()>;

    /// Files of a WorkItem ordered by identifier, `limit` at a time.
    async fn file_batch(&self, work_item_id: i64, offset: u64, limit: u64) -> Result<FileBatch>;

    async fn file_count(&self, work_item_id: i64) -> Result<u64>;

    /// Delete every record of a WorkItem. Returns the number removed.
    async fn work_item_delete(&self, work_item_id: i64) -> Result<u64>;
}
