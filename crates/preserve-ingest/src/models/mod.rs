//! Durable records of the ingest pipeline
//!
//! Everything a stage learns about a package is written to one of these
//! records and persisted to the metadata store, so the next stage (possibly on
//! another host) can pick up where the previous one stopped.

pub mod checksum;
pub mod ingest_file;
pub mod ingest_object;
pub mod premis_event;
pub mod processing_error;
pub mod storage_record;
pub mod tag;
pub mod work_item;

pub use checksum::IngestChecksum;
pub use ingest_file::IngestFile;
pub use ingest_object::IngestObject;
pub use premis_event::{EventType, IdentifierKind, PremisEvent};
pub use processing_error::ProcessingError;
pub use storage_record::StorageRecord;
pub use tag::Tag;
pub use work_item::WorkItem;
