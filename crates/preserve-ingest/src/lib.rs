//! Preserve Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Moves a tarred BagIt bag from a depositor's receiving bucket into
//! long-term preservation storage and registers it in the catalog.
//!
//! # Stages
//!
//! - **Gather metadata**: scan the tar, digest every file, parse manifests and tags
//! - **Reingest check**: compare against what the catalog already holds
//! - **Stage files**: unpack each file into the staging bucket
//! - **Identify formats**: content sniffing with an extension fallback
//! - **Preservation upload / verify**: copy to every target of the storage tier
//! - **Record**: register object, files and PREMIS events in the catalog
//! - **Cleanup**: remove staged copies, work records and the original tar
//!
//! Each stage persists everything it learns in a [`store::MetadataStore`], so
//! a failed WorkItem can be resumed at the failed stage.
//!
//! # Example
//!
//! ```no_run
//! use preserve_ingest::{IngestConfig, IngestContext, Pipeline};
//! use preserve_ingest::models::WorkItem;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = IngestContext::from_config(IngestConfig::from_env()?).await?;
//!     let item = WorkItem {
//!         id: 1,
//!         institution: "example.edu".into(),
//!         institution_id: 7,
//!         bucket: "receiving.example.edu".into(),
//!         key: "example.edu.sample_good.tar".into(),
//!         etag: String::new(),
//!         size: 0,
//!     };
//!     let report = Pipeline::new(ctx).run(&item).await?;
//!     println!("success: {}", report.is_success());
//!     Ok(())
//! }
//! ```

pub mod bagit;
pub mod catalog;
pub mod config;
pub mod context;
pub mod format;
pub mod framework;
pub mod models;
pub mod pipeline;
pub mod scanner;
pub mod stages;
pub mod storage;
pub mod store;

pub use config::IngestConfig;
pub use context::IngestContext;
pub use pipeline::{Pipeline, PipelineReport};
pub use stages::{Stage, StageResult};
