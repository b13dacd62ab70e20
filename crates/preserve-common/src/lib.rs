//! Preserve Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error types, digest utilities, and logging setup for the
//! preservation ingest workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`PreserveError`] with structured classification
//!   (`NotFound` vs. transient backend failures) so callers never match on
//!   message text
//! - **Checksums**: single-pass md5 + sha256 digesting through a fan-out writer
//! - **Logging**: `tracing` subscriber setup shared by every binary
//! - **Types**: checksum algorithms and sources
//!
//! # Example
//!
//! ```no_run
//! use preserve_common::checksum::IngestDigester;
//! use std::io::Write;
//!
//! fn digest(data: &[u8]) -> preserve_common::Result<()> {
//!     let mut digester = IngestDigester::new();
//!     digester.write_all(data)?;
//!     let digests = digester.finish();
//!     println!("md5={} sha256={}", digests.md5, digests.sha256);
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{PreserveError, Result};
pub use types::{ChecksumAlgorithm, ChecksumSource};
