//! Pipeline stages
//!
//! Each stage takes its collaborators from an [`IngestContext`] at
//! construction, works on one WorkItem and reports a [`StageResult`]. Stages
//! hold no state between runs; whatever they learn is in the metadata store.

use crate::context::IngestContext;
use crate::framework::ApplyOutcome;
use crate::models::{IngestObject, ProcessingError};
use preserve_common::PreserveError;
use std::fmt;
use std::str::FromStr;

pub mod cleanup;
pub mod format_identifier;
pub mod metadata_gatherer;
pub mod preservation_uploader;
pub mod preservation_verifier;
pub mod recorder;
pub mod reingest_manager;
pub mod staging_uploader;

pub use cleanup::{bucket_unsafe_for_deletion, Cleanup};
pub use format_identifier::FormatIdentifier;
pub use metadata_gatherer::MetadataGatherer;
pub use preservation_uploader::PreservationUploader;
pub use preservation_verifier::PreservationVerifier;
pub use recorder::Recorder;
pub use reingest_manager::ReingestManager;
pub use staging_uploader::StagingUploader;

/// What a stage reports back to the pipeline driver.
#[derive(Debug, Default)]
pub struct StageResult {
    /// Records the stage processed successfully.
    pub count: usize,
    pub errors: Vec<ProcessingError>,
}

impl StageResult {
    pub fn new(count: usize, errors: Vec<ProcessingError>) -> Self {
        Self { count, errors }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_fatal_error(&self) -> bool {
        self.errors.iter().any(|e| e.is_fatal)
    }
}

impl From<ApplyOutcome> for StageResult {
    fn from(outcome: ApplyOutcome) -> Self {
        Self::new(outcome.count, outcome.errors)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    GatherMetadata,
    Reingest,
    StageFiles,
    IdentifyFormats,
    PreservationUpload,
    PreservationVerify,
    Record,
    Cleanup,
}

impl Stage {
    /// Every stage, in execution order.
    pub const ALL: [Stage; 8] = [
        Stage::GatherMetadata,
        Stage::Reingest,
        Stage::StageFiles,
        Stage::IdentifyFormats,
        Stage::PreservationUpload,
        Stage::PreservationVerify,
        Stage::Record,
        Stage::Cleanup,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::GatherMetadata => "gather-metadata",
            Stage::Reingest => "reingest",
            Stage::StageFiles => "stage-files",
            Stage::IdentifyFormats => "identify-formats",
            Stage::PreservationUpload => "preservation-upload",
            Stage::PreservationVerify => "preservation-verify",
            Stage::Record => "record",
            Stage::Cleanup => "cleanup",
        }
    }

    /// This stage and every one after it.
    pub fn and_after(self) -> &'static [Stage] {
        let index = Self::ALL.iter().position(|s| *s == self).unwrap_or(0);
        &Self::ALL[index..]
    }

    pub async fn run(
        self,
        ctx: &IngestContext,
        work_item_id: i64,
        object: &mut IngestObject,
    ) -> StageResult {
        let ctx = ctx.clone();
        match self {
            Stage::GatherMetadata => MetadataGatherer::new(ctx, work_item_id).run(object).await,
            Stage::Reingest => ReingestManager::new(ctx, work_item_id).run(object).await,
            Stage::StageFiles => StagingUploader::new(ctx, work_item_id).run(object).await,
            Stage::IdentifyFormats => FormatIdentifier::new(ctx, work_item_id).run(object).await,
            Stage::PreservationUpload => {
                PreservationUploader::new(ctx, work_item_id).run(object).await
            },
            Stage::PreservationVerify => {
                PreservationVerifier::new(ctx, work_item_id).run(object).await
            },
            Stage::Record => Recorder::new(ctx, work_item_id).run(object).await,
            Stage::Cleanup => Cleanup::new(ctx, work_item_id).run(object).await,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = PreserveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|s| s.name()).collect();
                PreserveError::Parse(format!(
                    "Unknown stage '{}', expected one of: {}",
                    s,
                    names.join(", ")
                ))
            })
    }
}
