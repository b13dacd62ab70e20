//! Pipeline driver
//!
//! Runs the stages of one WorkItem in order and stops at the first stage that
//! reports any error. Durable state is left as it is so a later run can pick
//! up from the failed stage.

use crate::context::IngestContext;
use crate::models::{IngestObject, ProcessingError, WorkItem};
use crate::stages::Stage;
use preserve_common::Result;
use tracing::{error, info, instrument};

/// Outcome of one pipeline run.
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub completed: Vec<Stage>,
    /// First stage that reported errors.
    pub stopped_at: Option<Stage>,
    pub errors: Vec<ProcessingError>,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.stopped_at.is_none()
    }

    pub fn has_fatal_error(&self) -> bool {
        self.errors.iter().any(|e| e.is_fatal)
    }
}

pub struct Pipeline {
    ctx: IngestContext,
}

impl Pipeline {
    pub fn new(ctx: IngestContext) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, work_item: &WorkItem) -> Result<PipelineReport> {
        self.run_stages(work_item, &Stage::ALL).await
    }

    /// Resume at `stage`.
    pub async fn run_from(&self, work_item: &WorkItem, stage: Stage) -> Result<PipelineReport> {
        self.run_stages(work_item, stage.and_after()).await
    }

    #[instrument(skip(self, work_item, stages), fields(work_item_id = work_item.id))]
    pub async fn run_stages(&self, work_item: &WorkItem, stages: &[Stage]) -> Result<PipelineReport> {
        let mut object = self.load_object(work_item).await?;
        let mut report = PipelineReport::default();

        for &stage in stages {
            info!(stage = %stage, object = %object.identifier(), "Starting stage");
            let result = stage.run(&self.ctx, work_item.id, &mut object).await;

            if !result.is_ok() {
                for e in &result.errors {
                    error!(
                        stage = %stage,
                        work_item_id = e.work_item_id,
                        identifier = %e.identifier,
                        fatal = e.is_fatal,
                        source = %e.source,
                        "{}",
                        e.message
                    );
                }
                error!(
                    stage = %stage,
                    errors = result.errors.len(),
                    fatal = result.has_fatal_error(),
                    "Stage failed, stopping"
                );
                report.stopped_at = Some(stage);
                report.errors = result.errors;
                return Ok(report);
            }

            info!(stage = %stage, count = result.count, "Stage complete");
            report.completed.push(stage);
        }
        Ok(report)
    }

    /// The persisted object for this WorkItem, or a fresh one.
    async fn load_object(&self, work_item: &WorkItem) -> Result<IngestObject> {
        let fresh = IngestObject::from_work_item(work_item)?;
        Ok(self
            .ctx
            .store
            .object_get(work_item.id, &fresh.identifier())
            .await?
            .unwrap_or(fresh))
    }
}
