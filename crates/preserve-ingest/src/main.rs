//! Preserve Ingest - moves tarred bags into preservation storage

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use preserve_common::logging::{init_logging, LogConfig, LogLevel};
use preserve_ingest::models::WorkItem;
use preserve_ingest::{IngestConfig, IngestContext, Pipeline, PipelineReport, Stage};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "preserve-ingest")]
#[command(author, version, about = "Ingest tarred BagIt bags into preservation storage")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline for one WorkItem
    Run {
        #[command(flatten)]
        item: WorkItemArgs,

        /// Resume at this stage instead of starting from the beginning
        #[arg(long)]
        from_stage: Option<Stage>,
    },

    /// Run a single stage for one WorkItem
    Stage {
        /// Stage name, e.g. `stage-files`
        stage: Stage,

        #[command(flatten)]
        item: WorkItemArgs,
    },
}

#[derive(Args, Debug)]
struct WorkItemArgs {
    #[arg(long)]
    work_item_id: i64,

    /// Institution identifier, e.g. example.edu
    #[arg(long)]
    institution: String,

    #[arg(long)]
    institution_id: i64,

    /// Receiving bucket holding the tar
    #[arg(long)]
    bucket: String,

    /// Key of the tar in the receiving bucket
    #[arg(long)]
    key: String,

    #[arg(long, default_value = "")]
    etag: String,

    #[arg(long, default_value_t = 0)]
    size: u64,
}

impl From<WorkItemArgs> for WorkItem {
    fn from(args: WorkItemArgs) -> Self {
        WorkItem {
            id: args.work_item_id,
            institution: args.institution,
            institution_id: args.institution_id,
            bucket: args.bucket,
            key: args.key,
            etag: args.etag,
            size: args.size,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("preserve-ingest")
        .build()
        .merge_env()?;

    init_logging(&log_config)?;

    let config = IngestConfig::from_env()?;
    let pipeline = Pipeline::new(IngestContext::from_config(config).await?);

    let report = match cli.command {
        Command::Run { item, from_stage } => {
            let item = WorkItem::from(item);
            info!(work_item_id = item.id, key = %item.key, "Starting ingest");
            match from_stage {
                Some(stage) => pipeline.run_from(&item, stage).await?,
                None => pipeline.run(&item).await?,
            }
        },
        Command::Stage { stage, item } => {
            let item = WorkItem::from(item);
            info!(work_item_id = item.id, stage = %stage, "Running single stage");
            pipeline.run_stages(&item, &[stage]).await?
        },
    };

    finish(report)
}

fn finish(report: PipelineReport) -> Result<()> {
    match report.stopped_at {
        None => {
            info!(stages = report.completed.len(), "Ingest complete");
            Ok(())
        },
        Some(stage) => {
            error!(
                stage = %stage,
                errors = report.errors.len(),
                fatal = report.has_fatal_error(),
                "Ingest stopped"
            );
            if report.has_fatal_error() {
                bail!("Stage {} failed with a fatal error", stage);
            }
            bail!("Stage {} failed; retry from this stage", stage);
        },
    }
}
