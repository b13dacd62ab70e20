//! Second pass over the tar: copy each file into the staging bucket under
//! `{work_item_id}/{uuid}`.

use super::StageResult;
use crate::bagit;
use crate::context::IngestContext;
use crate::framework::ErrorLog;
use crate::models::{IngestObject, ProcessingError};
use crate::storage::{ObjectReader, ObjectStore, PutOptions};
use bytes::Bytes;
use chrono::Utc;
use preserve_common::{PreserveError, Result};
use std::io::{self, Read};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, info, instrument};

const CHUNK_SIZE: usize = 256 * 1024;

/// Chunks in flight per entry.
const CHUNK_CHANNEL_CAPACITY: usize = 8;

const MAX_ERRORS: usize = 30;

/// One tar entry on its way from the blocking reader to the uploader.
/// Dropping `body` tells the reader to skip the rest of the entry.
struct StagedEntry {
    path_in_bag: String,
    size: u64,
    body: mpsc::Receiver<io::Result<Bytes>>,
}

pub struct StagingUploader {
    ctx: IngestContext,
    work_item_id: i64,
}

impl StagingUploader {
    pub fn new(ctx: IngestContext, work_item_id: i64) -> Self {
        Self { ctx, work_item_id }
    }

    #[instrument(skip(self, object), fields(work_item_id = self.work_item_id, object = %object.identifier()))]
    pub async fn run(&self, object: &mut IngestObject) -> StageResult {
        let errors = ErrorLog::with_cap(MAX_ERRORS);
        let identifier = object.identifier();

        let clients = match (self.ctx.receiving_client(), self.ctx.staging_client()) {
            (Ok(receiving), Ok(staging)) => Ok((receiving, staging)),
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        let (receiving, staging) = match clients {
            Ok(clients) => clients,
            Err(e) => {
                errors.push(ProcessingError::from_error(self.work_item_id, &identifier, &e));
                return StageResult::new(0, errors.into_errors());
            },
        };

        let reader = match receiving.get(&object.s3_bucket, &object.s3_key).await {
            Ok(reader) => reader,
            Err(e) if e.is_not_found() => {
                errors.push(ProcessingError::fatal(
                    self.work_item_id,
                    &identifier,
                    format!("Source object {}/{} does not exist", object.s3_bucket, object.s3_key),
                ));
                return StageResult::new(0, errors.into_errors());
            },
            Err(e) => {
                errors.push(ProcessingError::from_error(self.work_item_id, &identifier, &e));
                return StageResult::new(0, errors.into_errors());
            },
        };

        let (tx, mut rx) = mpsc::channel::<StagedEntry>(1);
        let bridge = SyncIoBridge::new(reader);
        let read_tar = tokio::task::spawn_blocking(move || stream_entries(bridge, tx));

        let mut count = 0;
        while let Some(entry) = rx.recv().await {
            match self.stage_entry(object, staging.as_ref(), entry).await {
                Ok(true) => count += 1,
                Ok(false) => {},
                Err(error) => {
                    let fatal = error.is_fatal;
                    errors.push(error);
                    if fatal || errors.total() > MAX_ERRORS {
                        break;
                    }
                },
            }
        }
        drop(rx);

        match read_tar.await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => errors.push(ProcessingError::fatal(self.work_item_id, &identifier, e.to_string())),
            Err(e) => errors.push(ProcessingError::transient(
                self.work_item_id,
                &identifier,
                format!("Tar reader task failed: {}", e),
            )),
        }

        let errors = errors.into_errors();
        if errors.is_empty() {
            object.copied_to_staging_at = Some(Utc::now());
            if let Err(e) = self.ctx.store.object_save(self.work_item_id, object).await {
                return StageResult::new(
                    count,
                    vec![ProcessingError::from_error(self.work_item_id, &identifier, &e)],
                );
            }
        }
        info!(staged = count, "Copied files to staging");
        StageResult::new(count, errors)
    }

    /// Returns `Ok(false)` when the entry did not need staging.
    async fn stage_entry(
        &self,
        object: &IngestObject,
        staging: &dyn ObjectStore,
        entry: StagedEntry,
    ) -> std::result::Result<bool, ProcessingError> {
        let identifier = format!("{}/{}", object.identifier(), entry.path_in_bag);
        let mut file = match self.ctx.store.file_get(self.work_item_id, &identifier).await {
            Ok(Some(file)) => file,
            Ok(None) => {
                return Err(ProcessingError::fatal(
                    self.work_item_id,
                    &identifier,
                    "Tar entry has no file record",
                ))
            },
            Err(e) => return Err(ProcessingError::from_error(self.work_item_id, &identifier, &e)),
        };

        if file.copied_to_staging_at.is_some() || !file.needs_save || !file.has_preservable_name() {
            debug!(identifier = %identifier, "Skipping staging");
            return Ok(false);
        }

        let key = file.staging_key(self.work_item_id);
        let body: ObjectReader = Box::pin(StreamReader::new(ReceiverStream::new(entry.body)));
        let options = PutOptions::for_file(object, &file);
        let written = staging
            .put(&self.ctx.config.staging.bucket, &key, body, entry.size, &options)
            .await
            .map_err(|e| ProcessingError::from_error(self.work_item_id, &identifier, &e))?;
        if written != file.size {
            return Err(ProcessingError::transient(
                self.work_item_id,
                &identifier,
                format!("Staged {} of {} bytes", written, file.size),
            ));
        }

        file.copied_to_staging_at = Some(Utc::now());
        self.ctx
            .store
            .file_save(self.work_item_id, &file)
            .await
            .map_err(|e| ProcessingError::from_error(self.work_item_id, &identifier, &e))?;
        Ok(true)
    }
}

/// Runs on a blocking thread. Sends each regular entry and then its bytes,
/// stopping quietly when the receiving side has gone away.
fn stream_entries<R: Read>(reader: R, tx: mpsc::Sender<StagedEntry>) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    let mut buf = vec![0u8; CHUNK_SIZE];
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let tar_path = entry.path()?.to_string_lossy().into_owned();
        let path_in_bag = bagit::tar_path_to_bag_path(&tar_path)?;
        let size = entry.header().size()?;

        let (body_tx, body_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let staged = StagedEntry {
            path_in_bag,
            size,
            body: body_rx,
        };
        if tx.blocking_send(staged).is_err() {
            return Ok(());
        }

        loop {
            match entry.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if body_tx
                        .blocking_send(Ok(Bytes::copy_from_slice(&buf[..n])))
                        .is_err()
                    {
                        break;
                    }
                },
                Err(e) => {
                    let message = e.to_string();
                    let _ = body_tx.blocking_send(Err(e));
                    return Err(PreserveError::Io(io::Error::other(message)));
                },
            }
        }
    }
    Ok(())
}
