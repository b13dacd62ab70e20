//! First stage: scan the bag and record what is in it.

use super::StageResult;
use crate::bagit::{self, FileKind};
use crate::context::IngestContext;
use crate::framework::ErrorLog;
use crate::models::ingest_object::DEFAULT_STORAGE_OPTION;
use crate::models::{IngestChecksum, IngestFile, IngestObject, ProcessingError};
use crate::scanner::TarredBagScanner;
use crate::storage::{ObjectReader, PutOptions};
use preserve_common::{ChecksumSource, PreserveError, Result};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info, instrument, warn};

/// Scanned records buffered between the tar thread and the store writer.
const SCAN_CHANNEL_CAPACITY: usize = 32;

/// Record saves stop once more errors than this have been logged.
const MAX_ERRORS: usize = 100;

type BridgedScanner = TarredBagScanner<SyncIoBridge<ObjectReader>>;

pub struct MetadataGatherer {
    ctx: IngestContext,
    work_item_id: i64,
}

impl MetadataGatherer {
    pub fn new(ctx: IngestContext, work_item_id: i64) -> Self {
        Self { ctx, work_item_id }
    }

    #[instrument(skip(self, object), fields(work_item_id = self.work_item_id, object = %object.identifier()))]
    pub async fn run(&self, object: &mut IngestObject) -> StageResult {
        let errors = ErrorLog::with_cap(MAX_ERRORS);
        let identifier = object.identifier();

        let reader = match self.source_reader(object).await {
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

        let scanned = self.scan(reader, object, &errors).await;
        if budget_exceeded(&errors) {
            return StageResult::new(0, errors.into_errors());
        }
        let (scanner, count) = match scanned {
            Ok(scanned) => scanned,
            Err(e) => {
                errors.push(ProcessingError::fatal(self.work_item_id, &identifier, e.to_string()));
                return StageResult::new(0, errors.into_errors());
            },
        };
        object.file_count = count;
        object.has_fetch_txt = scanner.has_fetch_txt();

        let scratch_files = scanner.scratch_files().to_vec();
        self.copy_scratch_files_to_staging(object, &scratch_files, &errors)
            .await;
        self.parse_scratch_files(object, &scratch_files, &errors).await;
        if let Err(e) = scanner.finish() {
            errors.push(ProcessingError::from_error(self.work_item_id, &identifier, &e));
        }

        self.resolve_storage_option(object);

        if errors.has_fatal() {
            return StageResult::new(count, errors.into_errors());
        }
        if let Err(e) = self.ctx.store.object_save(self.work_item_id, object).await {
            errors.push(ProcessingError::from_error(self.work_item_id, &identifier, &e));
        }

        info!(
            files = count,
            manifests = ?object.manifests,
            tag_manifests = ?object.tag_manifests,
            storage_option = %object.storage_option,
            "Gathered bag metadata"
        );
        StageResult::new(count, errors.into_errors())
    }

    async fn source_reader(&self, object: &IngestObject) -> Result<ObjectReader> {
        self.ctx
            .receiving_client()?
            .get(&object.s3_bucket, &object.s3_key)
            .await
    }

    /// Scan on a blocking thread and persist each record as it arrives.
    async fn scan(
        &self,
        reader: ObjectReader,
        object: &IngestObject,
        errors: &ErrorLog,
    ) -> Result<(BridgedScanner, usize)> {
        let bridge = SyncIoBridge::new(reader);
        let scan_object = object.clone();
        let scratch_root = self.ctx.config.scratch_dir.clone();
        let (tx, mut rx) = mpsc::channel::<IngestFile>(SCAN_CHANNEL_CAPACITY);

        let scan = tokio::task::spawn_blocking(move || -> Result<(BridgedScanner, usize)> {
            let mut scanner = TarredBagScanner::new(bridge, &scan_object, &scratch_root)?;
            let count = scanner.scan(|file| {
                tx.blocking_send(file)
                    .map_err(|_| PreserveError::Unknown("Scan record receiver closed".to_string()))
            })?;
            Ok((scanner, count))
        });

        while let Some(file) = rx.recv().await {
            if let Err(e) = self.save_scanned(file).await {
                errors.push(ProcessingError::from_error(self.work_item_id, object.identifier(), &e));
            }
            if budget_exceeded(errors) {
                warn!(errors = errors.total(), max_errors = MAX_ERRORS, "Error budget exceeded, stopping scan");
                break;
            }
        }
        // Closing the channel ends a scan cut short by the error budget.
        drop(rx);

        scan.await
            .map_err(|e| PreserveError::Unknown(format!("Scan task failed: {}", e)))?
    }

    /// A record left by an earlier run of this stage keeps its UUID.
    async fn save_scanned(&self, mut file: IngestFile) -> Result<()> {
        if let Some(existing) = self
            .ctx
            .store
            .file_get(self.work_item_id, &file.identifier())
            .await?
        {
            debug!(identifier = %file.identifier(), "Keeping UUID from earlier scan");
            file.uuid = existing.uuid;
        }
        self.ctx.store.file_save(self.work_item_id, &file).await
    }

    /// Keep the raw manifests and tag files next to the staged payload.
    async fn copy_scratch_files_to_staging(
        &self,
        object: &IngestObject,
        scratch_files: &[PathBuf],
        errors: &ErrorLog,
    ) {
        let staging = &self.ctx.config.staging;
        let client = match self.ctx.staging_client() {
            Ok(client) => client,
            Err(e) => {
                errors.push(ProcessingError::from_error(self.work_item_id, object.identifier(), &e));
                return;
            },
        };

        let mut options = PutOptions::default();
        options
            .metadata
            .insert("institution".to_string(), object.institution.clone());
        options
            .metadata
            .insert("bag".to_string(), object.identifier());

        for path in scratch_files {
            let name = file_name(path);
            let key = format!("{}/{}", self.work_item_id, name);
            if let Err(e) = client.put_file(&staging.bucket, &key, path, &options).await {
                errors.push(ProcessingError::from_error(
                    self.work_item_id,
                    format!("{}/{}", object.identifier(), name),
                    &e,
                ));
            }
        }
    }

    async fn parse_scratch_files(
        &self,
        object: &mut IngestObject,
        scratch_files: &[PathBuf],
        errors: &ErrorLog,
    ) {
        for path in scratch_files {
            let name = file_name(path);
            let file_identifier = format!("{}/{}", object.identifier(), name);
            let result = match bagit::file_kind(&name) {
                FileKind::Manifest => {
                    self.merge_manifest(object, path, &name, ChecksumSource::PayloadManifest, errors)
                        .await
                },
                FileKind::TagManifest => {
                    self.merge_manifest(object, path, &name, ChecksumSource::TagManifest, errors)
                        .await
                },
                _ => self.parse_tags(object, path, &name).await,
            };
            if let Err(e) = result {
                errors.push(ProcessingError::fatal(self.work_item_id, file_identifier, e.to_string()));
            }
        }
    }

    /// Merge the checksums of one manifest onto the files it lists.
    async fn merge_manifest(
        &self,
        object: &mut IngestObject,
        path: &Path,
        name: &str,
        source: ChecksumSource,
        errors: &ErrorLog,
    ) -> Result<()> {
        let algorithm = bagit::manifest_algorithm(name)?;
        let bytes = tokio::fs::read(path).await?;
        let entries = bagit::parse_manifest(Cursor::new(bytes))?;

        let algorithms = match source {
            ChecksumSource::TagManifest => &mut object.tag_manifests,
            _ => &mut object.manifests,
        };
        if !algorithms.iter().any(|a| a == algorithm.as_str()) {
            algorithms.push(algorithm.to_string());
        }

        let object_identifier = object.identifier();
        for entry in entries {
            if budget_exceeded(errors) {
                warn!(
                    errors = errors.total(),
                    max_errors = MAX_ERRORS,
                    manifest = %name,
                    "Error budget exceeded, stopping manifest merge"
                );
                break;
            }
            let identifier = format!("{}/{}", object_identifier, entry.path);
            let mut file = match self.find_file(&identifier).await {
                Ok(Some(file)) => file,
                Ok(None) => {
                    errors.push(ProcessingError::fatal(
                        self.work_item_id,
                        &identifier,
                        format!("{} lists a file missing from the bag", name),
                    ));
                    continue;
                },
                Err(e) => {
                    errors.push(ProcessingError::from_error(self.work_item_id, &identifier, &e));
                    continue;
                },
            };
            file.set_checksum(IngestChecksum::new(algorithm, entry.digest, source));
            if let Err(e) = self.ctx.store.file_save(self.work_item_id, &file).await {
                errors.push(ProcessingError::from_error(self.work_item_id, &identifier, &e));
            }
        }
        Ok(())
    }

    /// Look up a record written moments ago, allowing for a store that is
    /// briefly behind its own writes.
    async fn find_file(&self, identifier: &str) -> Result<Option<IngestFile>> {
        let attempts = self.ctx.config.manifest_lookup_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(file) = self.ctx.store.file_get(self.work_item_id, identifier).await? {
                return Ok(Some(file));
            }
            if attempt < attempts {
                debug!(identifier, attempt, "File record not visible yet, retrying");
                tokio::time::sleep(self.ctx.config.manifest_lookup_delay).await;
            }
        }
        Ok(None)
    }

    async fn parse_tags(&self, object: &mut IngestObject, path: &Path, name: &str) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let tags = bagit::parse_tag_file(Cursor::new(bytes), name)?;
        debug!(tag_file = name, tags = tags.len(), "Parsed tag file");
        object.tags.retain(|t| t.tag_file != name);
        object.tags.extend(tags);
        if !object.parsable_tag_files.iter().any(|f| f == name) {
            object.parsable_tag_files.push(name.to_string());
        }
        Ok(())
    }

    fn resolve_storage_option(&self, object: &mut IngestObject) {
        object.storage_option = match object.requested_storage_option() {
            Some(option) => option.to_string(),
            None => {
                info!(
                    object = %object.identifier(),
                    "No Storage-Option tag, using {}",
                    DEFAULT_STORAGE_OPTION
                );
                DEFAULT_STORAGE_OPTION.to_string()
            },
        };
    }
}

fn budget_exceeded(errors: &ErrorLog) -> bool {
    errors.total() > MAX_ERRORS
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
