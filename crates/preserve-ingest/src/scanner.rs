//! Single-pass tarred bag scanner
//!
//! Reads a tar stream exactly once and produces one [`IngestFile`] per
//! regular entry. Both ingest digests come out of the same pass, and the
//! bytes of manifests and parsable tag files are teed into scratch files so
//! the gatherer can parse them after the stream is gone.

use crate::bagit::{self, FETCH_TXT};
use crate::format::{self, IDENTIFIED_BY_EXTENSION, MATCH_TYPE_EXTENSION};
use crate::models::{IngestChecksum, IngestFile, IngestObject};
use chrono::{DateTime, Utc};
use preserve_common::checksum::IngestDigester;
use preserve_common::{ChecksumAlgorithm, ChecksumSource, PreserveError, Result};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

pub struct TarredBagScanner<R: Read> {
    archive: tar::Archive<R>,
    object_identifier: String,
    institution_id: i64,
    scratch_dir: TempDir,
    scratch_files: Vec<PathBuf>,
    has_fetch_txt: bool,
}

impl<R: Read> TarredBagScanner<R> {
    /// Prepare to scan `reader`. Scratch files go into a private directory
    /// created under `scratch_root`.
    pub fn new(reader: R, object: &IngestObject, scratch_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(scratch_root)?;
        let scratch_dir = tempfile::Builder::new()
            .prefix("bag-scan-")
            .tempdir_in(scratch_root)?;
        debug!(
            object = %object.identifier(),
            scratch_dir = %scratch_dir.path().display(),
            "Created scan scratch directory"
        );

        Ok(Self {
            archive: tar::Archive::new(reader),
            object_identifier: object.identifier(),
            institution_id: object.institution_id,
            scratch_dir,
            scratch_files: Vec::new(),
            has_fetch_txt: false,
        })
    }

    /// Read the whole archive, handing each file record to `on_file`.
    ///
    /// Any read error, illegal entry name or error from `on_file` ends the
    /// scan. Returns the number of records produced.
    pub fn scan<F>(&mut self, mut on_file: F) -> Result<usize>
    where
        F: FnMut(IngestFile) -> Result<()>,
    {
        let mut count = 0;
        for entry in self.archive.entries()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }

            let tar_path = entry.path()?.to_string_lossy().into_owned();
            let path_in_bag = bagit::tar_path_to_bag_path(&tar_path)?;
            let mtime = entry.header().mtime()?;

            let digests = if bagit::needs_scratch_copy(&path_in_bag) {
                let scratch_path = scratch_path_for(self.scratch_dir.path(), &path_in_bag)?;
                let mut scratch = File::create(&scratch_path)?;
                let mut digester = IngestDigester::with_copy(&mut scratch);
                io::copy(&mut entry, &mut digester)?;
                digester.flush()?;
                let digests = digester.finish();
                self.scratch_files.push(scratch_path);
                digests
            } else {
                let mut digester = IngestDigester::new();
                io::copy(&mut entry, &mut digester)?;
                digester.finish()
            };

            if path_in_bag == FETCH_TXT {
                self.has_fetch_txt = true;
            }

            let now = Utc::now();
            let mut file = IngestFile::new(&self.object_identifier, &path_in_bag);
            file.size = digests.size;
            file.institution_id = self.institution_id;
            file.file_modified = i64::try_from(mtime)
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0));
            file.file_format = format::format_from_extension(&path_in_bag).to_string();
            file.format_identified_by = IDENTIFIED_BY_EXTENSION.to_string();
            file.format_match_type = MATCH_TYPE_EXTENSION.to_string();
            file.format_identified_at = Some(now);
            file.set_checksum(IngestChecksum::new(
                ChecksumAlgorithm::Md5,
                digests.md5,
                ChecksumSource::Ingest,
            ));
            file.set_checksum(IngestChecksum::new(
                ChecksumAlgorithm::Sha256,
                digests.sha256,
                ChecksumSource::Ingest,
            ));

            on_file(file)?;
            count += 1;
        }

        info!(
            object = %self.object_identifier,
            files = count,
            scratch_files = self.scratch_files.len(),
            "Scanned bag"
        );
        Ok(count)
    }

    /// Scratch files written so far.
    pub fn scratch_files(&self) -> &[PathBuf] {
        &self.scratch_files
    }

    pub fn has_fetch_txt(&self) -> bool {
        self.has_fetch_txt
    }

    /// Close the source stream and delete every scratch file.
    pub fn finish(self) -> Result<()> {
        let Self {
            archive,
            scratch_dir,
            ..
        } = self;
        drop(archive);
        scratch_dir.close()?;
        Ok(())
    }
}

/// Scratch copies are only made for top-level bag files, so the bag path is
/// also a plain file name.
fn scratch_path_for(scratch_dir: &Path, path_in_bag: &str) -> Result<PathBuf> {
    let name = Path::new(path_in_bag)
        .file_name()
        .ok_or_else(|| PreserveError::IllegalPath {
            path: path_in_bag.to_string(),
        })?;
    Ok(scratch_dir.join(name))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::WorkItem;
    use std::io::Cursor;

    fn object() -> IngestObject {
        IngestObject::from_work_item(&WorkItem {
            id: 1,
            institution: "example.edu".into(),
            institution_id: 9,
            bucket: "receiving".into(),
            key: "example.edu.tiny.tar".into(),
            etag: String::new(),
            size: 0,
        })
        .unwrap()
    }

    fn append(builder: &mut tar::Builder<Vec<u8>>, path: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_700_000_000);
        header.set_cksum();
        builder.append_data(&mut header, path, data).unwrap();
    }

    fn tiny_bag() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        dir.set_cksum();
        builder
            .append_data(&mut dir, "example.edu.tiny/", io::empty())
            .unwrap();
        append(&mut builder, "example.edu.tiny/bagit.txt", b"BagIt-Version: 0.97\n");
        append(
            &mut builder,
            "example.edu.tiny/manifest-md5.txt",
            b"5d41402abc4b2a76b9719d911017c592  data/hello.txt\n",
        );
        append(&mut builder, "example.edu.tiny/data/hello.txt", b"hello");
        append(&mut builder, "example.edu.tiny/fetch.txt", b"");
        builder.into_inner().unwrap()
    }

    fn scan_all(bytes: &[u8], scratch_root: &Path) -> (Vec<IngestFile>, usize, bool) {
        let mut scanner = TarredBagScanner::new(Cursor::new(bytes), &object(), scratch_root).unwrap();
        let mut files = Vec::new();
        scanner
            .scan(|file| {
                files.push(file);
                Ok(())
            })
            .unwrap();
        let scratch = scanner.scratch_files().len();
        let fetch = scanner.has_fetch_txt();
        scanner.finish().unwrap();
        (files, scratch, fetch)
    }

    #[test]
    fn test_one_record_per_regular_entry() {
        let root = tempfile::tempdir().unwrap();
        let (files, scratch, has_fetch) = scan_all(&tiny_bag(), root.path());

        let paths: Vec<&str> = files.iter().map(|f| f.path_in_bag.as_str()).collect();
        assert_eq!(paths, vec!["bagit.txt", "manifest-md5.txt", "data/hello.txt", "fetch.txt"]);
        assert_eq!(scratch, 2);
        assert!(has_fetch);

        let hello = &files[2];
        assert_eq!(hello.identifier(), "example.edu/example.edu.tiny/data/hello.txt");
        assert_eq!(hello.size, 5);
        assert_eq!(hello.institution_id, 9);
        assert_eq!(hello.file_format, "text/plain");
        assert_eq!(hello.format_identified_by, IDENTIFIED_BY_EXTENSION);
        assert_eq!(
            hello
                .checksum(ChecksumSource::Ingest, ChecksumAlgorithm::Md5)
                .unwrap()
                .digest,
            "5d41402abc4b2a76b9719d911017c592"
        );
        assert_eq!(
            hello.file_modified.unwrap().timestamp(),
            1_700_000_000
        );
    }

    #[test]
    fn test_scanning_twice_gives_identical_digests() {
        let bytes = tiny_bag();
        let root = tempfile::tempdir().unwrap();
        let (first, _, _) = scan_all(&bytes, root.path());
        let (second, _, _) = scan_all(&bytes, root.path());

        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.checksums.len(), b.checksums.len());
            for (ca, cb) in a.checksums.iter().zip(b.checksums.iter()) {
                assert_eq!((ca.algorithm, &ca.digest), (cb.algorithm, &cb.digest));
            }
            assert_ne!(a.uuid, b.uuid);
        }
    }

    #[test]
    fn test_finish_removes_scratch_files() {
        let root = tempfile::tempdir().unwrap();
        let bytes = tiny_bag();
        let mut scanner = TarredBagScanner::new(Cursor::new(&bytes), &object(), root.path()).unwrap();
        scanner.scan(|_| Ok(())).unwrap();
        let scratch: Vec<PathBuf> = scanner.scratch_files().to_vec();
        assert!(scratch.iter().all(|p| p.exists()));
        let manifest = std::fs::read_to_string(&scratch[1]).unwrap();
        assert!(manifest.contains("data/hello.txt"));

        scanner.finish().unwrap();
        assert!(scratch.iter().all(|p| !p.exists()));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_entry_outside_bag_directory_is_illegal() {
        let mut builder = tar::Builder::new(Vec::new());
        append(&mut builder, "stray.txt", b"x");
        let bytes = builder.into_inner().unwrap();

        let root = tempfile::tempdir().unwrap();
        let mut scanner = TarredBagScanner::new(Cursor::new(&bytes), &object(), root.path()).unwrap();
        let err = scanner.scan(|_| Ok(())).unwrap_err();
        assert!(err.is_fatal());
    }
}
