//! BagIt naming and text-file parsing
//!
//! Pure helpers: turning tar entry names into bag paths, naming objects after
//! their tar files, classifying files by path, and reading the manifest and
//! tag-file formats.

use crate::models::Tag;
use preserve_common::{ChecksumAlgorithm, PreserveError, Result};
use regex::Regex;
use std::io::BufRead;

pub const BAGIT_TXT: &str = "bagit.txt";
pub const BAG_INFO_TXT: &str = "bag-info.txt";
pub const APTRUST_INFO_TXT: &str = "aptrust-info.txt";
pub const FETCH_TXT: &str = "fetch.txt";
pub const MANIFEST_PREFIX: &str = "manifest-";
pub const TAG_MANIFEST_PREFIX: &str = "tagmanifest-";
pub const PAYLOAD_DIR: &str = "data/";

/// Tag files whose contents are parsed into [`Tag`]s.
pub const PARSABLE_TAG_FILES: [&str; 3] = [BAGIT_TXT, BAG_INFO_TXT, APTRUST_INFO_TXT];

/// Strip the top-level bag directory from a tar entry name.
///
/// `my_bag/data/file.txt` becomes `data/file.txt`. A name with no directory
/// component is an illegal path.
pub fn tar_path_to_bag_path(tar_path: &str) -> Result<String> {
    let trimmed = tar_path.strip_prefix("./").unwrap_or(tar_path);
    match trimmed.split_once('/') {
        Some((_, rest)) if !rest.is_empty() => Ok(rest.to_string()),
        _ => Err(PreserveError::IllegalPath {
            path: tar_path.to_string(),
        }),
    }
}

/// Bag name from a tar file name: drop `.tar`, then any `.bNN.ofNN` suffix.
pub fn clean_bag_name(name: &str) -> Result<String> {
    let multipart_suffix = Regex::new(r"\.b\d+\.of\d+$")
        .map_err(|e| PreserveError::Parse(format!("Bad multipart pattern: {}", e)))?;
    let base = name.rsplit('/').next().unwrap_or(name);
    let base = base.strip_suffix(".tar").unwrap_or(base);
    Ok(multipart_suffix.replace(base, "").into_owned())
}

/// Classification of a file by its path in the bag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Payload,
    Manifest,
    TagManifest,
    TagFile,
    FetchTxt,
}

pub fn file_kind(path_in_bag: &str) -> FileKind {
    if path_in_bag.starts_with(TAG_MANIFEST_PREFIX) {
        FileKind::TagManifest
    } else if path_in_bag.starts_with(MANIFEST_PREFIX) {
        FileKind::Manifest
    } else if path_in_bag == FETCH_TXT {
        FileKind::FetchTxt
    } else if !path_in_bag.starts_with(PAYLOAD_DIR) {
        FileKind::TagFile
    } else {
        FileKind::Payload
    }
}

pub fn is_parsable_tag_file(path_in_bag: &str) -> bool {
    PARSABLE_TAG_FILES.contains(&path_in_bag)
}

/// Files that go to preservation storage. bagit.txt, manifests, tag
/// manifests and fetch.txt are regenerated on restore and never preserved.
pub fn has_preservable_name(path_in_bag: &str) -> bool {
    path_in_bag != BAGIT_TXT
        && !matches!(
            file_kind(path_in_bag),
            FileKind::Manifest | FileKind::TagManifest | FileKind::FetchTxt
        )
}

/// Files the scanner copies to scratch for later parsing.
pub fn needs_scratch_copy(path_in_bag: &str) -> bool {
    is_parsable_tag_file(path_in_bag)
        || matches!(
            file_kind(path_in_bag),
            FileKind::Manifest | FileKind::TagManifest
        )
}

/// Algorithm encoded in a manifest name: `manifest-sha256.txt` is sha256.
pub fn manifest_algorithm(manifest_name: &str) -> Result<ChecksumAlgorithm> {
    let stem = manifest_name
        .strip_prefix(TAG_MANIFEST_PREFIX)
        .or_else(|| manifest_name.strip_prefix(MANIFEST_PREFIX))
        .and_then(|rest| rest.strip_suffix(".txt"))
        .ok_or_else(|| PreserveError::Parse(format!("Not a manifest name: {}", manifest_name)))?;
    stem.parse()
}

/// One `digest  path` line of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub digest: String,
    pub path: String,
}

/// Parse a manifest. Paths may contain spaces; blank lines are skipped.
pub fn parse_manifest<R: BufRead>(reader: R) -> Result<Vec<ManifestEntry>> {
    let mut entries = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let (digest, path) = line
            .split_once(char::is_whitespace)
            .map(|(d, p)| (d, p.trim_start()))
            .filter(|(_, p)| !p.is_empty())
            .ok_or_else(|| {
                PreserveError::Parse(format!("Manifest line {} is malformed: {}", index + 1, line))
            })?;
        entries.push(ManifestEntry {
            digest: digest.to_lowercase(),
            path: path.to_string(),
        });
    }
    Ok(entries)
}

/// Parse a tag file of `Label: value` lines. Lines that start with
/// whitespace continue the previous value.
pub fn parse_tag_file<R: BufRead>(reader: R, tag_file: &str) -> Result<Vec<Tag>> {
    let mut tags: Vec<Tag> = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with(char::is_whitespace) {
            match tags.last_mut() {
                Some(tag) => {
                    tag.value.push(' ');
                    tag.value.push_str(line.trim());
                    continue;
                },
                None => {
                    return Err(PreserveError::Parse(format!(
                        "{} line {} continues a tag that does not exist",
                        tag_file,
                        index + 1
                    )))
                },
            }
        }
        let (label, value) = line.split_once(':').ok_or_else(|| {
            PreserveError::Parse(format!("{} line {} has no label: {}", tag_file, index + 1, line))
        })?;
        tags.push(Tag::new(tag_file, label.trim(), value.trim()));
    }
    Ok(tags)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_tar_path_to_bag_path() {
        assert_eq!(
            tar_path_to_bag_path("example.edu.sample/data/file.txt").unwrap(),
            "data/file.txt"
        );
        assert_eq!(tar_path_to_bag_path("bag/bagit.txt").unwrap(), "bagit.txt");
        assert_eq!(tar_path_to_bag_path("./bag/bagit.txt").unwrap(), "bagit.txt");
        assert!(matches!(
            tar_path_to_bag_path("bagit.txt"),
            Err(PreserveError::IllegalPath { .. })
        ));
        assert!(tar_path_to_bag_path("bag/").is_err());
    }

    #[test]
    fn test_clean_bag_name() {
        assert_eq!(clean_bag_name("example.edu.sample_good.tar").unwrap(), "example.edu.sample_good");
        assert_eq!(clean_bag_name("photos.b01.of12.tar").unwrap(), "photos");
        assert_eq!(clean_bag_name("photos.b1.of2").unwrap(), "photos");
        assert_eq!(clean_bag_name("uploads/photos.tar").unwrap(), "photos");
        assert_eq!(clean_bag_name("no_suffix").unwrap(), "no_suffix");
    }

    #[test]
    fn test_file_kind() {
        assert_eq!(file_kind("tagmanifest-md5.txt"), FileKind::TagManifest);
        assert_eq!(file_kind("manifest-sha256.txt"), FileKind::Manifest);
        assert_eq!(file_kind("fetch.txt"), FileKind::FetchTxt);
        assert_eq!(file_kind("custom_tags/notes.txt"), FileKind::TagFile);
        assert_eq!(file_kind("data/manifest-md5.txt"), FileKind::Payload);
    }

    #[test]
    fn test_preservable_names() {
        assert!(!has_preservable_name("bagit.txt"));
        assert!(!has_preservable_name("manifest-md5.txt"));
        assert!(!has_preservable_name("tagmanifest-sha256.txt"));
        assert!(!has_preservable_name("fetch.txt"));
        assert!(has_preservable_name("bag-info.txt"));
        assert!(has_preservable_name("data/objects/sample.txt"));
    }

    #[test]
    fn test_manifest_algorithm() {
        assert_eq!(manifest_algorithm("manifest-md5.txt").unwrap(), ChecksumAlgorithm::Md5);
        assert_eq!(
            manifest_algorithm("tagmanifest-sha512.txt").unwrap(),
            ChecksumAlgorithm::Sha512
        );
        assert!(manifest_algorithm("bag-info.txt").is_err());
    }

    #[test]
    fn test_parse_manifest_handles_spaces() {
        let text = "ABC123  data/file one.txt\n\n0f0f data/two.txt\r\n";
        let entries = parse_manifest(Cursor::new(text)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].digest, "abc123");
        assert_eq!(entries[0].path, "data/file one.txt");
        assert_eq!(entries[1].path, "data/two.txt");
        assert!(parse_manifest(Cursor::new("justadigest\n")).is_err());
    }

    #[test]
    fn test_parse_tag_file_with_continuation() {
        let text = "Source-Organization: Example University\nExternal-Description: A long\n   description here\nStorage-Option:Glacier-OR\n";
        let tags = parse_tag_file(Cursor::new(text), "bag-info.txt").unwrap();
        assert_eq!(tags.len(), 3);
        assert_eq!(tags[1].value, "A long description here");
        assert_eq!(tags[2].label, "Storage-Option");
        assert_eq!(tags[2].value, "Glacier-OR");
        assert_eq!(tags[0].tag_file, "bag-info.txt");
    }
}
