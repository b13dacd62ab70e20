//! File format identification
//!
//! The scanner makes a first guess from the file extension. The format
//! identifier stage later refines it from the leading bytes of the staged
//! copy through a [`FormatEngine`].

use std::path::Path;

pub const IDENTIFIED_BY_EXTENSION: &str = "ext map";
pub const IDENTIFIED_BY_SIGNATURE: &str = "signature";
pub const MATCH_TYPE_EXTENSION: &str = "extension";
pub const MATCH_TYPE_SIGNATURE: &str = "signature";
pub const DEFAULT_FORMAT: &str = "application/octet-stream";

/// A format match from an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatMatch {
    pub mime_type: String,
    pub match_type: String,
}

pub trait FormatEngine: Send + Sync {
    /// Value stored in `format_identified_by` for matches from this engine.
    fn name(&self) -> &str;

    /// Identify a file from its first bytes. `None` means no confident match.
    fn identify(&self, head: &[u8], path_in_bag: &str) -> Option<FormatMatch>;
}

const EXTENSIONS: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("csv", "text/csv"),
    ("tsv", "text/tab-separated-values"),
    ("xml", "application/xml"),
    ("json", "application/json"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("pdf", "application/pdf"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("jp2", "image/jp2"),
    ("wav", "audio/x-wav"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("tar", "application/x-tar"),
    ("doc", "application/msword"),
    ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    ("xls", "application/vnd.ms-excel"),
    ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
];

/// MIME type guessed from the file extension, or `application/octet-stream`.
pub fn format_from_extension(path_in_bag: &str) -> &'static str {
    Path::new(path_in_bag)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .and_then(|ext| EXTENSIONS.iter().find(|(e, _)| *e == ext).map(|(_, m)| *m))
        .unwrap_or(DEFAULT_FORMAT)
}

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"II*\x00", "image/tiff"),
    (b"MM\x00*", "image/tiff"),
    (b"\x00\x00\x00\x0cjP  ", "image/jp2"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b", "application/gzip"),
    (b"ID3", "audio/mpeg"),
    (b"<?xml", "application/xml"),
];

/// Magic-number engine for common preservation formats. Falls back to
/// `text/plain` for content that is valid UTF-8 without control bytes.
#[derive(Debug, Default, Clone)]
pub struct SignatureEngine;

impl SignatureEngine {
    pub fn new() -> Self {
        Self
    }
}

impl FormatEngine for SignatureEngine {
    fn name(&self) -> &str {
        IDENTIFIED_BY_SIGNATURE
    }

    fn identify(&self, head: &[u8], path_in_bag: &str) -> Option<FormatMatch> {
        let signature = |mime: &str| FormatMatch {
            mime_type: mime.to_string(),
            match_type: MATCH_TYPE_SIGNATURE.to_string(),
        };

        if let Some((_, mime)) = SIGNATURES.iter().find(|(magic, _)| head.starts_with(magic)) {
            return Some(signature(mime));
        }
        if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WAVE" {
            return Some(signature("audio/x-wav"));
        }
        if head.len() >= 8 && &head[4..8] == b"ftyp" {
            return Some(signature("video/mp4"));
        }
        if head.is_empty() {
            return None;
        }

        // Text: keep a more specific extension guess (csv, xml, json).
        let is_text = std::str::from_utf8(head)
            .map(|s| !s.chars().any(|c| c.is_control() && !c.is_whitespace()))
            .unwrap_or(false);
        if is_text {
            let by_extension = format_from_extension(path_in_bag);
            let mime = if by_extension.starts_with("text/")
                || by_extension == "application/xml"
                || by_extension == "application/json"
            {
                by_extension
            } else {
                "text/plain"
            };
            return Some(signature(mime));
        }
        None
    }
}
