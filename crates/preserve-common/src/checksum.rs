//! Checksum utilities for bag ingest
//!
//! The scanner reads every tar entry exactly once, so both digests are
//! computed from the same pass through [`IngestDigester`], which can also
//! tee the bytes into a scratch file.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

/// Digests produced by one pass over a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestDigests {
    pub md5: String,
    pub sha256: String,
    pub size: u64,
}

/// Fan-out writer: every byte written goes to the md5 and sha256 hashers
/// and, when present, to a copy writer.
pub struct IngestDigester<'a> {
    md5: md5::Context,
    sha256: Sha256,
    size: u64,
    copy: Option<&'a mut dyn Write>,
}

impl Default for IngestDigester<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> IngestDigester<'a> {
    pub fn new() -> Self {
        Self {
            md5: md5::Context::new(),
            sha256: Sha256::new(),
            size: 0,
            copy: None,
        }
    }

    /// Also write every byte to `copy`.
    pub fn with_copy(copy: &'a mut dyn Write) -> Self {
        Self {
            copy: Some(copy),
            ..Self::new()
        }
    }

    pub fn finish(self) -> IngestDigests {
        IngestDigests {
            md5: format!("{:x}", self.md5.compute()),
            sha256: hex::encode(self.sha256.finalize()),
            size: self.size,
        }
    }
}

impl Write for IngestDigester<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(copy) = self.copy.as_mut() {
            copy.write_all(buf)?;
        }
        self.md5.consume(buf);
        self.sha256.update(buf);
        self.size += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.copy.as_mut() {
            Some(copy) => copy.flush(),
            None => Ok(()),
        }
    }
}

/// Digest a reader with both ingest algorithms.
pub fn digest_reader<R: Read>(reader: &mut R) -> Result<IngestDigests> {
    let mut digester = IngestDigester::new();
    std::io::copy(reader, &mut digester)?;
    Ok(digester.finish())
}
