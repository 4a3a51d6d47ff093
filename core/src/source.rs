use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::{Utf8Error, from_utf8};
use std::sync::Arc;

/// Lower-case hex SHA-256 of a file's bytes. This is the only thing the structural cache uses to
/// decide whether a file changed.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Computes the digest of `bytes`.
    pub fn of(bytes: &[u8]) -> ContentDigest {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let hash = hasher.finalize();
        let mut hex = String::with_capacity(hash.len() * 2);
        for byte in hash {
            hex.push_str(&format!("{byte:02x}"));
        }
        ContentDigest(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A source file as read at scan time. The contents are immutable for the rest of the run; a new
/// run re-reads and re-hashes the file.
#[derive(Clone, Debug)]
pub struct SourceFile {
    path: PathBuf,
    contents: Arc<[u8]>,
    digest: ContentDigest,
    line_count: usize,
    /// Set by the scanner when the file fails to parse.
    syntax_error: Option<String>,
}

impl SourceFile {
    /// Reads the file at `path`. The path is made absolute so it can serve as a stable cache key.
    pub fn read(path: &Path) -> io::Result<SourceFile> {
        let path = path.canonicalize()?;
        let contents = fs::read(&path)?;
        Ok(SourceFile::from_bytes(path, contents))
    }

    /// Builds a SourceFile from bytes that are already in memory.
    pub fn from_bytes(path: PathBuf, contents: impl Into<Arc<[u8]>>) -> SourceFile {
        let contents = contents.into();
        let digest = ContentDigest::of(&contents);
        let line_count = String::from_utf8_lossy(&contents).lines().count();
        SourceFile {
            path,
            contents,
            digest,
            line_count,
            syntax_error: None,
        }
    }

    /// Marks this file as not parseable.
    pub fn with_syntax_error(mut self, error: impl Into<String>) -> SourceFile {
        self.syntax_error = Some(error.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.contents
    }

    /// Returns the contents as text, if they are valid UTF-8.
    pub fn text(&self) -> Result<&str, Utf8Error> {
        from_utf8(&self.contents)
    }

    pub fn digest(&self) -> &ContentDigest {
        &self.digest
    }

    pub fn line_count(&self) -> usize {
        self.line_count
    }

    pub fn size(&self) -> u64 {
        self.contents.len() as u64
    }

    pub fn parse_valid(&self) -> bool {
        self.syntax_error.is_none()
    }

    pub fn syntax_error(&self) -> Option<&str> {
        self.syntax_error.as_deref()
    }

    /// The file name, e.g. `sales_invoice.py`.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// The file name without its extension, e.g. `sales_invoice`.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_sha256_hex() {
        assert_eq!(
            ContentDigest::of(b"abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn single_byte_change_changes_digest() {
        let a = SourceFile::from_bytes("a.py".into(), b"x = 1\n".to_vec());
        let b = SourceFile::from_bytes("a.py".into(), b"x = 2\n".to_vec());
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.line_count(), 1);
    }

    #[test]
    fn names() {
        let file = SourceFile::from_bytes("/src/sales_invoice.py".into(), Vec::new());
        assert_eq!(file.file_name(), "sales_invoice.py");
        assert_eq!(file.stem(), "sales_invoice");
        assert!(file.parse_valid());
        assert!(!file.with_syntax_error("bad").parse_valid());
    }
}
