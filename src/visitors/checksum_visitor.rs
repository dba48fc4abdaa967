use crate::archive::EntryVisitor;
use crate::error::Result;
use crate::models::ArchiveEntry;
use sha2::{Digest, Sha256};
use std::io::Read;

const BUFFER_SIZE: usize = 8 * 1024;

/// SHA-256 over every file entry's name followed by its content
///
/// Entries are hashed in the order the handler walks them, so the digest tracks
/// the container's physical layout as well as its content. Directory entries
/// contribute nothing.
#[derive(Clone, Default)]
pub struct ChecksumVisitor {
    hasher: Sha256,
    files_hashed: u32,
}

impl ChecksumVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files_hashed(&self) -> u32 {
        self.files_hashed
    }

    /// Lowercase hex digest
    pub fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

impl EntryVisitor for ChecksumVisitor {
    fn visit(&mut self, entry: &ArchiveEntry, content: Option<&mut dyn Read>) -> Result<()> {
        if entry.is_directory {
            return Ok(());
        }

        self.hasher.update(entry.full_name.as_bytes());
        if let Some(reader) = content {
            let mut buffer = [0u8; BUFFER_SIZE];
            loop {
                let read = reader
                    .read(&mut buffer)
                    .map_err(crate::archive::archive_handler::map_read_error)?;
                if read == 0 {
                    break;
                }
                self.hasher.update(&buffer[..read]);
            }
        }
        self.files_hashed += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sha256_hex(bytes: &[u8]) -> String {
        format!("{:x}", Sha256::digest(bytes))
    }

    #[test]
    fn test_digest_matches_concatenated_buffer() {
        let mut visitor = ChecksumVisitor::new();
        let a = ArchiveEntry::file("a.txt", 2, Utc::now());
        let b = ArchiveEntry::file("b.txt", 3, Utc::now());
        visitor.visit(&a, Some(&mut &b"hi"[..])).unwrap();
        visitor.visit(&b, Some(&mut &b"yo!"[..])).unwrap();

        assert_eq!(visitor.files_hashed(), 2);
        assert_eq!(visitor.finish(), sha256_hex(b"a.txthib.txtyo!"));
    }

    #[test]
    fn test_directories_contribute_nothing() {
        let mut with_dir = ChecksumVisitor::new();
        with_dir
            .visit(&ArchiveEntry::directory("docs/", Utc::now()), None)
            .unwrap();
        with_dir
            .visit(&ArchiveEntry::file("docs/a", 1, Utc::now()), Some(&mut &b"x"[..]))
            .unwrap();

        let mut without_dir = ChecksumVisitor::new();
        without_dir
            .visit(&ArchiveEntry::file("docs/a", 1, Utc::now()), Some(&mut &b"x"[..]))
            .unwrap();

        assert_eq!(with_dir.finish(), without_dir.finish());
    }

    #[test]
    fn test_empty_archive_digest() {
        let digest = ChecksumVisitor::new().finish();
        assert_eq!(digest, sha256_hex(b""));
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_order_sensitive() {
        let a = ArchiveEntry::file("a", 1, Utc::now());
        let b = ArchiveEntry::file("b", 1, Utc::now());

        let mut forward = ChecksumVisitor::new();
        forward.visit(&a, Some(&mut &b"1"[..])).unwrap();
        forward.visit(&b, Some(&mut &b"2"[..])).unwrap();

        let mut reverse = ChecksumVisitor::new();
        reverse.visit(&b, Some(&mut &b"2"[..])).unwrap();
        reverse.visit(&a, Some(&mut &b"1"[..])).unwrap();

        assert_ne!(forward.finish(), reverse.finish());
    }
}
