//! Archive accessor: an in-memory, read-only view of a ZIP container.
//!
//! Entries are decompressed once at open time and shared as `Arc<[u8]>`, so
//! lookups take `&self` and concurrent reads of distinct entries are safe.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Arc;

use percent_encoding::percent_decode_str;

use crate::encoding;
use crate::error::EpubError;
use crate::security::{self, EntryBudget, SecurityLimits};

#[derive(Debug, Clone, Default)]
pub struct Archive {
    entries: HashMap<String, Arc<[u8]>>,
}

impl Archive {
    /// Open a ZIP byte buffer with the default security limits.
    pub fn open(bytes: &[u8]) -> Result<Self, EpubError> {
        Self::open_with_limits(bytes, &SecurityLimits::default())
    }

    /// Open a ZIP byte buffer, enforcing `limits` while decompressing.
    pub fn open_with_limits(bytes: &[u8], limits: &SecurityLimits) -> Result<Self, EpubError> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| EpubError::CorruptArchive(format!("Invalid ZIP archive: {e}")))?;

        let mut budget = EntryBudget::new(limits, zip.len() as u64)?;
        let mut entries = HashMap::with_capacity(zip.len());

        for i in 0..zip.len() {
            let mut file = zip
                .by_index(i)
                .map_err(|e| EpubError::CorruptArchive(format!("Unreadable entry #{i}: {e}")))?;
            if file.is_dir() {
                continue;
            }

            let name = file.name().to_string();
            if let Err(e) = security::check_path_traversal(&name) {
                tracing::warn!("Skipping archive entry: {}", e);
                continue;
            }
            budget.admit(&name, file.compressed_size(), file.size())?;

            let mut data = Vec::with_capacity(file.size().min(budget.read_cap()) as usize);
            file.by_ref()
                .take(budget.read_cap())
                .read_to_end(&mut data)
                .map_err(|e| EpubError::CorruptArchive(format!("Failed to read {name}: {e}")))?;
            budget.charge(&name, data.len() as u64)?;

            entries.insert(name, Arc::from(data));
        }

        tracing::debug!(
            "Opened archive with {} entries ({} bytes)",
            entries.len(),
            budget.total()
        );
        Ok(Self { entries })
    }

    /// Build an archive directly from path → bytes pairs.
    pub fn from_entries<I, P, B>(entries: I) -> Self
    where
        I: IntoIterator<Item = (P, B)>,
        P: Into<String>,
        B: Into<Vec<u8>>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(path, bytes)| {
                    let data: Vec<u8> = bytes.into();
                    (path.into(), Arc::from(data))
                })
                .collect(),
        }
    }

    /// Raw bytes of an entry, or `None` if the path is absent. Paths are case-sensitive.
    pub fn lookup(&self, path: &str) -> Option<&[u8]> {
        self.entries.get(path).map(|data| &**data)
    }

    /// Shared handle to an entry's bytes.
    pub fn lookup_shared(&self, path: &str) -> Option<Arc<[u8]>> {
        self.entries.get(path).cloned()
    }

    /// Find the stored path for an href-derived path: the exact path first,
    /// then its percent-decoded form (`my%20book.xhtml` → `my book.xhtml`).
    pub fn resolve_entry<'a>(&'a self, path: &str) -> Option<&'a str> {
        if let Some((key, _)) = self.entries.get_key_value(path) {
            return Some(key.as_str());
        }
        let decoded = percent_decode_str(path).decode_utf8().ok()?;
        if decoded == path {
            return None;
        }
        self.entries
            .get_key_value(&*decoded)
            .map(|(key, _)| key.as_str())
    }

    /// Read an entry as UTF-8 text. `Ok(None)` when the entry is absent.
    pub fn read_text(&self, path: &str) -> Result<Option<String>, EpubError> {
        self.read_text_with_encoding(path, "utf-8")
    }

    /// Read an entry as text in the encoding named by `label` (a BOM wins).
    pub fn read_text_with_encoding(
        &self,
        path: &str,
        label: &str,
    ) -> Result<Option<String>, EpubError> {
        let Some(bytes) = self.lookup(path) else {
            return Ok(None);
        };
        encoding::decode_strict(bytes, label)
            .map(Some)
            .map_err(|detail| EpubError::Decode {
                path: path.to_string(),
                detail,
            })
    }

    /// Read an entry as text, sniffing its encoding and never failing on bad bytes.
    pub fn read_text_lossy(&self, path: &str) -> Option<String> {
        self.lookup(path).map(encoding::decode_lossy)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::build_zip;

    #[test]
    fn opens_zip_and_looks_up_entries() {
        let bytes = build_zip(&[
            ("mimetype", "application/epub+zip"),
            ("OEBPS/Text/ch1.xhtml", "<p>one</p>"),
        ]);
        let archive = Archive::open(&bytes).unwrap();
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.lookup("OEBPS/Text/ch1.xhtml"), Some(&b"<p>one</p>"[..]));
        assert!(archive.lookup("OEBPS/text/ch1.xhtml").is_none());
    }

    #[test]
    fn garbage_is_corrupt_archive() {
        let err = Archive::open(b"definitely not a zip file").unwrap_err();
        assert!(matches!(err, EpubError::CorruptArchive(_)));
    }

    #[test]
    fn read_text_absent_is_none() {
        let archive = Archive::from_entries([("a.txt", "hello")]);
        assert_eq!(archive.read_text("a.txt").unwrap().as_deref(), Some("hello"));
        assert!(archive.read_text("missing.txt").unwrap().is_none());
    }

    #[test]
    fn read_text_reports_decode_errors() {
        let archive = Archive::from_entries([("bad.txt", vec![0xC3u8, 0x28])]);
        let err = archive.read_text("bad.txt").unwrap_err();
        assert!(matches!(err, EpubError::Decode { ref path, .. } if path == "bad.txt"));
        assert!(archive.read_text_lossy("bad.txt").is_some());
    }

    #[test]
    fn resolve_entry_percent_decodes() {
        let archive = Archive::from_entries([("OEBPS/my book.xhtml", "x")]);
        assert_eq!(archive.resolve_entry("OEBPS/my%20book.xhtml"), Some("OEBPS/my book.xhtml"));
        assert_eq!(archive.resolve_entry("OEBPS/my book.xhtml"), Some("OEBPS/my book.xhtml"));
        assert_eq!(archive.resolve_entry("OEBPS/other.xhtml"), None);
    }

    #[test]
    fn too_many_files_rejected() {
        let bytes = build_zip(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let limits = SecurityLimits {
            max_file_count: 2,
            ..SecurityLimits::default()
        };
        let err = Archive::open_with_limits(&bytes, &limits).unwrap_err();
        assert!(matches!(err, EpubError::Security(_)));
    }
}
