//! Archive hardening: entry budgets (count, size, compression ratio), path
//! traversal guards and DRM detection.

use serde::{Deserialize, Serialize};

use crate::error::SecurityError;

/// Entries smaller than this are never flagged by the ratio check.
const RATIO_CHECK_MIN_BYTES: u64 = 1024 * 1024;

const MB: u64 = 1024 * 1024;

/// Namespace or marker → DRM scheme name. Checked in order.
const DRM_MARKERS: &[(&str, &str)] = &[
    ("http://ns.adobe.com/adept", "Adobe DRM"),
    ("http://ns.adobe.com/digitaleditions", "Adobe DRM"),
    ("http://www.apple.com/ibooks", "Apple FairPlay"),
    ("sinf", "Apple FairPlay"),
    ("http://urms.org", "Sony URMS"),
];

/// Algorithms used for font obfuscation, which is not DRM.
const FONT_OBFUSCATION: &[&str] = &[
    "http://www.idpf.org/2008/embedding",
    "http://ns.adobe.com/pdf/enc#RC",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityLimits {
    /// Maximum decompression ratio before flagging as ZIP bomb.
    pub max_compression_ratio: u64,
    /// Maximum number of entries in an archive.
    pub max_file_count: u64,
    /// Maximum decompressed size of a single entry in bytes.
    pub max_resource_size_bytes: u64,
    /// Maximum total decompressed size in bytes.
    pub max_total_size_bytes: u64,
}

impl Default for SecurityLimits {
    fn default() -> Self {
        Self {
            max_compression_ratio: 100,
            max_file_count: 10_000,
            max_resource_size_bytes: 200 * MB,
            max_total_size_bytes: 1024 * MB,
        }
    }
}

/// Tracks what an archive has consumed of its limits while it is unpacked.
#[derive(Debug)]
pub struct EntryBudget<'a> {
    limits: &'a SecurityLimits,
    total: u64,
}

impl<'a> EntryBudget<'a> {
    /// Start a budget for an archive with `entry_count` entries.
    pub fn new(limits: &'a SecurityLimits, entry_count: u64) -> Result<Self, SecurityError> {
        if entry_count > limits.max_file_count {
            return Err(SecurityError::TooManyFiles {
                count: entry_count,
                limit: limits.max_file_count,
            });
        }
        Ok(Self { limits, total: 0 })
    }

    /// Check an entry's declared sizes before decompressing it.
    pub fn admit(&self, name: &str, compressed: u64, declared: u64) -> Result<(), SecurityError> {
        self.check_single(name, declared)?;
        if declared < RATIO_CHECK_MIN_BYTES {
            return Ok(());
        }
        let limit = self.limits.max_compression_ratio;
        let ratio = declared.checked_div(compressed).unwrap_or(u64::MAX);
        if ratio > limit {
            return Err(SecurityError::ZipBomb { ratio, limit });
        }
        Ok(())
    }

    /// Account for `actual` decompressed bytes; declared sizes can lie.
    pub fn charge(&mut self, name: &str, actual: u64) -> Result<(), SecurityError> {
        self.check_single(name, actual)?;
        self.total = self.total.saturating_add(actual);
        if self.total > self.limits.max_total_size_bytes {
            return Err(SecurityError::OversizedResource {
                name: "<total>".to_string(),
                size_mb: self.total / MB,
                limit_mb: self.limits.max_total_size_bytes / MB,
            });
        }
        Ok(())
    }

    /// Largest number of bytes worth reading from one entry: one past the limit,
    /// so an oversized entry is detected without reading all of it.
    pub fn read_cap(&self) -> u64 {
        self.limits.max_resource_size_bytes.saturating_add(1)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    fn check_single(&self, name: &str, size: u64) -> Result<(), SecurityError> {
        if size > self.limits.max_resource_size_bytes {
            return Err(SecurityError::OversizedResource {
                name: name.to_string(),
                size_mb: size / MB,
                limit_mb: self.limits.max_resource_size_bytes / MB,
            });
        }
        Ok(())
    }
}

/// Reject absolute entry names and names with `..` segments.
pub fn check_path_traversal(entry_path: &str) -> Result<(), SecurityError> {
    let bytes = entry_path.as_bytes();
    let absolute = matches!(bytes.first(), Some(b'/' | b'\\'))
        || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':');
    let ascends = entry_path.split(['/', '\\']).any(|segment| segment == "..");

    if absolute || ascends {
        return Err(SecurityError::PathTraversal {
            path: entry_path.to_string(),
        });
    }
    Ok(())
}

/// Name of the DRM scheme declared in an `encryption.xml`, if any.
///
/// Encrypted entries that only use a font obfuscation algorithm are not DRM.
pub fn detect_drm(encryption_xml: &str) -> Option<&'static str> {
    if let Some((_, scheme)) = DRM_MARKERS
        .iter()
        .find(|(marker, _)| encryption_xml.contains(marker))
    {
        return Some(*scheme);
    }
    let encrypts = encryption_xml.contains("EncryptedData");
    let obfuscation_only = FONT_OBFUSCATION.iter().any(|alg| encryption_xml.contains(alg));
    (encrypts && !obfuscation_only).then_some("Unknown DRM")
}

/// Fail with [`SecurityError::DrmProtected`] when [`detect_drm`] finds a scheme.
pub fn check_epub_drm(encryption_xml: &str) -> Result<(), SecurityError> {
    match detect_drm(encryption_xml) {
        Some(scheme) => Err(SecurityError::DrmProtected {
            drm_type: scheme.to_string(),
        }),
        None => Ok(()),
    }
}
