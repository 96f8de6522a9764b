//! Manifest introspection for diff and inspection tooling
//!
//! # Scope
//!
//! [`ArchiveInfo`] is a plain, serializable view of an archive's manifest and
//! signature block:
//! - Archive identification (alias, API version, global flags)
//! - File inventory with sizes, CRC-32 and timestamps
//! - The signature algorithm and digest
//!
//! It never carries file contents, so two reports can be diffed cheaply.
//!
//! # Usage
//!
//! ```no_run
//! use pharkit::ArchiveReader;
//! # use pharkit::error::Result;
//!
//! # fn main() -> Result<()> {
//! let reader = ArchiveReader::open("app.phar")?;
//! let info = reader.inspect();
//! println!("{}", String::from_utf8_lossy(&info.to_json()?));
//! # Ok(())
//! # }
//! ```

use crate::archive::{ArchiveReader, Compression};
use crate::error::{PharError, Result};
use crate::signature::SignatureAlgorithm;
use serde::{Deserialize, Serialize};

/// Archive-level summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    /// Alias passed to the runtime loader
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// API version as `major.minor.patch`
    pub api_version: String,

    /// Raw global flags
    pub flags: u32,

    /// Length of the archive metadata blob
    pub metadata_size: usize,

    /// Files in archive order
    #[serde(default)]
    pub files: Vec<EntrySummary>,

    /// Trailing signature
    pub signature: SignatureSummary,
}

/// One file of the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub path: String,

    /// Size after compaction
    pub size: u32,

    /// Size as stored
    pub compressed_size: u32,

    /// Lowercase hex, as printed by most tools
    pub crc32: String,

    pub timestamp: u32,

    pub compression: Compression,

    /// Unix permission bits
    pub permissions: u32,
}

/// Signature block summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureSummary {
    pub algorithm: SignatureAlgorithm,

    /// Uppercase hex digest or signature
    pub hash: String,
}

fn format_api_version(version: u16) -> String {
    let [lo, hi] = version.to_le_bytes();
    format!("{}.{}.{}", lo >> 4, lo & 0x0F, hi >> 4)
}

impl ArchiveInfo {
    pub(crate) fn from_reader(reader: &ArchiveReader) -> Self {
        let manifest = reader.manifest();
        let files = manifest
            .entries
            .iter()
            .map(|entry| {
                let d = &entry.descriptor;
                EntrySummary {
                    path: d.path.clone(),
                    size: d.uncompressed_size,
                    compressed_size: d.compressed_size,
                    crc32: format!("{:08x}", d.crc32),
                    timestamp: d.timestamp,
                    compression: d.compression(),
                    permissions: d.permissions(),
                }
            })
            .collect();

        Self {
            alias: manifest.alias().map(str::to_string),
            api_version: format_api_version(manifest.header.api_version),
            flags: manifest.header.global_flags,
            metadata_size: manifest.header.metadata.len(),
            files,
            signature: SignatureSummary {
                algorithm: reader.signature().algorithm,
                hash: reader.signature().hex(),
            },
        }
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(PharError::from)
    }

    /// Parse from JSON
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(PharError::from)
    }

    /// Paths present in only one of the two reports, and paths whose
    /// size, CRC or timestamp differ
    pub fn diff_paths(&self, other: &ArchiveInfo) -> Vec<String> {
        let mut changed = Vec::new();
        for entry in &self.files {
            match other.files.iter().find(|o| o.path == entry.path) {
                Some(o) if o == entry => {}
                _ => changed.push(entry.path.clone()),
            }
        }
        for entry in &other.files {
            if !self.files.iter().any(|s| s.path == entry.path) {
                changed.push(entry.path.clone());
            }
        }
        changed
    }
}
