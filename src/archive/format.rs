use crate::archive::cursor::ByteCursor;
use crate::error::{PharError, Result};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use std::io::{Read, Write};

/// Stub terminator recognized by the runtime loader
pub const HALT_MARKER: &[u8] = b"__HALT_COMPILER(); ?>\r\n";

/// Manifest API version; little-endian bytes `0x11 0x10` (1.1.1)
pub const API_VERSION: u16 = 0x1011;

/// Global flag: archive carries a signature block
pub const FLAG_SIGNATURE: u32 = 0x0001_0000;

/// Global/entry flag: payload is raw-deflate compressed
pub const FLAG_DEFLATE: u32 = 0x0000_1000;

/// Entry flag bits holding unix permissions
pub const PERMISSION_MASK: u32 = 0x0000_01FF;

/// Permissions recorded when the source does not provide any
pub const DEFAULT_PERMISSIONS: u32 = 0o644;

/// Fixed manifest bytes: manifest_length, file_count, api_version, global_flags,
/// alias_length and metadata_length
pub const MANIFEST_FIXED_SIZE: usize = 4 + 4 + 2 + 4 + 4 + 4;

/// Fixed descriptor bytes besides name and entry metadata
pub const DESCRIPTOR_FIXED_SIZE: usize = 4 * 7;

/// Offset of the timestamp field relative to the end of the entry name
pub const TIMESTAMP_FIELD_OFFSET: usize = 4;

/// Compression modes supported by the runtime loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Deflate,
}

impl Compression {
    pub fn from_flags(flags: u32) -> Self {
        if flags & FLAG_DEFLATE != 0 {
            Self::Deflate
        } else {
            Self::None
        }
    }

    pub fn to_flags(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Deflate => FLAG_DEFLATE,
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "deflate" | "gz" | "gzip" => Ok(Self::Deflate),
            other => Err(PharError::InvalidConfig(format!(
                "unknown compression: {}",
                other
            ))),
        }
    }

    /// Compress `data`, falling back to stored bytes when it does not shrink
    pub fn apply(self, data: &[u8]) -> Result<(Vec<u8>, Compression)> {
        match self {
            Self::None => Ok((data.to_vec(), Self::None)),
            Self::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), flate2::Compression::best());
                encoder
                    .write_all(data)
                    .map_err(|e| PharError::CompressionFailed(e.to_string()))?;
                let compressed = encoder
                    .finish()
                    .map_err(|e| PharError::CompressionFailed(e.to_string()))?;

                if compressed.len() < data.len() {
                    Ok((compressed, Self::Deflate))
                } else {
                    Ok((data.to_vec(), Self::None))
                }
            }
        }
    }

    /// Inverse of [`Compression::apply`]; `expected_size` bounds the output
    pub fn restore(self, path: &str, stored: &[u8], expected_size: u32) -> Result<Vec<u8>> {
        match self {
            Self::None => Ok(stored.to_vec()),
            Self::Deflate => {
                let mut output = Vec::with_capacity((expected_size as usize).min(MAX_PREALLOCATION));
                DeflateDecoder::new(stored)
                    .take(expected_size as u64 + 1)
                    .read_to_end(&mut output)
                    .map_err(|e| PharError::DecompressionFailed {
                        path: path.to_string(),
                        message: e.to_string(),
                    })?;
                Ok(output)
            }
        }
    }
}

/// Upper bound on buffer reservation taken from an untrusted size field
const MAX_PREALLOCATION: usize = 1 << 20;

/// One file as it goes into the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Relative path inside the archive (forward slashes)
    pub path: String,
    /// Source bytes before compaction
    pub original: Vec<u8>,
    /// Bytes after compaction (what the runtime will read)
    pub compacted: Vec<u8>,
    /// Bytes written to the archive, possibly compressed
    pub stored: Vec<u8>,
    pub compression: Compression,
    /// CRC-32 of `compacted`
    pub crc32: u32,
    pub timestamp: u32,
    pub permissions: u32,
    pub metadata: Vec<u8>,
}

impl FileEntry {
    pub fn new(
        path: impl Into<String>,
        original: Vec<u8>,
        compacted: Vec<u8>,
        compression: Compression,
        timestamp: u32,
    ) -> Result<Self> {
        let (stored, compression) = compression.apply(&compacted)?;
        let crc32 = crc32fast::hash(&compacted);
        Ok(Self {
            path: path.into(),
            original,
            compacted,
            stored,
            compression,
            crc32,
            timestamp,
            permissions: DEFAULT_PERMISSIONS,
            metadata: Vec::new(),
        })
    }

    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions & PERMISSION_MASK;
        self
    }

    pub fn with_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn descriptor(&self) -> EntryDescriptor {
        EntryDescriptor {
            path: self.path.clone(),
            uncompressed_size: self.compacted.len() as u32,
            timestamp: self.timestamp,
            compressed_size: self.stored.len() as u32,
            crc32: self.crc32,
            flags: (self.permissions & PERMISSION_MASK) | self.compression.to_flags(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Per-file descriptor as laid out in the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDescriptor {
    pub path: String,
    pub uncompressed_size: u32,
    pub timestamp: u32,
    pub compressed_size: u32,
    pub crc32: u32,
    pub flags: u32,
    pub metadata: Vec<u8>,
}

impl EntryDescriptor {
    pub fn compression(&self) -> Compression {
        Compression::from_flags(self.flags)
    }

    pub fn permissions(&self) -> u32 {
        self.flags & PERMISSION_MASK
    }

    /// Bytes this descriptor occupies in the manifest
    pub fn encoded_len(&self) -> usize {
        DESCRIPTOR_FIXED_SIZE + self.path.len() + self.metadata.len()
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        write_blob(&mut writer, self.path.as_bytes())?;
        writer.write_all(&self.uncompressed_size.to_le_bytes())?;
        writer.write_all(&self.timestamp.to_le_bytes())?;
        writer.write_all(&self.compressed_size.to_le_bytes())?;
        writer.write_all(&self.crc32.to_le_bytes())?;
        writer.write_all(&self.flags.to_le_bytes())?;
        write_blob(&mut writer, &self.metadata)?;
        Ok(())
    }

    pub fn read_from(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let name = cursor.read_blob()?;
        let path = String::from_utf8(name.to_vec())
            .map_err(|e| PharError::corrupt(format!("invalid UTF-8 in entry name: {}", e)))?;
        let uncompressed_size = cursor.read_u32()?;
        let timestamp = cursor.read_u32()?;
        let compressed_size = cursor.read_u32()?;
        let crc32 = cursor.read_u32()?;
        let flags = cursor.read_u32()?;
        let metadata = cursor.read_blob()?.to_vec();

        Ok(Self {
            path,
            uncompressed_size,
            timestamp,
            compressed_size,
            crc32,
            flags,
            metadata,
        })
    }
}

/// Fixed part of the manifest preceding the entry descriptors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestHeader {
    /// Bytes following the length field up to the end of the last descriptor
    pub manifest_length: u32,
    pub file_count: u32,
    pub api_version: u16,
    pub global_flags: u32,
    pub alias: Vec<u8>,
    pub metadata: Vec<u8>,
}

impl ManifestHeader {
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(&self.manifest_length.to_le_bytes())?;
        writer.write_all(&self.file_count.to_le_bytes())?;
        writer.write_all(&self.api_version.to_le_bytes())?;
        writer.write_all(&self.global_flags.to_le_bytes())?;
        write_blob(&mut writer, &self.alias)?;
        write_blob(&mut writer, &self.metadata)?;
        Ok(())
    }

    pub fn read_from(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let manifest_length = cursor.read_u32()?;
        let file_count = cursor.read_u32()?;
        let api_version = cursor.read_u16()?;
        let global_flags = cursor.read_u32()?;
        let alias = cursor.read_blob()?.to_vec();
        let metadata = cursor.read_blob()?.to_vec();

        Ok(Self {
            manifest_length,
            file_count,
            api_version,
            global_flags,
            alias,
            metadata,
        })
    }

    /// Bytes this header occupies, length field included
    pub fn encoded_len(&self) -> usize {
        MANIFEST_FIXED_SIZE + self.alias.len() + self.metadata.len()
    }
}

/// Write a `u32` length-prefixed byte string
fn write_blob<W: Write>(mut writer: W, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| PharError::PathError(format!("field too long: {} bytes", bytes.len())))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(bytes)?;
    Ok(())
}

/// Offset just past the first halt marker, if present
pub fn find_stub_end(data: &[u8]) -> Option<usize> {
    data.windows(HALT_MARKER.len())
        .position(|w| w == HALT_MARKER)
        .map(|pos| pos + HALT_MARKER.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_from_flags() {
        assert_eq!(Compression::from_flags(0x1A4), Compression::None);
        assert_eq!(Compression::from_flags(0x1A4 | FLAG_DEFLATE), Compression::Deflate);
        assert_eq!(Compression::parse("gzip").unwrap(), Compression::Deflate);
        assert!(Compression::parse("bz2").is_err());
    }

    #[test]
    fn test_deflate_falls_back_when_not_smaller() {
        let (stored, mode) = Compression::Deflate.apply(b"ab").unwrap();
        assert_eq!(mode, Compression::None);
        assert_eq!(stored, b"ab");

        let text = b"<?php echo 'repeat';\n".repeat(50);
        let (stored, mode) = Compression::Deflate.apply(&text).unwrap();
        assert_eq!(mode, Compression::Deflate);
        assert!(stored.len() < text.len());
        let restored = Compression::Deflate
            .restore("a.php", &stored, text.len() as u32)
            .unwrap();
        assert_eq!(restored, text);
    }

    #[test]
    fn test_descriptor_layout() {
        let entry = FileEntry::new("src/a.php", b"x".to_vec(), b"hello".to_vec(), Compression::None, 1_700_000_000)
            .unwrap()
            .with_metadata(b"m".to_vec());
        let descriptor = entry.descriptor();

        let mut buf = Vec::new();
        descriptor.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), descriptor.encoded_len());

        // name_length | name | uncompressed_size | timestamp ...
        assert_eq!(&buf[0..4], &9u32.to_le_bytes());
        assert_eq!(&buf[4..13], b"src/a.php");
        assert_eq!(&buf[13..17], &5u32.to_le_bytes());
        assert_eq!(&buf[17..21], &1_700_000_000u32.to_le_bytes());
        assert_eq!(&buf[21..25], &5u32.to_le_bytes());
        assert_eq!(&buf[25..29], &crc32fast::hash(b"hello").to_le_bytes());
        assert_eq!(&buf[29..33], &0o644u32.to_le_bytes());

        let mut cursor = ByteCursor::new(&buf);
        assert_eq!(EntryDescriptor::read_from(&mut cursor).unwrap(), descriptor);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_manifest_header_layout() {
        let header = ManifestHeader {
            manifest_length: 100,
            file_count: 3,
            api_version: API_VERSION,
            global_flags: FLAG_SIGNATURE,
            alias: b"app.phar".to_vec(),
            metadata: Vec::new(),
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), header.encoded_len());
        assert_eq!(&buf[8..10], &[0x11, 0x10]);

        let parsed = ManifestHeader::read_from(&mut ByteCursor::new(&buf)).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_find_stub_end() {
        let data = b"<?php echo 1; __HALT_COMPILER(); ?>\r\nrest";
        assert_eq!(find_stub_end(data), Some(data.len() - 4));
        assert_eq!(find_stub_end(b"<?php echo 1;"), None);
    }
}
