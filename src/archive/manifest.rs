use crate::archive::cursor::ByteCursor;
use crate::archive::format::{
    find_stub_end, EntryDescriptor, ManifestHeader, TIMESTAMP_FIELD_OFFSET,
};
use crate::error::{PharError, Result};

/// Descriptor plus where it and its payload live in the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub descriptor: EntryDescriptor,
    /// Absolute offset of the descriptor's name_length field
    pub descriptor_offset: usize,
    /// Absolute offset of the stored payload
    pub data_offset: usize,
}

impl ManifestEntry {
    /// Absolute offset of this entry's 4-byte timestamp field
    pub fn timestamp_offset(&self) -> usize {
        self.descriptor_offset + 4 + self.descriptor.path.len() + TIMESTAMP_FIELD_OFFSET
    }

    pub fn data_range(&self) -> std::ops::Range<usize> {
        self.data_offset..self.data_offset + self.descriptor.compressed_size as usize
    }
}

/// Parsed manifest of an assembled archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveManifest {
    /// Offset just past the halt marker
    pub stub_end: usize,
    pub header: ManifestHeader,
    pub entries: Vec<ManifestEntry>,
    /// `stub_end + 4 + manifest_length`; the first payload byte
    pub manifest_end: usize,
    /// `manifest_end + Σ compressed_size`
    pub signature_start: usize,
}

impl ArchiveManifest {
    /// Walk stub, header and descriptors of `data`
    ///
    /// Descriptors are walked up to the manifest end declared by
    /// `manifest_length`; the walked count must equal `file_count`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let stub_end = find_stub_end(data).ok_or(PharError::MissingHaltMarker)?;

        let mut cursor = ByteCursor::at(data, stub_end)?;
        let manifest_length = cursor.read_u32()? as usize;
        let manifest_end = stub_end
            .checked_add(4)
            .and_then(|v| v.checked_add(manifest_length))
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                PharError::corrupt(format!(
                    "manifest length {} runs past end of archive (len {})",
                    manifest_length,
                    data.len()
                ))
            })?;

        // Reads are confined to the declared manifest
        let mut cursor = ByteCursor::at(&data[..manifest_end], stub_end)?;
        let header = ManifestHeader::read_from(&mut cursor)?;

        let mut entries = Vec::with_capacity((header.file_count as usize).min(4096));
        let mut data_offset = manifest_end;
        while !cursor.is_empty() {
            let descriptor_offset = cursor.position();
            let descriptor = EntryDescriptor::read_from(&mut cursor)?;

            let next = data_offset
                .checked_add(descriptor.compressed_size as usize)
                .filter(|&end| end <= data.len())
                .ok_or_else(|| {
                    PharError::corrupt(format!(
                        "payload of {} runs past end of archive",
                        descriptor.path
                    ))
                })?;

            entries.push(ManifestEntry {
                descriptor,
                descriptor_offset,
                data_offset,
            });
            data_offset = next;
        }

        let walked = entries.len() as u32;
        if walked != header.file_count {
            return Err(PharError::EntryCountMismatch {
                declared: header.file_count,
                walked,
            });
        }

        Ok(Self {
            stub_end,
            header,
            entries,
            manifest_end,
            signature_start: data_offset,
        })
    }

    pub fn alias(&self) -> Option<&str> {
        if self.header.alias.is_empty() {
            None
        } else {
            std::str::from_utf8(&self.header.alias).ok()
        }
    }

    pub fn find(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.descriptor.path == path)
    }
}
