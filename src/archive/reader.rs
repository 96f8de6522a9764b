use crate::archive::format::EntryDescriptor;
use crate::archive::manifest::ArchiveManifest;
use crate::error::{PharError, Result};
use crate::inspect::ArchiveInfo;
use crate::signature::{public_key_path, verify_block, BackendRegistry, SignatureBlock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Normalize path to forward slashes (cross-platform compatibility)
fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Read access to an assembled archive held in memory
pub struct ArchiveReader {
    bytes: Vec<u8>,
    source: Option<PathBuf>,
    manifest: ArchiveManifest,
    signature: SignatureBlock,
    index: HashMap<String, usize>,
    entry_list: Vec<String>,
}

impl ArchiveReader {
    /// Open and parse an archive file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let mut reader = Self::from_bytes(bytes)?;
        reader.source = Some(path.to_path_buf());
        Ok(reader)
    }

    /// Parse an archive already in memory
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let manifest = ArchiveManifest::parse(&bytes)?;
        let signature = SignatureBlock::read_from(&bytes, manifest.signature_start)?;

        let mut index = HashMap::with_capacity(manifest.entries.len());
        let mut entry_list = Vec::with_capacity(manifest.entries.len());
        for (i, entry) in manifest.entries.iter().enumerate() {
            entry_list.push(entry.descriptor.path.clone());
            index.insert(entry.descriptor.path.clone(), i);
        }

        Ok(Self {
            bytes,
            source: None,
            manifest,
            signature,
            index,
            entry_list,
        })
    }

    pub fn manifest(&self) -> &ArchiveManifest {
        &self.manifest
    }

    pub fn signature(&self) -> &SignatureBlock {
        &self.signature
    }

    pub fn alias(&self) -> Option<&str> {
        self.manifest.alias()
    }

    /// Stub bytes, halt marker included
    pub fn stub(&self) -> &[u8] {
        &self.bytes[..self.manifest.stub_end]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Get number of entries in archive
    pub fn entry_count(&self) -> usize {
        self.entry_list.len()
    }

    /// List all file paths in archive order
    pub fn list_files(&self) -> &[String] {
        &self.entry_list
    }

    /// Check if a file exists in the archive
    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(&normalize_path(path))
    }

    /// Get entry information without reading data
    pub fn get_entry(&self, path: &str) -> Option<&EntryDescriptor> {
        self.index
            .get(&normalize_path(path))
            .map(|&i| &self.manifest.entries[i].descriptor)
    }

    /// Stored (possibly compressed) bytes of an entry
    pub fn read_raw(&self, path: &str) -> Result<&[u8]> {
        let i = *self
            .index
            .get(&normalize_path(path))
            .ok_or_else(|| PharError::FileNotFound(path.to_string()))?;
        Ok(&self.bytes[self.manifest.entries[i].data_range()])
    }

    /// Read a file from the archive, inflating and checking its CRC
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let raw = self.read_raw(path)?;
        let descriptor = self
            .get_entry(path)
            .ok_or_else(|| PharError::FileNotFound(path.to_string()))?;

        let contents = descriptor
            .compression()
            .restore(&descriptor.path, raw, descriptor.uncompressed_size)?;
        if contents.len() != descriptor.uncompressed_size as usize {
            return Err(PharError::corrupt(format!(
                "{}: expected {} bytes, got {}",
                descriptor.path,
                descriptor.uncompressed_size,
                contents.len()
            )));
        }

        let computed_crc = crc32fast::hash(&contents);
        if computed_crc != descriptor.crc32 {
            return Err(PharError::CrcMismatch {
                path: descriptor.path.clone(),
                expected: descriptor.crc32,
                actual: computed_crc,
            });
        }

        Ok(contents)
    }

    /// Bytes covered by the signature block
    pub fn signed_region(&self) -> &[u8] {
        &self.bytes[..self.manifest.signature_start]
    }

    /// Verify the signature block
    ///
    /// Asymmetric algorithms look for `<archive>.pubkey` next to the file the
    /// reader was opened from.
    pub fn verify(&self) -> Result<()> {
        let key_path = self.source.as_deref().map(public_key_path);
        self.verify_with(key_path.as_deref(), &BackendRegistry::probe())
    }

    /// Verify with an explicit public key location and backend set
    pub fn verify_with(&self, key_path: Option<&Path>, backends: &BackendRegistry) -> Result<()> {
        verify_block(&self.signature, self.signed_region(), key_path, backends)
    }

    /// Serializable summary for inspection tooling
    pub fn inspect(&self) -> ArchiveInfo {
        ArchiveInfo::from_reader(self)
    }
}
