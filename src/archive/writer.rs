use crate::archive::format::{
    Compression, EntryDescriptor, FileEntry, ManifestHeader, API_VERSION, FLAG_DEFLATE,
    FLAG_SIGNATURE, MANIFEST_FIXED_SIZE,
};
use crate::archive::stub::{finish_stub, StubGenerator};
use crate::error::{PharError, Result};
use crate::signature::{ArchiveSigner, SignatureBlock};
use std::collections::HashSet;

/// Offsets of the regions in an assembled archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLayout {
    pub stub_end: usize,
    pub manifest_end: usize,
    pub signature_start: usize,
    pub total_len: usize,
}

/// An archive assembled in memory
#[derive(Debug, Clone)]
pub struct AssembledArchive {
    pub bytes: Vec<u8>,
    pub layout: ArchiveLayout,
    pub signature: SignatureBlock,
}

/// Lays out stub, manifest, payloads and signature block
#[derive(Debug, Clone)]
pub struct ArchiveAssembler {
    stub: Vec<u8>,
    alias: Option<String>,
    metadata: Vec<u8>,
    signer: ArchiveSigner,
}

impl ArchiveAssembler {
    /// Assembler with the default generated stub
    pub fn new(signer: ArchiveSigner) -> Self {
        Self {
            stub: StubGenerator::new().generate(),
            alias: None,
            metadata: Vec::new(),
            signer,
        }
    }

    /// Use custom stub bytes; the halt marker is appended when missing
    pub fn with_stub(mut self, stub: &[u8]) -> Self {
        self.stub = finish_stub(stub);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        self.alias = if alias.is_empty() { None } else { Some(alias) };
        self
    }

    /// Archive-level metadata blob (opaque to pharkit)
    pub fn with_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn signer(&self) -> &ArchiveSigner {
        &self.signer
    }

    /// Global flags derived from the entries
    pub fn global_flags(entries: &[FileEntry]) -> u32 {
        let compressed = entries
            .iter()
            .any(|e| e.compression == Compression::Deflate);
        FLAG_SIGNATURE | if compressed { FLAG_DEFLATE } else { 0 }
    }

    /// Write the whole archive for `entries`, in the given order
    pub fn assemble(&self, entries: &[FileEntry]) -> Result<AssembledArchive> {
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in entries {
            if !seen.insert(entry.path.as_str()) {
                return Err(PharError::DuplicatePath(entry.path.clone()));
            }
        }

        let descriptors: Vec<EntryDescriptor> = entries.iter().map(FileEntry::descriptor).collect();
        let alias = self.alias.clone().unwrap_or_default().into_bytes();

        let manifest_len = MANIFEST_FIXED_SIZE - 4
            + alias.len()
            + self.metadata.len()
            + descriptors.iter().map(EntryDescriptor::encoded_len).sum::<usize>();
        let header = ManifestHeader {
            manifest_length: to_u32(manifest_len, "manifest")?,
            file_count: to_u32(entries.len(), "file count")?,
            api_version: API_VERSION,
            global_flags: Self::global_flags(entries),
            alias,
            metadata: self.metadata.clone(),
        };

        let payload_len: usize = entries.iter().map(|e| e.stored.len()).sum();
        let mut bytes = Vec::with_capacity(self.stub.len() + 4 + manifest_len + payload_len + 128);

        // 1. Stub
        bytes.extend_from_slice(&self.stub);
        let stub_end = bytes.len();

        // 2-3. Manifest header and descriptors
        header.write_to(&mut bytes)?;
        for descriptor in &descriptors {
            descriptor.write_to(&mut bytes)?;
        }
        let manifest_end = bytes.len();
        debug_assert_eq!(manifest_end, stub_end + 4 + manifest_len);

        // 4. Payloads in descriptor order
        for entry in entries {
            bytes.extend_from_slice(&entry.stored);
        }
        let signature_start = bytes.len();

        // 5. Signature over everything written so far
        let signature = self.signer.sign(&bytes)?;
        bytes.extend_from_slice(&signature.to_bytes());

        tracing::debug!(
            files = entries.len(),
            manifest_bytes = manifest_len,
            payload_bytes = payload_len,
            algorithm = %signature.algorithm,
            "assembled archive"
        );

        let total_len = bytes.len();
        Ok(AssembledArchive {
            bytes,
            layout: ArchiveLayout {
                stub_end,
                manifest_end,
                signature_start,
                total_len,
            },
            signature,
        })
    }
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| PharError::Internal(format!("{} too large for archive format: {}", what, value)))
}
