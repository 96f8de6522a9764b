//! Timestamp normalization for reproducible archives
//!
//! Every entry's timestamp field has a fixed width, so patching never moves
//! a byte. The signature block is recomputed afterwards with the algorithm
//! already recorded in the archive.

use crate::archive::manifest::ArchiveManifest;
use crate::error::{PharError, Result};
use crate::signature::{ArchiveSigner, BackendRegistry, SignatureBlock};
use std::path::Path;

/// Rewrites entry timestamps of an assembled archive and re-signs it
#[derive(Debug, Clone)]
pub struct TimestampNormalizer {
    timestamp: u32,
    private_key_pem: Option<String>,
    backends: BackendRegistry,
}

impl TimestampNormalizer {
    pub fn new(timestamp: u32) -> Self {
        Self {
            timestamp,
            private_key_pem: None,
            backends: BackendRegistry::probe(),
        }
    }

    /// Private key for archives signed with an asymmetric algorithm
    pub fn with_private_key(mut self, private_key_pem: impl Into<String>) -> Self {
        self.private_key_pem = Some(private_key_pem.into());
        self
    }

    pub fn with_backends(mut self, backends: BackendRegistry) -> Self {
        self.backends = backends;
        self
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Patch `archive` in place
    ///
    /// The buffer is only modified once the manifest walk and the re-signing
    /// have both succeeded.
    pub fn normalize(&self, archive: &mut Vec<u8>) -> Result<SignatureBlock> {
        let manifest = ArchiveManifest::parse(archive)?;
        let previous = SignatureBlock::read_from(archive, manifest.signature_start)?;
        if manifest.signature_start + previous.encoded_len() != archive.len() {
            return Err(PharError::corrupt("trailing bytes after signature block"));
        }
        let signer = ArchiveSigner::new(
            previous.algorithm,
            self.private_key_pem.clone(),
            &self.backends,
        )?;

        let mut patched = archive[..manifest.signature_start].to_vec();
        let stamp = self.timestamp.to_le_bytes();
        for entry in &manifest.entries {
            let offset = entry.timestamp_offset();
            patched
                .get_mut(offset..offset + 4)
                .ok_or_else(|| {
                    PharError::corrupt(format!(
                        "timestamp field of {} outside manifest",
                        entry.descriptor.path
                    ))
                })?
                .copy_from_slice(&stamp);
        }

        let signature = signer.sign(&patched)?;
        patched.extend_from_slice(&signature.to_bytes());

        tracing::info!(
            files = manifest.entries.len(),
            timestamp = self.timestamp,
            algorithm = %signature.algorithm,
            "normalized archive timestamps"
        );

        *archive = patched;
        Ok(signature)
    }

    /// Normalize an archive on disk; the file is replaced atomically on success
    pub fn normalize_file(&self, path: &Path) -> Result<SignatureBlock> {
        let mut bytes = std::fs::read(path)?;
        let signature = self.normalize(&mut bytes)?;
        crate::build::write_atomically(path, &bytes)?;
        Ok(signature)
    }
}
