//! Archive signatures
//!
//! The trailing [`SignatureBlock`] covers every byte that precedes it. Digest
//! algorithms store the raw digest; asymmetric algorithms store the signature
//! followed by its length, and need a companion public key
//! (`<archive>.pubkey`) to verify.
//!
//! Signing goes through [`ArchiveSigner`], verification through
//! [`SignatureEngine`]. Both resolve their asymmetric backend once, at
//! construction, from a [`BackendRegistry`].

mod backend;

pub use backend::{AsymmetricBackend, BackendRegistry, CryptoErrorQueue};

#[cfg(feature = "ed25519-backend")]
pub use backend::Ed25519Backend;
#[cfg(feature = "rsa-backend")]
pub use backend::RsaBackend;

use crate::error::{PharError, Result};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Fixed marker closing every archive
pub const SIGNATURE_MARKER: [u8; 4] = *b"GBMB";

/// Algorithm id plus marker
pub const SIGNATURE_TRAILER_SIZE: usize = 8;

/// Signature algorithms and their on-disk ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
    /// RSA over SHA-1
    #[serde(rename = "openssl")]
    OpenSsl,
    #[serde(rename = "openssl_sha256")]
    OpenSslSha256,
    #[serde(rename = "openssl_sha512")]
    OpenSslSha512,
    /// Not understood by the runtime loader; pharkit tooling only
    Ed25519,
}

impl SignatureAlgorithm {
    pub fn id(self) -> u32 {
        match self {
            Self::Md5 => 0x01,
            Self::Sha1 => 0x02,
            Self::Sha256 => 0x03,
            Self::Sha512 => 0x04,
            Self::OpenSsl => 0x10,
            Self::OpenSslSha256 => 0x11,
            Self::OpenSslSha512 => 0x12,
            Self::Ed25519 => 0x20,
        }
    }

    pub fn from_id(id: u32) -> Result<Self> {
        match id {
            0x01 => Ok(Self::Md5),
            0x02 => Ok(Self::Sha1),
            0x03 => Ok(Self::Sha256),
            0x04 => Ok(Self::Sha512),
            0x10 => Ok(Self::OpenSsl),
            0x11 => Ok(Self::OpenSslSha256),
            0x12 => Ok(Self::OpenSslSha512),
            0x20 => Ok(Self::Ed25519),
            other => Err(PharError::UnsupportedAlgorithm(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::OpenSsl => "openssl",
            Self::OpenSslSha256 => "openssl_sha256",
            Self::OpenSslSha512 => "openssl_sha512",
            Self::Ed25519 => "ed25519",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().replace('-', "_").as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            "openssl" | "openssl_sha1" => Ok(Self::OpenSsl),
            "openssl_sha256" => Ok(Self::OpenSslSha256),
            "openssl_sha512" => Ok(Self::OpenSslSha512),
            "ed25519" => Ok(Self::Ed25519),
            _ => Err(PharError::UnknownAlgorithm(name.to_string())),
        }
    }

    pub fn is_asymmetric(self) -> bool {
        self.digest_len().is_none()
    }

    /// Raw digest size for digest algorithms
    pub fn digest_len(self) -> Option<usize> {
        match self {
            Self::Md5 => Some(16),
            Self::Sha1 => Some(20),
            Self::Sha256 => Some(32),
            Self::Sha512 => Some(64),
            _ => None,
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Location of the companion public key for an archive
pub fn public_key_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(".pubkey");
    PathBuf::from(name)
}

/// Streaming hasher over the digest algorithms
#[derive(Clone)]
pub enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    /// `None` for asymmetric algorithms
    pub fn new(algorithm: SignatureAlgorithm) -> Option<Self> {
        match algorithm {
            SignatureAlgorithm::Md5 => Some(Self::Md5(Md5::new())),
            SignatureAlgorithm::Sha1 => Some(Self::Sha1(Sha1::new())),
            SignatureAlgorithm::Sha256 => Some(Self::Sha256(Sha256::new())),
            SignatureAlgorithm::Sha512 => Some(Self::Sha512(Sha512::new())),
            _ => None,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        match self {
            Self::Md5(h) => h.update(chunk),
            Self::Sha1(h) => h.update(chunk),
            Self::Sha256(h) => h.update(chunk),
            Self::Sha512(h) => h.update(chunk),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            Self::Md5(h) => h.finalize().to_vec(),
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// Trailing signature of an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureBlock {
    pub algorithm: SignatureAlgorithm,
    /// Raw digest or signature bytes
    pub signature: Vec<u8>,
}

impl SignatureBlock {
    pub fn new(algorithm: SignatureAlgorithm, signature: Vec<u8>) -> Self {
        Self {
            algorithm,
            signature,
        }
    }

    /// Uppercase hex of the signature bytes
    pub fn hex(&self) -> String {
        hex::encode_upper(&self.signature)
    }

    pub fn encoded_len(&self) -> usize {
        let length_field = if self.algorithm.is_asymmetric() { 4 } else { 0 };
        self.signature.len() + length_field + SIGNATURE_TRAILER_SIZE
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.signature);
        if self.algorithm.is_asymmetric() {
            out.extend_from_slice(&(self.signature.len() as u32).to_le_bytes());
        }
        out.extend_from_slice(&self.algorithm.id().to_le_bytes());
        out.extend_from_slice(&SIGNATURE_MARKER);
        out
    }

    /// Parse the block occupying `data[start..]`
    pub fn read_from(data: &[u8], start: usize) -> Result<Self> {
        if start > data.len() || data.len() - start < SIGNATURE_TRAILER_SIZE {
            return Err(PharError::corrupt(format!(
                "signature block at offset {} truncated (archive len {})",
                start,
                data.len()
            )));
        }

        let trailer = &data[data.len() - SIGNATURE_TRAILER_SIZE..];
        if trailer[4..] != SIGNATURE_MARKER {
            return Err(PharError::corrupt("missing signature marker"));
        }
        let id = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let algorithm = SignatureAlgorithm::from_id(id)?;

        let body = &data[start..data.len() - SIGNATURE_TRAILER_SIZE];
        let signature = match algorithm.digest_len() {
            Some(expected) => {
                if body.len() != expected {
                    return Err(PharError::corrupt(format!(
                        "{} digest is {} bytes, found {}",
                        algorithm,
                        expected,
                        body.len()
                    )));
                }
                body.to_vec()
            }
            None => {
                if body.len() < 4 {
                    return Err(PharError::corrupt("asymmetric signature length missing"));
                }
                let (sig, len) = body.split_at(body.len() - 4);
                let declared = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;
                if declared != sig.len() {
                    return Err(PharError::corrupt(format!(
                        "signature length field says {} bytes, block holds {}",
                        declared,
                        sig.len()
                    )));
                }
                sig.to_vec()
            }
        };

        Ok(Self {
            algorithm,
            signature,
        })
    }
}

/// Produces signature blocks for assembled archives
#[derive(Debug, Clone)]
pub struct ArchiveSigner {
    algorithm: SignatureAlgorithm,
    private_key_pem: Option<String>,
    backend: Option<Arc<dyn AsymmetricBackend>>,
}

impl ArchiveSigner {
    /// Signer for a digest algorithm
    pub fn digest(algorithm: SignatureAlgorithm) -> Result<Self> {
        if algorithm.is_asymmetric() {
            return Err(PharError::KeyMaterial(format!(
                "{} requires a private key",
                algorithm
            )));
        }
        Ok(Self {
            algorithm,
            private_key_pem: None,
            backend: None,
        })
    }

    /// Signer for any algorithm; asymmetric algorithms need `private_key_pem`
    pub fn new(
        algorithm: SignatureAlgorithm,
        private_key_pem: Option<String>,
        backends: &BackendRegistry,
    ) -> Result<Self> {
        if !algorithm.is_asymmetric() {
            return Self::digest(algorithm);
        }
        let backend = backends.select(algorithm)?;
        let pem = private_key_pem.ok_or_else(|| {
            PharError::KeyMaterial(format!("{} requires a private key", algorithm))
        })?;
        // Fail early on unusable keys rather than after compaction
        backend.public_key_pem(&pem)?;

        tracing::debug!(algorithm = %algorithm, backend = backend.name(), "selected signing backend");
        Ok(Self {
            algorithm,
            private_key_pem: Some(pem),
            backend: Some(backend),
        })
    }

    /// Like [`ArchiveSigner::new`], reading the private key from disk
    pub fn from_key_file(
        algorithm: SignatureAlgorithm,
        key_path: Option<&Path>,
        backends: &BackendRegistry,
    ) -> Result<Self> {
        let pem = match key_path {
            Some(path) if algorithm.is_asymmetric() => {
                Some(std::fs::read_to_string(path).map_err(|e| {
                    PharError::KeyMaterial(format!("cannot read {}: {}", path.display(), e))
                })?)
            }
            _ => None,
        };
        Self::new(algorithm, pem, backends)
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Sign everything that precedes the signature block
    pub fn sign(&self, data: &[u8]) -> Result<SignatureBlock> {
        let signature = match (&self.backend, &self.private_key_pem) {
            (Some(backend), Some(pem)) => backend.sign(self.algorithm, pem, data)?,
            _ => {
                let mut hasher = Hasher::new(self.algorithm)
                    .ok_or_else(|| PharError::NoCryptoBackend(self.algorithm.name().to_string()))?;
                hasher.update(data);
                hasher.finalize()
            }
        };
        Ok(SignatureBlock::new(self.algorithm, signature))
    }

    /// Public key to publish next to the archive, for asymmetric algorithms
    pub fn public_key_pem(&self) -> Result<Option<String>> {
        match (&self.backend, &self.private_key_pem) {
            (Some(backend), Some(pem)) => Ok(Some(backend.public_key_pem(pem)?)),
            _ => Ok(None),
        }
    }
}

/// One way of checking a signature over streamed data
pub trait VerificationStrategy: Send {
    fn update(&mut self, chunk: &[u8]);

    fn verify(&mut self, expected: &[u8], errors: &mut CryptoErrorQueue) -> Result<bool>;
}

/// Compares a finalized digest, as uppercase hex, with the expected string
pub struct DigestStrategy {
    hasher: Option<Hasher>,
}

impl VerificationStrategy for DigestStrategy {
    fn update(&mut self, chunk: &[u8]) {
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(chunk);
        }
    }

    fn verify(&mut self, expected: &[u8], _: &mut CryptoErrorQueue) -> Result<bool> {
        let hasher = self
            .hasher
            .take()
            .ok_or_else(|| PharError::Internal("digest already finalized".to_string()))?;
        let actual = hex::encode_upper(hasher.finalize());
        Ok(actual.as_bytes() == expected)
    }
}

/// Buffers the data and checks it against a public key
pub struct AsymmetricStrategy {
    algorithm: SignatureAlgorithm,
    backend: Arc<dyn AsymmetricBackend>,
    public_key_pem: String,
    buffer: Vec<u8>,
}

impl VerificationStrategy for AsymmetricStrategy {
    fn update(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    fn verify(&mut self, expected: &[u8], errors: &mut CryptoErrorQueue) -> Result<bool> {
        // Leftovers from unrelated calls must not be read as this failure
        errors.clear();
        self.backend.verify(
            self.algorithm,
            &self.public_key_pem,
            &self.buffer,
            expected,
            errors,
        )
    }
}

/// Streaming signature verifier
pub struct SignatureEngine {
    algorithm: SignatureAlgorithm,
    strategy: Box<dyn VerificationStrategy>,
    errors: CryptoErrorQueue,
}

impl SignatureEngine {
    /// Select the strategy for `algorithm`
    ///
    /// Asymmetric algorithms read their public key from `key_path`
    /// (conventionally [`public_key_path`] of the archive).
    pub fn init(
        algorithm: SignatureAlgorithm,
        key_path: Option<&Path>,
        backends: &BackendRegistry,
    ) -> Result<Self> {
        let strategy: Box<dyn VerificationStrategy> = match Hasher::new(algorithm) {
            Some(hasher) => Box::new(DigestStrategy {
                hasher: Some(hasher),
            }),
            None => {
                let backend = backends.select(algorithm)?;
                let path = key_path.ok_or_else(|| {
                    PharError::KeyMaterial(format!("{} requires a public key", algorithm))
                })?;
                let public_key_pem = std::fs::read_to_string(path).map_err(|e| {
                    PharError::KeyMaterial(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::asymmetric_strategy(algorithm, backend, public_key_pem)
            }
        };

        Ok(Self {
            algorithm,
            strategy,
            errors: CryptoErrorQueue::new(),
        })
    }

    /// Engine for an asymmetric algorithm with the public key already in memory
    pub fn with_public_key(
        algorithm: SignatureAlgorithm,
        public_key_pem: impl Into<String>,
        backends: &BackendRegistry,
    ) -> Result<Self> {
        if !algorithm.is_asymmetric() {
            return Self::init(algorithm, None, backends);
        }
        let backend = backends.select(algorithm)?;
        Ok(Self {
            algorithm,
            strategy: Self::asymmetric_strategy(algorithm, backend, public_key_pem.into()),
            errors: CryptoErrorQueue::new(),
        })
    }

    fn asymmetric_strategy(
        algorithm: SignatureAlgorithm,
        backend: Arc<dyn AsymmetricBackend>,
        public_key_pem: String,
    ) -> Box<dyn VerificationStrategy> {
        Box::new(AsymmetricStrategy {
            algorithm,
            backend,
            public_key_pem,
            buffer: Vec::new(),
        })
    }

    /// Adopt an error queue carried over from earlier cryptographic calls
    pub fn with_error_queue(mut self, errors: CryptoErrorQueue) -> Self {
        self.errors = errors;
        self
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.strategy.update(chunk);
    }

    /// Check the streamed data against `expected`
    ///
    /// For digest algorithms `expected` is the uppercase hex digest; for
    /// asymmetric algorithms it is the raw signature.
    pub fn verify(&mut self, expected: &[u8]) -> Result<bool> {
        self.strategy.verify(expected, &mut self.errors)
    }

    /// Diagnostics left by the last verification
    pub fn errors(&self) -> &CryptoErrorQueue {
        &self.errors
    }

    pub fn into_error_queue(self) -> CryptoErrorQueue {
        self.errors
    }
}

/// Verify a parsed signature block against the bytes it covers
pub fn verify_block(
    block: &SignatureBlock,
    signed: &[u8],
    key_path: Option<&Path>,
    backends: &BackendRegistry,
) -> Result<()> {
    let mut engine = SignatureEngine::init(block.algorithm, key_path, backends)?;
    for chunk in signed.chunks(VERIFY_CHUNK_SIZE) {
        engine.update(chunk);
    }

    let expected = if block.algorithm.is_asymmetric() {
        block.signature.clone()
    } else {
        block.hex().into_bytes()
    };

    if engine.verify(&expected)? {
        Ok(())
    } else {
        if let Some(reason) = engine.errors().last() {
            tracing::debug!(algorithm = %block.algorithm, "verification failed: {}", reason);
        }
        Err(PharError::SignatureMismatch)
    }
}

/// Chunk size used when streaming archive bytes into the engine
pub const VERIFY_CHUNK_SIZE: usize = 64 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_ids_roundtrip() {
        for algorithm in [
            SignatureAlgorithm::Md5,
            SignatureAlgorithm::Sha1,
            SignatureAlgorithm::Sha256,
            SignatureAlgorithm::Sha512,
            SignatureAlgorithm::OpenSsl,
            SignatureAlgorithm::OpenSslSha256,
            SignatureAlgorithm::OpenSslSha512,
            SignatureAlgorithm::Ed25519,
        ] {
            assert_eq!(SignatureAlgorithm::from_id(algorithm.id()).unwrap(), algorithm);
            assert_eq!(SignatureAlgorithm::parse(algorithm.name()).unwrap(), algorithm);
        }
        assert!(matches!(
            SignatureAlgorithm::from_id(0x99),
            Err(PharError::UnsupportedAlgorithm(0x99))
        ));
        assert!(SignatureAlgorithm::parse("crc32").is_err());
    }

    #[test]
    fn test_digest_sign_and_verify_every_algorithm() {
        let data = b"stub and manifest and contents";
        let backends = BackendRegistry::empty();

        for algorithm in [
            SignatureAlgorithm::Md5,
            SignatureAlgorithm::Sha1,
            SignatureAlgorithm::Sha256,
            SignatureAlgorithm::Sha512,
        ] {
            let block = ArchiveSigner::digest(algorithm).unwrap().sign(data).unwrap();
            assert_eq!(Some(block.signature.len()), algorithm.digest_len());
            assert!(verify_block(&block, data, None, &backends).is_ok());

            let mut tampered = data.to_vec();
            tampered[3] ^= 0x01;
            assert!(matches!(
                verify_block(&block, &tampered, None, &backends),
                Err(PharError::SignatureMismatch)
            ));
        }
    }

    #[test]
    fn test_sha256_known_digest() {
        let block = ArchiveSigner::digest(SignatureAlgorithm::Sha256)
            .unwrap()
            .sign(b"abc")
            .unwrap();
        assert_eq!(
            block.hex(),
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
        );
    }

    #[test]
    fn test_engine_streams_in_chunks() {
        let backends = BackendRegistry::empty();
        let data = vec![0x5Au8; 200_000];
        let expected = ArchiveSigner::digest(SignatureAlgorithm::Sha1)
            .unwrap()
            .sign(&data)
            .unwrap()
            .hex();

        let mut engine = SignatureEngine::init(SignatureAlgorithm::Sha1, None, &backends).unwrap();
        for chunk in data.chunks(777) {
            engine.update(chunk);
        }
        assert!(engine.verify(expected.as_bytes()).unwrap());
        // A finalized digest cannot be verified twice
        assert!(engine.verify(expected.as_bytes()).is_err());
    }

    #[test]
    fn test_digest_compare_is_exact_uppercase_hex() {
        let backends = BackendRegistry::empty();
        let expected = ArchiveSigner::digest(SignatureAlgorithm::Sha256)
            .unwrap()
            .sign(b"abc")
            .unwrap()
            .hex();

        let mut engine = SignatureEngine::init(SignatureAlgorithm::Sha256, None, &backends).unwrap();
        engine.update(b"abc");
        assert!(!engine.verify(expected.to_lowercase().as_bytes()).unwrap());

        let mut engine = SignatureEngine::init(SignatureAlgorithm::Sha256, None, &backends).unwrap();
        engine.update(b"abc");
        assert!(engine.verify(expected.as_bytes()).unwrap());
    }

    #[test]
    fn test_block_layout_digest() {
        let block = SignatureBlock::new(SignatureAlgorithm::Md5, vec![0xAB; 16]);
        let bytes = block.to_bytes();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[16..20], &1u32.to_le_bytes());
        assert_eq!(&bytes[20..], b"GBMB");

        let mut archive = b"prefix".to_vec();
        archive.extend_from_slice(&bytes);
        assert_eq!(SignatureBlock::read_from(&archive, 6).unwrap(), block);
        // Wrong derived start is structural corruption
        assert!(matches!(
            SignatureBlock::read_from(&archive, 5),
            Err(PharError::CorruptArchive(_))
        ));
    }

    #[test]
    fn test_block_layout_asymmetric() {
        let block = SignatureBlock::new(SignatureAlgorithm::OpenSslSha256, vec![7; 128]);
        let bytes = block.to_bytes();
        assert_eq!(bytes.len(), 128 + 4 + 8);
        assert_eq!(&bytes[128..132], &128u32.to_le_bytes());
        assert_eq!(&bytes[132..136], &0x11u32.to_le_bytes());
        assert_eq!(SignatureBlock::read_from(&bytes, 0).unwrap(), block);
    }

    #[test]
    fn test_missing_marker() {
        let mut bytes = SignatureBlock::new(SignatureAlgorithm::Md5, vec![0; 16]).to_bytes();
        let len = bytes.len();
        bytes[len - 1] = b'X';
        assert!(matches!(
            SignatureBlock::read_from(&bytes, 0),
            Err(PharError::CorruptArchive(_))
        ));
    }

    #[test]
    fn test_asymmetric_without_key_is_key_error() {
        let backends = BackendRegistry::probe();
        let err = ArchiveSigner::new(SignatureAlgorithm::OpenSslSha256, None, &backends).unwrap_err();
        assert!(matches!(err, PharError::KeyMaterial(_)));

        let err = SignatureEngine::init(
            SignatureAlgorithm::OpenSslSha256,
            Some(Path::new("/nonexistent/app.phar.pubkey")),
            &backends,
        )
        .err()
        .unwrap();
        assert!(matches!(err, PharError::KeyMaterial(_)));
    }

    #[test]
    fn test_public_key_path() {
        assert_eq!(
            public_key_path(Path::new("/tmp/app.phar")),
            PathBuf::from("/tmp/app.phar.pubkey")
        );
    }
}
