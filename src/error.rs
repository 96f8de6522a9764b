use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for pharkit operations
pub type Result<T> = std::result::Result<T, PharError>;

/// Coarse classification of a [`PharError`]
///
/// Verification callers need to tell a damaged container apart from a forged
/// one and from a broken key setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The bytes are not a structurally valid archive
    Corrupt,
    /// The archive is well formed but its signature does not match
    SignatureMismatch,
    /// Key material is missing, unreadable or malformed
    KeyMaterial,
    /// Configuration rejected before any work started
    Config,
    /// Any other build-aborting failure
    Fatal,
}

/// Unified error type for all pharkit operations
#[derive(Debug, Error)]
pub enum PharError {
    // Container errors
    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("Halt marker not found; not an archive")]
    MissingHaltMarker,

    #[error("Manifest entry count mismatch: header declares {declared}, walked {walked}")]
    EntryCountMismatch { declared: u32, walked: u32 },

    #[error("File not found in archive: {0}")]
    FileNotFound(String),

    #[error("Unsupported signature algorithm id: {0:#x}")]
    UnsupportedAlgorithm(u32),

    #[error("Unknown signature algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("CRC mismatch for {path}: expected {expected:08x}, got {actual:08x}")]
    CrcMismatch {
        path: String,
        expected: u32,
        actual: u32,
    },

    #[error("Decompression failed for {path}: {message}")]
    DecompressionFailed { path: String, message: String },

    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    // Signature errors
    #[error("Signature mismatch")]
    SignatureMismatch,

    #[error("Key material error: {0}")]
    KeyMaterial(String),

    #[error("No crypto backend available for {0}")]
    NoCryptoBackend(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    // Build errors
    #[error("Failed to read source file {path}: {source}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Duplicate path in file list: {0}")]
    DuplicatePath(String),

    #[error("Path error: {0}")]
    PathError(String),

    #[error("Worker panicked while compacting batch {batch}: {message}")]
    WorkerPanicked { batch: usize, message: String },

    #[error("Ambiguous {kind} rename for {symbol}: {left} vs {right}")]
    AmbiguousRename {
        kind: String,
        symbol: String,
        left: String,
        right: String,
    },

    #[error("Compaction failed: {0}")]
    Compaction(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("TOML error: {0}")]
    TomlError(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PharError {
    /// Classify this error for callers that branch on failure category
    pub fn kind(&self) -> ErrorKind {
        match self {
            PharError::CorruptArchive(_)
            | PharError::MissingHaltMarker
            | PharError::EntryCountMismatch { .. }
            | PharError::UnsupportedAlgorithm(_)
            | PharError::CrcMismatch { .. }
            | PharError::DecompressionFailed { .. } => ErrorKind::Corrupt,
            PharError::SignatureMismatch => ErrorKind::SignatureMismatch,
            PharError::KeyMaterial(_) => ErrorKind::KeyMaterial,
            PharError::InvalidConfig(_)
            | PharError::TomlError(_)
            | PharError::UnknownAlgorithm(_)
            | PharError::DuplicatePath(_) => ErrorKind::Config,
            _ => ErrorKind::Fatal,
        }
    }

    /// Shorthand used by the byte cursor and manifest walkers
    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        PharError::CorruptArchive(message.into())
    }
}

impl From<toml::de::Error> for PharError {
    fn from(err: toml::de::Error) -> Self {
        PharError::TomlError(err.to_string())
    }
}

#[cfg(feature = "rsa-backend")]
impl From<rsa::Error> for PharError {
    fn from(err: rsa::Error) -> Self {
        PharError::SigningFailed(err.to_string())
    }
}

#[cfg(feature = "ed25519-backend")]
impl From<ed25519_dalek::SignatureError> for PharError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        PharError::KeyMaterial(err.to_string())
    }
}
