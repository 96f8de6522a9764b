//! pharkit: build, sign and verify PHAR archives
//!
//! The build pipeline packages a tree of application sources into a single
//! self-contained archive the PHP runtime can execute:
//! - Per-file compaction through an ordered [`CompactorChain`]
//! - Parallel, order-preserving scheduling on a worker pool
//! - Assembly of stub, binary manifest, payloads and signature block
//! - Timestamp normalization for byte-reproducible builds
//! - Digest (MD5/SHA-1/SHA-256/SHA-512) and asymmetric (RSA, Ed25519) signatures
//!
//! # Example
//!
//! ```no_run
//! use pharkit::{ArchiveReader, BuildOptions, Builder, SourceFile};
//! use std::path::Path;
//!
//! let files = vec![
//!     SourceFile::from_bytes("index.php", "<?php echo 'hello';"),
//!     SourceFile::from_disk("src/app.php", "src/app.php"),
//! ];
//! let report = Builder::new(BuildOptions::default()).build(files, Path::new("app.phar"))?;
//! println!("{} entries, signature {}", report.entries, report.signature);
//!
//! let reader = ArchiveReader::open("app.phar")?;
//! reader.verify()?;
//! let data = reader.read_file("index.php")?;
//! # Ok::<(), pharkit::error::PharError>(())
//! ```

pub mod archive;
pub mod build;
pub mod compactor;
pub mod config;
pub mod error;
pub mod inspect;
pub mod scheduler;
pub mod signature;
pub mod symbols;

pub use archive::{
    ArchiveAssembler, ArchiveManifest, ArchiveReader, Compression, FileEntry, StubGenerator,
    TimestampNormalizer, HALT_MARKER,
};
pub use build::{normalize_file, BuildOptions, BuildReport, Builder, StubSource};
pub use compactor::{ChainConfig, Compactor, CompactorChain, CompactorConfig};
pub use config::BuildConfig;
pub use error::{ErrorKind, PharError, Result};
pub use inspect::ArchiveInfo;
pub use scheduler::{CompactionScheduler, SourceFile};
pub use signature::{
    ArchiveSigner, BackendRegistry, SignatureAlgorithm, SignatureBlock, SignatureEngine,
};
pub use symbols::{SymbolKind, SymbolsRegistry};
