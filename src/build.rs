//! End-to-end archive builds
//!
//! [`Builder`] runs the whole pipeline: compaction on the scheduler,
//! assembly, optional timestamp normalization and the final write. The output
//! file only appears once every step has succeeded.

use crate::archive::{ArchiveAssembler, Compression, StubGenerator, TimestampNormalizer};
use crate::compactor::{ChainConfig, CompactionWarning};
use crate::error::{PharError, Result};
use crate::scheduler::{CompactionScheduler, SourceFile};
use crate::signature::{public_key_path, ArchiveSigner, BackendRegistry, SignatureAlgorithm};
use crate::symbols::{SymbolKind, SymbolsRegistry};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Bootstrap script placed ahead of the manifest
#[derive(Debug, Clone)]
pub enum StubSource {
    Generated(StubGenerator),
    /// Raw stub bytes; the halt marker is appended when missing
    Custom(Vec<u8>),
}

impl Default for StubSource {
    fn default() -> Self {
        StubSource::Generated(StubGenerator::new())
    }
}

/// Everything a build needs besides the file list
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub stub: StubSource,
    pub alias: Option<String>,
    /// Archive-level metadata blob
    pub metadata: Vec<u8>,
    pub compression: Compression,
    pub algorithm: SignatureAlgorithm,
    /// PEM private key, required for asymmetric algorithms
    pub private_key: Option<PathBuf>,
    pub parallelism: usize,
    /// Fixed timestamp for reproducible output
    pub timestamp: Option<u32>,
    pub chain: ChainConfig,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            stub: StubSource::default(),
            alias: None,
            metadata: Vec::new(),
            compression: Compression::None,
            algorithm: SignatureAlgorithm::Sha256,
            private_key: None,
            parallelism: 1,
            timestamp: None,
            chain: ChainConfig::default(),
        }
    }
}

/// Summary of a finished build
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub output: PathBuf,
    /// Companion public key, for asymmetric algorithms
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<PathBuf>,
    pub entries: usize,
    pub size: usize,
    pub algorithm: SignatureAlgorithm,
    /// Uppercase hex of the final signature block
    pub signature: String,
    pub warnings: Vec<CompactionWarning>,
    /// Renamed symbols by kind, `original -> renamed`
    pub symbols: BTreeMap<String, BTreeMap<String, String>>,
}

fn symbols_report(symbols: &SymbolsRegistry) -> BTreeMap<String, BTreeMap<String, String>> {
    [SymbolKind::Function, SymbolKind::Class, SymbolKind::Constant]
        .into_iter()
        .filter_map(|kind| {
            let table: BTreeMap<String, String> = symbols
                .iter(kind)
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            (!table.is_empty()).then(|| (kind.to_string(), table))
        })
        .collect()
}

/// Runs the build pipeline
#[derive(Debug, Clone)]
pub struct Builder {
    options: BuildOptions,
    backends: BackendRegistry,
}

impl Builder {
    pub fn new(options: BuildOptions) -> Self {
        Self {
            options,
            backends: BackendRegistry::probe(),
        }
    }

    pub fn with_backends(mut self, backends: BackendRegistry) -> Self {
        self.backends = backends;
        self
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Build `files` into an archive at `output`
    pub fn build(&self, files: Vec<SourceFile>, output: &Path) -> Result<BuildReport> {
        let options = &self.options;
        if options.parallelism == 0 {
            return Err(PharError::InvalidConfig("parallelism must be at least 1".into()));
        }

        // Key problems surface before any compaction work
        let signer = ArchiveSigner::from_key_file(
            options.algorithm,
            options.private_key.as_deref(),
            &self.backends,
        )?;

        tracing::info!(
            files = files.len(),
            parallelism = options.parallelism,
            algorithm = %options.algorithm,
            output = %output.display(),
            "building archive"
        );

        let mut scheduler = CompactionScheduler::new(options.chain.clone(), options.parallelism)
            .with_compression(options.compression);
        if let Some(timestamp) = options.timestamp {
            scheduler = scheduler.with_build_time(timestamp);
        }
        let outcome = scheduler.run(files)?;

        let mut assembler = ArchiveAssembler::new(signer.clone()).with_metadata(options.metadata.clone());
        assembler = match &options.stub {
            StubSource::Generated(generator) => {
                let generator = match &options.alias {
                    Some(alias) => generator.clone().alias(alias.clone()),
                    None => generator.clone(),
                };
                assembler.with_stub(&generator.generate())
            }
            StubSource::Custom(bytes) => assembler.with_stub(bytes),
        };
        if let Some(alias) = &options.alias {
            assembler = assembler.with_alias(alias.clone());
        }

        let assembled = assembler.assemble(&outcome.entries)?;
        let mut bytes = assembled.bytes;
        let mut signature = assembled.signature;

        if let Some(timestamp) = options.timestamp {
            let mut normalizer =
                TimestampNormalizer::new(timestamp).with_backends(self.backends.clone());
            if let Some(path) = &options.private_key {
                normalizer = normalizer.with_private_key(read_key(path)?);
            }
            signature = normalizer.normalize(&mut bytes)?;
        }

        // Public key first; the archive appears only once nothing else can fail
        let public_key = match signer.public_key_pem()? {
            Some(pem) => {
                let path = public_key_path(output);
                write_atomically(&path, pem.as_bytes())?;
                Some(path)
            }
            None => None,
        };
        if let Err(err) = write_atomically(output, &bytes) {
            if let Some(path) = &public_key {
                let _ = std::fs::remove_file(path);
            }
            return Err(err);
        }

        for warning in &outcome.warnings {
            tracing::warn!(
                path = %warning.path,
                compactor = %warning.compactor,
                "{}",
                warning.message
            );
        }
        tracing::info!(
            entries = outcome.entries.len(),
            bytes = bytes.len(),
            signature = %signature.hex(),
            "archive written"
        );

        Ok(BuildReport {
            output: output.to_path_buf(),
            public_key,
            entries: outcome.entries.len(),
            size: bytes.len(),
            algorithm: signature.algorithm,
            signature: signature.hex(),
            warnings: outcome.warnings,
            symbols: symbols_report(&outcome.symbols),
        })
    }
}

fn read_key(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| PharError::KeyMaterial(format!("cannot read {}: {}", path.display(), e)))
}

/// Write `bytes` to `path` through a temp file in the same directory
///
/// The temp file is removed on failure, so `path` is either left as it was
/// or fully replaced.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| PharError::Io(e.error))?;
    Ok(())
}

/// Normalize the timestamps of an archive on disk and re-sign it
pub fn normalize_file(path: &Path, timestamp: u32, private_key: Option<&Path>) -> Result<()> {
    let mut normalizer = TimestampNormalizer::new(timestamp);
    if let Some(key) = private_key {
        normalizer = normalizer.with_private_key(read_key(key)?);
    }
    normalizer.normalize_file(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveReader;
    use crate::compactor::CompactorConfig;
    use tempfile::TempDir;

    fn sources() -> Vec<SourceFile> {
        vec![
            SourceFile::from_bytes("index.php", "<?php\n// entry\nrequire 'src/app.php';\n"),
            SourceFile::from_bytes("src/app.php", "<?php\n\n/* app */\necho   'hi';\n"),
            SourceFile::from_bytes("composer.json", "{ \"name\" : \"demo/app\" }"),
        ]
    }

    fn options() -> BuildOptions {
        BuildOptions {
            alias: Some("app.phar".into()),
            chain: ChainConfig::new(vec![
                CompactorConfig::Php { extensions: None },
                CompactorConfig::Json { extensions: None },
            ]),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_writes_readable_archive() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("app.phar");

        let report = Builder::new(options()).build(sources(), &output).unwrap();
        assert_eq!(report.entries, 3);
        assert!(report.public_key.is_none());
        assert_eq!(report.size as u64, std::fs::metadata(&output).unwrap().len());

        let reader = ArchiveReader::open(&output).unwrap();
        reader.verify().unwrap();
        assert_eq!(reader.alias(), Some("app.phar"));
        assert_eq!(reader.read_file("composer.json").unwrap(), b"{\"name\":\"demo/app\"}");
        assert!(String::from_utf8_lossy(reader.stub()).contains("Phar::mapPhar('app.phar');"));
        assert_eq!(reader.signature().hex(), report.signature);
    }

    #[test]
    fn test_fixed_timestamp_applies_to_every_entry() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("app.phar");
        let options = BuildOptions {
            timestamp: Some(1_600_000_000),
            ..options()
        };

        Builder::new(options).build(sources(), &output).unwrap();
        let info = ArchiveReader::open(&output).unwrap().inspect();
        assert!(info.files.iter().all(|f| f.timestamp == 1_600_000_000));
    }

    #[test]
    fn test_failed_build_leaves_no_output() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("app.phar");
        let mut files = sources();
        files.push(SourceFile::from_disk("gone.php", dir.path().join("gone.php")));

        assert!(Builder::new(options()).build(files, &output).is_err());
        assert!(!output.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_asymmetric_without_key_fails_early() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("app.phar");
        let options = BuildOptions {
            algorithm: SignatureAlgorithm::OpenSslSha256,
            ..options()
        };
        let err = Builder::new(options).build(sources(), &output).unwrap_err();
        assert!(matches!(
            err,
            PharError::KeyMaterial(_) | PharError::NoCryptoBackend(_)
        ));
        assert!(!output.exists());
    }

    #[test]
    #[cfg(feature = "ed25519-backend")]
    fn test_failed_key_write_leaves_no_archive() {
        use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
        use ed25519_dalek::pkcs8::EncodePrivateKey;
        use ed25519_dalek::SigningKey;

        let dir = TempDir::new().unwrap();
        let key = dir.path().join("ed25519.pem");
        let pem = SigningKey::generate(&mut rand::rngs::OsRng)
            .to_pkcs8_pem(LineEnding::LF)
            .unwrap();
        std::fs::write(&key, pem.as_bytes()).unwrap();

        let output = dir.path().join("app.phar");
        // A directory where the public key should go makes the key write fail
        std::fs::create_dir(public_key_path(&output)).unwrap();

        let options = BuildOptions {
            algorithm: SignatureAlgorithm::Ed25519,
            private_key: Some(key),
            ..options()
        };
        assert!(Builder::new(options).build(sources(), &output).is_err());
        assert!(!output.exists());
        assert!(public_key_path(&output).is_dir());
    }

    #[test]
    fn test_write_atomically_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        write_atomically(&path, b"first").unwrap();
        write_atomically(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
