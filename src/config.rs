//! Declarative build configuration
//!
//! ```toml
//! output = "dist/app.phar"
//! alias = "app.phar"
//! main = "bin/app.php"
//! algorithm = "sha256"
//! compression = "deflate"
//! parallelism = 4
//! files = ["bin/app.php", "composer.json"]
//! directories = ["src"]
//!
//! [[compactors]]
//! type = "php"
//! ```
//!
//! Relative paths are resolved against `base_path`, which defaults to the
//! directory holding the configuration file.

use crate::archive::{Compression, StubGenerator};
use crate::build::{BuildOptions, StubSource};
use crate::compactor::{ChainConfig, CompactorConfig};
use crate::error::{PharError, Result};
use crate::scheduler::{collect_directory, normalize_archive_path, SourceFile};
use crate::signature::SignatureAlgorithm;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

fn default_algorithm() -> String {
    "sha256".to_string()
}

fn default_compression() -> String {
    "none".to_string()
}

fn default_parallelism() -> usize {
    1
}

/// Build configuration as written in TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    pub output: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Script required by the generated stub
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shebang: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,

    /// Custom stub file; replaces the generated stub
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stub: Option<PathBuf>,

    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// PEM private key for asymmetric algorithms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,

    #[serde(default = "default_compression")]
    pub compression: String,

    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Fixed timestamp for reproducible builds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u32>,

    #[serde(default)]
    pub files: Vec<String>,

    #[serde(default)]
    pub directories: Vec<String>,

    #[serde(default)]
    pub compactors: Vec<CompactorConfig>,
}

impl BuildConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: BuildConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file; `base_path` defaults to its directory
    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            PharError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&source)?;

        let config_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.base_path = Some(match config.base_path.take() {
            Some(base) if base.is_relative() => config_dir.join(base),
            Some(base) => base,
            None => config_dir.to_path_buf(),
        });
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.output.as_os_str().is_empty() {
            return Err(PharError::InvalidConfig("output must not be empty".into()));
        }
        if self.parallelism == 0 {
            return Err(PharError::InvalidConfig("parallelism must be at least 1".into()));
        }
        if self.files.is_empty() && self.directories.is_empty() {
            return Err(PharError::InvalidConfig(
                "no input: set files or directories".into(),
            ));
        }

        let algorithm = self.signature_algorithm()?;
        if algorithm.is_asymmetric() && self.key.is_none() {
            return Err(PharError::InvalidConfig(format!(
                "algorithm {} requires a key",
                algorithm
            )));
        }
        Compression::parse(&self.compression)?;

        for file in &self.files {
            normalize_archive_path(file)
                .map_err(|e| PharError::InvalidConfig(format!("files: {}", e)))?;
        }
        Ok(())
    }

    pub fn signature_algorithm(&self) -> Result<SignatureAlgorithm> {
        SignatureAlgorithm::parse(&self.algorithm)
    }

    fn base(&self) -> &Path {
        self.base_path.as_deref().unwrap_or_else(|| Path::new("."))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base().join(path)
        }
    }

    /// Output path, resolved against `base_path`
    pub fn output_path(&self) -> PathBuf {
        self.resolve(&self.output)
    }

    /// Options for [`crate::build::Builder`]
    pub fn to_options(&self) -> Result<BuildOptions> {
        let stub = match &self.stub {
            Some(path) => {
                let path = self.resolve(path);
                let bytes = std::fs::read(&path).map_err(|e| {
                    PharError::InvalidConfig(format!("cannot read stub {}: {}", path.display(), e))
                })?;
                StubSource::Custom(bytes)
            }
            None => {
                let mut generator = StubGenerator::new();
                if let Some(shebang) = &self.shebang {
                    generator = generator.shebang(shebang.clone());
                }
                if let Some(banner) = &self.banner {
                    generator = generator.banner(banner.clone());
                }
                if let Some(main) = &self.main {
                    generator = generator.main(main.clone());
                }
                StubSource::Generated(generator)
            }
        };

        Ok(BuildOptions {
            stub,
            alias: self.alias.clone(),
            metadata: Vec::new(),
            compression: Compression::parse(&self.compression)?,
            algorithm: self.signature_algorithm()?,
            private_key: self.key.as_deref().map(|k| self.resolve(k)),
            parallelism: self.parallelism,
            timestamp: self.timestamp,
            chain: ChainConfig::new(self.compactors.clone()),
        })
    }

    /// Explicit files first, then each directory's files in sorted order
    ///
    /// A file reached both ways is only listed once.
    pub fn source_files(&self) -> Result<Vec<SourceFile>> {
        let mut seen = HashSet::new();
        let mut sources = Vec::new();

        for file in &self.files {
            let path = normalize_archive_path(file)?;
            if seen.insert(path.clone()) {
                sources.push(SourceFile::from_disk(path, self.resolve(Path::new(file))));
            }
        }

        for dir in &self.directories {
            let prefix = normalize_archive_path(dir)?;
            for source in collect_directory(&self.resolve(Path::new(dir)), &prefix)? {
                if seen.insert(source.path.clone()) {
                    sources.push(source);
                }
            }
        }

        tracing::debug!(files = sources.len(), "collected build inputs");
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = BuildConfig::from_toml_str(
            r#"
            output = "app.phar"
            files = ["index.php"]
            "#,
        )
        .unwrap();
        assert_eq!(config.signature_algorithm().unwrap(), SignatureAlgorithm::Sha256);
        assert_eq!(config.parallelism, 1);

        let options = config.to_options().unwrap();
        assert_eq!(options.compression, Compression::None);
        assert!(options.chain.compactors.is_empty());
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            "output = \"a.phar\"\nfiles = [\"a.php\"]\nparallelism = 0",
            "output = \"a.phar\"\nfiles = [\"a.php\"]\nalgorithm = \"crc\"",
            "output = \"a.phar\"\nfiles = [\"a.php\"]\nalgorithm = \"openssl\"",
            "output = \"a.phar\"\nfiles = [\"a.php\"]\ncompression = \"bzip2\"",
            "output = \"a.phar\"",
            "output = \"a.phar\"\nfiles = [\"../a.php\"]",
            "output = \"a.phar\"\nfiles = [\"a.php\"]\nunknown = 1",
        ];
        for case in cases {
            let err = BuildConfig::from_toml_str(case).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config, "{}: {:?}", case, err);
        }
    }

    #[test]
    fn test_from_file_resolves_inputs() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src/Util")).unwrap();
        std::fs::write(root.join("index.php"), "<?php").unwrap();
        std::fs::write(root.join("src/b.php"), "<?php").unwrap();
        std::fs::write(root.join("src/Util/a.php"), "<?php").unwrap();
        std::fs::write(
            root.join("pharkit.toml"),
            r#"
            output = "dist/app.phar"
            alias = "app.phar"
            main = "index.php"
            algorithm = "sha512"
            compression = "deflate"
            parallelism = 2
            files = ["index.php", "src/b.php"]
            directories = ["src"]

            [[compactors]]
            type = "php"

            [[compactors]]
            type = "placeholder"
            replacements = { version = "1.0.0" }
            "#,
        )
        .unwrap();

        let config = BuildConfig::from_file(&root.join("pharkit.toml")).unwrap();
        assert_eq!(config.output_path(), root.join("dist/app.phar"));

        let paths: Vec<String> = config
            .source_files()
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(paths, vec!["index.php", "src/b.php", "src/Util/a.php"]);

        let options = config.to_options().unwrap();
        assert_eq!(options.algorithm, SignatureAlgorithm::Sha512);
        assert_eq!(options.compression, Compression::Deflate);
        assert_eq!(options.chain.compactors.len(), 2);
        match options.stub {
            StubSource::Generated(generator) => {
                let stub = String::from_utf8(generator.generate()).unwrap();
                assert!(stub.contains("index.php"));
            }
            StubSource::Custom(_) => panic!("expected generated stub"),
        }
    }
}
