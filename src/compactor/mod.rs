//! Per-file content transforms
//!
//! A [`CompactorChain`] applies an ordered list of [`Compactor`]s to one
//! file's bytes. A compactor that rejects its input (malformed JSON, an
//! unterminated PHP string, ...) never aborts the build: the chain keeps the
//! contents it had before that compactor ran and records a warning.

mod json;
mod php;
mod placeholder;
mod scoper;

pub use json::JsonCompactor;
pub use php::PhpCompactor;
pub use placeholder::PlaceholderCompactor;
pub use scoper::NamespaceScoper;

use crate::error::Result;
use crate::symbols::SymbolsRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single content transform
///
/// Implementations must be idempotent on their own output and must return an
/// error (not partially rewritten bytes) when the input is malformed.
pub trait Compactor: Send + Sync {
    /// Short name used in warnings and logs
    fn name(&self) -> &str;

    /// File extensions this compactor handles (lowercase, no dot). Empty means all files.
    fn extensions(&self) -> &[String];

    /// Transform `contents`, recording any renamed symbols into `symbols`
    fn compact(&self, path: &str, contents: &[u8], symbols: &mut SymbolsRegistry)
        -> Result<Vec<u8>>;

    /// Whether this compactor applies to `path`
    fn supports(&self, path: &str) -> bool {
        let extensions = self.extensions();
        if extensions.is_empty() {
            return true;
        }
        match extension_of(path) {
            Some(ext) => extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }
}

/// Extension of the last path component, without the dot
pub(crate) fn extension_of(path: &str) -> Option<&str> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(&file_name[idx + 1..]),
    }
}

fn to_extensions(list: &[&str]) -> Vec<String> {
    list.iter().map(|e| e.to_string()).collect()
}

/// Non-fatal problem recorded while compacting a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionWarning {
    pub path: String,
    pub compactor: String,
    pub message: String,
}

/// Serializable description of one compactor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CompactorConfig {
    Json {
        #[serde(default)]
        extensions: Option<Vec<String>>,
    },
    Php {
        #[serde(default)]
        extensions: Option<Vec<String>>,
    },
    Placeholder {
        #[serde(default)]
        extensions: Option<Vec<String>>,
        #[serde(default)]
        replacements: BTreeMap<String, String>,
    },
    Scoper {
        prefix: String,
        #[serde(default)]
        extensions: Option<Vec<String>>,
    },
}

impl CompactorConfig {
    fn build(&self) -> Box<dyn Compactor> {
        match self {
            CompactorConfig::Json { extensions } => {
                let mut compactor = JsonCompactor::new();
                if let Some(ext) = extensions {
                    compactor = compactor.with_extensions(ext.clone());
                }
                Box::new(compactor)
            }
            CompactorConfig::Php { extensions } => {
                let mut compactor = PhpCompactor::new();
                if let Some(ext) = extensions {
                    compactor = compactor.with_extensions(ext.clone());
                }
                Box::new(compactor)
            }
            CompactorConfig::Placeholder {
                extensions,
                replacements,
            } => {
                let mut compactor = PlaceholderCompactor::new(replacements.clone());
                if let Some(ext) = extensions {
                    compactor = compactor.with_extensions(ext.clone());
                }
                Box::new(compactor)
            }
            CompactorConfig::Scoper { prefix, extensions } => {
                let mut compactor = NamespaceScoper::new(prefix.clone());
                if let Some(ext) = extensions {
                    compactor = compactor.with_extensions(ext.clone());
                }
                Box::new(compactor)
            }
        }
    }
}

/// Read-only chain description shared by every worker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default)]
    pub compactors: Vec<CompactorConfig>,
}

impl ChainConfig {
    pub fn new(compactors: Vec<CompactorConfig>) -> Self {
        Self { compactors }
    }

    /// Build a fresh chain instance (one per worker)
    pub fn build(&self) -> CompactorChain {
        CompactorChain::new(self.build_compactors())
    }

    /// Instantiate the configured compactors, in order
    pub fn build_compactors(&self) -> Vec<Box<dyn Compactor>> {
        self.compactors.iter().map(CompactorConfig::build).collect()
    }
}

/// Ordered list of compactors plus the state one worker accumulates
pub struct CompactorChain {
    compactors: Vec<Box<dyn Compactor>>,
    symbols: SymbolsRegistry,
    warnings: Vec<CompactionWarning>,
}

impl CompactorChain {
    pub fn new(compactors: Vec<Box<dyn Compactor>>) -> Self {
        Self {
            compactors,
            symbols: SymbolsRegistry::new(),
            warnings: Vec::new(),
        }
    }

    /// Chain without any compactor (passthrough)
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.compactors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compactors.is_empty()
    }

    /// Apply every supporting compactor in registration order
    ///
    /// Only a symbol conflict between this file and earlier files is fatal;
    /// a compactor rejecting its input leaves the contents untouched.
    pub fn compact(&mut self, path: &str, contents: &[u8]) -> Result<Vec<u8>> {
        let mut current = contents.to_vec();

        for compactor in &self.compactors {
            if !compactor.supports(path) {
                continue;
            }

            let mut fragment = SymbolsRegistry::new();
            match compactor.compact(path, &current, &mut fragment) {
                Ok(output) => {
                    self.symbols.merge_from(&fragment)?;
                    current = output;
                }
                Err(err) => {
                    tracing::warn!(
                        path,
                        compactor = compactor.name(),
                        "compaction skipped: {}",
                        err
                    );
                    self.warnings.push(CompactionWarning {
                        path: path.to_string(),
                        compactor: compactor.name().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        Ok(current)
    }

    pub fn symbols(&self) -> &SymbolsRegistry {
        &self.symbols
    }

    pub fn warnings(&self) -> &[CompactionWarning] {
        &self.warnings
    }

    /// Hand over the accumulated registry fragment and warnings
    pub fn into_parts(self) -> (SymbolsRegistry, Vec<CompactionWarning>) {
        (self.symbols, self.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PharError;

    struct Upper;

    impl Compactor for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn extensions(&self) -> &[String] {
            &[]
        }
        fn compact(&self, _: &str, contents: &[u8], _: &mut SymbolsRegistry) -> Result<Vec<u8>> {
            Ok(contents.to_ascii_uppercase())
        }
    }

    struct Failing;

    impl Compactor for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn extensions(&self) -> &[String] {
            &[]
        }
        fn compact(&self, _: &str, _: &[u8], _: &mut SymbolsRegistry) -> Result<Vec<u8>> {
            Err(PharError::Compaction("always fails".into()))
        }
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("src/a.php"), Some("php"));
        assert_eq!(extension_of("composer.lock"), Some("lock"));
        assert_eq!(extension_of("dir.d/README"), None);
        assert_eq!(extension_of(".htaccess"), None);
    }

    #[test]
    fn test_unsupported_extension_passes_through() {
        let mut chain = ChainConfig::new(vec![CompactorConfig::Json { extensions: None }]).build();
        let input = b"{ \"a\" : 1 }";
        assert_eq!(chain.compact("data.txt", input).unwrap(), input.to_vec());
        assert_eq!(chain.compact("data.json", input).unwrap(), b"{\"a\":1}".to_vec());
    }

    #[test]
    fn test_failing_compactor_keeps_previous_contents() {
        let mut chain = CompactorChain::new(vec![Box::new(Upper), Box::new(Failing), Box::new(Upper)]);
        let output = chain.compact("x.txt", b"abc").unwrap();
        assert_eq!(output, b"ABC");
        assert_eq!(chain.warnings().len(), 1);
        assert_eq!(chain.warnings()[0].compactor, "failing");
    }

    #[test]
    fn test_chain_config_from_toml() {
        let config: ChainConfig = toml::from_str(
            r#"
            [[compactors]]
            type = "json"

            [[compactors]]
            type = "placeholder"
            replacements = { version = "1.2.3" }

            [[compactors]]
            type = "scoper"
            prefix = "Vendored"
            "#,
        )
        .unwrap();
        assert_eq!(config.compactors.len(), 3);
        assert_eq!(config.build().len(), 3);
    }
}
