use super::{to_extensions, Compactor};
use crate::error::{PharError, Result};
use crate::symbols::SymbolsRegistry;

/// Re-emits JSON documents without insignificant whitespace, keeping key order
pub struct JsonCompactor {
    extensions: Vec<String>,
}

impl JsonCompactor {
    pub fn new() -> Self {
        Self {
            extensions: to_extensions(&["json", "lock"]),
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }
}

impl Default for JsonCompactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compactor for JsonCompactor {
    fn name(&self) -> &str {
        "json"
    }

    fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn compact(&self, path: &str, contents: &[u8], _: &mut SymbolsRegistry) -> Result<Vec<u8>> {
        let value: serde_json::Value = serde_json::from_slice(contents)
            .map_err(|e| PharError::Compaction(format!("invalid JSON in {}: {}", path, e)))?;
        Ok(serde_json::to_vec(&value)?)
    }
}
