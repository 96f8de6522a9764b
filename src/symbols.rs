//! Symbol rename registry
//!
//! Compactors that rename program symbols record `original -> rewritten`
//! mappings here. Each worker accumulates its own fragment; the scheduler
//! merges fragments once every batch has returned.

use crate::error::{PharError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of renamed symbol. Keys are unique per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
    Constant,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SymbolKind::Function => "function",
            SymbolKind::Class => "class",
            SymbolKind::Constant => "constant",
        };
        f.write_str(name)
    }
}

/// Mapping from original symbol name to rewritten name, per kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolsRegistry {
    #[serde(default)]
    functions: BTreeMap<String, String>,
    #[serde(default)]
    classes: BTreeMap<String, String>,
    #[serde(default)]
    constants: BTreeMap<String, String>,
}

impl SymbolsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: SymbolKind) -> &BTreeMap<String, String> {
        match kind {
            SymbolKind::Function => &self.functions,
            SymbolKind::Class => &self.classes,
            SymbolKind::Constant => &self.constants,
        }
    }

    fn table_mut(&mut self, kind: SymbolKind) -> &mut BTreeMap<String, String> {
        match kind {
            SymbolKind::Function => &mut self.functions,
            SymbolKind::Class => &mut self.classes,
            SymbolKind::Constant => &mut self.constants,
        }
    }

    /// Record a rename. Re-recording the same mapping is a no-op; recording a
    /// different target for an existing key is an ambiguous rename.
    pub fn record(
        &mut self,
        kind: SymbolKind,
        original: impl Into<String>,
        renamed: impl Into<String>,
    ) -> Result<()> {
        let original = original.into();
        let renamed = renamed.into();

        match self.table_mut(kind).get(&original) {
            Some(existing) if *existing != renamed => Err(PharError::AmbiguousRename {
                kind: kind.to_string(),
                symbol: original,
                left: existing.clone(),
                right: renamed,
            }),
            Some(_) => Ok(()),
            None => {
                self.table_mut(kind).insert(original, renamed);
                Ok(())
            }
        }
    }

    /// Look up the rewritten name of a symbol
    pub fn get(&self, kind: SymbolKind, original: &str) -> Option<&str> {
        self.table(kind).get(original).map(String::as_str)
    }

    /// Iterate over `(original, renamed)` pairs of one kind, sorted by original
    pub fn iter(&self, kind: SymbolKind) -> impl Iterator<Item = (&str, &str)> {
        self.table(kind)
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.functions.len() + self.classes.len() + self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge another fragment into this one (union; equal values for shared keys)
    pub fn merge_from(&mut self, other: &SymbolsRegistry) -> Result<()> {
        for kind in [SymbolKind::Function, SymbolKind::Class, SymbolKind::Constant] {
            for (original, renamed) in other.table(kind) {
                self.record(kind, original.as_str(), renamed.as_str())?;
            }
        }
        Ok(())
    }

    /// Consuming merge of two registries
    pub fn merge(mut self, other: SymbolsRegistry) -> Result<Self> {
        self.merge_from(&other)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(entries: &[(SymbolKind, &str, &str)]) -> SymbolsRegistry {
        let mut registry = SymbolsRegistry::new();
        for (kind, original, renamed) in entries {
            registry.record(*kind, *original, *renamed).unwrap();
        }
        registry
    }

    #[test]
    fn test_disjoint_merge_is_commutative() {
        let a = registry(&[(SymbolKind::Class, "App\\Foo", "Px\\App\\Foo")]);
        let b = registry(&[(SymbolKind::Function, "App\\bar", "Px\\App\\bar")]);

        let ab = a.clone().merge(b.clone()).unwrap();
        let ba = b.merge(a).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 2);
    }

    #[test]
    fn test_disjoint_merge_is_associative() {
        let a = registry(&[(SymbolKind::Class, "A", "P\\A")]);
        let b = registry(&[(SymbolKind::Class, "B", "P\\B")]);
        let c = registry(&[(SymbolKind::Constant, "C", "P\\C")]);

        let left = a.clone().merge(b.clone()).unwrap().merge(c.clone()).unwrap();
        let right = a.merge(b.merge(c).unwrap()).unwrap();
        assert_eq!(left, right);
    }

    #[test]
    fn test_same_key_same_value_merges() {
        let a = registry(&[(SymbolKind::Class, "A", "P\\A")]);
        let b = registry(&[(SymbolKind::Class, "A", "P\\A")]);
        let merged = a.merge(b).unwrap();
        assert_eq!(merged.get(SymbolKind::Class, "A"), Some("P\\A"));
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn test_conflicting_values_are_fatal() {
        let a = registry(&[(SymbolKind::Class, "A", "P\\A")]);
        let b = registry(&[(SymbolKind::Class, "A", "Q\\A")]);
        match a.merge(b) {
            Err(PharError::AmbiguousRename { symbol, left, right, .. }) => {
                assert_eq!(symbol, "A");
                assert_eq!(left, "P\\A");
                assert_eq!(right, "Q\\A");
            }
            other => panic!("Expected AmbiguousRename, got: {:?}", other),
        }
    }

    #[test]
    fn test_keys_are_scoped_per_kind() {
        let a = registry(&[(SymbolKind::Class, "foo", "P\\foo")]);
        let b = registry(&[(SymbolKind::Function, "foo", "Q\\foo")]);
        let merged = a.merge(b).unwrap();
        assert_eq!(merged.get(SymbolKind::Class, "foo"), Some("P\\foo"));
        assert_eq!(merged.get(SymbolKind::Function, "foo"), Some("Q\\foo"));
    }
}
