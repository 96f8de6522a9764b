use super::{to_extensions, Compactor};
use crate::error::Result;
use crate::symbols::{SymbolKind, SymbolsRegistry};

/// Prefixes namespace declarations and records the declared symbols
///
/// Only the output contract of a symbol-renaming pass lives here: namespace
/// declarations are moved under `prefix`, and every top-level class-like,
/// function and constant declaration is recorded as
/// `Namespace\Name -> Prefix\Namespace\Name`. References elsewhere in the
/// code are not rewritten.
pub struct NamespaceScoper {
    prefix: String,
    extensions: Vec<String>,
}

impl NamespaceScoper {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('\\').to_string();
        Self {
            prefix,
            extensions: to_extensions(&["php"]),
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    fn is_prefixed(&self, namespace: &str) -> bool {
        namespace == self.prefix
            || namespace
                .strip_prefix(self.prefix.as_str())
                .is_some_and(|rest| rest.starts_with('\\'))
    }

    fn scoped(&self, name: &str) -> String {
        format!("{}\\{}", self.prefix, name)
    }
}

/// Name following `keyword ` at the start of `line`, if any
fn declared_name<'l>(line: &'l str, keyword: &str) -> Option<&'l str> {
    let rest = line.strip_prefix(keyword)?;
    if !rest.starts_with(|c: char| c == ' ' || c == '\t') {
        return None;
    }
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('&').unwrap_or(rest).trim_start();
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '\\' || !c.is_ascii()))
        .unwrap_or(rest.len());
    if end == 0 {
        None
    } else {
        Some(&rest[..end])
    }
}

fn strip_modifiers(mut line: &str) -> &str {
    loop {
        let mut stripped = false;
        for modifier in ["final ", "abstract ", "readonly "] {
            if let Some(rest) = line.strip_prefix(modifier) {
                line = rest.trim_start();
                stripped = true;
            }
        }
        if !stripped {
            return line;
        }
    }
}

fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}\\{}", namespace, name)
    }
}

impl Compactor for NamespaceScoper {
    fn name(&self) -> &str {
        "scoper"
    }

    fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn compact(&self, _: &str, contents: &[u8], symbols: &mut SymbolsRegistry) -> Result<Vec<u8>> {
        if self.prefix.is_empty() {
            return Ok(contents.to_vec());
        }
        // Non UTF-8 sources carry no declarations we can rewrite
        let source = match std::str::from_utf8(contents) {
            Ok(source) => source,
            Err(_) => return Ok(contents.to_vec()),
        };

        let mut output = String::with_capacity(source.len() + 64);
        // None: no namespace seen yet or the current one is already scoped
        let mut namespace: Option<String> = None;

        for line in source.split_inclusive('\n') {
            // Top-level declarations start at column zero
            if let Some(name) = declared_name(line, "namespace") {
                if self.is_prefixed(name) {
                    namespace = None;
                    output.push_str(line);
                } else {
                    // `name` borrows from `line`
                    let offset = name.as_ptr() as usize - line.as_ptr() as usize;
                    output.push_str(&line[..offset]);
                    output.push_str(&self.scoped(name));
                    output.push_str(&line[offset + name.len()..]);
                    namespace = Some(name.to_string());
                }
                continue;
            }

            output.push_str(line);

            let Some(current) = namespace.as_deref() else {
                continue;
            };
            let declaration = strip_modifiers(line);

            for keyword in ["class", "interface", "trait", "enum"] {
                if let Some(name) = declared_name(declaration, keyword) {
                    let original = qualify(current, name);
                    symbols.record(SymbolKind::Class, original.clone(), self.scoped(&original))?;
                }
            }
            if let Some(name) = declared_name(declaration, "function") {
                let original = qualify(current, name);
                symbols.record(SymbolKind::Function, original.clone(), self.scoped(&original))?;
            }
            if let Some(name) = declared_name(declaration, "const") {
                let original = qualify(current, name);
                symbols.record(SymbolKind::Constant, original.clone(), self.scoped(&original))?;
            }
        }

        Ok(output.into_bytes())
    }
}
