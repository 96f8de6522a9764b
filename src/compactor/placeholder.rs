use super::{to_extensions, Compactor};
use crate::error::Result;
use crate::symbols::SymbolsRegistry;
use std::collections::BTreeMap;

/// Replaces `@name@` tokens with configured values
///
/// Tokens are matched in a single left-to-right pass over the input, so a
/// value that itself contains a token is emitted verbatim.
pub struct PlaceholderCompactor {
    extensions: Vec<String>,
    replacements: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl PlaceholderCompactor {
    pub fn new(replacements: BTreeMap<String, String>) -> Self {
        let replacements = replacements
            .into_iter()
            .filter(|(name, _)| !name.is_empty() && !name.contains('@'))
            .map(|(name, value)| (name.into_bytes(), value.into_bytes()))
            .collect();
        Self {
            extensions: to_extensions(&["php"]),
            replacements,
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }
}

impl Compactor for PlaceholderCompactor {
    fn name(&self) -> &str {
        "placeholder"
    }

    fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn compact(&self, _: &str, contents: &[u8], _: &mut SymbolsRegistry) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(contents.len());
        let mut pos = 0;

        while let Some(open) = contents[pos..].iter().position(|&b| b == b'@') {
            let open = pos + open;
            output.extend_from_slice(&contents[pos..open]);

            let name_start = open + 1;
            let value = contents[name_start..]
                .iter()
                .position(|&b| b == b'@')
                .and_then(|len| {
                    let name = &contents[name_start..name_start + len];
                    self.replacements.get(name).map(|value| (value, len))
                });

            match value {
                Some((value, len)) => {
                    output.extend_from_slice(value);
                    pos = name_start + len + 1;
                }
                None => {
                    // Closing `@` may open the next token
                    output.push(b'@');
                    pos = name_start;
                }
            }
        }
        output.extend_from_slice(&contents[pos..]);
        Ok(output)
    }
}
