use super::{to_extensions, Compactor};
use crate::error::{PharError, Result};
use crate::symbols::SymbolsRegistry;

/// Strips comments and redundant whitespace from PHP sources
///
/// Line numbers are preserved: a comment spanning lines is replaced by the
/// newlines it contained. String literals, heredoc/nowdoc bodies and inline
/// HTML are copied verbatim.
pub struct PhpCompactor {
    extensions: Vec<String>,
}

impl PhpCompactor {
    pub fn new() -> Self {
        Self {
            extensions: to_extensions(&["php"]),
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }
}

impl Default for PhpCompactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compactor for PhpCompactor {
    fn name(&self) -> &str {
        "php"
    }

    fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn compact(&self, path: &str, contents: &[u8], _: &mut SymbolsRegistry) -> Result<Vec<u8>> {
        Stripper::new(contents)
            .run()
            .map_err(|message| PharError::Compaction(format!("{}: {}", path, message)))
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

struct Stripper<'a> {
    src: &'a [u8],
    pos: usize,
    out: Vec<u8>,
    pending_space: bool,
    at_line_start: bool,
}

type Step = std::result::Result<(), String>;

impl<'a> Stripper<'a> {
    fn new(src: &'a [u8]) -> Self {
        Self {
            src,
            pos: 0,
            out: Vec::with_capacity(src.len()),
            pending_space: false,
            at_line_start: false,
        }
    }

    fn run(mut self) -> std::result::Result<Vec<u8>, String> {
        while self.pos < self.src.len() {
            self.copy_inline_html();
            if self.pos < self.src.len() {
                self.strip_code()?;
            }
        }
        Ok(self.out)
    }

    fn rest(&self) -> &'a [u8] {
        &self.src[self.pos..]
    }

    fn starts_with(&self, token: &[u8]) -> bool {
        self.rest().starts_with(token)
    }

    /// Length of the open tag at the current position, if any
    fn open_tag_len(&self) -> Option<usize> {
        let rest = self.rest();
        if rest.starts_with(b"<?=") {
            return Some(3);
        }
        if rest.len() >= 5 && rest[..5].eq_ignore_ascii_case(b"<?php") {
            match rest.get(5) {
                None => return Some(5),
                Some(b) if b.is_ascii_whitespace() => return Some(5),
                _ => {}
            }
        }
        None
    }

    /// Copy bytes outside PHP tags up to and including the next open tag
    fn copy_inline_html(&mut self) {
        while self.pos < self.src.len() {
            if let Some(len) = self.open_tag_len() {
                self.out.extend_from_slice(&self.src[self.pos..self.pos + len]);
                self.pos += len;
                self.pending_space = false;
                self.at_line_start = false;
                return;
            }
            self.out.push(self.src[self.pos]);
            self.pos += 1;
        }
    }

    fn flush_space(&mut self) {
        if self.pending_space && !self.at_line_start {
            self.out.push(b' ');
        }
        self.pending_space = false;
        self.at_line_start = false;
    }

    fn newline(&mut self) {
        self.pending_space = false;
        self.out.push(b'\n');
        self.at_line_start = true;
    }

    /// Process PHP code until a close tag (consumed) or end of input
    fn strip_code(&mut self) -> Step {
        while self.pos < self.src.len() {
            let b = self.src[self.pos];
            match b {
                b'?' if self.starts_with(b"?>") => {
                    self.flush_space();
                    self.out.extend_from_slice(b"?>");
                    self.pos += 2;
                    return Ok(());
                }
                b'\n' => {
                    self.newline();
                    self.pos += 1;
                }
                b' ' | b'\t' | b'\r' | 0x0b | 0x0c => {
                    self.pending_space = true;
                    self.pos += 1;
                }
                b'#' if !self.starts_with(b"#[") => self.skip_line_comment(),
                b'/' if self.starts_with(b"//") => self.skip_line_comment(),
                b'/' if self.starts_with(b"/*") => self.skip_block_comment()?,
                b'\'' | b'"' | b'`' => {
                    self.flush_space();
                    self.copy_quoted(b)?;
                }
                b'<' if self.starts_with(b"<<<") => {
                    self.flush_space();
                    self.copy_heredoc()?;
                }
                _ => {
                    self.flush_space();
                    self.out.push(b);
                    self.pos += 1;
                }
            }
        }
        Ok(())
    }

    fn skip_line_comment(&mut self) {
        while self.pos < self.src.len() {
            if self.src[self.pos] == b'\n' || self.starts_with(b"?>") {
                break;
            }
            self.pos += 1;
        }
        self.pending_space = true;
    }

    fn skip_block_comment(&mut self) -> Step {
        let start = self.pos;
        let body = &self.src[start + 2..];
        let end = body
            .windows(2)
            .position(|w| w == b"*/")
            .ok_or_else(|| format!("unterminated comment at byte {}", start))?;

        let newlines = body[..end].iter().filter(|&&b| b == b'\n').count();
        self.pos = start + 2 + end + 2;

        if newlines == 0 {
            self.pending_space = true;
        } else {
            for _ in 0..newlines {
                self.newline();
            }
        }
        Ok(())
    }

    fn copy_quoted(&mut self, quote: u8) -> Step {
        let start = self.pos;
        self.pos += 1;
        while self.pos < self.src.len() {
            match self.src[self.pos] {
                b'\\' => self.pos += 2,
                b if b == quote => {
                    self.pos += 1;
                    let end = self.pos;
                    self.out.extend_from_slice(&self.src[start..end]);
                    return Ok(());
                }
                _ => self.pos += 1,
            }
        }
        Err(format!("unterminated string literal at byte {}", start))
    }

    fn copy_heredoc(&mut self) -> Step {
        let start = self.pos;
        let mut cursor = start + 3;

        while cursor < self.src.len() && (self.src[cursor] == b' ' || self.src[cursor] == b'\t') {
            cursor += 1;
        }

        let quote = match self.src.get(cursor) {
            Some(&q) if q == b'\'' || q == b'"' => {
                cursor += 1;
                Some(q)
            }
            _ => None,
        };

        let ident_start = cursor;
        while cursor < self.src.len() && is_ident_byte(self.src[cursor]) {
            cursor += 1;
        }
        if cursor == ident_start {
            return Err(format!("malformed heredoc opener at byte {}", start));
        }
        let ident = &self.src[ident_start..cursor];

        if let Some(q) = quote {
            if self.src.get(cursor) != Some(&q) {
                return Err(format!("malformed heredoc opener at byte {}", start));
            }
            cursor += 1;
        }
        if self.src.get(cursor) == Some(&b'\r') {
            cursor += 1;
        }
        if self.src.get(cursor) != Some(&b'\n') {
            return Err(format!("malformed heredoc opener at byte {}", start));
        }
        cursor += 1;

        // Body lines until one whose trimmed start is the closing identifier
        loop {
            if cursor >= self.src.len() {
                return Err(format!("unterminated heredoc at byte {}", start));
            }
            let mut probe = cursor;
            while probe < self.src.len() && (self.src[probe] == b' ' || self.src[probe] == b'\t')
            {
                probe += 1;
            }
            let closes = self.src[probe..].starts_with(ident)
                && self
                    .src
                    .get(probe + ident.len())
                    .map_or(true, |&b| !is_ident_byte(b));
            if closes {
                cursor = probe + ident.len();
                break;
            }
            match self.src[cursor..].iter().position(|&b| b == b'\n') {
                Some(offset) => cursor += offset + 1,
                None => return Err(format!("unterminated heredoc at byte {}", start)),
            }
        }

        self.out.extend_from_slice(&self.src[start..cursor]);
        self.pos = cursor;
        Ok(())
    }
}
