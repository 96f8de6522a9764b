use crate::archive::format::{find_stub_end, HALT_MARKER};

/// Builds the bootstrap script that precedes the manifest
#[derive(Debug, Clone, Default)]
pub struct StubGenerator {
    shebang: Option<String>,
    banner: Option<String>,
    alias: Option<String>,
    main: Option<String>,
}

impl StubGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpreter line, e.g. `#!/usr/bin/env php`
    pub fn shebang(mut self, shebang: impl Into<String>) -> Self {
        self.shebang = Some(shebang.into());
        self
    }

    /// Comment placed at the top of the stub
    pub fn banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Script required from inside the archive once it is mapped
    pub fn main(mut self, main: impl Into<String>) -> Self {
        self.main = Some(main.into());
        self
    }

    pub fn generate(&self) -> Vec<u8> {
        let mut stub = String::new();

        if let Some(shebang) = &self.shebang {
            stub.push_str(shebang.trim_end());
            stub.push('\n');
        }
        stub.push_str("<?php\n");

        if let Some(banner) = &self.banner {
            stub.push_str("\n/*\n");
            for line in banner.lines() {
                if line.is_empty() {
                    stub.push_str(" *\n");
                } else {
                    stub.push_str(" * ");
                    stub.push_str(&line.replace("*/", "* /"));
                    stub.push('\n');
                }
            }
            stub.push_str(" */\n");
        }

        stub.push('\n');
        match &self.alias {
            Some(alias) => {
                stub.push_str(&format!("Phar::mapPhar({});\n", php_string(alias)));
            }
            None => stub.push_str("Phar::mapPhar();\n"),
        }

        if let Some(main) = &self.main {
            let alias = self.alias.as_deref().unwrap_or("");
            let target = format!("phar://{}/{}", alias, main.trim_start_matches('/'));
            if alias.is_empty() {
                stub.push_str(&format!(
                    "require 'phar://' . __FILE__ . {};\n",
                    php_string(&format!("/{}", main.trim_start_matches('/')))
                ));
            } else {
                stub.push_str(&format!("require {};\n", php_string(&target)));
            }
        }

        stub.push('\n');
        let mut bytes = stub.into_bytes();
        bytes.extend_from_slice(HALT_MARKER);
        bytes
    }
}

/// Single-quoted PHP string literal
fn php_string(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Make sure a user supplied stub ends right after the halt marker
///
/// Anything after the first marker is dropped; a stub without the marker
/// gets one appended.
pub fn finish_stub(stub: &[u8]) -> Vec<u8> {
    match find_stub_end(stub) {
        Some(end) => stub[..end].to_vec(),
        None => {
            let mut bytes = stub.to_vec();
            if !bytes.is_empty() && !bytes.ends_with(b"\n") {
                bytes.push(b'\n');
            }
            bytes.extend_from_slice(HALT_MARKER);
            bytes
        }
    }
}
