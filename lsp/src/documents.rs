//! Open-document bookkeeping for `didOpen`/`didChange`/`didClose`.

use std::collections::HashMap;
use std::path::Path;

/// URIs we have sent `didOpen` for, with their current version.
#[derive(Debug, Default)]
pub(crate) struct OpenDocuments {
    versions: HashMap<String, i32>,
}

impl OpenDocuments {
    pub fn is_open(&self, uri: &str) -> bool {
        self.versions.contains_key(uri)
    }

    /// Record a fresh open at version 1.
    pub fn insert(&mut self, uri: String) -> i32 {
        self.versions.insert(uri, 1);
        1
    }

    /// Next version for an open document, or `None` if it isn't open.
    pub fn bump(&mut self, uri: &str) -> Option<i32> {
        self.versions.get_mut(uri).map(|version| {
            *version += 1;
            *version
        })
    }

    pub fn remove(&mut self, uri: &str) -> bool {
        self.versions.remove(uri).is_some()
    }

    /// Forget every document, returning their URIs in a stable order.
    pub fn drain(&mut self) -> Vec<String> {
        let mut uris: Vec<String> = self.versions.drain().map(|(uri, _)| uri).collect();
        uris.sort();
        uris
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }
}

/// LSP language identifier for a file, by extension.
pub(crate) fn language_id_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "rs" => "rust",
        "go" => "go",
        "py" | "pyi" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" | "hxx" => "cpp",
        "cs" => "csharp",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "lua" => "lua",
        "zig" => "zig",
        "ex" | "exs" => "elixir",
        "hs" => "haskell",
        "ml" | "mli" => "ocaml",
        "scala" => "scala",
        "sh" | "bash" => "shellscript",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "md" | "markdown" => "markdown",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" => "scss",
        "sql" => "sql",
        "xml" => "xml",
        "dart" => "dart",
        "vue" => "vue",
        "svelte" => "svelte",
        _ => "plaintext",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_increase_monotonically() {
        let mut docs = OpenDocuments::default();
        assert!(!docs.is_open("file:///a.rs"));
        assert_eq!(docs.bump("file:///a.rs"), None);

        assert_eq!(docs.insert("file:///a.rs".to_string()), 1);
        assert_eq!(docs.bump("file:///a.rs"), Some(2));
        assert_eq!(docs.bump("file:///a.rs"), Some(3));
        assert!(docs.is_open("file:///a.rs"));
    }

    #[test]
    fn test_remove_and_drain() {
        let mut docs = OpenDocuments::default();
        docs.insert("file:///b.rs".to_string());
        docs.insert("file:///a.rs".to_string());
        docs.insert("file:///c.rs".to_string());

        assert!(docs.remove("file:///c.rs"));
        assert!(!docs.remove("file:///c.rs"));
        assert_eq!(docs.drain(), vec!["file:///a.rs", "file:///b.rs"]);
        assert_eq!(docs.len(), 0);
    }

    #[test]
    fn test_language_ids() {
        assert_eq!(language_id_for(Path::new("src/main.rs")), "rust");
        assert_eq!(language_id_for(Path::new("main.GO")), "go");
        assert_eq!(language_id_for(Path::new("app.tsx")), "typescriptreact");
        assert_eq!(language_id_for(Path::new("Makefile")), "plaintext");
    }
}
