//! The latest diagnostics the server published, per file.
//!
//! Publications carry an optional document version. Once a file has a
//! versioned publication, anything older for that file is stale and is
//! dropped; an unversioned publication always replaces what is stored.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::types::{Diagnostic, DiagnosticsSnapshot};

#[derive(Debug, Default)]
struct Published {
    /// Highest document version seen for this file.
    version: Option<i32>,
    items: Vec<Diagnostic>,
}

/// What [`DiagnosticsStore::update`] did with a publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Applied {
    Replaced,
    Cleared,
    Stale { stored: i32 },
}

#[derive(Default)]
pub(crate) struct DiagnosticsStore {
    files: HashMap<PathBuf, Published>,
}

impl DiagnosticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one `publishDiagnostics`. An empty list clears the file but
    /// keeps its version, so a late older publication can't resurrect it.
    pub fn update(
        &mut self,
        path: PathBuf,
        version: Option<i32>,
        items: Vec<Diagnostic>,
    ) -> Applied {
        let entry = self.files.entry(path).or_default();
        if let (Some(stored), Some(incoming)) = (entry.version, version)
            && incoming < stored
        {
            return Applied::Stale { stored };
        }

        entry.version = version.or(entry.version);
        let cleared = items.is_empty();
        entry.items = items;
        if cleared {
            Applied::Cleared
        } else {
            Applied::Replaced
        }
    }

    /// Drop the stored version for `path`. A reopened document starts
    /// counting from 1 again.
    pub fn reset_version(&mut self, path: &Path) {
        if let Some(entry) = self.files.get_mut(path) {
            entry.version = None;
        }
    }

    pub fn for_file(&self, path: &Path) -> Vec<Diagnostic> {
        self.files
            .get(path)
            .map(|entry| entry.items.clone())
            .unwrap_or_default()
    }

    /// Files with errors come first; ties are ordered by path.
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut files: Vec<(PathBuf, Vec<Diagnostic>)> = self
            .files
            .iter()
            .filter(|(_, entry)| !entry.items.is_empty())
            .map(|(path, entry)| (path.clone(), entry.items.clone()))
            .collect();

        files.sort_by_cached_key(|(path, items)| {
            let clean = !items.iter().any(|d| d.severity().is_error());
            (clean, path.clone())
        });
        DiagnosticsSnapshot::new(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DiagnosticSeverity;

    fn diag(severity: DiagnosticSeverity, msg: &str) -> Diagnostic {
        Diagnostic::new(severity, msg.to_string(), 0, 0, "gopls".to_string())
    }

    fn error(msg: &str) -> Vec<Diagnostic> {
        vec![diag(DiagnosticSeverity::Error, msg)]
    }

    #[test]
    fn test_empty_store() {
        let store = DiagnosticsStore::new();
        assert!(store.snapshot().is_empty());
        assert!(store.for_file(Path::new("/w/a.go")).is_empty());
    }

    #[test]
    fn test_publication_replaces_previous() {
        let mut store = DiagnosticsStore::new();
        let path = PathBuf::from("/w/main.go");
        store.update(path.clone(), Some(1), vec![
            diag(DiagnosticSeverity::Error, "undefined: x"),
            diag(DiagnosticSeverity::Warning, "unused import"),
        ]);
        assert_eq!(store.for_file(&path).len(), 2);

        assert_eq!(store.update(path.clone(), Some(2), error("undefined: y")), Applied::Replaced);
        let items = store.for_file(&path);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].message(), "undefined: y");
    }

    #[test]
    fn test_empty_publication_clears_file() {
        let mut store = DiagnosticsStore::new();
        let path = PathBuf::from("/w/main.go");
        store.update(path.clone(), None, error("boom"));
        assert_eq!(store.snapshot().files().len(), 1);

        assert_eq!(store.update(path.clone(), None, vec![]), Applied::Cleared);
        assert!(store.snapshot().is_empty());
        assert!(store.for_file(&path).is_empty());
    }

    #[test]
    fn test_older_version_is_stale() {
        let mut store = DiagnosticsStore::new();
        let path = PathBuf::from("/w/main.go");
        store.update(path.clone(), Some(3), vec![]);

        let applied = store.update(path.clone(), Some(2), error("old"));
        assert_eq!(applied, Applied::Stale { stored: 3 });
        assert!(store.for_file(&path).is_empty());

        // Same version is a re-publish, not stale.
        assert_eq!(store.update(path.clone(), Some(3), error("again")), Applied::Replaced);
    }

    #[test]
    fn test_unversioned_publication_keeps_known_version() {
        let mut store = DiagnosticsStore::new();
        let path = PathBuf::from("/w/main.go");
        store.update(path.clone(), Some(5), error("v5"));
        store.update(path.clone(), None, error("workspace pass"));

        assert!(matches!(
            store.update(path.clone(), Some(4), vec![]),
            Applied::Stale { stored: 5 }
        ));
        assert_eq!(store.for_file(&path)[0].message(), "workspace pass");
    }

    #[test]
    fn test_reset_version_accepts_reopened_document() {
        let mut store = DiagnosticsStore::new();
        let path = PathBuf::from("/w/main.go");
        store.update(path.clone(), Some(7), error("before close"));

        store.reset_version(&path);
        assert_eq!(store.update(path.clone(), Some(1), vec![]), Applied::Cleared);
    }

    #[test]
    fn test_snapshot_puts_errors_first() {
        let mut store = DiagnosticsStore::new();
        store.update(PathBuf::from("/w/b.go"), None, vec![diag(DiagnosticSeverity::Hint, "h")]);
        store.update(PathBuf::from("/w/a.go"), None, vec![diag(DiagnosticSeverity::Warning, "w")]);
        store.update(PathBuf::from("/w/c.go"), None, error("e"));
        store.update(PathBuf::from("/w/d.go"), Some(1), vec![]);

        let snap = store.snapshot();
        let order: Vec<_> = snap.files().iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(
            order,
            vec![
                PathBuf::from("/w/c.go"),
                PathBuf::from("/w/a.go"),
                PathBuf::from("/w/b.go"),
            ]
        );
        assert_eq!(snap.error_count(), 1);
        assert_eq!(snap.warning_count(), 1);
    }
}
