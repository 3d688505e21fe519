//! Per-document diagnostics bookkeeping.
//!
//! The collection mirrors what the editor would show: each publication
//! from the server replaces the document's previous entry, and an empty
//! publication removes it.

use std::collections::HashMap;

use url::Url;

use crate::types::Diagnostic;

/// Diagnostics keyed by document, under a named collection.
#[derive(Debug)]
pub(crate) struct DiagnosticsCollection {
    name: String,
    data: HashMap<Url, Vec<Diagnostic>>,
}

impl DiagnosticsCollection {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            data: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the entry for a document. An empty list removes it.
    pub fn update(&mut self, uri: Url, items: Vec<Diagnostic>) {
        if items.is_empty() {
            self.data.remove(&uri);
        } else {
            self.data.insert(uri, items);
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut entries: Vec<(Url, Vec<Diagnostic>)> = self
            .data
            .iter()
            .map(|(uri, items)| (uri.clone(), items.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        DiagnosticsSnapshot { entries }
    }
}

/// A point-in-time copy of the collection, sorted by document URI.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSnapshot {
    entries: Vec<(Url, Vec<Diagnostic>)>,
}

impl DiagnosticsSnapshot {
    #[must_use]
    pub fn entries(&self) -> &[(Url, Vec<Diagnostic>)] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.entries
            .iter()
            .flat_map(|(_, items)| items)
            .filter(|d| d.severity.is_error())
            .count()
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.entries
            .iter()
            .flat_map(|(_, items)| items)
            .filter(|d| d.severity == crate::types::DiagnosticSeverity::Warning)
            .count()
    }

    #[must_use]
    pub fn total_count(&self) -> usize {
        self.entries.iter().map(|(_, items)| items.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DiagnosticSeverity;

    fn diag(severity: DiagnosticSeverity, message: &str) -> Diagnostic {
        Diagnostic {
            severity,
            message: message.to_string(),
            line: 0,
            col: 0,
            source: Some("noverify".to_string()),
        }
    }

    fn uri(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_update_replaces_previous_entry() {
        let mut collection = DiagnosticsCollection::new("noverify");
        let doc = uri("file:///a.php");

        collection.update(
            doc.clone(),
            vec![diag(DiagnosticSeverity::Error, "undefined variable")],
        );
        collection.update(
            doc.clone(),
            vec![diag(DiagnosticSeverity::Warning, "unused variable")],
        );

        let snapshot = collection.snapshot();
        assert_eq!(snapshot.total_count(), 1);
        assert_eq!(snapshot.error_count(), 0);
        assert_eq!(snapshot.entries()[0].1[0].message, "unused variable");
    }

    #[test]
    fn test_empty_update_removes_entry() {
        let mut collection = DiagnosticsCollection::new("noverify");
        let doc = uri("file:///a.php");

        collection.update(doc.clone(), vec![diag(DiagnosticSeverity::Error, "boom")]);
        assert!(!collection.snapshot().is_empty());

        collection.update(doc, Vec::new());
        assert!(collection.snapshot().is_empty());
    }

    #[test]
    fn test_snapshot_sorted_by_uri() {
        let mut collection = DiagnosticsCollection::new("noverify");
        collection.update(
            uri("file:///b.php"),
            vec![diag(DiagnosticSeverity::Warning, "w")],
        );
        collection.update(
            uri("file:///a.php"),
            vec![diag(DiagnosticSeverity::Error, "e")],
        );

        let snapshot = collection.snapshot();
        assert_eq!(snapshot.entries()[0].0.as_str(), "file:///a.php");
        assert_eq!(snapshot.entries()[1].0.as_str(), "file:///b.php");
    }

    #[test]
    fn test_counts_span_documents() {
        let mut collection = DiagnosticsCollection::new("noverify");
        collection.update(
            uri("file:///a.php"),
            vec![
                diag(DiagnosticSeverity::Error, "e1"),
                diag(DiagnosticSeverity::Warning, "w1"),
            ],
        );
        collection.update(
            uri("file:///b.php"),
            vec![diag(DiagnosticSeverity::Error, "e2")],
        );

        let snapshot = collection.snapshot();
        assert_eq!(snapshot.total_count(), 3);
        assert_eq!(snapshot.error_count(), 2);
        assert_eq!(snapshot.warning_count(), 1);
    }

    #[test]
    fn test_clear_empties_everything() {
        let mut collection = DiagnosticsCollection::new("noverify");
        collection.update(
            uri("file:///a.php"),
            vec![diag(DiagnosticSeverity::Error, "e")],
        );
        collection.clear();
        assert!(collection.snapshot().is_empty());
        assert_eq!(collection.name(), "noverify");
    }
}
