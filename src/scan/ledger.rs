use std::path::{Path, PathBuf};

use crate::analysis::ReportRow;

pub const CSV: &str = "ignored_files.csv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub path: PathBuf,
    pub cause: String,
}

/// Files that ended in the `Failed` state, in the order they failed.
/// Append-only during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorLedger {
    entries: Vec<LedgerEntry>,
}

impl ErrorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, path: impl Into<PathBuf>, cause: impl Into<String>) {
        self.entries.push(LedgerEntry {
            path: path.into(),
            cause: cause.into(),
        });
    }

    pub fn cause(&self, path: &Path) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.path == path)
            .map(|entry| entry.cause.as_str())
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn rows(&self) -> Vec<ReportRow> {
        self.entries
            .iter()
            .map(|entry| vec![entry.path.display().to_string(), entry.cause.clone()])
            .collect()
    }
}
