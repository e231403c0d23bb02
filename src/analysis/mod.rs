//! Shared analysers and the per-file batches that feed them.

pub mod conversations;
pub mod hosts;

pub use conversations::ConversationCounter;
pub use hosts::HostCounter;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::capture::PacketRecord;
use crate::report::{FlushReport, ReportWriter};

/// One report row; fields are written comma-separated.
pub type ReportRow = Vec<String>;

/// A stateful aggregator. Workers never write to it directly: each file is
/// counted into a [`Partial`] which is folded in only if the file completes.
pub trait Analyser: Send + Sync {
    fn name(&self) -> &'static str;

    /// File name of this analyser's report inside the output directory.
    fn report_name(&self) -> &'static str;

    fn partial(&self) -> Box<dyn Partial + '_>;

    /// Rows in no particular order.
    fn snapshot(&self) -> Vec<ReportRow>;
}

/// Counts for a single file, private to the worker processing it.
pub trait Partial: Send {
    fn observe(&mut self, record: &PacketRecord);

    /// Merges into the owning analyser under its lock.
    fn commit(self: Box<Self>);
}

/// A poisoned lock only means another worker panicked between two map
/// updates; the counters themselves are still whole.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct AnalyserPipeline {
    analysers: Vec<Box<dyn Analyser>>,
    observed: AtomicU64,
}

impl AnalyserPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host counter followed by conversation counter.
    pub fn with_default_analysers() -> Self {
        let mut pipeline = Self::new();
        pipeline
            .register(Box::new(HostCounter::new()))
            .register(Box::new(ConversationCounter::new()));
        pipeline
    }

    pub fn register(&mut self, analyser: Box<dyn Analyser>) -> &mut Self {
        self.analysers.push(analyser);
        self
    }

    /// Applies a single record to every analyser and commits it at once.
    pub fn observe(&self, record: &PacketRecord) {
        let mut batch = self.begin_file();
        batch.observe(record);
        batch.commit();
    }

    pub fn begin_file(&self) -> FileBatch<'_> {
        FileBatch {
            partials: self.analysers.iter().map(|analyser| analyser.partial()).collect(),
            observed: &self.observed,
            records: 0,
        }
    }

    /// Records from committed files.
    pub fn observed(&self) -> u64 {
        self.observed.load(Ordering::Relaxed)
    }

    pub fn analysers(&self) -> &[Box<dyn Analyser>] {
        &self.analysers
    }

    /// Writes each analyser's report into `output_dir`. Call only after the
    /// orchestrator has returned.
    pub fn flush(&self, output_dir: &Path) -> FlushReport {
        ReportWriter::new(output_dir).write_analysers(self)
    }
}

/// One file's worth of records. Dropping it without `commit` discards them.
pub struct FileBatch<'p> {
    partials: Vec<Box<dyn Partial + 'p>>,
    observed: &'p AtomicU64,
    records: u64,
}

impl FileBatch<'_> {
    /// Applies `record` to every analyser's partial in registration order.
    pub fn observe(&mut self, record: &PacketRecord) {
        for partial in &mut self.partials {
            partial.observe(record);
        }
        self.records += 1;
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn commit(self) -> u64 {
        for partial in self.partials {
            partial.commit();
        }
        self.observed.fetch_add(self.records, Ordering::Relaxed);
        debug!("committed {} records", self.records);
        self.records
    }
}
