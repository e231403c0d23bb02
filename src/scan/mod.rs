//! Bounded dispatch of capture files to blocking workers.

pub mod ledger;

pub use ledger::{ErrorLedger, LedgerEntry};

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::analysis::{AnalyserPipeline, FileBatch};
use crate::capture::{ArchiveUnwrapper, CaptureFile, PacketParser};
use crate::error::FileError;

pub const DEFAULT_WORKERS: usize = 4;

/// Shared stop flag. Tripping it stops dispatch and makes in-flight files
/// abort at their next record boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Pending,
    Opened,
    Unwrapped,
    Parsing,
    Completed,
    Failed,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileState::Pending => write!(f, "pending"),
            FileState::Opened => write!(f, "opened"),
            FileState::Unwrapped => write!(f, "unwrapped"),
            FileState::Parsing => write!(f, "parsing"),
            FileState::Completed => write!(f, "completed"),
            FileState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub discovered: usize,
    pub processed: usize,
    pub failed: usize,
    /// Never dispatched because the run was cancelled first.
    pub skipped: usize,
    pub records: u64,
    pub ledger: ErrorLedger,
}

pub struct Orchestrator {
    parser: Arc<dyn PacketParser>,
    max_workers: usize,
    file_timeout: Option<Duration>,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(parser: Arc<dyn PacketParser>, max_workers: usize) -> Self {
        Self {
            parser,
            max_workers: max_workers.max(1),
            file_timeout: None,
            cancel: CancelToken::new(),
        }
    }

    /// Wall-clock budget per file; expiry fails the file with cause `timeout`.
    pub fn with_file_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.file_timeout = timeout;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Processes `files` in order with at most `max_workers` in flight and
    /// returns once every dispatched file has completed or failed.
    pub async fn run(&self, files: Vec<CaptureFile>, pipeline: Arc<AnalyserPipeline>) -> RunSummary {
        let mut summary = RunSummary {
            discovered: files.len(),
            ..Default::default()
        };
        let slots = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::new();

        let mut queue = files.into_iter();
        while let Some(file) = queue.next() {
            let permit = match Arc::clone(&slots).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    summary.skipped = 1 + queue.len();
                    break;
                }
            };
            if self.cancel.is_cancelled() {
                summary.skipped = 1 + queue.len();
                info!("Interrupted, {} files left undispatched", summary.skipped);
                break;
            }

            info!("processing {} with {}", file.file_name(), self.parser.name());
            let worker = Worker {
                parser: Arc::clone(&self.parser),
                pipeline: Arc::clone(&pipeline),
                cancel: self.cancel.clone(),
                timeout: self.file_timeout,
            };
            let path = file.path.clone();
            let handle = tasks.spawn_blocking(move || {
                let _permit = permit;
                worker.process(&file)
            });
            in_flight.insert(handle.id(), path);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, outcome),
                Err(e) => (e.id(), Err(FileError::Worker(e.to_string()))),
            };
            let path = in_flight.remove(&id).unwrap_or_default();
            Self::settle(&mut summary, path, outcome);
        }

        debug!("{} records committed to the analysers", pipeline.observed());
        summary
    }

    fn settle(summary: &mut RunSummary, path: PathBuf, outcome: Result<u64, FileError>) {
        match outcome {
            Ok(records) => {
                summary.processed += 1;
                summary.records += records;
            }
            Err(e) => {
                warn!("FAILED {}, {}", e, path.display());
                summary.failed += 1;
                summary.ledger.record(path, e.to_string());
            }
        }
    }
}

/// Everything one blocking task needs to process a single file.
struct Worker {
    parser: Arc<dyn PacketParser>,
    pipeline: Arc<AnalyserPipeline>,
    cancel: CancelToken,
    timeout: Option<Duration>,
}

impl Worker {
    fn process(&self, file: &CaptureFile) -> Result<u64, FileError> {
        let name = file.file_name();
        let deadline = self.timeout.map(|budget| Instant::now() + budget);
        let mut state = FileState::Pending;

        let outcome = self.advance_through(&file.path, &name, deadline, &mut state);
        match &outcome {
            Ok(records) => {
                Self::transition(&name, &mut state, FileState::Completed);
                debug!("{} records from {}", records, name);
            }
            Err(e) => {
                debug!("{}: {} while {}", name, e, state);
                Self::transition(&name, &mut state, FileState::Failed);
            }
        }
        outcome
    }

    // The file handle and the decoded stream are dropped on every return path.
    fn advance_through(
        &self,
        path: &Path,
        name: &str,
        deadline: Option<Instant>,
        state: &mut FileState,
    ) -> Result<u64, FileError> {
        self.checkpoint(deadline)?;
        let file = File::open(path).map_err(FileError::Open)?;
        Self::transition(name, state, FileState::Opened);

        let mut stream = ArchiveUnwrapper::unwrap(file).map_err(FileError::Open)?;
        Self::transition(name, state, FileState::Unwrapped);
        debug!("{}: compression {}", name, stream.compression());

        Self::transition(name, state, FileState::Parsing);
        let mut batch = self.pipeline.begin_file();
        let outcome = self.drain(&mut stream, path, deadline, &mut batch);

        // only a completed file reaches the shared analysers
        match (outcome, stream.fault()) {
            (Ok(()) | Err(FileError::Parse(_)), Some(fault)) => {
                debug!("{}: dropping {} records", name, batch.records());
                Err(FileError::Decompression(fault.to_string()))
            }
            (Ok(()), None) => Ok(batch.commit()),
            (Err(e), _) => {
                debug!("{}: dropping {} records", name, batch.records());
                Err(e)
            }
        }
    }

    fn drain(
        &self,
        stream: &mut (dyn Read + Send),
        path: &Path,
        deadline: Option<Instant>,
        batch: &mut FileBatch<'_>,
    ) -> Result<(), FileError> {
        let records = self.parser.parse(stream, path)?;
        for record in records {
            self.checkpoint(deadline)?;
            let record = record?;
            trace!("{}", record);
            batch.observe(&record);
        }
        Ok(())
    }

    fn checkpoint(&self, deadline: Option<Instant>) -> Result<(), FileError> {
        if self.cancel.is_cancelled() {
            return Err(FileError::Cancelled);
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(FileError::Timeout);
        }
        Ok(())
    }

    fn transition(name: &str, state: &mut FileState, next: FileState) {
        debug!("{}: {} -> {}", name, state, next);
        *state = next;
    }
}
