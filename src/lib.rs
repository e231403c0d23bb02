// Library exports for pcap-scanner
pub mod analysis;
pub mod capture;
pub mod config;
pub mod error;
pub mod report;
pub mod scan;
pub mod utils;

pub use analysis::{Analyser, AnalyserPipeline, ConversationCounter, FileBatch, HostCounter, Partial};
pub use capture::{ArchiveUnwrapper, CaptureFile, FileDiscoverer, PacketParser, PacketRecord, ParserBackend};
pub use config::settings::Config;
pub use report::ReportWriter;
pub use scan::{CancelToken, ErrorLedger, Orchestrator, RunSummary};
pub use utils::formatting;

// Error types
pub use anyhow::{Error, Result};
