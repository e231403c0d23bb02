use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal: the run cannot start.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Folder '{}' does not exist or is not a directory. Aborting.", .0.display())]
    NotADirectory(PathBuf),

    #[error("Cannot read folder '{}': {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to walk '{}': {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Invalid file name pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Non-fatal: the file is still processed and ordered by the fallback policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("was not able to extract timestamp from '{file_name}'")]
pub struct TimestampParseError {
    pub file_name: String,
}

/// Whole-stream failure reported by a packet parser.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("not a recognizable capture: {0}")]
    Unrecognized(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("malformed capture: {0}")]
    Malformed(String),
}

/// Why a single file ended in the `Failed` state. The `Display` text is the
/// cause string recorded in the error ledger.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("open failed: {0}")]
    Open(#[source] io::Error),

    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("worker failed: {0}")]
    Worker(String),
}

#[derive(Error, Debug)]
#[error("Failed to write '{}': {source}", path.display())]
pub struct ReportError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot write config file '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("No input directory given (positional argument or `input_dir` in the config file)")]
    MissingInputDir,

    #[error("worker_count must be at least 1, got {0}")]
    InvalidWorkerCount(usize),
}
