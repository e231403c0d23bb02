use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use log::{debug, info, warn};
use regex::Regex;
use walkdir::WalkDir;

use crate::error::{DiscoveryError, TimestampParseError};
use crate::utils::formatting::format_bytes;

/// `<prefix>-<YYYYMMDD-HHMMSS>-<suffix>`; the name must also mention pcap after it.
const TIMESTAMP_PATTERN: &str = r"(?i)[a-z0-9-](\d{8}-\d{6})-.*pcap";
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// `<letter or dash><vpn digit>-<sequence digit>`, e.g. `vpn1-3-...`.
const TIE_BREAK_PATTERN: &str = r"[a-zA-Z-]([0-9])-([0-9])";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFile {
    pub path: PathBuf,
    pub size: u64,
    pub derived_timestamp: Option<NaiveDateTime>,
    pub tie_break_sequence: Option<u8>,
    pub vpn_id: Option<u8>,
}

impl CaptureFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Sequence used when two timestamps are equal. A name without the
    /// vpn/sequence marker sorts as sequence 0.
    pub fn tie_break(&self) -> u8 {
        self.tie_break_sequence.unwrap_or(0)
    }
}

/// Capture chronology: timestamped files first, oldest to newest, then by
/// tie-break sequence. Files without a timestamp compare equal to each other
/// and after every timestamped file, so a stable sort keeps them in walk
/// order. Two files sharing timestamp and sequence also compare equal; their
/// relative order is not part of the contract.
pub fn compare_captures(a: &CaptureFile, b: &CaptureFile) -> Ordering {
    match (a.derived_timestamp, b.derived_timestamp) {
        (Some(ta), Some(tb)) => ta.cmp(&tb).then_with(|| a.tie_break().cmp(&b.tie_break())),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub fn sort_captures(files: &mut [CaptureFile]) {
    files.sort_by(compare_captures);
}

/// Walks an input directory and returns its capture files in chronological
/// order. All filename conventions live here.
pub struct FileDiscoverer {
    timestamp_re: Regex,
    tie_break_re: Regex,
}

impl FileDiscoverer {
    pub fn new() -> Result<Self, DiscoveryError> {
        Ok(Self {
            timestamp_re: Regex::new(TIMESTAMP_PATTERN)?,
            tie_break_re: Regex::new(TIE_BREAK_PATTERN)?,
        })
    }

    pub fn is_candidate(file_name: &str) -> bool {
        file_name.to_ascii_lowercase().contains("pcap")
    }

    pub fn extract_timestamp(&self, file_name: &str) -> Result<NaiveDateTime, TimestampParseError> {
        let not_found = || TimestampParseError {
            file_name: file_name.to_string(),
        };

        let raw = self
            .timestamp_re
            .captures(file_name)
            .and_then(|caps| caps.get(1))
            .ok_or_else(not_found)?;

        // 20171340-000000 matches the shape but is not a date
        NaiveDateTime::parse_from_str(raw.as_str(), TIMESTAMP_FORMAT).map_err(|_| not_found())
    }

    /// Returns `(vpn_id, sequence)` when the name carries the marker.
    pub fn extract_tie_break(&self, file_name: &str) -> Option<(u8, u8)> {
        let caps = self.tie_break_re.captures(file_name)?;
        let vpn = caps.get(1)?.as_str().parse().ok()?;
        let sequence = caps.get(2)?.as_str().parse().ok()?;
        Some((vpn, sequence))
    }

    pub fn describe(&self, path: PathBuf, size: u64) -> CaptureFile {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let derived_timestamp = match self.extract_timestamp(&name) {
            Ok(ts) => Some(ts),
            Err(e) => {
                warn!("{}; it will be ordered after all timestamped files", e);
                None
            }
        };
        let tie_break = self.extract_tie_break(&name);

        CaptureFile {
            path,
            size,
            derived_timestamp,
            tie_break_sequence: tie_break.map(|(_, seq)| seq),
            vpn_id: tie_break.map(|(vpn, _)| vpn),
        }
    }

    pub fn discover(&self, root: &Path) -> Result<Vec<CaptureFile>, DiscoveryError> {
        if !root.is_dir() {
            return Err(DiscoveryError::NotADirectory(root.to_path_buf()));
        }

        let unreadable = |source| DiscoveryError::Unreadable {
            path: root.to_path_buf(),
            source,
        };
        let root = fs::canonicalize(root).map_err(unreadable)?;
        fs::read_dir(&root).map_err(|source| DiscoveryError::Unreadable {
            path: root.clone(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in WalkDir::new(&root).follow_links(true).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(DiscoveryError::Walk {
                        path: root.clone(),
                        source: e,
                    });
                }
                Err(e) => {
                    warn!("Skipping unreadable entry below {}: {}", root.display(), e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            if !Self::is_candidate(&entry.file_name().to_string_lossy()) {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            files.push(self.describe(entry.into_path(), size));
        }

        sort_captures(&mut files);

        let total: u64 = files.iter().map(|f| f.size).sum();
        info!(
            "Collected list of {} files ({}) in {}",
            files.len(),
            format_bytes(total),
            root.display()
        );
        for (position, file) in files.iter().enumerate() {
            debug!("  #{} {}", position + 1, file.file_name());
        }

        Ok(files)
    }
}
