//! CSV reports, written to a temporary sibling and renamed into place.

use std::borrow::Cow;
use std::fs;
use std::io;
use std::path::PathBuf;

use log::{debug, info, warn};

use crate::analysis::{AnalyserPipeline, ReportRow};
use crate::error::ReportError;
use crate::scan::ledger::{self, ErrorLedger};

/// Outcome of a flush: which files were written and which writes failed.
#[derive(Debug, Default)]
pub struct FlushReport {
    pub written: Vec<PathBuf>,
    pub failures: Vec<ReportError>,
}

impl FlushReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    fn push(&mut self, result: Result<PathBuf, ReportError>) {
        match result {
            Ok(path) => self.written.push(path),
            Err(e) => {
                warn!("{}", e);
                self.failures.push(e);
            }
        }
    }
}

pub struct ReportWriter {
    output_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Analyser reports first, then the ledger.
    pub fn flush(&self, pipeline: &AnalyserPipeline, ledger: &ErrorLedger) -> FlushReport {
        let mut report = pipeline.flush(&self.output_dir);
        match self.write_ledger(ledger) {
            Ok(Some(path)) => report.written.push(path),
            Ok(None) => {}
            Err(e) => report.push(Err(e)),
        }
        report
    }

    pub fn write_analysers(&self, pipeline: &AnalyserPipeline) -> FlushReport {
        let mut report = FlushReport::default();
        for analyser in pipeline.analysers() {
            let rows = analyser.snapshot();
            debug!("{} analyser: {} rows", analyser.name(), rows.len());
            report.push(self.write_rows(analyser.report_name(), &rows));
        }
        report
    }

    /// Writes `ignored_files.csv` when the ledger has entries. With an empty
    /// ledger any file left by an earlier run is removed instead.
    pub fn write_ledger(&self, ledger: &ErrorLedger) -> Result<Option<PathBuf>, ReportError> {
        if ledger.is_empty() {
            let path = self.output_dir.join(ledger::CSV);
            return match fs::remove_file(&path) {
                Ok(()) => Ok(None),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(source) => Err(ReportError { path, source }),
            };
        }

        let path = self.write_rows(ledger::CSV, &ledger.rows())?;
        info!("ignored {} files", ledger.len());
        Ok(Some(path))
    }

    pub fn write_rows(&self, name: &str, rows: &[ReportRow]) -> Result<PathBuf, ReportError> {
        let path = self.output_dir.join(name);
        let fail = |source| ReportError {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.output_dir).map_err(fail)?;

        let mut content = String::new();
        for row in rows {
            content.push_str(&encode_row(row));
            content.push('\n');
        }

        let staging = self.output_dir.join(format!(".{}.tmp", name));
        fs::write(&staging, content).map_err(fail)?;
        if let Err(source) = fs::rename(&staging, &path) {
            let _ = fs::remove_file(&staging);
            return Err(fail(source));
        }

        info!("wrote {} rows to {}", rows.len(), path.display());
        Ok(path)
    }
}

/// RFC 4180 row without the line terminator.
pub fn encode_row(fields: &[String]) -> String {
    fields
        .iter()
        .map(|field| escape_field(field))
        .collect::<Vec<_>>()
        .join(",")
}

fn escape_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\r', '\n']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Analyser, HostCounter};
    use crate::capture::{PacketRecord, TransportProtocol};
    use tempfile::TempDir;

    fn strings(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    fn pipeline_with_one_record() -> AnalyserPipeline {
        let pipeline = AnalyserPipeline::with_default_analysers();
        let mut batch = pipeline.begin_file();
        batch.observe(&PacketRecord::new(
            TransportProtocol::Tcp,
            "10.0.0.1:1000".parse().unwrap(),
            "10.0.0.2:80".parse().unwrap(),
        ));
        batch.commit();
        pipeline
    }

    #[test]
    fn test_encode_row() {
        assert_eq!(encode_row(&strings(&["10.0.0.1", "3"])), "10.0.0.1,3");
        assert_eq!(
            encode_row(&strings(&["/data/a,b.pcap", "parse failed: \"x\""])),
            "\"/data/a,b.pcap\",\"parse failed: \"\"x\"\"\""
        );
        assert_eq!(encode_row(&[]), "");
    }

    #[test]
    fn test_write_rows_overwrites() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path());

        writer.write_rows("hostcounter.csv", &[strings(&["10.0.0.1", "1"]), strings(&["10.0.0.2", "1"])]).unwrap();
        let path = writer.write_rows("hostcounter.csv", &[strings(&["10.0.0.9", "4"])]).unwrap();

        assert_eq!(fs::read_to_string(path).unwrap(), "10.0.0.9,4\n");
    }

    #[test]
    fn test_flush_without_failures_skips_ledger() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(ledger::CSV), "stale,row\n").unwrap();

        let report = ReportWriter::new(dir.path()).flush(&pipeline_with_one_record(), &ErrorLedger::new());

        assert!(report.is_ok());
        assert_eq!(report.written.len(), 2);
        assert!(dir.path().join("hostcounter.csv").exists());
        assert!(dir.path().join("conversations.csv").exists());
        assert!(!dir.path().join(ledger::CSV).exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("conversations.csv")).unwrap(),
            "10.0.0.1,10.0.0.2,1\n"
        );
    }

    #[test]
    fn test_flush_writes_ledger() {
        let dir = TempDir::new().unwrap();
        let mut ledger = ErrorLedger::new();
        ledger.record("/captures/bad.pcap.gz", "timeout");

        let report = ReportWriter::new(dir.path().join("out")).flush(&AnalyserPipeline::new(), &ledger);

        assert!(report.is_ok());
        assert_eq!(
            fs::read_to_string(dir.path().join("out").join(ledger::CSV)).unwrap(),
            "/captures/bad.pcap.gz,timeout\n"
        );
    }

    #[test]
    fn test_one_failed_file_does_not_stop_the_others() {
        let dir = TempDir::new().unwrap();
        // a directory where the host report should go makes the rename fail
        fs::create_dir(dir.path().join(HostCounter::new().report_name())).unwrap();

        let report = ReportWriter::new(dir.path()).write_analysers(&pipeline_with_one_record());

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.written, vec![dir.path().join("conversations.csv")]);
        assert!(!dir.path().join(".hostcounter.csv.tmp").exists());
    }
}
