use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::ParserBackend;
use crate::error::ConfigError;
use crate::scan::DEFAULT_WORKERS;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub input_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub worker_count: usize,
    pub parser_backend: ParserBackend,
    /// Wall-clock budget for a single file, in seconds.
    pub file_timeout_secs: Option<u64>,
}

/// Values given on the command line. `None` keeps what the file (or the
/// default) says.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub worker_count: Option<usize>,
    pub parser_backend: Option<ParserBackend>,
    pub file_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: None,
            output_dir: PathBuf::from("."),
            worker_count: DEFAULT_WORKERS,
            parser_backend: ParserBackend::default(),
            file_timeout_secs: None,
        }
    }
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_toml()?;
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn merge(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(input_dir) = overrides.input_dir {
            self.input_dir = Some(input_dir);
        }
        if let Some(output_dir) = overrides.output_dir {
            self.output_dir = output_dir;
        }
        if let Some(worker_count) = overrides.worker_count {
            self.worker_count = worker_count;
        }
        if let Some(backend) = overrides.parser_backend {
            self.parser_backend = backend;
        }
        if overrides.file_timeout_secs.is_some() {
            self.file_timeout_secs = overrides.file_timeout_secs;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::InvalidWorkerCount(self.worker_count));
        }
        self.input_dir()?;
        Ok(())
    }

    pub fn input_dir(&self) -> Result<&Path, ConfigError> {
        self.input_dir.as_deref().ok_or(ConfigError::MissingInputDir)
    }

    pub fn file_timeout(&self) -> Option<Duration> {
        self.file_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.output_dir, PathBuf::from("."));
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.parser_backend, ParserBackend::Pcap);
        assert_eq!(config.file_timeout(), None);
        assert!(matches!(config.validate(), Err(ConfigError::MissingInputDir)));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            input_dir = "/captures"
            parser_backend = "raw-ip"
            "#,
        )
        .unwrap();

        assert_eq!(config.input_dir().unwrap(), Path::new("/captures"));
        assert_eq!(config.parser_backend, ParserBackend::RawIp);
        assert_eq!(config.worker_count, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = Config {
            input_dir: Some(PathBuf::from("/from/file")),
            worker_count: 8,
            file_timeout_secs: Some(60),
            ..Config::default()
        };
        let merged = file.merge(ConfigOverrides {
            input_dir: Some(PathBuf::from("/from/cli")),
            worker_count: Some(2),
            ..ConfigOverrides::default()
        });

        assert_eq!(merged.input_dir().unwrap(), Path::new("/from/cli"));
        assert_eq!(merged.worker_count, 2);
        assert_eq!(merged.file_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = Config {
            input_dir: Some(PathBuf::from("/captures")),
            worker_count: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidWorkerCount(0))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scanner.toml");
        let config = Config {
            input_dir: Some(PathBuf::from("/captures")),
            output_dir: PathBuf::from("/reports"),
            file_timeout_secs: Some(30),
            ..Config::default()
        };

        config.save_to_file(&path).unwrap();
        assert_eq!(Config::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load_from_file(Path::new("/no/such/scanner.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
