//! Build log kept beside the index segments.
//!
//! A build skips articles that earlier builds already indexed, so the counts
//! here accumulate across builds instead of describing the last one alone.

use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::IndexError;

const BUILD_LOG_FILE: &str = "citectx_build.json";

/// Layout of the record fields. An index written under another version has to
/// be rebuilt from scratch.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildLog {
    pub schema_version: u32,
    /// Unix seconds at the end of the latest build.
    pub last_build: Option<u64>,
    /// Reference records added over all builds.
    pub records: u64,
    /// Articles whose reference lists were indexed over all builds.
    pub articles: u64,
    pub builds: u32,
}

impl Default for BuildLog {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            last_build: None,
            records: 0,
            articles: 0,
            builds: 0,
        }
    }
}

impl BuildLog {
    /// Read the log of the index in `dir`. An index that was never built
    /// through [`build_index`](crate::build_index) has an empty log.
    pub fn load(dir: &Path) -> Result<Self, IndexError> {
        match std::fs::read_to_string(dir.join(BUILD_LOG_FILE)) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| IndexError::Parse(format!("{BUILD_LOG_FILE}: {e}"))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn store(&self, dir: &Path) -> Result<(), IndexError> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| IndexError::Parse(e.to_string()))?;
        std::fs::write(dir.join(BUILD_LOG_FILE), content)?;
        Ok(())
    }

    /// Add one build's counts.
    pub fn record_build(&mut self, records: u64, articles: u64, finished_at: u64) {
        self.records += records;
        self.articles += articles;
        self.builds += 1;
        self.last_build = Some(finished_at);
    }

    pub fn check_schema(&self) -> Result<(), IndexError> {
        if self.schema_version == SCHEMA_VERSION {
            return Ok(());
        }
        Err(IndexError::Index(format!(
            "index schema version {} does not match {}; rebuild it with --delete-index",
            self.schema_version, SCHEMA_VERSION
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_accumulate_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = BuildLog::load(dir.path()).unwrap();
        log.record_build(40, 3, 1_700_000_000);
        log.store(dir.path()).unwrap();

        let mut log = BuildLog::load(dir.path()).unwrap();
        log.record_build(2, 1, 1_700_000_500);
        assert_eq!((log.records, log.articles, log.builds), (42, 4, 2));
        assert_eq!(log.last_build, Some(1_700_000_500));
    }

    #[test]
    fn missing_log_is_empty_and_current() {
        let dir = tempfile::tempdir().unwrap();
        let log = BuildLog::load(dir.path()).unwrap();
        assert_eq!(log, BuildLog::default());
        assert!(log.check_schema().is_ok());
    }

    #[test]
    fn other_schema_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(BUILD_LOG_FILE),
            r#"{"schema_version": 0, "last_build": null, "records": 5, "articles": 1, "builds": 1}"#,
        )
        .unwrap();
        let log = BuildLog::load(dir.path()).unwrap();
        assert!(matches!(log.check_schema(), Err(IndexError::Index(_))));
    }

    #[test]
    fn corrupt_log_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(BUILD_LOG_FILE), "not json").unwrap();
        assert!(matches!(
            BuildLog::load(dir.path()),
            Err(IndexError::Parse(_))
        ));
    }
}
