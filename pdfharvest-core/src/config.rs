use crate::archive::ArchiveOptions;
use crate::error::{HarvestError, Result};
use pdfharvest_scanner::LinkMatch;
use pdfharvest_scanner::fetcher::{DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_ITEMS: usize = 50;
pub const DEFAULT_RETENTION_HOURS: u64 = 24;
pub const MAX_RETENTION_HOURS: u64 = 24 * 365;
pub const ARCHIVE_FILE_NAME: &str = "pdf_files.zip";

/// How the finished archive reaches the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Bytes are sent while the archive is built; no known length.
    Streamed,
    /// The archive is collected first and sent with an exact length.
    Buffered,
}

/// What to do when two fetched items map to the same entry name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamePolicy {
    /// `report.pdf`, `report (1).pdf`, ...
    Disambiguate,
    /// Write duplicates as-is; extractors keep the last one.
    LastWriteWins,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub dir: PathBuf,
    pub ttl_hours: u64,
}

impl RetentionConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ttl_hours: DEFAULT_RETENTION_HOURS,
        }
    }

    pub fn ttl(&self) -> Result<chrono::Duration> {
        i64::try_from(self.ttl_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .ok_or_else(|| {
                HarvestError::Validation(format!(
                    "retention of {} hours is out of range",
                    self.ttl_hours
                ))
            })
    }

    /// Expand a leading `~` in the configured directory.
    pub fn expanded_dir(&self) -> PathBuf {
        let raw = self.dir.to_string_lossy();
        PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub allowed_hosts: Vec<String>,
    pub concurrency: usize,
    pub max_items: usize,
    pub link_match: LinkMatch,
    pub archive: ArchiveOptions,
    pub output_mode: OutputMode,
    pub name_policy: NamePolicy,
    pub timeout_secs: u64,
    /// Also drop discovered links whose host is outside the allow-list.
    pub guard_discovered_links: bool,
    pub retention: Option<RetentionConfig>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            concurrency: DEFAULT_CONCURRENCY,
            max_items: DEFAULT_MAX_ITEMS,
            link_match: LinkMatch::default(),
            archive: ArchiveOptions::default(),
            output_mode: OutputMode::Streamed,
            name_policy: NamePolicy::Disambiguate,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            guard_discovered_links: false,
            retention: None,
        }
    }
}

impl HarvestConfig {
    pub fn with_allowed_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.allowed_hosts.is_empty() {
            return Err(HarvestError::Validation(
                "at least one allowed host is required".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(HarvestError::Validation(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_items == 0 {
            return Err(HarvestError::Validation(
                "max_items must be at least 1".to_string(),
            ));
        }
        if self.link_match.pattern().is_empty() {
            return Err(HarvestError::Validation(
                "link pattern must not be empty".to_string(),
            ));
        }
        if let Some(level) = self.archive.level
            && !(0..=9).contains(&level)
        {
            return Err(HarvestError::Validation(format!(
                "compression level {} is outside 0-9",
                level
            )));
        }
        if self.timeout_secs == 0 {
            return Err(HarvestError::Validation(
                "timeout must be at least one second".to_string(),
            ));
        }
        if let Some(retention) = &self.retention {
            if !(1..=MAX_RETENTION_HOURS).contains(&retention.ttl_hours) {
                return Err(HarvestError::Validation(format!(
                    "retention must be between 1 and {} hours",
                    MAX_RETENTION_HOURS
                )));
            }
            retention.ttl()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HarvestConfig::default();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.max_items, 50);
        assert_eq!(config.link_match, LinkMatch::Suffix(".pdf".to_string()));
        assert_eq!(config.archive.level, Some(9));
        assert_eq!(config.output_mode, OutputMode::Streamed);
        assert!(!config.guard_discovered_links);
        assert!(config.retention.is_none());
    }

    #[test]
    fn test_validate() {
        assert!(HarvestConfig::default().validate().is_err());

        let config = HarvestConfig::default().with_allowed_hosts(["example.gov"]);
        assert!(config.validate().is_ok());

        let mut bad = config.clone();
        bad.concurrency = 0;
        assert!(bad.validate().is_err());

        let mut bad = config.clone();
        bad.archive.level = Some(12);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_retention_hours_are_bounded() {
        let mut config = HarvestConfig::default().with_allowed_hosts(["example.gov"]);
        let mut retention = RetentionConfig::new("/tmp/archives");

        retention.ttl_hours = MAX_RETENTION_HOURS;
        config.retention = Some(retention.clone());
        assert!(config.validate().is_ok());

        for hours in [0, MAX_RETENTION_HOURS + 1, 1_000_000_000_000, u64::MAX] {
            retention.ttl_hours = hours;
            config.retention = Some(retention.clone());
            assert!(
                matches!(config.validate(), Err(HarvestError::Validation(_))),
                "{} hours accepted",
                hours
            );
        }

        retention.ttl_hours = u64::MAX;
        assert!(retention.ttl().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: HarvestConfig = serde_json::from_str(
            r#"{ "allowed_hosts": ["example.gov"], "output_mode": "buffered" }"#,
        )
        .unwrap();
        assert_eq!(config.output_mode, OutputMode::Buffered);
        assert_eq!(config.max_items, DEFAULT_MAX_ITEMS);
    }

    #[test]
    fn test_retention_ttl_and_tilde() {
        let retention = RetentionConfig::new("~/archives");
        assert_eq!(retention.ttl().unwrap(), chrono::Duration::hours(24));
        assert!(!retention.expanded_dir().to_string_lossy().starts_with('~'));
    }
}
