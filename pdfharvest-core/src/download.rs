//! Download orchestration: validate, discover, fetch, assemble, deliver.

use crate::archive::{ArchiveAssembler, ArchiveEntry, ArchiveStats, ArchiveStream};
use crate::config::{HarvestConfig, NamePolicy};
use crate::error::{HarvestError, Result};
use crate::progress::ProgressReporter;
use crate::retention::{DiskRetention, RetentionPolicy, retained_file_name};
use crate::state::{DownloadState, Lifecycle};
use chrono::{DateTime, Utc};
use pdfharvest_scanner::fetcher::{build_client, build_guarded_client};
use pdfharvest_scanner::{BoundedFetcher, DomainGuard, FailureReason, FetchOutcome, PageCrawler};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Incoming request, as posted by a client or given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRequest {
    pub base_url: Option<String>,
    pub target_url: Option<String>,
}

impl SourceRequest {
    pub fn new(base_url: impl Into<String>, target_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            target_url: Some(target_url.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    /// Relative links on the target page resolve against this.
    pub base: Url,
    pub target: Url,
}

/// Result of validation and discovery. Nothing has been fetched beyond the target page.
#[derive(Debug)]
pub struct DownloadPlan {
    pub request: ValidatedRequest,
    /// Links admitted for fetching, after the item cap.
    pub candidates: Vec<Url>,
    /// Links found on the target page.
    pub discovered: usize,
    /// Links dropped by the item cap.
    pub truncated: usize,
    lifecycle: Lifecycle,
}

impl DownloadPlan {
    pub fn is_truncated(&self) -> bool {
        self.truncated > 0
    }

    pub fn state(&self) -> DownloadState {
        self.lifecycle.current()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub url: String,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadSummary {
    pub target: String,
    pub discovered: usize,
    pub candidates: usize,
    pub truncated: usize,
    pub succeeded: usize,
    pub failures: Vec<ItemFailure>,
    /// Entry names in the order they were appended.
    pub entries: Vec<String>,
    pub archive: ArchiveStats,
    lifecycle: Lifecycle,
}

impl DownloadSummary {
    pub fn states(&self) -> &[DownloadState] {
        self.lifecycle.history()
    }

    fn finish(&mut self) -> Result<()> {
        self.lifecycle.advance(DownloadState::Done)
    }
}

/// Archive bytes sent while they are produced, plus the summary once the run ends.
pub struct StreamedDownload {
    pub stream: ArchiveStream,
    pub summary: SummaryHandle,
}

pub struct SummaryHandle {
    inner: JoinHandle<Result<DownloadSummary>>,
}

impl SummaryHandle {
    pub async fn wait(self) -> Result<DownloadSummary> {
        self.inner
            .await
            .map_err(|e| HarvestError::Unexpected(format!("download task failed: {}", e)))?
    }
}

pub struct BufferedDownload {
    pub bytes: Vec<u8>,
    pub summary: DownloadSummary,
}

/// An archive written to the retention directory.
#[derive(Debug)]
pub struct RetainedDownload {
    pub file_name: String,
    pub path: PathBuf,
    pub expires_at: DateTime<Utc>,
    pub summary: DownloadSummary,
}

impl RetainedDownload {
    pub fn download_url(&self) -> String {
        format!("/temp-archives/{}", self.file_name)
    }
}

/// Runs downloads for one configuration. Cheap to clone.
#[derive(Clone)]
pub struct Harvester {
    config: Arc<HarvestConfig>,
    crawler: PageCrawler,
    fetcher: BoundedFetcher,
    guard: Arc<DomainGuard>,
    retention: Option<Arc<dyn RetentionPolicy>>,
}

impl Harvester {
    pub fn new(config: HarvestConfig) -> Result<Self> {
        config.validate()?;

        let guard = DomainGuard::new(&config.allowed_hosts);
        let page_client = build_guarded_client(config.timeout(), guard.clone())?;
        let item_client = if config.guard_discovered_links {
            page_client.clone()
        } else {
            build_client(config.timeout())?
        };
        let crawler = PageCrawler::new(page_client).with_link_match(config.link_match.clone());
        let fetcher =
            BoundedFetcher::new(item_client, config.concurrency).with_timeout(config.timeout());

        let retention = match &config.retention {
            Some(retention) => {
                let policy = DiskRetention::new(retention.expanded_dir(), retention.ttl()?)
                    .map_err(|e| {
                        HarvestError::Unexpected(format!(
                            "cannot prepare retention directory {}: {}",
                            retention.dir.display(),
                            e
                        ))
                    })?;
                Some(Arc::new(policy) as Arc<dyn RetentionPolicy>)
            }
            None => None,
        };

        info!(
            "Harvester ready: {} allowed hosts, concurrency {}, max {} items",
            config.allowed_hosts.len(),
            config.concurrency,
            config.max_items
        );

        Ok(Self {
            config: Arc::new(config),
            crawler,
            fetcher,
            guard: Arc::new(guard),
            retention,
        })
    }

    /// Replace the retention policy built from configuration.
    pub fn with_retention(mut self, policy: Arc<dyn RetentionPolicy>) -> Self {
        self.retention = Some(policy);
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &BoundedFetcher {
        &self.fetcher
    }

    pub fn guard(&self) -> &DomainGuard {
        &self.guard
    }

    pub fn retention(&self) -> Option<&Arc<dyn RetentionPolicy>> {
        self.retention.as_ref()
    }

    /// Check both URLs against the allow-list. Nothing is fetched.
    pub fn validate(&self, request: &SourceRequest) -> Result<ValidatedRequest> {
        let (Some(base), Some(target)) = (
            non_empty(request.base_url.as_deref()),
            non_empty(request.target_url.as_deref()),
        ) else {
            return Err(HarvestError::Validation(
                "baseUrl and targetUrl are required".to_string(),
            ));
        };

        let base = parse_http_url("baseUrl", base)?;
        let target = parse_http_url("targetUrl", target)?;

        for url in [&base, &target] {
            if !self.guard.is_allowed_url(url) {
                return Err(HarvestError::Validation(format!(
                    "Domain not allowed: {}",
                    url.host_str().unwrap_or_default()
                )));
            }
        }

        Ok(ValidatedRequest { base, target })
    }

    /// Validate the request, fetch the target page and select the links to download.
    pub async fn plan(&self, request: &SourceRequest) -> Result<DownloadPlan> {
        let mut lifecycle = Lifecycle::new();
        match self.discover(request, &mut lifecycle).await {
            Ok((request, candidates, discovered, truncated)) => Ok(DownloadPlan {
                request,
                candidates,
                discovered,
                truncated,
                lifecycle,
            }),
            Err(e) => {
                lifecycle.abort(&e);
                Err(e)
            }
        }
    }

    async fn discover(
        &self,
        request: &SourceRequest,
        lifecycle: &mut Lifecycle,
    ) -> Result<(ValidatedRequest, Vec<Url>, usize, usize)> {
        let request = self.validate(request)?;
        lifecycle.advance(DownloadState::Discovering)?;

        let links = self.crawler.discover(&request.target, &request.base).await?;
        let discovered = links.len();

        let mut candidates = Vec::with_capacity(links.len());
        for link in links {
            if self.guard.is_allowed_url(&link) {
                candidates.push(link);
            } else if self.config.guard_discovered_links {
                info!("Skipping {}: host not in allow-list", link);
            } else {
                warn!("Discovered link {} is outside the allow-list", link);
                candidates.push(link);
            }
        }

        if candidates.is_empty() {
            return Err(HarvestError::NotFound(format!(
                "No links matching {} found on {}",
                self.crawler.link_match().pattern(),
                request.target
            )));
        }

        let mut truncated = 0;
        if candidates.len() > self.config.max_items {
            truncated = candidates.len() - self.config.max_items;
            candidates.truncate(self.config.max_items);
            info!(
                "Limiting download to {} of {} links ({} skipped)",
                self.config.max_items,
                candidates.len() + truncated,
                truncated
            );
        }

        Ok((request, candidates, discovered, truncated))
    }

    /// Start the download and hand back the archive stream immediately.
    pub fn stream(&self, plan: DownloadPlan, reporter: ProgressReporter) -> StreamedDownload {
        let (assembler, stream) = ArchiveAssembler::open(self.config.archive.clone());
        let harvester = self.clone();

        let inner = tokio::spawn(async move {
            let mut reporter = reporter;
            let mut summary = harvester.run(plan, &mut reporter, Some(assembler)).await?;
            summary.finish()?;
            Ok(summary)
        });

        StreamedDownload {
            stream,
            summary: SummaryHandle { inner },
        }
    }

    /// Build the whole archive in memory.
    pub async fn buffered(
        &self,
        plan: DownloadPlan,
        mut reporter: ProgressReporter,
    ) -> Result<BufferedDownload> {
        let (assembler, stream) = ArchiveAssembler::open(self.config.archive.clone());
        // drained concurrently so the writer never stalls on a full channel
        let collector = tokio::spawn(stream.collect_bytes());

        let summary = self.run(plan, &mut reporter, Some(assembler)).await;
        let bytes = collector
            .await
            .map_err(|e| HarvestError::Unexpected(format!("archive collector failed: {}", e)))?;

        let mut summary = summary?;
        let bytes = bytes.map_err(|e| HarvestError::Archive(e.to_string()))?;
        summary.finish()?;
        Ok(BufferedDownload { bytes, summary })
    }

    /// Write the archive into the retention directory and register it for expiry.
    pub async fn retain(
        &self,
        plan: DownloadPlan,
        mut reporter: ProgressReporter,
    ) -> Result<RetainedDownload> {
        let Some(retention) = self.retention.clone() else {
            return Err(HarvestError::Validation(
                "archive retention is not enabled".to_string(),
            ));
        };

        let file_name = retained_file_name(Uuid::new_v4());
        let path = retention.directory().join(&file_name);
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| HarvestError::Archive(format!("creating {}: {}", path.display(), e)))?;

        let (assembler, stream) = ArchiveAssembler::open(self.config.archive.clone());
        let writer = tokio::spawn(async move { stream.write_to(&mut file).await });

        let summary = self.run(plan, &mut reporter, Some(assembler)).await;
        let written = writer
            .await
            .map_err(|e| HarvestError::Unexpected(format!("archive writer failed: {}", e)));

        let written = match (summary, written) {
            (Ok(summary), Ok(Ok(written))) => Ok((summary, written)),
            (Err(e), _) | (_, Err(e)) => Err(e),
            (_, Ok(Err(e))) => Err(HarvestError::Archive(format!(
                "writing {}: {}",
                path.display(),
                e
            ))),
        };
        let retained = written.and_then(|done| {
            retention
                .retain(path.clone())
                .map(|expires_at| (done, expires_at))
        });
        let ((mut summary, written), expires_at) = match retained {
            Ok(retained) => retained,
            Err(e) => {
                if let Err(remove) = tokio::fs::remove_file(&path).await {
                    debug!("Could not remove partial {}: {}", path.display(), remove);
                }
                return Err(e);
            }
        };

        info!(
            "Wrote {} ({} bytes), expires {}",
            path.display(),
            written,
            expires_at
        );
        summary.finish()?;

        Ok(RetainedDownload {
            file_name,
            path,
            expires_at,
            summary,
        })
    }

    /// Fetch everything and report it over the progress channel only; no archive is built.
    pub async fn report_only(
        &self,
        plan: DownloadPlan,
        mut reporter: ProgressReporter,
    ) -> Result<DownloadSummary> {
        let mut summary = self.run(plan, &mut reporter, None).await?;
        summary.finish()?;
        Ok(summary)
    }

    async fn run(
        &self,
        plan: DownloadPlan,
        reporter: &mut ProgressReporter,
        assembler: Option<ArchiveAssembler>,
    ) -> Result<DownloadSummary> {
        let DownloadPlan {
            request,
            candidates,
            discovered,
            truncated,
            mut lifecycle,
        } = plan;

        let mut summary = DownloadSummary {
            target: request.target.to_string(),
            discovered,
            candidates: candidates.len(),
            truncated,
            succeeded: 0,
            failures: Vec::new(),
            entries: Vec::new(),
            archive: ArchiveStats::default(),
            lifecycle: Lifecycle::new(),
        };

        let result = self
            .run_batch(candidates, reporter, assembler, &mut summary, &mut lifecycle)
            .await;

        match result {
            Ok(()) => {
                reporter.complete().await;
                summary.lifecycle = lifecycle;
                Ok(summary)
            }
            Err(e) => {
                lifecycle.abort(&e);
                reporter.fail(e.to_body().message).await;
                Err(e)
            }
        }
    }

    async fn run_batch(
        &self,
        candidates: Vec<Url>,
        reporter: &mut ProgressReporter,
        assembler: Option<ArchiveAssembler>,
        summary: &mut DownloadSummary,
        lifecycle: &mut Lifecycle,
    ) -> Result<()> {
        let total = candidates.len();
        lifecycle.advance(DownloadState::Fetching)?;
        reporter.total(total).await;

        let mut outcomes = self.fetcher.spawn_all(candidates);
        lifecycle.advance(DownloadState::Assembling)?;

        let mut namer = EntryNamer::new(self.config.name_policy);
        let mut processed = 0;
        let mut writer_stopped = false;
        let mut uncompressed = 0u64;

        while let Some(outcome) = outcomes.recv().await {
            processed += 1;
            match outcome {
                FetchOutcome::Success(item) => {
                    let name = namer.assign(&item.file_name);
                    let echoed = reporter.wants_payloads().then(|| item.payload.clone());

                    if let Some(assembler) = &assembler {
                        let entry = ArchiveEntry::new(name.clone(), item.payload);
                        if assembler.append(entry).await.is_err() {
                            writer_stopped = true;
                            break;
                        }
                    }

                    summary.succeeded += 1;
                    uncompressed += item.size_bytes;
                    reporter
                        .progress(
                            processed,
                            total,
                            &name,
                            item.size_bytes,
                            echoed.as_deref(),
                        )
                        .await;
                    summary.entries.push(name);
                }
                FetchOutcome::Failure { url, reason } => {
                    warn!("Skipping {}: {}", url, reason);
                    reporter
                        .error(format!("Failed to fetch {}: {}", url, reason))
                        .await;
                    summary.failures.push(ItemFailure {
                        url: url.to_string(),
                        reason,
                    });
                }
            }
        }

        lifecycle.advance(DownloadState::Responding)?;
        summary.archive = match assembler {
            Some(assembler) => {
                let stats = assembler.finalize().await?;
                if writer_stopped {
                    return Err(HarvestError::Archive("archive writer stopped".to_string()));
                }
                stats
            }
            None => ArchiveStats {
                entries: summary.succeeded,
                uncompressed_bytes: uncompressed,
                archive_bytes: 0,
            },
        };

        info!(
            "Download of {} finished: {} of {} items archived, {} failed",
            summary.target,
            summary.succeeded,
            total,
            summary.failures.len()
        );
        Ok(())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_http_url(field: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| HarvestError::Validation(format!("{} is not a valid URL: {}", field, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(HarvestError::Validation(format!(
            "{} must be an http or https URL",
            field
        )));
    }
    Ok(url)
}

/// Assigns archive entry names, resolving collisions per [`NamePolicy`].
struct EntryNamer {
    policy: NamePolicy,
    used: HashSet<String>,
}

impl EntryNamer {
    fn new(policy: NamePolicy) -> Self {
        Self {
            policy,
            used: HashSet::new(),
        }
    }

    fn assign(&mut self, file_name: &str) -> String {
        if self.policy == NamePolicy::LastWriteWins || self.used.insert(file_name.to_string()) {
            return file_name.to_string();
        }

        let (stem, ext) = match file_name.rfind('.') {
            Some(dot) if dot > 0 => file_name.split_at(dot),
            _ => (file_name, ""),
        };
        let mut n = 1;
        loop {
            let candidate = format!("{} ({}){}", stem, n, ext);
            if self.used.insert(candidate.clone()) {
                debug!("Renamed duplicate entry {} to {}", file_name, candidate);
                return candidate;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harvester() -> Harvester {
        Harvester::new(HarvestConfig::default().with_allowed_hosts(["example.gov"])).unwrap()
    }

    #[test]
    fn test_entry_namer_disambiguates() {
        let mut namer = EntryNamer::new(NamePolicy::Disambiguate);
        assert_eq!(namer.assign("report.pdf"), "report.pdf");
        assert_eq!(namer.assign("report.pdf"), "report (1).pdf");
        assert_eq!(namer.assign("report.pdf"), "report (2).pdf");
        assert_eq!(namer.assign("report (1).pdf"), "report (1) (1).pdf");
        assert_eq!(namer.assign(".hidden"), ".hidden");
        assert_eq!(namer.assign(".hidden"), ".hidden (1)");
    }

    #[test]
    fn test_entry_namer_last_write_wins() {
        let mut namer = EntryNamer::new(NamePolicy::LastWriteWins);
        assert_eq!(namer.assign("a.pdf"), "a.pdf");
        assert_eq!(namer.assign("a.pdf"), "a.pdf");
    }

    #[tokio::test]
    async fn test_validate_requires_both_fields() {
        let harvester = harvester();
        let request = SourceRequest {
            base_url: Some("https://example.gov/".to_string()),
            target_url: Some("   ".to_string()),
        };
        let err = harvester.validate(&request).unwrap_err();
        assert!(matches!(err, HarvestError::Validation(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_validate_rejects_foreign_and_non_http() {
        let harvester = harvester();

        let foreign = SourceRequest::new("https://evil.example.com/", "https://example.gov/a");
        let err = harvester.validate(&foreign).unwrap_err();
        assert_eq!(err.to_string(), "Domain not allowed: evil.example.com");

        let ftp = SourceRequest::new("ftp://example.gov/", "https://example.gov/a");
        assert!(harvester.validate(&ftp).is_err());

        let ok = SourceRequest::new("https://EXAMPLE.gov/docs/", "https://example.gov/docs/list");
        let validated = harvester.validate(&ok).unwrap();
        assert_eq!(validated.target.path(), "/docs/list");
    }

    #[test]
    fn test_source_request_wire_names() {
        let request: SourceRequest = serde_json::from_str(
            r#"{ "baseUrl": "https://example.gov/", "targetUrl": "https://example.gov/list" }"#,
        )
        .unwrap();
        assert_eq!(
            request,
            SourceRequest::new("https://example.gov/", "https://example.gov/list")
        );

        let empty: SourceRequest = serde_json::from_str("{}").unwrap();
        assert!(empty.base_url.is_none());
    }
}
