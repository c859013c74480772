use crate::server::{ServerConfig, start_server};
use anyhow::{Context, anyhow};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use pdfharvest_core::archive::EntryCompression;
use pdfharvest_core::config::{HarvestConfig, OutputMode, RetentionConfig};
use pdfharvest_core::download::{DownloadSummary, Harvester, SourceRequest};
use pdfharvest_core::progress::{ProgressEvent, ProgressReporter};
use pdfharvest_core::report::{ReportFormat, format_bytes, generate_report};
use pdfharvest_scanner::LinkMatch;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use url::Url;

const PROGRESS_BUFFER: usize = 64;

/// Install the fmt subscriber. `RUST_LOG` wins over `default_directive`.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Accept either a bare host or a URL and return the lowercase host.
pub fn normalize_host(raw: &str) -> Result<String, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("Allowed host must not be empty".to_string());
    }

    let host = if raw.contains("://") {
        Url::parse(raw)
            .map_err(|e| format!("Invalid allowed host '{}': {}", raw, e))?
            .host_str()
            .map(str::to_string)
            .ok_or_else(|| format!("Allowed host '{}' has no host part", raw))?
    } else {
        Url::parse(&format!("http://{}", raw))
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| format!("Invalid allowed host '{}'", raw))?
    };

    Ok(host.trim_end_matches('.').to_ascii_lowercase())
}

pub fn parse_link_match(strategy: &str, pattern: &str) -> Result<LinkMatch, String> {
    if pattern.is_empty() {
        return Err("Link pattern must not be empty".to_string());
    }
    match strategy {
        "suffix" => Ok(LinkMatch::Suffix(pattern.to_string())),
        "contains" => Ok(LinkMatch::Contains(pattern.to_string())),
        other => Err(format!("Unknown match strategy '{}'", other)),
    }
}

/// Build a [`HarvestConfig`] from the shared tuning arguments.
///
/// Allowed hosts come from `--allow-host`; commands that can infer them add more afterwards.
pub fn config_from_matches(args: &ArgMatches) -> Result<HarvestConfig, String> {
    let mut config = HarvestConfig::default();

    if let Some(hosts) = args.get_many::<String>("allow-host") {
        config.allowed_hosts = hosts
            .map(|h| normalize_host(h))
            .collect::<Result<Vec<_>, _>>()?;
    }

    config.concurrency = *args.get_one::<usize>("concurrency").unwrap_or(&config.concurrency);
    config.max_items = *args.get_one::<usize>("max-items").unwrap_or(&config.max_items);
    config.timeout_secs = *args.get_one::<u64>("timeout").unwrap_or(&config.timeout_secs);

    let strategy = args
        .get_one::<String>("match")
        .map(String::as_str)
        .unwrap_or("suffix");
    let pattern = args
        .get_one::<String>("pattern")
        .map(String::as_str)
        .unwrap_or(".pdf");
    config.link_match = parse_link_match(strategy, pattern)?;

    config.output_mode = match args.get_one::<String>("mode").map(String::as_str) {
        Some("buffered") => OutputMode::Buffered,
        _ => OutputMode::Streamed,
    };

    config.guard_discovered_links = args.get_flag("guard-discovered");
    if args.get_flag("stored") {
        config.archive.compression = EntryCompression::Store;
        config.archive.level = None;
    }

    if let Ok(Some(dir)) = args.try_get_one::<PathBuf>("retention-dir") {
        let mut retention = RetentionConfig::new(dir.clone());
        if let Ok(Some(hours)) = args.try_get_one::<u64>("retention-hours") {
            retention.ttl_hours = *hours;
        }
        config.retention = Some(retention);
    }

    Ok(config)
}

pub async fn handle_serve(args: &ArgMatches) -> anyhow::Result<()> {
    init_tracing("info");

    let config = config_from_matches(args).map_err(|e| anyhow!(e))?;
    let bind = *args
        .get_one::<SocketAddr>("bind")
        .context("missing bind address")?;
    let request_timeout = Duration::from_secs(
        *args.get_one::<u64>("request-timeout").unwrap_or(&120),
    );

    println!(
        "{} {}",
        "Allowed hosts:".bright_blue().bold(),
        config.allowed_hosts.join(", ")
    );

    let harvester = Harvester::new(config).context("invalid configuration")?;
    start_server(
        harvester,
        ServerConfig {
            bind,
            request_timeout,
        },
    )
    .await
}

pub async fn handle_fetch(args: &ArgMatches) -> anyhow::Result<()> {
    init_tracing("warn");

    let target = args
        .get_one::<Url>("target-url")
        .context("missing target URL")?
        .clone();
    let base = args.get_one::<Url>("base-url").cloned().unwrap_or_else(|| target.clone());
    let output = args
        .get_one::<PathBuf>("output")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("pdf_files.zip"));
    let output = PathBuf::from(shellexpand::tilde(&output.to_string_lossy()).as_ref());
    let format = args
        .get_one::<String>("format")
        .and_then(|f| ReportFormat::parse(f))
        .unwrap_or(ReportFormat::Text);

    let mut config = config_from_matches(args).map_err(|e| anyhow!(e))?;
    if config.allowed_hosts.is_empty() {
        config.allowed_hosts = [&base, &target]
            .iter()
            .filter_map(|u| u.host_str())
            .map(|h| h.to_ascii_lowercase())
            .collect();
    }
    let mode = config.output_mode;

    let harvester = Harvester::new(config).context("invalid configuration")?;
    let request = SourceRequest::new(base.as_str(), target.as_str());

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!("Looking for links on {}", target));
    let plan = harvester.plan(&request).await;
    spinner.finish_and_clear();
    let plan = plan.map_err(|e| anyhow!("{}", describe_error(&e)))?;

    println!(
        "Found {} links on {}",
        plan.discovered.to_string().bright_cyan().bold(),
        target
    );
    if plan.is_truncated() {
        println!(
            "{}",
            format!(
                "⚠️  Only the first {} links will be downloaded ({} skipped)",
                plan.candidates.len(),
                plan.truncated
            )
            .yellow()
        );
    }

    let (reporter, events) = ProgressReporter::channel(PROGRESS_BUFFER);
    let bar = ProgressBar::new(plan.candidates.len() as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    let progress = drive_progress_bar(bar, events);

    let summary = match mode {
        OutputMode::Streamed => write_streamed(&harvester, plan, reporter, &output).await,
        OutputMode::Buffered => write_buffered(&harvester, plan, reporter, &output).await,
    };
    let _ = progress.await;
    let summary = summary?;

    println!("\n{}", generate_report(&summary, format));
    println!(
        "{} {} documents to {} ({})",
        "✓ Saved".bright_green().bold(),
        summary.succeeded,
        output.display(),
        format_bytes(summary.archive.archive_bytes)
    );
    Ok(())
}

async fn write_streamed(
    harvester: &Harvester,
    plan: pdfharvest_core::download::DownloadPlan,
    reporter: ProgressReporter,
    output: &Path,
) -> anyhow::Result<DownloadSummary> {
    let mut file = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("creating {}", output.display()))?;

    let download = harvester.stream(plan, reporter);
    let written = download.stream.write_to(&mut file).await;
    let summary = download.summary.wait().await;

    match (summary, written) {
        (Ok(summary), Ok(_)) => Ok(summary),
        (Err(e), _) => {
            let _ = tokio::fs::remove_file(output).await;
            Err(anyhow!("{}", describe_error(&e)))
        }
        (Ok(_), Err(e)) => {
            let _ = tokio::fs::remove_file(output).await;
            Err(e).with_context(|| format!("writing {}", output.display()))
        }
    }
}

async fn write_buffered(
    harvester: &Harvester,
    plan: pdfharvest_core::download::DownloadPlan,
    reporter: ProgressReporter,
    output: &Path,
) -> anyhow::Result<DownloadSummary> {
    let download = harvester
        .buffered(plan, reporter)
        .await
        .map_err(|e| anyhow!("{}", describe_error(&e)))?;
    tokio::fs::write(output, &download.bytes)
        .await
        .with_context(|| format!("writing {}", output.display()))?;
    Ok(download.summary)
}

/// Render progress events on `bar` until the channel completes.
pub fn drive_progress_bar(
    bar: ProgressBar,
    mut events: mpsc::Receiver<ProgressEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ProgressEvent::Total { count } => bar.set_length(count as u64),
                ProgressEvent::Progress {
                    current, file_name, ..
                } => {
                    bar.set_position(current as u64);
                    bar.set_message(file_name);
                }
                ProgressEvent::Error { message } => {
                    bar.inc(1);
                    bar.println(format!("{} {}", "⚠️ ".yellow(), message));
                }
                ProgressEvent::Complete => break,
            }
        }
        bar.finish_and_clear();
    })
}

/// Error text for the terminal, including the detail a remote caller would not see.
pub fn describe_error(error: &pdfharvest_core::HarvestError) -> String {
    let body = error.to_body();
    match body.detail {
        Some(detail) => format!("{}: {}", body.message, detail),
        None if body.message == error.to_string() => body.message,
        None => format!("{} ({})", body.message, error),
    }
}
