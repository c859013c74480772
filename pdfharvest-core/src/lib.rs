use colored::Colorize;

pub mod archive;
pub mod config;
pub mod download;
pub mod error;
pub mod progress;
pub mod report;
pub mod retention;
pub mod state;

pub use archive::{ArchiveAssembler, ArchiveEntry, ArchiveOptions, ArchiveStats, ArchiveStream};
pub use config::{HarvestConfig, NamePolicy, OutputMode, RetentionConfig};
pub use download::{
    BufferedDownload, DownloadPlan, DownloadSummary, Harvester, RetainedDownload, SourceRequest,
    StreamedDownload,
};
pub use error::{ErrorBody, HarvestError};
pub use progress::{ProgressEvent, ProgressReporter};
pub use retention::{DiskRetention, RetentionPolicy};
pub use state::DownloadState;

pub fn print_banner() {
    let banner = r#"
    ┌─────────────────────────────────────────────┐
    │   ┏━┓╺┳┓┏━╸   ╻ ╻┏━┓┏━┓╻ ╻┏━╸┏━┓╺┳╸         │
    │   ┣━┛ ┃┃┣╸    ┣━┫┣━┫┣┳┛┃┏┛┣╸ ┗━┓ ┃          │
    │   ╹  ╺┻┛╹     ╹ ╹╹ ╹╹┗╸┗┛ ┗━╸┗━┛ ╹          │
    └─────────────────────────────────────────────┘"#;
    println!("{}", banner.bright_cyan().bold());
    println!(
        "    {} {}\n",
        "pdf link harvester".bright_blue(),
        env!("CARGO_PKG_VERSION").dimmed()
    );
}
