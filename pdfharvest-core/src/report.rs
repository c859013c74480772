// Report generation from a download summary

use crate::download::DownloadSummary;
use serde::{Deserialize, Serialize};

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }
}

pub fn generate_report(summary: &DownloadSummary, format: ReportFormat) -> String {
    match format {
        ReportFormat::Text => generate_text_report(summary),
        ReportFormat::Json => generate_json_report(summary),
    }
}

pub fn generate_text_report(summary: &DownloadSummary) -> String {
    let mut report = String::new();

    report.push_str(RULE);
    report.push_str("\n                           PDFHARVEST DOWNLOAD REPORT\n");
    report.push_str(RULE);
    report.push_str("\n\n");

    report.push_str(&format!("Target:       {}\n", summary.target));
    report.push_str(&format!("Discovered:   {}\n", summary.discovered));
    report.push_str(&format!("Fetched:      {}\n", summary.candidates));
    if summary.truncated > 0 {
        report.push_str(&format!(
            "Skipped:      {} (item limit reached)\n",
            summary.truncated
        ));
    }
    report.push_str(&format!("Archived:     {}\n", summary.succeeded));
    report.push_str(&format!("Failed:       {}\n", summary.failures.len()));
    report.push_str(&format!(
        "Size:         {} ({} uncompressed)\n",
        format_bytes(summary.archive.archive_bytes),
        format_bytes(summary.archive.uncompressed_bytes)
    ));
    report.push('\n');

    if !summary.entries.is_empty() {
        report.push_str(RULE);
        report.push_str("\nARCHIVE ENTRIES\n");
        report.push_str(RULE);
        report.push_str("\n\n");
        for (idx, name) in summary.entries.iter().enumerate() {
            report.push_str(&format!("  [{}] {}\n", idx + 1, name));
        }
        report.push('\n');
    }

    if !summary.failures.is_empty() {
        report.push_str(RULE);
        report.push_str("\nFAILED ITEMS\n");
        report.push_str(RULE);
        report.push_str("\n\n");
        for failure in &summary.failures {
            report.push_str(&format!("  {}\n    {}\n", failure.url, failure.reason));
        }
        report.push('\n');
    }

    report
}

pub fn generate_json_report(summary: &DownloadSummary) -> String {
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "pdfharvest",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": chrono::Utc::now().to_rfc3339(),
            },
            "target": summary.target,
            "summary": {
                "discovered": summary.discovered,
                "fetched": summary.candidates,
                "truncated": summary.truncated,
                "archived": summary.succeeded,
                "failed": summary.failures.len(),
                "archive_bytes": summary.archive.archive_bytes,
                "uncompressed_bytes": summary.archive.uncompressed_bytes,
            },
            "entries": summary.entries,
            "failures": summary.failures,
            "states": summary.states(),
        }
    });

    serde_json::to_string_pretty(&json_report).unwrap_or_else(|_| json_report.to_string())
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
