use pdfharvest::commands::command_argument_builder;
use pdfharvest::handlers::*;
use pdfharvest_core::archive::EntryCompression;
use pdfharvest_core::config::OutputMode;
use pdfharvest_core::error::HarvestError;
use pdfharvest_scanner::{LinkMatch, ScanError};
use std::path::PathBuf;

fn matches_for(args: &[&str]) -> clap::ArgMatches {
    let mut argv = vec!["pdfharvest"];
    argv.extend_from_slice(args);
    command_argument_builder()
        .try_get_matches_from(argv)
        .unwrap()
}

#[test]
fn test_normalize_host_bare() {
    assert_eq!(normalize_host("Example.GOV").unwrap(), "example.gov");
    assert_eq!(normalize_host(" example.gov. ").unwrap(), "example.gov");
}

#[test]
fn test_normalize_host_from_url() {
    assert_eq!(
        normalize_host("https://Docs.Example.gov:8443/path").unwrap(),
        "docs.example.gov"
    );
}

#[test]
fn test_normalize_host_invalid() {
    assert!(normalize_host("").is_err());
    assert!(normalize_host("   ").is_err());
    assert!(normalize_host("mailto:someone").is_err());
}

#[test]
fn test_parse_link_match() {
    assert_eq!(
        parse_link_match("suffix", ".pdf").unwrap(),
        LinkMatch::Suffix(".pdf".to_string())
    );
    assert_eq!(
        parse_link_match("contains", "pdf").unwrap(),
        LinkMatch::Contains("pdf".to_string())
    );
    assert!(parse_link_match("regex", ".pdf").is_err());
    assert!(parse_link_match("suffix", "").is_err());
}

#[test]
fn test_serve_defaults() {
    let matches = matches_for(&["serve", "--allow-host", "example.gov"]);
    let serve = matches.subcommand_matches("serve").unwrap();
    let config = config_from_matches(serve).unwrap();

    assert_eq!(config.allowed_hosts, vec!["example.gov".to_string()]);
    assert_eq!(config.concurrency, 5);
    assert_eq!(config.max_items, 50);
    assert_eq!(config.timeout_secs, 30);
    assert_eq!(config.output_mode, OutputMode::Streamed);
    assert_eq!(config.link_match, LinkMatch::Suffix(".pdf".to_string()));
    assert_eq!(config.archive.compression, EntryCompression::Deflate);
    assert!(config.retention.is_none());
    assert!(config.validate().is_ok());
}

#[test]
fn test_serve_tuning_flags() {
    let matches = matches_for(&[
        "serve",
        "-a",
        "Example.gov",
        "-a",
        "https://files.example.gov/",
        "--concurrency",
        "3",
        "--max-items",
        "10",
        "--match",
        "contains",
        "--pattern",
        "pdf",
        "--mode",
        "buffered",
        "--guard-discovered",
        "--stored",
        "--retention-dir",
        "/tmp/pdfharvest-archives",
        "--retention-hours",
        "2",
    ]);
    let serve = matches.subcommand_matches("serve").unwrap();
    let config = config_from_matches(serve).unwrap();

    assert_eq!(
        config.allowed_hosts,
        vec!["example.gov".to_string(), "files.example.gov".to_string()]
    );
    assert_eq!(config.concurrency, 3);
    assert_eq!(config.max_items, 10);
    assert_eq!(config.link_match, LinkMatch::Contains("pdf".to_string()));
    assert_eq!(config.output_mode, OutputMode::Buffered);
    assert!(config.guard_discovered_links);
    assert_eq!(config.archive.compression, EntryCompression::Store);
    assert_eq!(config.archive.level, None);

    let retention = config.retention.unwrap();
    assert_eq!(retention.dir, PathBuf::from("/tmp/pdfharvest-archives"));
    assert_eq!(retention.ttl_hours, 2);
}

#[test]
fn test_serve_requires_allow_host() {
    let result =
        command_argument_builder().try_get_matches_from(["pdfharvest", "serve", "-c", "2"]);
    assert!(result.is_err());
}

#[test]
fn test_fetch_allow_host_is_optional() {
    let matches = matches_for(&["fetch", "-u", "https://example.gov/list.html"]);
    let fetch = matches.subcommand_matches("fetch").unwrap();
    let config = config_from_matches(fetch).unwrap();

    assert!(config.allowed_hosts.is_empty());
    assert!(config.retention.is_none());
    assert_eq!(
        fetch.get_one::<PathBuf>("output").unwrap(),
        &PathBuf::from("pdf_files.zip")
    );
}

#[test]
fn test_fetch_rejects_bad_values() {
    let cmd = command_argument_builder();
    assert!(
        cmd.clone()
            .try_get_matches_from(["pdfharvest", "fetch", "-u", "not a url"])
            .is_err()
    );
    assert!(
        cmd.try_get_matches_from([
            "pdfharvest",
            "fetch",
            "-u",
            "https://example.gov/",
            "--mode",
            "chunked"
        ])
        .is_err()
    );
}

#[test]
fn test_describe_error_includes_detail() {
    let err = HarvestError::Upstream(ScanError::UpstreamStatus {
        url: "https://example.gov/list.html".to_string(),
        status: 502,
    });
    assert_eq!(
        describe_error(&err),
        "Failed to fetch the target page: upstream responded with status 502"
    );

    let err = HarvestError::Validation("Domain not allowed: evil.example.com".to_string());
    assert_eq!(describe_error(&err), "Domain not allowed: evil.example.com");
}
