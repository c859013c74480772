use crate::CLAP_STYLING;
use clap::{ArgAction, Command, arg, command};
use std::net::SocketAddr;
use std::path::PathBuf;
use url::Url;

pub fn command_argument_builder() -> Command {
    Command::new("pdfharvest")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("pdfharvest")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .subcommand_required(false)
        .subcommand(tuning_args(
            command!("serve")
                .about("Serve the download API over HTTP")
                .arg(
                    arg!(-b --"bind" <ADDR>)
                        .required(false)
                        .help("Address to listen on")
                        .value_parser(clap::value_parser!(SocketAddr))
                        .default_value("127.0.0.1:3000"),
                )
                .arg(
                    arg!(-a --"allow-host" <HOST>)
                        .required(true)
                        .action(ArgAction::Append)
                        .help("Host that pages and documents may be fetched from. Repeatable."),
                )
                .arg(
                    arg!(--"request-timeout" <SECONDS>)
                        .required(false)
                        .help("Time allowed before a response starts")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("120"),
                )
                .arg(
                    arg!(--"retention-dir" <PATH>)
                        .required(false)
                        .help("Enable /api/download/archive and keep archives in this directory")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(--"retention-hours" <HOURS>)
                        .required(false)
                        .help("How long retained archives stay downloadable")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("24"),
                ),
        ))
        .subcommand(tuning_args(
            command!("fetch")
                .about("Download every matching document linked from a page into a ZIP file")
                .arg(
                    arg!(-u --"target-url" <URL>)
                        .required(true)
                        .help("The page to collect links from")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(--"base-url" <URL>)
                        .required(false)
                        .help("Base for resolving relative links (default: the target URL)")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(-a --"allow-host" <HOST>)
                        .required(false)
                        .action(ArgAction::Append)
                        .help("Allowed host. Repeatable. (default: the hosts of the given URLs)"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Where to write the archive")
                        .value_parser(clap::value_parser!(PathBuf))
                        .default_value("pdf_files.zip"),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                ),
        ))
}

/// Arguments shared by every command that runs downloads.
fn tuning_args(cmd: Command) -> Command {
    cmd.arg(
        arg!(-c --"concurrency" <NUM>)
            .required(false)
            .help("Maximum number of documents fetched at once")
            .value_parser(clap::value_parser!(usize))
            .default_value("5"),
    )
    .arg(
        arg!(-m --"max-items" <NUM>)
            .required(false)
            .help("Maximum number of documents per archive; extra links are skipped")
            .value_parser(clap::value_parser!(usize))
            .default_value("50"),
    )
    .arg(
        arg!(--"match" <STRATEGY>)
            .required(false)
            .help("suffix: the link path ends with the pattern; contains: the link contains it")
            .value_parser(["suffix", "contains"])
            .default_value("suffix"),
    )
    .arg(
        arg!(-p --"pattern" <PATTERN>)
            .required(false)
            .help("Pattern links are matched against")
            .default_value(".pdf"),
    )
    .arg(
        arg!(--"mode" <MODE>)
            .required(false)
            .help("streamed: send bytes as they are produced; buffered: send with a known length")
            .value_parser(["streamed", "buffered"])
            .default_value("streamed"),
    )
    .arg(
        arg!(-t --"timeout" <SECONDS>)
            .required(false)
            .help("Timeout for each page or document request")
            .value_parser(clap::value_parser!(u64))
            .default_value("30"),
    )
    .arg(
        arg!(--"guard-discovered")
            .required(false)
            .help("Skip discovered links whose host is not allowed")
            .action(ArgAction::SetTrue),
    )
    .arg(
        arg!(--"stored")
            .required(false)
            .help("Store entries without compression")
            .action(ArgAction::SetTrue),
    )
}
