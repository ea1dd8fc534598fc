use crate::CLAP_STYLING;
use clap::{arg, command};

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("gridwalk")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("gridwalk")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-q --"quiet" "Suppress banner and non-essential output")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(-v --"verbose" "Increase log verbosity (-v info, -vv debug)")
                .required(false)
                .global(true)
                .action(clap::ArgAction::Count),
        )
        .subcommand_required(false)
        .subcommand(
            command!("scan")
                .about(
                    "Passively crawl a single web application, probe its inputs for marker \
                reflection and check POST forms for anti-forgery tokens.",
                )
                .arg(
                    arg!(<URL>)
                        .required(true)
                        .help("The start URL; its scheme, host and port bound the crawl"),
                )
                .arg(
                    arg!(--"max" <PAGES>)
                        .required(false)
                        .help("Maximum number of pages to record (default: 200)")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(-o --"out" <PATH>)
                        .required(false)
                        .help("Where to write the JSON scan result")
                        .default_value("results.json"),
                )
                .arg(
                    arg!(-t --"threads" <NUM_WORKERS>)
                        .required(false)
                        .help("The number of async workers fetching concurrently (default: 4)")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"rate-limit" <MILLIS>)
                        .required(false)
                        .help("Delay between requests of one worker in milliseconds (default: 500)")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Request timeout in seconds (default: 12)")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(--"retries" <COUNT>)
                        .required(false)
                        .help("Extra attempts after a transport failure (default: 0)")
                        .value_parser(clap::value_parser!(u32)),
                )
                .arg(
                    arg!(--"deadline" <SECONDS>)
                        .required(false)
                        .help("Stop the crawl after this many seconds and keep what was found")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    arg!(-c --"config" <FILE>)
                        .required(false)
                        .help("JSON scan configuration; command line flags take precedence"),
                )
                .arg(
                    arg!(--"no-follow-redirects")
                        .required(false)
                        .help("Record redirect responses instead of following them")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"exclude" <PREFIX>)
                        .required(false)
                        .help("Never queue URLs whose path starts with PREFIX (repeatable)")
                        .action(clap::ArgAction::Append),
                )
                .arg(
                    arg!(--"html" <PATH>)
                        .required(false)
                        .help("Also render an HTML report to PATH"),
                )
                .arg(
                    arg!(--"pdf" <PATH>)
                        .required(false)
                        .help("Also render a PDF report to PATH (requires wkhtmltopdf)"),
                ),
        )
        .subcommand(
            command!("report")
                .about("Render an HTML (and optionally PDF) report from a saved scan result")
                .arg(
                    arg!(<JSONFILE>)
                        .required(true)
                        .help("Scan result written by `gridwalk scan`"),
                )
                .arg(
                    arg!(--"target" <LABEL>)
                        .required(true)
                        .help("Target name shown in the report header"),
                )
                .arg(
                    arg!(-o --"out" <PATH>)
                        .required(false)
                        .help("Where to write the HTML report")
                        .default_value("report.html"),
                )
                .arg(
                    arg!(--"pdf" <PATH>)
                        .required(false)
                        .help("Also convert the report to PDF (requires wkhtmltopdf)"),
                ),
        )
}
