use anyhow::{Context, Result};
use clap::ArgMatches;
use colored::Colorize;
use gridwalk_core::config::ScanConfig;
use gridwalk_core::crawl::{CrawlOptions, execute_crawl, generate_scan_summary};
use gridwalk_core::report::{ReportData, ReportError, generate_html_report, render_pdf, save_report};
use gridwalk_core::store::{ensure_writable, load_scan_result, save_scan_result};
use gridwalk_scanner::{ScanResult, StopSignal, Target};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Installs the stderr log subscriber. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,gridwalk={level},gridwalk_core={level},gridwalk_scanner={level}"
        ))
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Values of `gridwalk scan`, before they are merged with any config file.
#[derive(Debug, Clone, Default)]
pub struct ScanArgs {
    pub url: String,
    pub out: String,
    pub config: Option<String>,
    pub max: Option<usize>,
    pub threads: Option<usize>,
    pub rate_limit_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub retries: Option<u32>,
    pub deadline_secs: Option<u64>,
    pub no_follow_redirects: bool,
    pub exclude: Vec<String>,
    pub html: Option<String>,
    pub pdf: Option<String>,
}

impl ScanArgs {
    pub fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            url: matches.get_one::<String>("URL").cloned().unwrap_or_default(),
            out: matches
                .get_one::<String>("out")
                .cloned()
                .unwrap_or_else(|| "results.json".to_string()),
            config: matches.get_one::<String>("config").cloned(),
            max: matches.get_one::<usize>("max").copied(),
            threads: matches.get_one::<usize>("threads").copied(),
            rate_limit_ms: matches.get_one::<u64>("rate-limit").copied(),
            timeout_secs: matches.get_one::<u64>("timeout").copied(),
            retries: matches.get_one::<u32>("retries").copied(),
            deadline_secs: matches.get_one::<u64>("deadline").copied(),
            no_follow_redirects: matches.get_flag("no-follow-redirects"),
            exclude: matches
                .get_many::<String>("exclude")
                .map(|values| values.cloned().collect())
                .unwrap_or_default(),
            html: matches.get_one::<String>("html").cloned(),
            pdf: matches.get_one::<String>("pdf").cloned(),
        }
    }
}

/// Expand `~` in a user supplied path
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Loads the config file if one was given, then applies command line overrides.
pub fn resolve_config(args: &ScanArgs) -> Result<ScanConfig> {
    let mut config = match args.config {
        Some(ref path) => ScanConfig::from_file(path)?,
        None => ScanConfig::default(),
    };

    if let Some(max) = args.max {
        config.page_budget = Some(max);
    }
    if let Some(threads) = args.threads {
        config.concurrency = threads;
    }
    if let Some(rate_limit) = args.rate_limit_ms {
        config.rate_limit_ms = rate_limit;
    }
    if let Some(timeout) = args.timeout_secs {
        config.timeout_secs = timeout;
    }
    if let Some(retries) = args.retries {
        config.retries = retries;
    }
    if let Some(deadline) = args.deadline_secs {
        config.deadline_secs = Some(deadline);
    }
    if args.no_follow_redirects {
        config.follow_redirects = false;
    }
    config.exclude_paths.extend(args.exclude.iter().cloned());

    config.validate()?;
    Ok(config)
}

/// Everything that must hold before any request is sent.
pub fn preflight(args: &ScanArgs) -> Result<(Target, ScanConfig, PathBuf)> {
    let target = Target::parse(&args.url).context("Invalid start URL")?;
    let config = resolve_config(args)?;
    let out = expand_path(&args.out);
    ensure_writable(&out).context("Output path is not writable")?;
    Ok((target, config, out))
}

pub async fn handle_scan(sub_matches: &ArgMatches, quiet: bool) -> Result<()> {
    let args = ScanArgs::from_matches(sub_matches);
    let (target, config, out) = preflight(&args)?;

    if !quiet {
        println!("\n🕷️  Scanning {}", target.url().as_str().bright_white());
        println!("Workers: {}", config.concurrency);
        match config.page_budget {
            Some(budget) => println!("Page budget: {}", budget),
            None => println!("Page budget: unlimited"),
        }
        println!("Rate limit: {} ms per worker", config.rate_limit_ms);
        println!("Scope: {} (same scheme, host and port)\n", target.authority());
    }

    // Ctrl-C keeps every page finalized so far
    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing in-flight pages");
                stop.stop();
            }
        });
    }

    let options = CrawlOptions {
        target,
        config,
        show_progress_bars: !quiet,
    };
    let result = execute_crawl(options, stop, None)
        .await
        .map_err(anyhow::Error::msg)?;

    save_scan_result(&result, &out)
        .with_context(|| format!("Failed to save results to {}", out.display()))?;

    if !quiet {
        print!("{}", generate_scan_summary(&result));
    }
    println!("{} Saved {} pages to {}", "✓".green().bold(), result.pages.len(), out.display());

    if args.html.is_some() || args.pdf.is_some() {
        let html_path = args
            .html
            .as_deref()
            .map(expand_path)
            .unwrap_or_else(|| out.with_extension("html"));
        let pdf_path = args.pdf.as_deref().map(expand_path);
        // The JSON result is already on disk, so a failed report is not fatal here
        if let Err(e) = write_reports(&result, &result.target, &html_path, pdf_path.as_deref()) {
            eprintln!("{} {}", "✗".red().bold(), e);
        }
    }

    Ok(())
}

pub fn handle_report(sub_matches: &ArgMatches) -> Result<()> {
    let json_file = sub_matches
        .get_one::<String>("JSONFILE")
        .map(|p| expand_path(p))
        .context("JSONFILE is required")?;
    let label = sub_matches
        .get_one::<String>("target")
        .context("--target is required")?;
    let out = sub_matches
        .get_one::<String>("out")
        .map(|p| expand_path(p))
        .unwrap_or_else(|| PathBuf::from("report.html"));
    let pdf = sub_matches.get_one::<String>("pdf").map(|p| expand_path(p));

    let result = load_scan_result(&json_file)
        .with_context(|| format!("Failed to load {}", json_file.display()))?;
    ensure_writable(&out).context("Report path is not writable")?;

    write_reports(&result, label, &out, pdf.as_deref())
        .with_context(|| format!("Failed to generate report for {}", json_file.display()))
}

/// Renders the HTML report and, if asked, the PDF. The PDF is rendered from
/// the HTML file, so it is never attempted when the HTML could not be saved.
pub fn write_reports(
    result: &ScanResult,
    label: &str,
    html_path: &Path,
    pdf_path: Option<&Path>,
) -> Result<(), ReportError> {
    let html = generate_html_report(&ReportData::new(label, result));
    save_report(&html, html_path)?;
    info!("Wrote HTML report to {}", html_path.display());
    println!("{} Report generated: {}", "✓".green().bold(), html_path.display());

    if let Some(pdf_path) = pdf_path {
        render_pdf(html_path, pdf_path)?;
        println!("{} Report generated: {}", "✓".green().bold(), pdf_path.display());
    }
    Ok(())
}
