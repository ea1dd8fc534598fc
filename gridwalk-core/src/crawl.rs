use crate::config::ScanConfig;
use crate::report::{Severity, SeverityCounts, severity_for};
use gridwalk_scanner::crawler::PageCallback;
use gridwalk_scanner::{Crawler, PageRecord, RedirectScope, ScanResult, StopSignal, Target};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use url::Url;

/// Options for configuring a crawl operation
pub struct CrawlOptions {
    pub target: Target,
    pub config: ScanConfig,
    pub show_progress_bars: bool,
}

/// Extract the path and query of a URL for display
pub fn extract_url_path(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Execute a crawl with the given options
/// Returns the pages finalized before the run ended
pub async fn execute_crawl(
    options: CrawlOptions,
    stop: StopSignal,
    page_callback: Option<PageCallback>,
) -> Result<ScanResult, String> {
    let CrawlOptions {
        target,
        config,
        show_progress_bars,
    } = options;

    let progress_bar = if show_progress_bars {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message("Starting crawl...");
        Some(Arc::new(pb))
    } else {
        None
    };

    let pages_done = Arc::new(AtomicUsize::new(0));
    let issues_found = Arc::new(AtomicUsize::new(0));

    // Spinner and caller callback both see every finalized page
    let internal_page_callback: PageCallback = {
        let pb = progress_bar.clone();
        let pages_done = pages_done.clone();
        let issues_found = issues_found.clone();
        Arc::new(move |page: &PageRecord| {
            let pages = pages_done.fetch_add(1, Ordering::Relaxed) + 1;
            let issues = issues_found.fetch_add(page.issues.len(), Ordering::Relaxed) + page.issues.len();
            if let Some(ref pb) = pb {
                pb.set_message(format!(
                    "Crawling... {} pages recorded, {} issues",
                    pages, issues
                ));
            }
            if let Some(ref cb) = page_callback {
                cb(page);
            }
        })
    };

    let mut crawler = Crawler::with_fetch_options(config.fetch_options())
        .map_err(|e| format!("Failed to build HTTP client: {}", e))?
        .with_page_budget(config.page_budget)
        .with_concurrency(config.concurrency)
        .with_rate_limit(config.rate_limit())
        .with_retries(config.retries)
        .with_redirect_scope(if config.record_cross_authority_redirects {
            RedirectScope::Record
        } else {
            RedirectScope::Drop
        })
        .with_stop(stop)
        .with_page_callback(internal_page_callback);

    if let Some(filter) = config.url_filter() {
        crawler = crawler.with_url_filter(filter);
    }
    if let Some(deadline) = config.deadline() {
        crawler = crawler.with_deadline(Instant::now() + deadline);
    }
    if let Some(ref pb) = progress_bar {
        let pb = pb.clone();
        crawler = crawler.with_progress_callback(Arc::new(move |_worker_id: usize, url: String| {
            pb.set_message(format!("Fetching {}", url));
        }));
    }

    let result = crawler
        .crawl(&target)
        .await
        .map_err(|e| format!("Crawl of {} failed: {}", target.url(), e))?;

    if let Some(ref pb) = progress_bar {
        let total = pages_done.load(Ordering::Relaxed);
        if result.completed {
            pb.finish_with_message(format!("Crawl complete! {} pages recorded", total));
        } else {
            pb.finish_with_message(format!("Crawl stopped early. {} pages recorded", total));
        }
    }

    Ok(result)
}

/// Generate a terminal summary of a scan
pub fn generate_scan_summary(result: &ScanResult) -> String {
    let counts = SeverityCounts::tally(result);

    let mut report = String::new();
    report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");
    report.push_str("# Summary:\n");
    report.push_str(&format!("  Target: {}\n", result.target));
    report.push_str(&format!("  Pages recorded: {}\n", result.pages.len()));

    let total_forms: usize = result.pages.iter().map(|p| p.forms.len()).sum();
    report.push_str(&format!("  Total forms found: {}\n", total_forms));

    let total_params: usize = result.pages.iter().map(|p| p.query_params.len()).sum();
    report.push_str(&format!("  Total query params found: {}\n", total_params));

    report.push_str(&format!("  Total issues: {}\n", counts.total()));
    for severity in Severity::ALL {
        report.push_str(&format!("    {:<9} {}\n", severity, counts.get(severity)));
    }
    if !result.completed {
        report.push_str("  (stopped early, results are partial)\n");
    }

    report.push_str("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");

    for page in result.pages.iter().filter(|p| !p.issues.is_empty()) {
        let status_str = match page.http_status {
            200..=299 => format!("\x1b[32m{}\x1b[0m", page.http_status), // Green
            300..=399 => format!("\x1b[36m{}\x1b[0m", page.http_status), // Cyan
            400..=499 => format!("\x1b[33m{}\x1b[0m", page.http_status), // Yellow
            _ => format!("{}", page.http_status),
        };
        report.push_str(&format!("  {} {}\n", status_str, extract_url_path(&page.url)));
        for issue in &page.issues {
            report.push_str(&format!(
                "      [{}] {}\n",
                severity_for(&issue.kind).to_string().to_uppercase(),
                issue.message
            ));
        }
    }

    report
}
