// Report generation from a saved scan result

use chrono::{DateTime, Utc};
use gridwalk_scanner::ScanResult;
use gridwalk_scanner::analyze::{CookieAttributes, cookie_attributes};
use gridwalk_scanner::result::IssueKind;
use html_escape::encode_text;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

pub const PDF_ENGINE: &str = "wkhtmltopdf";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF rendering failed: {0}")]
    Pdf(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Critical => "Critical",
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
        };
        f.pad(label)
    }
}

/// Nothing maps to `Critical`; it is always reported with a zero count.
pub fn severity_for(kind: &IssueKind) -> Severity {
    match kind {
        IssueKind::MissingCsrfToken => Severity::High,
        IssueKind::PossibleReflection => Severity::Medium,
        IssueKind::Other => Severity::Low,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    pub fn tally(result: &ScanResult) -> Self {
        let mut counts = Self::default();
        for (_, issue) in result.issues() {
            match severity_for(&issue.kind) {
                Severity::Critical => counts.critical += 1,
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Low => counts.low += 1,
            }
        }
        counts
    }

    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

#[derive(Debug, Clone)]
pub struct ReportData {
    pub target: String,
    pub generated_at: DateTime<Utc>,
    pub severity_counts: SeverityCounts,
    pub result: ScanResult,
}

impl ReportData {
    pub fn new(target: &str, result: &ScanResult) -> Self {
        Self {
            target: target.to_string(),
            generated_at: Utc::now(),
            severity_counts: SeverityCounts::tally(result),
            result: result.clone(),
        }
    }

    fn format_timestamp(&self) -> String {
        self.generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
    }

    /// One row per distinct cookie set anywhere in the scan.
    fn cookies(&self) -> Vec<(String, CookieAttributes)> {
        let mut seen = std::collections::BTreeMap::new();
        for page in &self.result.pages {
            for header in &page.cookie_headers {
                let attrs = cookie_attributes(header);
                if !attrs.name.is_empty() {
                    seen.entry(attrs.name.clone())
                        .or_insert_with(|| (page.url.to_string(), attrs));
                }
            }
        }
        seen.into_values().collect()
    }
}

pub fn generate_html_report(data: &ReportData) -> String {
    let mut html = String::new();

    html.push_str("<html>\n<head><meta charset=\"utf-8\"><title>Scan Report</title></head>\n<body>\n");
    html.push_str("<h1>Web App Scan Report</h1>\n");
    html.push_str(&format!("<p>Target: {}</p>\n", encode_text(&data.target)));
    html.push_str(&format!("<p>Scan date: {}</p>\n", data.format_timestamp()));
    if !data.result.completed {
        html.push_str("<p><b>Note:</b> the scan was stopped before the crawl finished; results are partial.</p>\n");
    }

    html.push_str("<h2>Executive summary</h2>\n<ul>\n");
    for severity in Severity::ALL {
        html.push_str(&format!(
            "<li><b>{}</b>: {} issue(s)</li>\n",
            severity,
            data.severity_counts.get(severity)
        ));
    }
    html.push_str("</ul>\n");

    html.push_str("<h2>Findings</h2>\n");
    for page in &data.result.pages {
        html.push_str(&format!(
            "<h3>{} (status {})</h3>\n",
            encode_text(page.url.as_str()),
            page.http_status
        ));
        if page.issues.is_empty() {
            html.push_str("<p>No issues detected (passive checks).</p>\n");
            continue;
        }
        html.push_str("<ul>\n");
        for issue in &page.issues {
            html.push_str(&format!(
                "<li><b>{}</b> [{}] - {}</li>\n",
                issue.kind.as_str(),
                severity_for(&issue.kind),
                encode_text(&issue.message)
            ));
        }
        html.push_str("</ul>\n");
    }

    let cookies = data.cookies();
    if !cookies.is_empty() {
        html.push_str("<h2>Cookies</h2>\n<table border=\"1\">\n");
        html.push_str("<tr><th>Name</th><th>First seen</th><th>Secure</th><th>HttpOnly</th><th>SameSite</th></tr>\n");
        for (url, attrs) in &cookies {
            html.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                encode_text(&attrs.name),
                encode_text(url),
                yes_no(attrs.secure),
                yes_no(attrs.http_only),
                encode_text(attrs.same_site.as_deref().unwrap_or("-"))
            ));
        }
        html.push_str("</table>\n");
    }

    html.push_str("<hr>\n<p>Notes: This report contains only passive &amp; safe checks. For deeper active testing use OWASP ZAP or an authorised penetration test.</p>\n");
    html.push_str("</body>\n</html>\n");

    html
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

pub fn save_report(content: &str, path: &Path) -> Result<(), ReportError> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

/// Converts a rendered HTML file to PDF with an external `wkhtmltopdf`.
pub fn render_pdf(html_path: &Path, pdf_path: &Path) -> Result<(), ReportError> {
    let output = Command::new(PDF_ENGINE)
        .arg("--quiet")
        .arg(html_path)
        .arg(pdf_path)
        .output()
        .map_err(|e| ReportError::Pdf(format!("could not run {}: {}", PDF_ENGINE, e)))?;

    if !output.status.success() {
        return Err(ReportError::Pdf(format!(
            "{} exited with {}: {}",
            PDF_ENGINE,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}
