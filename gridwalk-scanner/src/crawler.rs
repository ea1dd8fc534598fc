use crate::analyze::analyze_forms;
use crate::error::Result;
use crate::extract::{ExtractedPage, extract, query_param_names, resolve_link};
use crate::fetch::{Fetch, FetchOptions, FetchOutcome, FetchRequest, FetchResponse, HttpFetcher};
use crate::frontier::{Frontier, InFlight, Offer, UrlFilter};
use crate::pacer::Pacer;
use crate::probe::{ProbeTarget, probe};
use crate::result::{Issue, PageRecord, ScanResult, Target};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use url::Url;

pub type ProgressCallback = Arc<dyn Fn(usize, String) + Send + Sync>;
pub type PageCallback = Arc<dyn Fn(&PageRecord) + Send + Sync>;

/// External stop request for a running crawl. Cloning shares the signal.
#[derive(Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

/// What to do with a page whose redirects ended outside the target authority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RedirectScope {
    #[default]
    Drop,
    Record,
}

pub struct Crawler<F: Fetch = HttpFetcher> {
    fetcher: Arc<F>,
    page_budget: Option<usize>,
    concurrency: usize,
    rate_limit: Duration,
    retries: u32,
    redirect_scope: RedirectScope,
    url_filter: Option<UrlFilter>,
    progress_callback: Option<ProgressCallback>,
    page_callback: Option<PageCallback>,
    stop: StopSignal,
    deadline: Option<Instant>,
}

impl Crawler<HttpFetcher> {
    pub fn new() -> Result<Self> {
        Self::with_fetch_options(FetchOptions::default())
    }

    pub fn with_fetch_options(options: FetchOptions) -> Result<Self> {
        Ok(Self::with_fetcher(HttpFetcher::new(options)?))
    }
}

impl<F: Fetch> Crawler<F> {
    pub fn with_fetcher(fetcher: F) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            page_budget: Some(200),
            concurrency: 4,
            rate_limit: Duration::ZERO,
            retries: 0,
            redirect_scope: RedirectScope::Drop,
            url_filter: None,
            progress_callback: None,
            page_callback: None,
            stop: StopSignal::new(),
            deadline: None,
        }
    }

    /// `None` crawls until the frontier drains.
    pub fn with_page_budget(mut self, budget: Option<usize>) -> Self {
        self.page_budget = budget;
        self
    }

    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers.max(1);
        self
    }

    /// Minimum delay between two requests issued by the same worker.
    pub fn with_rate_limit(mut self, delay: Duration) -> Self {
        self.rate_limit = delay;
        self
    }

    /// Extra attempts after a transport failure. Server errors are never retried.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_redirect_scope(mut self, scope: RedirectScope) -> Self {
        self.redirect_scope = scope;
        self
    }

    pub fn with_url_filter(mut self, filter: UrlFilter) -> Self {
        self.url_filter = Some(filter);
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Called once for every finalized page, in completion order.
    pub fn with_page_callback(mut self, callback: PageCallback) -> Self {
        self.page_callback = Some(callback);
        self
    }

    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub async fn crawl(&self, target: &Target) -> Result<ScanResult> {
        let shared = self.prepare(target);
        Ok(self.drive(target, shared).await)
    }

    fn prepare(&self, target: &Target) -> Arc<Shared<F>> {
        let mut frontier = Frontier::new(target.clone());
        if let Some(ref filter) = self.url_filter {
            frontier = frontier.with_filter(filter.clone());
        }

        Arc::new(Shared {
            fetcher: self.fetcher.clone(),
            frontier,
            results: Mutex::new(Vec::new()),
            pages: AtomicUsize::new(0),
            interrupted: AtomicBool::new(false),
            page_budget: self.page_budget,
            rate_limit: self.rate_limit,
            retries: self.retries,
            redirect_scope: self.redirect_scope,
            progress_callback: self.progress_callback.clone(),
            page_callback: self.page_callback.clone(),
            stop: self.stop.clone(),
            deadline: self.deadline,
        })
    }

    async fn drive(&self, target: &Target, shared: Arc<Shared<F>>) -> ScanResult {
        info!(
            "Starting crawl of {} with {} workers (budget: {:?})",
            target.url(),
            self.concurrency,
            self.page_budget
        );

        match shared.frontier.offer(target.url()) {
            Offer::Queued => {}
            other => warn!("Start URL {} was not queued: {:?}", target.url(), other),
        }
        if self.page_budget == Some(0) {
            shared.frontier.close();
        }

        let watcher = {
            let shared = shared.clone();
            let stop = self.stop.clone();
            let deadline = self.deadline;
            tokio::spawn(async move {
                let expired = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at.into()).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = stop.stopped() => info!("Stop requested, finishing in-flight pages"),
                    _ = expired => info!("Deadline reached, finishing in-flight pages"),
                }
                shared.interrupted.store(true, Ordering::SeqCst);
                shared.frontier.close();
            })
        };

        let worker_handles = (0..self.concurrency).map(|worker_id| {
            let worker = Worker {
                id: worker_id,
                shared: shared.clone(),
            };
            tokio::spawn(worker.run())
        });

        for joined in join_all(worker_handles).await {
            if let Err(e) = joined {
                error!("Worker task failed: {}", e);
                shared.interrupted.store(true, Ordering::SeqCst);
            }
        }
        watcher.abort();

        let pages = std::mem::take(
            &mut *shared
                .results
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let completed = !shared.interrupted.load(Ordering::SeqCst);
        info!(
            "Crawl {}. Recorded {} pages, {} URLs offered",
            if completed { "complete" } else { "stopped early" },
            pages.len(),
            shared.frontier.offered()
        );

        ScanResult {
            target: target.url().to_string(),
            pages,
            completed,
        }
    }
}

/// State shared by all workers of one run: the frontier, the finalized
/// pages, and the counters that guard them.
struct Shared<F: Fetch> {
    fetcher: Arc<F>,
    frontier: Frontier,
    results: Mutex<Vec<PageRecord>>,
    /// Pages reserved against the budget; every reservation ends in a push.
    pages: AtomicUsize,
    interrupted: AtomicBool,
    page_budget: Option<usize>,
    rate_limit: Duration,
    retries: u32,
    redirect_scope: RedirectScope,
    progress_callback: Option<ProgressCallback>,
    page_callback: Option<PageCallback>,
    stop: StopSignal,
    deadline: Option<Instant>,
}

impl<F: Fetch> Shared<F> {
    /// Checked by workers between steps. The watcher task only exists to
    /// wake workers parked on an empty frontier.
    fn interrupted(&self) -> bool {
        if self.interrupted.load(Ordering::SeqCst) {
            return true;
        }
        let expired = self.deadline.is_some_and(|at| Instant::now() >= at);
        if expired || self.stop.is_stopped() {
            self.interrupted.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    fn budget_reached(&self) -> bool {
        self.page_budget
            .is_some_and(|budget| self.pages.load(Ordering::SeqCst) >= budget)
    }

    /// Takes one slot of the page budget, or fails if none are left.
    fn reserve_page(&self) -> bool {
        let reserved = match self.page_budget {
            None => {
                self.pages.fetch_add(1, Ordering::SeqCst);
                true
            }
            Some(budget) => self
                .pages
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < budget).then_some(n + 1))
                .is_ok(),
        };
        if self.budget_reached() {
            debug!("Page budget reached, closing frontier");
            self.frontier.close();
        }
        reserved
    }
}

struct Worker<F: Fetch> {
    id: usize,
    shared: Arc<Shared<F>>,
}

impl<F: Fetch> Worker<F> {
    async fn run(self) {
        debug!("Worker {} started", self.id);
        let mut pacer = Pacer::new(self.shared.rate_limit);

        while !self.shared.interrupted() && !self.shared.budget_reached() {
            let Some(url) = self.shared.frontier.next().await else {
                break;
            };
            let _slot = InFlight::new(&self.shared.frontier);

            if let Some(ref callback) = self.shared.progress_callback {
                callback(self.id, url.to_string());
            }

            if !self.shared.interrupted() && !self.shared.budget_reached() {
                self.visit(&url, &mut pacer).await;
            }
        }

        debug!("Worker {} finished", self.id);
    }

    async fn fetch_page(&self, url: &Url, pacer: &mut Pacer) -> FetchOutcome {
        let mut attempt = 0;
        loop {
            pacer.wait().await;
            match self.shared.fetcher.fetch(FetchRequest::get(url.clone())).await {
                FetchOutcome::TransportFailure(e) if attempt < self.shared.retries => {
                    attempt += 1;
                    debug!("Retrying {} after {} (attempt {})", url, e, attempt);
                }
                outcome => return outcome,
            }
        }
    }

    async fn visit(&self, url: &Url, pacer: &mut Pacer) {
        let response = match self.fetch_page(url, pacer).await {
            FetchOutcome::Success(response) => response,
            FetchOutcome::TransportFailure(e) => {
                warn!("Fetch failed for {}: {}", url, e);
                return;
            }
            FetchOutcome::ServerError(status) => {
                debug!("Server error {} for {}, not recorded", status, url);
                return;
            }
        };

        let Some(page_url) = self.resolve_final_url(url, &response) else {
            return;
        };
        if !self.shared.reserve_page() {
            debug!("Budget exhausted, discarding {}", page_url);
            return;
        }

        let extracted = extract_page(&response, &page_url);
        self.offer_links(&page_url, &response, &extracted);

        let mut record = PageRecord::new(page_url, response.status);
        record.query_params = extracted.query_params;
        record.forms = extracted.forms;
        record.cookie_headers = response.header_all("set-cookie");
        record.issues = self.inspect(&record, pacer).await;

        self.finalize(record);
    }

    /// Applies redirect policy. `None` means the response must not be recorded.
    fn resolve_final_url(&self, requested: &Url, response: &FetchResponse) -> Option<Url> {
        let mut final_url = response.url.clone();
        final_url.set_fragment(None);
        if final_url == *requested {
            return Some(final_url);
        }

        if !self.shared.frontier.target().in_scope(&final_url)
            && self.shared.redirect_scope == RedirectScope::Drop
        {
            debug!(
                "{} redirected out of scope to {}, dropped",
                requested, final_url
            );
            return None;
        }
        if !self.shared.frontier.admits(&final_url) {
            debug!(
                "{} redirected to excluded {}, dropped",
                requested, final_url
            );
            return None;
        }
        if !self.shared.frontier.claim(&final_url) {
            debug!(
                "{} redirected to already known {}, dropped",
                requested, final_url
            );
            return None;
        }
        Some(final_url)
    }

    fn offer_links(&self, page_url: &Url, response: &FetchResponse, extracted: &ExtractedPage) {
        let mut queued = 0;
        for link in &extracted.links {
            if self.shared.frontier.offer(link) == Offer::Queued {
                queued += 1;
            }
        }

        // Unfollowed redirect: the target is just another discovered link.
        if response.is_redirect()
            && let Some(location) = response.header("location")
            && let Some(link) = resolve_link(page_url, location)
            && self.shared.frontier.offer(&link) == Offer::Queued
        {
            queued += 1;
        }

        debug!(
            "[Worker {}] {} links on {}, {} queued",
            self.id,
            extracted.links.len(),
            page_url,
            queued
        );
    }

    /// Runs the token heuristic and reflection probes for one page. Probing
    /// is skipped once a stop has been requested; the page is still recorded
    /// with what was gathered. Forms submitting outside the target authority
    /// get the heuristic but are never submitted.
    async fn inspect(&self, record: &PageRecord, pacer: &mut Pacer) -> Vec<Issue> {
        let mut issues = analyze_forms(&record.forms);

        for form in &record.forms {
            if !self.shared.frontier.target().in_scope(&form.action_url) {
                debug!(
                    "[Worker {}] Form on {} submits out of scope to {}, not probed",
                    self.id, record.url, form.action_url
                );
                continue;
            }
            for field in form.named_fields() {
                let Some(target) = ProbeTarget::form_field(form, field) else {
                    continue;
                };
                if let Some(issue) = self.run_probe(&target, pacer).await {
                    issues.push(issue);
                }
            }
        }

        for name in &record.query_params {
            let target = ProbeTarget::query_param(&record.url, name);
            if let Some(issue) = self.run_probe(&target, pacer).await {
                issues.push(issue);
            }
        }

        issues
    }

    async fn run_probe(&self, target: &ProbeTarget<'_>, pacer: &mut Pacer) -> Option<Issue> {
        if self.shared.interrupted() {
            return None;
        }
        pacer.wait().await;
        let report = probe(self.shared.fetcher.as_ref(), target).await;
        report.into_issue(target)
    }

    fn finalize(&self, record: PageRecord) {
        debug!(
            "[Worker {}] Recorded {} ({} forms, {} params, {} issues)",
            self.id,
            record.url,
            record.forms.len(),
            record.query_params.len(),
            record.issues.len()
        );
        if let Some(ref callback) = self.shared.page_callback {
            callback(&record);
        }
        self.shared
            .results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

/// Markup is only parsed for HTML (or untyped) bodies; other content still
/// contributes its URL's query parameters.
fn extract_page(response: &FetchResponse, page_url: &Url) -> ExtractedPage {
    let is_html = response
        .header("content-type")
        .map(|ct| ct.to_ascii_lowercase().contains("html"))
        .unwrap_or(true);

    if is_html {
        extract(&response.body, page_url)
    } else {
        ExtractedPage {
            query_params: query_param_names(page_url),
            ..ExtractedPage::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::fetch::FetchMethod;
    use crate::probe::encoded_marker;
    use crate::result::IssueKind;
    use std::collections::{HashMap, HashSet};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    const ORIGIN: &str = "http://site.test";

    #[derive(Clone)]
    enum Route {
        Html(String),
        /// Echoes every submitted value raw.
        Echo,
        EchoEncoded,
        Status(u16),
        Fail,
        /// Fails this many times, then serves the HTML.
        Flaky(usize, String),
        /// Transparent redirect: served as if fetched from another URL.
        RedirectTo(String, String),
        /// Unfollowed redirect response with a Location header.
        Location(String),
        Panic,
    }

    /// In-memory site keyed by path (including query for exact matches).
    struct FakeSite {
        routes: HashMap<String, Route>,
        delay: Duration,
        log: Mutex<Vec<FetchRequest>>,
        failures: Mutex<HashMap<String, usize>>,
    }

    impl FakeSite {
        fn new(routes: Vec<(&str, Route)>) -> Self {
            Self {
                routes: routes.into_iter().map(|(p, r)| (p.to_string(), r)).collect(),
                delay: Duration::ZERO,
                log: Mutex::new(Vec::new()),
                failures: Mutex::new(HashMap::new()),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn page_fetches(&self) -> Vec<String> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.method == FetchMethod::Get && !r.url.as_str().contains("SCAN_MARKER"))
                .map(|r| r.url.to_string())
                .collect()
        }

        fn requested_hosts(&self) -> HashSet<String> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter_map(|r| r.url.host_str().map(String::from))
                .collect()
        }

        fn submitted_values(request: &FetchRequest) -> Vec<String> {
            let mut values: Vec<String> = request.url.query_pairs().map(|(_, v)| v.into_owned()).collect();
            values.extend(request.form.iter().map(|(_, v)| v.clone()));
            values
        }

        fn respond(&self, request: &FetchRequest) -> FetchOutcome {
            let html = |url: &Url, body: String| {
                FetchOutcome::Success(FetchResponse {
                    url: url.clone(),
                    status: 200,
                    headers: vec![("Content-Type".to_string(), "text/html".to_string())],
                    body,
                })
            };

            let Some(route) = self.routes.get(request.url.path()) else {
                return FetchOutcome::Success(FetchResponse {
                    url: request.url.clone(),
                    status: 404,
                    headers: Vec::new(),
                    body: "not found".to_string(),
                });
            };

            match route.clone() {
                Route::Html(body) => html(&request.url, body),
                Route::Echo => html(
                    &request.url,
                    format!("<p>{}</p>", Self::submitted_values(request).join(" ")),
                ),
                Route::EchoEncoded => html(
                    &request.url,
                    Self::submitted_values(request)
                        .iter()
                        .map(|v| encoded_marker(v))
                        .collect::<Vec<_>>()
                        .join(" "),
                ),
                Route::Status(status) if status >= 500 => FetchOutcome::ServerError(status),
                Route::Status(status) => FetchOutcome::Success(FetchResponse {
                    url: request.url.clone(),
                    status,
                    headers: Vec::new(),
                    body: String::new(),
                }),
                Route::Fail => FetchOutcome::TransportFailure(TransportError::Timeout),
                Route::Flaky(times, body) => {
                    let mut failures = self.failures.lock().unwrap();
                    let count = failures.entry(request.url.path().to_string()).or_insert(0);
                    if *count < times {
                        *count += 1;
                        FetchOutcome::TransportFailure(TransportError::Connect("refused".into()))
                    } else {
                        html(&request.url, body)
                    }
                }
                Route::RedirectTo(final_url, body) => html(&Url::parse(&final_url).unwrap(), body),
                Route::Location(location) => FetchOutcome::Success(FetchResponse {
                    url: request.url.clone(),
                    status: 302,
                    headers: vec![("Location".to_string(), location)],
                    body: String::new(),
                }),
                Route::Panic => panic!("fetcher failed on {}", request.url),
            }
        }
    }

    impl Fetch for FakeSite {
        async fn fetch(&self, request: FetchRequest) -> FetchOutcome {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let outcome = self.respond(&request);
            self.log.lock().unwrap().push(request);
            outcome
        }
    }

    fn links(paths: &[&str]) -> String {
        let anchors: String = paths
            .iter()
            .map(|p| format!(r#"<a href="{}">{}</a>"#, p, p))
            .collect();
        format!("<html><body>{}</body></html>", anchors)
    }

    fn target() -> Target {
        Target::parse(&format!("{}/", ORIGIN)).unwrap()
    }

    /// A chain of `n` pages where every page links to the next and back to root.
    fn ring(n: usize) -> FakeSite {
        let paths: Vec<String> = (0..n - 1).map(|i| format!("/p{}", i)).collect();
        let mut routes = vec![("/", Route::Html(links(&["/p0"])))];
        for (i, p) in paths.iter().enumerate() {
            let html = match paths.get(i + 1) {
                Some(next) => links(&[next.as_str(), "/", p.as_str()]),
                None => links(&["/"]),
            };
            routes.push((p.as_str(), Route::Html(html)));
        }
        FakeSite::new(routes)
    }

    #[tokio::test]
    async fn test_cycle_visited_once() {
        let site = FakeSite::new(vec![
            ("/", Route::Html(links(&["/a"]))),
            ("/a", Route::Html(links(&["/b", "/a#self"]))),
            ("/b", Route::Html(links(&["/a", "/"]))),
        ]);
        let crawler = Crawler::with_fetcher(site).with_concurrency(3).with_page_budget(None);
        let result = crawler.crawl(&target()).await.unwrap();

        assert_eq!(result.pages.len(), 3);
        let fetched = crawler.fetcher.page_fetches();
        let unique: HashSet<&String> = fetched.iter().collect();
        assert_eq!(fetched.len(), unique.len(), "duplicate fetches: {:?}", fetched);
        assert!(result.completed);
    }

    #[tokio::test]
    async fn test_scope_containment() {
        let root = links(&[
            "http://evil.test/",
            "https://site.test/secure",
            "http://site.test:8080/alt",
            "http://cdn.site.test/x.js",
            "/local",
        ]);
        let site = FakeSite::new(vec![("/", Route::Html(root)), ("/local", Route::Html(links(&[])))]);
        let crawler = Crawler::with_fetcher(site).with_page_budget(None);
        let result = crawler.crawl(&target()).await.unwrap();

        assert_eq!(result.pages.len(), 2);
        for page in &result.pages {
            assert!(target().in_scope(&page.url), "{} escaped scope", page.url);
        }
        let hosts = crawler.fetcher.requested_hosts();
        assert_eq!(hosts, HashSet::from(["site.test".to_string()]));
        assert!(crawler.fetcher.log.lock().unwrap().iter().all(|r| r.url.port().is_none()));
    }

    #[tokio::test]
    async fn test_terminates_with_empty_frontier() {
        let n = 25;
        let crawler = Crawler::with_fetcher(ring(n))
            .with_concurrency(4)
            .with_page_budget(None);
        let target = target();
        let shared = crawler.prepare(&target);
        let result = crawler.drive(&target, shared.clone()).await;

        assert_eq!(result.pages.len(), n);
        assert!(shared.frontier.is_empty());
        assert_eq!(shared.frontier.offered(), n);
        assert!(result.completed);
    }

    #[tokio::test]
    async fn test_budget_respected_exactly() {
        for workers in [1, 3, 8] {
            let crawler = Crawler::with_fetcher(ring(30))
                .with_concurrency(workers)
                .with_page_budget(Some(7));
            let result = crawler.crawl(&target()).await.unwrap();
            assert_eq!(result.pages.len(), 7, "with {} workers", workers);
            assert!(result.completed);
        }
    }

    #[tokio::test]
    async fn test_zero_budget_records_nothing() {
        let crawler = Crawler::with_fetcher(ring(3)).with_page_budget(Some(0));
        let result = crawler.crawl(&target()).await.unwrap();
        assert!(result.pages.is_empty());
        assert!(crawler.fetcher.page_fetches().is_empty());
    }

    #[tokio::test]
    async fn test_failures_not_recorded_or_counted() {
        let site = FakeSite::new(vec![
            ("/", Route::Html(links(&["/down", "/boom", "/missing", "/ok1", "/ok2"]))),
            ("/down", Route::Fail),
            ("/boom", Route::Status(502)),
            ("/ok1", Route::Html(links(&[]))),
            ("/ok2", Route::Html(links(&[]))),
        ]);
        let crawler = Crawler::with_fetcher(site)
            .with_concurrency(1)
            .with_page_budget(Some(4));
        let result = crawler.crawl(&target()).await.unwrap();

        let paths: Vec<&str> = result.pages.iter().map(|p| p.url.path()).collect();
        assert_eq!(paths, vec!["/", "/missing", "/ok1", "/ok2"]);
        assert_eq!(result.pages[1].http_status, 404);
    }

    #[tokio::test]
    async fn test_no_retry_by_default() {
        let site = FakeSite::new(vec![
            ("/", Route::Html(links(&["/flaky"]))),
            ("/flaky", Route::Flaky(1, links(&[]))),
        ]);
        let crawler = Crawler::with_fetcher(site).with_page_budget(None);
        let result = crawler.crawl(&target()).await.unwrap();
        assert_eq!(result.pages.len(), 1);
        assert_eq!(crawler.fetcher.page_fetches().len(), 2);
    }

    #[tokio::test]
    async fn test_retries_when_enabled() {
        let site = FakeSite::new(vec![
            ("/", Route::Html(links(&["/flaky"]))),
            ("/flaky", Route::Flaky(2, links(&[]))),
        ]);
        let crawler = Crawler::with_fetcher(site)
            .with_page_budget(None)
            .with_retries(2);
        let result = crawler.crawl(&target()).await.unwrap();
        assert_eq!(result.pages.len(), 2);
    }

    #[tokio::test]
    async fn test_findings_assembled_per_page() {
        let root = r#"<html><body>
            <a href="/search?q=shoes&page=1">search</a>
            <a href="/safe?term=x">safe</a>
            <form method="POST" action="/echo">
                <input name="email"><input name="password" type="password">
                <input type="submit">
            </form>
            <form method="post" action="/echo">
                <input name="comment"><input type="hidden" name="csrf_token">
            </form>
        </body></html>"#;
        let site = FakeSite::new(vec![
            ("/", Route::Html(root.to_string())),
            ("/search", Route::Echo),
            ("/safe", Route::EchoEncoded),
            ("/echo", Route::Echo),
        ]);
        let crawler = Crawler::with_fetcher(site)
            .with_concurrency(1)
            .with_page_budget(None);
        let result = crawler.crawl(&target()).await.unwrap();
        let page = |p: &str| result.pages.iter().find(|r| r.url.path() == p).unwrap();

        let root = page("/");
        let kinds: Vec<IssueKind> = root.issues.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                IssueKind::MissingCsrfToken,
                IssueKind::PossibleReflection,
                IssueKind::PossibleReflection,
                IssueKind::PossibleReflection,
                IssueKind::PossibleReflection,
            ]
        );
        assert_eq!(root.forms.len(), 2);

        let search = page("/search");
        assert_eq!(search.query_params, vec!["q", "page"]);
        assert_eq!(search.issues.len(), 2);
        assert!(search.issues.iter().all(|i| i.kind == IssueKind::PossibleReflection));

        let safe = page("/safe");
        assert_eq!(safe.query_params, vec!["term"]);
        assert!(safe.issues.is_empty());
    }

    #[tokio::test]
    async fn test_off_site_form_is_flagged_but_never_submitted() {
        let root = r#"<form method="post" action="http://third-party.test/subscribe">
                <input name="email">
            </form>
            <form method="get" action="http://third-party.test/search">
                <input name="q">
            </form>"#;
        let site = FakeSite::new(vec![("/", Route::Html(root.to_string()))]);
        let crawler = Crawler::with_fetcher(site).with_page_budget(Some(1));
        let result = crawler.crawl(&target()).await.unwrap();

        assert_eq!(result.pages.len(), 1);
        let kinds: Vec<IssueKind> = result.pages[0].issues.iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![IssueKind::MissingCsrfToken]);
        assert_eq!(
            crawler.fetcher.requested_hosts(),
            HashSet::from(["site.test".to_string()])
        );
    }

    #[tokio::test]
    async fn test_inconclusive_probes_never_reported() {
        let root = r#"<a href="/dead?q=1">x</a>
            <form method="get" action="/dead"><input name="q"></form>"#;
        let site = FakeSite::new(vec![("/", Route::Html(root.to_string())), ("/dead", Route::Fail)]);
        let crawler = Crawler::with_fetcher(site).with_page_budget(None);
        let result = crawler.crawl(&target()).await.unwrap();
        assert_eq!(result.pages.len(), 1);
        assert!(result.pages[0].issues.is_empty());
    }

    #[tokio::test]
    async fn test_transparent_redirect_records_final_url() {
        let site = FakeSite::new(vec![
            ("/", Route::Html(links(&["/old", "/new"]))),
            ("/old", Route::RedirectTo(format!("{}/new", ORIGIN), links(&[]))),
            ("/new", Route::Html(links(&[]))),
        ]);
        let crawler = Crawler::with_fetcher(site)
            .with_concurrency(1)
            .with_page_budget(None);
        let result = crawler.crawl(&target()).await.unwrap();

        let urls: Vec<String> = result.pages.iter().map(|p| p.url.to_string()).collect();
        // /new is recorded exactly once, under its own URL.
        assert_eq!(urls.iter().filter(|u| u.ends_with("/new")).count(), 1);
        assert!(!urls.iter().any(|u| u.ends_with("/old")));
    }

    #[tokio::test]
    async fn test_cross_authority_redirect_policy() {
        let routes = || {
            vec![
                ("/", Route::Html(links(&["/away"]))),
                ("/away", Route::RedirectTo("http://elsewhere.test/landing".to_string(), links(&[]))),
            ]
        };

        let dropped = Crawler::with_fetcher(FakeSite::new(routes()))
            .with_page_budget(None)
            .crawl(&target())
            .await
            .unwrap();
        assert_eq!(dropped.pages.len(), 1);

        let recorded = Crawler::with_fetcher(FakeSite::new(routes()))
            .with_page_budget(None)
            .with_redirect_scope(RedirectScope::Record)
            .crawl(&target())
            .await
            .unwrap();
        assert_eq!(recorded.pages.len(), 2);
        assert!(recorded.pages.iter().any(|p| p.url.as_str() == "http://elsewhere.test/landing"));
    }

    #[tokio::test]
    async fn test_unfollowed_redirect_location_is_offered() {
        let site = FakeSite::new(vec![
            ("/", Route::Html(links(&["/moved"]))),
            ("/moved", Route::Location("/target#frag".to_string())),
            ("/target", Route::Html(links(&[]))),
        ]);
        let crawler = Crawler::with_fetcher(site).with_page_budget(None);
        let result = crawler.crawl(&target()).await.unwrap();

        let moved = result.pages.iter().find(|p| p.url.path() == "/moved").unwrap();
        assert_eq!(moved.http_status, 302);
        assert!(result.pages.iter().any(|p| p.url.path() == "/target"));
    }

    #[tokio::test]
    async fn test_redirect_into_excluded_path_is_dropped() {
        let site = FakeSite::new(vec![
            ("/", Route::Html(links(&["/old"]))),
            (
                "/old",
                Route::RedirectTo(format!("{}/logout", ORIGIN), links(&["/after-logout"])),
            ),
            ("/after-logout", Route::Html(links(&[]))),
        ]);
        let crawler = Crawler::with_fetcher(site)
            .with_page_budget(None)
            .with_url_filter(Arc::new(|u: &Url| !u.path().starts_with("/logout")));
        let result = crawler.crawl(&target()).await.unwrap();

        let paths: Vec<&str> = result.pages.iter().map(|p| p.url.path()).collect();
        assert_eq!(paths, vec!["/"]);
        assert!(result.completed);
    }

    #[tokio::test]
    async fn test_worker_panic_ends_run_incomplete() {
        let site = FakeSite::new(vec![
            ("/", Route::Html(links(&["/boom", "/a"]))),
            ("/boom", Route::Panic),
            ("/a", Route::Html(links(&[]))),
        ]);
        let crawler = Crawler::with_fetcher(site)
            .with_concurrency(2)
            .with_page_budget(None);

        let result = tokio::time::timeout(Duration::from_secs(5), crawler.crawl(&target()))
            .await
            .expect("crawl should end after a worker panic")
            .unwrap();

        assert!(!result.completed);
        assert!(result.pages.iter().any(|p| p.url.path() == "/"));
        assert!(result.pages.iter().all(|p| p.url.path() != "/boom"));
    }

    #[tokio::test]
    async fn test_url_filter_hook() {
        let site = FakeSite::new(vec![
            ("/", Route::Html(links(&["/logout", "/private/a", "/public"]))),
            ("/logout", Route::Html(links(&[]))),
            ("/private/a", Route::Html(links(&[]))),
            ("/public", Route::Html(links(&[]))),
        ]);
        let crawler = Crawler::with_fetcher(site)
            .with_page_budget(None)
            .with_url_filter(Arc::new(|u: &Url| {
                !u.path().starts_with("/logout") && !u.path().starts_with("/private")
            }));
        let result = crawler.crawl(&target()).await.unwrap();
        let paths: HashSet<&str> = result.pages.iter().map(|p| p.url.path()).collect();
        assert_eq!(paths, HashSet::from(["/", "/public"]));
    }

    #[tokio::test]
    async fn test_stop_returns_finalized_pages_only() {
        let stop = StopSignal::new();
        let finalized = Arc::new(AtomicUsize::new(0));
        let callback: PageCallback = {
            let stop = stop.clone();
            let finalized = finalized.clone();
            Arc::new(move |_page: &PageRecord| {
                if finalized.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                    stop.stop();
                }
            })
        };

        let crawler = Crawler::with_fetcher(ring(20).with_delay(Duration::from_millis(5)))
            .with_concurrency(1)
            .with_page_budget(None)
            .with_stop(stop)
            .with_page_callback(callback);
        let result = crawler.crawl(&target()).await.unwrap();

        assert_eq!(result.pages.len(), 3);
        assert!(!result.completed);
        for page in &result.pages {
            assert_eq!(page.http_status, 200);
        }
    }

    #[tokio::test]
    async fn test_deadline_stops_with_partial_result() {
        let crawler = Crawler::with_fetcher(ring(50).with_delay(Duration::from_millis(20)))
            .with_concurrency(2)
            .with_page_budget(None)
            .with_deadline(Instant::now() + Duration::from_millis(150));
        let result = crawler.crawl(&target()).await.unwrap();

        assert!(result.pages.len() < 50);
        assert!(!result.completed);
    }

    #[tokio::test]
    async fn test_rate_limit_is_per_worker() {
        let crawler = Crawler::with_fetcher(ring(4))
            .with_concurrency(1)
            .with_page_budget(None)
            .with_rate_limit(Duration::from_millis(40));
        let start = Instant::now();
        let result = crawler.crawl(&target()).await.unwrap();
        assert_eq!(result.pages.len(), 4);
        assert!(start.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn test_crawl_against_http_server() {
        let mock_server = MockServer::start().await;

        let root_html = format!(
            r#"<html><body>
                <a href="{}/page1">Page 1</a>
                <a href="/page2?id=3">Page 2</a>
                <a href="https://elsewhere.invalid/">Away</a>
                <form method="post" action="/login">
                    <input name="username"><input name="password" type="password">
                </form>
            </body></html>"#,
            mock_server.uri()
        );

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .insert_header("set-cookie", "sid=abc; HttpOnly")
                    .set_body_string(root_html),
            )
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/page1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(format!(r#"<a href="{}/">home</a>"#, mock_server.uri())),
            )
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/page2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<p>static</p>"),
            )
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>bad login</p>"))
            .mount(&mock_server)
            .await;

        let crawler = Crawler::new()
            .unwrap()
            .with_concurrency(2)
            .with_page_budget(None);
        let target = Target::parse(&mock_server.uri()).unwrap();
        let result = crawler.crawl(&target).await.unwrap();

        assert_eq!(result.pages.len(), 3);
        let root = result.pages.iter().find(|p| p.url.path() == "/").unwrap();
        assert_eq!(root.cookie_headers, vec!["sid=abc; HttpOnly".to_string()]);
        assert_eq!(root.forms.len(), 1);
        assert_eq!(root.issues.len(), 1);
        assert_eq!(root.issues[0].kind, IssueKind::MissingCsrfToken);

        let page2 = result.pages.iter().find(|p| p.url.path() == "/page2").unwrap();
        assert_eq!(page2.query_params, vec!["id"]);
        assert!(page2.issues.is_empty());
    }
}
