use crate::error::{Result, TransportError};
use reqwest::Client;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(12);

pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64)",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)",
    "Mozilla/5.0 (X11; Linux x86_64)",
    "Googlebot/2.1 (+http://www.google.com/bot.html)",
    "Bingbot/2.0 (+http://www.bing.com/bingbot.htm)",
    "curl/8.0.1",
    "Wget/1.21.1",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: FetchMethod,
    pub url: Url,
    /// Urlencoded body pairs, only sent with `Post`.
    pub form: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: FetchMethod::Get,
            url,
            form: Vec::new(),
        }
    }

    pub fn post(url: Url, form: Vec<(String, String)>) -> Self {
        Self {
            method: FetchMethod::Post,
            url,
            form,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// Final URL after any redirects the fetcher followed.
    pub url: Url,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl FetchResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_all(&self, name: &str) -> Vec<String> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success(FetchResponse),
    TransportFailure(TransportError),
    /// HTTP status >= 500. The body is not kept.
    ServerError(u16),
}

/// The one network capability the crawl engine consumes. Implemented by
/// [`HttpFetcher`] in production and by in-memory fakes in tests.
pub trait Fetch: Send + Sync + 'static {
    fn fetch(&self, request: FetchRequest) -> impl Future<Output = FetchOutcome> + Send;
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub user_agents: Vec<String>,
    pub follow_redirects: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            follow_redirects: true,
        }
    }
}

/// reqwest-backed fetcher. Rotates the `User-Agent` header round-robin over
/// the configured pool.
pub struct HttpFetcher {
    client: Client,
    user_agents: Vec<String>,
    next_agent: AtomicUsize,
}

impl HttpFetcher {
    pub fn new(options: FetchOptions) -> Result<Self> {
        let redirect = if options.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        };

        let client = Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.timeout / 2)
            .pool_max_idle_per_host(50) // Connection pooling
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(redirect)
            .build()?;

        Ok(Self {
            client,
            user_agents: options.user_agents,
            next_agent: AtomicUsize::new(0),
        })
    }

    fn user_agent(&self) -> Option<&str> {
        if self.user_agents.is_empty() {
            return None;
        }
        let idx = self.next_agent.fetch_add(1, Ordering::Relaxed) % self.user_agents.len();
        Some(&self.user_agents[idx])
    }

    async fn send(&self, request: FetchRequest) -> std::result::Result<FetchOutcome, TransportError> {
        let mut builder = match request.method {
            FetchMethod::Get => self.client.get(request.url.clone()),
            FetchMethod::Post => self.client.post(request.url.clone()).form(&request.form),
        };
        if let Some(agent) = self.user_agent() {
            builder = builder.header(reqwest::header::USER_AGENT, agent);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        if status >= 500 {
            return Ok(FetchOutcome::ServerError(status));
        }

        let url = response.url().clone();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response.text().await?;

        Ok(FetchOutcome::Success(FetchResponse {
            url,
            status,
            headers,
            body,
        }))
    }
}

impl Fetch for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> FetchOutcome {
        debug!("{:?} {}", request.method, request.url);
        match self.send(request).await {
            Ok(outcome) => outcome,
            Err(e) => FetchOutcome::TransportFailure(e),
        }
    }
}
