use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Scheme, host and effective port of a URL. Two URLs are in the same scope
/// iff their authorities are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Authority {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
}

impl Authority {
    pub fn of(url: &Url) -> Option<Self> {
        let host = url.host_str()?;
        Some(Self {
            scheme: url.scheme().to_string(),
            host: host.to_ascii_lowercase(),
            port: url.port_or_known_default(),
        })
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}://{}:{}", self.scheme, self.host, port),
            None => write!(f, "{}://{}", self.scheme, self.host),
        }
    }
}

/// The scan's starting point and scope boundary.
#[derive(Debug, Clone)]
pub struct Target {
    url: Url,
    authority: Authority,
}

impl Target {
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input.trim())
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", input, e)))?;
        Self::from_url(url)
    }

    pub fn from_url(mut url: Url) -> Result<Self> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ScanError::InvalidUrl(format!(
                "{}: only http and https targets are supported",
                url
            )));
        }
        let authority = Authority::of(&url)
            .ok_or_else(|| ScanError::InvalidUrl(format!("{}: missing host", url)))?;
        url.set_fragment(None);
        Ok(Self { url, authority })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn in_scope(&self, url: &Url) -> bool {
        Authority::of(url).as_ref() == Some(&self.authority)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormMethod {
    Get,
    Post,
}

impl FormMethod {
    /// Anything that is not `post` is submitted as `get`, as browsers do.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("post") {
            FormMethod::Post
        } else {
            FormMethod::Get
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FormMethod::Get => "get",
            FormMethod::Post => "post",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldModel {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub field_type: String,
}

impl FieldModel {
    pub fn new(name: Option<&str>, field_type: &str) -> Self {
        Self {
            name: name.map(String::from),
            field_type: field_type.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormModel {
    #[serde(rename = "actionURL")]
    pub action_url: Url,
    pub method: FormMethod,
    pub fields: Vec<FieldModel>,
}

impl FormModel {
    pub fn named_fields(&self) -> impl Iterator<Item = &FieldModel> {
        self.fields.iter().filter(|f| f.name.is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    MissingCsrfToken,
    PossibleReflection,
    /// Kinds written by other tools; only ever produced when reading a document.
    #[serde(other)]
    Other,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::MissingCsrfToken => "missing_csrf_token",
            IssueKind::PossibleReflection => "possible_reflection",
            IssueKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueContext {
    Form(FormModel),
    Field(FieldModel),
    Param(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub message: String,
    pub context: IssueContext,
}

/// One fetched page. Built once by a worker and never touched again after it
/// lands in the result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    pub url: Url,
    pub http_status: u16,
    pub forms: Vec<FormModel>,
    pub query_params: Vec<String>,
    pub cookie_headers: Vec<String>,
    pub issues: Vec<Issue>,
}

impl PageRecord {
    pub fn new(url: Url, http_status: u16) -> Self {
        Self {
            url,
            http_status,
            forms: Vec::new(),
            query_params: Vec::new(),
            cookie_headers: Vec::new(),
            issues: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    #[serde(default)]
    pub target: String,
    pub pages: Vec<PageRecord>,
    /// `false` when the run was stopped before the frontier drained.
    #[serde(default = "default_completed")]
    pub completed: bool,
}

fn default_completed() -> bool {
    true
}

impl ScanResult {
    pub fn issue_count(&self) -> usize {
        self.pages.iter().map(|p| p.issues.len()).sum()
    }

    pub fn issues(&self) -> impl Iterator<Item = (&PageRecord, &Issue)> {
        self.pages
            .iter()
            .flat_map(|p| p.issues.iter().map(move |i| (p, i)))
    }
}
