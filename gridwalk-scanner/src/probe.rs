//! Non-destructive reflection probes.
//!
//! A probe sends one request carrying an inert marker in a single input and
//! looks for the marker in the response body. The marker is delimiter text
//! only; no script or markup is ever injected.

use crate::fetch::{Fetch, FetchOutcome, FetchRequest};
use crate::result::{FieldModel, FormMethod, FormModel, Issue, IssueContext, IssueKind};
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

const MARKER_PREFIX: &str = "<<SCAN_MARKER_";
const MARKER_SUFFIX: &str = ">>";
const MARKER_HASH_LEN: usize = 10;

/// Deterministic marker for a URL: the same URL always yields the same
/// marker, distinct URLs differ with overwhelming probability.
pub fn marker_for(url: &Url) -> String {
    let digest = format!("{:x}", Sha256::digest(url.as_str().as_bytes()));
    format!("{}{}{}", MARKER_PREFIX, &digest[..MARKER_HASH_LEN], MARKER_SUFFIX)
}

pub fn encoded_marker(marker: &str) -> String {
    marker.replace('<', "&lt;").replace('>', "&gt;")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectionVerdict {
    RawReflected,
    EncodedReflected,
    NotReflected,
    /// The exchange failed; says nothing about the endpoint.
    Inconclusive,
}

pub fn classify(body: &str, marker: &str) -> ReflectionVerdict {
    if body.contains(marker) {
        ReflectionVerdict::RawReflected
    } else if body.contains(&encoded_marker(marker)) {
        ReflectionVerdict::EncodedReflected
    } else {
        ReflectionVerdict::NotReflected
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ProbeTarget<'a> {
    QueryParam {
        url: &'a Url,
        name: &'a str,
    },
    FormField {
        form: &'a FormModel,
        field: &'a FieldModel,
        name: &'a str,
    },
}

impl<'a> ProbeTarget<'a> {
    pub fn query_param(url: &'a Url, name: &'a str) -> Self {
        ProbeTarget::QueryParam { url, name }
    }

    /// `None` for unnamed fields, which cannot be targeted.
    pub fn form_field(form: &'a FormModel, field: &'a FieldModel) -> Option<Self> {
        let name = field.name.as_deref()?;
        Some(ProbeTarget::FormField { form, field, name })
    }

    pub fn is_form(&self) -> bool {
        matches!(self, ProbeTarget::FormField { .. })
    }

    pub fn name(&self) -> &'a str {
        match *self {
            ProbeTarget::QueryParam { name, .. } | ProbeTarget::FormField { name, .. } => name,
        }
    }

    /// URL the request goes to before injection.
    pub fn url(&self) -> &'a Url {
        match *self {
            ProbeTarget::QueryParam { url, .. } => url,
            ProbeTarget::FormField { form, .. } => &form.action_url,
        }
    }

    pub fn marker(&self) -> String {
        marker_for(self.url())
    }
}

/// Builds the single injection request. Only the input under test is set;
/// other form fields are left out rather than filled with placeholders.
pub fn build_request(target: &ProbeTarget<'_>, marker: &str) -> FetchRequest {
    match *target {
        ProbeTarget::QueryParam { url, name } => FetchRequest::get(with_query_value(url, name, marker)),
        ProbeTarget::FormField { form, name, .. } => match form.method {
            FormMethod::Get => FetchRequest::get(with_query_value(&form.action_url, name, marker)),
            FormMethod::Post => FetchRequest::post(
                form.action_url.clone(),
                vec![(name.to_string(), marker.to_string())],
            ),
        },
    }
}

/// Sets every occurrence of `name` to `value`, appending it if absent. Other
/// pairs keep their order and values.
fn with_query_value(url: &Url, name: &str, value: &str) -> Url {
    let mut found = false;
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            if k == name {
                found = true;
                (k.into_owned(), value.to_string())
            } else {
                (k.into_owned(), v.into_owned())
            }
        })
        .collect();

    let mut url = url.clone();
    url.set_fragment(None);
    {
        let mut query = url.query_pairs_mut();
        query.clear().extend_pairs(pairs.iter());
        if !found {
            query.append_pair(name, value);
        }
    }
    url
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub verdict: ReflectionVerdict,
    pub marker: String,
}

impl ProbeReport {
    /// Only raw reflection becomes an issue. Encoded reflection is logged,
    /// and inconclusive probes are never reported.
    pub fn into_issue(&self, target: &ProbeTarget<'_>) -> Option<Issue> {
        if self.verdict != ReflectionVerdict::RawReflected {
            return None;
        }
        let issue = match *target {
            ProbeTarget::QueryParam { name, .. } => Issue {
                kind: IssueKind::PossibleReflection,
                message: format!("Marker reflected raw for query param {}", name),
                context: IssueContext::Param(name.to_string()),
            },
            ProbeTarget::FormField { field, name, .. } => Issue {
                kind: IssueKind::PossibleReflection,
                message: format!("Marker reflected raw for form field {}", name),
                context: IssueContext::Field(field.clone()),
            },
        };
        Some(issue)
    }
}

pub async fn probe<F: Fetch>(fetcher: &F, target: &ProbeTarget<'_>) -> ProbeReport {
    let marker = target.marker();
    let request = build_request(target, &marker);

    let verdict = match fetcher.fetch(request).await {
        FetchOutcome::Success(response) => classify(&response.body, &marker),
        FetchOutcome::ServerError(status) => {
            debug!("Probe {} on {} got server error {}", marker, target.name(), status);
            ReflectionVerdict::Inconclusive
        }
        FetchOutcome::TransportFailure(e) => {
            debug!("Probe {} on {} failed: {}", marker, target.name(), e);
            ReflectionVerdict::Inconclusive
        }
    };

    debug!(
        "Probe {} {} {} -> {:?}",
        if target.is_form() { "field" } else { "param" },
        target.name(),
        target.url(),
        verdict
    );

    ProbeReport { verdict, marker }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::fetch::{FetchMethod, FetchResponse};
    use std::sync::Mutex;

    /// Echoes the request back through a caller-supplied template.
    struct EchoFetcher {
        render: fn(&FetchRequest) -> FetchOutcome,
        seen: Mutex<Vec<FetchRequest>>,
    }

    impl EchoFetcher {
        fn new(render: fn(&FetchRequest) -> FetchOutcome) -> Self {
            Self {
                render,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Fetch for EchoFetcher {
        async fn fetch(&self, request: FetchRequest) -> FetchOutcome {
            let outcome = (self.render)(&request);
            self.seen.lock().unwrap().push(request);
            outcome
        }
    }

    fn ok(request: &FetchRequest, body: String) -> FetchOutcome {
        FetchOutcome::Success(FetchResponse {
            url: request.url.clone(),
            status: 200,
            headers: Vec::new(),
            body,
        })
    }

    fn injected_value(request: &FetchRequest) -> String {
        match request.method {
            FetchMethod::Post => request.form.first().map(|(_, v)| v.clone()).unwrap_or_default(),
            FetchMethod::Get => request
                .url
                .query_pairs()
                .find(|(_, v)| v.starts_with(MARKER_PREFIX))
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default(),
        }
    }

    fn raw(request: &FetchRequest) -> FetchOutcome {
        ok(request, format!("<p>You searched for {}</p>", injected_value(request)))
    }

    fn encoded(request: &FetchRequest) -> FetchOutcome {
        ok(
            request,
            format!("<p>You searched for {}</p>", encoded_marker(&injected_value(request))),
        )
    }

    fn silent(request: &FetchRequest) -> FetchOutcome {
        ok(request, "<p>nothing to see</p>".to_string())
    }

    fn broken(_: &FetchRequest) -> FetchOutcome {
        FetchOutcome::TransportFailure(TransportError::Timeout)
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn login_form(method: FormMethod) -> FormModel {
        FormModel {
            action_url: url("http://example.com/login?next=/home"),
            method,
            fields: vec![
                FieldModel::new(Some("user"), "text"),
                FieldModel::new(Some("pass"), "password"),
                FieldModel::new(None, "submit"),
            ],
        }
    }

    #[test]
    fn test_marker_is_deterministic_and_inert() {
        let a = url("http://example.com/search?q=1");
        let b = url("http://example.com/search?q=2");
        assert_eq!(marker_for(&a), marker_for(&a));
        assert_ne!(marker_for(&a), marker_for(&b));

        let marker = marker_for(&a);
        assert!(marker.starts_with("<<SCAN_MARKER_") && marker.ends_with(">>"));
        let inner = &marker[MARKER_PREFIX.len()..marker.len() - MARKER_SUFFIX.len()];
        assert_eq!(inner.len(), MARKER_HASH_LEN);
        assert!(inner.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!marker.to_lowercase().contains("script"));
    }

    #[test]
    fn test_classify_order() {
        let m = "<<SCAN_MARKER_0123456789>>";
        assert_eq!(classify(&format!("x{}y", m), m), ReflectionVerdict::RawReflected);
        assert_eq!(
            classify(&format!("{} and {}", m, encoded_marker(m)), m),
            ReflectionVerdict::RawReflected
        );
        assert_eq!(
            classify("&lt;&lt;SCAN_MARKER_0123456789&gt;&gt;", m),
            ReflectionVerdict::EncodedReflected
        );
        assert_eq!(classify("SCAN_MARKER_0123456789", m), ReflectionVerdict::NotReflected);
    }

    #[test]
    fn test_query_param_rewrite_keeps_other_params() {
        let page = url("http://example.com/list?page=2&q=shoes&sort=asc#results");
        let target = ProbeTarget::query_param(&page, "q");
        let request = build_request(&target, "MARK");
        assert_eq!(request.method, FetchMethod::Get);
        let pairs: Vec<(String, String)> = request.url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("page".to_string(), "2".to_string()),
                ("q".to_string(), "MARK".to_string()),
                ("sort".to_string(), "asc".to_string()),
            ]
        );
        assert_eq!(request.url.fragment(), None);
    }

    #[test]
    fn test_post_form_sends_only_field_under_test() {
        let form = login_form(FormMethod::Post);
        let target = ProbeTarget::form_field(&form, &form.fields[1]).unwrap();
        let request = build_request(&target, "MARK");
        assert_eq!(request.method, FetchMethod::Post);
        assert_eq!(request.url, form.action_url);
        assert_eq!(request.form, vec![("pass".to_string(), "MARK".to_string())]);
    }

    #[test]
    fn test_get_form_puts_field_in_query() {
        let form = login_form(FormMethod::Get);
        let target = ProbeTarget::form_field(&form, &form.fields[0]).unwrap();
        let request = build_request(&target, "MARK");
        assert_eq!(request.method, FetchMethod::Get);
        assert!(request.form.is_empty());
        let pairs: Vec<(String, String)> = request.url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("next".to_string(), "/home".to_string()),
                ("user".to_string(), "MARK".to_string()),
            ]
        );
    }

    #[test]
    fn test_unnamed_field_is_not_a_target() {
        let form = login_form(FormMethod::Post);
        assert!(ProbeTarget::form_field(&form, &form.fields[2]).is_none());
    }

    #[tokio::test]
    async fn test_probe_verdicts() {
        let page = url("http://example.com/search?q=1");
        let target = ProbeTarget::query_param(&page, "q");

        let report = probe(&EchoFetcher::new(raw), &target).await;
        assert_eq!(report.verdict, ReflectionVerdict::RawReflected);
        assert!(report.into_issue(&target).is_some());

        let report = probe(&EchoFetcher::new(encoded), &target).await;
        assert_eq!(report.verdict, ReflectionVerdict::EncodedReflected);
        assert!(report.into_issue(&target).is_none());

        let report = probe(&EchoFetcher::new(silent), &target).await;
        assert_eq!(report.verdict, ReflectionVerdict::NotReflected);
        assert!(report.into_issue(&target).is_none());
    }

    #[tokio::test]
    async fn test_transport_failure_is_inconclusive_and_silent() {
        let page = url("http://example.com/search?q=1");
        let target = ProbeTarget::query_param(&page, "q");
        let report = probe(&EchoFetcher::new(broken), &target).await;
        assert_eq!(report.verdict, ReflectionVerdict::Inconclusive);
        assert!(report.into_issue(&target).is_none());
    }

    #[tokio::test]
    async fn test_same_url_probed_twice_uses_same_marker() {
        let page = url("http://example.com/search?q=1");
        let target = ProbeTarget::query_param(&page, "q");
        let fetcher = EchoFetcher::new(silent);
        let first = probe(&fetcher, &target).await;
        let second = probe(&fetcher, &target).await;
        assert_eq!(first.marker, second.marker);

        let seen = fetcher.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
    }

    #[tokio::test]
    async fn test_form_field_issue_context() {
        let form = login_form(FormMethod::Post);
        let target = ProbeTarget::form_field(&form, &form.fields[0]).unwrap();
        let report = probe(&EchoFetcher::new(raw), &target).await;
        let issue = report.into_issue(&target).unwrap();
        assert_eq!(issue.kind, IssueKind::PossibleReflection);
        assert_eq!(issue.context, IssueContext::Field(form.fields[0].clone()));
        assert!(issue.message.contains("user"));
    }
}
