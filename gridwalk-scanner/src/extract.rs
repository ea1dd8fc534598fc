//! Structural extraction of a fetched page: links, forms and query parameters.
//!
//! Everything here is synchronous and infallible. `scraper` builds its tree
//! with html5ever, which recovers from broken markup the way browsers do, so
//! a page with unmatched tags still yields every subtree that parsed.

use crate::result::{FieldModel, FormMethod, FormModel};
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid link selector"));
static FORM_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("form").expect("valid form selector"));
static FIELD_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("input, textarea, select").expect("valid field selector")
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedPage {
    pub links: BTreeSet<Url>,
    pub forms: Vec<FormModel>,
    pub query_params: Vec<String>,
}

pub fn extract(html: &str, page_url: &Url) -> ExtractedPage {
    let document = Html::parse_document(html);
    let page = ExtractedPage {
        links: extract_links(&document, page_url),
        forms: extract_forms(&document, page_url),
        query_params: query_param_names(page_url),
    };
    debug!(
        "Extracted {} links, {} forms, {} params from {}",
        page.links.len(),
        page.forms.len(),
        page.query_params.len(),
        page_url
    );
    page
}

fn extract_links(document: &Html, page_url: &Url) -> BTreeSet<Url> {
    document
        .select(&LINK_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| resolve_link(page_url, href))
        .collect()
}

/// Resolve an anchor `href` against the page. Returns `None` for client-side
/// pseudo-links, anchor-only references and anything that is not http(s).
pub fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    let lowered = href.to_ascii_lowercase();
    if lowered.starts_with("javascript:") || lowered.starts_with("mailto:") || href.starts_with('#')
    {
        return None;
    }

    let mut url = base.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

fn extract_forms(document: &Html, page_url: &Url) -> Vec<FormModel> {
    document
        .select(&FORM_SELECTOR)
        .map(|form| form_model(form, page_url))
        .collect()
}

fn form_model(form: ElementRef<'_>, page_url: &Url) -> FormModel {
    let method = FormMethod::parse(form.value().attr("method").unwrap_or("get"));
    let action_url = resolve_action(page_url, form.value().attr("action"));

    let fields = form
        .select(&FIELD_SELECTOR)
        .map(|field| {
            let tag = field.value().name();
            let field_type = field
                .value()
                .attr("type")
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| tag.to_string());
            FieldModel {
                name: field.value().attr("name").map(String::from),
                field_type,
            }
        })
        .collect();

    FormModel {
        action_url,
        method,
        fields,
    }
}

fn resolve_action(page_url: &Url, action: Option<&str>) -> Url {
    let mut base = page_url.clone();
    base.set_fragment(None);

    match action.map(str::trim) {
        None | Some("") => base,
        Some(action) => match base.join(action) {
            Ok(mut url) => {
                url.set_fragment(None);
                url
            }
            Err(_) => base,
        },
    }
}

/// Distinct parameter names of the URL's own query string, first-seen order.
pub fn query_param_names(url: &Url) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for (name, _) in url.query_pairs() {
        if !names.iter().any(|n| *n == name) {
            names.push(name.into_owned());
        }
    }
    names
}
