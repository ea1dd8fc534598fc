// Passive heuristics over already-extracted page structure

use crate::result::{FormMethod, FormModel, Issue, IssueContext, IssueKind};
use serde::{Deserialize, Serialize};

/// Substrings that mark a field as a likely anti-forgery token.
pub const TOKEN_NAME_HINTS: &[&str] = &["csrf", "token", "authenticity"];

/// Flags a POST form that carries no field whose name looks like an
/// anti-forgery token. Tokens delivered by header or cookie are invisible
/// here and will be reported.
pub fn find_missing_tokens(form: &FormModel) -> Option<Issue> {
    if form.method != FormMethod::Post {
        return None;
    }

    let has_token = form.fields.iter().any(|field| {
        let name = field.name.as_deref().unwrap_or("").to_lowercase();
        TOKEN_NAME_HINTS.iter().any(|hint| name.contains(hint))
    });

    if has_token {
        return None;
    }

    Some(Issue {
        kind: IssueKind::MissingCsrfToken,
        message: "POST form with no obvious CSRF token field found".to_string(),
        context: IssueContext::Form(form.clone()),
    })
}

pub fn analyze_forms(forms: &[FormModel]) -> Vec<Issue> {
    forms.iter().filter_map(find_missing_tokens).collect()
}

/// Attributes of a single `Set-Cookie` header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieAttributes {
    pub name: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<String>,
}

pub fn cookie_attributes(header: &str) -> CookieAttributes {
    let mut parts = header.split(';');
    let name = parts
        .next()
        .and_then(|pair| pair.split('=').next())
        .map(|n| n.trim().to_string())
        .unwrap_or_default();

    let mut attrs = CookieAttributes {
        name,
        ..CookieAttributes::default()
    };

    for part in parts {
        let mut kv = part.splitn(2, '=');
        let key = kv.next().unwrap_or("").trim().to_ascii_lowercase();
        let value = kv.next().map(|v| v.trim().to_string());
        match key.as_str() {
            "secure" => attrs.secure = true,
            "httponly" => attrs.http_only = true,
            "samesite" => attrs.same_site = value.filter(|v| !v.is_empty()),
            _ => {}
        }
    }

    attrs
}
