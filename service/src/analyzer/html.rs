//! Pure HTML extraction functions: version, title, headings, links, forms.
//!
//! Every function here is a pure string/DOM → structured-value mapping; none
//! perform I/O. A malformed or unparseable fragment yields the zero value of
//! the result type rather than an error.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

use crate::models::{
    FormSummary, HeadingCounts, HtmlVersion, InaccessibleLink, LinkSummary, LoginFormDetails,
};

/// Find `<!DOCTYPE ...>` case-insensitively and return its inner declaration,
/// or `<?xml ...?>` presence, without pulling in a regex dependency for what
/// is a single fixed-tag scan.
fn find_doctype_declaration(html: &str) -> Option<String> {
    let lower = html.to_lowercase();
    let start = lower.find("<!doctype")?;
    let rest = &html[start..];
    let end = rest.find('>')?;
    Some(rest[..end].to_string())
}

fn has_xml_prolog(html: &str) -> bool {
    html.to_lowercase().contains("<?xml")
}

static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static H1_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").unwrap());
static H2_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("h2").unwrap());
static H3_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("h3").unwrap());
static H4_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("h4").unwrap());
static H5_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("h5").unwrap());
static H6_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("h6").unwrap());
static ANCHOR_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static FORM_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("form").unwrap());
static FORM_FIELD_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("input, select, textarea").unwrap());
static PASSWORD_INPUT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"input[type="password" i]"#).unwrap());

/// DOCTYPE/prolog sniffing, in the precedence order the spec prescribes.
pub fn extract_html_version(html: &str) -> HtmlVersion {
    if let Some(decl) = find_doctype_declaration(html) {
        let after_doctype = decl["<!doctype".len()..].trim();
        let normalized = after_doctype.split_whitespace().collect::<Vec<_>>().join(" ");
        let lower = normalized.to_lowercase();

        if lower.is_empty() || lower == "html" {
            return HtmlVersion::Html5;
        }
        if lower.contains("xhtml 1.1") {
            return HtmlVersion::Xhtml11;
        }
        if lower.contains("xhtml 1.0") {
            return HtmlVersion::Xhtml10;
        }
        if lower.contains("html 4.01") {
            return HtmlVersion::Html401;
        }
        return HtmlVersion::Unknown;
    }

    if has_xml_prolog(html) {
        return HtmlVersion::Xhtml10;
    }

    HtmlVersion::Unknown
}

/// First `<title>` element's text, trimmed with interior whitespace collapsed.
pub fn extract_title(html: &str) -> String {
    let document = Html::parse_document(html);
    let Some(el) = document.select(&TITLE_SELECTOR).next() else {
        return String::new();
    };

    collapse_whitespace(&el.text().collect::<String>())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Counts of `<h1>`..`<h6>` by element occurrence.
pub fn extract_heading_counts(html: &str) -> HeadingCounts {
    let document = Html::parse_document(html);
    HeadingCounts {
        h1: document.select(&H1_SELECTOR).count() as u32,
        h2: document.select(&H2_SELECTOR).count() as u32,
        h3: document.select(&H3_SELECTOR).count() as u32,
        h4: document.select(&H4_SELECTOR).count() as u32,
        h5: document.select(&H5_SELECTOR).count() as u32,
        h6: document.select(&H6_SELECTOR).count() as u32,
    }
}

fn is_skippable_href(href: &str) -> bool {
    let trimmed = href.trim();
    trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.starts_with("javascript:")
        || trimmed.starts_with("mailto:")
        || trimmed.starts_with("tel:")
}

/// Resolves, dedupes and classifies `<a href>` targets against `base_url`.
pub fn extract_links(html: &str, base_url: &Url) -> LinkSummary {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut summary = LinkSummary::default();

    for anchor in document.select(&ANCHOR_SELECTOR) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if is_skippable_href(href) {
            continue;
        }
        let Ok(resolved) = base_url.join(href) else {
            continue;
        };
        let resolved_str = resolved.to_string();
        if !seen.insert(resolved_str.clone()) {
            continue;
        }

        summary.total += 1;
        if resolved.host_str() == base_url.host_str() {
            summary.internal_count += 1;
        } else {
            summary.external_count += 1;
            summary.external_list.push(resolved_str);
        }
    }

    summary
}

/// Detects forms, normalizing method and resolving the action URL, flagging
/// login forms (POST + at least one password input).
pub fn extract_forms(html: &str, base_url: &Url) -> FormSummary {
    let document = Html::parse_document(html);
    let mut summary = FormSummary::default();

    for form in document.select(&FORM_SELECTOR) {
        summary.total += 1;

        let method = form
            .value()
            .attr("method")
            .map(|m| m.to_uppercase())
            .filter(|m| m == "GET" || m == "POST")
            .unwrap_or_else(|| "GET".to_string());

        let action = form
            .value()
            .attr("action")
            .and_then(|a| base_url.join(a).ok())
            .map(|u| u.to_string())
            .unwrap_or_else(|| base_url.to_string());

        let mut fields = Vec::new();
        let mut seen_fields = HashSet::new();
        for field in form.select(&FORM_FIELD_SELECTOR) {
            if let Some(name) = field.value().attr("name") {
                if seen_fields.insert(name.to_string()) {
                    fields.push(name.to_string());
                }
            }
        }

        let has_password = form.select(&PASSWORD_INPUT_SELECTOR).next().is_some();
        let is_login = method == "POST" && has_password;

        if is_login {
            summary.login_count += 1;
            summary.login_details.push(LoginFormDetails {
                method,
                action,
                fields,
            });
        }
    }

    summary
}

/// Merge link-checker probe results back into the link summary's
/// `inaccessible_list`, preserving the probe's input order.
pub fn merge_inaccessible(summary: &mut LinkSummary, inaccessible: Vec<InaccessibleLink>) {
    summary.inaccessible_list = inaccessible;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com").unwrap()
    }

    #[test]
    fn detects_html5_doctype() {
        assert_eq!(
            extract_html_version("<!DOCTYPE html><html></html>"),
            HtmlVersion::Html5
        );
        assert_eq!(
            extract_html_version("<!doctype   HTML  ><html></html>"),
            HtmlVersion::Html5
        );
    }

    #[test]
    fn detects_html401() {
        let html = r#"<!DOCTYPE HTML PUBLIC "-//W3C//DTD HTML 4.01 Transitional//EN">"#;
        assert_eq!(extract_html_version(html), HtmlVersion::Html401);
    }

    #[test]
    fn detects_xhtml_from_prolog_without_doctype() {
        let html = r#"<?xml version="1.0"?><html></html>"#;
        assert_eq!(extract_html_version(html), HtmlVersion::Xhtml10);
    }

    #[test]
    fn unknown_without_doctype_or_prolog() {
        assert_eq!(extract_html_version("<html></html>"), HtmlVersion::Unknown);
    }

    #[test]
    fn title_collapses_whitespace() {
        let html = "<html><head><title>  Hi   There </title></head></html>";
        assert_eq!(extract_title(html), "Hi There");
    }

    #[test]
    fn title_missing_is_empty() {
        assert_eq!(extract_title("<html></html>"), "");
    }

    #[test]
    fn counts_headings_by_occurrence() {
        let html = "<body><h1/><h1/><h2>x</h2></body>";
        let counts = extract_heading_counts(html);
        assert_eq!(counts.h1, 2);
        assert_eq!(counts.h2, 1);
        assert_eq!(counts.h6, 0);
    }

    #[test]
    fn classifies_internal_and_external_links() {
        let html = r#"<a href='https://other.com/x'>e</a><a href='/y'>i</a>"#;
        let summary = extract_links(html, &base());
        assert_eq!(summary.total, 2);
        assert_eq!(summary.internal_count, 1);
        assert_eq!(summary.external_count, 1);
        assert_eq!(summary.external_list, vec!["https://other.com/x".to_string()]);
    }

    #[test]
    fn drops_fragment_mailto_and_javascript_links() {
        let html = r#"<a href='#top'>x</a><a href='mailto:a@b.com'>y</a><a href='javascript:void(0)'>z</a>"#;
        let summary = extract_links(html, &base());
        assert_eq!(summary.total, 0);
    }

    #[test]
    fn dedupes_resolved_links() {
        let html = r#"<a href='/a'>x</a><a href='/a'>y</a>"#;
        let summary = extract_links(html, &base());
        assert_eq!(summary.total, 1);
    }

    #[test]
    fn detects_login_form() {
        let html = r#"<form method='post' action='/login'><input type='password' name='p'></form>"#;
        let summary = extract_forms(html, &base());
        assert_eq!(summary.total, 1);
        assert_eq!(summary.login_count, 1);
        assert_eq!(summary.login_details[0].method, "POST");
        assert_eq!(summary.login_details[0].action, "https://example.com/login");
        assert_eq!(summary.login_details[0].fields, vec!["p".to_string()]);
    }

    #[test]
    fn non_post_form_is_not_a_login_form() {
        let html = r#"<form method='get' action='/search'><input type='password' name='p'></form>"#;
        let summary = extract_forms(html, &base());
        assert_eq!(summary.total, 1);
        assert_eq!(summary.login_count, 0);
    }

    #[test]
    fn unrecognized_method_defaults_to_get() {
        let html = r#"<form method='put' action='/x'></form>"#;
        let summary = extract_forms(html, &base());
        assert_eq!(summary.total, 1);
        assert_eq!(summary.login_count, 0);
    }
}
