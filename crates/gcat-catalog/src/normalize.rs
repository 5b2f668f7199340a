//! Canonical forms of metadata values.
//!
//! Two representations are produced on purpose: the display/write form
//! (`normalize_tags`, `normalize_rich_text`, `format_field_value`) and the
//! comparison-only form (`clean_for_comparison`).

use std::sync::OnceLock;

use gcat_core::{Location, MetadataField, MetadataValue, TextMode};
use regex::Regex;
use scraper::{ElementRef, Html, Node};
use tracing::warn;

/// Attributes whose HTML is flattened to plain text in `TextMode::Plain`.
pub const RICH_TEXT_ATTRIBUTES: [&str; 3] = ["description", "accessConstraints", "licenseInfo"];

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<.*?>").expect("static tag pattern compiles"))
}

/// Split every element on `,`, trim, drop empties, sort ascending
/// (case-sensitive) and join with `,`.
pub fn normalize_tag_list<S: AsRef<str>>(tags: &[S]) -> String {
    let mut cleaned = tags
        .iter()
        .flat_map(|t| t.as_ref().split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>();
    cleaned.sort_unstable();
    cleaned.join(",")
}

/// `None` means the value was never provided; an explicit empty list
/// normalizes to `Some("")`.
pub fn normalize_tags(raw: Option<&MetadataValue>) -> Option<String> {
    match raw? {
        MetadataValue::Text(text) => Some(normalize_tag_list(&[text])),
        MetadataValue::Tags(tags) => Some(normalize_tag_list(tags)),
    }
}

pub fn is_rich_text_attribute(attribute: &str) -> bool {
    RICH_TEXT_ATTRIBUTES
        .iter()
        .any(|a| a.eq_ignore_ascii_case(attribute))
}

/// Flatten HTML to text for rich-text attributes in plain mode, keeping link
/// targets visible as `text (href)` or the bare href.
pub fn normalize_rich_text(text: &str, attribute: &str, mode: TextMode) -> String {
    if text.is_empty() || mode != TextMode::Plain || !is_rich_text_attribute(attribute) {
        return text.to_string();
    }
    let fragment = Html::parse_fragment(text);
    let mut out = String::with_capacity(text.len());
    render_children(fragment.root_element(), &mut out);
    out
}

fn render_children(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        render_child(child.value(), ElementRef::wrap(child), out);
    }
}

fn render_child(node: &Node, element: Option<ElementRef<'_>>, out: &mut String) {
    match (node, element) {
        (Node::Text(text), _) => out.push_str(text),
        (Node::Element(el), Some(element)) => match el.attr("href") {
            Some(href) if el.name() == "a" => render_anchor(element, href, out),
            _ => render_children(element, out),
        },
        _ => {}
    }
}

fn render_anchor(anchor: ElementRef<'_>, href: &str, out: &mut String) {
    let mut children = anchor.children();
    let Some(first) = children.next() else {
        warn!(href, "rich text anchor has no content");
        return;
    };

    let first_text = match first.value() {
        Node::Text(text) => text.to_string(),
        Node::Element(_) => ElementRef::wrap(first)
            .map(|e| e.text().collect::<String>())
            .unwrap_or_default(),
        _ => String::new(),
    };

    if first_text.is_empty() || first_text.starts_with("http") {
        out.push_str(href);
    } else {
        out.push_str(&first_text);
        out.push_str(" (");
        out.push_str(href);
        out.push(')');
    }

    for rest in children {
        render_child(rest.value(), ElementRef::wrap(rest), out);
    }
}

/// Comparison-only key: tags stripped, lowercased, `"` -> `'`, trimmed.
pub fn clean_for_comparison(text: &str) -> String {
    tag_pattern()
        .replace_all(text, "")
        .to_lowercase()
        .replace('"', "'")
        .trim()
        .to_string()
}

/// Display form of a raw value read from `location`.
pub fn format_field_value(
    field: MetadataField,
    location: Location,
    value: &MetadataValue,
    mode: TextMode,
) -> String {
    if field == MetadataField::Tags {
        return normalize_tags(Some(value)).unwrap_or_default();
    }
    let text = match value {
        MetadataValue::Text(text) => text.clone(),
        MetadataValue::Tags(tags) => tags.join(","),
    };
    normalize_rich_text(&text, field.attr_for(location), mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> MetadataValue {
        MetadataValue::Text(s.to_string())
    }

    #[test]
    fn tags_are_trimmed_and_sorted() {
        assert_eq!(normalize_tags(Some(&text("b, a ,c"))).as_deref(), Some("a,b,c"));
        assert_eq!(
            normalize_tags(Some(&MetadataValue::Tags(vec!["Transportation".into(), "Major".into()])))
                .as_deref(),
            Some("Major,Transportation")
        );
    }

    #[test]
    fn tag_normalization_is_idempotent() {
        let inputs = vec![
            text("b, a ,c"),
            text("Zeta,alpha, Beta"),
            text(" , x,,y "),
            text(""),
            MetadataValue::Tags(vec![" flood ".into(), "Drainage".into()]),
            MetadataValue::Tags(vec!["b,a".into(), "c".into()]),
            MetadataValue::Tags(vec![]),
        ];
        for input in inputs {
            let once = normalize_tags(Some(&input)).expect("provided");
            let twice = normalize_tags(Some(&text(&once))).expect("provided");
            assert_eq!(once, twice, "input {input:?}");
        }
    }

    #[test]
    fn list_elements_holding_commas_are_split() {
        let tags = MetadataValue::Tags(vec!["b,a".into(), " c ".into()]);
        assert_eq!(normalize_tags(Some(&tags)).as_deref(), Some("a,b,c"));
    }

    #[test]
    fn missing_tags_differ_from_empty_list() {
        assert_eq!(normalize_tags(None), None);
        assert_eq!(normalize_tags(Some(&MetadataValue::Tags(vec![]))), Some(String::new()));
    }

    #[test]
    fn anchors_keep_their_targets_in_plain_mode() {
        assert_eq!(
            normalize_rich_text(r#"<a href="http://x.com">Source</a> info"#, "description", TextMode::Plain),
            "Source (http://x.com) info"
        );
        assert_eq!(
            normalize_rich_text(r#"<a href="http://x.com">http://x.com</a> info"#, "licenseInfo", TextMode::Plain),
            "http://x.com info"
        );
        assert_eq!(
            normalize_rich_text(r#"<p>See <a href="http://x.com"><b>the portal</b></a>.</p>"#, "accessConstraints", TextMode::Plain),
            "See the portal (http://x.com)."
        );
    }

    #[test]
    fn anchors_without_href_are_plain_text() {
        assert_eq!(
            normalize_rich_text(r#"<div><a name="top">Top</a> &amp; more</div>"#, "description", TextMode::Plain),
            "Top & more"
        );
    }

    #[test]
    fn non_rich_attributes_and_html_mode_pass_through() {
        let html = r#"<p><a href="http://x.com">Source</a></p>"#;
        assert_eq!(normalize_rich_text(html, "summary", TextMode::Plain), html);
        assert_eq!(normalize_rich_text(html, "accessInformation", TextMode::Plain), html);
        assert_eq!(normalize_rich_text(html, "description", TextMode::Html), html);
    }

    #[test]
    fn comparison_form_ignores_markup_case_and_quotes() {
        assert_eq!(clean_for_comparison("  <p>Flood \"Zone\" A</p> "), "flood 'zone' a");
        assert_ne!(
            clean_for_comparison("Flood Zone A"),
            clean_for_comparison("<p>Flood Zone B</p>")
        );
        assert_eq!(clean_for_comparison("Missing"), "missing");
    }

    #[test]
    fn remote_license_info_is_rich_but_access_information_is_not() {
        let html = text(r#"<a href="http://x.com">Terms</a>"#);
        assert_eq!(
            format_field_value(MetadataField::AccessConstraints, Location::Remote, &html, TextMode::Plain),
            "Terms (http://x.com)"
        );
        assert_eq!(
            format_field_value(MetadataField::Credits, Location::Remote, &html, TextMode::Plain),
            r#"<a href="http://x.com">Terms</a>"#
        );
        assert_eq!(
            format_field_value(MetadataField::Tags, Location::Local, &text("major,transportation"), TextMode::Plain),
            "major,transportation"
        );
    }
}
