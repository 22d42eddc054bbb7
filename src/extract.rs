//! HTML and plain-text extraction.
//!
//! Converts a raw source body into cleaned text plus a small best-effort
//! metadata record (title, price, category pulled from markup selectors).
//! Boilerplate containers (script/style/nav/header/footer) are dropped and
//! whitespace is collapsed. Malformed markup degrades gracefully to whatever
//! text remains; the only hard limit is the byte cap applied up front.

use scraper::{Html, Node, Selector};
use serde::Serialize;

/// Elements whose entire subtree is excluded from extraction.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "noscript", "iframe", "svg", "template",
];

/// Best-effort page metadata pulled from markup selectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PageMeta {
    pub title: Option<String>,
    pub price: Option<String>,
    pub category: Option<String>,
}

/// Cleaned text plus extracted metadata.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub text: String,
    pub meta: PageMeta,
}

/// Extract cleaned text and metadata from an HTML document.
///
/// `max_bytes` caps how much of the input is parsed (memory bound); the cut
/// lands on a char boundary so truncation never splits a code point.
pub fn extract_html(html: &str, max_bytes: usize) -> Extracted {
    let html = truncate_at_boundary(html, max_bytes);
    let doc = Html::parse_document(html);

    let mut raw = String::new();
    for child in doc.tree.root().children() {
        collect_text(child, &mut raw);
    }

    Extracted {
        text: collapse_whitespace(&raw),
        meta: extract_meta(&doc),
    }
}

/// Clean a plain-text source: byte cap plus whitespace collapse.
pub fn clean_text(text: &str, max_bytes: usize) -> String {
    collapse_whitespace(truncate_at_boundary(text, max_bytes))
}

fn collect_text(node: ego_tree::NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Text(t) => {
            out.push_str(&t.text);
            out.push(' ');
        }
        Node::Element(el) => {
            if SKIP_TAGS.contains(&el.name()) {
                return;
            }
            for child in node.children() {
                collect_text(child, out);
            }
            // Block-ish elements act as separators.
            out.push(' ');
        }
        _ => {
            for child in node.children() {
                collect_text(child, out);
            }
        }
    }
}

fn extract_meta(doc: &Html) -> PageMeta {
    PageMeta {
        title: select_text(doc, "title")
            .or_else(|| select_attr(doc, r#"meta[property="og:title"]"#, "content")),
        price: select_attr(doc, r#"[itemprop="price"]"#, "content")
            .or_else(|| select_text(doc, r#"[itemprop="price"]"#))
            .or_else(|| select_attr(doc, r#"meta[property="product:price:amount"]"#, "content")),
        category: select_attr(doc, r#"meta[property="product:category"]"#, "content")
            .or_else(|| select_text(doc, r#"[itemprop="category"]"#))
            .or_else(|| last_breadcrumb(doc)),
    }
}

fn select_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    let element = doc.select(&sel).next()?;
    let text = collapse_whitespace(&element.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

fn select_attr(doc: &Html, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    let value = doc.select(&sel).next()?.value().attr(attr)?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn last_breadcrumb(doc: &Html) -> Option<String> {
    let sel = Selector::parse(".breadcrumb li a, .breadcrumbs li a").ok()?;
    let element = doc.select(&sel).last()?;
    let text = collapse_whitespace(&element.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_at_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut cut = max_bytes;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    &s[..cut]
}
