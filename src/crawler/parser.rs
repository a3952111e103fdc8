//! Reference extraction for HTML and CSS bodies
//!
//! Every embedded reference is returned exactly as written in the document,
//! together with the context it was found in. Resolution and canonicalization
//! happen in the worker; rewriting happens much later, from the same raw strings.

use crate::filter::AssetKind;
use crate::rewrite::{decode_body, document_encoding};
use crate::url::RefContext;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::OnceLock;

/// A reference as it appears in a document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtractedRef {
    pub raw: String,
    pub context: RefContext,
    pub hint: Option<AssetKind>,
}

impl ExtractedRef {
    fn page(raw: &str, hint: Option<AssetKind>) -> Self {
        Self {
            raw: raw.trim().to_string(),
            context: RefContext::Page,
            hint,
        }
    }

    fn asset(raw: &str, hint: Option<AssetKind>) -> Self {
        Self {
            raw: raw.trim().to_string(),
            context: RefContext::Asset,
            hint,
        }
    }
}

/// Everything extracted from one document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    /// `<base href>`, if the document declares one
    pub base: Option<String>,
    pub title: Option<String>,
    pub refs: Vec<ExtractedRef>,
}

/// Extracts references from a body of the given kind
///
/// Only HTML and CSS carry references; any other kind yields nothing. The body
/// is decoded with the encoding the rewrite pass will later use for it.
pub fn extract_references(body: &[u8], kind: AssetKind, content_type: Option<&str>) -> Extracted {
    let text = decode_body(body, document_encoding(content_type, body));
    match kind {
        AssetKind::Html => extract_html(&text),
        AssetKind::Css => Extracted {
            refs: dedupe(extract_css(&text)),
            ..Default::default()
        },
        _ => Extracted::default(),
    }
}

/// Parses HTML and collects references from URL-bearing attributes
///
/// # Contexts
///
/// **Pages:** `<a href>`, `<area href>`, `<iframe src>`, `<frame src>`
///
/// **Assets:** stylesheets, icons and preloads (`<link href>`), `<script src>`,
/// `<img src/srcset>`, `<source src/srcset>`, `<input type=image src>`,
/// `<video src/poster>`, `<audio src>`, `<track src>`, `<embed src>`,
/// `<object data>`, `url()` inside `style` attributes and `<style>` elements
///
/// **Skipped:** empty values, fragment-only links, `javascript:`, `mailto:`,
/// `tel:` and `data:` URIs, `<a download>`
pub fn extract_html(html: &str) -> Extracted {
    let document = Html::parse_document(html);
    let mut refs = Vec::new();

    let base = select(&document, "base[href]")
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty());

    let title = select(&document, "title")
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    for el in select(&document, "a[href], area[href]") {
        if el.value().attr("download").is_some() {
            continue;
        }
        push_attr(&mut refs, el, "href", |raw| ExtractedRef::page(raw, None));
    }

    for el in select(&document, "iframe[src], frame[src]") {
        push_attr(&mut refs, el, "src", |raw| {
            ExtractedRef::page(raw, Some(AssetKind::Html))
        });
    }

    for el in select(&document, "link[href]") {
        if let Some(hint) = link_hint(el) {
            push_attr(&mut refs, el, "href", |raw| ExtractedRef::asset(raw, hint));
        }
    }

    for el in select(&document, "script[src]") {
        push_attr(&mut refs, el, "src", |raw| {
            ExtractedRef::asset(raw, Some(AssetKind::Js))
        });
    }

    for el in select(&document, "img, source, input[type=image]") {
        let hint = match el.value().name() {
            "source" => None,
            _ => Some(AssetKind::Image),
        };
        push_attr(&mut refs, el, "src", |raw| ExtractedRef::asset(raw, hint));
        if let Some(srcset) = el.value().attr("srcset") {
            for candidate in srcset_urls(srcset) {
                if is_fetchable(candidate) {
                    refs.push(ExtractedRef::asset(candidate, hint));
                }
            }
        }
    }

    for el in select(&document, "video, audio, track, embed") {
        let hint = match el.value().name() {
            "video" | "audio" => Some(AssetKind::Media),
            _ => None,
        };
        push_attr(&mut refs, el, "src", |raw| ExtractedRef::asset(raw, hint));
        push_attr(&mut refs, el, "poster", |raw| {
            ExtractedRef::asset(raw, Some(AssetKind::Image))
        });
    }

    for el in select(&document, "object[data]") {
        push_attr(&mut refs, el, "data", |raw| ExtractedRef::asset(raw, None));
    }

    for el in select(&document, "[style]") {
        if let Some(style) = el.value().attr("style") {
            refs.extend(extract_css(style));
        }
    }

    for el in select(&document, "style") {
        refs.extend(extract_css(&el.text().collect::<String>()));
    }

    Extracted {
        base,
        title,
        refs: dedupe(refs),
    }
}

/// Collects `url()` and `@import` references from a stylesheet
pub fn extract_css(css: &str) -> Vec<ExtractedRef> {
    let mut refs = Vec::new();

    let (Some(import_re), Some(url_re)) = (import_regex(), css_url_regex()) else {
        return refs;
    };

    for caps in import_re.captures_iter(css) {
        if let Some(raw) = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()) {
            if is_fetchable(raw) {
                refs.push(ExtractedRef::asset(raw, Some(AssetKind::Css)));
            }
        }
    }

    for caps in url_re.captures_iter(css) {
        if let Some(raw) = css_url_value(&caps) {
            if is_fetchable(raw) {
                refs.push(ExtractedRef::asset(raw, None));
            }
        }
    }

    refs
}

/// Matches `url(...)` with double, single or no quotes
pub(crate) fn css_url_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]+))\s*\)"#).ok())
        .as_ref()
}

/// Matches `@import "..."` without `url()`
pub(crate) fn import_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"@import\s+(?:"([^"]*)"|'([^']*)')"#).ok())
        .as_ref()
}

/// The reference inside a `url()` match
pub(crate) fn css_url_value<'t>(caps: &regex::Captures<'t>) -> Option<&'t str> {
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str())
}

/// Splits a `srcset` value into its URLs
pub fn srcset_urls(srcset: &str) -> impl Iterator<Item = &str> {
    srcset
        .split(',')
        .filter_map(|candidate| candidate.split_whitespace().next())
}

/// Returns false for values that never name a fetchable resource
pub fn is_fetchable(raw: &str) -> bool {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return false;
    }
    let lower = raw.to_ascii_lowercase();
    !["javascript:", "mailto:", "tel:", "data:", "about:", "blob:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

fn select<'a>(document: &'a Html, selector: &str) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    let parsed = Selector::parse(selector).ok();
    parsed
        .into_iter()
        .flat_map(move |selector| document.select(&selector).collect::<Vec<_>>())
}

fn push_attr<F>(refs: &mut Vec<ExtractedRef>, el: ElementRef<'_>, attr: &str, make: F)
where
    F: Fn(&str) -> ExtractedRef,
{
    if let Some(value) = el.value().attr(attr) {
        if is_fetchable(value) {
            refs.push(make(value));
        }
    }
}

/// Kind hint for a `<link>` element, or `None` when the link is not a rendering dependency
fn link_hint(el: ElementRef<'_>) -> Option<Option<AssetKind>> {
    let rel = el.value().attr("rel")?.to_ascii_lowercase();
    let rels: Vec<&str> = rel.split_whitespace().collect();

    if rels.contains(&"stylesheet") {
        return Some(Some(AssetKind::Css));
    }
    if rels.iter().any(|r| *r == "icon" || *r == "apple-touch-icon" || *r == "mask-icon") {
        return Some(Some(AssetKind::Image));
    }
    if rels.contains(&"modulepreload") {
        return Some(Some(AssetKind::Js));
    }
    if rels.contains(&"manifest") {
        return Some(Some(AssetKind::Other));
    }
    if rels.contains(&"preload") || rels.contains(&"prefetch") {
        let hint = match el.value().attr("as").map(str::to_ascii_lowercase).as_deref() {
            Some("style") => Some(AssetKind::Css),
            Some("script") => Some(AssetKind::Js),
            Some("font") => Some(AssetKind::Font),
            Some("image") => Some(AssetKind::Image),
            _ => None,
        };
        return Some(hint);
    }
    None
}

fn dedupe(refs: Vec<ExtractedRef>) -> Vec<ExtractedRef> {
    let mut seen = HashSet::new();
    refs.into_iter()
        .filter(|r| seen.insert((r.raw.clone(), r.context)))
        .collect()
}
