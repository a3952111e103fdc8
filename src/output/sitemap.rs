//! `_sitemap.html`: an index page linking every mirrored page

use crate::filter::AssetKind;
use crate::manifest::ResourceRecord;
use crate::rewrite::relative_path;
use chrono::Utc;
use std::path::Path;

/// File name of the sitemap at the output root
pub const SITEMAP_FILE: &str = "_sitemap.html";

/// Builds the sitemap page for the successful HTML records
pub fn build_sitemap(source: &str, records: &[ResourceRecord]) -> String {
    let mut pages: Vec<(&str, &str, Option<&str>)> = records
        .iter()
        .filter(|r| r.status.is_success() && r.kind == AssetKind::Html)
        .filter_map(|r| Some((r.url.as_str(), r.local_path.as_deref()?, r.title.as_deref())))
        .collect();
    pages.sort_by(|a, b| a.0.cmp(b.0));

    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>Sitemap - {}</title>\n", escape(source)));
    html.push_str("<style>\n");
    html.push_str("body { font-family: sans-serif; max-width: 960px; margin: 2em auto; padding: 0 1em; }\n");
    html.push_str("li { margin: 0.4em 0; }\n");
    html.push_str(".url { color: #777; font-size: 0.85em; }\n");
    html.push_str("</style>\n</head>\n<body>\n");
    html.push_str(&format!("<h1>Sitemap - {}</h1>\n", escape(source)));
    html.push_str(&format!("<p>{} pages</p>\n<ul>\n", pages.len()));

    for &(url, local, title) in &pages {
        let label = title.map(str::trim).filter(|t| !t.is_empty()).unwrap_or(url);
        html.push_str(&format!(
            "<li><a href=\"{}\">{}</a> <span class=\"url\">{}</span></li>\n",
            escape(&relative_path(SITEMAP_FILE, local)),
            escape(label),
            escape(url)
        ));
    }

    html.push_str("</ul>\n");
    html.push_str(&format!(
        "<p><small>Generated on {}</small></p>\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    ));
    html.push_str("</body>\n</html>\n");
    html
}

/// Writes `_sitemap.html` at the output root
pub async fn write_sitemap(root: &Path, source: &str, records: &[ResourceRecord]) -> std::io::Result<()> {
    tokio::fs::write(root.join(SITEMAP_FILE), build_sitemap(source, records)).await
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::RecordStatus;

    fn page(url: &str, path: &str, title: Option<&str>) -> ResourceRecord {
        let mut record = ResourceRecord::new(url, AssetKind::Html, RecordStatus::Fetched);
        record.local_path = Some(path.to_string());
        record.title = title.map(str::to_string);
        record
    }

    #[test]
    fn test_sitemap_lists_pages() {
        let mut image = ResourceRecord::new("https://example.com/a.png", AssetKind::Image, RecordStatus::Fetched);
        image.local_path = Some("a.png".to_string());
        let mut failed = page("https://example.com/gone", "gone.html", None);
        failed.status = RecordStatus::Failed;

        let records = vec![
            page("https://example.com/", "index.html", Some("Home & Garden")),
            page("https://example.com/docs/intro", "docs/intro.html", None),
            image,
            failed,
        ];
        let html = build_sitemap("https://example.com/", &records);

        assert!(html.contains("<p>2 pages</p>"));
        assert!(html.contains(r#"<a href="index.html">Home &amp; Garden</a>"#));
        assert!(html.contains(r#"<a href="docs/intro.html">https://example.com/docs/intro</a>"#));
        assert!(!html.contains("a.png"));
        assert!(!html.contains("gone.html"));
        assert!(html.contains("Generated on"));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape(r#"<a href="x">&"#), "&lt;a href=&quot;x&quot;&gt;&amp;");
    }
}
