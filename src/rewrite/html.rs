//! Streaming attribute substitution for HTML documents

use crate::crawler::srcset_urls;
use crate::rewrite::css::rewrite_css;
use crate::rewrite::Replacements;
use encoding_rs::Encoding;
use html_escape::decode_html_entities;
use lol_html::errors::RewritingError;
use lol_html::html_content::ContentType;
use lol_html::{element, text, AsciiCompatibleEncoding, HtmlRewriter, Settings};
use std::cell::{Cell, RefCell};

/// Attributes holding a single URL
const URL_ATTRIBUTES: [&str; 4] = ["href", "src", "poster", "data"];

/// Rewrites every reference in `html` that has a replacement
///
/// `<base href>` is removed so the relative paths resolve against the local
/// file. `srcset`, `style` attributes and `<style>` elements are rewritten in
/// place. The document is read and written in `encoding`, so bytes outside the
/// rewritten attributes are left as they were. Returns the new document and
/// the number of substituted references.
pub fn rewrite_html(
    html: &[u8],
    encoding: &'static Encoding,
    replacements: &Replacements,
) -> Result<(Vec<u8>, usize), RewritingError> {
    let count = Cell::new(0usize);
    let style_buffer = RefCell::new(String::new());
    let mut output = Vec::with_capacity(html.len());

    {
        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: vec![
                    element!("base[href]", |el| {
                        el.remove();
                        Ok(())
                    }),
                    element!("*", |el| {
                        for name in URL_ATTRIBUTES {
                            let Some(value) = el.get_attribute(name) else {
                                continue;
                            };
                            if let Some(new) = replacements.get(&decode_html_entities(&value)) {
                                el.set_attribute(name, new)?;
                                count.set(count.get() + 1);
                            }
                        }

                        if let Some(srcset) = el.get_attribute("srcset") {
                            let (new, n) = rewrite_srcset(&decode_html_entities(&srcset), replacements);
                            if n > 0 {
                                el.set_attribute("srcset", &new)?;
                                count.set(count.get() + n);
                            }
                        }

                        if let Some(style) = el.get_attribute("style") {
                            let (new, n) = rewrite_css(&decode_html_entities(&style), replacements);
                            if n > 0 {
                                el.set_attribute("style", &new)?;
                                count.set(count.get() + n);
                            }
                        }
                        Ok(())
                    }),
                    text!("style", |chunk| {
                        let mut buffer = style_buffer.borrow_mut();
                        buffer.push_str(chunk.as_str());
                        if chunk.last_in_text_node() {
                            let (new, n) = rewrite_css(&buffer, replacements);
                            chunk.replace(&new, ContentType::Html);
                            count.set(count.get() + n);
                            buffer.clear();
                        } else {
                            chunk.remove();
                        }
                        Ok(())
                    }),
                ],
                encoding: AsciiCompatibleEncoding::new(encoding)
                    .unwrap_or_else(AsciiCompatibleEncoding::utf_8),
                ..Settings::default()
            },
            |c: &[u8]| output.extend_from_slice(c),
        );

        rewriter.write(html)?;
        rewriter.end()?;
    }

    Ok((output, count.get()))
}

/// Rewrites the URLs of a `srcset` value, keeping the descriptors
fn rewrite_srcset(srcset: &str, replacements: &Replacements) -> (String, usize) {
    let mut count = 0;
    let candidates: Vec<String> = srcset
        .split(',')
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .map(|candidate| {
            let url = srcset_urls(candidate).next().unwrap_or_default();
            match replacements.get(url) {
                Some(new) => {
                    count += 1;
                    format!("{}{}", new, &candidate[url.len()..])
                }
                None => candidate.to_string(),
            }
        })
        .collect();
    (candidates.join(", "), count)
}
