//! The markdown-conversion seam: hands an evaluated document to
//! `pulldown-cmark` and returns HTML. Fenced code blocks pass through with
//! their language tag intact; highlighting is a downstream concern.

use pulldown_cmark::{html, Options, Parser};

/// Converts markdown to HTML.
pub fn to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_SMART_PUNCTUATION);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut out = String::new();
    html::push_html(&mut out, Parser::new_ext(markdown, options));
    out
}
