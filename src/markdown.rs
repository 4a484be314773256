use crate::htmlrenderer::{HtmlRenderer, Trust};
use pulldown_cmark::*;
use std::io;

/// Converts markdown to HTML, writing the result into `w`.
///
/// * `markdown` is the source text (an article body or a comment).
/// * `footnote_prefix` is prepended onto footnote links; pass the article's
///   URL when rendering a summary that will appear on another page.
/// * `trust` says whether raw HTML in the source may pass through.
pub fn to_html<W: escape::StrWrite>(
    w: &mut W,
    markdown: &str,
    footnote_prefix: &str,
    trust: Trust,
) -> io::Result<()> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_SMART_PUNCTUATION);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut html_renderer =
        HtmlRenderer::new(trust).with_footnote_prefix(footnote_prefix);
    for ev in Parser::new_ext(markdown, options).map(demote_headings) {
        html_renderer.on_event(w, ev)?;
    }
    Ok(())
}

/// Renders `markdown` into a fresh string.
pub fn render(markdown: &str, footnote_prefix: &str, trust: Trust) -> String {
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    // Writing into a `String` can't fail.
    let _ = to_html(&mut out, markdown, footnote_prefix, trust);
    out
}

/// The headings in an article need to be demoted twice to be subordinate to
/// both the site title (h1) and the article title (h2). So `#` becomes h3
/// instead of h1.
fn demote_headings(ev: Event) -> Event {
    match ev {
        Event::Start(Tag::Heading(s)) => Event::Start(Tag::Heading((s + 2).min(6))),
        Event::End(Tag::Heading(s)) => Event::End(Tag::Heading((s + 2).min(6))),
        _ => ev,
    }
}
