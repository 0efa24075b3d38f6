//! Blurb extraction.
//!
//! A blurb is the short excerpt of a page shown in listings. It is taken
//! from the page's rendered HTML (before any layout is applied), in
//! priority order:
//!
//! 1. the nodes between two `<!-- blurb -->` markers that share a parent
//! 2. everything before the first `<!-- blurb -->` marker
//! 3. the first `<p>` element
//!
//! A `<!-- no-blurb -->` marker anywhere in the page suppresses the blurb.

use tl::{Node, NodeHandle, Parser, ParserOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Blurb,
    NoBlurb,
}

fn comment_text(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix("<!--").unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("-->").unwrap_or(trimmed);
    trimmed.trim()
}

fn marker(node: &Node) -> Option<Marker> {
    let Node::Comment(bytes) = node else {
        return None;
    };
    match comment_text(&bytes.as_utf8_str()) {
        "blurb" => Some(Marker::Blurb),
        "no-blurb" => Some(Marker::NoBlurb),
        _ => None,
    }
}

fn children_of(node: &Node) -> Vec<NodeHandle> {
    match node {
        Node::Tag(tag) => tag.children().top().iter().copied().collect(),
        _ => Vec::new(),
    }
}

/// Count blurb markers and note any suppression marker.
fn scan(handles: &[NodeHandle], parser: &Parser, count: &mut usize, suppressed: &mut bool) {
    for handle in handles {
        let Some(node) = handle.get(parser) else {
            continue;
        };
        match marker(node) {
            Some(Marker::Blurb) => *count += 1,
            Some(Marker::NoBlurb) => *suppressed = true,
            None => scan(&children_of(node), parser, count, suppressed),
        }
    }
}

/// Nodes strictly between the first two markers of the first sibling list
/// that holds two of them.
fn between_markers(handles: &[NodeHandle], parser: &Parser) -> Option<String> {
    let positions: Vec<usize> = handles
        .iter()
        .enumerate()
        .filter(|(_, h)| h.get(parser).and_then(marker) == Some(Marker::Blurb))
        .map(|(i, _)| i)
        .collect();
    if let [open, close, ..] = positions[..] {
        let mut out = String::new();
        for handle in &handles[open + 1..close] {
            if let Some(node) = handle.get(parser) {
                out.push_str(&node.outer_html(parser));
            }
        }
        return Some(out);
    }
    handles.iter().find_map(|handle| {
        let node = handle.get(parser)?;
        between_markers(&children_of(node), parser)
    })
}

/// Byte offset of the first `<!-- blurb -->` comment in the source.
fn first_marker_offset(html: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(start) = html[from..].find("<!--").map(|i| i + from) {
        let end = html[start..].find("-->").map(|i| start + i + 3)?;
        if comment_text(&html[start..end]) == "blurb" {
            return Some(start);
        }
        from = end;
    }
    None
}

fn first_paragraph(handles: &[NodeHandle], parser: &Parser) -> Option<String> {
    handles.iter().find_map(|handle| {
        let node = handle.get(parser)?;
        match node {
            Node::Tag(tag) if tag.name().as_utf8_str().eq_ignore_ascii_case("p") => {
                Some(node.outer_html(parser).to_string())
            }
            _ => first_paragraph(&children_of(node), parser),
        }
    })
}

/// Extract the blurb from a rendered HTML fragment.
pub fn extract(html: &str) -> Option<String> {
    let dom = tl::parse(html, ParserOptions::default()).ok()?;
    let parser = dom.parser();
    let top = dom.children();

    let mut markers = 0;
    let mut suppressed = false;
    scan(top, parser, &mut markers, &mut suppressed);
    if suppressed {
        return None;
    }

    let blurb = match markers {
        0 => first_paragraph(top, parser),
        1 => first_marker_offset(html).map(|end| html[..end].to_string()),
        _ => between_markers(top, parser)
            .or_else(|| first_marker_offset(html).map(|end| html[..end].to_string())),
    }?;
    let blurb = blurb.trim();
    (!blurb.is_empty()).then(|| blurb.to_string())
}

/// Plain text of an HTML fragment with whitespace collapsed.
pub fn to_text(html: &str) -> String {
    let Ok(dom) = tl::parse(html, ParserOptions::default()) else {
        return html.to_string();
    };
    let parser = dom.parser();
    let mut text = String::new();
    for handle in dom.children() {
        if let Some(node) = handle.get(parser) {
            if matches!(node, Node::Comment(_)) {
                continue;
            }
            text.push_str(&node.inner_text(parser));
            text.push(' ');
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_paragraph_by_default() {
        let html = "<h1>Title</h1>\n<p>First <em>one</em>.</p>\n<p>Second.</p>";
        assert_eq!(extract(html).as_deref(), Some("<p>First <em>one</em>.</p>"));
    }

    #[test]
    fn nested_first_paragraph() {
        let html = "<div><section><p>deep</p></section></div><p>later</p>";
        assert_eq!(extract(html).as_deref(), Some("<p>deep</p>"));
    }

    #[test]
    fn single_marker_takes_everything_before_it() {
        let html = "<p>one</p>\n<p>two</p>\n<!-- blurb -->\n<p>three</p>";
        assert_eq!(extract(html).as_deref(), Some("<p>one</p>\n<p>two</p>"));
    }

    #[test]
    fn marker_pair_takes_what_is_between() {
        let html = "<p>intro</p><!-- blurb --><p>picked</p><!--blurb--><p>rest</p>";
        assert_eq!(extract(html).as_deref(), Some("<p>picked</p>"));
    }

    #[test]
    fn marker_pair_inside_an_element() {
        let html = "<p>intro</p><div><!-- blurb --><p>picked</p><!-- blurb --></div>";
        assert_eq!(extract(html).as_deref(), Some("<p>picked</p>"));
    }

    #[test]
    fn markers_at_different_depths_fall_back_to_prefix() {
        let html = "<p>a</p><!-- blurb --><div><p>b</p><!-- blurb --></div>";
        assert_eq!(extract(html).as_deref(), Some("<p>a</p>"));
    }

    #[test]
    fn no_blurb_marker_suppresses_everything() {
        assert_eq!(extract("<p>text</p><!-- no-blurb -->"), None);
        assert_eq!(extract("<div><!-- no-blurb --></div><!-- blurb --><p>x</p><!-- blurb -->"), None);
    }

    #[test]
    fn nothing_to_extract() {
        assert_eq!(extract("<h1>Only a heading</h1>"), None);
        assert_eq!(extract(""), None);
        assert_eq!(extract("<!-- blurb --><p>after</p>"), None);
    }

    #[test]
    fn other_comments_are_not_markers() {
        let html = "<!-- blurbs are nice --><p>first</p>";
        assert_eq!(extract(html).as_deref(), Some("<p>first</p>"));
    }

    #[test]
    fn to_text_strips_markup() {
        assert_eq!(to_text("<p>Hello <b>bold</b>\n world</p>"), "Hello bold world");
    }
}
