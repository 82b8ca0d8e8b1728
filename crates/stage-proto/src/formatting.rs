//! Strip inline markup the operator turned off before lyrics reach the stage.

use regex::Regex;
use std::sync::OnceLock;

use crate::protocol::TextFormatting;

struct TagPatterns {
    bold: Regex,
    italics: Regex,
    underline: Regex,
    span: Regex,
    color_marker: Regex,
    superscript: Regex,
    subscript: Regex,
    paragraph_open: Regex,
    paragraph_close: Regex,
    paragraph_last: Regex,
}

static PATTERNS: OnceLock<Option<TagPatterns>> = OnceLock::new();

// `(?:\s[^>]*)?` keeps `<b>` from matching `<br>` and `<u>` from `<ul>`.
fn tag(names: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(r"(?i)</?(?:{})(?:\s[^>]*)?/?>", names))
}

fn patterns() -> Option<&'static TagPatterns> {
    PATTERNS
        .get_or_init(|| {
            Some(TagPatterns {
                bold: tag("strong|b").ok()?,
                italics: tag("em|i").ok()?,
                underline: tag("u").ok()?,
                span: Regex::new(r"(?i)<(/?)(?:span|font)(\s[^>]*)?>").ok()?,
                color_marker: Regex::new(r"(?i)color").ok()?,
                superscript: tag("sup").ok()?,
                subscript: tag("sub").ok()?,
                paragraph_open: Regex::new(r"(?i)<p(?:\s[^>]*)?>").ok()?,
                paragraph_close: Regex::new(r"(?i)</p\s*>").ok()?,
                paragraph_last: Regex::new(r"(?i)</p\s*>\s*$").ok()?,
            })
        })
        .as_ref()
}

/// Remove the tags of every disabled category, keeping their text.
///
/// `<br>` always survives. Closing paragraphs become line breaks so verses
/// keep their shape when paragraph markup is off.
pub fn filter_html(html: &str, formatting: &TextFormatting) -> String {
    if formatting.all || !html.contains('<') {
        return html.to_string();
    }
    let Some(p) = patterns() else {
        return html.to_string();
    };

    let mut out = html.to_string();
    let strip = [
        (formatting.bold, &p.bold),
        (formatting.italics, &p.italics),
        (formatting.underline, &p.underline),
        (formatting.superscript, &p.superscript),
        (formatting.subscript, &p.subscript),
    ];
    for (keep, re) in strip {
        if !keep {
            out = re.replace_all(&out, "").into_owned();
        }
    }
    if !formatting.colors {
        out = strip_color_spans(&out, p);
    }
    if !formatting.paragraph {
        out = p.paragraph_open.replace_all(&out, "").into_owned();
        out = p.paragraph_last.replace(&out, "").into_owned();
        out = p.paragraph_close.replace_all(&out, "<br>").into_owned();
    }
    out
}

/// Drop `<span>`/`<font>` tags whose attributes mention a colour, along
/// with their matching close tags. Other spans are left alone.
fn strip_color_spans(html: &str, p: &TagPatterns) -> String {
    let mut out = String::with_capacity(html.len());
    // One entry per open span: true when it was dropped
    let mut open: Vec<bool> = Vec::new();
    let mut last = 0;
    for caps in p.span.captures_iter(html) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&html[last..whole.start()]);
        last = whole.end();

        let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
        let drop = if closing {
            open.pop().unwrap_or(false)
        } else {
            let attrs = caps.get(2).map_or("", |m| m.as_str());
            let colored = p.color_marker.is_match(attrs);
            if !whole.as_str().ends_with("/>") {
                open.push(colored);
            }
            colored
        };
        if !drop {
            out.push_str(whole.as_str());
        }
    }
    out.push_str(&html[last..]);
    out
}
