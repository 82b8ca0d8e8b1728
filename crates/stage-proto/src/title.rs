//! Service item titles: tell scripture references from song names and clean
//! both up for the title panel.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TitleKind {
    Song,
    Bible,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTitle {
    pub kind: TitleKind,
    pub text: String,
    /// Translation abbreviation for scripture, e.g. `KJV`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

struct TitlePatterns {
    tags: Regex,
    spaces: Regex,
    reference: Regex,
    annotation: Regex,
}

static PATTERNS: OnceLock<Option<TitlePatterns>> = OnceLock::new();

fn patterns() -> Option<&'static TitlePatterns> {
    PATTERNS
        .get_or_init(|| {
            Some(TitlePatterns {
                tags: Regex::new(r"<[^>]*>").ok()?,
                spaces: Regex::new(r"\s+").ok()?,
                // [1-3] Book[ Name] chapter[:verse[-verse[:verse]]] [(VERSION)]
                reference: Regex::new(
                    r"^(?P<reference>(?:[1-3]\s?)?\p{L}[\p{L}'.]*(?:\s+\p{L}[\p{L}'.]*)*\s+\d{1,3}(?::\d{1,3}(?:\s*[-–]\s*\d{1,3}(?::\d{1,3})?)?)?)(?:\s*,?\s*\(?(?P<version>\p{Lu}[\p{Lu}\d]{1,9})\)?)?$",
                )
                .ok()?,
                annotation: Regex::new(r"\s*[\(\[][^\)\]]*[\)\]]$").ok()?,
            })
        })
        .as_ref()
}

fn clean(raw: &str, p: &TitlePatterns) -> String {
    let text = p.tags.replace_all(raw, " ");
    let text = text.replace("&amp;", "&").replace("&nbsp;", " ");
    p.spaces.replace_all(text.trim(), " ").into_owned()
}

/// Parse a slide title. Returns `None` when nothing printable is left.
pub fn parse_title(raw: &str) -> Option<ParsedTitle> {
    let p = patterns()?;
    let text = clean(raw, p);
    if text.is_empty() {
        return None;
    }

    if let Some(caps) = p.reference.captures(&text) {
        let reference = caps.name("reference")?.as_str().to_string();
        let version = caps
            .name("version")
            .map(|m| m.as_str().trim().to_string())
            .filter(|v| !v.is_empty());
        return Some(ParsedTitle {
            kind: TitleKind::Bible,
            text: reference,
            version,
        });
    }

    let stripped = p.annotation.replace(&text, "");
    let text = if stripped.trim().is_empty() {
        text
    } else {
        stripped.trim().to_string()
    };
    Some(ParsedTitle {
        kind: TitleKind::Song,
        text,
        version: None,
    })
}
