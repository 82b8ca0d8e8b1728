//! Feed the live slide to the stage a few lines at a time.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use unicode_width::UnicodeWidthStr;

/// Lines remembered for the control page's history list.
pub const MAX_SAVED_LINES: usize = 5;

/// Lines shown before the newest one in the preview.
const PREVIEW_CONTEXT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitOptions {
    #[serde(default = "default_auto_split")]
    pub auto_split: bool,
    /// Display columns, not bytes.
    #[serde(default = "default_max_characters")]
    pub max_characters: usize,
    #[serde(default = "default_min_words")]
    pub min_words: usize,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            auto_split: default_auto_split(),
            max_characters: default_max_characters(),
            min_words: default_min_words(),
        }
    }
}

fn default_auto_split() -> bool {
    true
}

fn default_max_characters() -> usize {
    60
}

fn default_min_words() -> usize {
    3
}

/// Break slide text into display lines.
///
/// `<br>` and newlines both separate lines; blank lines are dropped.
pub fn split_lines(text: &str, opts: &SplitOptions) -> Vec<String> {
    let normalized = text
        .replace("<br />", "\n")
        .replace("<br/>", "\n")
        .replace("<br>", "\n");

    let mut out = Vec::new();
    for line in normalized.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if opts.auto_split && opts.max_characters > 0 && line.width() > opts.max_characters {
            out.extend(wrap(line, opts));
        } else {
            out.push(line.to_string());
        }
    }
    out
}

fn wrap(line: &str, opts: &SplitOptions) -> Vec<String> {
    let mut chunks: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut width = 0usize;

    for word in line.split_whitespace() {
        let w = word.width();
        let needed = if current.is_empty() { w } else { width + 1 + w };
        if !current.is_empty() && needed > opts.max_characters {
            chunks.push(std::mem::take(&mut current));
            width = w;
        } else {
            width = needed;
        }
        current.push(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    // Borrow words from the previous chunk so the tail is never a stub.
    let min_words = opts.min_words.max(1);
    while chunks.len() > 1 {
        let n = chunks.len();
        if chunks[n - 1].len() >= min_words {
            break;
        }
        if chunks[n - 2].len() > min_words {
            if let Some(word) = chunks[n - 2].pop() {
                chunks[n - 1].insert(0, word);
            }
        } else {
            let tail = chunks.pop().unwrap_or_default();
            chunks[n - 2].extend(tail);
        }
    }

    chunks.into_iter().map(|c| c.join(" ")).collect()
}

/// Snapshot for the control page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinesSnapshot {
    pub preview: String,
    pub history: Vec<String>,
    pub remaining: usize,
}

/// Cursor over the lines of one slide plus a short history of what was shown.
#[derive(Debug, Clone, Default)]
pub struct LineFeed {
    source: Option<String>,
    lines: Vec<String>,
    last_displayed: Option<usize>,
    history: VecDeque<String>,
}

impl LineFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load slide text. The cursor resets only when the text differs from
    /// what is already loaded. Returns true on reset.
    pub fn load(&mut self, text: &str, opts: &SplitOptions) -> bool {
        if self.source.as_deref() == Some(text) {
            return false;
        }
        self.source = Some(text.to_string());
        self.lines = split_lines(text, opts);
        self.last_displayed = None;
        true
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Advance by up to `amount` lines and return them, each followed by
    /// `<br>`. `None` when `amount <= 0` or the slide is exhausted.
    pub fn display_next(&mut self, amount: i64) -> Option<String> {
        if amount <= 0 {
            return None;
        }
        let start = self.last_displayed.map_or(0, |i| i + 1);
        if start >= self.lines.len() {
            return None;
        }
        let end = start
            .saturating_add(usize::try_from(amount).unwrap_or(usize::MAX))
            .min(self.lines.len());

        let mut shown = String::new();
        for line in &self.lines[start..end] {
            shown.push_str(line);
            shown.push_str("<br>");
        }
        self.last_displayed = Some(end - 1);
        self.save_for_history();
        Some(shown)
    }

    /// The newest displayed line and up to three before it.
    pub fn preview(&self) -> String {
        let Some(last) = self.last_displayed else {
            return String::new();
        };
        let mut preview = String::new();
        for line in &self.lines[last.saturating_sub(PREVIEW_CONTEXT)..=last] {
            preview.push_str(line);
            preview.push_str("<br>");
        }
        preview
    }

    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }

    pub fn snapshot(&self) -> LinesSnapshot {
        let shown = self.last_displayed.map_or(0, |i| i + 1);
        LinesSnapshot {
            preview: self.preview(),
            history: self.history().map(str::to_string).collect(),
            remaining: self.lines.len().saturating_sub(shown),
        }
    }

    fn save_for_history(&mut self) {
        let Some(line) = self.last_displayed.and_then(|i| self.lines.get(i)) else {
            return;
        };
        if self.history.len() >= MAX_SAVED_LINES {
            self.history.pop_front();
        }
        self.history.push_back(line.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_split() -> SplitOptions {
        SplitOptions {
            auto_split: false,
            ..SplitOptions::default()
        }
    }

    #[test]
    fn test_split_on_breaks_and_newlines() {
        let lines = split_lines("Amazing grace<br>How sweet the sound\n\n<br/>That saved", &no_split());
        assert_eq!(lines, vec!["Amazing grace", "How sweet the sound", "That saved"]);
    }

    #[test]
    fn test_long_lines_wrap_at_words() {
        let opts = SplitOptions {
            auto_split: true,
            max_characters: 20,
            min_words: 1,
        };
        let lines = split_lines("when we've been there ten thousand years", &opts);
        assert_eq!(lines, vec!["when we've been", "there ten thousand", "years"]);
        assert!(lines.iter().all(|l| l.width() <= 20));
    }

    #[test]
    fn test_short_tail_borrows_words() {
        let opts = SplitOptions {
            auto_split: true,
            max_characters: 24,
            min_words: 3,
        };
        // Greedy wrapping would leave "sun" alone on the last line.
        let lines = split_lines("bright shining as the morning sun", &opts);
        assert_eq!(lines, vec!["bright shining as", "the morning sun"]);
    }

    #[test]
    fn test_tail_merges_when_nothing_to_borrow() {
        let opts = SplitOptions {
            auto_split: true,
            max_characters: 10,
            min_words: 3,
        };
        let lines = split_lines("hallelujah hallelujah amen", &opts);
        assert_eq!(lines, vec!["hallelujah hallelujah amen"]);
    }

    #[test]
    fn test_display_next_advances() {
        let mut feed = LineFeed::new();
        assert!(feed.load("a\nb\nc\nd\ne", &no_split()));

        assert_eq!(feed.display_next(0), None);
        assert_eq!(feed.display_next(-2), None);
        assert_eq!(feed.display_next(2).as_deref(), Some("a<br>b<br>"));
        assert_eq!(feed.display_next(2).as_deref(), Some("c<br>d<br>"));
        assert_eq!(feed.display_next(2).as_deref(), Some("e<br>"));
        assert_eq!(feed.display_next(1), None);
    }

    #[test]
    fn test_reloading_same_text_keeps_cursor() {
        let mut feed = LineFeed::new();
        feed.load("a\nb", &no_split());
        feed.display_next(1);
        assert!(!feed.load("a\nb", &no_split()));
        assert_eq!(feed.display_next(1).as_deref(), Some("b<br>"));
        assert!(feed.load("x\ny", &no_split()));
        assert_eq!(feed.display_next(1).as_deref(), Some("x<br>"));
    }

    #[test]
    fn test_preview_window() {
        let mut feed = LineFeed::new();
        feed.load("1\n2\n3\n4\n5\n6", &no_split());
        assert_eq!(feed.preview(), "");
        feed.display_next(2);
        assert_eq!(feed.preview(), "1<br>2<br>");
        feed.display_next(4);
        assert_eq!(feed.preview(), "3<br>4<br>5<br>6<br>");
    }

    #[test]
    fn test_history_is_bounded() {
        let mut feed = LineFeed::new();
        feed.load("1\n2\n3\n4\n5\n6\n7", &no_split());
        for _ in 0..7 {
            feed.display_next(1);
        }
        let history: Vec<&str> = feed.history().collect();
        assert_eq!(history, vec!["3", "4", "5", "6", "7"]);
        assert_eq!(feed.snapshot().remaining, 0);
    }
}
