//! Pure projection of [`StageState`] into what a stage page shows.
//!
//! The page script applies a [`StageView`] verbatim; every layout decision
//! is made here so it can be tested without a browser.

use serde::{Deserialize, Serialize};

use crate::formatting::filter_html;
use crate::protocol::{HAnchor, Layout, Slide, TextFormatting, VAnchor};
use crate::state::StageState;
use crate::title::{parse_title, TitleKind};

/// Flexbox placement along one axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    #[default]
    #[serde(rename = "flex-start")]
    Start,
    #[serde(rename = "center")]
    Center,
    #[serde(rename = "flex-end")]
    End,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

/// Margins in px.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edges {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxStyle {
    /// `justify-content` of the panel container.
    pub justify: Placement,
    /// `align-items` of the panel container.
    pub align: Placement,
    pub text_align: TextAlign,
    pub margin: Edges,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricsPanel {
    pub visible: bool,
    pub html: String,
    pub style: BoxStyle,
    pub font_size: u32,
    pub font_family: Option<String>,
    pub max_width: u32,
    pub height: Option<u32>,
    pub auto_resize: bool,
    pub fade_duration: u64,
    pub crossfade_duration: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitlePanel {
    pub visible: bool,
    pub text: String,
    pub kind: Option<TitleKind>,
    pub version: Option<String>,
    pub style: BoxStyle,
    pub font_size: u32,
    pub font_family: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageView {
    pub rev: u64,
    pub lyrics: LyricsPanel,
    pub title: TitlePanel,
}

pub fn box_style(layout: &Layout) -> BoxStyle {
    let mut margin = Edges::default();
    let (justify, text_align) = match layout.h_anchor {
        HAnchor::Left => {
            margin.left = layout.h_offset;
            (Placement::Start, TextAlign::Left)
        }
        HAnchor::Center => {
            margin.left = layout.h_offset;
            margin.right = layout.h_offset;
            (Placement::Center, TextAlign::Center)
        }
        HAnchor::Right => {
            margin.right = layout.h_offset;
            (Placement::End, TextAlign::Right)
        }
    };
    let align = match layout.v_anchor {
        VAnchor::Top => {
            margin.top = layout.v_offset;
            Placement::Start
        }
        VAnchor::Middle => {
            margin.top = layout.v_offset;
            margin.bottom = layout.v_offset;
            Placement::Center
        }
        VAnchor::Bottom => {
            margin.bottom = layout.v_offset;
            Placement::End
        }
    };
    BoxStyle {
        justify,
        align,
        text_align,
        margin,
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("<br>"),
            _ => out.push(c),
        }
    }
    out
}

/// Slide HTML filtered by the formatting flags, or escaped plain text.
pub fn slide_markup(slide: &Slide, formatting: &TextFormatting) -> String {
    match (&slide.html, &slide.text) {
        (Some(html), _) if !html.trim().is_empty() => filter_html(html, formatting),
        (_, Some(text)) => escape_html(text),
        _ => String::new(),
    }
}

pub fn stage_view(state: &StageState) -> StageView {
    let s = state.settings();
    let blanked = s.always_hide || s.lyrics_hidden;

    let html = match state.lyrics_override() {
        Some(text) => filter_html(text, &s.text_formatting),
        None => state
            .active_slide()
            .map(|slide| slide_markup(slide, &s.text_formatting))
            .unwrap_or_default(),
    };

    let lyrics = LyricsPanel {
        // A zero crossfade turns the lyrics panel off entirely
        visible: !(s.crossfade_duration == 0 || s.empty_string || blanked),
        html,
        style: box_style(&s.lyrics_layout),
        font_size: s.lyrics_font_size,
        font_family: s.lyrics_font_family.clone(),
        max_width: s.max_width,
        height: (s.lyrics_height > 0).then_some(s.lyrics_height),
        auto_resize: s.auto_resize,
        fade_duration: s.fade_duration,
        crossfade_duration: s.crossfade_duration,
    };

    let parsed = state
        .active_slide()
        .and_then(|slide| slide.title.as_deref())
        .and_then(parse_title);
    let title = match parsed {
        Some(parsed) => {
            let wanted = match parsed.kind {
                TitleKind::Song => s.title_visible.songs,
                TitleKind::Bible => s.title_visible.bibles,
            };
            TitlePanel {
                visible: wanted && !blanked,
                text: parsed.text,
                kind: Some(parsed.kind),
                version: parsed.version,
                style: box_style(&s.title_layout),
                font_size: s.title_font_size,
                font_family: s.title_font_family.clone(),
            }
        }
        None => TitlePanel {
            style: box_style(&s.title_layout),
            font_size: s.title_font_size,
            font_family: s.title_font_family.clone(),
            ..TitlePanel::default()
        },
    };

    StageView {
        rev: state.rev(),
        lyrics,
        title,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_style_anchors() {
        let style = box_style(&Layout {
            h_anchor: HAnchor::Center,
            v_anchor: VAnchor::Middle,
            h_offset: 10,
            v_offset: 4,
        });
        assert_eq!(style.justify, Placement::Center);
        assert_eq!(style.align, Placement::Center);
        assert_eq!(style.text_align, TextAlign::Center);
        assert_eq!(
            style.margin,
            Edges {
                top: 4,
                right: 10,
                bottom: 4,
                left: 10
            }
        );

        let style = box_style(&Layout {
            h_anchor: HAnchor::Right,
            v_anchor: VAnchor::Bottom,
            h_offset: 8,
            v_offset: 16,
        });
        assert_eq!(style.justify, Placement::End);
        assert_eq!(style.align, Placement::End);
        assert_eq!(style.margin.right, 8);
        assert_eq!(style.margin.left, 0);
        assert_eq!(style.margin.bottom, 16);
    }

    #[test]
    fn test_placement_serializes_as_css() {
        let json = serde_json::to_string(&box_style(&Layout::lyrics_default())).unwrap();
        assert!(json.contains(r#""justify":"center""#));
        assert!(json.contains(r#""align":"flex-end""#));
        assert!(json.contains(r#""textAlign":"center""#));
    }

    #[test]
    fn test_plain_text_is_escaped() {
        let slide = Slide {
            text: Some("Fish & chips\n<loaves>".to_string()),
            ..Slide::default()
        };
        assert_eq!(
            slide_markup(&slide, &TextFormatting::default()),
            "Fish &amp; chips<br>&lt;loaves&gt;"
        );
    }

    #[test]
    fn test_html_preferred_over_text() {
        let slide = Slide {
            html: Some("<em>Holy</em><sub>1</sub>".to_string()),
            text: Some("Holy".to_string()),
            ..Slide::default()
        };
        assert_eq!(
            slide_markup(&slide, &TextFormatting::default()),
            "<em>Holy</em>1"
        );
    }

    #[test]
    fn test_empty_state_view() {
        let view = stage_view(&StageState::new());
        assert!(view.lyrics.visible);
        assert_eq!(view.lyrics.html, "");
        assert!(!view.title.visible);
        assert_eq!(view.lyrics.height, None);
        assert_eq!(view.lyrics.font_size, 36);
    }
}
