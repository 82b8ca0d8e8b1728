use serde::{Deserialize, Serialize};

use crate::render::StageView;

/// Name the browser pages historically used for their `BroadcastChannel`.
pub const DEFAULT_CHANNEL_NAME: &str = "obs_openlp_channel";

/// Every `type` tag the stage understands.  Anything else decodes to
/// [`Decoded::Unsupported`].
pub const KNOWN_TYPES: &[&str] = &[
    "ready",
    "nextSlide",
    "previousSlide",
    "lyricsLayout",
    "titleLayout",
    "hide",
    "hideOnBlank",
    "fadeDuration",
    "crossfadeDuration",
    "resize",
    "lyricsFont",
    "titleFont",
    "titleVisibility",
    "textFormatting",
    "lyrics",
    "maxWidth",
    "lyricsHeight",
    "init",
];

// ── OpenLP remote API payloads ───────────────────────────────────────────────

/// One slide of the live service item, as returned by
/// `/api/controller/live/text`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Slide {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub selected: bool,
}

/// `results` object of `/api/poll`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollResults {
    /// Service counter; bumps whenever the service list is edited.
    #[serde(default)]
    pub service: u64,
    #[serde(default)]
    pub slide: usize,
    /// Id of the live service item.
    #[serde(default)]
    pub item: String,
    #[serde(default)]
    pub twelve: bool,
    #[serde(default)]
    pub blank: bool,
    #[serde(default)]
    pub theme: bool,
    #[serde(default)]
    pub display: bool,
    #[serde(default)]
    pub version: u32,
    #[serde(default, rename = "isSecure")]
    pub is_secure: bool,
    #[serde(default, rename = "isAuthorised")]
    pub is_authorised: bool,
}

impl PollResults {
    /// True when OpenLP shows a blank, theme-only or desktop screen.
    pub fn is_blanked(&self) -> bool {
        self.display || self.theme || self.blank
    }
}

/// `results` object of `/api/controller/live/text`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveText {
    #[serde(default)]
    pub item: String,
    #[serde(default)]
    pub slides: Vec<Slide>,
}

// ── Stage settings ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HAnchor {
    #[serde(rename = "LEFT", alias = "Left", alias = "left")]
    Left,
    #[serde(rename = "CENTER", alias = "Center", alias = "center")]
    Center,
    #[serde(rename = "RIGHT", alias = "Right", alias = "right")]
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VAnchor {
    #[serde(rename = "TOP", alias = "Top", alias = "top")]
    Top,
    #[serde(
        rename = "MIDDLE",
        alias = "Middle",
        alias = "middle",
        alias = "CENTER",
        alias = "Center",
        alias = "center"
    )]
    Middle,
    #[serde(rename = "BOTTOM", alias = "Bottom", alias = "bottom")]
    Bottom,
}

/// Anchor and pixel offset of one overlay panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    pub h_anchor: HAnchor,
    pub v_anchor: VAnchor,
    #[serde(default)]
    pub h_offset: i32,
    #[serde(default)]
    pub v_offset: i32,
}

impl Layout {
    pub fn lyrics_default() -> Self {
        Self {
            h_anchor: HAnchor::Center,
            v_anchor: VAnchor::Bottom,
            h_offset: 0,
            v_offset: 0,
        }
    }

    pub fn title_default() -> Self {
        Self {
            h_anchor: HAnchor::Left,
            v_anchor: VAnchor::Top,
            h_offset: 0,
            v_offset: 0,
        }
    }

    /// Overwrite only the fields the update carries.
    pub fn merge(&mut self, update: &LayoutUpdate) {
        if let Some(h) = update.h_anchor {
            self.h_anchor = h;
        }
        if let Some(v) = update.v_anchor {
            self.v_anchor = v;
        }
        if let Some(x) = update.h_offset {
            self.h_offset = x;
        }
        if let Some(y) = update.v_offset {
            self.v_offset = y;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleVisibility {
    pub songs: bool,
    pub bibles: bool,
}

/// Which inline markup categories survive into the rendered lyrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextFormatting {
    /// Keep every tag untouched; the other flags are ignored.
    pub all: bool,
    pub bold: bool,
    pub italics: bool,
    pub underline: bool,
    pub colors: bool,
    pub superscript: bool,
    pub subscript: bool,
    pub paragraph: bool,
}

impl Default for TextFormatting {
    fn default() -> Self {
        Self {
            all: false,
            bold: true,
            italics: true,
            underline: true,
            colors: false,
            superscript: true,
            subscript: false,
            paragraph: false,
        }
    }
}

/// Display toggles shared by the message handler, the poll handler and the
/// renderer.  Lives for the daemon's lifetime only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StageSettings {
    /// Derived from the last poll: OpenLP is blanked and `hide_on_blank` is set.
    pub lyrics_hidden: bool,
    /// The last `lyrics` message carried no meaningful text.
    pub empty_string: bool,
    pub always_hide: bool,
    pub hide_on_blank: bool,
    pub crossfade_duration: u64,
    pub fade_duration: u64,
    pub title_visible: TitleVisibility,
    pub auto_resize: bool,
    pub lyrics_layout: Layout,
    pub title_layout: Layout,
    pub lyrics_font_size: u32,
    pub lyrics_font_family: Option<String>,
    pub title_font_size: u32,
    pub title_font_family: Option<String>,
    pub max_width: u32,
    /// 0 lets the panel size to its content.
    pub lyrics_height: u32,
    pub text_formatting: TextFormatting,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            lyrics_hidden: false,
            empty_string: false,
            always_hide: false,
            hide_on_blank: true,
            crossfade_duration: 500,
            fade_duration: 900,
            title_visible: TitleVisibility::default(),
            auto_resize: false,
            lyrics_layout: Layout::lyrics_default(),
            title_layout: Layout::title_default(),
            lyrics_font_size: 36,
            lyrics_font_family: None,
            title_font_size: 24,
            title_font_family: None,
            max_width: 1080,
            lyrics_height: 0,
            text_formatting: TextFormatting::default(),
        }
    }
}

// ── Channel messages ─────────────────────────────────────────────────────────

/// Partial layout carried by `lyricsLayout` / `titleLayout`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h_anchor: Option<HAnchor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v_anchor: Option<VAnchor>,
    #[serde(
        default,
        deserialize_with = "lenient::opt_i32",
        skip_serializing_if = "Option::is_none"
    )]
    pub h_offset: Option<i32>,
    #[serde(
        default,
        deserialize_with = "lenient::opt_i32",
        skip_serializing_if = "Option::is_none"
    )]
    pub v_offset: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontUpdate {
    #[serde(alias = "value", deserialize_with = "lenient::u32")]
    pub size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
}

/// A message on the broadcast channel.  Wire shape is
/// `{"type": "<camelCase>", ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChannelMessage {
    /// A control page came up and wants the current settings.
    Ready,
    NextSlide,
    PreviousSlide,
    LyricsLayout(LayoutUpdate),
    TitleLayout(LayoutUpdate),
    Hide {
        value: bool,
    },
    HideOnBlank {
        value: bool,
    },
    FadeDuration {
        #[serde(deserialize_with = "lenient::u64")]
        value: u64,
    },
    CrossfadeDuration {
        #[serde(deserialize_with = "lenient::u64")]
        value: u64,
    },
    Resize {
        value: bool,
    },
    LyricsFont(FontUpdate),
    TitleFont(FontUpdate),
    TitleVisibility {
        value: TitleVisibility,
    },
    TextFormatting {
        value: TextFormatting,
    },
    Lyrics {
        value: String,
    },
    MaxWidth {
        #[serde(deserialize_with = "lenient::u32")]
        value: u32,
    },
    LyricsHeight {
        #[serde(deserialize_with = "lenient::u32")]
        value: u32,
    },
    /// Full settings snapshot.
    Init {
        value: Box<StageSettings>,
    },
}

impl ChannelMessage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Message(ChannelMessage),
    /// Well-formed JSON with a `type` nobody handles.
    Unsupported { type_name: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("message is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("message has no string `type` field")]
    MissingType,
    #[error("invalid `{type_name}` message: {source}")]
    Payload {
        type_name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Decode one channel payload.
///
/// Pages post `JSON.stringify(...)` output, so a payload that is itself a
/// JSON string is unwrapped once before dispatching on `type`.
pub fn decode(raw: &str) -> Result<Decoded, DecodeError> {
    let mut value: serde_json::Value = serde_json::from_str(raw).map_err(DecodeError::Json)?;
    if let serde_json::Value::String(inner) = &value {
        value = serde_json::from_str(inner).map_err(DecodeError::Json)?;
    }

    let type_name = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(DecodeError::MissingType)?
        .to_string();

    if !KNOWN_TYPES.contains(&type_name.as_str()) {
        return Ok(Decoded::Unsupported { type_name });
    }

    serde_json::from_value(value)
        .map(Decoded::Message)
        .map_err(|source| DecodeError::Payload { type_name, source })
}

/// Frames only the daemon originates; never fed back into the reducer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    View(StageView),
    Log { message: String },
}

impl ServerFrame {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Numeric fields arrive as numbers or as strings straight out of form
/// inputs; both are accepted.
mod lenient {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }

    fn to_i64<E: Error>(raw: Raw) -> Result<i64, E> {
        let float = match raw {
            Raw::Int(v) => return Ok(v),
            Raw::Float(v) => v,
            Raw::Text(s) => {
                let t = s.trim();
                if let Ok(v) = t.parse::<i64>() {
                    return Ok(v);
                }
                t.parse::<f64>()
                    .map_err(|_| E::custom(format!("expected a number, got {:?}", s)))?
            }
        };
        if !float.is_finite() {
            return Err(E::custom("expected a finite number"));
        }
        Ok(float.round() as i64)
    }

    pub fn u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        let v = to_i64(Raw::deserialize(d)?)?;
        u64::try_from(v).map_err(|_| D::Error::custom("expected a non-negative number"))
    }

    pub fn u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
        let v = to_i64(Raw::deserialize(d)?)?;
        u32::try_from(v).map_err(|_| D::Error::custom("number out of range"))
    }

    pub fn opt_i32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i32>, D::Error> {
        match Option::<Raw>::deserialize(d)? {
            None => Ok(None),
            Some(raw) => {
                let v = to_i64(raw)?;
                i32::try_from(v)
                    .map(Some)
                    .map_err(|_| D::Error::custom("number out of range"))
            }
        }
    }
}
