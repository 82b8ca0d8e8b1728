use crate::lines::LinesSnapshot;
use crate::protocol::{ChannelMessage, Decoded, LiveText, PollResults, Slide, StageSettings};
use crate::render::{self, StageView};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Which live item a slide fetch was issued for.  Both fields are `None`
/// for the startup fetch, when nothing has been polled yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchTarget {
    pub item: Option<String>,
    pub service: Option<u64>,
}

impl FetchTarget {
    pub fn initial() -> Self {
        Self::default()
    }

    pub fn is_initial(&self) -> bool {
        self.item.is_none() && self.service.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Next,
    Previous,
}

/// What the caller must do after a channel message was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The view changed; publish it.
    Updated,
    Unchanged,
    /// Ask OpenLP to move the live slide, then poll immediately.
    Navigate(Direction),
    /// Answer with an `init` message carrying the current settings.
    ReplyInit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// An older poll than one already applied; nothing was touched.
    Stale,
    Applied {
        /// The live item or service changed and slides must be re-fetched.
        refetch: Option<FetchTarget>,
        changed: bool,
    },
}

/// Everything the stage knows.  Mutated only through the `apply_*` methods;
/// the daemon core is the single owner.
#[derive(Debug, Clone, Default)]
pub struct StageState {
    settings: StageSettings,
    slides: Vec<Slide>,
    active_item: Option<String>,
    active_service: Option<u64>,
    active_slide: Option<usize>,
    /// Text pushed by a `lyrics` message; cleared on slide change.
    lyrics_override: Option<String>,
    /// OpenLP reported blank/theme/desktop on the last poll.
    blanked: bool,
    pending_fetch: Option<FetchTarget>,
    last_poll_seq: u64,
    rev: u64,
}

impl StageState {
    pub fn new() -> Self {
        Self {
            rev: 1,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> &StageSettings {
        &self.settings
    }

    pub fn slides(&self) -> &[Slide] {
        &self.slides
    }

    pub fn active_item(&self) -> Option<&str> {
        self.active_item.as_deref()
    }

    pub fn active_slide_index(&self) -> Option<usize> {
        self.active_slide
    }

    pub fn active_slide(&self) -> Option<&Slide> {
        self.active_slide.and_then(|i| self.slides.get(i))
    }

    /// Plain text of the live slide, falling back to its HTML.
    pub fn active_slide_text(&self) -> Option<&str> {
        let slide = self.active_slide()?;
        slide.text.as_deref().or(slide.html.as_deref())
    }

    pub fn lyrics_override(&self) -> Option<&str> {
        self.lyrics_override.as_deref()
    }

    pub fn pending_fetch(&self) -> Option<&FetchTarget> {
        self.pending_fetch.as_ref()
    }

    /// Bumped on every change that affects the view.
    pub fn rev(&self) -> u64 {
        self.rev
    }

    pub fn view(&self) -> StageView {
        render::stage_view(self)
    }

    /// Mark the startup slide fetch as in flight.
    pub fn begin_initial_fetch(&mut self) -> FetchTarget {
        let target = FetchTarget::initial();
        self.pending_fetch = Some(target.clone());
        target
    }

    pub fn apply_decoded(&mut self, decoded: &Decoded) -> MessageOutcome {
        match decoded {
            Decoded::Message(msg) => self.apply_message(msg),
            Decoded::Unsupported { type_name } => {
                info!("Unsupported message: {}", type_name);
                MessageOutcome::Unchanged
            }
        }
    }

    pub fn apply_message(&mut self, msg: &ChannelMessage) -> MessageOutcome {
        let s = &mut self.settings;
        match msg {
            ChannelMessage::Ready => return MessageOutcome::ReplyInit,
            ChannelMessage::NextSlide => return MessageOutcome::Navigate(Direction::Next),
            ChannelMessage::PreviousSlide => return MessageOutcome::Navigate(Direction::Previous),
            ChannelMessage::LyricsLayout(update) => s.lyrics_layout.merge(update),
            ChannelMessage::TitleLayout(update) => s.title_layout.merge(update),
            ChannelMessage::Hide { value } => s.always_hide = *value,
            ChannelMessage::HideOnBlank { value } => {
                s.hide_on_blank = *value;
                self.refresh_hidden();
            }
            ChannelMessage::FadeDuration { value } => s.fade_duration = *value,
            ChannelMessage::CrossfadeDuration { value } => s.crossfade_duration = *value,
            ChannelMessage::Resize { value } => s.auto_resize = *value,
            ChannelMessage::LyricsFont(font) => {
                s.lyrics_font_size = font.size;
                if let Some(family) = &font.family {
                    s.lyrics_font_family = (!family.is_empty()).then(|| family.clone());
                }
            }
            ChannelMessage::TitleFont(font) => {
                s.title_font_size = font.size;
                if let Some(family) = &font.family {
                    s.title_font_family = (!family.is_empty()).then(|| family.clone());
                }
            }
            ChannelMessage::TitleVisibility { value } => s.title_visible = *value,
            ChannelMessage::TextFormatting { value } => s.text_formatting = *value,
            ChannelMessage::Lyrics { value } => self.apply_lyrics(value),
            ChannelMessage::MaxWidth { value } => s.max_width = *value,
            ChannelMessage::LyricsHeight { value } => s.lyrics_height = *value,
            ChannelMessage::Init { value } => {
                let runtime = (s.lyrics_hidden, s.empty_string);
                *s = (**value).clone();
                (s.lyrics_hidden, s.empty_string) = runtime;
                self.refresh_hidden();
            }
        }
        self.bump();
        MessageOutcome::Updated
    }

    fn apply_lyrics(&mut self, value: &str) {
        if value.chars().count() <= 4 {
            self.settings.empty_string = true;
            return;
        }
        self.lyrics_override = Some(value.to_string());
        self.settings.empty_string = false;
    }

    /// Reconcile one poll response.  `seq` must grow with every request
    /// issued; responses arriving out of order are dropped.
    pub fn apply_poll(&mut self, seq: u64, poll: &PollResults) -> PollOutcome {
        if seq <= self.last_poll_seq {
            debug!(seq, last = self.last_poll_seq, "dropping stale poll");
            return PollOutcome::Stale;
        }
        self.last_poll_seq = seq;

        self.blanked = poll.is_blanked();
        let mut changed = self.refresh_hidden();

        // The startup fetch has no service counter; adopt the first one seen.
        let item_changed = self.active_item.as_deref() != Some(poll.item.as_str());
        if self.active_service.is_none() && !item_changed {
            self.active_service = Some(poll.service);
        }
        let service_changed = self.active_service.is_some_and(|s| s != poll.service);

        let mut refetch = None;
        if item_changed || service_changed {
            let target = FetchTarget {
                item: Some(poll.item.clone()),
                service: Some(poll.service),
            };
            let already_pending = match &self.pending_fetch {
                Some(p) => p.is_initial() || *p == target,
                None => false,
            };
            if !already_pending {
                self.pending_fetch = Some(target.clone());
                refetch = Some(target);
            }
        } else if self.active_slide != Some(poll.slide) {
            self.active_slide = Some(poll.slide);
            self.lyrics_override = None;
            changed = true;
        }

        if changed {
            self.bump();
        }
        PollOutcome::Applied { refetch, changed }
    }

    /// Install freshly fetched slides.  Returns false (and changes nothing)
    /// when `target` is not the fetch currently awaited.
    pub fn apply_slides(&mut self, target: &FetchTarget, live: LiveText) -> bool {
        if self.pending_fetch.as_ref() != Some(target) {
            debug!(?target, pending = ?self.pending_fetch, "dropping superseded slide fetch");
            return false;
        }
        self.pending_fetch = None;

        self.active_slide = live.slides.iter().position(|s| s.selected);
        self.slides = live.slides;
        self.active_item = Some(live.item);
        self.active_service = target.service;
        self.lyrics_override = None;
        self.bump();
        true
    }

    /// Forget an in-flight fetch that failed so the next poll retries it.
    pub fn abandon_fetch(&mut self, target: &FetchTarget) {
        if self.pending_fetch.as_ref() == Some(target) {
            self.pending_fetch = None;
        }
    }

    fn refresh_hidden(&mut self) -> bool {
        let hidden = self.blanked && self.settings.hide_on_blank;
        let changed = hidden != self.settings.lyrics_hidden;
        self.settings.lyrics_hidden = hidden;
        changed
    }

    fn bump(&mut self) {
        self.rev += 1;
    }
}

// ── Published snapshot ───────────────────────────────────────────────────────

/// What HTTP handlers and channel clients read.  The core publishes after
/// every change; readers never see a half-applied update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Published {
    pub settings: StageSettings,
    pub view: StageView,
    pub lines: LinesSnapshot,
}

#[derive(Default)]
pub struct StateManager {
    state: Arc<RwLock<Published>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> Published {
        self.state.read().await.clone()
    }

    pub async fn view(&self) -> StageView {
        self.state.read().await.view.clone()
    }

    pub async fn lines(&self) -> LinesSnapshot {
        self.state.read().await.lines.clone()
    }

    pub async fn publish(&self, stage: &StageState) {
        let view = stage.view();
        let mut state = self.state.write().await;
        state.settings = stage.settings().clone();
        state.view = view;
    }

    pub async fn set_lines(&self, lines: LinesSnapshot) {
        self.state.write().await.lines = lines;
    }
}
