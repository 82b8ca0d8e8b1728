/// StageCore — single-owner event loop for all stage state.
///
/// Channel messages, poll responses and fetched slides all arrive as
/// `StageEvent`s.  StageCore owns the `StageState` and `LineFeed`
/// exclusively; after each change it publishes a snapshot to the
/// `StateManager` and announces `HubMessage::ViewUpdated`.
///
/// Network I/O never happens here.  StageCore emits `FetchRequest`s and the
/// OpenLP worker answers with events, so the loop never blocks on OpenLP.
use std::sync::Arc;
use std::time::Duration;

use stage_proto::config::Config;
use stage_proto::lines::{LineFeed, LinesSnapshot, SplitOptions};
use stage_proto::protocol::{decode, ChannelMessage, LiveText, PollResults};
use stage_proto::state::{
    Direction, FetchTarget, MessageOutcome, PollOutcome, StageState, StateManager,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{ClientId, HubMessage};

// ── StageEvent ────────────────────────────────────────────────────────────────

/// All inputs into the StageCore loop.
#[derive(Debug)]
pub enum StageEvent {
    /// A raw payload posted on the channel.
    Channel { from: ClientId, payload: String },
    /// A poll response; `seq` grows with every request issued.
    Poll { seq: u64, results: PollResults },
    Slides { target: FetchTarget, live: LiveText },
    FetchFailed { target: FetchTarget },
    /// Feed the next `amount` lines of the live slide to the stage.
    LinesNext {
        amount: i64,
        reply: oneshot::Sender<LinesSnapshot>,
    },
    /// Stop the loop and its poll ticker.
    Shutdown,
}

/// Work for the OpenLP worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchRequest {
    Poll,
    Slides(FetchTarget),
    /// Move the live slide, then poll.
    Navigate(Direction),
}

// ── StageCore ─────────────────────────────────────────────────────────────────

pub struct StageCore {
    state: StageState,
    lines: LineFeed,
    split: SplitOptions,
    poll_interval: Duration,
    state_manager: Arc<StateManager>,
    fetch_tx: mpsc::Sender<FetchRequest>,
    hub_tx: broadcast::Sender<HubMessage>,
}

impl StageCore {
    pub fn new(
        config: &Config,
        state_manager: Arc<StateManager>,
        fetch_tx: mpsc::Sender<FetchRequest>,
        hub_tx: broadcast::Sender<HubMessage>,
    ) -> Self {
        Self {
            state: StageState::new(),
            lines: LineFeed::new(),
            split: config.lines.clone(),
            poll_interval: Duration::from_millis(config.openlp.poll_interval_ms.max(10)),
            state_manager,
            fetch_tx,
            hub_tx,
        }
    }

    /// Run until a `Shutdown` event arrives or every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<StageEvent>) -> anyhow::Result<()> {
        info!("StageCore: starting event loop");
        self.start().await;

        let ticker = spawn_poll_ticker(self.poll_interval, self.fetch_tx.clone());

        loop {
            match event_rx.recv().await {
                None => {
                    info!("StageCore: event channel closed, shutting down");
                    break;
                }
                Some(StageEvent::Shutdown) => {
                    info!("StageCore: shutdown requested");
                    break;
                }
                Some(evt) => self.handle_event(evt).await,
            }
        }

        ticker.abort();
        Ok(())
    }

    /// Request the startup slide list and publish the empty view.
    pub async fn start(&mut self) {
        let target = self.state.begin_initial_fetch();
        self.request(FetchRequest::Slides(target)).await;
        self.publish().await;
    }

    pub async fn handle_event(&mut self, evt: StageEvent) {
        match evt {
            StageEvent::Channel { from, payload } => self.handle_channel(from, payload).await,

            StageEvent::Poll { seq, results } => match self.state.apply_poll(seq, &results) {
                PollOutcome::Stale => {}
                PollOutcome::Applied { refetch, changed } => {
                    if let Some(target) = refetch {
                        debug!(?target, "live item changed, re-fetching slides");
                        self.request(FetchRequest::Slides(target)).await;
                    }
                    if changed {
                        self.publish().await;
                    }
                }
            },

            StageEvent::Slides { target, live } => {
                let count = live.slides.len();
                if self.state.apply_slides(&target, live) {
                    info!(
                        "Loaded {} slides for item {:?}",
                        count,
                        self.state.active_item().unwrap_or_default()
                    );
                    self.publish().await;
                }
            }

            StageEvent::FetchFailed { target } => self.state.abandon_fetch(&target),

            StageEvent::LinesNext { amount, reply } => {
                let snapshot = self.feed_lines(amount).await;
                let _ = reply.send(snapshot);
            }

            StageEvent::Shutdown => {}
        }
    }

    async fn handle_channel(&mut self, from: ClientId, payload: String) {
        // Every payload reaches the other pages, handled here or not
        let _ = self.hub_tx.send(HubMessage::Relay {
            from,
            payload: Arc::from(payload.as_str()),
        });

        let decoded = match decode(&payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Dropping channel message from client {}: {}", from, e);
                return;
            }
        };

        match self.state.apply_decoded(&decoded) {
            MessageOutcome::Updated => self.publish().await,
            MessageOutcome::Unchanged => {}
            MessageOutcome::Navigate(direction) => {
                self.request(FetchRequest::Navigate(direction)).await;
            }
            MessageOutcome::ReplyInit => self.reply_init(),
        }
    }

    async fn feed_lines(&mut self, amount: i64) -> LinesSnapshot {
        if let Some(text) = self.state.active_slide_text().map(str::to_string) {
            if self.lines.load(&text, &self.split) {
                debug!("Line feed reloaded: {} lines", self.lines.lines().len());
            }
        }

        if let Some(shown) = self.lines.display_next(amount) {
            let msg = ChannelMessage::Lyrics { value: shown };
            if self.state.apply_message(&msg) == MessageOutcome::Updated {
                self.publish().await;
            }
            match msg.encode() {
                Ok(encoded) => {
                    let _ = self.hub_tx.send(HubMessage::Frame(Arc::from(encoded)));
                }
                Err(e) => warn!("Failed to encode lyrics message: {}", e),
            }
        }

        let snapshot = self.lines.snapshot();
        self.state_manager.set_lines(snapshot.clone()).await;
        snapshot
    }

    fn reply_init(&self) {
        let init = ChannelMessage::Init {
            value: Box::new(self.state.settings().clone()),
        };
        match init.encode() {
            Ok(encoded) => {
                let _ = self.hub_tx.send(HubMessage::Frame(Arc::from(encoded)));
            }
            Err(e) => warn!("Failed to encode init message: {}", e),
        }
    }

    async fn request(&self, req: FetchRequest) {
        if let Err(e) = self.fetch_tx.send(req).await {
            warn!("OpenLP worker is gone, dropping {:?}", e.0);
        }
    }

    async fn publish(&self) {
        self.state_manager.publish(&self.state).await;
        let _ = self.hub_tx.send(HubMessage::ViewUpdated);
    }
}

/// Fixed-rate poll trigger.  Ticks that find the worker queue full are
/// skipped rather than queued.
fn spawn_poll_ticker(
    period: Duration,
    fetch_tx: mpsc::Sender<FetchRequest>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match fetch_tx.try_send(FetchRequest::Poll) {
                Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stage_proto::protocol::Slide;

    struct Harness {
        core: StageCore,
        fetch_rx: mpsc::Receiver<FetchRequest>,
        hub_rx: broadcast::Receiver<HubMessage>,
        state_manager: Arc<StateManager>,
    }

    fn harness() -> Harness {
        let (fetch_tx, fetch_rx) = mpsc::channel(32);
        let (hub_tx, hub_rx) = broadcast::channel(64);
        let state_manager = Arc::new(StateManager::new());
        let core = StageCore::new(&Config::default(), state_manager.clone(), fetch_tx, hub_tx);
        Harness {
            core,
            fetch_rx,
            hub_rx,
            state_manager,
        }
    }

    fn live(item: &str, texts: &[&str]) -> LiveText {
        LiveText {
            item: item.to_string(),
            slides: texts
                .iter()
                .enumerate()
                .map(|(i, t)| Slide {
                    text: Some(t.to_string()),
                    selected: i == 0,
                    ..Slide::default()
                })
                .collect(),
        }
    }

    fn poll(item: &str, service: u64, slide: usize) -> PollResults {
        PollResults {
            item: item.to_string(),
            service,
            slide,
            ..PollResults::default()
        }
    }

    fn drain(rx: &mut mpsc::Receiver<FetchRequest>) -> Vec<FetchRequest> {
        let mut out = Vec::new();
        while let Ok(req) = rx.try_recv() {
            out.push(req);
        }
        out
    }

    fn drain_hub(rx: &mut broadcast::Receiver<HubMessage>) -> Vec<HubMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    async fn started(h: &mut Harness) {
        h.core.start().await;
        assert_eq!(
            drain(&mut h.fetch_rx),
            vec![FetchRequest::Slides(FetchTarget::initial())]
        );
        h.core
            .handle_event(StageEvent::Slides {
                target: FetchTarget::initial(),
                live: live("song-1", &["first verse", "second verse"]),
            })
            .await;
        h.core
            .handle_event(StageEvent::Poll {
                seq: 1,
                results: poll("song-1", 1, 0),
            })
            .await;
        drain_hub(&mut h.hub_rx);
    }

    async fn channel(h: &mut Harness, from: ClientId, payload: &str) {
        h.core
            .handle_event(StageEvent::Channel {
                from,
                payload: payload.to_string(),
            })
            .await;
    }

    #[tokio::test]
    async fn test_slide_change_publishes_without_refetch() {
        let mut h = harness();
        started(&mut h).await;

        h.core
            .handle_event(StageEvent::Poll {
                seq: 2,
                results: poll("song-1", 1, 1),
            })
            .await;

        assert!(drain(&mut h.fetch_rx).is_empty());
        let view = h.state_manager.view().await;
        assert_eq!(view.lyrics.html, "second verse");
        assert!(drain_hub(&mut h.hub_rx)
            .iter()
            .any(|m| matches!(m, HubMessage::ViewUpdated)));
    }

    #[tokio::test]
    async fn test_item_change_requests_slides_once() {
        let mut h = harness();
        started(&mut h).await;

        for seq in 2..6 {
            h.core
                .handle_event(StageEvent::Poll {
                    seq,
                    results: poll("song-2", 1, 0),
                })
                .await;
        }

        let requests = drain(&mut h.fetch_rx);
        assert_eq!(
            requests,
            vec![FetchRequest::Slides(FetchTarget {
                item: Some("song-2".to_string()),
                service: Some(1),
            })]
        );
    }

    #[tokio::test]
    async fn test_failed_fetch_is_requested_again() {
        let mut h = harness();
        started(&mut h).await;
        let target = FetchTarget {
            item: Some("song-2".to_string()),
            service: Some(1),
        };

        h.core
            .handle_event(StageEvent::Poll {
                seq: 2,
                results: poll("song-2", 1, 0),
            })
            .await;
        h.core
            .handle_event(StageEvent::FetchFailed {
                target: target.clone(),
            })
            .await;
        h.core
            .handle_event(StageEvent::Poll {
                seq: 3,
                results: poll("song-2", 1, 0),
            })
            .await;

        assert_eq!(
            drain(&mut h.fetch_rx),
            vec![
                FetchRequest::Slides(target.clone()),
                FetchRequest::Slides(target)
            ]
        );
    }

    #[tokio::test]
    async fn test_stale_poll_is_ignored() {
        let mut h = harness();
        started(&mut h).await;
        h.core
            .handle_event(StageEvent::Poll {
                seq: 5,
                results: poll("song-1", 1, 1),
            })
            .await;
        drain_hub(&mut h.hub_rx);

        h.core
            .handle_event(StageEvent::Poll {
                seq: 4,
                results: poll("song-9", 1, 0),
            })
            .await;

        assert!(drain(&mut h.fetch_rx).is_empty());
        assert!(drain_hub(&mut h.hub_rx).is_empty());
        assert_eq!(h.state_manager.view().await.lyrics.html, "second verse");
    }

    #[tokio::test]
    async fn test_navigation_messages_reach_worker() {
        let mut h = harness();
        started(&mut h).await;

        channel(&mut h, 3, r#"{"type":"nextSlide"}"#).await;
        channel(&mut h, 3, r#"{"type":"previousSlide"}"#).await;

        assert_eq!(
            drain(&mut h.fetch_rx),
            vec![
                FetchRequest::Navigate(Direction::Next),
                FetchRequest::Navigate(Direction::Previous)
            ]
        );
    }

    #[tokio::test]
    async fn test_payloads_are_relayed_even_when_unsupported() {
        let mut h = harness();
        started(&mut h).await;

        channel(&mut h, 7, r#"{"type":"confetti"}"#).await;

        let hub = drain_hub(&mut h.hub_rx);
        assert_eq!(hub.len(), 1);
        match &hub[0] {
            HubMessage::Relay { from, payload } => {
                assert_eq!(*from, 7);
                assert_eq!(&**payload, r#"{"type":"confetti"}"#);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_payload_changes_nothing() {
        let mut h = harness();
        started(&mut h).await;
        let before = h.state_manager.get().await;

        channel(&mut h, 2, "{not json").await;

        let after = h.state_manager.get().await;
        assert_eq!(before.view, after.view);
        assert!(drain(&mut h.fetch_rx).is_empty());
    }

    #[tokio::test]
    async fn test_ready_is_answered_with_init() {
        let mut h = harness();
        started(&mut h).await;
        channel(&mut h, 2, r#"{"type":"maxWidth","value":900}"#).await;
        drain_hub(&mut h.hub_rx);

        channel(&mut h, 2, r#"{"type":"ready"}"#).await;

        let frame = drain_hub(&mut h.hub_rx)
            .into_iter()
            .find_map(|m| match m {
                HubMessage::Frame(f) => Some(f),
                _ => None,
            })
            .expect("init frame");
        match decode(&frame).unwrap() {
            stage_proto::protocol::Decoded::Message(ChannelMessage::Init { value }) => {
                assert_eq!(value.max_width, 900);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop_and_ticker() {
        let Harness {
            core, mut fetch_rx, ..
        } = harness();
        let (event_tx, event_rx) = mpsc::channel(8);
        let handle = tokio::spawn(core.run(event_rx));

        // Startup fetch, then at least one tick
        assert_eq!(
            fetch_rx.recv().await,
            Some(FetchRequest::Slides(FetchTarget::initial()))
        );
        assert_eq!(fetch_rx.recv().await, Some(FetchRequest::Poll));

        event_tx.send(StageEvent::Shutdown).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("core did not stop")
            .unwrap()
            .unwrap();

        // Core and ticker both dropped their senders
        let drained = tokio::time::timeout(Duration::from_secs(2), async {
            while fetch_rx.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok(), "poll ticker still running");
    }

    #[tokio::test]
    async fn test_line_feed_pushes_lyrics() {
        let mut h = harness();
        h.core.start().await;
        h.core
            .handle_event(StageEvent::Slides {
                target: FetchTarget::initial(),
                live: live("song-1", &["line one\nline two\nline three"]),
            })
            .await;
        drain_hub(&mut h.hub_rx);

        let (reply, rx) = oneshot::channel();
        h.core
            .handle_event(StageEvent::LinesNext { amount: 2, reply })
            .await;
        let snapshot = rx.await.unwrap();

        assert_eq!(snapshot.preview, "line one<br>line two<br>");
        assert_eq!(snapshot.remaining, 1);
        assert_eq!(
            h.state_manager.view().await.lyrics.html,
            "line one<br>line two<br>"
        );
        assert!(drain_hub(&mut h.hub_rx)
            .iter()
            .any(|m| matches!(m, HubMessage::Frame(f) if f.contains(r#""type":"lyrics""#))));
        assert_eq!(h.state_manager.lines().await, snapshot);
    }
}
