//! OpenLP remote API client and the worker that runs requests for StageCore.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use stage_proto::protocol::{LiveText, PollResults};
use stage_proto::state::Direction;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::{FetchRequest, StageEvent};

#[derive(Debug, thiserror::Error)]
pub enum OpenLpError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("invalid response from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Every OpenLP endpoint wraps its payload in `{"results": ...}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    results: T,
}

#[derive(Clone)]
pub struct OpenLpClient {
    client: reqwest::Client,
    base_url: String,
}

impl OpenLpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, OpenLpError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(OpenLpError::Build)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn poll(&self) -> Result<PollResults, OpenLpError> {
        self.get_results("/api/poll").await
    }

    pub async fn live_text(&self) -> Result<LiveText, OpenLpError> {
        self.get_results("/api/controller/live/text").await
    }

    pub async fn navigate(&self, direction: Direction) -> Result<(), OpenLpError> {
        let path = match direction {
            Direction::Next => "/api/controller/live/next",
            Direction::Previous => "/api/controller/live/previous",
        };
        self.get(path).await.map(|_| ())
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, OpenLpError> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|source| OpenLpError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OpenLpError::Status { url, status });
        }
        Ok(response)
    }

    async fn get_results<T: DeserializeOwned>(&self, path: &str) -> Result<T, OpenLpError> {
        let response = self.get(path).await?;
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|source| OpenLpError::Body {
                url: self.url(path),
                source,
            })?;
        Ok(envelope.results)
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

/// Shared between the per-request tasks the worker spawns.
#[derive(Clone)]
struct WorkerShared {
    client: OpenLpClient,
    event_tx: mpsc::Sender<StageEvent>,
    poll_seq: Arc<AtomicU64>,
    reachable: Arc<AtomicBool>,
}

/// Run OpenLP requests as they arrive.  Each request gets its own task, so a
/// slow response never delays the next poll; StageCore's sequence check
/// sorts out responses that overtake each other.
pub fn start_worker(
    client: OpenLpClient,
    mut fetch_rx: mpsc::Receiver<FetchRequest>,
    event_tx: mpsc::Sender<StageEvent>,
) -> tokio::task::JoinHandle<()> {
    let shared = WorkerShared {
        client,
        event_tx,
        poll_seq: Arc::new(AtomicU64::new(0)),
        reachable: Arc::new(AtomicBool::new(true)),
    };

    tokio::spawn(async move {
        while let Some(req) = fetch_rx.recv().await {
            let shared = shared.clone();
            match req {
                FetchRequest::Poll => {
                    tokio::spawn(async move { shared.poll_once().await });
                }
                FetchRequest::Slides(target) => {
                    tokio::spawn(async move {
                        let event = match shared.client.live_text().await {
                            Ok(live) => StageEvent::Slides { target, live },
                            Err(e) => {
                                warn!("Fetching live slides failed: {}", e);
                                StageEvent::FetchFailed { target }
                            }
                        };
                        let _ = shared.event_tx.send(event).await;
                    });
                }
                FetchRequest::Navigate(direction) => {
                    tokio::spawn(async move {
                        info!("Moving live slide: {:?}", direction);
                        if let Err(e) = shared.client.navigate(direction).await {
                            warn!("Slide navigation failed: {}", e);
                        }
                        shared.poll_once().await;
                    });
                }
            }
        }
        debug!("OpenLP worker: request channel closed");
    })
}

impl WorkerShared {
    async fn poll_once(&self) {
        // Numbered when issued, not when answered
        let seq = self.poll_seq.fetch_add(1, Ordering::SeqCst) + 1;
        match self.client.poll().await {
            Ok(results) => {
                if !self.reachable.swap(true, Ordering::Relaxed) {
                    info!("OpenLP is reachable again at {}", self.client.base_url());
                }
                let _ = self.event_tx.send(StageEvent::Poll { seq, results }).await;
            }
            Err(e) => {
                // Only the first failure of an outage is worth a warning
                if self.reachable.swap(false, Ordering::Relaxed) {
                    warn!("OpenLP poll failed: {}", e);
                } else {
                    debug!("OpenLP poll failed: {}", e);
                }
            }
        }
    }
}
