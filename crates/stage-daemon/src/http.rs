//! HTTP surface: the two pages, the `/channel` WebSocket, and a small JSON
//! API for scripts that would rather not hold a socket open.
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use stage_proto::protocol::decode;
use stage_proto::state::{Published, StateManager};
use tokio::sync::{broadcast, mpsc, oneshot};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

use crate::core::StageEvent;
use crate::{channel, HubMessage, SERVER_CLIENT_ID};

const STAGE_PAGE: &str = include_str!("../assets/stage.html");
const CONTROL_PAGE: &str = include_str!("../assets/control.html");

#[derive(Clone)]
pub struct AppState {
    pub state_manager: Arc<StateManager>,
    pub event_tx: mpsc::Sender<StageEvent>,
    pub hub_tx: broadcast::Sender<HubMessage>,
    pub next_client_id: Arc<AtomicUsize>,
    pub channel_name: Arc<str>,
}

impl AppState {
    pub fn new(
        state_manager: Arc<StateManager>,
        event_tx: mpsc::Sender<StageEvent>,
        hub_tx: broadcast::Sender<HubMessage>,
        channel_name: &str,
    ) -> Self {
        Self {
            state_manager,
            event_tx,
            hub_tx,
            // 0 is reserved for payloads posted over HTTP
            next_client_id: Arc::new(AtomicUsize::new(SERVER_CLIENT_ID + 1)),
            channel_name: Arc::from(channel_name),
        }
    }
}

pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::temporary("/control") }))
        .route("/stage", get(|| async { Html(STAGE_PAGE) }))
        .route("/control", get(|| async { Html(CONTROL_PAGE) }))
        .route("/channel", get(channel::handle_upgrade))
        .route("/api/state", get(get_state))
        .route("/api/view", get(get_view))
        .route("/api/message", post(post_message))
        .route("/api/lines", get(get_lines))
        .route("/api/lines/next/:amount", post(lines_next))
        .layer(CorsLayer::permissive())
        .with_state(app)
}

pub fn start_server(bind_address: String, port: u16, app: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP socket {}: {}", addr, e);
                return;
            }
        };

        info!("Stage display at http://{}/stage", addr);
        info!("Control panel at http://{}/control", addr);

        if let Err(e) = axum::serve(listener, router(app)).await {
            error!("HTTP server stopped: {}", e);
        }
    })
}

#[derive(Serialize)]
struct StateResponse {
    channel: Arc<str>,
    #[serde(flatten)]
    published: Published,
}

async fn get_state(State(app): State<AppState>) -> Json<StateResponse> {
    Json(StateResponse {
        channel: app.channel_name.clone(),
        published: app.state_manager.get().await,
    })
}

async fn get_view(State(app): State<AppState>) -> impl IntoResponse {
    Json(app.state_manager.view().await)
}

async fn get_lines(State(app): State<AppState>) -> impl IntoResponse {
    Json(app.state_manager.lines().await)
}

/// Post a channel payload as if a page had sent it.  Unknown types are
/// still relayed; only payloads that cannot be decoded at all are refused.
async fn post_message(State(app): State<AppState>, body: String) -> Response {
    if let Err(e) = decode(&body) {
        debug!("Rejected posted message: {}", e);
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }
    let event = StageEvent::Channel {
        from: SERVER_CLIENT_ID,
        payload: body,
    };
    match app.event_tx.send(event).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn lines_next(State(app): State<AppState>, Path(amount): Path<i64>) -> Response {
    let (reply, rx) = oneshot::channel();
    if app
        .event_tx
        .send(StageEvent::LinesNext { amount, reply })
        .await
        .is_err()
    {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    match rx.await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use stage_proto::lines::LinesSnapshot;
    use tower::ServiceExt;

    fn app() -> (AppState, mpsc::Receiver<StageEvent>) {
        let (event_tx, event_rx) = mpsc::channel(8);
        let (hub_tx, _) = broadcast::channel(8);
        let app = AppState::new(
            Arc::new(StateManager::new()),
            event_tx,
            hub_tx,
            "obs_openlp_channel",
        );
        (app, event_rx)
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_redirects_to_control() {
        let (app, _rx) = app();
        let resp = router(app)
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(resp.headers()["location"], "/control");
    }

    #[tokio::test]
    async fn test_pages_are_served() {
        let (app, _rx) = app();
        for path in ["/stage", "/control"] {
            let resp = router(app.clone())
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            assert!(String::from_utf8_lossy(&bytes).contains("/channel"));
        }
    }

    #[tokio::test]
    async fn test_state_includes_channel_name() {
        let (app, _rx) = app();
        let resp = router(app)
            .oneshot(Request::get("/api/state").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["channel"], "obs_openlp_channel");
        assert_eq!(json["settings"]["hideOnBlank"], true);
        assert!(json["view"]["lyrics"].is_object());
    }

    #[tokio::test]
    async fn test_posted_message_reaches_core() {
        let (app, mut rx) = app();
        let resp = router(app)
            .oneshot(post("/api/message", r#"{"type":"maxWidth","value":800}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        match rx.recv().await.unwrap() {
            StageEvent::Channel { from, payload } => {
                assert_eq!(from, SERVER_CLIENT_ID);
                assert!(payload.contains("maxWidth"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_message_is_rejected() {
        let (app, mut rx) = app();
        let resp = router(app)
            .oneshot(post("/api/message", r#"{"value":1}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_lines_next_returns_snapshot() {
        let (app, mut rx) = app();
        tokio::spawn(async move {
            if let Some(StageEvent::LinesNext { amount, reply }) = rx.recv().await {
                let _ = reply.send(LinesSnapshot {
                    preview: format!("fed {}", amount),
                    history: Vec::new(),
                    remaining: 0,
                });
            }
        });

        let resp = router(app)
            .oneshot(post("/api/lines/next/2", ""))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["preview"], "fed 2");
    }
}
