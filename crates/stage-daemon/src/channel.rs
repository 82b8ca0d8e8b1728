//! WebSocket side of the broadcast channel.
//!
//! Each connected page gets the current view on connect, then everything
//! the hub carries: payloads from other pages, daemon frames, fresh views
//! and log lines.  Whatever a page sends goes to StageCore.
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use stage_proto::protocol::ServerFrame;
use stage_proto::state::StateManager;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::core::StageEvent;
use crate::http::AppState;
use crate::{ClientId, HubMessage};

pub async fn handle_upgrade(ws: WebSocketUpgrade, State(app): State<AppState>) -> Response {
    let id = app.next_client_id.fetch_add(1, Ordering::Relaxed);
    ws.on_upgrade(move |socket| async move {
        info!("Channel client {} connected to {:?}", id, app.channel_name);
        handle_client(
            socket,
            id,
            app.state_manager.clone(),
            app.event_tx.clone(),
            app.hub_tx.subscribe(),
        )
        .await;
        info!("Channel client {} disconnected", id);
    })
}

async fn handle_client(
    socket: WebSocket,
    client_id: ClientId,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<StageEvent>,
    mut hub_rx: broadcast::Receiver<HubMessage>,
) {
    let (mut sink, mut stream) = socket.split();

    if let Some(text) = view_frame(&state_manager).await {
        if sink.send(Message::Text(text)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(payload))) => {
                        debug!("Client {} sent: {}", client_id, payload);
                        let event = StageEvent::Channel { from: client_id, payload };
                        if event_tx.send(event).await.is_err() {
                            warn!("StageEvent channel closed");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = hub_rx.recv() => {
                let outgoing = match msg {
                    Ok(HubMessage::Relay { from, .. }) if from == client_id => None,
                    Ok(HubMessage::Relay { payload, .. }) | Ok(HubMessage::Frame(payload)) => {
                        Some(payload.to_string())
                    }
                    Ok(HubMessage::ViewUpdated) => view_frame(&state_manager).await,
                    Ok(HubMessage::Log(message)) => ServerFrame::Log { message }.encode().ok(),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} hub messages", client_id, n);
                        view_frame(&state_manager).await
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if let Some(text) = outgoing {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

async fn view_frame(state_manager: &StateManager) -> Option<String> {
    let view = state_manager.view().await;
    match ServerFrame::View(view).encode() {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Failed to encode view: {}", e);
            None
        }
    }
}
