// WebSocket handler: outbound events and frames, inbound commands

use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use sorter_core::{parse_command, SorterEvent};
use sorter_engine::ControlSurface;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// WebSocket upgrade handler
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("Observer connected");

    let mut events = state.line.subscribe_events();
    let mut frames = state.line.subscribe_frames();
    let greeting = SorterEvent::engine_status(state.line.engine().state());

    // Replies addressed to this observer only
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<SorterEvent>();

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        if send_event(&mut sender, &greeting).await.is_err() {
            return;
        }
        loop {
            let event = tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Observer lagged, {} events skipped", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                changed = frames.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let frame = frames.borrow_and_update().clone();
                    match frame {
                        Some(frame) => frame.into(),
                        None => continue,
                    }
                }
                Some(reply) = reply_rx.recv() => reply,
            };
            if send_event(&mut sender, &event).await.is_err() {
                break;
            }
        }
    });

    let control = state.line.control().clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => handle_message(&control, &text, &reply_tx).await,
                Ok(Message::Binary(_)) => {
                    warn!("Received binary message, ignoring");
                }
                Ok(Message::Close(_)) => {
                    debug!("WebSocket closed by observer");
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    // A command already in flight runs to completion even if the
    // outbound half fails first.
    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => {
            if let Err(e) = recv_task.await {
                error!("WebSocket receive task failed: {}", e);
            }
        }
    }

    info!("Observer disconnected");
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &SorterEvent,
) -> Result<(), axum::Error> {
    let json = match event.to_json() {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize {} event: {}", event.event_type(), e);
            return Ok(());
        }
    };
    sender.send(Message::Text(json)).await.map_err(|e| {
        debug!("Failed to send to observer: {}", e);
        e
    })
}

/// Parse one inbound text frame and hand it to the control surface.
///
/// Malformed messages are answered to the sender only; rejected commands
/// are already announced to every observer by the control surface.
pub async fn handle_message(
    control: &ControlSurface,
    text: &str,
    replies: &mpsc::UnboundedSender<SorterEvent>,
) {
    let command = match parse_command(text) {
        Ok(command) => command,
        Err(e) => {
            warn!("Ignoring malformed command: {}", e);
            let _ = replies.send(SorterEvent::log(format!("Invalid command: {}", e)));
            return;
        }
    };
    if let Err(e) = control.handle(command).await {
        debug!(action = command.action(), "Command failed: {}", e);
    }
}
