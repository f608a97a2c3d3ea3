//! services/sync_server/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for an editing connection.
//! One loop interleaves client frames with feed events, so the draft is only
//! ever touched from this task.

use crate::web::{
    protocol::{ClientMessage, ServerMessage},
    state::{AppState, EditorSession},
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use std::sync::Arc;
use survey_sync_core::feed::FeedEvent;
use tracing::{debug, error, info, warn};

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

/// What woke the control loop.
enum Incoming {
    Client(Option<Result<Message, axum::Error>>),
    Feed(Option<FeedEvent>),
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>) {
    info!("New editing connection established.");
    let (mut sender, mut receiver) = socket.split();

    // --- 1. Initialization Phase ---
    let token = match receiver.next().await {
        Some(Ok(Message::Text(init_json))) => match serde_json::from_str::<ClientMessage>(&init_json) {
            Ok(ClientMessage::Init { token }) => token,
            _ => {
                error!("First message was not a valid Init message.");
                send_all(
                    &mut sender,
                    vec![ServerMessage::error("The first message must be init.")],
                )
                .await;
                return;
            }
        },
        _ => {
            error!("Client disconnected before sending Init message.");
            return;
        }
    };

    let mut session = EditorSession::new(&app_state, token);
    let subject = match session.start().await {
        Ok(subject) => subject,
        Err(e) => {
            error!("Failed to start editing session: {}", e);
            send_all(
                &mut sender,
                vec![ServerMessage::error(format!("Could not start the session: {}", e))],
            )
            .await;
            return;
        }
    };
    info!("Editing session started for {}", subject);

    let greeting = vec![
        ServerMessage::session_initialized(subject),
        ServerMessage::draft(session.draft()),
    ];
    if !send_all(&mut sender, greeting).await {
        session.close();
        return;
    }

    // --- 2. Main Message Loop ---
    loop {
        let incoming = tokio::select! {
            frame = receiver.next() => Incoming::Client(frame),
            event = session.next_feed_event() => Incoming::Feed(event),
        };

        let replies = match incoming {
            Incoming::Feed(event) => session.apply_feed_event(event),
            Incoming::Client(Some(Ok(Message::Text(text)))) => {
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) => handle_client_message(&mut session, msg).await,
                    Err(e) => {
                        warn!("Failed to deserialize client message: {}", e);
                        vec![ServerMessage::error(format!("Unrecognized message: {}", e))]
                    }
                }
            }
            Incoming::Client(Some(Ok(Message::Close(_)))) => {
                info!("Client sent close message.");
                break;
            }
            Incoming::Client(Some(Ok(_))) => continue,
            Incoming::Client(Some(Err(e))) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
            Incoming::Client(None) => {
                info!("Client disconnected.");
                break;
            }
        };

        if !send_all(&mut sender, replies).await {
            break;
        }
    }

    // --- 3. Cleanup ---
    session.close();
    info!("Editing connection closed.");
}

/// Applies one client message to the session and returns the frames to send back.
pub async fn handle_client_message(
    session: &mut EditorSession,
    msg: ClientMessage,
) -> Vec<ServerMessage> {
    match msg {
        ClientMessage::Init { .. } => {
            warn!("Received subsequent Init message, which is ignored.");
            Vec::new()
        }
        ClientMessage::Reset => {
            session.draft_mut().reset();
            vec![ServerMessage::draft(session.draft())]
        }
        ClientMessage::Load { project_id } => match session.load(&project_id).await {
            Ok(()) => vec![ServerMessage::draft(session.draft())],
            Err(e) => {
                warn!("Could not open project {}: {}", project_id, e);
                vec![ServerMessage::error(format!("Could not open project {}: {}", project_id, e))]
            }
        },
        ClientMessage::SetTitle { text } => {
            session.draft_mut().set_title(text);
            vec![ServerMessage::draft(session.draft())]
        }
        ClientMessage::AddRow { list } => {
            let id = session.draft_mut().add_row(list);
            debug!("Added row {} to {:?}", id, list);
            vec![ServerMessage::draft(session.draft())]
        }
        ClientMessage::RemoveRow { list, row_id } => {
            if session.draft_mut().remove_row(list, row_id) {
                vec![ServerMessage::draft(session.draft())]
            } else {
                vec![ServerMessage::error(format!("Row {} not found", row_id))]
            }
        }
        ClientMessage::UpdateRow {
            list,
            row_id,
            field,
            value,
        } => {
            if session.draft_mut().update_row(list, row_id, field, value) {
                vec![ServerMessage::draft(session.draft())]
            } else {
                vec![ServerMessage::error(format!("Row {} not found", row_id))]
            }
        }
        ClientMessage::Save => match session.save().await {
            Ok(project_id) => vec![
                ServerMessage::Saved { project_id },
                ServerMessage::draft(session.draft()),
            ],
            Err(e) => vec![ServerMessage::error(e.to_string())],
        },
        ClientMessage::Delete { project_id } => match session.delete(&project_id).await {
            Ok(()) => vec![
                ServerMessage::Deleted { project_id },
                ServerMessage::draft(session.draft()),
            ],
            Err(e) => vec![ServerMessage::error(e.to_string())],
        },
        ClientMessage::Resubscribe => match session.resubscribe().await {
            Ok(()) => Vec::new(),
            Err(e) => vec![ServerMessage::error(format!("Could not resubscribe: {}", e))],
        },
    }
}

/// Sends every message in order. Returns `false` once the client is gone.
async fn send_all(sender: &mut SplitSink<WebSocket, Message>, messages: Vec<ServerMessage>) -> bool {
    for message in messages {
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize server message: {}", e);
                continue;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            error!("Failed to send message; client is gone.");
            return false;
        }
    }
    true
}
