//! WebSocket transport for shell clients.

use axum::{
    Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use embedded_shell_session::Dispatcher;
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::protocol::{ClientMessage, ServerMessage};

/// Per-connection state.
#[derive(Debug)]
pub struct Connection {
    session_id: String,
    opened: bool,
    relays: Vec<JoinHandle<()>>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    /// A connection with a generated session id, not yet opened in the store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            opened: false,
            relays: Vec::new(),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Stop relaying output to this connection.
    pub fn close(&mut self) {
        for relay in self.relays.drain(..) {
            relay.abort();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Apply one client message. Replies and relayed frames go to `tx`.
pub async fn handle_client_message(
    dispatcher: &Dispatcher,
    connection: &mut Connection,
    message: ClientMessage,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    connection.relays.retain(|relay| !relay.is_finished());
    match message {
        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong);
        }
        ClientMessage::OpenSession { session_id } => {
            match dispatcher.open_session(&session_id).await {
                Ok(_) => {
                    connection.session_id = session_id.clone();
                    connection.opened = true;
                    let _ = tx.send(ServerMessage::SessionOpened { session_id });
                }
                Err(e) => {
                    let _ = tx.send(ServerMessage::from_dispatch_error(&e));
                }
            }
        }
        ClientMessage::Execute { line } => {
            if !connection.opened {
                match dispatcher.open_session(&connection.session_id).await {
                    Ok(_) => {
                        connection.opened = true;
                        let _ = tx.send(ServerMessage::SessionOpened {
                            session_id: connection.session_id.clone(),
                        });
                    }
                    Err(e) => {
                        let _ = tx.send(ServerMessage::from_dispatch_error(&e));
                        return;
                    }
                }
            }
            match dispatcher.dispatch(&connection.session_id, &line).await {
                Ok(handle) => {
                    let invocation_id = handle.invocation_id();
                    let _ = tx.send(ServerMessage::Started {
                        invocation_id,
                        command: handle.context().command().to_string(),
                    });
                    let mut frames = handle.frames();
                    let tx = tx.clone();
                    connection.relays.push(tokio::spawn(async move {
                        while let Some(frame) = frames.next().await {
                            if tx
                                .send(ServerMessage::from_frame(invocation_id, frame))
                                .is_err()
                            {
                                break;
                            }
                        }
                    }));
                }
                Err(e) => {
                    tracing::debug!(session_id = %connection.session_id, error = %e, "command rejected");
                    let _ = tx.send(ServerMessage::from_dispatch_error(&e));
                }
            }
        }
        ClientMessage::Interrupt { invocation_id } => {
            if !dispatcher.interrupt(invocation_id).await {
                let _ = tx.send(ServerMessage::error(
                    "interrupt_rejected",
                    format!("Invocation {invocation_id} cannot be interrupted"),
                ));
            }
        }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(dispatcher): State<Dispatcher>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, dispatcher))
}

async fn handle_socket(socket: WebSocket, dispatcher: Dispatcher) {
    let (mut sender, mut receiver) = socket.split();
    let mut connection = Connection::new();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                let _ = tx.send(ServerMessage::error(
                    "invalid_message",
                    format!("Invalid message: {e}"),
                ));
                continue;
            }
        };

        handle_client_message(&dispatcher, &mut connection, client_msg, &tx).await;
    }

    connection.close();
    send_task.abort();
    tracing::info!(session_id = %connection.session_id(), "WebSocket disconnected");
}

async fn help_handler(State(dispatcher): State<Dispatcher>) -> impl IntoResponse {
    help_response(&dispatcher, None)
}

async fn command_help_handler(
    State(dispatcher): State<Dispatcher>,
    Path(command): Path<String>,
) -> impl IntoResponse {
    help_response(&dispatcher, Some(&command))
}

fn help_response(dispatcher: &Dispatcher, key: Option<&str>) -> (StatusCode, String) {
    match dispatcher.help(key) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => (StatusCode::NOT_FOUND, e.to_string()),
    }
}

/// Create the shell router: `/ws` for sessions, `/help` and `/help/{command}`
/// for plain-text help.
#[must_use]
pub fn create_ws_router(dispatcher: Dispatcher) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/help", get(help_handler))
        .route("/help/{command}", get(command_help_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}
