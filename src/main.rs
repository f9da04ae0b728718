mod config;
mod room;
mod types;

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{HeaderValue, Method};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, Mutex};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;

use crate::config::{ServerConfig, Tuning};
use crate::room::{Registry, RoomCommand, RoomEvent, RoomHandle};
use crate::types::*;

#[derive(Clone)]
struct AppState {
    registry: Arc<Registry>,
    tuning: Tuning,
}

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let sender: WsSender = Arc::new(Mutex::new(sender));

    let socket_id = uuid::Uuid::new_v4().to_string();
    tracing::info!("WebSocket connected: {}", socket_id);

    // The room this socket is in, plus the task forwarding that room's
    // events down this socket.
    let mut current_room: Option<RoomHandle> = None;
    let mut forward_task: Option<tokio::task::JoinHandle<()>> = None;

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };

        let client_msg: ClientMsg = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid message: {}", e);
                continue;
            }
        };

        match client_msg {
            ClientMsg::CreateRoom => {
                let handle = room::create_room(
                    state.registry.clone(),
                    socket_id.clone(),
                    state.tuning.clone(),
                );
                subscribe_room(&handle, &sender, &socket_id, &mut forward_task);
                send_msg(
                    &sender,
                    &ServerMsg::RoomCreated {
                        code: handle.code.clone(),
                    },
                )
                .await;
                current_room = Some(handle);
            }

            ClientMsg::JoinRoom { code } => {
                if let Some(handle) = state.registry.get(&code) {
                    // Subscribe before Join so the snapshot replies are
                    // not missed.
                    subscribe_room(&handle, &sender, &socket_id, &mut forward_task);
                    let _ = handle
                        .cmd_tx
                        .send(RoomCommand::Join {
                            socket_id: socket_id.clone(),
                        })
                        .await;
                    current_room = Some(handle);
                } else {
                    send_msg(&sender, &ServerMsg::RoomNotFound).await;
                }
            }

            ClientMsg::SetGameMode { mode } => {
                if let Some(handle) = &current_room {
                    let _ = handle
                        .cmd_tx
                        .send(RoomCommand::SetMode {
                            socket_id: socket_id.clone(),
                            mode,
                        })
                        .await;
                }
            }

            ClientMsg::ChoosePlayer {
                player,
                screen_height,
                basket_y,
            } => {
                if let Some(handle) = &current_room {
                    let _ = handle
                        .cmd_tx
                        .send(RoomCommand::ChoosePlayer {
                            socket_id: socket_id.clone(),
                            slot: player,
                            screen_height,
                            basket_y,
                        })
                        .await;
                }
            }

            ClientMsg::Move {
                player,
                x,
                y,
                screen_height,
            } => {
                if let Some(handle) = &current_room {
                    let _ = handle
                        .cmd_tx
                        .send(RoomCommand::Move {
                            socket_id: socket_id.clone(),
                            slot: player,
                            x,
                            y,
                            screen_height,
                        })
                        .await;
                }
            }

            ClientMsg::TimeUp => {
                if let Some(handle) = &current_room {
                    let _ = handle.cmd_tx.send(RoomCommand::TimeUp).await;
                }
            }
        }
    }

    // Socket disconnected
    tracing::info!("WebSocket disconnected: {}", socket_id);
    if let Some(task) = forward_task.take() {
        task.abort();
    }
    if let Some(handle) = current_room {
        let _ = handle
            .cmd_tx
            .send(RoomCommand::Disconnect { socket_id })
            .await;
    }
}

/// Subscribe this socket to a room's event stream, replacing any previous
/// subscription.
fn subscribe_room(
    handle: &RoomHandle,
    sender: &WsSender,
    socket_id: &str,
    forward_task: &mut Option<tokio::task::JoinHandle<()>>,
) {
    if let Some(task) = forward_task.take() {
        task.abort();
    }

    let mut event_rx = handle.event_tx.subscribe();
    let sender = sender.clone();
    let socket_id = socket_id.to_string();

    *forward_task = Some(tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    let msg = match &event {
                        RoomEvent::SendTo {
                            socket_id: target,
                            msg,
                        } if *target == socket_id => msg,
                        RoomEvent::Broadcast { msg } => msg,
                        RoomEvent::BroadcastExcept { exclude, msg } if *exclude != socket_id => msg,
                        _ => continue,
                    };

                    if let Ok(json) = serde_json::to_string(msg) {
                        let mut s = sender.lock().await;
                        if s.send(Message::Text(json.into())).await.is_err() {
                            return;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Socket {} lagged {} room events", socket_id, n);
                }
                // Room torn down; the socket may join another.
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }));
}

async fn send_msg(sender: &WsSender, msg: &ServerMsg) {
    if let Ok(json) = serde_json::to_string(msg) {
        let mut s = sender.lock().await;
        let _ = s.send(Message::Text(json.into())).await;
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env();

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST]);

    let state = AppState {
        registry: Registry::new(),
        tuning: Tuning::default(),
    };

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .fallback_service(ServeDir::new("static"))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("Failed to bind");

    tracing::info!("Heartdrop server running on port {}", config.port);

    axum::serve(listener, app).await.unwrap();
}
