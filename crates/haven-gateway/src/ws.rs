//! The streaming client channel: JSON text frames over WebSocket.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use haven_core::config::{MAX_PAYLOAD_BYTES, WS_IDLE_TIMEOUT_SECS};
use haven_core::types::{RequestId, SessionId};
use haven_guard::LimitKind;
use haven_protocol::{ClientFrame, ClientFrameBody, ServerFrame, ServerFrameBody};

use crate::app::AppState;
use crate::pipeline;

type WsSink = futures_util::stream::SplitSink<WebSocket, Message>;

/// Axum handler — upgrades HTTP to WebSocket at GET /ws.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_connection(socket, state))
}

/// Per-connection task — lives for the entire WS session lifetime.
async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "new WS connection");

    let (mut tx, mut rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(32);
    state.ws_clients.insert(conn_id.clone(), out_tx);

    // The session this connection is bound to via the init frame.
    let mut bound: Option<SessionId> = None;
    let mut last_activity = Instant::now();
    let mut idle_check = tokio::time::interval(Duration::from_secs(30));
    idle_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        let text_ref: &str = &text;
                        if text_ref.len() > MAX_PAYLOAD_BYTES {
                            warn!(conn_id, size = text_ref.len(), "payload too large, closing");
                            break;
                        }
                        handle_frame(&conn_id, text_ref, &mut bound, &mut tx, &state).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(conn_id, error = %e, "WS receive error");
                        break;
                    }
                    _ => {}
                }
            }

            // Server-initiated notifications pushed to this client.
            pushed = out_rx.recv() => {
                match pushed {
                    Some(payload) => {
                        if tx.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = idle_check.tick() => {
                if last_activity.elapsed() > Duration::from_secs(WS_IDLE_TIMEOUT_SECS) {
                    info!(conn_id, "idle timeout, closing connection");
                    break;
                }
            }
        }
    }

    state.ws_clients.remove(&conn_id);
    info!(conn_id, "WS connection closed");
}

/// Process one inbound text frame.
async fn handle_frame(
    conn_id: &str,
    text: &str,
    bound: &mut Option<SessionId>,
    tx: &mut WsSink,
    state: &Arc<AppState>,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(conn_id, error = %e, "malformed frame");
            let res = ServerFrame::error("INVALID_REQUEST_FORMAT", "malformed frame", None);
            let _ = send_json(tx, &res).await;
            return;
        }
    };
    let correlation = frame.correlation_id.clone();

    match frame.body {
        ClientFrameBody::Init { session, .. } => {
            let session_id = SessionId::from(session.as_str());
            let actor = state.sessions.actor(&session_id);
            match actor.status().await {
                Ok(record) => {
                    *bound = Some(session_id);
                    let res = ServerFrame::new(
                        ServerFrameBody::SystemNotification {
                            level: "info".to_string(),
                            message: format!("session bound ({})", record.status),
                        },
                        correlation,
                    );
                    let _ = send_json(tx, &res).await;
                }
                Err(e) => {
                    let err: haven_core::HavenError = e.into();
                    let res = error_frame(&err, correlation);
                    let _ = send_json(tx, &res).await;
                }
            }
        }

        ClientFrameBody::ChatMessage { session, content, .. } => {
            let session_id = bound
                .clone()
                .unwrap_or_else(|| SessionId::from(session.as_str()));
            let request_id = RequestId::new();

            let typing = ServerFrame::new(
                ServerFrameBody::AiTyping {
                    session: session_id.to_string(),
                    is_typing: true,
                },
                None,
            );
            let _ = send_json(tx, &typing).await;

            let outcome = pipeline::handle_chat(
                state,
                &session_id,
                &content,
                LimitKind::WebsocketMsg,
                &request_id,
            )
            .await;

            let response = match outcome {
                Ok(outcome) => ServerFrame::new(
                    ServerFrameBody::AiResponse {
                        session: session_id.to_string(),
                        content: outcome.content,
                        message_id: outcome.message_id,
                        tool_calls: (!outcome.tool_calls.is_empty())
                            .then_some(outcome.tool_calls),
                        metadata: serde_json::json!({
                            "model": outcome.model,
                            "fallback_used": outcome.fallback_used,
                            "request_id": request_id,
                        }),
                    },
                    correlation,
                ),
                Err(e) => error_frame(&e, correlation),
            };
            let _ = send_json(tx, &response).await;

            let typing_off = ServerFrame::new(
                ServerFrameBody::AiTyping {
                    session: session_id.to_string(),
                    is_typing: false,
                },
                None,
            );
            let _ = send_json(tx, &typing_off).await;
        }

        ClientFrameBody::VoiceInput { session, duration_ms, .. } => {
            let session_id = bound
                .clone()
                .unwrap_or_else(|| SessionId::from(session.as_str()));
            // Voice input still counts against its own window even though
            // transcription is not wired up in this deployment.
            let limited = state
                .gate
                .limiter()
                .check(session_id.as_str(), LimitKind::VoiceInput)
                .await;
            let res = match limited {
                Err(guard_err) => {
                    let err: haven_core::HavenError = guard_err.into();
                    error_frame(&err, correlation)
                }
                Ok(_) => {
                    debug!(conn_id, duration_ms, "voice input received, no transcriber");
                    ServerFrame::error(
                        "AI_SERVICE_UNAVAILABLE",
                        "voice transcription is not available on this deployment",
                        None,
                    )
                }
            };
            let _ = send_json(tx, &res).await;
        }

        ClientFrameBody::Typing { session, is_typing } => {
            debug!(conn_id, session = %session, is_typing, "client typing state");
        }

        ClientFrameBody::Ping => {
            let _ = send_json(tx, &ServerFrame::pong(correlation)).await;
        }
    }
}

fn error_frame(e: &haven_core::HavenError, correlation: Option<String>) -> ServerFrame {
    let mut frame = ServerFrame::error(e.code(), &e.to_string(), e.retry_after_ms());
    frame.correlation_id = correlation;
    frame
}

/// Serialize and send a frame over the WS sink.
async fn send_json<T: serde::Serialize>(tx: &mut WsSink, payload: &T) -> Result<(), axum::Error> {
    let json = serde_json::to_string(payload).unwrap_or_default();
    tx.send(Message::Text(json.into()))
        .await
        .map_err(axum::Error::new)
}
