//! WebSocket upgrade handler

use std::borrow::Cow;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::{AppState, ConnectionStats};
use crate::session::{ConnectionId, Inbound, Outbound};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::codec::{decode_client_msg, encode_server_msg, ProtocolError};

/// WebSocket upgrade handler. Bots and controllers share the endpoint and
/// identify themselves with their first message.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    info!(conn_id = %conn_id, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    state.connections.insert(conn_id, ConnectionStats::new());
    if !state.server.send(Inbound::Connected {
        conn_id,
        outbound: outbound_tx,
    }) {
        warn!(conn_id = %conn_id, "Game server stopped, dropping connection");
        state.connections.remove(&conn_id);
        return;
    }

    run_session(conn_id, &state, ws_sink, ws_stream, outbound_rx).await;

    state.connections.remove(&conn_id);
    state.server.send(Inbound::Disconnected { conn_id });
    info!(conn_id = %conn_id, "WebSocket connection closed");
}

/// Pump frames both ways until either side closes
async fn run_session(
    conn_id: ConnectionId,
    state: &AppState,
    ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    let rate_limiter = ConnectionRateLimiter::new();
    let mut writer = tokio::spawn(write_loop(conn_id, ws_sink, outbound_rx));

    loop {
        tokio::select! {
            // Writer finished: the server closed us or the socket failed
            _ = &mut writer => break,
            frame = ws_stream.next() => {
                let Some(frame) = frame else {
                    debug!(conn_id = %conn_id, "WebSocket stream ended");
                    break;
                };
                let inbound = match frame {
                    Ok(Message::Text(text)) => {
                        let allowed = rate_limiter.check();
                        state.record_message(conn_id, !allowed);
                        if !allowed {
                            warn!(conn_id = %conn_id, "Rate limited inbound message");
                            continue;
                        }
                        match decode_client_msg(&text) {
                            Ok(msg) => Inbound::Message { conn_id, msg },
                            Err(error) => Inbound::Malformed { conn_id, error },
                        }
                    }
                    Ok(Message::Binary(_)) => Inbound::Malformed {
                        conn_id,
                        error: ProtocolError::BinaryFrame,
                    },
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                    Ok(Message::Close(frame)) => {
                        info!(
                            conn_id = %conn_id,
                            code = frame.as_ref().map(|f| f.code),
                            "Client initiated close"
                        );
                        break;
                    }
                    Err(e) => {
                        error!(conn_id = %conn_id, error = %e, "WebSocket error");
                        break;
                    }
                };

                if !state.server.send(inbound) {
                    debug!(conn_id = %conn_id, "Game server gone");
                    break;
                }
            }
        }
    }

    writer.abort();
}

/// Forward server frames to the socket. Ends after a close frame.
async fn write_loop(
    conn_id: ConnectionId,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(frame) = outbound_rx.recv().await {
        let message = match frame {
            Outbound::Message(msg) => match encode_server_msg(&msg) {
                Ok(json) => Message::Text(json),
                Err(e) => {
                    error!(conn_id = %conn_id, error = %e, "Failed to encode server message");
                    continue;
                }
            },
            Outbound::Close { code, reason } => {
                debug!(conn_id = %conn_id, code, %reason, "Closing WebSocket");
                let close = Message::Close(Some(CloseFrame {
                    code,
                    reason: Cow::Owned(reason),
                }));
                if let Err(e) = ws_sink.send(close).await {
                    debug!(conn_id = %conn_id, error = %e, "Close frame not delivered");
                }
                break;
            }
        };

        if let Err(e) = ws_sink.send(message).await {
            debug!(conn_id = %conn_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}
