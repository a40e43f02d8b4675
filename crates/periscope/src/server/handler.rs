//! WebSocket Connection Handler
//!
//! Drives one remote-app connection: registers the session, pumps
//! outbound envelopes, and routes inbound frames into the session.

use std::collections::HashSet;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use periscope_types::{AppQuery, Envelope};

use super::AppState;
use super::protocol::{self, WireMessage};
use crate::session::Session;
use crate::types::Error;

/// Handshake parameters carried on the `/ws` URL query string
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectQuery {
    pub app: String,
    pub os: String,
    pub device: String,
    pub device_id: String,
    #[serde(default)]
    pub sdk_version: u32,
    /// Optional comma-separated plugin ids the app supports
    #[serde(default)]
    pub plugins: Option<String>,
}

impl ConnectQuery {
    pub fn app_query(&self) -> AppQuery {
        AppQuery {
            app: self.app.clone(),
            os: self.os.clone(),
            device: self.device.clone(),
            device_id: self.device_id.clone(),
            sdk_version: self.sdk_version,
        }
    }

    pub fn supported_plugins(&self) -> HashSet<String> {
        self.plugins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Handle a WebSocket connection for its whole lifetime
pub async fn handle_websocket(socket: WebSocket, state: AppState, query: ConnectQuery) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Outbound paths: plugin envelopes and host-generated error frames.
    let (envelope_tx, mut envelope_rx) = mpsc::channel::<Envelope>(64);
    let (frame_tx, mut frame_rx) = mpsc::channel::<String>(16);

    let session = state
        .store
        .register_session(query.app_query(), query.supported_plugins(), envelope_tx);
    let session_id = session.id();

    // Forward outbound traffic to the socket.
    let send_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                Some(envelope) = envelope_rx.recv() => {
                    match protocol::execute_frame(&envelope) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(session_id = %session_id, error = %e, "dropping unserializable envelope");
                            continue;
                        }
                    }
                }
                Some(frame) = frame_rx.recv() => frame,
                else => break,
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Process inbound frames.
    let recv_session = session.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_frame(&recv_session, &text, &frame_tx).await;
                }
                Message::Close(_) => break,
                Message::Ping(_) => {
                    tracing::trace!(session_id = %recv_session.id(), "ping");
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    state.store.session_disconnected(session_id).await;
}

/// Route one inbound text frame into the session
async fn handle_frame(session: &Session, text: &str, frame_tx: &mpsc::Sender<String>) {
    match protocol::parse_frame(text) {
        Ok(WireMessage::Execute { envelope }) => {
            if let Err(e) = session.receive(envelope) {
                reply_error(session, frame_tx, &e).await;
            }
        }
        Ok(WireMessage::Report { error }) => {
            tracing::error!(
                session_id = %session.id(),
                app = %session.query().app,
                payload = %error,
                "remote app reported an error"
            );
        }
        Err(e) => reply_error(session, frame_tx, &e).await,
    }
}

async fn reply_error(session: &Session, frame_tx: &mpsc::Sender<String>, error: &Error) {
    tracing::warn!(session_id = %session.id(), error = %error, "rejected inbound frame");
    let _ = frame_tx.send(protocol::error_frame(&error.to_string())).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_plugins_parsing() {
        let query = ConnectQuery {
            app: "com.shop".into(),
            os: "android".into(),
            device: "Pixel 8".into(),
            device_id: "SER-1".into(),
            sdk_version: 4,
            plugins: Some("logs, db,,inspector".into()),
        };
        let supported = query.supported_plugins();
        assert_eq!(supported.len(), 3);
        assert!(supported.contains("logs"));
        assert!(supported.contains("db"));
        assert!(supported.contains("inspector"));

        let query = ConnectQuery { plugins: None, ..query };
        assert!(query.supported_plugins().is_empty());
    }
}
