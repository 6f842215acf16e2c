//! Low-latency overlay control over WebSocket.
//!
//! The socket accepts the same overlay operations as the REST surface as
//! JSON messages and answers each with an `{ok, ...}` envelope, sparing
//! graphics operators a request round-trip per keystroke.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::mixer::overlay::{CreateElement, OverlayKind};

use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum OverlayCommand {
    Create {
        #[serde(flatten)]
        element: CreateElement,
    },
    Update {
        id: String,
        #[serde(flatten)]
        kind: OverlayKind,
    },
    Show { id: String },
    Hide { id: String },
    Delete { id: String },
    Clear,
    List,
}

pub async fn overlay_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle(socket, state))
}

async fn handle(mut socket: WebSocket, state: AppState) {
    debug!("Overlay control socket opened");
    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(m) => m,
            Err(_) => break,
        };
        match message {
            Message::Text(text) => {
                let reply = dispatch(&state, &text);
                if socket.send(Message::Text(reply)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    debug!("Overlay control socket closed");
}

fn dispatch(state: &AppState, text: &str) -> String {
    let command: OverlayCommand = match serde_json::from_str(text) {
        Ok(c) => c,
        Err(e) => {
            return json!({ "ok": false, "error": "invalid_request", "message": e.to_string() })
                .to_string()
        }
    };

    let result = match command {
        OverlayCommand::Create { element } => state.overlays.create(element).map(|s| json!(s)),
        OverlayCommand::Update { id, kind } => state.overlays.update(&id, kind).map(|s| json!(s)),
        OverlayCommand::Show { id } => state.overlays.show(&id).map(|s| json!(s)),
        OverlayCommand::Hide { id } => state.overlays.hide(&id).map(|s| json!(s)),
        OverlayCommand::Delete { id } => state.overlays.delete(&id).map(|_| json!({ "deleted": true })),
        OverlayCommand::Clear => {
            state.overlays.clear();
            Ok(json!({ "cleared": true }))
        }
        OverlayCommand::List => Ok(json!(state.overlays.list())),
    };

    match result {
        Ok(value) => json!({ "ok": true, "result": value }).to_string(),
        Err(e) => {
            json!({ "ok": false, "error": e.kind(), "message": e.to_string() }).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_deserialize_with_flattened_payloads() {
        let create: OverlayCommand = serde_json::from_str(
            r#"{"action":"create","variant":"lower_third","title":"Jane Doe","subtitle":"Director"}"#,
        )
        .unwrap();
        assert!(matches!(create, OverlayCommand::Create { .. }));

        let update: OverlayCommand = serde_json::from_str(
            r#"{"action":"update","id":"lt0","variant":"ticker","text":"hello","speed":80.0}"#,
        )
        .unwrap();
        match update {
            OverlayCommand::Update { id, kind } => {
                assert_eq!(id, "lt0");
                assert_eq!(kind.variant_name(), "ticker");
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let clear: OverlayCommand = serde_json::from_str(r#"{"action":"clear"}"#).unwrap();
        assert!(matches!(clear, OverlayCommand::Clear));
    }
}
