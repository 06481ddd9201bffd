use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use teamserver_shared::{Event, TeamserverError};
use tracing::{debug, warn};

use crate::events::Subscription;
use crate::operators::OperatorConnection;
use crate::Teamserver;

#[derive(Deserialize)]
struct Handshake {
    token: String,
}

/// Operator event stream.
///
/// **Route:** `GET /api/event` (websocket)
///
/// # Protocol
/// The first text frame must be `{"token": "..."}` from `/api/login` and
/// must arrive within `HANDSHAKE_TIMEOUT_SECS`. The server then sends the
/// durable history followed by live events, one JSON event per text frame.
/// Closing the socket ends the operator session.
pub async fn event_socket(
    State(core): State<Arc<Teamserver>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| operator_session(core, socket))
}

async fn operator_session(core: Arc<Teamserver>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    let limit = Duration::from_secs(core.config.handshake_timeout_secs);
    let token = match tokio::time::timeout(limit, read_handshake(&mut stream)).await {
        Ok(Some(token)) => token,
        Ok(None) => {
            debug!("Event socket closed before handshake");
            return;
        }
        Err(_) => {
            warn!("⏱️ Event socket handshake timed out");
            let _ = sink.close().await;
            return;
        }
    };

    let OperatorConnection {
        username,
        token,
        events: Subscription {
            replay,
            events: mut queue,
            ..
        },
    } = match core.operators.connect(&token) {
        Ok(connection) => connection,
        Err(e) => {
            warn!(error = %e, "🚫 Event socket handshake rejected");
            let _ = sink.send(Message::Text(error_frame(&e))).await;
            let _ = sink.close().await;
            return;
        }
    };

    let mut writer = tokio::spawn(async move {
        for event in replay {
            if send_event(&mut sink, &event).await.is_err() {
                return;
            }
        }
        // Ends when the bus drops this operator or the socket fails.
        while let Some(event) = queue.recv().await {
            if send_event(&mut sink, &event).await.is_err() {
                return;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            _ = &mut writer => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    writer.abort();
    debug!(operator = %username, "Event socket closed");
    core.operators.disconnect(&token);
}

/// First text frame, parsed as a handshake. `None` if the peer left first.
async fn read_handshake(stream: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                let token = serde_json::from_str::<Handshake>(&text)
                    .map(|h| h.token)
                    .unwrap_or_default();
                return Some(token);
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &Event,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => sink.send(Message::Text(json)).await,
        Err(e) => {
            warn!(error = %e, "⚠️ Failed to encode event, skipping");
            Ok(())
        }
    }
}

fn error_frame(err: &TeamserverError) -> String {
    serde_json::json!({
        "status": "error",
        "error": {
            "type": format!("{:?}", err.kind()),
            "message": err.to_string(),
        }
    })
    .to_string()
}
