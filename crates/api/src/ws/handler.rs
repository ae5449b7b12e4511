use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use jobline_core::error::CoreError;
use jobline_core::protocol::{parse_client_event, ClientEvent, ServerEvent, MAX_FRAME_BYTES};

use crate::realtime::{RealtimeHub, RouteOutcome, Session};
use crate::state::AppState;

/// How long the writer gets to flush queued frames after the reader stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// HTTP handler that upgrades the connection to WebSocket.
///
/// The first frame must be `session.authenticate`; everything after it is
/// routed through the [`RealtimeHub`].
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(MAX_FRAME_BYTES * 2)
        .on_upgrade(move |socket| handle_socket(socket, state.hub))
}

/// Manage a single WebSocket connection after upgrade.
///
///   1. Waits (bounded by `auth_timeout`) for the handshake frame.
///   2. Spawns a writer task that forwards the session's outbound channel.
///   3. Routes inbound frames on the current task.
///   4. Disconnects the session from every room on exit.
async fn handle_socket(socket: WebSocket, hub: Arc<RealtimeHub>) {
    let (mut sink, mut stream) = socket.split();

    let (session, mut rx) = match handshake(&hub, &mut stream).await {
        Ok(authenticated) => authenticated,
        Err(err) => {
            tracing::info!(error = %err, "WebSocket handshake failed");
            if let Ok(json) = serde_json::to_string(&ServerEvent::error(&err)) {
                let _ = sink.send(Message::Text(json.into())).await;
            }
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    session.send(&ServerEvent::SessionReady {
        actor_id: session.actor_id,
        role: session.role,
        expires_at: session.expires_at,
    });

    // Writer: forward channel frames to the socket until a Close is sent.
    let conn_id = session.conn_id;
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                tracing::debug!(%conn_id, "WebSocket sink closed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let cancel = session.cancellation();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(Message::Text(text))) => {
                if hub.route(&session, text.as_str()).await == RouteOutcome::Disconnect {
                    break;
                }
            }
            Some(Ok(Message::Binary(_))) => {
                session.send_error(&CoreError::InvalidEvent(
                    "Binary frames are not supported".into(),
                ));
            }
            Some(Ok(Message::Pong(_))) => {
                session.touch();
                tracing::trace!(%conn_id, "Pong received");
            }
            Some(Ok(Message::Ping(_))) => session.touch(),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                tracing::debug!(%conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    hub.disconnect(&session).await;
    drop(session);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut send_task)
        .await
        .is_err()
    {
        send_task.abort();
    }
    tracing::info!(%conn_id, "WebSocket disconnected");
}

/// Read the first frame and authenticate it.
async fn handshake(
    hub: &RealtimeHub,
    stream: &mut SplitStream<WebSocket>,
) -> Result<(Arc<Session>, tokio::sync::mpsc::UnboundedReceiver<Message>), CoreError> {
    let first = tokio::time::timeout(hub.config().auth_timeout, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(text),
                // Control frames may precede the handshake.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                _ => return None,
            }
        }
    })
    .await
    .map_err(|_| CoreError::Unauthorized("authentication timed out".into()))?
    .ok_or_else(|| CoreError::Unauthorized("connection closed before authentication".into()))?;

    match parse_client_event(first.as_str()) {
        Ok(ClientEvent::Authenticate { claim }) => hub.authenticate(&claim).await,
        Ok(other) => Err(CoreError::Unauthorized(format!(
            "expected session.authenticate, got {}",
            other.name()
        ))),
        Err(err) => Err(CoreError::Unauthorized(err.detail().to_string())),
    }
}
