//! Per-connection glue between the WebSocket transport and a session.
//!
//! Architecture, per connection:
//! - a bounded mpsc channel is the session's outbound queue; the registry
//!   and the session itself hold sender clones;
//! - one write task drains that channel to the socket, so at most one write
//!   is ever in flight and frames leave in submission order;
//! - the read loop feeds inbound text frames to the session state machine.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use libmessenger::{Session, SessionControl};

use crate::server::AppState;

pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(state.queue_depth);

    // Write task: sole owner of the sink. Drains the queue, then closes the
    // transport with a normal-closure status once every sender is gone.
    let write_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if let Err(e) = ws_tx.send(Message::Text(line.into())).await {
                debug!("write error: {e}");
                break;
            }
        }
        let close = Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: Utf8Bytes::from_static(""),
        }));
        let _ = ws_tx.send(close).await;
    });

    let mut session = Session::new(
        Arc::clone(&state.registry),
        state.store.clone(),
        tx.clone(),
    );
    debug!(session_id = %session.id(), "client connected");

    let mut logged_out = false;
    while let Some(next) = ws_rx.next().await {
        let msg = match next {
            Ok(msg) => msg,
            Err(e) => {
                warn!(session_id = %session.id(), "read error: {e}");
                break;
            }
        };

        match msg {
            Message::Text(text) => match session.handle_line(text.as_str()).await {
                SessionControl::Continue => {}
                SessionControl::Close => {
                    logged_out = true;
                    break;
                }
            },
            Message::Close(_) => break,
            // Pings are answered by the transport layer; binary frames have
            // no meaning in this protocol.
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    // Removal precedes teardown on every exit path; no-op after logout.
    session.disconnect();

    if logged_out {
        // Let the logout acknowledgment flush before the close frame.
        tokio::time::sleep(state.logout_grace).await;
    }

    // Dropping the last sender ends the write task after it drains the queue.
    drop(tx);
    let _ = write_task.await;
    debug!(session_id = %session.id(), "connection closed");
}
