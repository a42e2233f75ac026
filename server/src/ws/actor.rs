use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;

use crate::state::AppState;
use crate::ws::protocol;
use crate::ws::session::Session;

/// Close code sent when the peer stops answering heartbeats.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Run the actor-per-connection pattern for an authorized WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards frames from a bounded mpsc queue
/// - Ping task: transport heartbeat
/// - Reader loop (this task): decodes inbound events and dispatches them
///
/// The loop ends on client close, stream end, receive error, or when the
/// connection's shutdown token fires (eviction, writer failure, heartbeat
/// timeout). Cleanup then runs once through `Session::close`.
pub async fn run_connection(socket: WebSocket, state: AppState, mut session: Session) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Message>(state.relay.outbound_buffer.max(1));

    let Some(handle) = session.open(&state, tx).await else {
        tracing::warn!(channel = %session.channel(), "Session was not authorized, dropping socket");
        return;
    };
    let shutdown = handle.shutdown_token();

    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx, shutdown.clone()));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    let ping_handle = {
        let handle = handle.clone();
        let shutdown = shutdown.clone();
        let ping_interval = state.relay.ping_interval();
        let pong_timeout = state.relay.pong_timeout();
        tokio::spawn(async move {
            let mut ping_timer = interval(ping_interval);
            // Skip the first immediate tick
            ping_timer.tick().await;

            loop {
                ping_timer.tick().await;

                if handle.try_send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                    // Queue full or writer gone; the next tick retries or the
                    // reader notices the closed socket.
                    continue;
                }

                match timeout(pong_timeout, pong_rx.recv()).await {
                    Ok(Some(())) => {}
                    _ => {
                        tracing::warn!(user_id = handle.user_id, "Pong timeout, closing connection");
                        let _ = handle.try_send(Message::Close(Some(CloseFrame {
                            code: CLOSE_GOING_AWAY,
                            reason: "Pong timeout".into(),
                        })));
                        shutdown.cancel();
                        break;
                    }
                }
            }
        })
    };

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!(user_id = handle.user_id, "Connection shutdown signalled");
                break;
            }
            next = ws_receiver.next() => match next {
                Some(Ok(Message::Text(text))) => {
                    protocol::handle_text_message(text.as_str(), &handle, &state).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(
                        user_id = handle.user_id,
                        bytes = data.len(),
                        "Ignoring binary frame (expected JSON text)"
                    );
                }
                Some(Ok(Message::Pong(_))) => {
                    let _ = pong_tx.send(());
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = handle.try_send(Message::Pong(data));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(
                        user_id = handle.user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(
                        user_id = handle.user_id,
                        error = %e,
                        "WebSocket receive error"
                    );
                    break;
                }
                None => {
                    tracing::info!(user_id = handle.user_id, "WebSocket stream ended");
                    break;
                }
            }
        }
    }

    // Let the writer flush anything already queued (e.g. a close frame), but
    // never wait on a stalled socket longer than one send timeout.
    shutdown.cancel();
    ping_handle.abort();
    if timeout(state.relay.send_timeout(), &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    session.close(&state).await;
}

/// Writer task: receives frames from the queue and forwards them to the
/// WebSocket sink. Exits when the sink fails or shutdown fires with nothing
/// left queued; either way it signals shutdown so the reader stops too.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
    shutdown: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            biased;
            msg = rx.recv() => msg,
            _ = shutdown.cancelled() => rx.try_recv().ok(),
        };
        let Some(msg) = msg else {
            break;
        };
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() {
            break;
        }
        if closing {
            break;
        }
    }
    shutdown.cancel();
}
