//! The session I/O loop.
//!
//! One task owns the socket for the whole life of the session: it
//! connects, authenticates, reissues the resubscription intents, then
//! multiplexes the outgoing queue against incoming frames until the
//! socket drops or the user closes. An unexpected drop triggers
//! exponential-backoff reconnection (`delay = min(max_delay,
//! initial_delay * 2^attempt)`), with the attempt counter reset on every
//! successful `ready`.

use crate::client::{dispatch, ClientInner, SessionState};
use crate::config::ConnectionOptions;
use crate::transport::{self, WsSink, WsSource};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

/// Backoff delay before reconnect attempt `attempt` (1-based).
pub(crate) fn backoff_delay(opts: &ConnectionOptions, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(31));
    opts.initial_delay
        .saturating_mul(factor)
        .min(opts.max_delay)
}

pub(crate) async fn session_loop(inner: Arc<ClientInner>) {
    let Some(mut outgoing) = inner
        .outgoing_rx
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .take()
    else {
        warn!("session loop already running");
        return;
    };
    let mut shutdown = inner.shutdown_tx.subscribe();
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        inner.set_state(SessionState::Opening);
        inner.events.emit("connecting", &Value::Null);
        let url = inner.opts.url();

        match transport::connect(&url).await {
            Ok((mut ws_tx, mut ws_rx)) => {
                attempt = 0;
                inner.set_state(SessionState::Open);
                inner.events.emit("connection", &Value::Null);
                info!(%url, "connected to rosbridge");

                if open_session(&inner, &mut ws_tx).await {
                    inner.events.emit("ready", &Value::Null);
                    drive(&inner, &mut outgoing, &mut ws_tx, &mut ws_rx, &mut shutdown).await;
                }

                let user_closed = *shutdown.borrow();
                inner.fail_pending(if user_closed {
                    "session closed"
                } else {
                    "socket closed"
                });
                inner.set_state(SessionState::Closed);
                inner.events.emit("close", &Value::Null);
                if user_closed {
                    break;
                }
            }
            Err(e) => {
                debug!(%url, error = %e, "connection attempt failed");
                inner.events.emit(
                    "error",
                    &json!({"kind": "connection_failed", "message": e.to_string()}),
                );
                inner.set_state(SessionState::Closed);
            }
        }

        attempt += 1;
        if inner.opts.max_retries != 0 && attempt > inner.opts.max_retries {
            warn!(attempts = attempt - 1, "giving up on reconnection");
            // The session is over; unblock readiness waiters and callers.
            inner.shutdown_tx.send_replace(true);
            break;
        }
        let delay = backoff_delay(&inner.opts, attempt);
        debug!(?delay, attempt, "waiting before reconnect");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {}
        }
    }

    inner.fail_pending("session closed");
    inner.set_state(SessionState::Closed);
}

/// Authenticate and reissue the resubscription intents, in insertion
/// order, before any queued traffic. Returns `false` when the socket died
/// during the handshake.
async fn open_session(inner: &Arc<ClientInner>, ws_tx: &mut WsSink) -> bool {
    if let Some(auth) = &inner.opts.authentication {
        if transport::send_text(ws_tx, auth.to_frame().to_string())
            .await
            .is_err()
        {
            return false;
        }
    }

    let intents = inner.mark_ready_and_collect_intents();
    if !intents.is_empty() {
        debug!(count = intents.len(), "reissuing subscriptions");
    }
    for frame in intents {
        if transport::send_text(ws_tx, frame).await.is_err() {
            return false;
        }
    }
    true
}

/// Multiplex queued outgoing frames against incoming traffic until the
/// socket drops or a shutdown is requested.
async fn drive(
    inner: &Arc<ClientInner>,
    outgoing: &mut mpsc::UnboundedReceiver<String>,
    ws_tx: &mut WsSink,
    ws_rx: &mut WsSource,
    shutdown: &mut watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            queued = outgoing.recv() => match queued {
                Some(text) => {
                    if transport::send_text(ws_tx, text).await.is_err() {
                        return;
                    }
                }
                // The inner keeps a sender alive, so this is unreachable in
                // practice; treat it as a shutdown anyway.
                None => return,
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => dispatch(inner, text.as_str()),
                Some(Ok(Message::Binary(_))) => {
                    warn!("binary frame from rosbridge; dropping");
                    inner.events.emit(
                        "error",
                        &json!({"kind": "invalid_frame", "message": "unexpected binary frame"}),
                    );
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("socket closed by peer");
                    return;
                }
                Some(Ok(_)) => {} // ping/pong handled by tungstenite
                Some(Err(e)) => {
                    warn!(error = %e, "socket error");
                    return;
                }
            },
            _ = shutdown.changed() => {
                inner.set_state(SessionState::Closing);
                // Flush what the `closing` handlers enqueued, then say
                // goodbye properly.
                while let Ok(text) = outgoing.try_recv() {
                    if transport::send_text(ws_tx, text).await.is_err() {
                        return;
                    }
                }
                let _ = ws_tx.send(Message::Close(None)).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_ceiling() {
        let opts = ConnectionOptions::new("localhost")
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(4));

        assert_eq!(backoff_delay(&opts, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(&opts, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(&opts, 3), Duration::from_secs(4));
        assert_eq!(backoff_delay(&opts, 4), Duration::from_secs(4));
        assert_eq!(backoff_delay(&opts, 64), Duration::from_secs(4));
    }

    #[test]
    fn backoff_defaults_cap_at_sixty_seconds() {
        let opts = ConnectionOptions::new("localhost");
        assert_eq!(backoff_delay(&opts, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(&opts, 6), Duration::from_secs(32));
        assert_eq!(backoff_delay(&opts, 7), Duration::from_secs(60));
        assert_eq!(backoff_delay(&opts, 100), Duration::from_secs(60));
    }
}
