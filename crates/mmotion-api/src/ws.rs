//! Live progress over WebSocket.
//!
//! The upgrade request carries the same bearer token as the REST routes;
//! an unauthenticated upgrade is refused with 401 before the handshake.
//! The client then sends one `subscribe` message naming a job; the server
//! answers with a snapshot from the store and then relays checkpoint
//! events until the job is terminal. A job belonging to another owner is
//! answered exactly like a missing one. Subscribing to the pub/sub channel
//! happens before the snapshot read, so an event landing between the two
//! is delivered rather than lost; the client may see the same percentage
//! twice but never a gap ending in silence.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use mmotion_models::{Job, JobId, WsMessage};
use mmotion_store::JobStore;

use crate::auth::Owner;
use crate::metrics;
use crate::state::AppState;

/// Global counter for active WebSocket connections.
static ACTIVE_WS_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

const WS_SEND_BUFFER_SIZE: usize = 32;
const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const WS_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Send a WebSocket message with backpressure handling.
async fn send_ws_message(tx: &mpsc::Sender<Message>, msg: &WsMessage) -> bool {
    let json = match serde_json::to_string(msg) {
        Ok(j) => j,
        Err(_) => return false,
    };
    match tx.try_send(Message::Text(json.clone())) {
        Ok(_) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!("WebSocket send buffer full, applying backpressure");
            tx.send(Message::Text(json)).await.is_ok()
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// WebSocket progress endpoint. The `Owner` extractor refuses the
/// upgrade with 401 when the bearer token is missing or invalid.
pub async fn ws_progress(
    owner: Owner,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let count = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::set_ws_active_connections(count);
    metrics::record_ws_connection();

    ws.on_upgrade(|socket| async move {
        handle_progress_socket(socket, state, owner.0).await;
        let count = ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_ws_active_connections(count);
    })
}

/// Fetch the snapshot a subscriber may see. A job owned by someone else
/// is reported as unknown, so probing ids reveals nothing.
async fn fetch_owned_snapshot(
    store: &JobStore,
    job_id: &JobId,
    owner: &str,
) -> Result<Job, WsMessage> {
    match store.get(job_id).await {
        Ok(job) if job.owner == owner => Ok(job),
        Ok(_) => {
            debug!(job_id = %job_id, owner = %owner, "Subscription refused: not the owner");
            Err(WsMessage::error(format!("unknown job {job_id}")))
        }
        Err(e) => {
            debug!(job_id = %job_id, "Progress lookup failed: {}", e);
            Err(WsMessage::error(format!("unknown job {job_id}")))
        }
    }
}

/// Handle one progress subscription.
async fn handle_progress_socket(socket: WebSocket, state: AppState, owner: String) {
    let (ws_sender, mut receiver) = socket.split();

    // Bounded channel decouples relay speed from the client's read speed.
    let (tx, mut rx) = mpsc::channel::<Message>(WS_SEND_BUFFER_SIZE);

    let send_task = tokio::spawn(async move {
        let mut ws_sender = ws_sender;
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    // First frame must be a subscribe message.
    let job_id: JobId = match tokio::time::timeout(WS_SUBSCRIBE_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<WsMessage>(&text) {
            Ok(WsMessage::Subscribe { job_id }) => job_id,
            Ok(_) | Err(_) => {
                let error = WsMessage::error("expected a subscribe message");
                send_ws_message(&tx, &error).await;
                drop(tx);
                let _ = send_task.await;
                return;
            }
        },
        Ok(_) | Err(_) => {
            let error = WsMessage::error("expected a subscribe message before timeout");
            send_ws_message(&tx, &error).await;
            drop(tx);
            let _ = send_task.await;
            return;
        }
    };

    // Subscribe before the snapshot read so no checkpoint falls in between.
    let mut stream = match state.progress.subscribe(&job_id).await {
        Ok(s) => s,
        Err(e) => {
            warn!(job_id = %job_id, "Failed to subscribe to progress: {}", e);
            let error = WsMessage::error("progress channel unavailable");
            send_ws_message(&tx, &error).await;
            drop(tx);
            let _ = send_task.await;
            return;
        }
    };

    let snapshot = match fetch_owned_snapshot(&state.store, &job_id, &owner).await {
        Ok(job) => job,
        Err(error) => {
            send_ws_message(&tx, &error).await;
            drop(tx);
            let _ = send_task.await;
            return;
        }
    };

    info!(job_id = %job_id, "Progress subscription started");

    let view = snapshot.status_view();
    let snapshot_msg = WsMessage::progress(view.job_id.clone(), view.status, view.progress);
    metrics::record_ws_message_sent("progress");
    if !send_ws_message(&tx, &snapshot_msg).await {
        drop(tx);
        let _ = send_task.await;
        return;
    }

    // Already-terminal jobs get the snapshot and an immediate close.
    if !snapshot.is_terminal() {
        let mut heartbeat = interval(WS_HEARTBEAT_INTERVAL);
        heartbeat.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                event = stream.next() => {
                    match event {
                        Some(event) => {
                            let msg_type = match &event.message {
                                WsMessage::Progress { .. } => "progress",
                                WsMessage::Error { .. } => "error",
                                WsMessage::Subscribe { .. } => continue,
                            };
                            metrics::record_ws_message_sent(msg_type);

                            let terminal = event.message.is_terminal();
                            if !send_ws_message(&tx, &event.message).await {
                                warn!(job_id = %job_id, "WebSocket send failed, client disconnected");
                                break;
                            }
                            if terminal {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    if tx.send(Message::Ping(vec![])).await.is_err() {
                        warn!(job_id = %job_id, "Heartbeat failed, client disconnected");
                        break;
                    }
                }
                client_msg = receiver.next() => {
                    match client_msg {
                        Some(Ok(Message::Close(_))) | None => {
                            info!(job_id = %job_id, "Client closed connection");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    let _ = tx.send(Message::Close(None)).await;
    drop(tx);
    let _ = send_task.await;
    info!(job_id = %job_id, "Progress subscription ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmotion_models::JobParameters;

    async fn store_with_job(owner: &str) -> (JobStore, JobId) {
        let store = JobStore::in_memory().await.expect("in-memory store");
        let job = store
            .create(owner, "uploads/a.png", &JobParameters::empty())
            .await
            .unwrap();
        (store, job.id)
    }

    fn error_text(msg: WsMessage) -> String {
        match msg {
            WsMessage::Error { message, .. } => message,
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_owner_sees_snapshot() {
        let (store, id) = store_with_job("alice").await;
        let job = fetch_owned_snapshot(&store, &id, "alice").await.unwrap();
        assert_eq!(job.owner, "alice");
    }

    #[tokio::test]
    async fn test_foreign_owner_is_refused_as_unknown() {
        let (store, id) = store_with_job("alice").await;
        let err = fetch_owned_snapshot(&store, &id, "bob").await.unwrap_err();
        assert_eq!(error_text(err), format!("unknown job {id}"));
    }

    #[tokio::test]
    async fn test_foreign_owner_indistinguishable_from_missing_job() {
        let (store, id) = store_with_job("alice").await;
        let foreign = fetch_owned_snapshot(&store, &id, "bob").await.unwrap_err();

        let missing_id = JobId::from_string(id.as_str());
        let (other_store, _) = store_with_job("bob").await;
        let missing = fetch_owned_snapshot(&other_store, &missing_id, "bob")
            .await
            .unwrap_err();

        assert_eq!(error_text(foreign), error_text(missing));
    }
}
