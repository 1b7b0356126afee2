//! Notification hub - broadcast server for pipeline completion events
//!
//! Accepts any number of concurrent client connections and fans every
//! event out to all of them as newline-delimited JSON frames:
//! `{"event": "itinerary-ready", "data": {...}}`. Scoping an event to the
//! right user is the receiving client's responsibility.

use crate::infra::metrics::Metrics;
use crate::infra::error::PipelineError;
use crate::io::queue::JobHandler;
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Event name broadcast when an itinerary has been persisted
pub const READY_EVENT: &str = "itinerary-ready";

/// One frame on the notification wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    pub data: serde_json::Value,
}

impl EventFrame {
    /// Encode as one wire line (newline-terminated JSON)
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"));
        line.push('\n');
        line
    }
}

/// Broadcast server state: connected clients keyed by connection id
pub struct NotifyHub {
    clients: Mutex<FxHashMap<u64, mpsc::Sender<String>>>,
    next_id: AtomicU64,
    metrics: Arc<Metrics>,
}

impl NotifyHub {
    pub fn new(metrics: Arc<Metrics>) -> Arc<Self> {
        Arc::new(Self {
            clients: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
            metrics,
        })
    }

    /// Number of currently connected clients
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Emit a named event to every connected client.
    ///
    /// Senders are snapshotted before iteration so clients connecting or
    /// disconnecting mid-broadcast never affect this fan-out. Slow clients
    /// get frames dropped rather than blocking the hub.
    pub fn broadcast(&self, event: &str, data: &serde_json::Value) {
        let frame = EventFrame { event: event.to_string(), data: data.clone() }.to_line();

        let targets: Vec<(u64, mpsc::Sender<String>)> = {
            let clients = self.clients.lock();
            clients.iter().map(|(id, tx)| (*id, tx.clone())).collect()
        };

        let mut dead = Vec::new();
        for (id, tx) in &targets {
            match tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(client = id, "notify_frame_dropped: client slow");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(*id);
                }
            }
        }
        if !dead.is_empty() {
            let mut clients = self.clients.lock();
            for id in dead {
                clients.remove(&id);
            }
        }

        self.metrics.record_broadcast_sent();
        info!(event = %event, clients = targets.len(), "event_broadcast");
    }

    /// Run the accept loop until shutdown
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let addr = listener.local_addr().ok();
        info!(addr = ?addr, "notify_hub_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("notify_hub_shutdown");
                        return;
                    }
                }
                result = listener.accept() => {
                    match result {
                        Ok((socket, peer)) => {
                            let hub = self.clone();
                            tokio::spawn(async move {
                                hub.handle_connection(socket, peer.to_string()).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "notify_accept_failed");
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, socket: TcpStream, peer: String) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::channel::<String>(64);
        self.clients.lock().insert(id, tx);
        self.metrics.record_notify_client_connected();
        info!(client = id, peer = %peer, "notify_client_connected");

        let (read_half, mut write_half) = socket.into_split();

        // Writer: drain queued frames onto the socket
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if write_half.write_all(frame.as_bytes()).await.is_err() {
                    return;
                }
            }
        });

        // Reader: clients do not speak, but reading detects disconnects
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() {
                debug!(client = id, line = %line, "notify_unexpected_message");
            }
        }

        self.clients.lock().remove(&id);
        self.metrics.record_notify_client_disconnected();
        writer.abort();
        info!(client = id, "notify_client_disconnected");
    }
}

/// Bridges the ready topic onto the hub: every consumed ready event is
/// broadcast verbatim to all connected clients.
pub struct ReadyBroadcaster {
    hub: Arc<NotifyHub>,
}

impl ReadyBroadcaster {
    pub fn new(hub: Arc<NotifyHub>) -> Arc<Self> {
        Arc::new(Self { hub })
    }
}

#[async_trait]
impl JobHandler for ReadyBroadcaster {
    async fn handle(&self, payload: &[u8]) -> Result<(), PipelineError> {
        let data: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| PipelineError::Parse(format!("ready event: {e}")))?;
        self.hub.broadcast(READY_EVENT, &data);
        Ok(())
    }
}
