//! Reconnecting notification client
//!
//! Consumes the hub's newline-delimited JSON frames over a persistent TCP
//! connection and dispatches them to registered subscribers. The transport
//! is a small state machine:
//!
//! `Disconnected → Connecting → Connected`, back to `Disconnected` on a
//! transport error or an explicit disconnect. Reconnects are scheduled with
//! exponential backoff (1 s doubling to 16 s); after five consecutive
//! failures the client stops retrying until `reconnect()` is called, which
//! resets the attempt counter.
//!
//! Subscriptions outlive individual connections: they live in a registry
//! owned by the client, not by the socket.

use crate::infra::backoff::BackoffPolicy;
use crate::io::notify_server::EventFrame;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Reconnect schedule: 1 s, 2 s, 4 s, 8 s, 16 s, then stop
const REALTIME_BACKOFF: BackoffPolicy =
    BackoffPolicy::exponential(Duration::from_secs(1), 2, Duration::from_secs(16), 5);

/// Transport connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

type Callback = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Event-name → callback registry.
///
/// Dispatch snapshots the callback list before invoking anything, so a
/// callback adding or removing subscriptions mid-broadcast never corrupts
/// the iteration.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subs: Mutex<FxHashMap<String, Vec<(u64, Callback)>>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl SubscriptionRegistry {
    fn add(&self, event: &str, callback: Callback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subs.lock().entry(event.to_string()).or_default().push((id, callback));
        id
    }

    fn remove(&self, event: &str, id: u64) {
        let mut subs = self.subs.lock();
        if let Some(callbacks) = subs.get_mut(event) {
            callbacks.retain(|(cb_id, _)| *cb_id != id);
            if callbacks.is_empty() {
                subs.remove(event);
            }
        }
    }

    /// Invoke every callback registered for the event, sequentially.
    ///
    /// A panicking callback is caught and logged; siblings still run.
    /// Returns how many callbacks were invoked.
    pub fn dispatch(&self, event: &str, data: &serde_json::Value) -> usize {
        let callbacks: Vec<Callback> = {
            let subs = self.subs.lock();
            subs.get(event).map(|v| v.iter().map(|(_, cb)| cb.clone()).collect()).unwrap_or_default()
        };

        for callback in &callbacks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(data))) {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic".to_string());
                error!(event = %event, panic = %message, "subscriber_callback_panicked");
            }
        }
        callbacks.len()
    }

    #[cfg(test)]
    fn callback_count(&self, event: &str) -> usize {
        self.subs.lock().get(event).map(Vec::len).unwrap_or(0)
    }
}

/// Handle returned by `subscribe`; cancels exactly its own registration
pub struct Subscription {
    event: String,
    id: u64,
    registry: Weak<SubscriptionRegistry>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.event, self.id);
        }
    }
}

/// Reconnecting transport to the notification hub
pub struct NotifyClient {
    addr: String,
    policy: BackoffPolicy,
    state: Arc<Mutex<ConnectionState>>,
    registry: Arc<SubscriptionRegistry>,
    running: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
}

impl NotifyClient {
    pub fn new(addr: impl Into<String>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            addr: addr.into(),
            policy: REALTIME_BACKOFF,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            registry: Arc::new(SubscriptionRegistry::default()),
            running: Arc::new(AtomicBool::new(false)),
            stop_tx,
        }
    }

    /// Override the reconnect schedule (tests use millisecond delays)
    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether the connect/reconnect loop is currently active
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register a callback for a named event.
    ///
    /// Multiple callbacks per event are allowed; the registration survives
    /// reconnects and is removed only through the returned handle.
    pub fn subscribe(
        &self,
        event: &str,
        callback: impl Fn(&serde_json::Value) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.registry.add(event, Arc::new(callback));
        debug!(event = %event, id = id, "subscriber_registered");
        Subscription { event: event.to_string(), id, registry: Arc::downgrade(&self.registry) }
    }

    /// Start the transport. A no-op while a connect loop is already running.
    pub fn connect(&self) {
        // send_replace: the flag must reset even when no loop is listening
        self.stop_tx.send_replace(false);
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("notify_connect_already_running");
            return;
        }

        let addr = self.addr.clone();
        let policy = self.policy;
        let state = self.state.clone();
        let registry = self.registry.clone();
        let running = self.running.clone();
        let stop_rx = self.stop_tx.subscribe();

        tokio::spawn(async move {
            run_transport(addr, policy, state, registry, stop_rx).await;
            running.store(false, Ordering::SeqCst);
        });
    }

    /// Tear the transport down. Subscriptions stay registered.
    pub fn disconnect(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Manual reconnect: resets the attempt counter and starts a fresh
    /// connect loop. This is the only way back once auto-retry has stopped.
    pub fn reconnect(&self) {
        info!("notify_manual_reconnect");
        self.connect();
    }
}

async fn run_transport(
    addr: String,
    policy: BackoffPolicy,
    state: Arc<Mutex<ConnectionState>>,
    registry: Arc<SubscriptionRegistry>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;

    loop {
        if *stop_rx.borrow() {
            break;
        }

        *state.lock() = ConnectionState::Connecting;
        debug!(addr = %addr, "notify_connecting");

        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                *state.lock() = ConnectionState::Connected;
                attempt = 0;
                info!(addr = %addr, "notify_connected");

                let mut lines = BufReader::new(stream).lines();
                let dropped_by_peer = loop {
                    tokio::select! {
                        changed = stop_rx.changed() => {
                            // A closed stop channel means the client is gone
                            if changed.is_err() || *stop_rx.borrow() {
                                break false;
                            }
                        }
                        line = lines.next_line() => {
                            match line {
                                Ok(Some(line)) => dispatch_line(&registry, &line),
                                Ok(None) => break true,
                                Err(e) => {
                                    warn!(error = %e, "notify_read_error");
                                    break true;
                                }
                            }
                        }
                    }
                };

                *state.lock() = ConnectionState::Disconnected;
                if !dropped_by_peer {
                    // Explicit disconnect: no automatic reconnect
                    info!("notify_disconnected");
                    break;
                }
                warn!("notify_connection_lost");
            }
            Err(e) => {
                *state.lock() = ConnectionState::Disconnected;
                warn!(addr = %addr, error = %e, "notify_connect_failed");
            }
        }

        attempt += 1;
        let Some(delay) = policy.delay(attempt) else {
            warn!(attempts = attempt - 1, "notify_reconnect_gave_up");
            break;
        };
        info!(attempt = attempt, delay_ms = delay.as_millis() as u64, "notify_reconnect_scheduled");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }

    *state.lock() = ConnectionState::Disconnected;
}

fn dispatch_line(registry: &SubscriptionRegistry, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<EventFrame>(line) {
        Ok(frame) => {
            let delivered = registry.dispatch(&frame.event, &frame.data);
            debug!(event = %frame.event, delivered = delivered, "notify_event_dispatched");
        }
        Err(e) => {
            warn!(error = %e, "notify_invalid_frame");
        }
    }
}
