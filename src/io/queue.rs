//! Queue client / reliability layer
//!
//! Owns the broker connection for one process and exposes the three
//! operations the pipeline needs: `connect`, `send`, and `consume` with
//! per-message acknowledgment. Consumers get at-least-once delivery over a
//! persistent session; handler failure requeues the message with a bumped
//! redelivery counter, and messages that exhaust their budget land on the
//! dead-letter topic.
//!
//! The client is an explicit service object constructed once per process
//! and passed by reference to every consumer - connection state is never
//! global.

use crate::infra::backoff::BackoffPolicy;
use crate::infra::config::Config;
use crate::infra::error::PipelineError;
use crate::infra::metrics::Metrics;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// Reconnect schedule for the broker link: a flat 5 s, five times over
const BROKER_BACKOFF: BackoffPolicy = BackoffPolicy::fixed(Duration::from_secs(5), 5);

/// Handler invoked once per delivered message.
///
/// Returning `Ok` acknowledges the delivery; returning `Err` requeues it.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> Result<(), PipelineError>;
}

/// What the reliability layer does with a failed delivery
#[derive(Debug, PartialEq)]
enum RedeliveryDecision {
    /// Republish to the same queue with the bumped payload
    Requeue(Vec<u8>),
    /// Redelivery budget exhausted (or payload unparseable) - park it
    DeadLetter(Vec<u8>),
}

/// Bump the top-level `attempts` counter and decide where the message goes.
///
/// A payload that is not a JSON object can never succeed on redelivery, so
/// it is dead-lettered immediately.
fn decide_redelivery(payload: &[u8], max_redeliveries: u32) -> RedeliveryDecision {
    let mut value: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(serde_json::Value::Object(map)) => serde_json::Value::Object(map),
        _ => return RedeliveryDecision::DeadLetter(payload.to_vec()),
    };

    let attempts = value.get("attempts").and_then(|a| a.as_u64()).unwrap_or(0) as u32 + 1;
    value["attempts"] = serde_json::json!(attempts);
    let bumped = serde_json::to_vec(&value).unwrap_or_else(|_| payload.to_vec());

    if attempts > max_redeliveries {
        RedeliveryDecision::DeadLetter(bumped)
    } else {
        RedeliveryDecision::Requeue(bumped)
    }
}

/// Broker queue client for one process.
///
/// Producers share one background-driven connection; each `consume` call
/// runs its own persistent-session subscription loop.
pub struct QueueClient {
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    /// Stable client id - persistent sessions are keyed on it
    client_id: String,
    dead_letter_topic: String,
    max_redeliveries: u32,
    policy: BackoffPolicy,
    producer: Mutex<Option<AsyncClient>>,
    /// Collapses concurrent connect() calls into a single attempt
    connecting: AtomicBool,
    metrics: Arc<Metrics>,
}

impl QueueClient {
    pub fn new(config: &Config, client_id: &str, metrics: Arc<Metrics>) -> Self {
        Self {
            host: config.broker_host().to_string(),
            port: config.broker_port(),
            username: config.broker_username().map(str::to_string),
            password: config.broker_password().map(str::to_string),
            client_id: client_id.to_string(),
            dead_letter_topic: config.dead_letter_topic().to_string(),
            max_redeliveries: config.max_redeliveries(),
            policy: BROKER_BACKOFF,
            producer: Mutex::new(None),
            connecting: AtomicBool::new(false),
            metrics,
        }
    }

    /// Override the reconnect schedule (tests use millisecond delays)
    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn options(&self, client_id: String, clean_session: bool, manual_acks: bool) -> MqttOptions {
        let mut opts = MqttOptions::new(client_id, &self.host, self.port);
        opts.set_keep_alive(Duration::from_secs(30));
        opts.set_clean_session(clean_session);
        opts.set_manual_acks(manual_acks);
        opts.set_max_packet_size(1048576, 1048576);
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            opts.set_credentials(username.as_str(), password.as_str());
        }
        opts
    }

    /// Establish the shared producer connection.
    ///
    /// Reentrant-safe: while one attempt is in flight, further calls return
    /// immediately and the caller observes whatever that attempt produces.
    pub async fn connect(&self) -> Result<(), PipelineError> {
        if self.connecting.swap(true, Ordering::SeqCst) {
            debug!(client_id = %self.client_id, "queue_connect_already_in_progress");
            return Ok(());
        }

        let result = self.connect_producer().await;
        self.connecting.store(false, Ordering::SeqCst);
        result
    }

    async fn connect_producer(&self) -> Result<(), PipelineError> {
        let opts = self.options(format!("{}-pub", self.client_id), true, false);
        let (client, mut eventloop) = AsyncClient::new(opts, 64);

        // Drive the connection until the first ConnAck so send() failures
        // surface here rather than silently queueing into a dead link.
        let mut attempt: u32 = 0;
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(host = %self.host, port = %self.port, "queue_producer_connected");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    attempt += 1;
                    let Some(delay) = self.policy.delay(attempt) else {
                        error!(error = %e, attempts = attempt, "queue_connect_gave_up");
                        return Err(PipelineError::Transport(format!(
                            "broker unreachable after {attempt} attempts: {e}"
                        )));
                    };
                    warn!(error = %e, attempt = attempt, delay_s = delay.as_secs(), "queue_connect_retry");
                    self.metrics.record_broker_reconnect();
                    tokio::time::sleep(delay).await;
                }
            }
        }

        *self.producer.lock().await = Some(client);

        // Keep polling in the background so publishes actually go out.
        let metrics = self.metrics.clone();
        let policy = self.policy;
        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        attempt = 0;
                        debug!("queue_producer_reconnected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        attempt += 1;
                        let Some(delay) = policy.delay(attempt) else {
                            // Next send() notices the dead handle and reconnects
                            error!(error = %e, "queue_producer_loop_exited");
                            return;
                        };
                        warn!(error = %e, attempt = attempt, "queue_producer_error");
                        metrics.record_broker_reconnect();
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        });

        Ok(())
    }

    /// Publish a JSON payload to a queue, reconnecting first if the link
    /// is gone.
    pub async fn send<T: serde::Serialize>(
        &self,
        queue: &str,
        payload: &T,
    ) -> Result<(), PipelineError> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| PipelineError::Parse(format!("payload serialization: {e}")))?;
        self.send_raw(queue, bytes).await
    }

    async fn send_raw(&self, queue: &str, bytes: Vec<u8>) -> Result<(), PipelineError> {
        let client = self.producer.lock().await.clone();
        if let Some(client) = client {
            match client.publish(queue, QoS::AtLeastOnce, false, bytes.clone()).await {
                Ok(()) => {
                    debug!(queue = %queue, bytes = bytes.len(), "queue_message_sent");
                    return Ok(());
                }
                Err(e) => {
                    warn!(queue = %queue, error = %e, "queue_send_failed_reconnecting");
                    *self.producer.lock().await = None;
                }
            }
        }

        // No live handle (first send, or the publish above failed)
        self.connect().await?;
        let client = self
            .producer
            .lock()
            .await
            .clone()
            .ok_or_else(|| PipelineError::Transport("broker connection unavailable".to_string()))?;
        client
            .publish(queue, QoS::AtLeastOnce, false, bytes)
            .await
            .map_err(|e| PipelineError::Transport(e.to_string()))?;
        debug!(queue = %queue, "queue_message_sent");
        Ok(())
    }

    /// Consume a durable queue, one message at a time, until shutdown.
    ///
    /// Runs a persistent session (`clean_session = false`) under this
    /// client's id so messages published while the consumer was down are
    /// delivered on reconnect. Handler success acks the delivery; handler
    /// failure requeues it (or dead-letters it past the redelivery budget).
    ///
    /// Returns an error only when the reconnect budget is exhausted; the
    /// caller decides whether to retry, which starts a fresh attempt.
    pub async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn JobHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), PipelineError> {
        let opts = self.options(format!("{}-sub", self.client_id), false, true);
        let (client, mut eventloop) = AsyncClient::new(opts, 16);
        client
            .subscribe(queue, QoS::AtLeastOnce)
            .await
            .map_err(|e| PipelineError::Transport(e.to_string()))?;

        info!(queue = %queue, client_id = %self.client_id, "queue_consumer_started");

        let mut attempt: u32 = 0;
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(queue = %queue, "queue_consumer_shutdown");
                        return Ok(());
                    }
                }
                result = eventloop.poll() => {
                    match result {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            self.metrics.record_job_consumed();
                            match handler.handle(&publish.payload).await {
                                Ok(()) => {
                                    if let Err(e) = client.ack(&publish).await {
                                        warn!(queue = %queue, error = %e, "queue_ack_failed");
                                    } else {
                                        self.metrics.record_job_acked();
                                    }
                                }
                                Err(err) => {
                                    warn!(queue = %queue, error = %err, "queue_handler_failed");
                                    self.redeliver(&client, queue, &publish).await;
                                }
                            }
                        }
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            attempt = 0;
                            // Re-subscribe: the broker may not have kept the
                            // session across its own restarts.
                            if let Err(e) = client.subscribe(queue, QoS::AtLeastOnce).await {
                                warn!(queue = %queue, error = %e, "queue_resubscribe_failed");
                            }
                            info!(queue = %queue, "queue_consumer_connected");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            attempt += 1;
                            let Some(delay) = self.policy.delay(attempt) else {
                                error!(queue = %queue, error = %e, attempts = attempt, "queue_consumer_gave_up");
                                return Err(PipelineError::Transport(format!(
                                    "consumer lost broker after {attempt} attempts: {e}"
                                )));
                            };
                            warn!(queue = %queue, error = %e, attempt = attempt, delay_s = delay.as_secs(), "queue_consumer_reconnecting");
                            self.metrics.record_broker_reconnect();
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }
    }

    /// Requeue a failed delivery, or park it on the dead-letter topic once
    /// its budget is spent, then ack the original so the broker moves on.
    async fn redeliver(&self, client: &AsyncClient, queue: &str, publish: &rumqttc::Publish) {
        match decide_redelivery(&publish.payload, self.max_redeliveries) {
            RedeliveryDecision::Requeue(bumped) => {
                if let Err(e) = client.publish(queue, QoS::AtLeastOnce, false, bumped).await {
                    // Leave the delivery unacked; it comes back on reconnect
                    error!(queue = %queue, error = %e, "queue_requeue_failed");
                    return;
                }
                self.metrics.record_job_requeued();
                debug!(queue = %queue, "queue_message_requeued");
            }
            RedeliveryDecision::DeadLetter(payload) => {
                if let Err(e) = self
                    .send_raw(&self.dead_letter_topic, payload)
                    .await
                {
                    error!(queue = %queue, error = %e, "queue_dead_letter_failed");
                    return;
                }
                self.metrics.record_job_dead_lettered();
                warn!(queue = %queue, dead_letter = %self.dead_letter_topic, "queue_message_dead_lettered");
            }
        }
        if let Err(e) = client.ack(publish).await {
            warn!(queue = %queue, error = %e, "queue_ack_failed");
        }
    }

    /// Consume a transient topic (QoS 0, clean session, auto-ack).
    ///
    /// Used by the server for the ready topic: events published while the
    /// server is down are simply lost, by design of the broadcast channel.
    pub async fn consume_transient(
        &self,
        topic: &str,
        handler: Arc<dyn JobHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), PipelineError> {
        let opts = self.options(format!("{}-transient", self.client_id), true, false);
        let (client, mut eventloop) = AsyncClient::new(opts, 16);
        client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| PipelineError::Transport(e.to_string()))?;

        info!(topic = %topic, "transient_consumer_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(topic = %topic, "transient_consumer_shutdown");
                        return Ok(());
                    }
                }
                result = eventloop.poll() => {
                    match result {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            if let Err(e) = handler.handle(&publish.payload).await {
                                warn!(topic = %topic, error = %e, "transient_handler_failed");
                            }
                        }
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            if let Err(e) = client.subscribe(topic, QoS::AtMostOnce).await {
                                warn!(topic = %topic, error = %e, "transient_resubscribe_failed");
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(topic = %topic, error = %e, "transient_consumer_error");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    }
}
