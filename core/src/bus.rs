//! C2 — pub/sub bridge.
//!
//! Two independent connections to the shared message bus: one for publish
//! (a pooled `ConnectionManager`, ordinary commands allowed), one for
//! subscribe (a dedicated connection that SUBSCRIBE puts into a mode where
//! nothing else is allowed). The service runs in "degraded single-instance
//! mode" when the bus is absent or unreachable: every bridge operation
//! becomes a no-op and same-instance delivery keeps working. See spec.md
//! 4.2 and 9.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_lite::StreamExt;
use relay_shared::clients::RedisClient;
use relay_shared::types::event::BusEnvelope;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const CHANNEL: &str = "socket-broadcast";
const BASE_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(3);
const MAX_CONSECUTIVE_FAILURES: u32 = 10;

#[derive(Clone)]
pub struct Bus {
    instance_id: String,
    publisher: Option<RedisClient>,
    degraded: Arc<AtomicBool>,
    shutdown: Arc<watch::Sender<bool>>,
    subscriber_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Bus {
    /// Connects the publish side and spawns the subscribe-side reconnect
    /// loop. `on_message` is invoked for every envelope whose
    /// `origin_instance_id` differs from ours.
    pub async fn connect<F, Fut>(redis_url: Option<String>, instance_id: String, on_message: F) -> Self
    where
        F: Fn(BusEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        let Some(url) = redis_url else {
            tracing::warn!("pub/sub bus disabled (no redis url); running in degraded single-instance mode");
            return Self {
                instance_id,
                publisher: None,
                degraded: Arc::new(AtomicBool::new(true)),
                shutdown: shutdown_tx,
                subscriber_task: Arc::new(Mutex::new(None)),
            };
        };

        let publisher = match RedisClient::connect(&url).await {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::error!(error = %e, "failed to connect bus publish side; degraded single-instance mode");
                None
            }
        };

        let degraded = Arc::new(AtomicBool::new(publisher.is_none()));

        let sub_client = match RedisClient::connect(&url).await {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::error!(error = %e, "failed to connect bus subscribe side");
                None
            }
        };

        let subscriber_task = if let Some(sub_client) = sub_client {
            let instance_id_for_task = instance_id.clone();
            let degraded_for_task = degraded.clone();
            let handle = tokio::spawn(async move {
                run_subscribe_loop(sub_client, instance_id_for_task, degraded_for_task, shutdown_rx, on_message)
                    .await;
            });
            Arc::new(Mutex::new(Some(handle)))
        } else {
            Arc::new(Mutex::new(None))
        };

        Self {
            instance_id,
            publisher,
            degraded,
            shutdown: shutdown_tx,
            subscriber_task,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Publishes an envelope. No-op (and no error) in degraded mode, per
    /// spec.md 7: bus unavailable degrades the service, it does not fail
    /// the originating call.
    pub async fn publish(&self, envelope: &BusEnvelope) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        let payload = match serde_json::to_string(envelope) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode bus envelope");
                return;
            }
        };
        if let Err(e) = publisher.publish(CHANNEL, &payload).await {
            tracing::warn!(error = %e, "bus publish failed");
        }
    }

    /// Shutdown drain step (spec.md 5): signals the subscribe loop to
    /// unsubscribe and waits for its dedicated connection to close before
    /// returning. Idempotent; a no-op in degraded mode since there is no
    /// subscriber task to stop.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.subscriber_task.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "bus subscriber task panicked during shutdown");
            }
        }
    }
}

async fn run_subscribe_loop<F, Fut>(
    client: RedisClient,
    instance_id: String,
    degraded: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
    on_message: F,
) where
    F: Fn(BusEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut consecutive_failures: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return;
        }

        match client.subscribe(CHANNEL).await {
            Ok(mut pubsub) => {
                consecutive_failures = 0;
                degraded.store(false, Ordering::SeqCst);
                tracing::info!(channel = CHANNEL, "bus subscriber connected");

                let mut stream = pubsub.on_message();
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                drop(stream);
                                let _ = pubsub.unsubscribe(CHANNEL).await;
                                tracing::info!("bus subscriber unsubscribed, closing");
                                return;
                            }
                        }
                        msg = stream.next() => {
                            let Some(msg) = msg else { break };
                            let payload: String = match msg.get_payload() {
                                Ok(p) => p,
                                Err(e) => {
                                    tracing::warn!(error = %e, "bus message payload decode failed");
                                    continue;
                                }
                            };
                            match serde_json::from_str::<BusEnvelope>(&payload) {
                                Ok(envelope) if envelope.origin_instance_id == instance_id => {
                                    // Self-echo: drop (spec.md 5, duplicate suppression).
                                }
                                Ok(envelope) => {
                                    on_message(envelope).await;
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "malformed bus envelope, dropping");
                                }
                            }
                        }
                    }
                }

                tracing::warn!("bus subscriber stream ended, reconnecting");
            }
            Err(e) => {
                consecutive_failures += 1;
                tracing::warn!(error = %e, attempt = consecutive_failures, "bus subscribe failed");
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    tracing::error!(
                        "bus subscriber abandoned after {MAX_CONSECUTIVE_FAILURES} consecutive failures; staying degraded"
                    );
                    degraded.store(true, Ordering::SeqCst);
                    return;
                }
            }
        }

        degraded.store(true, Ordering::SeqCst);
        let delay = (BASE_BACKOFF * consecutive_failures.max(1)).min(MAX_BACKOFF);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_url_starts_degraded_and_publish_is_a_silent_noop() {
        let bus = Bus::connect(None, "inst-1".to_string(), |_env| async {}).await;
        assert!(bus.is_degraded());
        let envelope = BusEnvelope::new("ping", serde_json::json!({}), "inst-1");
        bus.publish(&envelope).await;
    }

    #[tokio::test]
    async fn close_on_degraded_bus_is_a_noop() {
        let bus = Bus::connect(None, "inst-1".to_string(), |_env| async {}).await;
        bus.close().await;
        assert!(bus.is_degraded());
    }
}
