use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use shared::FANOUT_CHANNEL;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::{EventEnvelope, LedgerEvent};
use super::hub::FanoutHub;

/// Fire-and-forget event sink
///
/// Implementations never block and never fail the caller; delivery is best
/// effort and the stored balance stays the source of truth.
pub trait Publisher: Send + Sync {
    fn publish(&self, user_id: Uuid, event: LedgerEvent);
}

impl Publisher for FanoutHub {
    fn publish(&self, user_id: Uuid, event: LedgerEvent) {
        let delivered = self.deliver(user_id, &event);
        tracing::debug!(%user_id, event = event.name(), delivered, "Event published");
    }
}

/// Publishes envelopes on the Redis channel so that connections held by any
/// backend instance receive events raised in this process
pub struct RedisPublisher {
    sender: mpsc::Sender<EventEnvelope>,
}

impl RedisPublisher {
    /// Spawns the forwarding task on the current runtime
    pub fn spawn(mut conn: ConnectionManager, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<EventEnvelope>(capacity.max(1));

        tokio::spawn(async move {
            while let Some(envelope) = receiver.recv().await {
                let payload = match serde_json::to_string(&envelope) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode event envelope");
                        continue;
                    }
                };
                let result: redis::RedisResult<i64> = conn.publish(FANOUT_CHANNEL, payload).await;
                if let Err(e) = result {
                    tracing::warn!(
                        user_id = %envelope.user_id,
                        event = envelope.event.name(),
                        error = %e,
                        "Failed to publish event to Redis"
                    );
                }
            }
            tracing::debug!("Redis publisher stopped");
        });

        Self { sender }
    }
}

impl Publisher for RedisPublisher {
    fn publish(&self, user_id: Uuid, event: LedgerEvent) {
        if let Err(e) = self.sender.try_send(EventEnvelope { user_id, event }) {
            tracing::warn!(%user_id, error = %e, "Redis publish queue rejected event");
        }
    }
}

/// Feeds envelopes from the Redis channel into the local hub until the
/// subscription ends
pub async fn run_redis_bridge(client: redis::Client, hub: Arc<FanoutHub>) -> anyhow::Result<()> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(FANOUT_CHANNEL).await?;
    tracing::info!(channel = FANOUT_CHANNEL, "Fan-out bridge subscribed");

    let mut messages = pubsub.on_message();
    while let Some(message) = messages.next().await {
        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable fan-out payload");
                continue;
            }
        };
        match serde_json::from_str::<EventEnvelope>(&payload) {
            Ok(envelope) => {
                hub.deliver(envelope.user_id, &envelope.event);
            }
            Err(e) => tracing::warn!(error = %e, "Malformed fan-out envelope"),
        }
    }

    tracing::warn!("Fan-out bridge subscription closed");
    Ok(())
}
