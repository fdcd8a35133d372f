//! Per-user registry of live connections

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use super::events::LedgerEvent;

struct Connection {
    id: Uuid,
    sender: mpsc::Sender<LedgerEvent>,
}

/// Handed to the connection task after authentication
pub struct Registration {
    pub connection_id: Uuid,
    pub receiver: mpsc::Receiver<LedgerEvent>,
}

pub struct FanoutHub {
    connections: DashMap<Uuid, Vec<Connection>>,
    buffer: usize,
}

impl FanoutHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            connections: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    pub fn register(&self, user_id: Uuid) -> Registration {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let connection_id = Uuid::new_v4();
        self.connections
            .entry(user_id)
            .or_default()
            .push(Connection {
                id: connection_id,
                sender,
            });
        metrics::gauge!("ws_connections").increment(1.0);

        Registration {
            connection_id,
            receiver,
        }
    }

    pub fn unregister(&self, user_id: Uuid, connection_id: Uuid) {
        let mut removed = false;
        if let Some(mut connections) = self.connections.get_mut(&user_id) {
            let before = connections.len();
            connections.retain(|c| c.id != connection_id);
            removed = connections.len() < before;
        }
        if removed {
            metrics::gauge!("ws_connections").decrement(1.0);
        }
        self.connections.remove_if(&user_id, |_, c| c.is_empty());
    }

    /// Non-blocking delivery to every live connection of `user_id`
    ///
    /// Returns the number of connections that accepted the frame. Closed
    /// connections are pruned; a full buffer drops the frame for that
    /// connection only.
    pub fn deliver(&self, user_id: Uuid, event: &LedgerEvent) -> usize {
        let mut delivered = 0;
        let mut pruned = 0;

        if let Some(mut connections) = self.connections.get_mut(&user_id) {
            connections.retain(|c| match c.sender.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(%user_id, connection_id = %c.id, "Outbound buffer full, dropping frame");
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    pruned += 1;
                    false
                }
            });
        }

        if pruned > 0 {
            metrics::gauge!("ws_connections").decrement(pruned as f64);
            self.connections.remove_if(&user_id, |_, c| c.is_empty());
        }

        metrics::counter!("fanout_events_total", "event" => event.name()).increment(1);
        delivered
    }

    pub fn connection_count(&self, user_id: Uuid) -> usize {
        self.connections.get(&user_id).map(|c| c.len()).unwrap_or(0)
    }

    pub fn total_connections(&self) -> usize {
        self.connections.iter().map(|entry| entry.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn balance(amount: rust_decimal::Decimal) -> LedgerEvent {
        LedgerEvent::BalanceChanged {
            balance: amount,
            currency: "USD".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_without_connections_is_noop() {
        let hub = FanoutHub::new(8);
        assert_eq!(hub.deliver(Uuid::new_v4(), &balance(dec!(1))), 0);
    }

    #[tokio::test]
    async fn test_every_connection_of_the_user_receives() {
        let hub = FanoutHub::new(8);
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut first = hub.register(user);
        let mut second = hub.register(user);
        let mut unrelated = hub.register(other);

        assert_eq!(hub.deliver(user, &balance(dec!(5))), 2);
        assert_eq!(first.receiver.recv().await, Some(balance(dec!(5))));
        assert_eq!(second.receiver.recv().await, Some(balance(dec!(5))));
        assert!(unrelated.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_connections_are_pruned() {
        let hub = FanoutHub::new(8);
        let user = Uuid::new_v4();
        let gone = hub.register(user);
        let _kept = hub.register(user);
        drop(gone.receiver);

        assert_eq!(hub.deliver(user, &balance(dec!(1))), 1);
        assert_eq!(hub.connection_count(user), 1);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_frame_but_keeps_connection() {
        let hub = FanoutHub::new(1);
        let user = Uuid::new_v4();
        let mut registration = hub.register(user);

        assert_eq!(hub.deliver(user, &balance(dec!(1))), 1);
        assert_eq!(hub.deliver(user, &balance(dec!(2))), 0);
        assert_eq!(hub.connection_count(user), 1);
        assert_eq!(registration.receiver.recv().await, Some(balance(dec!(1))));
    }

    #[tokio::test]
    async fn test_unregister_removes_empty_entry() {
        let hub = FanoutHub::new(4);
        let user = Uuid::new_v4();
        let registration = hub.register(user);
        hub.unregister(user, registration.connection_id);
        assert_eq!(hub.connection_count(user), 0);
        assert_eq!(hub.total_connections(), 0);
    }
}
