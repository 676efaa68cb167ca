use shared::protocol::BusMessage;
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_BUS_CAPACITY: usize = 256;

/// Local fan-out of traffic and log messages to presentation layers.
#[derive(Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<BusMessage>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fire and forget: a message published while nobody listens is dropped.
    pub fn publish(&self, message: BusMessage) {
        if self.tx.send(message).is_err() {
            trace!("notification bus has no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::domain::DrosseId;

    #[tokio::test]
    async fn publishes_to_every_subscriber() {
        let bus = NotificationBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let message = BusMessage::Log {
            uuid: DrosseId::from("a"),
            msg: json!("booted"),
        };
        bus.publish(message.clone());

        assert_eq!(first.recv().await.expect("first"), message);
        assert_eq!(second.recv().await.expect("second"), message);
    }

    #[test]
    fn publishing_without_subscribers_is_not_an_error() {
        let bus = NotificationBus::new(4);
        bus.publish(BusMessage::Request {
            uuid: DrosseId::from("a"),
            method: "GET".to_string(),
            url: "/".to_string(),
        });
    }
}
