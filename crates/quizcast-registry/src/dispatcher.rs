//! Ordered, non-blocking fan-out of session events.

use std::sync::Arc;

use quizcast_protocol::{Envelope, Recipient, ServerEvent};
use tokio::time::Instant;

use crate::{ConnectionRegistry, DeliveryReport};

/// Stamps session events with a sequence number and hands them to the
/// registry.
///
/// Owned by the session actor, so the sequence is exactly the order in which
/// the state machine produced its events. Each connection queue is FIFO,
/// which makes that order the order every client observes.
pub struct Dispatcher {
    registry: ConnectionRegistry,
    epoch: Instant,
    next_seq: u64,
}

impl Dispatcher {
    /// `epoch` is the session's creation instant; envelope timestamps are
    /// milliseconds since then.
    pub fn new(registry: ConnectionRegistry, epoch: Instant) -> Self {
        Self {
            registry,
            epoch,
            next_seq: 1,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Milliseconds since the session epoch.
    pub fn now_ms(&self) -> u64 {
        self.millis_at(Instant::now())
    }

    /// Milliseconds between the session epoch and `at`.
    pub fn millis_at(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.epoch).as_millis() as u64
    }

    /// The sequence number the next dispatched event will carry.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Sends one event. Returns the sequence number it was stamped with.
    pub async fn dispatch(&mut self, recipient: Recipient, event: ServerEvent) -> (u64, DeliveryReport) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let envelope = Arc::new(Envelope {
            seq,
            timestamp: self.now_ms(),
            payload: event,
        });
        let report = self.registry.deliver(recipient, envelope).await;
        tracing::trace!(seq, ?recipient, delivered = report.delivered, "event dispatched");
        (seq, report)
    }

    /// Sends a batch in order.
    pub async fn dispatch_all(&mut self, events: Vec<(Recipient, ServerEvent)>) -> Vec<DeliveryReport> {
        let mut reports = Vec::with_capacity(events.len());
        for (recipient, event) in events {
            let (_, report) = self.dispatch(recipient, event).await;
            reports.push(report);
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RegistryConfig, event_channel};
    use quizcast_protocol::{Identity, PlayerId};
    use quizcast_transport::ConnectionId;
    use std::time::Duration;

    fn left(id: u64) -> ServerEvent {
        ServerEvent::PlayerLeft {
            player_id: PlayerId(id),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_stamps_increasing_seq_and_timestamp() {
        let registry = ConnectionRegistry::new(RegistryConfig::default());
        let (tx, mut rx) = event_channel(registry.config());
        registry.register(Identity::Host, ConnectionId::new(1), tx).await;
        let mut dispatcher = Dispatcher::new(registry, Instant::now());

        dispatcher.dispatch(Recipient::All, left(1)).await;
        tokio::time::advance(Duration::from_millis(250)).await;
        dispatcher.dispatch(Recipient::All, left(2)).await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!((first.seq, second.seq), (1, 2));
        assert_eq!(first.timestamp, 0);
        assert_eq!(second.timestamp, 250);
        assert_eq!(dispatcher.next_seq(), 3);
    }

    #[tokio::test]
    async fn test_dispatch_consumes_seq_even_without_recipients() {
        let registry = ConnectionRegistry::new(RegistryConfig::default());
        let mut dispatcher = Dispatcher::new(registry.clone(), Instant::now());

        let (seq, report) = dispatcher.dispatch(Recipient::All, left(1)).await;
        assert_eq!(seq, 1);
        assert_eq!(report.delivered, 0);

        let (tx, mut rx) = event_channel(registry.config());
        registry
            .register(Identity::Player(PlayerId(1)), ConnectionId::new(1), tx)
            .await;
        dispatcher.dispatch(Recipient::All, left(2)).await;

        // A client joining late sees a gap and knows to resync.
        assert_eq!(rx.recv().await.unwrap().seq, 2);
    }

    #[tokio::test]
    async fn test_dispatch_all_keeps_batch_order() {
        let registry = ConnectionRegistry::new(RegistryConfig::default());
        let (tx, mut rx) = event_channel(registry.config());
        registry
            .register(Identity::Player(PlayerId(5)), ConnectionId::new(1), tx)
            .await;
        let mut dispatcher = Dispatcher::new(registry, Instant::now());

        dispatcher
            .dispatch_all(vec![
                (Recipient::All, left(1)),
                (Recipient::Host, left(2)),
                (Recipient::Player(PlayerId(5)), left(3)),
            ])
            .await;

        assert_eq!(rx.recv().await.unwrap().seq, 1);
        assert_eq!(rx.recv().await.unwrap().seq, 3);
    }
}
