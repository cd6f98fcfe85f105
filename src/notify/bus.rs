//! In-process notification bus
//!
//! One broadcast channel fans events out to every subscriber. Publishers never
//! block: a subscriber that falls more than `capacity` events behind skips the
//! missed ones and the skip is counted. After [`EventBus::shutdown`] the
//! sender is gone, subscribers drain what is buffered and then see the end of
//! the stream, and further publishes are dropped.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{EventKind, NodeEvent};

pub const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct EventBus {
    sender: RwLock<Option<broadcast::Sender<NodeEvent>>>,
    published: AtomicU64,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: RwLock::new(Some(sender)),
            published: AtomicU64::new(0),
            capacity,
        }
    }

    /// Send to every current subscriber. Returns how many received it.
    pub fn publish(&self, event: NodeEvent) -> usize {
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            debug!(kind = ?event.kind(), "bus closed, event dropped");
            return 0;
        };
        self.published.fetch_add(1, Ordering::Relaxed);
        let kind = event.kind();
        match sender.send(event) {
            Ok(receivers) => {
                debug!(?kind, receivers, "event published");
                receivers
            }
            Err(_) => {
                debug!(?kind, "event dropped (no subscribers)");
                0
            }
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.read().as_ref().map(broadcast::Sender::subscribe),
            kinds: None,
            missed: 0,
        }
    }

    /// Subscribe to the given kinds only.
    pub fn subscribe_to(&self, kinds: &[EventKind]) -> Subscription {
        let mut subscription = self.subscribe();
        subscription.kinds = Some(kinds.iter().copied().collect());
        subscription
    }

    /// Drop the sender. Idempotent.
    pub fn shutdown(&self) {
        if self.sender.write().take().is_some() {
            info!(published = self.events_published(), "notification bus shut down");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender
            .read()
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    pub fn events_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Receiving end of the bus
#[derive(Debug)]
pub struct Subscription {
    /// `None` when subscribed after shutdown
    receiver: Option<broadcast::Receiver<NodeEvent>>,
    kinds: Option<HashSet<EventKind>>,
    missed: u64,
}

impl Subscription {
    /// Next matching event, or `None` once the bus is shut down and drained.
    pub async fn recv(&mut self) -> Option<NodeEvent> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) if self.kinds.as_ref().map_or(true, |k| k.contains(&event.kind())) => {
                    return Some(event)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(missed = count, "subscriber lagged, events skipped");
                    self.missed += count;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event if one is buffered.
    ///
    /// `Ok(None)` means nothing is waiting; `Err(Closed)` means the bus is
    /// shut down and drained.
    pub fn try_recv(&mut self) -> Result<Option<NodeEvent>, SubscriptionClosed> {
        let receiver = self.receiver.as_mut().ok_or(SubscriptionClosed)?;
        loop {
            match receiver.try_recv() {
                Ok(event) if self.kinds.as_ref().map_or(true, |k| k.contains(&event.kind())) => {
                    return Ok(Some(event))
                }
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(missed = count, "subscriber lagged, events skipped");
                    self.missed += count;
                }
                Err(broadcast::error::TryRecvError::Closed) => return Err(SubscriptionClosed),
            }
        }
    }

    /// Events skipped because this subscriber lagged, since the last call.
    pub fn take_missed(&mut self) -> u64 {
        std::mem::take(&mut self.missed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("notification bus closed")]
pub struct SubscriptionClosed;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_delivery() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe();
        assert_eq!(bus.publish(NodeEvent::BestHeightChanged(1)), 1);
        bus.publish(NodeEvent::BestHeightChanged(2));

        assert_eq!(sub.recv().await, Some(NodeEvent::BestHeightChanged(1)));
        assert_eq!(sub.recv().await, Some(NodeEvent::BestHeightChanged(2)));
        assert_eq!(sub.try_recv(), Ok(None));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish(NodeEvent::ConnectionCountChanged(1)), 0);
        assert_eq!(bus.events_published(), 1);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_told() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        for height in 0..5 {
            bus.publish(NodeEvent::BestHeightChanged(height));
        }
        assert_eq!(sub.recv().await, Some(NodeEvent::BestHeightChanged(3)));
        assert_eq!(sub.take_missed(), 3);
        assert_eq!(sub.take_missed(), 0);
    }

    #[tokio::test]
    async fn test_kind_filter() {
        let bus = EventBus::new(8);
        let mut sub = bus.subscribe_to(&[EventKind::BytesCounters]);
        bus.publish(NodeEvent::BestHeightChanged(1));
        bus.publish(NodeEvent::BytesCountersChanged { recv: 1, sent: 2 });
        assert_eq!(
            sub.recv().await,
            Some(NodeEvent::BytesCountersChanged { recv: 1, sent: 2 })
        );
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_ends() {
        let bus = EventBus::new(8);
        let mut sub = bus.subscribe();
        bus.publish(NodeEvent::BestHeightChanged(7));
        bus.shutdown();
        bus.shutdown();

        assert!(bus.is_closed());
        assert_eq!(bus.publish(NodeEvent::BestHeightChanged(8)), 0);
        assert_eq!(sub.recv().await, Some(NodeEvent::BestHeightChanged(7)));
        assert_eq!(sub.recv().await, None);
        assert_eq!(sub.try_recv(), Err(SubscriptionClosed));

        let mut late = bus.subscribe();
        assert_eq!(late.recv().await, None);
    }
}
