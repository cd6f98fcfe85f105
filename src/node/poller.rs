//! Periodic status poll
//!
//! Catches height changes that did not come through a node mutation and
//! publishes the traffic counters. A tick that finds the chain lock busy is
//! skipped rather than waited on.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::Node;
use crate::notify::NodeEvent;

pub struct StatusPoller {
    node: Arc<Node>,
    interval: Duration,
}

impl StatusPoller {
    pub fn new(node: Arc<Node>, interval: Duration) -> Self {
        Self { node, interval }
    }

    /// One poll. Returns false if the chain lock was busy and the tick skipped.
    pub fn poll_once(&self) -> bool {
        if !self.node.try_announce_height() {
            debug!("chain busy, status poll skipped");
            return false;
        }
        self.node.bus().publish(NodeEvent::BytesCountersChanged {
            recv: self.node.total_bytes_recv(),
            sent: self.node.total_bytes_sent(),
        });
        true
    }

    /// Poll until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_ms = self.interval.as_millis() as u64, "status poller started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("status poller stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Network, NodeConfig};
    use crate::notify::EventKind;

    fn regtest_node() -> Arc<Node> {
        let config = NodeConfig::for_network(Network::Regtest);
        Arc::new(Node::open(&config).unwrap())
    }

    #[test]
    fn test_unchanged_height_not_republished() {
        let node = regtest_node();
        let mut sub = node.bus().subscribe_to(&[EventKind::BestHeight]);
        let poller = StatusPoller::new(node.clone(), Duration::from_millis(10));

        assert!(poller.poll_once());
        assert!(poller.poll_once());
        assert_eq!(sub.try_recv().unwrap(), None);
    }

    #[test]
    fn test_poll_publishes_byte_counters() {
        let node = regtest_node();
        let mut sub = node.bus().subscribe_to(&[EventKind::BytesCounters]);
        let poller = StatusPoller::new(node, Duration::from_millis(10));

        assert!(poller.poll_once());
        assert_eq!(
            sub.try_recv().unwrap(),
            Some(NodeEvent::BytesCountersChanged { recv: 0, sent: 0 })
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let node = regtest_node();
        let (tx, rx) = watch::channel(false);
        let handle = StatusPoller::new(node, Duration::from_millis(5)).spawn(rx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
