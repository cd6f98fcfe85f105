//! Peer table
//!
//! Per-connection metadata and traffic counters. The table has its own lock,
//! so snapshotting peers never waits on chain-state work and the reverse.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Identifier the network layer assigns to each connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

/// What a peer told us in its version handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerHandshake {
    pub addr: SocketAddr,
    pub protocol_version: u32,
    pub user_agent: String,
    pub start_height: u64,
}

/// Snapshot of one connection, copied out by value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeShortStat {
    pub addr_name: String,
    pub protocol_version: u32,
    pub user_agent: String,
    pub starting_height: u64,
}

#[derive(Debug, Clone)]
struct PeerRecord {
    handshake: PeerHandshake,
    /// Highest chain work the peer has announced
    announced_work: U256,
    bytes_recv: u64,
    bytes_sent: u64,
}

impl PeerRecord {
    fn short_stat(&self) -> NodeShortStat {
        NodeShortStat {
            addr_name: self.handshake.addr.to_string(),
            protocol_version: self.handshake.protocol_version,
            user_agent: self.handshake.user_agent.clone(),
            starting_height: self.handshake.start_height,
        }
    }
}

/// Connected peers plus process-wide byte totals
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: RwLock<BTreeMap<ConnectionId, PeerRecord>>,
    total_recv: AtomicU64,
    total_sent: AtomicU64,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns the new connection count, or `None` if
    /// the id was already registered.
    pub fn connect(&self, id: ConnectionId, handshake: PeerHandshake) -> Option<usize> {
        let mut peers = self.peers.write();
        if peers.contains_key(&id) {
            return None;
        }
        info!(peer = %handshake.addr, agent = %handshake.user_agent, height = handshake.start_height, "peer connected");
        peers.insert(
            id,
            PeerRecord {
                handshake,
                announced_work: U256::zero(),
                bytes_recv: 0,
                bytes_sent: 0,
            },
        );
        Some(peers.len())
    }

    /// Drop a connection. Returns the new count, or `None` if it was unknown.
    pub fn disconnect(&self, id: ConnectionId) -> Option<usize> {
        let mut peers = self.peers.write();
        let record = peers.remove(&id)?;
        info!(peer = %record.handshake.addr, "peer disconnected");
        Some(peers.len())
    }

    /// Account traffic on a connection; the totals include unknown ids.
    pub fn record_traffic(&self, id: ConnectionId, recv: u64, sent: u64) {
        self.total_recv.fetch_add(recv, Ordering::Relaxed);
        self.total_sent.fetch_add(sent, Ordering::Relaxed);
        if let Some(record) = self.peers.write().get_mut(&id) {
            record.bytes_recv = record.bytes_recv.saturating_add(recv);
            record.bytes_sent = record.bytes_sent.saturating_add(sent);
        }
    }

    /// Remember the best chain work a peer claims. Never lowers it.
    pub fn record_announced_work(&self, id: ConnectionId, work: U256) {
        if let Some(record) = self.peers.write().get_mut(&id) {
            if work > record.announced_work {
                debug!(peer = %record.handshake.addr, %work, "peer announced more work");
                record.announced_work = work;
            }
        }
    }

    pub fn best_announced_work(&self) -> U256 {
        self.peers
            .read()
            .values()
            .map(|record| record.announced_work)
            .max()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Vec<NodeShortStat> {
        self.peers.read().values().map(PeerRecord::short_stat).collect()
    }

    pub fn count(&self) -> usize {
        self.peers.read().len()
    }

    /// Per-connection (received, sent) bytes.
    pub fn traffic(&self, id: ConnectionId) -> Option<(u64, u64)> {
        self.peers
            .read()
            .get(&id)
            .map(|record| (record.bytes_recv, record.bytes_sent))
    }

    pub fn total_bytes_recv(&self) -> u64 {
        self.total_recv.load(Ordering::Relaxed)
    }

    pub fn total_bytes_sent(&self) -> u64 {
        self.total_sent.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake(port: u16) -> PeerHandshake {
        PeerHandshake {
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            protocol_version: 70002,
            user_agent: "/peg:0.1.0/".into(),
            start_height: 42,
        }
    }

    #[test]
    fn test_connect_disconnect_counts() {
        let table = PeerTable::new();
        assert_eq!(table.connect(ConnectionId(1), handshake(1)), Some(1));
        assert_eq!(table.connect(ConnectionId(2), handshake(2)), Some(2));
        assert_eq!(table.connect(ConnectionId(2), handshake(2)), None);
        assert_eq!(table.disconnect(ConnectionId(1)), Some(1));
        assert_eq!(table.disconnect(ConnectionId(1)), None);
        assert_eq!(table.count(), 1);
    }

    #[test]
    fn test_snapshot_is_by_value() {
        let table = PeerTable::new();
        table.connect(ConnectionId(7), handshake(9000));
        let snapshot = table.snapshot();
        table.disconnect(ConnectionId(7));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].addr_name, "127.0.0.1:9000");
        assert_eq!(snapshot[0].starting_height, 42);
        assert!(table.snapshot().is_empty());
    }

    #[test]
    fn test_traffic_totals() {
        let table = PeerTable::new();
        table.connect(ConnectionId(1), handshake(1));
        table.record_traffic(ConnectionId(1), 100, 40);
        table.record_traffic(ConnectionId(99), 5, 5);

        assert_eq!(table.traffic(ConnectionId(1)), Some((100, 40)));
        assert_eq!(table.total_bytes_recv(), 105);
        assert_eq!(table.total_bytes_sent(), 45);
    }

    #[test]
    fn test_announced_work_only_rises() {
        let table = PeerTable::new();
        table.connect(ConnectionId(1), handshake(1));
        table.connect(ConnectionId(2), handshake(2));
        table.record_announced_work(ConnectionId(1), U256::from(10));
        table.record_announced_work(ConnectionId(1), U256::from(3));
        table.record_announced_work(ConnectionId(2), U256::from(7));
        assert_eq!(table.best_announced_work(), U256::from(10));

        table.disconnect(ConnectionId(1));
        assert_eq!(table.best_announced_work(), U256::from(7));
    }
}
