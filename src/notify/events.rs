//! Events published on the node's notification bus

use serde::{Deserialize, Serialize};

use crate::alert::AlertStatus;
use crate::crypto::Hash;
use crate::p2p::NodeShortStat;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeEvent {
    /// Active chain height changed
    BestHeightChanged(u64),
    ConnectionCountChanged(usize),
    ConnectionsSnapshotChanged(Vec<NodeShortStat>),
    AlertChanged {
        hash: Hash,
        status: AlertStatus,
        priority: u32,
        text: String,
    },
    BytesCountersChanged {
        recv: u64,
        sent: u64,
    },
}

/// Event kinds, for subscribers that only care about some of them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BestHeight,
    ConnectionCount,
    ConnectionsSnapshot,
    Alert,
    BytesCounters,
}

impl NodeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            NodeEvent::BestHeightChanged(_) => EventKind::BestHeight,
            NodeEvent::ConnectionCountChanged(_) => EventKind::ConnectionCount,
            NodeEvent::ConnectionsSnapshotChanged(_) => EventKind::ConnectionsSnapshot,
            NodeEvent::AlertChanged { .. } => EventKind::Alert,
            NodeEvent::BytesCountersChanged { .. } => EventKind::BytesCounters,
        }
    }
}
