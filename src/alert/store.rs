//! Signed network alerts
//!
//! An alert is identified by the hash of its encoded payload and signed with
//! one of the configured alert keys. Alerts are immutable once admitted; a
//! later alert cancels earlier ones by listing their hashes, and readers
//! filter cancelled and expired alerts at lookup time.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::crypto::{hash_bytes, Hash, PrivateKey, PublicKey, SchnorrSignature};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlertError {
    #[error("Alert {0} already known")]
    AlreadyKnown(Hash),
    #[error("Alert signature does not match any alert key")]
    BadSignature,
    #[error("Alert expired at {0}")]
    Expired(u64),
    #[error("Malformed alert payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    New,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub version: u32,
    /// Unix time after which the alert is no longer shown or relayed
    pub expiration: u64,
    /// Hashes of earlier alerts this one withdraws
    pub cancels: Vec<Hash>,
    /// Higher shows first
    pub priority: u32,
    pub status_bar: String,
    pub comment: String,
}

/// Wire form: the encoded payload and a signature over its hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAlert {
    pub payload: Vec<u8>,
    pub signature: SchnorrSignature,
}

impl SignedAlert {
    pub fn sign(payload: &AlertPayload, key: &PrivateKey) -> Result<Self, AlertError> {
        let encoded =
            bincode::serialize(payload).map_err(|e| AlertError::Malformed(e.to_string()))?;
        let signature = key.sign(&hash_bytes(&encoded));
        Ok(Self {
            payload: encoded,
            signature,
        })
    }

    pub fn hash(&self) -> Hash {
        hash_bytes(&self.payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub hash: Hash,
    pub payload: AlertPayload,
}

impl Alert {
    pub fn is_expired(&self, now: u64) -> bool {
        self.payload.expiration <= now
    }
}

/// Result of admitting an alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admitted {
    pub alert: Alert,
    pub changes: Vec<AlertChange>,
}

/// One status change to announce on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertChange {
    pub hash: Hash,
    pub status: AlertStatus,
    pub priority: u32,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct AlertStore {
    keys: Vec<PublicKey>,
    alerts: HashMap<Hash, Alert>,
    cancelled: HashSet<Hash>,
}

impl AlertStore {
    pub fn new(keys: Vec<PublicKey>) -> Self {
        Self {
            keys,
            alerts: HashMap::new(),
            cancelled: HashSet::new(),
        }
    }

    /// Admit an alert. The returned changes are what to announce: the new
    /// alert itself (unless an earlier alert already cancelled it) and every
    /// known alert it cancels.
    pub fn receive(&mut self, signed: &SignedAlert, now: u64) -> Result<Admitted, AlertError> {
        let hash = signed.hash();
        if self.alerts.contains_key(&hash) {
            return Err(AlertError::AlreadyKnown(hash));
        }
        if !self.keys.iter().any(|key| key.verify(&hash, &signed.signature)) {
            debug!(%hash, "alert with bad signature");
            return Err(AlertError::BadSignature);
        }
        let payload: AlertPayload = bincode::deserialize(&signed.payload)
            .map_err(|e| AlertError::Malformed(e.to_string()))?;
        if payload.expiration <= now {
            return Err(AlertError::Expired(payload.expiration));
        }

        let mut changes = Vec::new();
        for target in &payload.cancels {
            if !self.cancelled.insert(*target) {
                continue;
            }
            if let Some(old) = self.alerts.get(target) {
                changes.push(AlertChange {
                    hash: *target,
                    status: AlertStatus::Cancelled,
                    priority: old.payload.priority,
                    text: old.payload.status_bar.clone(),
                });
            }
        }

        if !self.cancelled.contains(&hash) {
            changes.push(AlertChange {
                hash,
                status: AlertStatus::New,
                priority: payload.priority,
                text: payload.status_bar.clone(),
            });
        }

        info!(%hash, priority = payload.priority, cancels = payload.cancels.len(), "alert accepted");
        let alert = Alert { hash, payload };
        self.alerts.insert(hash, alert.clone());
        Ok(Admitted { alert, changes })
    }

    pub fn get(&self, hash: &Hash) -> Option<&Alert> {
        self.alerts.get(hash)
    }

    pub fn status(&self, hash: &Hash) -> Option<AlertStatus> {
        self.alerts.get(hash).map(|_| {
            if self.cancelled.contains(hash) {
                AlertStatus::Cancelled
            } else {
                AlertStatus::New
            }
        })
    }

    /// Alerts neither cancelled nor expired, highest priority first.
    pub fn active(&self, now: u64) -> Vec<&Alert> {
        let mut active: Vec<&Alert> = self
            .alerts
            .values()
            .filter(|alert| !self.cancelled.contains(&alert.hash) && !alert.is_expired(now))
            .collect();
        active.sort_by(|a, b| {
            b.payload
                .priority
                .cmp(&a.payload.priority)
                .then_with(|| a.hash.cmp(&b.hash))
        });
        active
    }

    /// Text of the highest-priority active alert.
    pub fn status_bar_warning(&self, now: u64) -> Option<String> {
        self.active(now)
            .first()
            .map(|alert| alert.payload.status_bar.clone())
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}
