//! Network parameters and node configuration
//!
//! Consensus parameters (`ChainParams`) are fixed per network; a node config
//! file may override them only for private test networks. Every field has a
//! default, so an empty JSON object is a valid config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::PublicKey;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid parameter `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Main,
    Test,
    Regtest,
}

impl Network {
    pub fn name(&self) -> &'static str {
        match self {
            Network::Main => "main",
            Network::Test => "test",
            Network::Regtest => "regtest",
        }
    }
}

/// Peg voting rule. These are consensus parameters: every node on a network
/// must run with identical values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PegParams {
    /// First height whose vote is counted
    pub start_height: u64,
    /// Blocks per voting interval
    pub interval_length: u64,
    pub initial_supply_index: u32,
    pub max_supply_index: u32,
    /// Supply index change applied by a decided inflate or deflate interval
    pub step: u32,
    /// Share of the interval (percent) the leading option needs; `None` means plain plurality
    pub quorum_percent: Option<u8>,
}

impl Default for PegParams {
    fn default() -> Self {
        Self {
            start_height: 1,
            interval_length: 200,
            initial_supply_index: 0,
            max_supply_index: 1198,
            step: 1,
            quorum_percent: None,
        }
    }
}

impl PegParams {
    /// Zero-based interval number, `None` before voting starts.
    pub fn interval_of(&self, height: u64) -> Option<u64> {
        height
            .checked_sub(self.start_height)
            .map(|offset| offset / self.interval_length)
    }

    pub fn interval_start(&self, height: u64) -> Option<u64> {
        self.interval_of(height)
            .map(|interval| self.start_height + interval * self.interval_length)
    }

    pub fn is_interval_start(&self, height: u64) -> bool {
        height
            .checked_sub(self.start_height)
            .is_some_and(|offset| offset % self.interval_length == 0)
    }

    pub fn is_interval_end(&self, height: u64) -> bool {
        height
            .checked_sub(self.start_height)
            .is_some_and(|offset| (offset + 1) % self.interval_length == 0)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_height == 0 {
            return Err(invalid("peg.start_height", "genesis cannot vote"));
        }
        if self.interval_length == 0 {
            return Err(invalid("peg.interval_length", "must be positive"));
        }
        if self.initial_supply_index > self.max_supply_index {
            return Err(invalid("peg.initial_supply_index", "above max_supply_index"));
        }
        if self.step == 0 || self.step > self.max_supply_index.max(1) {
            return Err(invalid("peg.step", "must be in 1..=max_supply_index"));
        }
        if let Some(quorum) = self.quorum_percent {
            if quorum == 0 || quorum > 100 {
                return Err(invalid("peg.quorum_percent", "must be in 1..=100"));
            }
        }
        Ok(())
    }
}

/// Consensus and policy parameters of one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    pub network: Network,
    pub genesis_timestamp: u64,
    pub genesis_bits: u32,
    /// Easiest target a header may claim (compact form)
    pub pow_limit_bits: u32,
    /// Maximum new coins a coinbase may create, on top of fees
    pub block_subsidy: u64,
    pub peg: PegParams,
    /// Headers waiting for an unknown parent before the oldest is dropped
    pub max_orphans: usize,
    /// Tip age below which the node may leave initial block download
    pub max_tip_age_secs: u64,
    /// Hex x-only keys allowed to sign network alerts
    pub alert_keys: Vec<String>,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::for_network(Network::Main)
    }
}

impl ChainParams {
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Main => Self {
                network,
                genesis_timestamp: 1_405_000_000,
                genesis_bits: 0x1e0f_ffff,
                pow_limit_bits: 0x1e0f_ffff,
                block_subsidy: 50 * 100_000_000,
                peg: PegParams::default(),
                max_orphans: 750,
                max_tip_age_secs: 24 * 60 * 60,
                alert_keys: Vec::new(),
            },
            Network::Test => Self {
                network,
                genesis_timestamp: 1_405_000_001,
                genesis_bits: 0x1f00_ffff,
                pow_limit_bits: 0x1f00_ffff,
                block_subsidy: 50 * 100_000_000,
                peg: PegParams {
                    interval_length: 100,
                    ..PegParams::default()
                },
                max_orphans: 750,
                max_tip_age_secs: 24 * 60 * 60,
                alert_keys: Vec::new(),
            },
            Network::Regtest => Self {
                network,
                genesis_timestamp: 1_296_688_602,
                genesis_bits: 0x207f_ffff,
                pow_limit_bits: 0x207f_ffff,
                block_subsidy: 50 * 100_000_000,
                peg: PegParams {
                    interval_length: 10,
                    max_supply_index: 100,
                    ..PegParams::default()
                },
                max_orphans: 100,
                max_tip_age_secs: 24 * 60 * 60,
                alert_keys: Vec::new(),
            },
        }
    }

    /// Decoded alert verification keys.
    pub fn alert_public_keys(&self) -> Result<Vec<PublicKey>, ConfigError> {
        self.alert_keys
            .iter()
            .map(|key| PublicKey::from_hex(key).map_err(|e| invalid("alert_keys", e.to_string())))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.peg.validate()?;
        if crate::consensus::compact_to_target(self.pow_limit_bits).is_none() {
            return Err(invalid("pow_limit_bits", "not a valid compact target"));
        }
        if crate::consensus::compact_to_target(self.genesis_bits).is_none() {
            return Err(invalid("genesis_bits", "not a valid compact target"));
        }
        if self.max_orphans == 0 {
            return Err(invalid("max_orphans", "must be positive"));
        }
        self.alert_public_keys()?;
        Ok(())
    }
}

/// Node settings loaded at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub network: Network,
    /// Full parameter override; only honoured off main net
    pub params: Option<ChainParams>,
    /// Where the block store lives; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    pub rpc_port: u16,
    pub poll_interval_ms: u64,
    pub bus_capacity: usize,
    pub rescan_batch: usize,
    /// `tracing` filter directive used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: Network::Main,
            params: None,
            data_dir: None,
            rpc_port: 19915,
            poll_interval_ms: 500,
            bus_capacity: 1024,
            rescan_batch: 1000,
            log_filter: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Defaults for `network`, in memory.
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parameters in effect for this node.
    pub fn chain_params(&self) -> ChainParams {
        match (&self.params, self.network) {
            (Some(params), network) if network != Network::Main => params.clone(),
            _ => ChainParams::for_network(self.network),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(params) = &self.params {
            if self.network == Network::Main {
                return Err(invalid("params", "cannot override main net parameters"));
            }
            if params.network != self.network {
                return Err(invalid("params.network", "does not match `network`"));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms", "must be positive"));
        }
        if self.bus_capacity == 0 {
            return Err(invalid("bus_capacity", "must be positive"));
        }
        if self.rescan_batch == 0 {
            return Err(invalid("rescan_batch", "must be positive"));
        }
        self.chain_params().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_params_validate() {
        for network in [Network::Main, Network::Test, Network::Regtest] {
            ChainParams::for_network(network).validate().unwrap();
        }
    }

    #[test]
    fn test_empty_json_is_default() {
        let config = NodeConfig::from_json("{}").unwrap();
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.chain_params().network, Network::Main);
    }

    #[test]
    fn test_regtest_override() {
        let raw = r#"{
            "network": "regtest",
            "params": { "network": "regtest", "peg": { "interval_length": 100, "step": 3 } }
        }"#;
        let config = NodeConfig::from_json(raw).unwrap();
        let params = config.chain_params();
        assert_eq!(params.peg.interval_length, 100);
        assert_eq!(params.peg.step, 3);
        assert_eq!(params.peg.start_height, 1);
    }

    #[test]
    fn test_main_override_rejected() {
        let raw = r#"{ "params": { "network": "main" } }"#;
        assert!(matches!(
            NodeConfig::from_json(raw),
            Err(ConfigError::Invalid { field: "params", .. })
        ));
    }

    #[test]
    fn test_bad_peg_params_rejected() {
        let mut peg = PegParams::default();
        peg.interval_length = 0;
        assert!(peg.validate().is_err());

        let mut peg = PegParams::default();
        peg.quorum_percent = Some(101);
        assert!(peg.validate().is_err());
    }

    #[test]
    fn test_bad_alert_key_rejected() {
        let mut params = ChainParams::for_network(Network::Regtest);
        params.alert_keys = vec!["not-hex".into()];
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_interval_boundaries() {
        let peg = PegParams { start_height: 1, interval_length: 100, ..PegParams::default() };
        assert_eq!(peg.interval_of(0), None);
        assert_eq!(peg.interval_of(1), Some(0));
        assert_eq!(peg.interval_of(100), Some(0));
        assert_eq!(peg.interval_of(101), Some(1));
        assert!(peg.is_interval_start(1));
        assert!(peg.is_interval_end(100));
        assert!(peg.is_interval_start(101));
        assert!(!peg.is_interval_end(0));
        assert_eq!(peg.interval_start(150), Some(101));
    }
}
