//! Node and protocol configuration types.
//!
//! Only the types live here; file loading and flag parsing belong to the
//! embedding binary.

use std::time::Duration;

use serde::Deserialize;

use crate::util::Fixed8;

/// Network magic values of the well-known Cobalt networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum NetMode {
    MainNet,
    TestNet,
    PrivNet,
}

impl NetMode {
    pub fn magic(self) -> u32 {
        match self {
            NetMode::MainNet => 0x00c0ba17,
            NetMode::TestNet => 0x01c0ba17,
            NetMode::PrivNet => 0xdeadbeef,
        }
    }
}

/// Chain-level parameters every node on a network must agree on.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ProtocolConfig {
    /// Network magic, part of every message frame.
    pub magic: u32,
    /// Hex-encoded compressed public keys of the standby validators.
    pub standby_validators: Vec<String>,
    /// Initial peer addresses.
    pub seed_list: Vec<String>,
    /// Transactions paying less than this are low priority.
    pub low_priority_threshold: Fixed8,
    /// Smallest acceptable network fee; zero admits free transactions.
    pub minimum_network_fee: Fixed8,
    /// Target seconds between blocks.
    pub seconds_per_block: u32,
    /// Verify witness scripts of incoming blocks.
    pub verify_blocks: bool,
    /// Verify transactions inside incoming blocks.
    pub verify_transactions: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            magic: NetMode::PrivNet.magic(),
            standby_validators: Vec::new(),
            seed_list: Vec::new(),
            low_priority_threshold: Fixed8::from_raw(100_000), // 0.001
            minimum_network_fee: Fixed8::ZERO,
            seconds_per_block: 15,
            verify_blocks: true,
            verify_transactions: false,
        }
    }
}

/// Settings of the local node process.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NodeConfig {
    /// Listen address, e.g. "0.0.0.0".
    pub address: String,
    pub port: u16,
    pub user_agent: String,
    /// Whether to forward inventory to peers.
    pub relay: bool,
    pub min_peers: usize,
    pub max_peers: usize,
    /// Connections to attempt when below `min_peers`.
    pub attempt_conn_peers: usize,
    #[serde(with = "seconds")]
    pub dial_timeout: Duration,
    #[serde(with = "seconds")]
    pub proto_tick_interval: Duration,
    pub mempool_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            address: "0.0.0.0".into(),
            port: 21333,
            user_agent: concat!("/cobalt:", env!("CARGO_PKG_VERSION"), "/").into(),
            relay: true,
            min_peers: 5,
            max_peers: 100,
            attempt_conn_peers: 20,
            dial_timeout: Duration::from_secs(3),
            proto_tick_interval: Duration::from_secs(5),
            mempool_capacity: 50_000,
        }
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let node = NodeConfig::default();
        assert!(node.min_peers < node.max_peers);
        assert!(node.user_agent.starts_with("/cobalt:"));

        let proto = ProtocolConfig::default();
        assert_eq!(proto.magic, NetMode::PrivNet.magic());
    }

    #[test]
    fn deserializes_from_json() {
        let proto: ProtocolConfig = serde_json::from_str(
            r#"{"Magic": 42, "SecondsPerBlock": 5, "LowPriorityThreshold": "0.5"}"#,
        )
        .unwrap();
        assert_eq!(proto.magic, 42);
        assert_eq!(proto.seconds_per_block, 5);
        assert_eq!(proto.low_priority_threshold, Fixed8::from_raw(50_000_000));

        let node: NodeConfig =
            serde_json::from_str(r#"{"Port": 21334, "DialTimeout": 10}"#).unwrap();
        assert_eq!(node.port, 21334);
        assert_eq!(node.dial_timeout, Duration::from_secs(10));
    }
}
