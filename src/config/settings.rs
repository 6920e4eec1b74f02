use log::warn;
use std::env;
use std::path::PathBuf;

use crate::storage::SNAPSHOT_FILE;

pub const DEFAULT_LISTEN_PORT: u16 = 1317;
pub const DEFAULT_P2P_PORT: u16 = 6001;
const DEFAULT_DATA_DIR: &str = "./data";

const LISTEN_PORT_KEY: &str = "LISTEN_PORT";
const P2P_PORT_KEY: &str = "P2P_PORT";
const PEERS_KEY: &str = "PEERS";
const DATA_DIR_KEY: &str = "DATA_DIR";

/// Bootstrap configuration for one node. Read once from the environment
/// at startup, optionally overridden by CLI flags, then passed around as
/// a plain value.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// API port advertised in the gossip handshake.
    pub listen_port: u16,
    /// Port the gossip listener binds.
    pub p2p_port: u16,
    /// Bootstrap peer endpoints, `host:port`.
    pub peers: Vec<String>,
    /// Directory holding the snapshot file.
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            listen_port: DEFAULT_LISTEN_PORT,
            p2p_port: DEFAULT_P2P_PORT,
            peers: Vec::new(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

impl NodeConfig {
    pub fn from_env() -> NodeConfig {
        let mut config = NodeConfig::default();

        if let Ok(raw) = env::var(LISTEN_PORT_KEY) {
            match raw.parse() {
                Ok(port) => config.listen_port = port,
                Err(_) => warn!("Ignoring invalid {LISTEN_PORT_KEY}={raw}"),
            }
        }
        if let Ok(raw) = env::var(P2P_PORT_KEY) {
            match raw.parse() {
                Ok(port) => config.p2p_port = port,
                Err(_) => warn!("Ignoring invalid {P2P_PORT_KEY}={raw}"),
            }
        }
        if let Ok(raw) = env::var(PEERS_KEY) {
            config.peers = parse_peer_list(&raw);
        }
        if let Ok(raw) = env::var(DATA_DIR_KEY) {
            config.data_dir = PathBuf::from(raw);
        }

        config
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE)
    }
}

/// Comma-separated peer endpoints, blanks skipped.
pub fn parse_peer_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|peer| peer.trim())
        .filter(|peer| !peer.is_empty())
        .map(|peer| peer.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.listen_port, 1317);
        assert_eq!(config.p2p_port, 6001);
        assert!(config.peers.is_empty());
        assert!(config.snapshot_path().ends_with("chain.json"));
    }

    #[test]
    fn test_parse_peer_list() {
        assert_eq!(
            parse_peer_list("127.0.0.1:6001, 10.0.0.2:6001 ,,"),
            vec!["127.0.0.1:6001".to_string(), "10.0.0.2:6001".to_string()]
        );
        assert!(parse_peer_list("").is_empty());
    }
}
