//! Bootstrap configuration

pub mod settings;

pub use settings::{parse_peer_list, NodeConfig, DEFAULT_LISTEN_PORT, DEFAULT_P2P_PORT};
