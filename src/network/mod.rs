//! Peer gossip: message frames, the peer table and the gossip server

pub mod message;
pub mod peers;
pub mod server;

pub use message::{HandshakePayload, Message, MessageKind};
pub use peers::PeerRegistry;
pub use server::GossipServer;
