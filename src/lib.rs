//! # cosmos-chain
//!
//! A small proof-of-work blockchain node: an append-only chain of
//! cryptographically linked blocks, a UTXO ledger deciding what is
//! spendable, a mining engine working over a fee-sorted mempool, and a
//! gossip layer that keeps a network of nodes on the same longest valid
//! chain.
//!
//! ## How the code is organized
//! - `core/`: blocks, transactions, the chain, merkle hashing, difficulty
//! - `storage/`: the UTXO ledger, the mempool and snapshot persistence
//! - `mining/`: the proof-of-work worker and its statistics
//! - `network/`: peer gossip, handshake and chain synchronization
//! - `node/`: the owning structure that wires everything together
//! - `wallet/`: secp256k1 keypairs and `cosmos` address derivation
//! - `config/`: environment-driven bootstrap configuration
//! - `cli/`: the node binary's command-line surface
//! - `utils/`: hashing, hex and recoverable-signature primitives

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod mining;
pub mod network;
pub mod node;
pub mod storage;
pub mod utils;
pub mod wallet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::NodeConfig;
pub use core::{
    Block, Chain, Transaction, TransactionRecord, TxSignature, BASE_REWARD, INITIAL_DIFFICULTY,
};
pub use error::{NodeError, Result};
pub use mining::{MiningEngine, MiningStatus};
pub use network::{GossipServer, Message, MessageKind, PeerRegistry};
pub use node::{ChainState, Node, SubmitReceipt, TransactionInfo, TxStatus};
pub use storage::{Mempool, Snapshot, SnapshotStore, Utxo, UtxoLedger};
pub use wallet::{addresses_equal, derive_address, is_valid_address, Keypair};
