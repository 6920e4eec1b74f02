//! Error handling for the node
//!
//! Every fallible operation in the crate returns [`Result`] with a
//! [`NodeError`] describing which boundary rejected the input.

use std::fmt;

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, NodeError>;

/// Error types for all node operations
#[derive(Debug, Clone)]
pub enum NodeError {
    /// A field is missing, has the wrong type, or the wrong shape
    Malformed(String),
    /// Signature recovery does not yield the claimed sender address
    InvalidSignature(String),
    /// The ledger cannot cover `amount + fee` for the sender
    InsufficientFunds { required: u64, available: u64 },
    /// Transaction id already known to the mempool or the chain
    DuplicateTransaction(String),
    /// Transaction-level invariant violated
    InvalidTransaction(String),
    /// Block index/link/proof-of-work/transaction-set invariant violated
    InvalidBlock(String),
    /// A received tip neither extends our chain nor links to our tip
    ChainMismatch(String),
    /// Address fails the `cosmos` + 40-hex-chars shape
    InvalidAddress(String),
    /// Cryptographic operation errors
    Crypto(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// File I/O errors
    Io(String),
    /// Network communication errors
    Network(String),
    /// Configuration errors
    Config(String),
    /// Mining engine errors
    Mining(String),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Malformed(msg) => write!(f, "Malformed input: {msg}"),
            NodeError::InvalidSignature(msg) => write!(f, "Invalid signature: {msg}"),
            NodeError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            NodeError::DuplicateTransaction(id) => write!(f, "Duplicate transaction: {id}"),
            NodeError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {msg}"),
            NodeError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
            NodeError::ChainMismatch(msg) => write!(f, "Chain mismatch: {msg}"),
            NodeError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            NodeError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            NodeError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            NodeError::Io(msg) => write!(f, "I/O error: {msg}"),
            NodeError::Network(msg) => write!(f, "Network error: {msg}"),
            NodeError::Config(msg) => write!(f, "Configuration error: {msg}"),
            NodeError::Mining(msg) => write!(f, "Mining error: {msg}"),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::Serialization(err.to_string())
    }
}
