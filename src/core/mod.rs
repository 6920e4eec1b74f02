//! Core consensus types
//!
//! This module contains the fundamental blockchain components: blocks,
//! transactions, the chain itself, the merkle tree and difficulty
//! retargeting.

pub mod block;
pub mod chain;
pub mod difficulty;
pub mod merkle;
pub mod monetary;
pub mod transaction;

pub use block::{Block, GENESIS_PREVIOUS_HASH};
pub use chain::Chain;
pub use difficulty::{
    DifficultyAdjustment, INITIAL_DIFFICULTY, MAX_DIFFICULTY, MIN_DIFFICULTY, RETARGET_INTERVAL,
    TARGET_BLOCK_TIME_MS,
};
pub use monetary::{BASE_REWARD, GENESIS_PREMINE_MULTIPLIER, MAX_BLOCK_TRANSACTIONS};
pub use transaction::{Transaction, TransactionRecord, TxSignature};
