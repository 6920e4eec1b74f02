//! Monetary policy constants

/// Base coinbase reward per mined block, before collected fees.
pub const BASE_REWARD: u64 = 50;

/// A fresh chain's genesis coinbase credits the miner with this many
/// base rewards.
pub const GENESIS_PREMINE_MULTIPLIER: u64 = 10;

/// Block capacity including the coinbase, so up to 99 transfers.
pub const MAX_BLOCK_TRANSACTIONS: usize = 100;
