use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::core::merkle;
use crate::core::Transaction;
use crate::error::{NodeError, Result};
use crate::utils::{current_timestamp, sha256_hex};

/// `previous_hash` of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

// The proof-of-work loop checks for cancellation and yields the CPU once
// per this many nonce attempts, keeping shutdown latency bounded.
const POW_YIELD_INTERVAL: u64 = 1_000;

/// A block: header fields plus the ordered transaction list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub previous_hash: String,
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    pub nonce: u64,
    pub hash: String,
    pub merkle_root: String,
}

impl Block {
    /// Create an unmined block. Call [`Block::mine`] to find a nonce that
    /// satisfies the difficulty target.
    pub fn new(index: u64, previous_hash: String, transactions: Vec<Transaction>) -> Result<Block> {
        Self::new_with_timestamp(index, previous_hash, transactions, current_timestamp()?)
    }

    pub(crate) fn new_with_timestamp(
        index: u64,
        previous_hash: String,
        transactions: Vec<Transaction>,
        timestamp: i64,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(NodeError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let mut block = Block {
            index,
            previous_hash,
            timestamp,
            transactions,
            nonce: 0,
            hash: String::new(),
            merkle_root: String::new(),
        };
        block.merkle_root = block.compute_merkle_root();
        block.hash = block.compute_hash();
        Ok(block)
    }

    /// The genesis block is constructed, never mined: `index = 0`,
    /// `previous_hash = "0"`, a single coinbase, no proof-of-work.
    pub fn genesis(coinbase: Transaction) -> Result<Block> {
        Block::new(0, GENESIS_PREVIOUS_HASH.to_string(), vec![coinbase])
    }

    /// Hash over `index ∥ previous_hash ∥ timestamp ∥ transactions ∥ nonce`.
    /// The transaction list is canonicalized as its JSON wire encoding.
    pub fn compute_hash(&self) -> String {
        let tx_json =
            serde_json::to_string(&self.transactions).expect("serialize transaction list");
        let preimage = format!(
            "{}:{}:{}:{}:{}",
            self.index, self.previous_hash, self.timestamp, tx_json, self.nonce
        );
        sha256_hex(preimage.as_bytes())
    }

    pub fn compute_merkle_root(&self) -> String {
        merkle::merkle_root(&self.tx_ids())
    }

    pub fn tx_ids(&self) -> Vec<String> {
        self.transactions
            .iter()
            .map(|tx| tx.tx_id().to_string())
            .collect()
    }

    /// Search for a nonce whose hash carries `difficulty` leading hex
    /// zeros. Increments `hash_counter` per attempt for the mining
    /// statistics. Returns `false` if `cancel` was observed before a
    /// solution was found.
    pub fn mine(&mut self, difficulty: u32, cancel: &AtomicBool, hash_counter: &AtomicU64) -> bool {
        let target = "0".repeat(difficulty as usize);
        let mut attempts: u64 = 0;
        loop {
            self.hash = self.compute_hash();
            hash_counter.fetch_add(1, Ordering::Relaxed);
            if self.hash.starts_with(&target) {
                return true;
            }

            attempts += 1;
            if attempts % POW_YIELD_INTERVAL == 0 {
                if cancel.load(Ordering::Relaxed) {
                    return false;
                }
                std::thread::yield_now();
            }
            self.nonce = self.nonce.wrapping_add(1);
        }
    }

    /// Mine without an external cancel flag. Used by the CLI and tests.
    pub fn mine_blocking(&mut self, difficulty: u32) {
        let cancel = AtomicBool::new(false);
        let counter = AtomicU64::new(0);
        self.mine(difficulty, &cancel, &counter);
    }

    /// The first `difficulty` hex characters of the hash are all `'0'`.
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        self.hash
            .chars()
            .take(difficulty as usize)
            .all(|c| c == '0')
    }

    /// Cached hash re-derives from the block contents and satisfies the
    /// proof-of-work target. Does not validate chain linkage.
    pub fn has_valid_proof(&self, difficulty: u32) -> bool {
        self.hash == self.compute_hash() && self.meets_difficulty(difficulty)
    }

    /// Every member transaction individually validates.
    pub fn has_valid_transactions(&self) -> bool {
        self.transactions.iter().all(|tx| tx.is_valid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Keypair;

    fn coinbase() -> Transaction {
        Transaction::coinbase(&Keypair::generate().address(), 50).unwrap()
    }

    #[test]
    fn test_genesis_shape() {
        let block = Block::genesis(coinbase()).unwrap();
        assert_eq!(block.index, 0);
        assert_eq!(block.previous_hash, GENESIS_PREVIOUS_HASH);
        assert_eq!(block.hash, block.compute_hash());
        assert_eq!(block.transactions.len(), 1);
    }

    #[test]
    fn test_empty_block_rejected() {
        assert!(Block::new(1, "prev".to_string(), vec![]).is_err());
    }

    #[test]
    fn test_mining_produces_leading_zeros() {
        let mut block = Block::new(1, "prev".to_string(), vec![coinbase()]).unwrap();
        block.mine_blocking(2);
        assert!(block.hash.starts_with("00"));
        assert!(block.has_valid_proof(2));
    }

    #[test]
    fn test_mutation_invalidates_proof() {
        let mut block = Block::new(1, "prev".to_string(), vec![coinbase()]).unwrap();
        block.mine_blocking(2);

        block.transactions.push(coinbase());
        assert!(!block.has_valid_proof(2));
    }

    #[test]
    fn test_merkle_root_matches_transactions() {
        let block = Block::new(1, "prev".to_string(), vec![coinbase(), coinbase()]).unwrap();
        assert_eq!(block.merkle_root, block.compute_merkle_root());
    }

    #[test]
    fn test_mining_observes_cancellation() {
        let mut block = Block::new(1, "prev".to_string(), vec![coinbase()]).unwrap();
        let cancel = AtomicBool::new(true);
        let counter = AtomicU64::new(0);

        // Difficulty 8 cannot plausibly be solved within one yield interval,
        // so the pre-set flag must stop the loop.
        assert!(!block.mine(8, &cancel, &counter));
        assert!(counter.load(Ordering::Relaxed) <= POW_YIELD_INTERVAL + 1);
    }

    #[test]
    fn test_json_round_trip_is_bit_preserving() {
        let mut block = Block::new(3, "prev".to_string(), vec![coinbase()]).unwrap();
        block.mine_blocking(1);

        let json = serde_json::to_string(&block).unwrap();
        let decoded: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(block, decoded);
    }
}
