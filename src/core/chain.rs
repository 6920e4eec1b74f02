use serde::{Deserialize, Serialize};

use crate::core::difficulty::{DifficultyAdjustment, INITIAL_DIFFICULTY, RETARGET_INTERVAL};
use crate::core::monetary::{BASE_REWARD, GENESIS_PREMINE_MULTIPLIER};
use crate::core::{Block, Transaction, GENESIS_PREVIOUS_HASH};
use crate::error::{NodeError, Result};

/// The ordered sequence of blocks plus the difficulty the next block must
/// be mined at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    blocks: Vec<Block>,
    difficulty: u32,
}

impl Chain {
    pub fn new(genesis: Block) -> Chain {
        Chain {
            blocks: vec![genesis],
            difficulty: INITIAL_DIFFICULTY,
        }
    }

    /// Fresh chain whose genesis coinbase credits the miner with the
    /// premine (10 base rewards).
    pub fn with_genesis(miner_address: &str) -> Result<Chain> {
        let coinbase =
            Transaction::coinbase(miner_address, GENESIS_PREMINE_MULTIPLIER * BASE_REWARD)?;
        Ok(Chain::new(Block::genesis(coinbase)?))
    }

    /// Rebuild a chain from our own snapshot. Links, hashes and
    /// transactions are re-checked; the recorded difficulty is trusted
    /// because the difficulty knob may have diverged from the retarget
    /// schedule.
    pub fn from_snapshot(blocks: Vec<Block>, difficulty: u32) -> Result<Chain> {
        Self::validate_links(&blocks)?;
        Ok(Chain {
            blocks,
            difficulty: DifficultyAdjustment::clamp(difficulty),
        })
    }

    pub fn latest(&self) -> &Block {
        self.blocks
            .last()
            .expect("Chain always holds at least the genesis block")
    }

    /// Height of the tip (0 for a genesis-only chain).
    pub fn height(&self) -> u64 {
        self.latest().index
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn set_difficulty(&mut self, difficulty: u32) -> Result<()> {
        if DifficultyAdjustment::clamp(difficulty) != difficulty {
            return Err(NodeError::Config(format!(
                "Difficulty {difficulty} is outside the valid range"
            )));
        }
        self.difficulty = difficulty;
        Ok(())
    }

    /// Structural link between two adjacent blocks: index, parent hash,
    /// hash re-derivation, merkle root and transaction validity. The
    /// proof-of-work depth is checked separately because it depends on
    /// which retarget window the block falls in.
    fn check_link(new: &Block, prev: &Block) -> Result<()> {
        if new.index != prev.index + 1 {
            return Err(NodeError::InvalidBlock(format!(
                "Expected index {}, got {}",
                prev.index + 1,
                new.index
            )));
        }
        if new.previous_hash != prev.hash {
            return Err(NodeError::InvalidBlock(format!(
                "Block {} does not link to the previous hash",
                new.index
            )));
        }
        if new.hash != new.compute_hash() {
            return Err(NodeError::InvalidBlock(format!(
                "Block {} hash does not re-derive from its contents",
                new.index
            )));
        }
        if new.merkle_root != new.compute_merkle_root() {
            return Err(NodeError::InvalidBlock(format!(
                "Block {} merkle root does not match its transactions",
                new.index
            )));
        }
        if !new.has_valid_transactions() {
            return Err(NodeError::InvalidBlock(format!(
                "Block {} contains an invalid transaction",
                new.index
            )));
        }
        Ok(())
    }

    /// A candidate successor is structurally linked to `prev` and carries
    /// proof-of-work at the given difficulty.
    pub fn is_valid_new_block(new: &Block, prev: &Block, difficulty: u32) -> Result<()> {
        Self::check_link(new, prev)?;
        if !new.meets_difficulty(difficulty) {
            return Err(NodeError::InvalidBlock(format!(
                "Block {} does not satisfy difficulty {difficulty}",
                new.index
            )));
        }
        Ok(())
    }

    fn check_genesis(blocks: &[Block]) -> Result<&Block> {
        let genesis = blocks
            .first()
            .ok_or_else(|| NodeError::InvalidBlock("Chain is empty".to_string()))?;
        if genesis.index != 0
            || genesis.previous_hash != GENESIS_PREVIOUS_HASH
            || genesis.hash != genesis.compute_hash()
        {
            return Err(NodeError::InvalidBlock(
                "Genesis block has the wrong shape".to_string(),
            ));
        }
        Ok(genesis)
    }

    /// Genesis shape plus pairwise structural validation, without
    /// proof-of-work depth.
    fn validate_links(blocks: &[Block]) -> Result<()> {
        Self::check_genesis(blocks)?;
        for pair in blocks.windows(2) {
            Self::check_link(&pair[1], &pair[0])?;
        }
        Ok(())
    }

    /// Full validation of a foreign chain: structural checks plus
    /// proof-of-work under the difficulty folded from the initial value
    /// through the candidate's own retarget schedule. Genesis is exempt
    /// from proof-of-work. Returns the difficulty the next block would be
    /// mined at.
    pub fn validate_blocks(blocks: &[Block]) -> Result<u32> {
        Self::check_genesis(blocks)?;

        let mut difficulty = INITIAL_DIFFICULTY;
        for i in 1..blocks.len() {
            Self::is_valid_new_block(&blocks[i], &blocks[i - 1], difficulty)?;
            let tip = &blocks[i];
            if DifficultyAdjustment::should_retarget(tip.index) {
                let window_start = &blocks[(tip.index - RETARGET_INTERVAL) as usize];
                difficulty = DifficultyAdjustment::next_difficulty(
                    difficulty,
                    window_start.timestamp,
                    tip.timestamp,
                );
            }
        }
        Ok(difficulty)
    }

    /// Validate against the current tip and difficulty, append, then
    /// retarget if the new tip closes a window.
    pub fn try_append(&mut self, block: Block) -> Result<()> {
        Self::is_valid_new_block(&block, self.latest(), self.difficulty)?;
        self.blocks.push(block);
        self.retarget_after_append();
        Ok(())
    }

    fn retarget_after_append(&mut self) {
        let tip = self.latest();
        if DifficultyAdjustment::should_retarget(tip.index) {
            let window_start = &self.blocks[(tip.index - RETARGET_INTERVAL) as usize];
            self.difficulty = DifficultyAdjustment::next_difficulty(
                self.difficulty,
                window_start.timestamp,
                tip.timestamp,
            );
        }
    }

    /// Longest-chain rule: adopt the candidate iff it is strictly longer
    /// and fully valid. Equal length keeps the local chain. Returns
    /// whether a replacement happened.
    pub fn replace(&mut self, candidate: Vec<Block>) -> Result<bool> {
        if candidate.len() <= self.blocks.len() {
            return Ok(false);
        }
        let next_difficulty = Self::validate_blocks(&candidate)?;
        self.blocks = candidate;
        self.difficulty = next_difficulty;
        Ok(true)
    }

    pub fn block_by_height(&self, height: u64) -> Option<&Block> {
        self.blocks.get(height as usize)
    }

    pub fn block_by_hash(&self, hash: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.hash == hash)
    }

    /// Paginated slice of blocks starting at `offset`.
    pub fn blocks_range(&self, offset: u64, limit: usize) -> &[Block] {
        let start = (offset as usize).min(self.blocks.len());
        let end = start.saturating_add(limit).min(self.blocks.len());
        &self.blocks[start..end]
    }

    pub fn find_transaction(&self, tx_id: &str) -> Option<(&Block, &Transaction)> {
        for block in &self.blocks {
            if let Some(tx) = block.transactions.iter().find(|tx| tx.tx_id() == tx_id) {
                return Some((block, tx));
            }
        }
        None
    }

    pub fn contains_transaction(&self, tx_id: &str) -> bool {
        self.find_transaction(tx_id).is_some()
    }

    /// Tip height minus the height of the containing block.
    pub fn confirmations(&self, block_index: u64) -> u64 {
        self.height().saturating_sub(block_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::difficulty::TARGET_BLOCK_TIME_MS;
    use crate::wallet::Keypair;

    fn miner() -> Keypair {
        Keypair::generate()
    }

    fn mined_successor(chain: &Chain, to: &str) -> Block {
        let coinbase = Transaction::coinbase(to, BASE_REWARD).unwrap();
        let tip = chain.latest();
        let mut block = Block::new(tip.index + 1, tip.hash.clone(), vec![coinbase]).unwrap();
        block.mine_blocking(chain.difficulty());
        block
    }

    #[test]
    fn test_genesis_chain_shape() {
        let chain = Chain::with_genesis(&miner().address()).unwrap();
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.latest().previous_hash, GENESIS_PREVIOUS_HASH);
        assert_eq!(chain.difficulty(), INITIAL_DIFFICULTY);
        assert_eq!(
            chain.latest().transactions[0].amount(),
            GENESIS_PREMINE_MULTIPLIER * BASE_REWARD
        );
    }

    #[test]
    fn test_append_valid_block() {
        let key = miner();
        let mut chain = Chain::with_genesis(&key.address()).unwrap();
        let block = mined_successor(&chain, &key.address());

        chain.try_append(block).unwrap();
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn test_append_rejects_bad_link() {
        let key = miner();
        let mut chain = Chain::with_genesis(&key.address()).unwrap();

        let mut block = mined_successor(&chain, &key.address());
        block.previous_hash = "f".repeat(64);
        block.mine_blocking(chain.difficulty());
        assert!(chain.try_append(block).is_err());

        let mut block = mined_successor(&chain, &key.address());
        block.index = 5;
        block.mine_blocking(chain.difficulty());
        assert!(chain.try_append(block).is_err());
    }

    #[test]
    fn test_append_rejects_unmined_block() {
        let key = miner();
        let mut chain = Chain::with_genesis(&key.address()).unwrap();
        let tip = chain.latest();
        let coinbase = Transaction::coinbase(&key.address(), BASE_REWARD).unwrap();
        let block = Block::new(tip.index + 1, tip.hash.clone(), vec![coinbase]).unwrap();

        // Freshly constructed, nonce never searched
        if !block.meets_difficulty(chain.difficulty()) {
            assert!(chain.try_append(block).is_err());
        }
    }

    #[test]
    fn test_replace_prefers_strictly_longer_chain() {
        let key = miner();
        let mut local = Chain::with_genesis(&key.address()).unwrap();
        let mut remote = local.clone();

        for _ in 0..2 {
            let block = mined_successor(&remote, &key.address());
            remote.try_append(block).unwrap();
        }

        assert!(local.replace(remote.blocks().to_vec()).unwrap());
        assert_eq!(local.height(), 2);
    }

    #[test]
    fn test_replace_keeps_local_on_equal_length() {
        let key = miner();
        let mut local = Chain::with_genesis(&key.address()).unwrap();
        let mut remote = local.clone();

        let block = mined_successor(&local, &key.address());
        local.try_append(block).unwrap();
        let block = mined_successor(&remote, &key.address());
        remote.try_append(block).unwrap();

        let local_tip = local.latest().hash.clone();
        assert!(!local.replace(remote.blocks().to_vec()).unwrap());
        assert_eq!(local.latest().hash, local_tip);
    }

    #[test]
    fn test_replace_with_self_is_identity() {
        let key = miner();
        let mut chain = Chain::with_genesis(&key.address()).unwrap();
        let block = mined_successor(&chain, &key.address());
        chain.try_append(block).unwrap();

        let snapshot = chain.blocks().to_vec();
        assert!(!chain.replace(snapshot.clone()).unwrap());
        assert_eq!(chain.blocks(), snapshot.as_slice());
    }

    #[test]
    fn test_replace_rejects_longer_invalid_chain() {
        let key = miner();
        let mut local = Chain::with_genesis(&key.address()).unwrap();
        let mut remote = local.clone();

        for _ in 0..2 {
            let block = mined_successor(&remote, &key.address());
            remote.try_append(block).unwrap();
        }
        let mut forged = remote.blocks().to_vec();
        forged[1].transactions[0] = Transaction::coinbase(&key.address(), 1_000_000).unwrap();

        let local_before = local.blocks().to_vec();
        assert!(local.replace(forged).is_err());
        assert_eq!(local.blocks(), local_before.as_slice());
    }

    #[test]
    fn test_retarget_fires_after_fast_window() {
        let key = miner();
        let coinbase = Transaction::coinbase(&key.address(), BASE_REWARD).unwrap();
        let genesis =
            Block::new_with_timestamp(0, GENESIS_PREVIOUS_HASH.to_string(), vec![coinbase], 0)
                .unwrap();
        let mut chain = Chain::new(genesis);

        // Ten blocks, one second apart: 10s actual against 100s expected
        for i in 1..=RETARGET_INTERVAL {
            let coinbase = Transaction::coinbase(&key.address(), BASE_REWARD).unwrap();
            let mut block = Block::new_with_timestamp(
                i,
                chain.latest().hash.clone(),
                vec![coinbase],
                i as i64 * 1_000,
            )
            .unwrap();
            block.mine_blocking(chain.difficulty());
            chain.try_append(block).unwrap();
        }

        assert_eq!(chain.difficulty(), INITIAL_DIFFICULTY + 1);
    }

    #[test]
    fn test_retarget_unchanged_inside_band() {
        let key = miner();
        let coinbase = Transaction::coinbase(&key.address(), BASE_REWARD).unwrap();
        let genesis =
            Block::new_with_timestamp(0, GENESIS_PREVIOUS_HASH.to_string(), vec![coinbase], 0)
                .unwrap();
        let mut chain = Chain::new(genesis);

        for i in 1..=RETARGET_INTERVAL {
            let coinbase = Transaction::coinbase(&key.address(), BASE_REWARD).unwrap();
            let mut block = Block::new_with_timestamp(
                i,
                chain.latest().hash.clone(),
                vec![coinbase],
                i as i64 * TARGET_BLOCK_TIME_MS,
            )
            .unwrap();
            block.mine_blocking(chain.difficulty());
            chain.try_append(block).unwrap();
        }

        assert_eq!(chain.difficulty(), INITIAL_DIFFICULTY);
    }

    #[test]
    fn test_queries() {
        let key = miner();
        let mut chain = Chain::with_genesis(&key.address()).unwrap();
        for _ in 0..3 {
            let block = mined_successor(&chain, &key.address());
            chain.try_append(block).unwrap();
        }

        assert_eq!(chain.block_by_height(2).map(|b| b.index), Some(2));
        assert!(chain.block_by_height(9).is_none());

        let tip_hash = chain.latest().hash.clone();
        assert_eq!(chain.block_by_hash(&tip_hash).map(|b| b.index), Some(3));

        assert_eq!(
            chain
                .blocks_range(1, 2)
                .iter()
                .map(|b| b.index)
                .collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(chain.blocks_range(10, 5).is_empty());

        let genesis_tx = chain.blocks()[0].transactions[0].tx_id().to_string();
        let (block, _) = chain.find_transaction(&genesis_tx).unwrap();
        assert_eq!(block.index, 0);
        assert_eq!(chain.confirmations(block.index), 3);
        assert!(!chain.contains_transaction(&"0".repeat(64)));
    }
}
