//! The owning node structure
//!
//! The chain, the UTXO ledger and the mempool form one writer domain
//! behind a single lock; gossip handlers, the mining worker and the
//! submit API all route their state changes through it.

use log::{debug, error, info};
use serde::Serialize;
use std::net::TcpListener;
use std::sync::{mpsc, Arc, RwLock};
use std::thread;
use std::time::Duration;

use crate::config::NodeConfig;
use crate::core::{Block, Chain, Transaction, TransactionRecord, BASE_REWARD};
use crate::error::{NodeError, Result};
use crate::mining::{MiningEngine, MiningStatus};
use crate::network::GossipServer;
use crate::storage::{Mempool, Snapshot, SnapshotStore, UtxoLedger};
use crate::wallet::Keypair;

// How often the supervisor re-checks whether mining can resume.
const MINE_SUPERVISOR_INTERVAL: Duration = Duration::from_secs(2);

/// The chain/ledger/mempool triple. Exactly one writer mutates it at a
/// time; readers see consistent snapshots between writes.
pub struct ChainState {
    pub chain: Chain,
    pub utxo: UtxoLedger,
    pub mempool: Mempool,
    pub mining_reward: u64,
}

impl ChainState {
    /// Validate and append a block, updating the ledger and purging
    /// confirmed transactions from the mempool. The ledger is run
    /// forward on a scratch copy first, so a block whose transactions
    /// jointly overspend a sender is rejected without touching state.
    pub fn apply_block(&mut self, block: Block) -> Result<()> {
        Chain::is_valid_new_block(&block, self.chain.latest(), self.chain.difficulty())?;

        let mut ledger = self.utxo.clone();
        for tx in &block.transactions {
            ledger.process(tx).map_err(|e| {
                NodeError::InvalidBlock(format!(
                    "Block {} is not spendable against the ledger: {e}",
                    block.index
                ))
            })?;
        }

        self.chain.try_append(block.clone())?;
        self.utxo = ledger;
        self.mempool.remove_confirmed(&block);
        Ok(())
    }

    /// Longest-chain replacement. The candidate is folded into a fresh
    /// ledger before anything is swapped, so a structurally valid but
    /// overspending chain is rejected whole. Pending transactions the
    /// new chain confirmed are dropped; the rest stay and are re-checked
    /// on their next admission or selection.
    pub fn adopt_chain(&mut self, candidate: Vec<Block>) -> Result<bool> {
        if candidate.len() <= self.chain.len() {
            return Ok(false);
        }

        let mut ledger = UtxoLedger::new();
        for block in &candidate {
            for tx in &block.transactions {
                ledger.process(tx).map_err(|e| {
                    NodeError::InvalidBlock(format!(
                        "Candidate block {} is not spendable: {e}",
                        block.index
                    ))
                })?;
            }
        }

        if !self.chain.replace(candidate)? {
            return Ok(false);
        }
        self.utxo = ledger;

        let confirmed: Vec<String> = self
            .mempool
            .pending()
            .iter()
            .filter(|tx| self.chain.contains_transaction(tx.tx_id()))
            .map(|tx| tx.tx_id().to_string())
            .collect();
        for tx_id in confirmed {
            self.mempool.remove(&tx_id);
        }
        Ok(true)
    }

    /// Mempool admission plus the chain-level duplicate check.
    pub fn admit_transaction(&mut self, tx: Transaction) -> Result<()> {
        if self.chain.contains_transaction(tx.tx_id()) {
            return Err(NodeError::DuplicateTransaction(tx.tx_id().to_string()));
        }
        self.mempool.add(tx, &self.utxo)
    }
}

/// Where a queried transaction currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub tx_id: String,
    pub status: TxStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionInfo {
    pub transaction: Transaction,
    pub status: TxStatus,
    pub confirmations: u64,
}

/// A running node: the shared state plus the collaborators that act on
/// it. Snapshot load/create, gossip wiring and the mined-block fan-out
/// all happen in [`Node::bootstrap`].
pub struct Node {
    config: NodeConfig,
    keypair: Keypair,
    shared: Arc<RwLock<ChainState>>,
    store: Arc<SnapshotStore>,
    gossip: Arc<GossipServer>,
    miner: Arc<MiningEngine>,
}

impl Node {
    pub fn bootstrap(config: NodeConfig) -> Result<Node> {
        let snapshot_path = config.snapshot_path();

        let (keypair, chain, mining_reward) = match Snapshot::load(&snapshot_path)? {
            Some(snapshot) => {
                let keypair = Keypair::from_secret_hex(&snapshot.miner_key)?;
                let chain = Chain::from_snapshot(snapshot.chain, snapshot.difficulty)?;
                info!(
                    "Loaded chain at height {} for miner {}",
                    chain.height(),
                    keypair.address()
                );
                (keypair, chain, snapshot.mining_reward)
            }
            None => {
                let keypair = Keypair::generate();
                let chain = Chain::with_genesis(&keypair.address())?;
                info!("Created fresh chain, genesis credits {}", keypair.address());
                (keypair, chain, BASE_REWARD)
            }
        };

        let mut utxo = UtxoLedger::new();
        utxo.rebuild(&chain)?;

        let shared = Arc::new(RwLock::new(ChainState {
            chain,
            utxo,
            mempool: Mempool::new(),
            mining_reward,
        }));
        let store = Arc::new(SnapshotStore::new(snapshot_path, keypair.secret_hex()));
        {
            let state = shared.read().expect("Chain state lock poisoned");
            store.persist_or_warn(&state.chain, state.mining_reward);
        }

        let node_info = format!(
            "cosmos-chain/{} api:{}",
            env!("CARGO_PKG_VERSION"),
            config.listen_port
        );
        let gossip = Arc::new(GossipServer::new(
            Arc::clone(&shared),
            Arc::clone(&store),
            node_info,
        ));

        let (announce, mined_blocks) = mpsc::channel();
        let miner = Arc::new(MiningEngine::new(
            Arc::clone(&shared),
            Arc::clone(&store),
            keypair.address(),
            announce,
        ));

        // Mined blocks flow over the channel into the gossip fan-out
        let fanout = Arc::clone(&gossip);
        thread::spawn(move || {
            for block in mined_blocks {
                fanout.announce_block(&block);
            }
        });

        Ok(Node {
            config,
            keypair,
            shared,
            store,
            gossip,
            miner,
        })
    }

    /// Connect to the bootstrap peers, sync, then serve gossip on the
    /// caller's thread.
    pub fn run(&self, auto_mine: bool) -> Result<()> {
        let bind = format!("0.0.0.0:{}", self.config.p2p_port);
        let listener = TcpListener::bind(&bind)
            .map_err(|e| NodeError::Network(format!("Failed to bind to {bind}: {e}")))?;

        for peer in &self.config.peers {
            if let Err(e) = self.gossip.connect(peer) {
                error!("Failed to connect to bootstrap peer {peer}: {e}");
            }
        }
        self.gossip.synchronize();
        self.gossip.start_heartbeat();

        if auto_mine {
            self.start_mining_supervisor();
        }

        self.gossip.accept_loop(listener);
        Ok(())
    }

    /// Restart the miner whenever it is idle and work is waiting. Lets a
    /// `--mine` node pick work back up after its mempool drained.
    fn start_mining_supervisor(&self) {
        let miner = Arc::clone(&self.miner);
        let shared = Arc::clone(&self.shared);
        thread::spawn(move || loop {
            thread::sleep(MINE_SUPERVISOR_INTERVAL);
            let has_work = {
                let state = shared.read().expect("Chain state lock poisoned");
                !state.mempool.is_empty()
            };
            if has_work && !miner.is_active() {
                if let Err(e) = miner.start() {
                    debug!("Mining supervisor could not start the miner: {e}");
                }
            }
        });
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn miner_address(&self) -> String {
        self.keypair.address()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn snapshot_store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Accept a signed transaction from the API layer: decode, admit,
    /// gossip, answer with the pending receipt.
    pub fn submit_transaction(&self, record: TransactionRecord) -> Result<SubmitReceipt> {
        let tx = Transaction::try_from(record)?;
        if tx.is_coinbase() {
            return Err(NodeError::InvalidTransaction(
                "Coinbase transactions cannot be submitted".to_string(),
            ));
        }

        {
            let mut state = self.shared.write().expect("Chain state lock poisoned");
            state.admit_transaction(tx.clone())?;
        }
        self.gossip.announce_transaction(&tx);
        info!("Accepted transaction {} into the mempool", tx.tx_id());

        Ok(SubmitReceipt {
            tx_id: tx.tx_id().to_string(),
            status: TxStatus::Pending,
        })
    }

    /// Look a transaction up in the mempool first, then the chain.
    pub fn transaction_info(&self, tx_id: &str) -> Option<TransactionInfo> {
        let state = self.shared.read().expect("Chain state lock poisoned");
        if let Some(tx) = state.mempool.get(tx_id) {
            return Some(TransactionInfo {
                transaction: tx.clone(),
                status: TxStatus::Pending,
                confirmations: 0,
            });
        }
        state
            .chain
            .find_transaction(tx_id)
            .map(|(block, tx)| TransactionInfo {
                transaction: tx.clone(),
                status: TxStatus::Confirmed,
                confirmations: state.chain.confirmations(block.index),
            })
    }

    pub fn latest_block(&self) -> Block {
        self.shared
            .read()
            .expect("Chain state lock poisoned")
            .chain
            .latest()
            .clone()
    }

    pub fn block_by_height(&self, height: u64) -> Option<Block> {
        self.shared
            .read()
            .expect("Chain state lock poisoned")
            .chain
            .block_by_height(height)
            .cloned()
    }

    pub fn block_by_hash(&self, hash: &str) -> Option<Block> {
        self.shared
            .read()
            .expect("Chain state lock poisoned")
            .chain
            .block_by_hash(hash)
            .cloned()
    }

    pub fn blocks_range(&self, offset: u64, limit: usize) -> Vec<Block> {
        self.shared
            .read()
            .expect("Chain state lock poisoned")
            .chain
            .blocks_range(offset, limit)
            .to_vec()
    }

    pub fn chain_height(&self) -> u64 {
        self.shared
            .read()
            .expect("Chain state lock poisoned")
            .chain
            .height()
    }

    pub fn balance(&self, address: &str) -> u64 {
        self.shared
            .read()
            .expect("Chain state lock poisoned")
            .utxo
            .balance(address)
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.shared
            .read()
            .expect("Chain state lock poisoned")
            .mempool
            .pending()
    }

    pub fn start_mining(&self) -> Result<()> {
        self.miner.start()
    }

    pub fn stop_mining(&self) -> Result<()> {
        self.miner.stop()
    }

    pub fn mining_status(&self) -> MiningStatus {
        self.miner.status()
    }

    pub fn set_difficulty(&self, difficulty: u32) -> Result<()> {
        self.miner.set_difficulty(difficulty)
    }

    pub fn set_mining_reward(&self, reward: u64) -> Result<()> {
        self.miner.set_reward(reward)
    }

    pub fn reset_mining_statistics(&self) {
        self.miner.reset_statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GENESIS_PREMINE_MULTIPLIER;

    fn funded_state(miner: &Keypair) -> ChainState {
        let chain = Chain::with_genesis(&miner.address()).unwrap();
        let mut utxo = UtxoLedger::new();
        utxo.rebuild(&chain).unwrap();
        ChainState {
            chain,
            utxo,
            mempool: Mempool::new(),
            mining_reward: BASE_REWARD,
        }
    }

    fn signed_transfer(from: &Keypair, to: &str, amount: u64, fee: u64) -> Transaction {
        let mut tx = Transaction::transfer(&from.address(), to, amount, fee).unwrap();
        tx.sign(from).unwrap();
        tx
    }

    fn mined_block(state: &ChainState, transactions: Vec<Transaction>) -> Block {
        let tip = state.chain.latest();
        let mut block = Block::new(tip.index + 1, tip.hash.clone(), transactions).unwrap();
        block.mine_blocking(state.chain.difficulty());
        block
    }

    #[test]
    fn test_apply_block_updates_ledger_and_mempool() {
        let miner = Keypair::generate();
        let recipient = Keypair::generate();
        let mut state = funded_state(&miner);

        let transfer = signed_transfer(&miner, &recipient.address(), 100, 1);
        state.admit_transaction(transfer.clone()).unwrap();

        let coinbase = Transaction::coinbase(&miner.address(), BASE_REWARD + 1).unwrap();
        let block = mined_block(&state, vec![coinbase, transfer.clone()]);
        state.apply_block(block).unwrap();

        // Genesis premine 500, spent 101, coinbase 51 back
        assert_eq!(state.utxo.balance(&miner.address()), 450);
        assert_eq!(state.utxo.balance(&recipient.address()), 100);
        assert!(!state.mempool.contains(transfer.tx_id()));
    }

    #[test]
    fn test_apply_block_rejects_joint_overspend() {
        let miner = Keypair::generate();
        let mut state = funded_state(&miner);
        let premine = GENESIS_PREMINE_MULTIPLIER * BASE_REWARD;

        // Two transfers that each fit the premine but not together
        let t1 = signed_transfer(&miner, &Keypair::generate().address(), premine - 10, 0);
        let t2 = signed_transfer(&miner, &Keypair::generate().address(), premine - 10, 0);
        let coinbase = Transaction::coinbase(&miner.address(), BASE_REWARD).unwrap();
        let block = mined_block(&state, vec![coinbase, t1, t2]);

        let tip_before = state.chain.latest().hash.clone();
        assert!(state.apply_block(block).is_err());
        assert_eq!(state.chain.latest().hash, tip_before);
        assert_eq!(state.utxo.balance(&miner.address()), premine);
    }

    #[test]
    fn test_adopt_chain_rebuilds_ledger() {
        let miner = Keypair::generate();
        let mut local = funded_state(&miner);
        let mut remote = funded_state(&Keypair::generate());

        for _ in 0..2 {
            let coinbase =
                Transaction::coinbase(&miner.address(), BASE_REWARD).unwrap();
            let block = mined_block(&remote, vec![coinbase]);
            remote.apply_block(block).unwrap();
        }

        assert!(local.adopt_chain(remote.chain.blocks().to_vec()).unwrap());
        assert_eq!(local.chain.height(), 2);
        // Ledger equals a fresh fold of the adopted chain
        let mut refolded = UtxoLedger::new();
        refolded.rebuild(&local.chain).unwrap();
        assert_eq!(
            local.utxo.balance(&miner.address()),
            refolded.balance(&miner.address())
        );
        assert_eq!(local.utxo.total_supply(), refolded.total_supply());
    }

    #[test]
    fn test_admit_rejects_chain_confirmed_duplicate() {
        let miner = Keypair::generate();
        let recipient = Keypair::generate();
        let mut state = funded_state(&miner);

        let transfer = signed_transfer(&miner, &recipient.address(), 100, 1);
        let coinbase = Transaction::coinbase(&miner.address(), BASE_REWARD + 1).unwrap();
        let block = mined_block(&state, vec![coinbase, transfer.clone()]);
        state.apply_block(block).unwrap();

        assert!(matches!(
            state.admit_transaction(transfer),
            Err(NodeError::DuplicateTransaction(_))
        ));
    }
}
