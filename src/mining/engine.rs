use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::core::{Block, Transaction, MAX_BLOCK_TRANSACTIONS};
use crate::error::{NodeError, Result};
use crate::node::ChainState;
use crate::storage::SnapshotStore;

// Sliding window the hash rate is computed over.
const HASH_RATE_WINDOW: Duration = Duration::from_secs(10);

/// Lifecycle of the proof-of-work worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerState {
    Stopped,
    Starting,
    Mining,
    Stopping,
}

/// Statistics surfaced through the mining-control API.
#[derive(Debug, Clone, Serialize)]
pub struct MiningStatus {
    pub is_active: bool,
    pub current_difficulty: u32,
    pub hash_rate: f64,
    pub total_hashes: u64,
    pub blocks_mined: u64,
    pub average_block_time_ms: u64,
    pub uptime_ms: u64,
    pub pending_tx_count: usize,
}

#[derive(Debug)]
struct StatsInner {
    started_at: Instant,
    hashes_at_reset: u64,
    blocks_mined: u64,
    total_block_time_ms: u64,
    last_block_at: Option<Instant>,
    // (sample instant, cumulative hash count) pairs inside the window
    samples: VecDeque<(Instant, u64)>,
}

impl StatsInner {
    fn new() -> StatsInner {
        StatsInner {
            started_at: Instant::now(),
            hashes_at_reset: 0,
            blocks_mined: 0,
            total_block_time_ms: 0,
            last_block_at: None,
            samples: VecDeque::new(),
        }
    }

    fn record_block(&mut self) {
        let now = Instant::now();
        if let Some(previous) = self.last_block_at {
            self.total_block_time_ms += now.duration_since(previous).as_millis() as u64;
        }
        self.last_block_at = Some(now);
        self.blocks_mined += 1;
    }

    fn hash_rate(&mut self, total_hashes: u64) -> f64 {
        let now = Instant::now();
        self.samples.push_back((now, total_hashes));
        while let Some(&(t, _)) = self.samples.front() {
            if now.duration_since(t) > HASH_RATE_WINDOW && self.samples.len() > 1 {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        let (oldest_t, oldest_h) = match self.samples.front() {
            Some(&front) => front,
            None => return 0.0,
        };
        let elapsed = now.duration_since(oldest_t).as_secs_f64();
        if elapsed <= f64::EPSILON {
            return 0.0;
        }
        (total_hashes.saturating_sub(oldest_h)) as f64 / elapsed
    }
}

/// Builds candidate blocks over the mempool, runs the proof-of-work
/// search and commits solved blocks back to the shared state.
///
/// The search itself holds no locks: the worker clones what it needs,
/// mines, then re-acquires the writer lock and re-validates against the
/// tip, which may have advanced through gossip in the meantime.
pub struct MiningEngine {
    shared: Arc<RwLock<ChainState>>,
    store: Arc<SnapshotStore>,
    miner_address: String,
    announce: Mutex<mpsc::Sender<Block>>,
    state: Arc<Mutex<MinerState>>,
    cancel: Arc<AtomicBool>,
    hash_counter: Arc<AtomicU64>,
    stats: Arc<Mutex<StatsInner>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MiningEngine {
    pub fn new(
        shared: Arc<RwLock<ChainState>>,
        store: Arc<SnapshotStore>,
        miner_address: String,
        announce: mpsc::Sender<Block>,
    ) -> MiningEngine {
        MiningEngine {
            shared,
            store,
            miner_address,
            announce: Mutex::new(announce),
            state: Arc::new(Mutex::new(MinerState::Stopped)),
            cancel: Arc::new(AtomicBool::new(false)),
            hash_counter: Arc::new(AtomicU64::new(0)),
            stats: Arc::new(Mutex::new(StatsInner::new())),
            worker: Mutex::new(None),
        }
    }

    pub fn miner_address(&self) -> &str {
        &self.miner_address
    }

    /// Spawn the worker. Refused while already running and when there is
    /// nothing to mine.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock().expect("Miner state lock poisoned");
        if *state != MinerState::Stopped {
            return Err(NodeError::Mining("Mining is already active".to_string()));
        }
        {
            let shared = self.shared.read().expect("Chain state lock poisoned");
            if shared.mempool.is_empty() {
                return Err(NodeError::Mining("empty mempool".to_string()));
            }
        }

        *state = MinerState::Starting;
        self.cancel.store(false, Ordering::Relaxed);

        let worker = self.spawn_worker();
        *self
            .worker
            .lock()
            .expect("Miner worker handle lock poisoned") = Some(worker);
        *state = MinerState::Mining;
        info!("Mining started, rewards to {}", self.miner_address);
        Ok(())
    }

    fn spawn_worker(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let store = Arc::clone(&self.store);
        let state = Arc::clone(&self.state);
        let cancel = Arc::clone(&self.cancel);
        let hash_counter = Arc::clone(&self.hash_counter);
        let stats = Arc::clone(&self.stats);
        let miner_address = self.miner_address.clone();
        let announce = self
            .announce
            .lock()
            .expect("Miner announce lock poisoned")
            .clone();

        thread::spawn(move || {
            Self::worker_loop(
                shared,
                store,
                cancel,
                hash_counter,
                stats,
                miner_address,
                announce,
            );
            *state.lock().expect("Miner state lock poisoned") = MinerState::Stopped;
            info!("Mining worker stopped");
        })
    }

    fn worker_loop(
        shared: Arc<RwLock<ChainState>>,
        store: Arc<SnapshotStore>,
        cancel: Arc<AtomicBool>,
        hash_counter: Arc<AtomicU64>,
        stats: Arc<Mutex<StatsInner>>,
        miner_address: String,
        announce: mpsc::Sender<Block>,
    ) {
        while !cancel.load(Ordering::Relaxed) {
            let has_work = {
                let state = shared.read().expect("Chain state lock poisoned");
                !state.mempool.is_empty()
            };
            if !has_work {
                info!("Mempool drained, mining pausing");
                break;
            }

            let (mut candidate, difficulty) =
                match Self::build_candidate(&shared, &miner_address) {
                    Ok(built) => built,
                    Err(e) => {
                        error!("Failed to build candidate block: {e}");
                        break;
                    }
                };

            if !candidate.mine(difficulty, &cancel, &hash_counter) {
                break; // cancelled mid-search
            }

            let mut state = shared.write().expect("Chain state lock poisoned");
            if state.chain.latest().hash != candidate.previous_hash {
                debug!(
                    "Tip advanced while mining block {}, discarding candidate",
                    candidate.index
                );
                continue;
            }
            match state.apply_block(candidate.clone()) {
                Ok(()) => {
                    info!(
                        "Mined block {} ({}) with {} transactions",
                        candidate.index,
                        candidate.hash,
                        candidate.transactions.len()
                    );
                    store.persist_or_warn(&state.chain, state.mining_reward);
                    stats
                        .lock()
                        .expect("Miner stats lock poisoned")
                        .record_block();
                    if announce.send(candidate).is_err() {
                        debug!("Block announcement channel closed");
                    }
                }
                Err(e) => warn!("Discarding mined block: {e}"),
            }
        }
    }

    /// Coinbase paying `reward + Σ fees` plus up to 99 fee-sorted
    /// admissible transfers, linked to the current tip.
    fn build_candidate(
        shared: &Arc<RwLock<ChainState>>,
        miner_address: &str,
    ) -> Result<(Block, u32)> {
        let state = shared.read().expect("Chain state lock poisoned");
        let tip = state.chain.latest();
        let difficulty = state.chain.difficulty();

        let selected = state
            .mempool
            .select_for_block(MAX_BLOCK_TRANSACTIONS, &state.utxo);
        let fees: u64 = selected.iter().map(|tx| tx.fee()).sum();
        let coinbase = Transaction::coinbase(miner_address, state.mining_reward + fees)?;

        let mut transactions = Vec::with_capacity(selected.len() + 1);
        transactions.push(coinbase);
        transactions.extend(selected);

        let block = Block::new(tip.index + 1, tip.hash.clone(), transactions)?;
        Ok((block, difficulty))
    }

    /// Flag the worker to stop at its next yield point and wait for it.
    /// The in-flight proof-of-work attempt is abandoned.
    pub fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock().expect("Miner state lock poisoned");
            match *state {
                MinerState::Stopped => {
                    return Err(NodeError::Mining("Mining is not active".to_string()))
                }
                _ => *state = MinerState::Stopping,
            }
            self.cancel.store(true, Ordering::Relaxed);
        }

        if let Some(handle) = self
            .worker
            .lock()
            .expect("Miner worker handle lock poisoned")
            .take()
        {
            if handle.join().is_err() {
                warn!("Mining worker panicked");
            }
        }
        *self.state.lock().expect("Miner state lock poisoned") = MinerState::Stopped;
        info!("Mining stopped");
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        matches!(
            *self.state.lock().expect("Miner state lock poisoned"),
            MinerState::Starting | MinerState::Mining
        )
    }

    /// Takes effect for the next candidate block only.
    pub fn set_difficulty(&self, difficulty: u32) -> Result<()> {
        let mut state = self.shared.write().expect("Chain state lock poisoned");
        state.chain.set_difficulty(difficulty)?;
        self.store.persist_or_warn(&state.chain, state.mining_reward);
        Ok(())
    }

    /// Takes effect for the next candidate block only.
    pub fn set_reward(&self, reward: u64) -> Result<()> {
        let mut state = self.shared.write().expect("Chain state lock poisoned");
        state.mining_reward = reward;
        self.store.persist_or_warn(&state.chain, state.mining_reward);
        Ok(())
    }

    /// Zero the counters without interrupting a running worker.
    pub fn reset_statistics(&self) {
        let mut stats = self.stats.lock().expect("Miner stats lock poisoned");
        stats.started_at = Instant::now();
        stats.hashes_at_reset = self.hash_counter.load(Ordering::Relaxed);
        stats.blocks_mined = 0;
        stats.total_block_time_ms = 0;
        stats.last_block_at = None;
        stats.samples.clear();
    }

    pub fn status(&self) -> MiningStatus {
        // Taken before the stats lock: state -> shared and shared -> stats
        // edges already exist, a stats -> state edge would close a cycle.
        let is_active = self.is_active();
        let (difficulty, pending_tx_count) = {
            let state = self.shared.read().expect("Chain state lock poisoned");
            (state.chain.difficulty(), state.mempool.len())
        };

        let mut stats = self.stats.lock().expect("Miner stats lock poisoned");
        let raw_hashes = self.hash_counter.load(Ordering::Relaxed);
        let total_hashes = raw_hashes.saturating_sub(stats.hashes_at_reset);
        let blocks_mined = stats.blocks_mined;
        let average_block_time_ms = if blocks_mined > 1 {
            stats.total_block_time_ms / (blocks_mined - 1)
        } else {
            0
        };

        MiningStatus {
            is_active,
            current_difficulty: difficulty,
            hash_rate: stats.hash_rate(raw_hashes),
            total_hashes,
            blocks_mined,
            average_block_time_ms,
            uptime_ms: stats.started_at.elapsed().as_millis() as u64,
            pending_tx_count,
        }
    }
}
