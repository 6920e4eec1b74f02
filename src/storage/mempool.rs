use std::collections::HashMap;

use log::debug;

use crate::core::{Block, Transaction};
use crate::error::{NodeError, Result};
use crate::storage::UtxoLedger;

/// Unconfirmed transactions keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Mempool {
    pending: HashMap<String, Transaction>,
}

impl Mempool {
    pub fn new() -> Mempool {
        Mempool::default()
    }

    /// Admission: the transaction must be a fully valid transfer, unknown
    /// to the pool, and covered by the sender's spendable balance as the
    /// ledger currently sees it.
    pub fn add(&mut self, tx: Transaction, utxo: &UtxoLedger) -> Result<()> {
        if tx.is_coinbase() {
            return Err(NodeError::InvalidTransaction(
                "Coinbase transactions are created by the miner, not submitted".to_string(),
            ));
        }
        if self.pending.contains_key(tx.tx_id()) {
            return Err(NodeError::DuplicateTransaction(tx.tx_id().to_string()));
        }
        tx.validate()?;
        if !utxo.can_process(&tx) {
            let available = tx.from_address().map(|a| utxo.balance(a)).unwrap_or(0);
            return Err(NodeError::InsufficientFunds {
                required: tx.total_debit(),
                available,
            });
        }

        self.pending.insert(tx.tx_id().to_string(), tx);
        Ok(())
    }

    pub fn contains(&self, tx_id: &str) -> bool {
        self.pending.contains_key(tx_id)
    }

    pub fn get(&self, tx_id: &str) -> Option<&Transaction> {
        self.pending.get(tx_id)
    }

    pub fn remove(&mut self, tx_id: &str) -> Option<Transaction> {
        self.pending.remove(tx_id)
    }

    /// Drop every transaction the block confirmed. Survivors are not
    /// re-validated here; the next admission or selection pass checks
    /// them against the live ledger.
    pub fn remove_confirmed(&mut self, block: &Block) {
        for tx in &block.transactions {
            if self.pending.remove(tx.tx_id()).is_some() {
                debug!("Confirmed transaction {} left the mempool", tx.tx_id());
            }
        }
    }

    /// Pick up to `max_count - 1` admissible transactions (leaving room
    /// for the coinbase), highest fee first. A scratch copy of the ledger
    /// runs forward during selection so transactions that individually
    /// fit but jointly overspend a sender are never picked together.
    pub fn select_for_block(&self, max_count: usize, utxo: &UtxoLedger) -> Vec<Transaction> {
        let capacity = max_count.saturating_sub(1);
        let mut candidates: Vec<&Transaction> = self.pending.values().collect();
        candidates.sort_by(|a, b| {
            b.fee()
                .cmp(&a.fee())
                .then_with(|| a.timestamp().cmp(&b.timestamp()))
                .then_with(|| a.tx_id().cmp(b.tx_id()))
        });

        let mut scratch = utxo.clone();
        let mut selected = Vec::new();
        for tx in candidates {
            if selected.len() >= capacity {
                break;
            }
            if !scratch.can_process(tx) {
                debug!(
                    "Skipping transaction {} during selection: not spendable",
                    tx.tx_id()
                );
                continue;
            }
            if scratch.process(tx).is_ok() {
                selected.push(tx.clone());
            }
        }
        selected
    }

    pub fn pending(&self) -> Vec<Transaction> {
        self.pending.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
