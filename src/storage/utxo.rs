use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::core::{Chain, Transaction};
use crate::error::{NodeError, Result};
use crate::utils::{current_timestamp, sha256_hex};

/// Index a change output is minted at.
const CHANGE_OUTPUT_INDEX: u32 = 1;

/// An unspent output: a claim of `amount` units created by `tx_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub tx_id: String,
    pub output_index: u32,
    pub amount: u64,
    pub timestamp: i64,
}

/// Per-address spendable outputs with a cached balance per address.
///
/// The ledger is a deterministic fold of the chain's transactions; it is
/// never persisted and can always be rebuilt with [`UtxoLedger::rebuild`].
#[derive(Debug, Clone, Default)]
pub struct UtxoLedger {
    outputs: HashMap<String, Vec<Utxo>>,
    balances: HashMap<String, u64>,
}

impl UtxoLedger {
    pub fn new() -> UtxoLedger {
        UtxoLedger::default()
    }

    fn key(address: &str) -> String {
        address.to_ascii_lowercase()
    }

    /// Credit `amount` to `address` as a new unspent output.
    pub fn add(&mut self, address: &str, tx_id: &str, amount: u64, output_index: u32) {
        let key = Self::key(address);
        self.outputs.entry(key.clone()).or_default().push(Utxo {
            tx_id: tx_id.to_string(),
            output_index,
            amount,
            timestamp: current_timestamp().unwrap_or_default(),
        });
        *self.balances.entry(key).or_insert(0) += amount;
    }

    pub fn balance(&self, address: &str) -> u64 {
        self.balances
            .get(&Self::key(address))
            .copied()
            .unwrap_or(0)
    }

    pub fn outputs_for(&self, address: &str) -> &[Utxo] {
        self.outputs
            .get(&Self::key(address))
            .map(|outs| outs.as_slice())
            .unwrap_or(&[])
    }

    /// Consume `amount` from `address`. Outputs are selected greedily
    /// largest-first so each spend consumes as few outputs as possible;
    /// any remainder over the selected outputs comes back as a single
    /// change output with a synthetic transaction id.
    pub fn spend(&mut self, address: &str, amount: u64) -> Result<()> {
        let key = Self::key(address);
        let available = self.balance(address);
        if available < amount {
            return Err(NodeError::InsufficientFunds {
                required: amount,
                available,
            });
        }

        let outputs = self.outputs.entry(key.clone()).or_default();
        outputs.sort_by(|a, b| b.amount.cmp(&a.amount));

        let mut gathered: u64 = 0;
        let mut consumed = 0;
        for utxo in outputs.iter() {
            if gathered >= amount {
                break;
            }
            gathered += utxo.amount;
            consumed += 1;
        }
        outputs.drain(..consumed);

        let change = gathered - amount;
        if change > 0 {
            outputs.push(Utxo {
                tx_id: synthetic_tx_id(),
                output_index: CHANGE_OUTPUT_INDEX,
                amount: change,
                timestamp: current_timestamp().unwrap_or_default(),
            });
        }
        *self.balances.entry(key).or_insert(0) = available - amount;
        Ok(())
    }

    /// Whether [`UtxoLedger::process`] would succeed for this transaction.
    pub fn can_process(&self, tx: &Transaction) -> bool {
        match tx.from_address() {
            None => tx.amount() > 0,
            Some(from) => self.balance(from) >= tx.total_debit(),
        }
    }

    /// Apply a transaction: a coinbase only credits the recipient, a
    /// transfer debits `amount + fee` from the sender first.
    pub fn process(&mut self, tx: &Transaction) -> Result<()> {
        if let Some(from) = tx.from_address() {
            self.spend(from, tx.total_debit())?;
        }
        self.add(tx.to_address(), tx.tx_id(), tx.amount(), 0);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.outputs.clear();
        self.balances.clear();
    }

    /// Re-fold the whole chain in order. Used after a chain replacement
    /// and on startup.
    pub fn rebuild(&mut self, chain: &Chain) -> Result<()> {
        self.clear();
        for block in chain.blocks() {
            for tx in &block.transactions {
                self.process(tx)?;
            }
        }
        Ok(())
    }

    /// Sum of every cached balance. Equals the sum of all coinbase
    /// amounts across the chain the ledger was folded from.
    pub fn total_supply(&self) -> u64 {
        self.balances.values().sum()
    }
}

/// Change outputs are not created by any real transaction, so they get a
/// fresh hash-shaped id.
fn synthetic_tx_id() -> String {
    sha256_hex(Uuid::new_v4().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Keypair;

    fn addr() -> String {
        Keypair::generate().address()
    }

    fn tx_id(tag: &str) -> String {
        sha256_hex(tag.as_bytes())
    }

    fn balances_match_outputs(ledger: &UtxoLedger, address: &str) -> bool {
        let summed: u64 = ledger.outputs_for(address).iter().map(|u| u.amount).sum();
        summed == ledger.balance(address)
    }

    #[test]
    fn test_add_accumulates_balance() {
        let mut ledger = UtxoLedger::new();
        let a = addr();
        ledger.add(&a, &tx_id("a"), 30, 0);
        ledger.add(&a, &tx_id("b"), 20, 0);

        assert_eq!(ledger.balance(&a), 50);
        assert_eq!(ledger.outputs_for(&a).len(), 2);
        assert!(balances_match_outputs(&ledger, &a));
    }

    #[test]
    fn test_balance_is_case_insensitive() {
        let mut ledger = UtxoLedger::new();
        let a = addr();
        ledger.add(&a, &tx_id("a"), 30, 0);
        assert_eq!(ledger.balance(&a.to_uppercase()), 30);
    }

    #[test]
    fn test_spend_selects_largest_first_and_mints_change() {
        let mut ledger = UtxoLedger::new();
        let a = addr();
        ledger.add(&a, &tx_id("small"), 10, 0);
        ledger.add(&a, &tx_id("large"), 100, 0);

        ledger.spend(&a, 60).unwrap();

        // The 100 output covers the spend alone; the 10 output survives
        // and a 40 change output is minted at index 1.
        assert_eq!(ledger.balance(&a), 50);
        let outputs = ledger.outputs_for(&a);
        assert_eq!(outputs.len(), 2);
        assert!(outputs.iter().any(|u| u.amount == 10));
        let change = outputs.iter().find(|u| u.amount == 40).unwrap();
        assert_eq!(change.output_index, 1);
        assert!(balances_match_outputs(&ledger, &a));
    }

    #[test]
    fn test_spend_exact_amount_leaves_no_change() {
        let mut ledger = UtxoLedger::new();
        let a = addr();
        ledger.add(&a, &tx_id("a"), 25, 0);
        ledger.spend(&a, 25).unwrap();

        assert_eq!(ledger.balance(&a), 0);
        assert!(ledger.outputs_for(&a).is_empty());
    }

    #[test]
    fn test_overspend_fails_without_mutating() {
        let mut ledger = UtxoLedger::new();
        let a = addr();
        ledger.add(&a, &tx_id("a"), 25, 0);

        match ledger.spend(&a, 26) {
            Err(NodeError::InsufficientFunds {
                required,
                available,
            }) => {
                assert_eq!(required, 26);
                assert_eq!(available, 25);
            }
            other => panic!("expected InsufficientFunds, got {other:?}"),
        }
        assert_eq!(ledger.balance(&a), 25);
    }

    #[test]
    fn test_process_transfer_moves_amount_and_burns_fee() {
        let sender = Keypair::generate();
        let recipient = Keypair::generate();
        let mut ledger = UtxoLedger::new();
        ledger.add(&sender.address(), &tx_id("seed"), 500, 0);

        let mut tx =
            Transaction::transfer(&sender.address(), &recipient.address(), 100, 1).unwrap();
        tx.sign(&sender).unwrap();

        assert!(ledger.can_process(&tx));
        ledger.process(&tx).unwrap();

        assert_eq!(ledger.balance(&sender.address()), 399);
        assert_eq!(ledger.balance(&recipient.address()), 100);
    }

    #[test]
    fn test_can_process_rejects_underfunded_transfer() {
        let sender = Keypair::generate();
        let recipient = Keypair::generate();
        let mut ledger = UtxoLedger::new();
        ledger.add(&sender.address(), &tx_id("seed"), 100, 0);

        let tx = Transaction::transfer(&sender.address(), &recipient.address(), 100, 1).unwrap();
        assert!(!ledger.can_process(&tx));
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let key = Keypair::generate();
        let chain = Chain::with_genesis(&key.address()).unwrap();

        let mut first = UtxoLedger::new();
        first.rebuild(&chain).unwrap();
        let mut second = first.clone();
        second.rebuild(&chain).unwrap();

        assert_eq!(first.balance(&key.address()), second.balance(&key.address()));
        assert_eq!(first.total_supply(), second.total_supply());
        assert_eq!(first.total_supply(), 500);
    }
}
