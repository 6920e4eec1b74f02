use k256::ecdsa::{RecoveryId, Signature};
use serde::{Deserialize, Serialize};

use crate::error::{NodeError, Result};
use crate::utils::{
    current_timestamp, ecdsa_recover, ecdsa_sign_recoverable, hex_decode, hex_encode, sha256_hex,
};
use crate::wallet::{addresses_equal, derive_address, is_valid_address, Keypair};

/// A recoverable ECDSA signature over the raw bytes of a transaction id.
///
/// `recovery_id` is stored so verification recovers a unique public key
/// instead of trying both curve points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSignature {
    pub r: String,
    pub s: String,
    pub recovery_id: u8,
}

/// A transfer of value, either minted by a miner or signed by a sender.
///
/// The two cases carry different fields on purpose: a coinbase has no
/// sender and no signature, and making that unrepresentable keeps every
/// validation path honest about which case it is looking at. On the wire
/// both serialize to the flat [`TransactionRecord`] shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TransactionRecord", into = "TransactionRecord")]
pub enum Transaction {
    Coinbase {
        to: String,
        amount: u64,
        timestamp: i64,
        tx_id: String,
    },
    Transfer {
        from: String,
        to: String,
        amount: u64,
        fee: u64,
        timestamp: i64,
        signature: Option<TxSignature>,
        tx_id: String,
    },
}

/// Flat transaction shape used on the gossip wire, in the snapshot file
/// and by the submit API. `from_address` and `signature` are null for a
/// coinbase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub from_address: Option<String>,
    pub to_address: String,
    pub amount: u64,
    pub fee: u64,
    pub timestamp: i64,
    pub signature: Option<TxSignature>,
    pub tx_id: String,
}

/// The id is the hash over the non-signature fields in fixed order, with a
/// coinbase sender rendered as the empty string. Signing never changes it.
pub fn compute_tx_id(from: &str, to: &str, amount: u64, fee: u64, timestamp: i64) -> String {
    sha256_hex(format!("{from}:{to}:{amount}:{fee}:{timestamp}").as_bytes())
}

impl Transaction {
    /// Mint `amount` units to the miner. No sender, no fee, no signature.
    pub fn coinbase(to: &str, amount: u64) -> Result<Transaction> {
        Self::coinbase_with_timestamp(to, amount, current_timestamp()?)
    }

    pub(crate) fn coinbase_with_timestamp(
        to: &str,
        amount: u64,
        timestamp: i64,
    ) -> Result<Transaction> {
        if !is_valid_address(to) {
            return Err(NodeError::InvalidAddress(to.to_string()));
        }
        if amount == 0 {
            return Err(NodeError::InvalidTransaction(
                "Coinbase amount must be positive".to_string(),
            ));
        }
        let tx_id = compute_tx_id("", to, amount, 0, timestamp);
        Ok(Transaction::Coinbase {
            to: to.to_string(),
            amount,
            timestamp,
            tx_id,
        })
    }

    /// An unsigned transfer; call [`Transaction::sign`] before submitting it.
    pub fn transfer(from: &str, to: &str, amount: u64, fee: u64) -> Result<Transaction> {
        if !is_valid_address(from) {
            return Err(NodeError::InvalidAddress(from.to_string()));
        }
        if !is_valid_address(to) {
            return Err(NodeError::InvalidAddress(to.to_string()));
        }
        if amount == 0 {
            return Err(NodeError::InvalidTransaction(
                "Amount must be positive".to_string(),
            ));
        }
        if addresses_equal(from, to) {
            return Err(NodeError::InvalidTransaction(
                "Sender and recipient must differ".to_string(),
            ));
        }

        let timestamp = current_timestamp()?;
        let tx_id = compute_tx_id(from, to, amount, fee, timestamp);
        Ok(Transaction::Transfer {
            from: from.to_string(),
            to: to.to_string(),
            amount,
            fee,
            timestamp,
            signature: None,
            tx_id,
        })
    }

    /// Write the signature over the transaction id. The id was computed
    /// before signing, so it stays stable.
    pub fn sign(&mut self, keypair: &Keypair) -> Result<()> {
        match self {
            Transaction::Coinbase { .. } => Err(NodeError::InvalidTransaction(
                "Coinbase transactions are never signed".to_string(),
            )),
            Transaction::Transfer {
                from,
                signature,
                tx_id,
                ..
            } => {
                if !addresses_equal(&keypair.address(), from) {
                    return Err(NodeError::InvalidSignature(format!(
                        "Key address {} does not match sender {from}",
                        keypair.address()
                    )));
                }
                let prehash = hex_decode(tx_id)?;
                let (sig, recovery_id) = ecdsa_sign_recoverable(keypair.signing_key(), &prehash)?;
                let bytes = sig.to_bytes();
                *signature = Some(TxSignature {
                    r: hex_encode(&bytes[..32]),
                    s: hex_encode(&bytes[32..]),
                    recovery_id: recovery_id.to_byte(),
                });
                Ok(())
            }
        }
    }

    /// Recover the address of the key that signed this transfer.
    pub fn recover_signer(&self) -> Result<String> {
        let (tx_id, signature) = match self {
            Transaction::Coinbase { .. } => {
                return Err(NodeError::InvalidTransaction(
                    "Coinbase transactions carry no signature".to_string(),
                ))
            }
            Transaction::Transfer {
                tx_id, signature, ..
            } => (
                tx_id,
                signature.as_ref().ok_or_else(|| {
                    NodeError::InvalidSignature("Transaction is unsigned".to_string())
                })?,
            ),
        };

        let r = hex_decode(&signature.r)?;
        let s = hex_decode(&signature.s)?;
        if r.len() != 32 || s.len() != 32 {
            return Err(NodeError::Malformed(
                "Signature scalars must be 32 bytes".to_string(),
            ));
        }
        let mut sig_bytes = [0u8; 64];
        sig_bytes[..32].copy_from_slice(&r);
        sig_bytes[32..].copy_from_slice(&s);
        let sig = Signature::from_slice(&sig_bytes)
            .map_err(|e| NodeError::InvalidSignature(format!("Invalid signature scalars: {e}")))?;
        let recovery_id = RecoveryId::try_from(signature.recovery_id).map_err(|_| {
            NodeError::InvalidSignature(format!("Invalid recovery id {}", signature.recovery_id))
        })?;

        let prehash = hex_decode(self.tx_id())?;
        let public_key = ecdsa_recover(&prehash, &sig, recovery_id)?;
        Ok(derive_address(&public_key))
    }

    /// Full validity check, with the failing rule in the error.
    pub fn validate(&self) -> Result<()> {
        match self {
            Transaction::Coinbase {
                to,
                amount,
                timestamp,
                tx_id,
            } => {
                if !is_valid_address(to) {
                    return Err(NodeError::InvalidAddress(to.clone()));
                }
                if *amount == 0 {
                    return Err(NodeError::InvalidTransaction(
                        "Coinbase amount must be positive".to_string(),
                    ));
                }
                if compute_tx_id("", to, *amount, 0, *timestamp) != *tx_id {
                    return Err(NodeError::InvalidTransaction(
                        "Transaction id does not match its fields".to_string(),
                    ));
                }
                Ok(())
            }
            Transaction::Transfer {
                from,
                to,
                amount,
                fee,
                timestamp,
                tx_id,
                ..
            } => {
                if !is_valid_address(from) {
                    return Err(NodeError::InvalidAddress(from.clone()));
                }
                if !is_valid_address(to) {
                    return Err(NodeError::InvalidAddress(to.clone()));
                }
                if *amount == 0 {
                    return Err(NodeError::InvalidTransaction(
                        "Amount must be positive".to_string(),
                    ));
                }
                if addresses_equal(from, to) {
                    return Err(NodeError::InvalidTransaction(
                        "Sender and recipient must differ".to_string(),
                    ));
                }
                if compute_tx_id(from, to, *amount, *fee, *timestamp) != *tx_id {
                    return Err(NodeError::InvalidTransaction(
                        "Transaction id does not match its fields".to_string(),
                    ));
                }
                let signer = self.recover_signer()?;
                if !addresses_equal(&signer, from) {
                    return Err(NodeError::InvalidSignature(format!(
                        "Recovered signer {signer} does not match sender {from}"
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self, Transaction::Coinbase { .. })
    }

    pub fn tx_id(&self) -> &str {
        match self {
            Transaction::Coinbase { tx_id, .. } => tx_id,
            Transaction::Transfer { tx_id, .. } => tx_id,
        }
    }

    pub fn from_address(&self) -> Option<&str> {
        match self {
            Transaction::Coinbase { .. } => None,
            Transaction::Transfer { from, .. } => Some(from),
        }
    }

    pub fn to_address(&self) -> &str {
        match self {
            Transaction::Coinbase { to, .. } => to,
            Transaction::Transfer { to, .. } => to,
        }
    }

    pub fn amount(&self) -> u64 {
        match self {
            Transaction::Coinbase { amount, .. } => *amount,
            Transaction::Transfer { amount, .. } => *amount,
        }
    }

    pub fn fee(&self) -> u64 {
        match self {
            Transaction::Coinbase { .. } => 0,
            Transaction::Transfer { fee, .. } => *fee,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Transaction::Coinbase { timestamp, .. } => *timestamp,
            Transaction::Transfer { timestamp, .. } => *timestamp,
        }
    }

    /// What the sender's balance must cover: `amount + fee`.
    pub fn total_debit(&self) -> u64 {
        self.amount().saturating_add(self.fee())
    }
}

impl TryFrom<TransactionRecord> for Transaction {
    type Error = NodeError;

    fn try_from(record: TransactionRecord) -> Result<Transaction> {
        match record.from_address {
            None => {
                if record.signature.is_some() {
                    return Err(NodeError::Malformed(
                        "Coinbase transaction must not carry a signature".to_string(),
                    ));
                }
                if record.fee != 0 {
                    return Err(NodeError::Malformed(
                        "Coinbase transaction must not carry a fee".to_string(),
                    ));
                }
                Ok(Transaction::Coinbase {
                    to: record.to_address,
                    amount: record.amount,
                    timestamp: record.timestamp,
                    tx_id: record.tx_id,
                })
            }
            Some(from) => Ok(Transaction::Transfer {
                from,
                to: record.to_address,
                amount: record.amount,
                fee: record.fee,
                timestamp: record.timestamp,
                signature: record.signature,
                tx_id: record.tx_id,
            }),
        }
    }
}

impl From<Transaction> for TransactionRecord {
    fn from(tx: Transaction) -> TransactionRecord {
        match tx {
            Transaction::Coinbase {
                to,
                amount,
                timestamp,
                tx_id,
            } => TransactionRecord {
                from_address: None,
                to_address: to,
                amount,
                fee: 0,
                timestamp,
                signature: None,
                tx_id,
            },
            Transaction::Transfer {
                from,
                to,
                amount,
                fee,
                timestamp,
                signature,
                tx_id,
            } => TransactionRecord {
                from_address: Some(from),
                to_address: to,
                amount,
                fee,
                timestamp,
                signature,
                tx_id,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coinbase_is_valid() {
        let keypair = Keypair::generate();
        let tx = Transaction::coinbase(&keypair.address(), 50).unwrap();

        assert!(tx.is_coinbase());
        assert!(tx.is_valid());
        assert_eq!(tx.fee(), 0);
        assert!(tx.from_address().is_none());
    }

    #[test]
    fn test_coinbase_rejects_zero_amount() {
        let keypair = Keypair::generate();
        assert!(Transaction::coinbase(&keypair.address(), 0).is_err());
    }

    #[test]
    fn test_signed_transfer_round_trip() {
        let sender = Keypair::generate();
        let recipient = Keypair::generate();

        let mut tx =
            Transaction::transfer(&sender.address(), &recipient.address(), 100, 1).unwrap();
        let id_before = tx.tx_id().to_string();
        tx.sign(&sender).unwrap();

        // Signing keeps the id stable and makes the transaction valid
        assert_eq!(tx.tx_id(), id_before);
        assert!(tx.is_valid());
        assert_eq!(tx.recover_signer().unwrap(), sender.address());
        assert_eq!(tx.total_debit(), 101);
    }

    #[test]
    fn test_unsigned_transfer_is_invalid() {
        let sender = Keypair::generate();
        let recipient = Keypair::generate();

        let tx = Transaction::transfer(&sender.address(), &recipient.address(), 100, 1).unwrap();
        assert!(!tx.is_valid());
    }

    #[test]
    fn test_sign_with_foreign_key_is_rejected() {
        let sender = Keypair::generate();
        let recipient = Keypair::generate();
        let stranger = Keypair::generate();

        let mut tx =
            Transaction::transfer(&sender.address(), &recipient.address(), 100, 1).unwrap();
        assert!(tx.sign(&stranger).is_err());
    }

    #[test]
    fn test_tampered_amount_invalidates() {
        let sender = Keypair::generate();
        let recipient = Keypair::generate();

        let mut tx =
            Transaction::transfer(&sender.address(), &recipient.address(), 100, 1).unwrap();
        tx.sign(&sender).unwrap();

        if let Transaction::Transfer { amount, .. } = &mut tx {
            *amount = 1_000;
        }
        assert!(!tx.is_valid());
    }

    #[test]
    fn test_self_transfer_is_rejected() {
        let sender = Keypair::generate();
        let addr = sender.address();
        assert!(Transaction::transfer(&addr, &addr, 100, 1).is_err());
    }

    #[test]
    fn test_coinbase_cannot_be_signed() {
        let keypair = Keypair::generate();
        let mut tx = Transaction::coinbase(&keypair.address(), 50).unwrap();
        assert!(tx.sign(&keypair).is_err());
    }

    #[test]
    fn test_json_round_trip_is_bit_preserving() {
        let sender = Keypair::generate();
        let recipient = Keypair::generate();

        let mut tx = Transaction::transfer(&sender.address(), &recipient.address(), 7, 2).unwrap();
        tx.sign(&sender).unwrap();

        let json = serde_json::to_string(&tx).unwrap();
        let decoded: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(tx, decoded);

        let coinbase = Transaction::coinbase(&sender.address(), 50).unwrap();
        let json = serde_json::to_string(&coinbase).unwrap();
        let decoded: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(coinbase, decoded);
    }

    #[test]
    fn test_record_with_coinbase_signature_is_malformed() {
        let keypair = Keypair::generate();
        let json = format!(
            r#"{{"from_address":null,"to_address":"{}","amount":50,"fee":0,"timestamp":1,
                "signature":{{"r":"00","s":"00","recovery_id":0}},"tx_id":"{}"}}"#,
            keypair.address(),
            "0".repeat(64)
        );
        assert!(serde_json::from_str::<Transaction>(&json).is_err());
    }
}
