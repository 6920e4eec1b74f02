//! Node state kept off the chain: the UTXO ledger, the mempool and the
//! snapshot file.

pub mod mempool;
pub mod snapshot;
pub mod utxo;

pub use mempool::Mempool;
pub use snapshot::{Snapshot, SnapshotStore, SNAPSHOT_FILE};
pub use utxo::{Utxo, UtxoLedger};
