//! The mining engine: candidate assembly, the proof-of-work worker and
//! mining statistics.

pub mod engine;

pub use engine::{MinerState, MiningEngine, MiningStatus};
