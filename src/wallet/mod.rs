//! Keypair management and address derivation

pub mod keypair;

pub use keypair::{
    addresses_equal, derive_address, is_valid_address, Keypair, ADDRESS_HEX_LEN, ADDRESS_PREFIX,
};
