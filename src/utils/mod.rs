//! Cryptographic primitives and small shared helpers

pub mod crypto;

pub use crypto::{
    current_timestamp, ecdsa_recover, ecdsa_sign_recoverable, hex_decode, hex_encode,
    ripemd160_digest, sha256_digest, sha256_hex,
};
