use k256::ecdsa::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::{NodeError, Result};
use crate::utils::{hex_decode, hex_encode, ripemd160_digest, sha256_digest};

/// Human-readable prefix of every address.
pub const ADDRESS_PREFIX: &str = "cosmos";
/// Hex characters following the prefix (20 bytes of RIPEMD-160).
pub const ADDRESS_HEX_LEN: usize = 40;

/// A secp256k1 keypair identifying a node or a wallet holder.
///
/// The secret scalar is held inside the signing key and only leaves this
/// type as hex when the snapshot persists the miner identity.
#[derive(Clone)]
pub struct Keypair {
    secret: SigningKey,
}

impl Keypair {
    /// Generate a fresh keypair from the OS entropy source.
    pub fn generate() -> Keypair {
        Keypair {
            secret: SigningKey::random(&mut OsRng),
        }
    }

    /// Restore a keypair from a 64-hex-character secret scalar.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Keypair> {
        let bytes = hex_decode(secret_hex)?;
        let secret = SigningKey::from_slice(&bytes)
            .map_err(|e| NodeError::Crypto(format!("Invalid private key: {e}")))?;
        Ok(Keypair { secret })
    }

    pub fn secret_hex(&self) -> String {
        hex_encode(self.secret.to_bytes().as_slice())
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.secret
    }

    /// Uncompressed SEC1 encoding (65 bytes, leading 0x04).
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.secret
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    pub fn public_key_hex(&self) -> String {
        hex_encode(&self.public_key_bytes())
    }

    pub fn address(&self) -> String {
        derive_address(self.secret.verifying_key())
    }
}

/// Derive the wire address from a public key:
/// `cosmos` followed by the first 40 hex characters of
/// `RIPEMD160(SHA256(uncompressed_pubkey))`.
pub fn derive_address(public_key: &VerifyingKey) -> String {
    let encoded = public_key.to_encoded_point(false);
    let digest = ripemd160_digest(&sha256_digest(encoded.as_bytes()));
    let tail = hex_encode(&digest);
    format!("{ADDRESS_PREFIX}{}", &tail[..ADDRESS_HEX_LEN])
}

/// An address is exactly `cosmos` plus 40 lowercase hex characters.
pub fn is_valid_address(address: &str) -> bool {
    match address.strip_prefix(ADDRESS_PREFIX) {
        Some(tail) => {
            tail.len() == ADDRESS_HEX_LEN
                && tail
                    .chars()
                    .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        }
        None => false,
    }
}

/// Address equality is case-insensitive on the hex tail.
pub fn addresses_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_address_shape() {
        let keypair = Keypair::generate();
        let address = keypair.address();

        assert_eq!(address.len(), ADDRESS_PREFIX.len() + ADDRESS_HEX_LEN);
        assert!(address.starts_with(ADDRESS_PREFIX));
        assert!(is_valid_address(&address));
    }

    #[test]
    fn test_secret_hex_round_trip() {
        let keypair = Keypair::generate();
        let restored = Keypair::from_secret_hex(&keypair.secret_hex()).unwrap();

        assert_eq!(keypair.address(), restored.address());
        assert_eq!(keypair.public_key_hex(), restored.public_key_hex());
    }

    #[test]
    fn test_from_secret_hex_rejects_garbage() {
        assert!(Keypair::from_secret_hex("not hex").is_err());
        // All-zero scalar is outside [1, n)
        assert!(Keypair::from_secret_hex(&"0".repeat(64)).is_err());
    }

    #[test]
    fn test_address_validation() {
        assert!(is_valid_address(&format!("cosmos{}", "a1".repeat(20))));
        // wrong prefix
        assert!(!is_valid_address(&format!("cosmoz{}", "a1".repeat(20))));
        // wrong length
        assert!(!is_valid_address(&format!("cosmos{}", "a1".repeat(19))));
        // uppercase hex is not canonical
        assert!(!is_valid_address(&format!("cosmos{}", "A1".repeat(20))));
        // non-hex tail
        assert!(!is_valid_address(&format!("cosmos{}", "g1".repeat(20))));
    }

    #[test]
    fn test_addresses_equal_ignores_case() {
        let keypair = Keypair::generate();
        let address = keypair.address();
        assert!(addresses_equal(&address, &address.to_uppercase()));
    }

    #[test]
    fn test_distinct_keys_distinct_addresses() {
        assert_ne!(Keypair::generate().address(), Keypair::generate().address());
    }
}
