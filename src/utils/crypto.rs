use data_encoding::HEXLOWER;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use ripemd::{Digest as RipemdDigest, Ripemd160};
use sha2::{Digest, Sha256};

use crate::error::{NodeError, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn current_timestamp() -> Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| NodeError::Crypto(format!("System time error: {e}")))?
        .as_millis();

    // Ensure the timestamp fits in i64
    if duration > i64::MAX as u128 {
        return Err(NodeError::Crypto("Timestamp overflow".to_string()));
    }

    Ok(duration as i64)
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// SHA-256 digest rendered as 64 lowercase hex characters.
pub fn sha256_hex(data: &[u8]) -> String {
    HEXLOWER.encode(&sha256_digest(data))
}

pub fn ripemd160_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn hex_encode(data: &[u8]) -> String {
    HEXLOWER.encode(data)
}

pub fn hex_decode(data: &str) -> Result<Vec<u8>> {
    HEXLOWER
        .decode(data.as_bytes())
        .map_err(|e| NodeError::Malformed(format!("Invalid hex encoding: {e}")))
}

/// Sign a 32-byte message digest, returning the signature together with the
/// recovery id so the public key can be recovered by verifiers.
pub fn ecdsa_sign_recoverable(
    secret: &SigningKey,
    prehash: &[u8],
) -> Result<(Signature, RecoveryId)> {
    secret
        .sign_prehash_recoverable(prehash)
        .map_err(|e| NodeError::Crypto(format!("Failed to sign digest: {e}")))
}

/// Recover the public key that produced `signature` over `prehash`.
pub fn ecdsa_recover(
    prehash: &[u8],
    signature: &Signature,
    recovery_id: RecoveryId,
) -> Result<VerifyingKey> {
    VerifyingKey::recover_from_prehash(prehash, signature, recovery_id)
        .map_err(|e| NodeError::InvalidSignature(format!("Public key recovery failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn test_sha256_hex_is_lowercase_64() {
        let digest = sha256_hex(b"cosmos");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_ripemd160_length() {
        assert_eq!(ripemd160_digest(b"cosmos").len(), 20);
    }

    #[test]
    fn test_hex_round_trip() {
        let bytes = sha256_digest(b"round trip");
        let encoded = hex_encode(&bytes);
        assert_eq!(hex_decode(&encoded).unwrap(), bytes);
    }

    #[test]
    fn test_hex_decode_rejects_garbage() {
        assert!(hex_decode("zz").is_err());
    }

    #[test]
    fn test_sign_then_recover_round_trip() {
        let secret = SigningKey::random(&mut OsRng);
        let prehash = sha256_digest(b"message");

        let (signature, recovery_id) = ecdsa_sign_recoverable(&secret, &prehash).unwrap();
        let recovered = ecdsa_recover(&prehash, &signature, recovery_id).unwrap();

        assert_eq!(&recovered, secret.verifying_key());
    }

    #[test]
    fn test_recover_with_wrong_digest_yields_other_key() {
        let secret = SigningKey::random(&mut OsRng);
        let prehash = sha256_digest(b"message");
        let other = sha256_digest(b"other message");

        let (signature, recovery_id) = ecdsa_sign_recoverable(&secret, &prehash).unwrap();
        // Recovery over a different digest either fails or yields a different key
        match ecdsa_recover(&other, &signature, recovery_id) {
            Ok(recovered) => assert_ne!(&recovered, secret.verifying_key()),
            Err(_) => {}
        }
    }
}
