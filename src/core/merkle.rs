use crate::utils::sha256_hex;

/// Merkle root over transaction id hex strings.
///
/// Pairs are hashed as `sha256_hex(left ∥ right)`; an odd layer duplicates
/// its last element. A single id is its own root, an empty list hashes to
/// the digest of the empty string.
pub fn merkle_root(tx_ids: &[String]) -> String {
    if tx_ids.is_empty() {
        return sha256_hex(b"");
    }

    let mut layer: Vec<String> = tx_ids.to_vec();
    while layer.len() > 1 {
        layer = layer
            .chunks(2)
            .map(|pair| {
                // A lone element at the end of an odd layer pairs with itself
                let right = pair.get(1).unwrap_or(&pair[0]);
                sha256_hex(format!("{}{}", pair[0], right).as_bytes())
            })
            .collect();
    }
    layer.swap_remove(0)
}
