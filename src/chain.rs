use sha2::{Digest, Sha256};

/// Chain head before the first entry.
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// Hashes an event log entry payload with the previous chain hash.
pub fn hash_entry(prev_hash: &[u8; 32], payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash);
    hasher.update(payload);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_depends_on_previous_entry() {
        let a = hash_entry(&GENESIS_HASH, b"payload");
        let b = hash_entry(&a, b"payload");
        assert_ne!(a, b);
        assert_eq!(a, hash_entry(&GENESIS_HASH, b"payload"));
    }
}
