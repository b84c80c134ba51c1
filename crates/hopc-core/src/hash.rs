//! Stable content hashes for canonical fused-kernel plans, DAGs and programs.
//!
//! Plan-cache keys are hashes of a canonical (input-renamed) plan form, so
//! two structurally identical plans from different DAGs map to one kernel.

use blake3::Hasher;
use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use std::fmt::Write as _;
            let _ = write!(&mut s, "{:02x}", b);
        }
        s
    }

    /// First 8 bytes as hex; used for generated kernel class names.
    pub fn short(&self) -> String {
        self.to_hex()[..16].to_string()
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub fn hash_bytes(bytes: &[u8]) -> Hash256 {
    let mut h = Hasher::new();
    h.update(bytes);
    Hash256(h.finalize().into())
}

pub fn hash_str(s: &str) -> Hash256 {
    hash_bytes(s.as_bytes())
}

/// Hash a serde-serializable value deterministically (via JSON).
///
/// Callers must only pass types whose serialization order is stable
/// (`Vec`, `BTreeMap`, structs); never a `HashMap`.
pub fn hash_serde<T: Serialize>(v: &T) -> Result<Hash256> {
    let bytes = serde_json::to_vec(v).map_err(|e| Error::Hash(e.to_string()))?;
    Ok(hash_bytes(&bytes))
}

/// Order-sensitive combination of several hashes.
pub fn hash_combine(parts: &[Hash256]) -> Hash256 {
    let mut h = Hasher::new();
    for p in parts {
        h.update(&p.0);
    }
    Hash256(h.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_and_short() {
        let h = hash_str("abc");
        assert_eq!(h.to_hex().len(), 64);
        assert_eq!(h.short().len(), 16);
        assert!(h.to_hex().starts_with(&h.short()));
    }

    #[test]
    fn serde_hash_is_stable() {
        let a = hash_serde(&vec![1u32, 2, 3]).unwrap();
        let b = hash_serde(&vec![1u32, 2, 3]).unwrap();
        let c = hash_serde(&vec![3u32, 2, 1]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn combine_is_order_sensitive() {
        let a = hash_str("a");
        let b = hash_str("b");
        assert_ne!(hash_combine(&[a, b]), hash_combine(&[b, a]));
    }
}
