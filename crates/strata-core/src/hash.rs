//! Stable content fingerprints for generated type names.

use blake3::Hasher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
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

    /// First `len` hex chars (clamped to the full digest).
    pub fn short_hex(&self, len: usize) -> String {
        let mut hex = self.to_hex();
        hex.truncate(len.min(64));
        hex
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Hash an ordered list of parts. Each part is length-prefixed so that
/// `["ab", "c"]` and `["a", "bc"]` never collide.
pub fn hash_parts<S: AsRef<str>>(parts: &[S]) -> Hash256 {
    let mut h = Hasher::new();
    for p in parts {
        let p = p.as_ref().as_bytes();
        h.update(&(p.len() as u64).to_le_bytes());
        h.update(p);
    }
    Hash256(h.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_are_length_prefixed() {
        assert_ne!(hash_parts(&["ab", "c"]), hash_parts(&["a", "bc"]));
        assert_eq!(hash_parts(&["t", "data"]), hash_parts(&["t", "data"]));
    }

    #[test]
    fn short_hex_is_clamped() {
        let h = hash_parts(&["x"]);
        assert_eq!(h.short_hex(8).len(), 8);
        assert_eq!(h.short_hex(100).len(), 64);
    }
}
