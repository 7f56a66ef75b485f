use sha2::{Digest, Sha256};
use sha3::Keccak256;
use strata_types::primitives::{Checksum, Hash};

/// SHA-256 of the given bytes. Used as the content address of bytecode.
pub fn sha256(data: &[u8]) -> Checksum {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Keccak-256 over the concatenation of `parts`.
pub fn keccak256_multi(parts: &[&[u8]]) -> Hash {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Keccak-256 of the given bytes.
pub fn keccak256(data: &[u8]) -> Hash {
    keccak256_multi(&[data])
}

/// BLAKE3 hash of the given bytes.
pub fn blake3_hash(data: &[u8]) -> Hash {
    *blake3::hash(data).as_bytes()
}

/// BLAKE3 hash with domain separation.
pub fn blake3_hash_domain(context: &str, data: &[u8]) -> Hash {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256("abc")
        let digest = sha256(b"abc");
        assert_eq!(digest[0], 0xba);
        assert_eq!(digest[1], 0x78);
        assert_eq!(digest[31], 0xad);
    }

    #[test]
    fn test_keccak_empty_vector() {
        // Keccak-256 of the empty string starts with c5d2 and ends with a470.
        let digest = keccak256(b"");
        assert_eq!(&digest[..2], &[0xc5, 0xd2]);
        assert_eq!(&digest[30..], &[0xa4, 0x70]);
    }

    #[test]
    fn test_keccak_multi_is_concatenation() {
        assert_eq!(keccak256_multi(&[b"ab", b"cd"]), keccak256(b"abcd"));
    }

    #[test]
    fn test_blake3_domain_separation() {
        let data = b"same data";
        assert_ne!(blake3_hash_domain("a", data), blake3_hash_domain("b", data));
        assert_ne!(blake3_hash(data), blake3_hash_domain("a", data));
    }
}
