use strata_types::primitives::{Address, PublicKey};

use crate::hash::blake3_hash;

/// Account address of a public key: `BLAKE3(pubkey)[0..20]`.
pub fn pubkey_to_address(pubkey: &PublicKey) -> Address {
    let hash = blake3_hash(pubkey);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[..20]);
    address
}

/// Take the trailing 20 bytes of a 32-byte digest.
pub fn address_from_digest(digest: &[u8; 32]) -> Address {
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    address
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pubkey_address_deterministic() {
        assert_eq!(pubkey_to_address(&[42u8; 32]), pubkey_to_address(&[42u8; 32]));
        assert_ne!(pubkey_to_address(&[1u8; 32]), pubkey_to_address(&[2u8; 32]));
    }

    #[test]
    fn test_address_from_digest_takes_tail() {
        let mut digest = [0u8; 32];
        digest[12] = 0xaa;
        digest[31] = 0xbb;
        let addr = address_from_digest(&digest);
        assert_eq!(addr[0], 0xaa);
        assert_eq!(addr[19], 0xbb);
    }
}
