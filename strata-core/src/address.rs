//! Contract address derivation.
//!
//! Classic addresses hash the creator with its account sequence, which the
//! derivation consumes, so they cannot be known before the creating
//! transaction runs. Predictable addresses hash the creator, a 32-byte salt
//! and the code checksum, and can be computed off-chain before deployment.

use strata_crypto::address::address_from_digest;
use strata_crypto::hash::keccak256_multi;
use strata_storage::store_set::StoreSet;
use strata_types::primitives::{Address, Checksum};

use crate::error::CoreError;
use crate::native::auth::AuthKeeper;

/// Leading byte of the predictable-address preimage.
const PREDICTABLE_PREFIX: u8 = 0xff;

/// `keccak256(creator ‖ be64(sequence))[12..]`.
pub fn classic_address(creator: &Address, sequence: u64) -> Address {
    address_from_digest(&keccak256_multi(&[&creator[..], &sequence.to_be_bytes()[..]]))
}

/// Derive a classic address, advancing the creator's sequence.
pub fn derive_address_classic(view: &StoreSet, creator: &Address) -> Result<Address, CoreError> {
    let sequence = AuthKeeper::new(view).consume_sequence(creator)?;
    Ok(classic_address(creator, sequence))
}

/// `keccak256(0xff ‖ creator ‖ salt ‖ checksum)[12..]`.
///
/// Both `salt` and `checksum` must be exactly 32 bytes.
pub fn derive_address_predictable(
    creator: &Address,
    salt: &[u8],
    checksum: &[u8],
) -> Result<Address, CoreError> {
    if salt.len() != 32 {
        return Err(CoreError::invalid(format!(
            "salt must be 32 bytes, got {}",
            salt.len()
        )));
    }
    let checksum: &Checksum = checksum.try_into().map_err(|_| {
        CoreError::invalid(format!("checksum must be 32 bytes, got {}", checksum.len()))
    })?;
    Ok(address_from_digest(&keccak256_multi(&[
        &[PREDICTABLE_PREFIX][..],
        &creator[..],
        salt,
        &checksum[..],
    ])))
}
