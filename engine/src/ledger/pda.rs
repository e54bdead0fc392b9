//! # Program-Derived Addresses
//!
//! `sha256(seed₀ ‖ … ‖ seedₙ ‖ program_id ‖ "ProgramDerivedAddress")`,
//! accepted only when the digest is *off* the Ed25519 curve. The canonical
//! address is found by appending a one-byte bump, searched from 255 down.
//!
//! Every address the vault flows touch is a pure function of a handful of
//! seeds, collected here so there is exactly one place that knows the seed
//! layout.

use sha2::{Digest, Sha256};

use super::address::Address;
use crate::config::{SEED_FACTORY, SEED_VAULT, SEED_VAULT_MINT, SEED_VAULT_STABLECOIN};
use crate::error::{EngineError, EngineResult};

/// Maximum number of seeds, including the bump.
pub const MAX_SEEDS: usize = 16;

/// Maximum length of a single seed.
pub const MAX_SEED_LEN: usize = 32;

const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

/// Hashes `seeds` into an address for `program_id`.
///
/// Returns `None` when the seeds are out of bounds or the digest lands on
/// the curve.
pub fn create_program_address(seeds: &[&[u8]], program_id: &Address) -> Option<Address> {
    if seeds.len() > MAX_SEEDS || seeds.iter().any(|s| s.len() > MAX_SEED_LEN) {
        return None;
    }

    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update(program_id.as_bytes());
    hasher.update(PDA_MARKER);

    let digest: [u8; 32] = hasher.finalize().into();
    let candidate = Address::new_from_array(digest);
    (!candidate.is_on_curve()).then_some(candidate)
}

/// Finds the canonical (highest-bump) program address for `seeds`.
pub fn find_program_address(seeds: &[&[u8]], program_id: &Address) -> Option<(Address, u8)> {
    if seeds.len() >= MAX_SEEDS {
        return None;
    }
    for bump in (0..=u8::MAX).rev() {
        let bump_seed = [bump];
        let mut with_bump: Vec<&[u8]> = Vec::with_capacity(seeds.len() + 1);
        with_bump.extend_from_slice(seeds);
        with_bump.push(&bump_seed);
        if let Some(address) = create_program_address(&with_bump, program_id) {
            return Some((address, bump));
        }
    }
    None
}

fn derive(seeds: &[&[u8]], program_id: &Address, what: &str) -> EngineResult<Address> {
    find_program_address(seeds, program_id)
        .map(|(address, _)| address)
        .ok_or_else(|| EngineError::invariant(format!("no viable bump for {} address", what)))
}

// ---------------------------------------------------------------------------
// Vault Program Addresses
// ---------------------------------------------------------------------------

/// The factory singleton.
pub fn factory_address(program_id: &Address) -> EngineResult<Address> {
    derive(&[SEED_FACTORY], program_id, "factory")
}

/// A vault, by factory and index. The index is encoded little-endian.
pub fn vault_address(program_id: &Address, factory: &Address, vault_index: u32) -> EngineResult<Address> {
    derive(
        &[SEED_VAULT, factory.as_ref(), &vault_index.to_le_bytes()],
        program_id,
        "vault",
    )
}

/// The vault's share mint.
pub fn vault_mint_address(program_id: &Address, vault: &Address) -> EngineResult<Address> {
    derive(&[SEED_VAULT_MINT, vault.as_ref()], program_id, "vault mint")
}

/// The vault's stablecoin custody account.
pub fn vault_stablecoin_address(program_id: &Address, vault: &Address) -> EngineResult<Address> {
    derive(
        &[SEED_VAULT_STABLECOIN, vault.as_ref()],
        program_id,
        "vault stablecoin",
    )
}

/// Associated token account for `(owner, mint)` under `token_program`.
pub fn associated_token_address(
    owner: &Address,
    mint: &Address,
    token_program: &Address,
    associated_token_program: &Address,
) -> EngineResult<Address> {
    derive(
        &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
        associated_token_program,
        "associated token",
    )
}

/// The fixed set of program accounts belonging to one vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct VaultAddresses {
    pub program_id: Address,
    pub factory: Address,
    pub vault: Address,
    pub vault_index: u32,
    pub share_mint: Address,
    pub stablecoin_account: Address,
}

impl VaultAddresses {
    /// Derives every address for `vault_index`.
    pub fn derive(program_id: &Address, vault_index: u32) -> EngineResult<Self> {
        let factory = factory_address(program_id)?;
        let vault = vault_address(program_id, &factory, vault_index)?;
        Ok(Self {
            program_id: *program_id,
            factory,
            vault,
            vault_index,
            share_mint: vault_mint_address(program_id, &vault)?,
            stablecoin_account: vault_stablecoin_address(program_id, &vault)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VAULT_PROGRAM_ID;

    #[test]
    fn matches_reference_vector() {
        let program_id: Address = "BPFLoaderUpgradeab1e11111111111111111111111".parse().unwrap();
        let expected: Address = "BwqrghZA2htAcqq8dzP1WDAhTXYTYWj7CHxF5j7TDBAe".parse().unwrap();
        assert_eq!(create_program_address(&[b"", &[1]], &program_id), Some(expected));
    }

    #[test]
    fn rejects_oversized_seeds() {
        let program_id = Address::new_from_array([1; 32]);
        let long = [0u8; MAX_SEED_LEN + 1];
        assert!(create_program_address(&[&long], &program_id).is_none());

        let seed: &[u8] = b"x";
        let too_many = vec![seed; MAX_SEEDS + 1];
        assert!(create_program_address(&too_many, &program_id).is_none());
    }

    #[test]
    fn found_address_is_off_curve_and_reproducible() {
        let program_id = Address::from_static(VAULT_PROGRAM_ID);
        let (addr, bump) = find_program_address(&[b"factory_v2"], &program_id).unwrap();
        assert!(!addr.is_on_curve());
        assert_eq!(
            create_program_address(&[b"factory_v2", &[bump]], &program_id),
            Some(addr)
        );
    }

    #[test]
    fn vault_addresses_differ_by_index() {
        let program_id = Address::from_static(VAULT_PROGRAM_ID);
        let a = VaultAddresses::derive(&program_id, 0).unwrap();
        let b = VaultAddresses::derive(&program_id, 1).unwrap();
        assert_eq!(a.factory, b.factory);
        assert_ne!(a.vault, b.vault);
        assert_ne!(a.share_mint, b.share_mint);
        assert_ne!(a.stablecoin_account, a.share_mint);
    }

    #[test]
    fn derivation_is_deterministic() {
        let program_id = Address::from_static(VAULT_PROGRAM_ID);
        assert_eq!(
            VaultAddresses::derive(&program_id, 7).unwrap(),
            VaultAddresses::derive(&program_id, 7).unwrap()
        );
    }
}
