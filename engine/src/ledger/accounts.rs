//! # Program & Token Account Codecs
//!
//! The vault program stores its state Anchor-style: an 8-byte discriminator
//! (`sha256("account:<Name>")[..8]`) followed by the Borsh encoding of the
//! struct. Field order below is the on-chain order; reordering a field here
//! silently corrupts every decode.
//!
//! SPL token accounts and mints are plain fixed layouts and are parsed by
//! offset.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::address::Address;
use crate::config::{MAX_BPS, MAX_UNDERLYING_ASSETS, TOKEN_2022_PROGRAM_ID, TOKEN_PROGRAM_ID};
use crate::error::{EngineError, EngineResult};

/// Length of an Anchor discriminator.
pub const DISCRIMINATOR_LEN: usize = 8;

/// `sha256("<namespace>:<name>")[..8]`.
pub fn discriminator(namespace: &str, name: &str) -> [u8; DISCRIMINATOR_LEN] {
    let digest = Sha256::digest(format!("{}:{}", namespace, name).as_bytes());
    let mut out = [0u8; DISCRIMINATOR_LEN];
    out.copy_from_slice(&digest[..DISCRIMINATOR_LEN]);
    out
}

// ---------------------------------------------------------------------------
// Program Accounts
// ---------------------------------------------------------------------------

/// A Borsh-encoded account owned by the vault program.
pub trait ProgramAccount: BorshSerialize + BorshDeserialize + Sized {
    /// The Rust struct name used to derive the discriminator.
    const NAME: &'static str;
    /// Role used in error messages.
    const KIND: &'static str;

    fn discriminator() -> [u8; DISCRIMINATOR_LEN] {
        discriminator("account", Self::NAME)
    }

    /// Checks the discriminator and decodes the body. Trailing bytes (the
    /// program over-allocates for growth) are ignored.
    fn decode(address: &Address, data: &[u8]) -> EngineResult<Self> {
        let fail = |reason: String| EngineError::AccountDecode {
            kind: Self::KIND,
            address: *address,
            reason,
        };
        if data.len() < DISCRIMINATOR_LEN {
            return Err(fail(format!("{} bytes, too short", data.len())));
        }
        let (disc, mut body) = data.split_at(DISCRIMINATOR_LEN);
        if disc != Self::discriminator() {
            return Err(fail("discriminator mismatch".into()));
        }
        <Self as BorshDeserialize>::deserialize(&mut body).map_err(|e| fail(e.to_string()))
    }

    /// Discriminator plus Borsh body, as the program would write it.
    fn encode(&self) -> EngineResult<Vec<u8>> {
        let mut out = Self::discriminator().to_vec();
        borsh::to_writer(&mut out, self)
            .map_err(|e| EngineError::invariant(format!("encode {}: {}", Self::NAME, e)))?;
        Ok(out)
    }
}

/// Lifecycle of the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize)]
pub enum FactoryState {
    Active,
    Paused,
    Deprecated,
}

/// Lifecycle of a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize)]
pub enum VaultState {
    Active,
    Paused,
    Closed,
}

/// The factory singleton: protocol-wide fee parameters.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize)]
pub struct Factory {
    pub bump: u8,
    pub admin: Address,
    pub fee_recipient: Address,
    pub vault_count: u32,
    pub state: FactoryState,
    pub entry_fee_bps: u16,
    pub exit_fee_bps: u16,
    pub vault_creation_fee_usdc: u64,
    pub min_management_fee_bps: u16,
    pub max_management_fee_bps: u16,
    /// Creator's share of management fees. Sums to 10000 with the platform's.
    pub vault_creator_fee_ratio_bps: u16,
    pub platform_fee_ratio_bps: u16,
}

impl ProgramAccount for Factory {
    const NAME: &'static str = "Factory";
    const KIND: &'static str = "factory";
}

impl Factory {
    pub fn is_active(&self) -> bool {
        self.state == FactoryState::Active
    }
}

/// One target allocation inside a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize)]
pub struct UnderlyingAsset {
    pub mint_address: Address,
    /// Target weight in basis points.
    pub mint_bps: u16,
}

/// A vault's on-chain book.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize)]
pub struct Vault {
    pub bump: u8,
    pub vault_index: u32,
    pub factory: Address,
    pub admin: Address,
    pub vault_name: String,
    pub vault_symbol: String,
    pub underlying_assets: Vec<UnderlyingAsset>,
    /// Annual management fee in basis points.
    pub management_fees: u16,
    pub state: VaultState,
    /// Stablecoin-denominated assets under management, as booked by the program.
    pub total_assets: u64,
    /// Outstanding shares.
    pub total_supply: u64,
    pub created_at: i64,
    pub last_fee_accrual_ts: i64,
    pub accrued_management_fees_usdc: u64,
}

impl ProgramAccount for Vault {
    const NAME: &'static str = "Vault";
    const KIND: &'static str = "vault";
}

impl Vault {
    pub fn is_active(&self) -> bool {
        self.state == VaultState::Active
    }

    /// Checks that the allocation list is usable and returns Σ bps.
    pub fn validate_allocations(&self) -> EngineResult<u64> {
        if self.underlying_assets.len() > MAX_UNDERLYING_ASSETS {
            return Err(EngineError::invariant(format!(
                "{} underlying assets exceeds the limit of {}",
                self.underlying_assets.len(),
                MAX_UNDERLYING_ASSETS
            )));
        }
        let total: u64 = self
            .underlying_assets
            .iter()
            .map(|a| u64::from(a.mint_bps))
            .sum();
        if total > MAX_BPS {
            return Err(EngineError::invariant(format!(
                "allocation bps sum to {}, above {}",
                total, MAX_BPS
            )));
        }
        Ok(total)
    }
}

// ---------------------------------------------------------------------------
// Token Accounts
// ---------------------------------------------------------------------------

/// Which token program owns an account or mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenProgram {
    Spl,
    Token2022,
}

impl TokenProgram {
    /// Identifies the token program from an account owner.
    pub fn from_owner(owner: &Address) -> Option<Self> {
        if *owner == Address::from_static(TOKEN_PROGRAM_ID) {
            Some(Self::Spl)
        } else if *owner == Address::from_static(TOKEN_2022_PROGRAM_ID) {
            Some(Self::Token2022)
        } else {
            None
        }
    }

    pub fn id(&self) -> Address {
        match self {
            Self::Spl => Address::from_static(TOKEN_PROGRAM_ID),
            Self::Token2022 => Address::from_static(TOKEN_2022_PROGRAM_ID),
        }
    }
}

/// Minimum size of an SPL token account.
pub const TOKEN_ACCOUNT_LEN: usize = 165;

/// Minimum size of an SPL mint.
pub const MINT_LEN: usize = 82;

/// The fields of a token account the engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAccount {
    pub mint: Address,
    pub owner: Address,
    pub amount: u64,
}

impl TokenAccount {
    /// Parses the fixed prefix shared by SPL and Token-2022 accounts.
    pub fn decode(address: &Address, data: &[u8]) -> EngineResult<Self> {
        if data.len() < TOKEN_ACCOUNT_LEN {
            return Err(EngineError::AccountDecode {
                kind: "token",
                address: *address,
                reason: format!("{} bytes, expected at least {}", data.len(), TOKEN_ACCOUNT_LEN),
            });
        }
        Ok(Self {
            mint: read_address(data, 0),
            owner: read_address(data, 32),
            amount: read_u64(data, 64),
        })
    }

    /// Builds the 165-byte SPL layout. Used to seed in-memory ledgers.
    pub fn encode(&self) -> Vec<u8> {
        let mut data = vec![0u8; TOKEN_ACCOUNT_LEN];
        data[0..32].copy_from_slice(self.mint.as_bytes());
        data[32..64].copy_from_slice(self.owner.as_bytes());
        data[64..72].copy_from_slice(&self.amount.to_le_bytes());
        // state = initialized
        data[108] = 1;
        data
    }
}

/// The fields of a mint the engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mint {
    pub supply: u64,
    pub decimals: u8,
}

impl Mint {
    pub fn decode(address: &Address, data: &[u8]) -> EngineResult<Self> {
        if data.len() < MINT_LEN {
            return Err(EngineError::AccountDecode {
                kind: "mint",
                address: *address,
                reason: format!("{} bytes, expected at least {}", data.len(), MINT_LEN),
            });
        }
        Ok(Self {
            supply: read_u64(data, 36),
            decimals: data[44],
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut data = vec![0u8; MINT_LEN];
        data[36..44].copy_from_slice(&self.supply.to_le_bytes());
        data[44] = self.decimals;
        data[45] = 1;
        data
    }
}

fn read_address(data: &[u8], offset: usize) -> Address {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&data[offset..offset + 32]);
    Address::new_from_array(bytes)
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}
