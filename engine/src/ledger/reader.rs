//! # Vault Account Reader
//!
//! Reads everything a flow needs to know about one vault in a single pass:
//! the vault and factory accounts, the share mint's decimals, the stablecoin
//! custody balance, and the balance of the vault's token account for every
//! underlying asset.
//!
//! A missing asset account is not an error. Vault token accounts are created
//! lazily on the first swap into them, so "no account" just means zero.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use super::accounts::{Factory, Mint, ProgramAccount, TokenProgram, Vault, VaultState};
use super::address::Address;
use super::client::LedgerClient;
use super::pda::{associated_token_address, VaultAddresses};
use crate::config::ASSOCIATED_TOKEN_PROGRAM_ID;
use crate::error::{EngineError, EngineResult};

/// One underlying asset as held by the vault.
#[derive(Debug, Clone, Serialize)]
pub struct AssetHolding {
    pub mint: Address,
    pub allocation_bps: u16,
    pub token_program: TokenProgram,
    /// The vault's associated token account for `mint`.
    pub vault_account: Address,
    /// Raw balance, 0 if the account does not exist yet.
    pub balance: u64,
}

/// Point-in-time view of a vault.
#[derive(Debug, Clone, Serialize)]
pub struct VaultSnapshot {
    pub addresses: VaultAddresses,
    pub vault: Vault,
    pub factory: Factory,
    pub share_decimals: u8,
    pub stablecoin_mint: Address,
    /// Raw balance of the vault's stablecoin custody account.
    pub stablecoin_balance: u64,
    pub holdings: Vec<AssetHolding>,
}

/// Every fee that applies to one vault: the factory schedule plus the
/// vault's own management fee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VaultFees {
    pub vault_index: u32,
    pub vault_name: String,
    pub vault_symbol: String,
    pub vault_admin: Address,
    pub entry_fee_bps: u16,
    pub exit_fee_bps: u16,
    pub vault_creation_fee_usdc: u64,
    pub min_management_fee_bps: u16,
    pub max_management_fee_bps: u16,
    pub management_fee_bps: u16,
    pub vault_creator_fee_ratio_bps: u16,
    pub platform_fee_ratio_bps: u16,
}

/// One holder's position in a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositDetails {
    pub vault: Address,
    pub vault_index: u32,
    pub vault_name: String,
    pub vault_symbol: String,
    pub user: Address,
    /// Raw share balance, 0 if the holder has no share account.
    pub user_shares: u64,
    pub total_assets: u64,
    pub total_supply: u64,
    pub stablecoin_mint: Address,
    pub stablecoin_balance: u64,
    pub state: VaultState,
    pub created_at: i64,
}

impl VaultSnapshot {
    pub fn fees(&self) -> VaultFees {
        VaultFees {
            vault_index: self.vault.vault_index,
            vault_name: self.vault.vault_name.clone(),
            vault_symbol: self.vault.vault_symbol.clone(),
            vault_admin: self.vault.admin,
            entry_fee_bps: self.factory.entry_fee_bps,
            exit_fee_bps: self.factory.exit_fee_bps,
            vault_creation_fee_usdc: self.factory.vault_creation_fee_usdc,
            min_management_fee_bps: self.factory.min_management_fee_bps,
            max_management_fee_bps: self.factory.max_management_fee_bps,
            management_fee_bps: self.vault.management_fees,
            vault_creator_fee_ratio_bps: self.factory.vault_creator_fee_ratio_bps,
            platform_fee_ratio_bps: self.factory.platform_fee_ratio_bps,
        }
    }

    /// Fails unless both the vault and the factory are active.
    pub fn ensure_active(&self) -> EngineResult<()> {
        if !self.factory.is_active() {
            return Err(EngineError::VaultNotActive {
                vault: self.addresses.vault,
                state: format!("factory {:?}", self.factory.state),
            });
        }
        if !self.vault.is_active() {
            return Err(EngineError::VaultNotActive {
                vault: self.addresses.vault,
                state: format!("{:?}", self.vault.state),
            });
        }
        Ok(())
    }

    pub fn holding(&self, mint: &Address) -> Option<&AssetHolding> {
        self.holdings.iter().find(|h| h.mint == *mint)
    }
}

/// Reads vault state from the ledger.
pub struct VaultAccountReader {
    ledger: Arc<dyn LedgerClient>,
    program_id: Address,
    stablecoin_mint: Address,
    token_programs: DashMap<Address, TokenProgram>,
}

impl VaultAccountReader {
    pub fn new(ledger: Arc<dyn LedgerClient>, program_id: Address, stablecoin_mint: Address) -> Self {
        Self {
            ledger,
            program_id,
            stablecoin_mint,
            token_programs: DashMap::new(),
        }
    }

    pub fn program_id(&self) -> &Address {
        &self.program_id
    }

    pub fn stablecoin_mint(&self) -> &Address {
        &self.stablecoin_mint
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }

    /// Derives the program addresses for `vault_index`.
    pub fn addresses(&self, vault_index: u32) -> EngineResult<VaultAddresses> {
        VaultAddresses::derive(&self.program_id, vault_index)
    }

    async fn program_account<T: ProgramAccount>(&self, address: &Address) -> EngineResult<T> {
        let account = self
            .ledger
            .get_account(address)
            .await?
            .ok_or(EngineError::AccountNotFound {
                kind: T::KIND,
                address: *address,
            })?;
        if account.owner != self.program_id {
            return Err(EngineError::AccountDecode {
                kind: T::KIND,
                address: *address,
                reason: format!("owned by {}, not the vault program", account.owner),
            });
        }
        T::decode(address, &account.data)
    }

    pub async fn factory(&self, addrs: &VaultAddresses) -> EngineResult<Factory> {
        self.program_account(&addrs.factory).await
    }

    pub async fn vault(&self, addrs: &VaultAddresses) -> EngineResult<Vault> {
        self.program_account(&addrs.vault).await
    }

    /// Reads a mint and remembers which token program owns it.
    pub async fn mint(&self, mint: &Address) -> EngineResult<Mint> {
        let account = self
            .ledger
            .get_account(mint)
            .await?
            .ok_or(EngineError::AccountNotFound {
                kind: "mint",
                address: *mint,
            })?;
        let program = TokenProgram::from_owner(&account.owner).ok_or_else(|| {
            EngineError::AccountDecode {
                kind: "mint",
                address: *mint,
                reason: format!("owner {} is not a token program", account.owner),
            }
        })?;
        self.token_programs.entry(*mint).or_insert(program);
        Mint::decode(mint, &account.data)
    }

    /// Token program owning `mint`, read once and cached.
    pub async fn token_program(&self, mint: &Address) -> EngineResult<TokenProgram> {
        if let Some(program) = self.token_programs.get(mint) {
            return Ok(*program);
        }
        self.mint(mint).await?;
        self.token_programs
            .get(mint)
            .map(|p| *p)
            .ok_or_else(|| EngineError::invariant("token program cache miss after mint read"))
    }

    /// Associated token account of `owner` for `mint`.
    pub async fn token_account_for(&self, owner: &Address, mint: &Address) -> EngineResult<Address> {
        let program = self.token_program(mint).await?;
        associated_token_address(
            owner,
            mint,
            &program.id(),
            &Address::from_static(ASSOCIATED_TOKEN_PROGRAM_ID),
        )
    }

    /// Raw balance of a token account, 0 if missing.
    pub async fn balance_or_zero(&self, account: &Address) -> EngineResult<u64> {
        Ok(self.ledger.token_balance(account).await?.unwrap_or(0))
    }

    /// Fee schedule of vault `vault_index`.
    pub async fn vault_fees(&self, vault_index: u32) -> EngineResult<VaultFees> {
        Ok(self.snapshot(vault_index).await?.fees())
    }

    /// `user`'s share balance alongside the vault's book. Indexes at or past
    /// the factory's vault count do not exist.
    pub async fn deposit_details(&self, vault_index: u32, user: &Address) -> EngineResult<DepositDetails> {
        let addresses = self.addresses(vault_index)?;
        let factory = self.factory(&addresses).await?;
        if vault_index >= factory.vault_count {
            return Err(EngineError::AccountNotFound {
                kind: "vault",
                address: addresses.vault,
            });
        }
        let vault = self.vault(&addresses).await?;
        let user_share_account = self.token_account_for(user, &addresses.share_mint).await?;

        Ok(DepositDetails {
            vault: addresses.vault,
            vault_index,
            vault_name: vault.vault_name,
            vault_symbol: vault.vault_symbol,
            user: *user,
            user_shares: self.balance_or_zero(&user_share_account).await?,
            total_assets: vault.total_assets,
            total_supply: vault.total_supply,
            stablecoin_mint: self.stablecoin_mint,
            stablecoin_balance: self.balance_or_zero(&addresses.stablecoin_account).await?,
            state: vault.state,
            created_at: vault.created_at,
        })
    }

    /// Reads the whole vault.
    pub async fn snapshot(&self, vault_index: u32) -> EngineResult<VaultSnapshot> {
        let addresses = self.addresses(vault_index)?;
        let factory = self.factory(&addresses).await?;
        let vault = self.vault(&addresses).await?;
        let share_decimals = self.mint(&addresses.share_mint).await?.decimals;
        let stablecoin_balance = self.balance_or_zero(&addresses.stablecoin_account).await?;

        let mut holdings = Vec::with_capacity(vault.underlying_assets.len());
        for asset in &vault.underlying_assets {
            let token_program = self.token_program(&asset.mint_address).await?;
            let vault_account = self
                .token_account_for(&addresses.vault, &asset.mint_address)
                .await?;
            let balance = self.balance_or_zero(&vault_account).await?;
            holdings.push(AssetHolding {
                mint: asset.mint_address,
                allocation_bps: asset.mint_bps,
                token_program,
                vault_account,
                balance,
            });
        }

        tracing::debug!(
            vault = %addresses.vault,
            index = vault_index,
            assets = holdings.len(),
            stablecoin_balance,
            total_supply = vault.total_supply,
            "vault snapshot read"
        );

        Ok(VaultSnapshot {
            addresses,
            vault,
            factory,
            share_decimals,
            stablecoin_mint: self.stablecoin_mint,
            stablecoin_balance,
            holdings,
        })
    }
}
