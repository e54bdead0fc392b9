//! # Instructions
//!
//! A ledger instruction is a program id, an ordered list of account metas,
//! and opaque data. For the vault program the data is the Anchor
//! discriminator (`sha256("global:<name>")[..8]`) followed by the Borsh
//! encoding of the arguments.
//!
//! The account lists below are order-sensitive and must match the program's
//! account structs field by field. Signer and writable flags are checked by
//! the runtime before the program even runs.

use borsh::BorshSerialize;
use serde::Serialize;

use super::accounts::discriminator;
use super::address::Address;
use super::pda::VaultAddresses;
use crate::config::{
    AGGREGATOR_PROGRAM_ID, ASSOCIATED_TOKEN_PROGRAM_ID, SYSTEM_PROGRAM_ID, TOKEN_PROGRAM_ID,
};
use crate::error::{EngineError, EngineResult};

/// One account reference inside an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountMeta {
    pub pubkey: Address,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    /// A writable account.
    pub fn new(pubkey: Address, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: true,
        }
    }

    /// A read-only account.
    pub fn new_readonly(pubkey: Address, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: false,
        }
    }
}

/// A single program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: Address,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

impl Instruction {
    /// Builds an Anchor instruction: discriminator plus Borsh arguments.
    pub fn anchor<A: BorshSerialize>(
        program_id: Address,
        name: &str,
        args: &A,
        accounts: Vec<AccountMeta>,
    ) -> EngineResult<Self> {
        let mut data = discriminator("global", name).to_vec();
        borsh::to_writer(&mut data, args)
            .map_err(|e| EngineError::invariant(format!("encode {} args: {}", name, e)))?;
        Ok(Self {
            program_id,
            accounts,
            data,
        })
    }
}

// ---------------------------------------------------------------------------
// Instruction Arguments
// ---------------------------------------------------------------------------

#[derive(BorshSerialize)]
struct DepositArgs {
    vault_index: u32,
    amount: u64,
    etf_share_price: u64,
}

#[derive(BorshSerialize)]
struct AmountArgs {
    vault_index: u32,
    amount: u64,
}

#[derive(BorshSerialize)]
struct WithdrawArgs {
    vault_index: u32,
    amount: u64,
    decimals: u8,
}

#[derive(BorshSerialize)]
struct FinalizeRedeemArgs {
    vault_index: u32,
    vault_token_amount: u64,
    etf_share_price: u64,
}

#[derive(BorshSerialize)]
struct FeeMintArgs {
    vault_index: u32,
    share_price: u64,
    management_fees_amount: u64,
}

#[derive(BorshSerialize)]
struct VaultIndexArgs {
    vault_index: u32,
}

#[derive(BorshSerialize)]
struct AccrueArgs {
    vault_index: u32,
    asset_prices: Vec<OnChainAssetPrice>,
    share_price: u64,
}

/// An asset price as the on-chain accrual takes it. The program values an
/// asset as `balance × price_usd / 10^6` whatever the mint's decimals, so
/// this is the USD price of 10^6 raw units, not of a whole token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, Serialize)]
pub struct OnChainAssetPrice {
    pub mint_address: Address,
    pub price_usd: u64,
}

#[derive(BorshSerialize)]
struct PauseArgs {
    vault_index: u32,
    paused: bool,
}

/// New factory fee parameters, in the program's argument order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, Serialize)]
pub struct FactoryFeeParams {
    pub entry_fee_bps: u16,
    pub exit_fee_bps: u16,
    pub vault_creation_fee_usdc: u64,
    pub min_management_fee_bps: u16,
    pub max_management_fee_bps: u16,
    pub vault_creator_fee_ratio_bps: u16,
    pub platform_fee_ratio_bps: u16,
}

// ---------------------------------------------------------------------------
// Vault Program Builders
// ---------------------------------------------------------------------------

/// Accounts supplied by the caller for a `deposit`.
#[derive(Debug, Clone, Copy)]
pub struct DepositAccounts {
    pub user: Address,
    pub stablecoin_mint: Address,
    pub user_stablecoin: Address,
    pub user_shares: Address,
    pub fee_recipient_stablecoin: Address,
    pub vault_admin_stablecoin: Address,
}

/// `deposit(vault_index, amount, etf_share_price)`: moves stablecoin into
/// vault custody, takes the entry fee, mints shares.
pub fn deposit(
    addrs: &VaultAddresses,
    accounts: &DepositAccounts,
    amount: u64,
    share_price: u64,
) -> EngineResult<Instruction> {
    Instruction::anchor(
        addrs.program_id,
        "deposit",
        &DepositArgs {
            vault_index: addrs.vault_index,
            amount,
            etf_share_price: share_price,
        },
        vec![
            AccountMeta::new(accounts.user, true),
            AccountMeta::new_readonly(addrs.factory, false),
            AccountMeta::new(addrs.vault, false),
            AccountMeta::new(addrs.share_mint, false),
            AccountMeta::new(accounts.user_stablecoin, false),
            AccountMeta::new_readonly(accounts.stablecoin_mint, false),
            AccountMeta::new(addrs.stablecoin_account, false),
            AccountMeta::new(accounts.user_shares, false),
            AccountMeta::new(accounts.fee_recipient_stablecoin, false),
            AccountMeta::new(accounts.vault_admin_stablecoin, false),
            AccountMeta::new(Address::from_static(AGGREGATOR_PROGRAM_ID), false),
            AccountMeta::new_readonly(Address::from_static(TOKEN_PROGRAM_ID), false),
            AccountMeta::new_readonly(Address::from_static(SYSTEM_PROGRAM_ID), false),
        ],
    )
}

/// `transfer_vault_to_user(vault_index, amount)`: releases vault stablecoin
/// to the signer so it can be swapped. Signer must be the vault or factory
/// admin.
pub fn transfer_vault_to_user(
    addrs: &VaultAddresses,
    user: Address,
    user_stablecoin: Address,
    amount: u64,
) -> EngineResult<Instruction> {
    Instruction::anchor(
        addrs.program_id,
        "transfer_vault_to_user",
        &AmountArgs {
            vault_index: addrs.vault_index,
            amount,
        },
        vec![
            AccountMeta::new(user, true),
            AccountMeta::new_readonly(addrs.factory, false),
            AccountMeta::new(addrs.vault, false),
            AccountMeta::new(addrs.stablecoin_account, false),
            AccountMeta::new(user_stablecoin, false),
            AccountMeta::new_readonly(Address::from_static(TOKEN_PROGRAM_ID), false),
            AccountMeta::new_readonly(Address::from_static(SYSTEM_PROGRAM_ID), false),
        ],
    )
}

/// Accounts for moving one underlying asset out of the vault.
#[derive(Debug, Clone, Copy)]
pub struct WithdrawAccounts {
    pub user: Address,
    pub vault_asset: Address,
    pub user_asset: Address,
    pub mint: Address,
    pub token_program: Address,
}

/// `withdraw_underlying_to_user(vault_index, amount, decimals)`: a checked
/// transfer, so it works for both token programs.
pub fn withdraw_underlying_to_user(
    addrs: &VaultAddresses,
    accounts: &WithdrawAccounts,
    amount: u64,
    decimals: u8,
) -> EngineResult<Instruction> {
    Instruction::anchor(
        addrs.program_id,
        "withdraw_underlying_to_user",
        &WithdrawArgs {
            vault_index: addrs.vault_index,
            amount,
            decimals,
        },
        vec![
            AccountMeta::new(accounts.user, true),
            AccountMeta::new_readonly(addrs.factory, false),
            AccountMeta::new(addrs.vault, false),
            AccountMeta::new(accounts.vault_asset, false),
            AccountMeta::new(accounts.user_asset, false),
            AccountMeta::new_readonly(accounts.mint, false),
            AccountMeta::new_readonly(accounts.token_program, false),
            AccountMeta::new_readonly(Address::from_static(SYSTEM_PROGRAM_ID), false),
        ],
    )
}

/// Accounts for settling a redemption.
#[derive(Debug, Clone, Copy)]
pub struct FinalizeRedeemAccounts {
    pub user: Address,
    pub user_shares: Address,
    pub user_stablecoin: Address,
    pub fee_recipient_stablecoin: Address,
    pub vault_admin_stablecoin: Address,
}

/// `finalize_redeem(vault_index, vault_token_amount, etf_share_price)`:
/// burns shares, pays the exit fee, sends the net to the user.
pub fn finalize_redeem(
    addrs: &VaultAddresses,
    accounts: &FinalizeRedeemAccounts,
    shares: u64,
    share_price: u64,
) -> EngineResult<Instruction> {
    Instruction::anchor(
        addrs.program_id,
        "finalize_redeem",
        &FinalizeRedeemArgs {
            vault_index: addrs.vault_index,
            vault_token_amount: shares,
            etf_share_price: share_price,
        },
        vec![
            AccountMeta::new(accounts.user, true),
            AccountMeta::new_readonly(addrs.factory, false),
            AccountMeta::new(addrs.vault, false),
            AccountMeta::new(addrs.share_mint, false),
            AccountMeta::new(accounts.user_shares, false),
            AccountMeta::new(addrs.stablecoin_account, false),
            AccountMeta::new(accounts.user_stablecoin, false),
            AccountMeta::new(accounts.fee_recipient_stablecoin, false),
            AccountMeta::new(accounts.vault_admin_stablecoin, false),
            AccountMeta::new_readonly(Address::from_static(TOKEN_PROGRAM_ID), false),
            AccountMeta::new_readonly(Address::from_static(SYSTEM_PROGRAM_ID), false),
        ],
    )
}

/// Share accounts that receive minted management fees.
#[derive(Debug, Clone, Copy)]
pub struct FeeMintAccounts {
    /// Signer: any keeper for `distribute`, the vault creator for `claim`.
    pub signer: Address,
    pub creator_shares: Address,
    pub fee_recipient_shares: Address,
}

fn fee_mint(
    name: &str,
    addrs: &VaultAddresses,
    accounts: &FeeMintAccounts,
    share_price: u64,
    fees: u64,
) -> EngineResult<Instruction> {
    Instruction::anchor(
        addrs.program_id,
        name,
        &FeeMintArgs {
            vault_index: addrs.vault_index,
            share_price,
            management_fees_amount: fees,
        },
        vec![
            AccountMeta::new(accounts.signer, true),
            AccountMeta::new_readonly(addrs.factory, false),
            AccountMeta::new(addrs.vault, false),
            AccountMeta::new(addrs.share_mint, false),
            AccountMeta::new(accounts.creator_shares, false),
            AccountMeta::new(accounts.fee_recipient_shares, false),
            AccountMeta::new_readonly(Address::from_static(TOKEN_PROGRAM_ID), false),
            AccountMeta::new_readonly(Address::from_static(SYSTEM_PROGRAM_ID), false),
        ],
    )
}

/// `distribute_accrued_fees(vault_index, share_price, management_fees_amount)`.
pub fn distribute_accrued_fees(
    addrs: &VaultAddresses,
    accounts: &FeeMintAccounts,
    share_price: u64,
    fees: u64,
) -> EngineResult<Instruction> {
    fee_mint("distribute_accrued_fees", addrs, accounts, share_price, fees)
}

/// `claim_management_fee(vault_index, share_price, management_fees_amount)`,
/// signed by the vault creator.
pub fn claim_management_fee(
    addrs: &VaultAddresses,
    accounts: &FeeMintAccounts,
    share_price: u64,
    fees: u64,
) -> EngineResult<Instruction> {
    fee_mint("claim_management_fee", addrs, accounts, share_price, fees)
}

/// `get_accrued_management_fees(vault_index, asset_prices, share_price)`:
/// books the fee accrued since the last accrual into the vault account.
/// `asset_accounts` are the vault's token accounts in `underlying_assets`
/// order and must already exist. Anyone may send it.
pub fn accrue_management_fees(
    addrs: &VaultAddresses,
    asset_prices: Vec<OnChainAssetPrice>,
    asset_accounts: &[Address],
    share_price: u64,
) -> EngineResult<Instruction> {
    if asset_prices.len() != asset_accounts.len() {
        return Err(EngineError::invariant(format!(
            "{} prices for {} asset accounts",
            asset_prices.len(),
            asset_accounts.len()
        )));
    }
    let mut accounts = vec![
        AccountMeta::new_readonly(addrs.factory, false),
        AccountMeta::new(addrs.vault, false),
        AccountMeta::new_readonly(addrs.stablecoin_account, false),
    ];
    accounts.extend(
        asset_accounts
            .iter()
            .map(|a| AccountMeta::new_readonly(*a, false)),
    );
    Instruction::anchor(
        addrs.program_id,
        "get_accrued_management_fees",
        &AccrueArgs {
            vault_index: addrs.vault_index,
            asset_prices,
            share_price,
        },
        accounts,
    )
}

/// Stablecoin accounts paid by a fee collection.
#[derive(Debug, Clone, Copy)]
pub struct CollectFeeAccounts {
    pub collector: Address,
    pub vault_admin_stablecoin: Address,
    pub fee_recipient_stablecoin: Address,
}

/// `collect_weekly_management_fees(vault_index)`: accrues, then pays the
/// accrued fees out of stablecoin custody to creator and platform.
pub fn collect_weekly_management_fees(
    addrs: &VaultAddresses,
    accounts: &CollectFeeAccounts,
) -> EngineResult<Instruction> {
    Instruction::anchor(
        addrs.program_id,
        "collect_weekly_management_fees",
        &VaultIndexArgs {
            vault_index: addrs.vault_index,
        },
        vec![
            AccountMeta::new(accounts.collector, true),
            AccountMeta::new_readonly(addrs.factory, false),
            AccountMeta::new(addrs.vault, false),
            AccountMeta::new(addrs.stablecoin_account, false),
            AccountMeta::new(accounts.vault_admin_stablecoin, false),
            AccountMeta::new(accounts.fee_recipient_stablecoin, false),
            AccountMeta::new_readonly(Address::from_static(TOKEN_PROGRAM_ID), false),
            AccountMeta::new_readonly(Address::from_static(SYSTEM_PROGRAM_ID), false),
        ],
    )
}

/// `set_vault_paused(vault_index, paused)`. Factory admin only.
pub fn set_vault_paused(addrs: &VaultAddresses, admin: Address, paused: bool) -> EngineResult<Instruction> {
    Instruction::anchor(
        addrs.program_id,
        "set_vault_paused",
        &PauseArgs {
            vault_index: addrs.vault_index,
            paused,
        },
        vec![
            AccountMeta::new(admin, true),
            AccountMeta::new_readonly(addrs.factory, false),
            AccountMeta::new(addrs.vault, false),
            AccountMeta::new_readonly(Address::from_static(SYSTEM_PROGRAM_ID), false),
        ],
    )
}

/// `update_factory_fees(...)`. Factory admin only.
pub fn update_factory_fees(
    program_id: Address,
    factory: Address,
    admin: Address,
    params: &FactoryFeeParams,
) -> EngineResult<Instruction> {
    Instruction::anchor(
        program_id,
        "update_factory_fees",
        params,
        vec![AccountMeta::new(admin, true), AccountMeta::new(factory, false)],
    )
}

// ---------------------------------------------------------------------------
// Token Account Setup
// ---------------------------------------------------------------------------

/// Associated token program `CreateIdempotent`: creates `account` for
/// (`owner`, `mint`) unless it already exists. `owner` may be a PDA.
pub fn create_associated_token_account_idempotent(
    payer: Address,
    account: Address,
    owner: Address,
    mint: Address,
    token_program: Address,
) -> Instruction {
    Instruction {
        program_id: Address::from_static(ASSOCIATED_TOKEN_PROGRAM_ID),
        accounts: vec![
            AccountMeta::new(payer, true),
            AccountMeta::new(account, false),
            AccountMeta::new_readonly(owner, false),
            AccountMeta::new_readonly(mint, false),
            AccountMeta::new_readonly(Address::from_static(SYSTEM_PROGRAM_ID), false),
            AccountMeta::new_readonly(token_program, false),
        ],
        data: vec![1],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VAULT_PROGRAM_ID;

    fn addrs() -> VaultAddresses {
        VaultAddresses::derive(&Address::from_static(VAULT_PROGRAM_ID), 4).unwrap()
    }

    #[test]
    fn deposit_data_layout() {
        let accounts = DepositAccounts {
            user: Address::new_from_array([1; 32]),
            stablecoin_mint: Address::new_from_array([2; 32]),
            user_stablecoin: Address::new_from_array([3; 32]),
            user_shares: Address::new_from_array([4; 32]),
            fee_recipient_stablecoin: Address::new_from_array([5; 32]),
            vault_admin_stablecoin: Address::new_from_array([6; 32]),
        };
        let ix = deposit(&addrs(), &accounts, 10_000_000, 563_500).unwrap();

        assert_eq!(&ix.data[..8], &discriminator("global", "deposit"));
        // u32 index + u64 amount + u64 price
        assert_eq!(ix.data.len(), 8 + 4 + 8 + 8);
        assert_eq!(&ix.data[8..12], &4u32.to_le_bytes());
        assert_eq!(&ix.data[12..20], &10_000_000u64.to_le_bytes());
        assert_eq!(&ix.data[20..28], &563_500u64.to_le_bytes());
        assert_eq!(ix.accounts.len(), 13);
        assert!(ix.accounts[0].is_signer);
        assert!(ix.accounts.iter().skip(1).all(|m| !m.is_signer));
    }

    #[test]
    fn fee_instructions_differ_only_in_discriminator() {
        let accounts = FeeMintAccounts {
            signer: Address::new_from_array([1; 32]),
            creator_shares: Address::new_from_array([2; 32]),
            fee_recipient_shares: Address::new_from_array([3; 32]),
        };
        let a = distribute_accrued_fees(&addrs(), &accounts, 500_000, 20_000).unwrap();
        let b = claim_management_fee(&addrs(), &accounts, 500_000, 20_000).unwrap();
        assert_eq!(a.accounts, b.accounts);
        assert_ne!(a.data[..8], b.data[..8]);
        assert_eq!(a.data[8..], b.data[8..]);
    }

    #[test]
    fn accrual_carries_prices_and_asset_accounts() {
        let prices = vec![
            OnChainAssetPrice {
                mint_address: Address::new_from_array([1; 32]),
                price_usd: 150_000,
            },
            OnChainAssetPrice {
                mint_address: Address::new_from_array([2; 32]),
                price_usd: 1_000_000,
            },
        ];
        let assets = [Address::new_from_array([11; 32]), Address::new_from_array([12; 32])];
        let ix = accrue_management_fees(&addrs(), prices.clone(), &assets, 990_000).unwrap();

        // index + vec length + 2 × (mint + price) + share price
        assert_eq!(ix.data.len(), 8 + 4 + 4 + 2 * 40 + 8);
        assert_eq!(&ix.data[12..16], &2u32.to_le_bytes());
        assert_eq!(&ix.data[16..48], &[1; 32]);
        assert_eq!(&ix.data[48..56], &150_000u64.to_le_bytes());
        assert_eq!(ix.accounts.len(), 5);
        assert!(ix.accounts[1].is_writable);
        assert_eq!(ix.accounts[4].pubkey, assets[1]);
        assert!(ix.accounts.iter().all(|m| !m.is_signer));

        assert!(accrue_management_fees(&addrs(), prices, &assets[..1], 0).is_err());
    }

    #[test]
    fn collection_takes_only_the_index() {
        let accounts = CollectFeeAccounts {
            collector: Address::new_from_array([1; 32]),
            vault_admin_stablecoin: Address::new_from_array([2; 32]),
            fee_recipient_stablecoin: Address::new_from_array([3; 32]),
        };
        let ix = collect_weekly_management_fees(&addrs(), &accounts).unwrap();
        assert_eq!(ix.data.len(), 8 + 4);
        assert_eq!(ix.accounts.len(), 8);
        assert!(ix.accounts[0].is_signer);
        assert!(ix.accounts[3].is_writable);
        assert_eq!(ix.accounts[3].pubkey, addrs().stablecoin_account);
    }

    #[test]
    fn pause_encodes_bool_as_one_byte() {
        let ix = set_vault_paused(&addrs(), Address::new_from_array([9; 32]), true).unwrap();
        assert_eq!(ix.data.len(), 8 + 4 + 1);
        assert_eq!(ix.data[12], 1);
    }

    #[test]
    fn factory_fee_args_in_program_order() {
        let params = FactoryFeeParams {
            entry_fee_bps: 25,
            exit_fee_bps: 25,
            vault_creation_fee_usdc: 10_000_000,
            min_management_fee_bps: 50,
            max_management_fee_bps: 300,
            vault_creator_fee_ratio_bps: 7_000,
            platform_fee_ratio_bps: 3_000,
        };
        let ix = update_factory_fees(
            Address::from_static(VAULT_PROGRAM_ID),
            Address::new_from_array([1; 32]),
            Address::new_from_array([2; 32]),
            &params,
        )
        .unwrap();
        assert_eq!(ix.data.len(), 8 + 2 + 2 + 8 + 2 + 2 + 2 + 2);
        assert_eq!(&ix.data[8..10], &25u16.to_le_bytes());
        assert_eq!(&ix.data[12..20], &10_000_000u64.to_le_bytes());
    }

    #[test]
    fn idempotent_ata_creation_layout() {
        let payer = Address::new_from_array([1; 32]);
        let ix = create_associated_token_account_idempotent(
            payer,
            Address::new_from_array([2; 32]),
            addrs().vault,
            Address::new_from_array([3; 32]),
            Address::from_static(TOKEN_PROGRAM_ID),
        );
        assert_eq!(ix.data, vec![1]);
        assert_eq!(ix.accounts[0], AccountMeta::new(payer, true));
        assert!(!ix.accounts[2].is_writable);
    }
}
