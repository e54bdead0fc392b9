//! # Management Fee Distribution
//!
//! Accrued management fees are paid in shares: the program mints
//! `fees × 10^decimals / share_price` new shares, split between the vault
//! creator and the platform by the factory's ratio. The share price used is
//! the book price `total_assets × 10^decimals / total_supply`.
//!
//! Two entry points differ only in who signs: anyone may trigger
//! `distribute_accrued_fees`, only the vault creator `claim_management_fee`.
//! When there is nothing to mint no transaction is sent at all.
//!
//! Fees can also be settled in stablecoin. `get_accrued_management_fees`
//! books the fee earned since the last accrual against a GAV the program
//! computes from the prices we pass. `collect_weekly_management_fees` books
//! the fee on `total_assets` and pays everything accrued out of custody.

use std::sync::Arc;

use serde::Serialize;

use super::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::ledger::instruction::{
    accrue_management_fees, claim_management_fee, collect_weekly_management_fees,
    distribute_accrued_fees, CollectFeeAccounts, FeeMintAccounts, OnChainAssetPrice,
};
use crate::ledger::Keypair;
use crate::ledger::{Address, Instruction};
use crate::math::{accrued_fee, book_share_price, mul_div_wide, pow10, shares_for_deposit, split_fee};

/// Outcome of a fee run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FeeDistribution {
    Distributed {
        vault: Address,
        signature: String,
        fees_usd: u64,
        share_price: u64,
        /// Client-side previews of the minted shares.
        creator_shares: u64,
        platform_shares: u64,
    },
    /// Fees booked on-chain, nothing paid.
    Accrued {
        vault: Address,
        signature: String,
        gav: u64,
        newly_accrued: u64,
        /// Booked total after the accrual, as previewed.
        total_accrued: u64,
    },
    /// Accrued fees paid out of stablecoin custody.
    Collected {
        vault: Address,
        signature: String,
        fees_usd: u64,
        creator_amount: u64,
        platform_amount: u64,
    },
    NoOp {
        vault: Address,
        reason: String,
    },
}

impl FeeDistribution {
    pub fn is_noop(&self) -> bool {
        matches!(self, FeeDistribution::NoOp { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeeInstruction {
    Distribute,
    Claim,
}

pub struct FeeDistributionEngine {
    ctx: Arc<EngineContext>,
}

impl FeeDistributionEngine {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Mints accrued fees through `distribute_accrued_fees`.
    pub async fn distribute(&self, vault_index: u32, signer: &Keypair) -> EngineResult<FeeDistribution> {
        self.run(vault_index, signer, FeeInstruction::Distribute).await
    }

    /// Mints accrued fees through the creator-signed `claim_management_fee`.
    pub async fn claim(&self, vault_index: u32, signer: &Keypair) -> EngineResult<FeeDistribution> {
        self.run(vault_index, signer, FeeInstruction::Claim).await
    }

    /// Books the management fee earned since the last accrual. Asset prices
    /// are passed per 10^6 raw units; unpriced assets go in at 0.
    pub async fn accrue(&self, vault_index: u32, signer: &Keypair) -> EngineResult<FeeDistribution> {
        let ctx = &self.ctx;
        tracing::info!(step = 1, vault_index, "valuing vault for accrual");
        let snapshot = ctx.reader.snapshot(vault_index).await?;
        let addrs = snapshot.addresses;
        let valuation = ctx.valuation.valuate_snapshot(&snapshot).await?;

        let reason = if valuation.management_fee_bps == 0 {
            Some("vault charges no management fee")
        } else if valuation.elapsed_seconds == 0 {
            Some("accrued this second already")
        } else if valuation.gav == 0 {
            Some("vault holds nothing")
        } else {
            None
        };
        if let Some(reason) = reason {
            tracing::info!(step = 2, vault = %addrs.vault, reason, "nothing to accrue");
            return Ok(FeeDistribution::NoOp {
                vault: addrs.vault,
                reason: reason.to_string(),
            });
        }

        let payer = signer.pubkey();
        let mut instructions = Vec::with_capacity(valuation.assets.len() + 1);
        let mut prices = Vec::with_capacity(valuation.assets.len());
        let mut accounts = Vec::with_capacity(valuation.assets.len());
        for asset in &valuation.assets {
            let price_usd = if asset.usd_price == 0 {
                0
            } else {
                mul_div_wide(asset.usd_price as u128, 1_000_000, pow10(asset.decimals)?)?
            };
            prices.push(OnChainAssetPrice {
                mint_address: asset.mint,
                price_usd,
            });
            // The program reads every asset account, so missing ones are created.
            let (account, create) = ctx.ensure_token_account(&payer, &addrs.vault, &asset.mint).await?;
            accounts.push(account);
            instructions.push(create);
        }
        instructions.push(accrue_management_fees(
            &addrs,
            prices,
            &accounts,
            valuation.nav_per_token,
        )?);

        let signature = ctx.ledger.submit(signer, instructions, Vec::new()).await?;
        let total_accrued = valuation.previously_accrued.saturating_add(valuation.newly_accrued);
        tracing::info!(
            step = 3,
            vault = %addrs.vault,
            %signature,
            gav = valuation.gav,
            newly_accrued = valuation.newly_accrued,
            total_accrued,
            "management fees accrued"
        );

        Ok(FeeDistribution::Accrued {
            vault: addrs.vault,
            signature,
            gav: valuation.gav,
            newly_accrued: valuation.newly_accrued,
            total_accrued,
        })
    }

    /// Pays accrued management fees in stablecoin to the vault creator and
    /// the platform. Refuses before sending when custody cannot cover them.
    pub async fn collect(&self, vault_index: u32, signer: &Keypair) -> EngineResult<FeeDistribution> {
        let ctx = &self.ctx;
        let snapshot = ctx.reader.snapshot(vault_index).await?;
        let vault = &snapshot.vault;
        let addrs = snapshot.addresses;

        let elapsed = chrono::Utc::now()
            .timestamp()
            .saturating_sub(vault.last_fee_accrual_ts)
            .max(0) as u64;
        let fees = vault
            .accrued_management_fees_usdc
            .saturating_add(accrued_fee(vault.total_assets, vault.management_fees, elapsed)?);
        tracing::info!(
            step = 1,
            vault = %addrs.vault,
            booked = vault.accrued_management_fees_usdc,
            fees,
            custody = snapshot.stablecoin_balance,
            "collection previewed"
        );
        if fees == 0 {
            return Ok(FeeDistribution::NoOp {
                vault: addrs.vault,
                reason: "no management fees to collect".to_string(),
            });
        }
        if snapshot.stablecoin_balance < fees {
            return Err(EngineError::InsufficientLiquidity {
                available: snapshot.stablecoin_balance,
                required: fees,
            });
        }
        let (creator_amount, platform_amount) = split_fee(fees, snapshot.factory.vault_creator_fee_ratio_bps)?;

        let payer = signer.pubkey();
        let stablecoin = snapshot.stablecoin_mint;
        let (admin_account, create_admin) = ctx.ensure_token_account(&payer, &vault.admin, &stablecoin).await?;
        let (platform_account, create_platform) = ctx
            .ensure_token_account(&payer, &snapshot.factory.fee_recipient, &stablecoin)
            .await?;
        let collect = collect_weekly_management_fees(
            &addrs,
            &CollectFeeAccounts {
                collector: payer,
                vault_admin_stablecoin: admin_account,
                fee_recipient_stablecoin: platform_account,
            },
        )?;
        let signature = ctx
            .ledger
            .submit(signer, vec![create_admin, create_platform, collect], Vec::new())
            .await?;
        tracing::info!(
            step = 2,
            vault = %addrs.vault,
            %signature,
            creator_amount,
            platform_amount,
            "management fees collected"
        );

        Ok(FeeDistribution::Collected {
            vault: addrs.vault,
            signature,
            fees_usd: fees,
            creator_amount,
            platform_amount,
        })
    }

    async fn run(
        &self,
        vault_index: u32,
        signer: &Keypair,
        kind: FeeInstruction,
    ) -> EngineResult<FeeDistribution> {
        let ctx = &self.ctx;
        tracing::info!(step = 1, vault_index, ?kind, "valuing vault for fee run");
        let snapshot = ctx.reader.snapshot(vault_index).await?;
        let vault = &snapshot.vault;
        let addrs = snapshot.addresses;

        if kind == FeeInstruction::Claim && signer.pubkey() != vault.admin {
            return Err(EngineError::Config(format!(
                "claim must be signed by the vault creator {}, not {}",
                vault.admin,
                signer.pubkey()
            )));
        }

        let valuation = ctx.valuation.valuate_snapshot(&snapshot).await?;
        let noop = |reason: &str| {
            tracing::info!(step = 2, vault = %addrs.vault, reason, "nothing to distribute");
            Ok(FeeDistribution::NoOp {
                vault: addrs.vault,
                reason: reason.to_string(),
            })
        };
        if valuation.accrued_fees_usd == 0 {
            return noop("no accrued fees");
        }
        if vault.total_supply == 0 || vault.total_assets == 0 {
            return noop("vault has no supply or booked assets");
        }

        let fees = valuation.accrued_fees_usd;
        let share_price = book_share_price(vault.total_assets, vault.total_supply, snapshot.share_decimals)?;
        let fee_shares = shares_for_deposit(fees, share_price, snapshot.share_decimals)?;
        let (creator_shares, platform_shares) =
            split_fee(fee_shares, snapshot.factory.vault_creator_fee_ratio_bps)?;
        tracing::info!(
            step = 2,
            vault = %addrs.vault,
            fees,
            share_price,
            creator_shares,
            platform_shares,
            "fee shares previewed"
        );

        let payer = signer.pubkey();
        let (creator_account, create_creator) = ctx
            .ensure_token_account(&payer, &vault.admin, &addrs.share_mint)
            .await?;
        let (platform_account, create_platform) = ctx
            .ensure_token_account(&payer, &snapshot.factory.fee_recipient, &addrs.share_mint)
            .await?;
        let accounts = FeeMintAccounts {
            signer: payer,
            creator_shares: creator_account,
            fee_recipient_shares: platform_account,
        };
        let mint: Instruction = match kind {
            FeeInstruction::Distribute => distribute_accrued_fees(&addrs, &accounts, share_price, fees)?,
            FeeInstruction::Claim => claim_management_fee(&addrs, &accounts, share_price, fees)?,
        };
        let signature = ctx
            .ledger
            .submit(signer, vec![create_creator, create_platform, mint], Vec::new())
            .await?;
        tracing::info!(step = 3, vault = %addrs.vault, %signature, "fees minted");

        Ok(FeeDistribution::Distributed {
            vault: addrs.vault,
            signature,
            fees_usd: fees,
            share_price,
            creator_shares,
            platform_shares,
        })
    }
}
