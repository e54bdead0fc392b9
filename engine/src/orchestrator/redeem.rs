//! # Redeem Flow
//!
//! ```text
//! ProRataCompute ──► WithdrawAndSwap(asset 1..n) ──► LiquidityCheck ──┬──► Finalize
//!                                                                     └──► Downscale ──► Finalize
//! ```
//!
//! Each asset's pro-rata slice is withdrawn to the signer and swapped back
//! into the vault's stablecoin custody in one transaction. Assets without a
//! pool or route contribute nothing. Whatever stablecoin the vault then holds
//! decides how many shares can actually be paid out; the request is scaled
//! down to fit, never up.

use std::sync::Arc;

use serde::Serialize;

use super::{is_asset_failure, AssetOutcome, EngineContext, SettledSwap, SwapLeg};
use crate::error::{EngineError, EngineResult};
use crate::ledger::instruction::{
    finalize_redeem, withdraw_underlying_to_user, FinalizeRedeemAccounts, WithdrawAccounts,
};
use crate::ledger::pda::VaultAddresses;
use crate::ledger::reader::AssetHolding;
use crate::ledger::{Address, Keypair};
use crate::math::{apply_fee, downscale_shares, pro_rata, stablecoin_for_shares, FeeBreakdown};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedeemState {
    ProRataCompute,
    WithdrawAndSwap,
    LiquidityCheck,
    Downscale,
    Finalize,
    Confirmed,
}

/// One asset's pro-rata slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedWithdrawal {
    pub mint: Address,
    pub amount: u64,
    pub vault_account: Address,
    pub token_program: Address,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedeemPlan {
    pub addresses: VaultAddresses,
    pub stablecoin_mint: Address,
    pub share_decimals: u8,
    pub shares: u64,
    pub total_supply: u64,
    pub share_price: u64,
    /// Stablecoin the full request is worth at `share_price`.
    pub required_stablecoin: u64,
    pub withdrawals: Vec<PlannedWithdrawal>,
    #[serde(skip)]
    pub(crate) exit_fee_bps: u16,
    #[serde(skip)]
    pub(crate) fee_recipient: Address,
    #[serde(skip)]
    pub(crate) vault_admin: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WithdrawalResult {
    pub mint: Address,
    pub amount: u64,
    pub outcome: AssetOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedeemReceipt {
    pub vault: Address,
    pub vault_index: u32,
    pub state: RedeemState,
    pub requested_shares: u64,
    pub redeemed_shares: u64,
    pub downscaled: bool,
    pub share_price: u64,
    pub required_stablecoin: u64,
    pub available_stablecoin: u64,
    /// Client-side preview of the exit fee on the redeemed shares.
    pub exit_fee: FeeBreakdown,
    pub withdrawals: Vec<WithdrawalResult>,
    pub finalize_signature: String,
}

pub struct RedeemOrchestrator {
    ctx: Arc<EngineContext>,
}

impl RedeemOrchestrator {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Computes every asset's pro-rata slice. Rejects empty vaults and
    /// share amounts of zero or above the supply.
    pub async fn plan(
        &self,
        vault_index: u32,
        shares: u64,
        share_price: Option<u64>,
    ) -> EngineResult<RedeemPlan> {
        tracing::info!(step = 1, state = ?RedeemState::ProRataCompute, vault_index, shares, "planning redemption");
        let snapshot = self.ctx.reader.snapshot(vault_index).await?;
        snapshot.ensure_active()?;

        let total_supply = snapshot.vault.total_supply;
        if total_supply == 0 {
            return Err(EngineError::invariant("vault has no shares outstanding"));
        }
        if shares == 0 || shares > total_supply {
            return Err(EngineError::invariant(format!(
                "share amount {} outside 1..={}",
                shares, total_supply
            )));
        }

        let share_price = match share_price {
            Some(price) => price,
            None => self.ctx.valuation.valuate_snapshot(&snapshot).await?.nav_per_token,
        };
        let required_stablecoin = stablecoin_for_shares(shares, share_price, snapshot.share_decimals)?;

        let mut withdrawals = Vec::with_capacity(snapshot.holdings.len());
        for holding in &snapshot.holdings {
            withdrawals.push(Self::slice(holding, shares, total_supply)?);
        }

        tracing::info!(
            step = 1,
            vault = %snapshot.addresses.vault,
            share_price,
            required_stablecoin,
            assets = withdrawals.len(),
            "pro-rata computed"
        );

        Ok(RedeemPlan {
            addresses: snapshot.addresses,
            stablecoin_mint: snapshot.stablecoin_mint,
            share_decimals: snapshot.share_decimals,
            shares,
            total_supply,
            share_price,
            required_stablecoin,
            withdrawals,
            exit_fee_bps: snapshot.factory.exit_fee_bps,
            fee_recipient: snapshot.factory.fee_recipient,
            vault_admin: snapshot.vault.admin,
        })
    }

    fn slice(holding: &AssetHolding, shares: u64, total_supply: u64) -> EngineResult<PlannedWithdrawal> {
        Ok(PlannedWithdrawal {
            mint: holding.mint,
            amount: pro_rata(holding.balance, shares, total_supply)?,
            vault_account: holding.vault_account,
            token_program: holding.token_program.id(),
        })
    }

    /// Unwinds the slices, sizes the payout to the available stablecoin and
    /// finalizes. Fails with [`EngineError::NoLiquidity`] without touching
    /// the shares when nothing can be paid.
    pub async fn execute(&self, plan: RedeemPlan, signer: &Keypair) -> EngineResult<RedeemReceipt> {
        let ctx = &self.ctx;
        let addrs = plan.addresses;
        let stablecoin = plan.stablecoin_mint;

        let mut withdrawals = Vec::with_capacity(plan.withdrawals.len());
        for (i, withdrawal) in plan.withdrawals.iter().enumerate() {
            let step = 2 + i;
            let outcome = if withdrawal.mint == stablecoin {
                AssetOutcome::Retained
            } else if withdrawal.amount == 0 {
                AssetOutcome::Empty
            } else {
                tracing::info!(
                    step,
                    state = ?RedeemState::WithdrawAndSwap,
                    mint = %withdrawal.mint,
                    amount = withdrawal.amount,
                    "unwinding asset"
                );
                match self.unwind(signer, &addrs, stablecoin, withdrawal).await {
                    Ok(settled) => AssetOutcome::Settled(settled),
                    Err(err) if is_asset_failure(&err) => {
                        // An unconfirmed unwind still counts if the liquidity
                        // check finds its stablecoin.
                        tracing::warn!(step, mint = %withdrawal.mint, error = %err, "asset unwind failed");
                        AssetOutcome::from_failure(&err)
                    }
                    Err(err) => return Err(err),
                }
            };
            withdrawals.push(WithdrawalResult {
                mint: withdrawal.mint,
                amount: withdrawal.amount,
                outcome,
            });
        }

        // Liquidity check against fresh state.
        let check_step = 2 + plan.withdrawals.len();
        let available_stablecoin = ctx.reader.balance_or_zero(&addrs.stablecoin_account).await?;
        let vault = ctx.reader.vault(&addrs).await?;
        tracing::info!(
            step = check_step,
            state = ?RedeemState::LiquidityCheck,
            available = available_stablecoin,
            required = plan.required_stablecoin,
            "checking liquidity"
        );

        let mut redeemed_shares = plan.shares;
        if available_stablecoin < plan.required_stablecoin {
            let shortfall = EngineError::InsufficientLiquidity {
                available: available_stablecoin,
                required: plan.required_stablecoin,
            };
            redeemed_shares = downscale_shares(
                plan.shares,
                available_stablecoin,
                vault.total_supply,
                vault.total_assets,
            )?;
            tracing::warn!(
                step = check_step,
                state = ?RedeemState::Downscale,
                requested = plan.shares,
                redeemable = redeemed_shares,
                "{}",
                shortfall
            );
            if redeemed_shares == 0 {
                return Err(EngineError::NoLiquidity {
                    requested_shares: plan.shares,
                });
            }
        }

        let exit_fee = apply_fee(
            stablecoin_for_shares(redeemed_shares, plan.share_price, plan.share_decimals)?,
            plan.exit_fee_bps,
        )?;

        tracing::info!(
            step = check_step + 1,
            state = ?RedeemState::Finalize,
            shares = redeemed_shares,
            exit_fee = exit_fee.fee,
            "finalizing redemption"
        );
        let user = signer.pubkey();
        let (user_stablecoin, create_user_stablecoin) =
            ctx.ensure_token_account(&user, &user, &stablecoin).await?;
        let accounts = FinalizeRedeemAccounts {
            user,
            user_shares: ctx.reader.token_account_for(&user, &addrs.share_mint).await?,
            user_stablecoin,
            fee_recipient_stablecoin: ctx
                .reader
                .token_account_for(&plan.fee_recipient, &stablecoin)
                .await?,
            vault_admin_stablecoin: ctx.reader.token_account_for(&plan.vault_admin, &stablecoin).await?,
        };
        let finalize_signature = ctx
            .ledger
            .submit(
                signer,
                vec![
                    create_user_stablecoin,
                    finalize_redeem(&addrs, &accounts, redeemed_shares, plan.share_price)?,
                ],
                Vec::new(),
            )
            .await?;

        tracing::info!(
            step = check_step + 2,
            state = ?RedeemState::Confirmed,
            signature = %finalize_signature,
            "redemption confirmed"
        );
        Ok(RedeemReceipt {
            vault: addrs.vault,
            vault_index: addrs.vault_index,
            state: RedeemState::Confirmed,
            requested_shares: plan.shares,
            redeemed_shares,
            downscaled: redeemed_shares < plan.shares,
            share_price: plan.share_price,
            required_stablecoin: plan.required_stablecoin,
            available_stablecoin,
            exit_fee,
            withdrawals,
            finalize_signature,
        })
    }

    /// Plans and executes in one call.
    pub async fn redeem(
        &self,
        vault_index: u32,
        shares: u64,
        share_price: Option<u64>,
        signer: &Keypair,
    ) -> EngineResult<RedeemReceipt> {
        let plan = self.plan(vault_index, shares, share_price).await?;
        self.execute(plan, signer).await
    }

    /// Withdraws the slice to the signer's account for the mint and swaps it
    /// into the vault's stablecoin custody, in one transaction.
    async fn unwind(
        &self,
        signer: &Keypair,
        addrs: &VaultAddresses,
        stablecoin: Address,
        withdrawal: &PlannedWithdrawal,
    ) -> EngineResult<SettledSwap> {
        let ctx = &self.ctx;
        let user = signer.pubkey();
        let decimals = ctx.reader.mint(&withdrawal.mint).await?.decimals;
        let (transit, create_transit) = ctx
            .ensure_token_account(&user, &user, &withdrawal.mint)
            .await?;
        let funding = vec![
            create_transit,
            withdraw_underlying_to_user(
                addrs,
                &WithdrawAccounts {
                    user,
                    vault_asset: withdrawal.vault_account,
                    user_asset: transit,
                    mint: withdrawal.mint,
                    token_program: withdrawal.token_program,
                },
                withdrawal.amount,
                decimals,
            )?,
        ];
        let leg = SwapLeg {
            input_mint: withdrawal.mint,
            output_mint: stablecoin,
            amount: withdrawal.amount,
            destination: addrs.stablecoin_account,
        };
        ctx.execute_swap(signer, &leg, funding).await
    }
}
