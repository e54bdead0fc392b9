//! # Deposit Flow
//!
//! ```text
//! Quoting ──► Funding ──► Swapping(asset 1..n) ──► Settling ──► Confirmed
//!    │           │               │
//!    └───────────┴───────────────┴──────────────────────────► Failed
//! ```
//!
//! [`DepositOrchestrator::plan`] reads the vault, checks it can accept a
//! deposit and previews fee, shares and the per-asset split. Nothing is
//! submitted. [`DepositOrchestrator::execute`] is the point of no return: it
//! funds the vault, then swaps asset by asset. Settled swaps are never
//! rolled back; a failed asset is skipped or stops the flow depending on
//! [`SwapFailurePolicy`].

use std::sync::Arc;

use serde::Serialize;

use super::{is_asset_failure, AssetOutcome, EngineContext, SwapLeg};
use crate::config::SwapFailurePolicy;
use crate::error::{EngineError, EngineResult};
use crate::ledger::instruction::{deposit, transfer_vault_to_user, DepositAccounts};
use crate::ledger::pda::VaultAddresses;
use crate::ledger::{Address, Keypair};
use crate::math::{apply_fee, bps_of, shares_for_deposit, FeeBreakdown};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositState {
    Quoting,
    Funding,
    Swapping,
    Settling,
    Confirmed,
    Failed,
}

/// One asset's slice of a deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedAllocation {
    pub mint: Address,
    pub allocation_bps: u16,
    /// Stablecoin to swap into this asset.
    pub stablecoin_amount: u64,
    /// The vault's token account receiving the asset.
    pub vault_account: Address,
    /// Balance of `vault_account` when the plan was made.
    pub balance_before: u64,
}

/// Everything decided before the first transaction.
#[derive(Debug, Clone, Serialize)]
pub struct DepositPlan {
    pub addresses: VaultAddresses,
    pub stablecoin_mint: Address,
    pub share_decimals: u8,
    /// Share price passed to the program (6-decimal USD per whole share).
    /// Always 0 for a vault without shares.
    pub share_price: u64,
    pub entry_fee: FeeBreakdown,
    /// Client-side preview. The program mints the authoritative amount.
    pub expected_shares: u64,
    pub allocations: Vec<PlannedAllocation>,
    /// Net stablecoin left unallocated by integer division or by a Σ bps
    /// under 10000. Stays in the vault.
    pub residue: u64,
    #[serde(skip)]
    pub(crate) fee_recipient: Address,
    #[serde(skip)]
    pub(crate) vault_admin: Address,
}

/// One asset after execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationResult {
    pub mint: Address,
    pub stablecoin_amount: u64,
    pub outcome: AssetOutcome,
    /// Increase of the vault's balance of the asset, read back after the
    /// swaps.
    pub landed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepositReceipt {
    pub vault: Address,
    pub vault_index: u32,
    pub state: DepositState,
    pub amount: u64,
    pub entry_fee: FeeBreakdown,
    pub share_price: u64,
    pub expected_shares: u64,
    pub funding_signature: String,
    pub allocations: Vec<AllocationResult>,
    pub residue: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl DepositReceipt {
    pub fn skipped(&self) -> usize {
        self.allocations
            .iter()
            .filter(|a| matches!(a.outcome, AssetOutcome::Skipped { .. }))
            .count()
    }

    /// Assets whose swap was sent but never seen confirmed. `landed` tells
    /// whether each one arrived.
    pub fn unconfirmed(&self) -> usize {
        self.allocations
            .iter()
            .filter(|a| matches!(a.outcome, AssetOutcome::Unconfirmed { .. }))
            .count()
    }
}

pub struct DepositOrchestrator {
    ctx: Arc<EngineContext>,
}

impl DepositOrchestrator {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Reads and validates the vault and previews the deposit. `share_price`
    /// overrides the valuation's NAV per share, except on a vault without
    /// shares, which mints 1:1.
    pub async fn plan(
        &self,
        vault_index: u32,
        amount: u64,
        share_price: Option<u64>,
    ) -> EngineResult<DepositPlan> {
        tracing::info!(step = 1, state = ?DepositState::Quoting, vault_index, amount, "planning deposit");
        if amount == 0 {
            return Err(EngineError::invariant("deposit amount must be positive"));
        }

        let snapshot = self.ctx.reader.snapshot(vault_index).await?;
        snapshot.ensure_active()?;
        let allocated_bps = snapshot.vault.validate_allocations()?;

        // The program mints 1:1 only for a zero price, so an empty vault is
        // always sent 0 whatever the caller asked for.
        let share_price = if snapshot.vault.total_supply == 0 {
            if let Some(requested) = share_price.filter(|p| *p != 0) {
                tracing::warn!(requested, "vault has no shares yet, minting 1:1");
            }
            0
        } else {
            match share_price {
                Some(price) => price,
                None => self.ctx.valuation.valuate_snapshot(&snapshot).await?.nav_per_token,
            }
        };
        let entry_fee = apply_fee(amount, snapshot.factory.entry_fee_bps)?;
        let expected_shares =
            shares_for_deposit(entry_fee.net, share_price, snapshot.share_decimals)?;

        let mut allocations = Vec::with_capacity(snapshot.holdings.len());
        for holding in snapshot.holdings.iter().filter(|h| h.allocation_bps > 0) {
            allocations.push(PlannedAllocation {
                mint: holding.mint,
                allocation_bps: holding.allocation_bps,
                stablecoin_amount: bps_of(entry_fee.net, holding.allocation_bps)?,
                vault_account: holding.vault_account,
                balance_before: holding.balance,
            });
        }
        let allocated: u64 = allocations.iter().map(|a| a.stablecoin_amount).sum();
        let residue = entry_fee
            .net
            .checked_sub(allocated)
            .ok_or_else(|| EngineError::invariant("allocations exceed net deposit"))?;

        tracing::info!(
            step = 2,
            vault = %snapshot.addresses.vault,
            gross = entry_fee.gross,
            entry_fee = entry_fee.fee,
            net = entry_fee.net,
            share_price,
            expected_shares,
            allocated_bps,
            residue,
            "deposit preview"
        );

        Ok(DepositPlan {
            addresses: snapshot.addresses,
            stablecoin_mint: snapshot.stablecoin_mint,
            share_decimals: snapshot.share_decimals,
            share_price,
            entry_fee,
            expected_shares,
            allocations,
            residue,
            fee_recipient: snapshot.factory.fee_recipient,
            vault_admin: snapshot.vault.admin,
        })
    }

    /// Submits the deposit and the per-asset swaps. `signer` deposits the
    /// stablecoin and must also be allowed to move it out of the vault.
    pub async fn execute(&self, plan: DepositPlan, signer: &Keypair) -> EngineResult<DepositReceipt> {
        let ctx = &self.ctx;
        let user = signer.pubkey();
        let addrs = plan.addresses;
        let stablecoin = plan.stablecoin_mint;

        // Funding
        tracing::info!(step = 3, state = ?DepositState::Funding, amount = plan.entry_fee.gross, "funding vault");
        let (user_shares, create_shares) = ctx
            .ensure_token_account(&user, &user, &addrs.share_mint)
            .await?;
        let accounts = DepositAccounts {
            user,
            stablecoin_mint: stablecoin,
            user_stablecoin: ctx.reader.token_account_for(&user, &stablecoin).await?,
            user_shares,
            fee_recipient_stablecoin: ctx
                .reader
                .token_account_for(&plan.fee_recipient, &stablecoin)
                .await?,
            vault_admin_stablecoin: ctx.reader.token_account_for(&plan.vault_admin, &stablecoin).await?,
        };
        let funding_signature = ctx
            .ledger
            .submit(
                signer,
                vec![
                    create_shares,
                    deposit(&addrs, &accounts, plan.entry_fee.gross, plan.share_price)?,
                ],
                Vec::new(),
            )
            .await?;
        tracing::info!(step = 3, signature = %funding_signature, "deposit confirmed");

        // Swapping
        let mut outcomes = Vec::with_capacity(plan.allocations.len());
        let mut failure = None;
        for (i, allocation) in plan.allocations.iter().enumerate() {
            let step = 4 + i;
            if failure.is_some() {
                outcomes.push(AssetOutcome::NotAttempted);
                continue;
            }
            if allocation.mint == stablecoin {
                tracing::info!(step, mint = %allocation.mint, "stablecoin allocation stays in custody");
                outcomes.push(AssetOutcome::Retained);
                continue;
            }
            if allocation.stablecoin_amount == 0 {
                outcomes.push(AssetOutcome::Empty);
                continue;
            }

            tracing::info!(
                step,
                state = ?DepositState::Swapping,
                mint = %allocation.mint,
                stablecoin_amount = allocation.stablecoin_amount,
                "swapping allocation"
            );
            match self.swap_allocation(signer, &addrs, stablecoin, allocation).await {
                Ok(settled) => {
                    tracing::info!(step, mint = %allocation.mint, signature = %settled.signature, "allocation settled");
                    outcomes.push(AssetOutcome::Settled(settled));
                }
                Err(err) if is_asset_failure(&err) => {
                    tracing::warn!(step, mint = %allocation.mint, error = %err, "allocation swap failed");
                    outcomes.push(AssetOutcome::from_failure(&err));
                    if ctx.config.swap_failure_policy == SwapFailurePolicy::AbortRemaining {
                        failure = Some(format!("aborted at {}: {}", allocation.mint, err));
                    }
                }
                Err(err) => {
                    tracing::error!(step, mint = %allocation.mint, error = %err, "deposit stopped");
                    return Err(err);
                }
            }
        }

        // Settling
        let settle_step = 4 + plan.allocations.len();
        tracing::info!(step = settle_step, state = ?DepositState::Settling, "reading landed balances");
        let mut allocations = Vec::with_capacity(plan.allocations.len());
        for (allocation, outcome) in plan.allocations.iter().zip(outcomes) {
            let landed = if outcome.may_have_landed() {
                ctx.reader
                    .balance_or_zero(&allocation.vault_account)
                    .await?
                    .saturating_sub(allocation.balance_before)
            } else {
                0
            };
            allocations.push(AllocationResult {
                mint: allocation.mint,
                stablecoin_amount: allocation.stablecoin_amount,
                outcome,
                landed,
            });
        }

        let state = if failure.is_some() {
            DepositState::Failed
        } else {
            DepositState::Confirmed
        };
        let receipt = DepositReceipt {
            vault: addrs.vault,
            vault_index: addrs.vault_index,
            state,
            amount: plan.entry_fee.gross,
            entry_fee: plan.entry_fee,
            share_price: plan.share_price,
            expected_shares: plan.expected_shares,
            funding_signature,
            allocations,
            residue: plan.residue,
            failure,
        };
        tracing::info!(
            step = settle_step + 1,
            state = ?receipt.state,
            skipped = receipt.skipped(),
            unconfirmed = receipt.unconfirmed(),
            "deposit finished"
        );
        Ok(receipt)
    }

    /// Plans and executes in one call.
    pub async fn deposit(
        &self,
        vault_index: u32,
        amount: u64,
        share_price: Option<u64>,
        signer: &Keypair,
    ) -> EngineResult<DepositReceipt> {
        let plan = self.plan(vault_index, amount, share_price).await?;
        self.execute(plan, signer).await
    }

    /// Releases the allocation's stablecoin from the vault to the signer and
    /// swaps it into the vault's asset account, in one transaction.
    async fn swap_allocation(
        &self,
        signer: &Keypair,
        addrs: &VaultAddresses,
        stablecoin: Address,
        allocation: &PlannedAllocation,
    ) -> EngineResult<super::SettledSwap> {
        let ctx = &self.ctx;
        let user = signer.pubkey();
        let (vault_account, create_vault_account) = ctx
            .ensure_token_account(&user, &addrs.vault, &allocation.mint)
            .await?;
        let user_stablecoin = ctx.reader.token_account_for(&user, &stablecoin).await?;
        let funding = vec![
            create_vault_account,
            transfer_vault_to_user(addrs, user, user_stablecoin, allocation.stablecoin_amount)?,
        ];
        let leg = SwapLeg {
            input_mint: stablecoin,
            output_mint: allocation.mint,
            amount: allocation.stablecoin_amount,
            destination: vault_account,
        };
        ctx.execute_swap(signer, &leg, funding).await
    }
}
