//! # Administrative Operations
//!
//! Pausing and resuming a vault, and updating the factory's fee schedule.
//! Fee parameters are checked against the program's limits before anything
//! is signed, so an obviously bad update never costs a transaction.

use std::sync::Arc;

use serde::Serialize;

use super::EngineContext;
use crate::config::{MAX_BPS, MAX_ENTRY_EXIT_FEE_BPS, MAX_MANAGEMENT_FEE_BPS};
use crate::error::{EngineError, EngineResult};
use crate::ledger::accounts::VaultState;
use crate::ledger::instruction::{set_vault_paused, update_factory_fees, FactoryFeeParams};
use crate::ledger::pda::factory_address;
use crate::ledger::{Address, Keypair};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    Pause,
    Resume,
    UpdateFactoryFees,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminReceipt {
    pub action: AdminAction,
    pub target: Address,
    /// `None` when the target was already in the requested state.
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fees: Option<FactoryFeeParams>,
}

/// Checks fee parameters against the limits the program enforces.
pub fn validate_fee_params(params: &FactoryFeeParams) -> EngineResult<()> {
    let fail = |msg: String| Err(EngineError::invariant(msg));
    if params.entry_fee_bps > MAX_ENTRY_EXIT_FEE_BPS {
        return fail(format!("entry fee {} bps above {}", params.entry_fee_bps, MAX_ENTRY_EXIT_FEE_BPS));
    }
    if params.exit_fee_bps > MAX_ENTRY_EXIT_FEE_BPS {
        return fail(format!("exit fee {} bps above {}", params.exit_fee_bps, MAX_ENTRY_EXIT_FEE_BPS));
    }
    if params.min_management_fee_bps > params.max_management_fee_bps {
        return fail(format!(
            "management fee range inverted: {} > {}",
            params.min_management_fee_bps, params.max_management_fee_bps
        ));
    }
    if params.max_management_fee_bps > MAX_MANAGEMENT_FEE_BPS {
        return fail(format!(
            "max management fee {} bps above {}",
            params.max_management_fee_bps, MAX_MANAGEMENT_FEE_BPS
        ));
    }
    if params.vault_creator_fee_ratio_bps == 0 || params.platform_fee_ratio_bps == 0 {
        return fail("creator and platform fee ratios must both be positive".to_string());
    }
    let ratio_sum =
        u64::from(params.vault_creator_fee_ratio_bps) + u64::from(params.platform_fee_ratio_bps);
    if ratio_sum != MAX_BPS {
        return fail(format!("fee ratios sum to {}, expected {}", ratio_sum, MAX_BPS));
    }
    Ok(())
}

pub struct AdminOrchestrator {
    ctx: Arc<EngineContext>,
}

impl AdminOrchestrator {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Pauses (`paused = true`) or resumes a vault. A vault already in the
    /// requested state is left alone.
    pub async fn set_paused(&self, vault_index: u32, paused: bool, signer: &Keypair) -> EngineResult<AdminReceipt> {
        let ctx = &self.ctx;
        let action = if paused { AdminAction::Pause } else { AdminAction::Resume };
        let addrs = ctx.reader.addresses(vault_index)?;
        let vault = ctx.reader.vault(&addrs).await?;

        let target_state = if paused { VaultState::Paused } else { VaultState::Active };
        if vault.state == VaultState::Closed {
            return Err(EngineError::VaultNotActive {
                vault: addrs.vault,
                state: format!("{:?}", vault.state),
            });
        }
        if vault.state == target_state {
            tracing::info!(vault = %addrs.vault, ?action, "vault already in requested state");
            return Ok(AdminReceipt {
                action,
                target: addrs.vault,
                signature: None,
                fees: None,
            });
        }

        let ix = set_vault_paused(&addrs, signer.pubkey(), paused)?;
        let signature = ctx.ledger.submit(signer, vec![ix], Vec::new()).await?;
        tracing::info!(vault = %addrs.vault, ?action, %signature, "vault state updated");
        Ok(AdminReceipt {
            action,
            target: addrs.vault,
            signature: Some(signature),
            fees: None,
        })
    }

    /// Replaces the factory's fee schedule.
    pub async fn update_factory_fees(
        &self,
        params: FactoryFeeParams,
        signer: &Keypair,
    ) -> EngineResult<AdminReceipt> {
        validate_fee_params(&params)?;
        let ctx = &self.ctx;
        let factory = factory_address(&ctx.config.program_id)?;
        let ix = update_factory_fees(ctx.config.program_id, factory, signer.pubkey(), &params)?;
        let signature = ctx.ledger.submit(signer, vec![ix], Vec::new()).await?;
        tracing::info!(%factory, %signature, ?params, "factory fees updated");
        Ok(AdminReceipt {
            action: AdminAction::UpdateFactoryFees,
            target: factory,
            signature: Some(signature),
            fees: Some(params),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> FactoryFeeParams {
        FactoryFeeParams {
            entry_fee_bps: 25,
            exit_fee_bps: 25,
            vault_creation_fee_usdc: 10_000_000,
            min_management_fee_bps: 50,
            max_management_fee_bps: 300,
            vault_creator_fee_ratio_bps: 7_000,
            platform_fee_ratio_bps: 3_000,
        }
    }

    #[test]
    fn sane_schedule_passes() {
        validate_fee_params(&params()).unwrap();
    }

    #[test]
    fn limits_are_enforced() {
        let cases = [
            FactoryFeeParams { entry_fee_bps: 1_001, ..params() },
            FactoryFeeParams { exit_fee_bps: 5_000, ..params() },
            FactoryFeeParams { min_management_fee_bps: 400, ..params() },
            FactoryFeeParams { max_management_fee_bps: 2_001, ..params() },
            FactoryFeeParams { vault_creator_fee_ratio_bps: 6_000, ..params() },
            FactoryFeeParams {
                vault_creator_fee_ratio_bps: 10_000,
                platform_fee_ratio_bps: 0,
                ..params()
            },
        ];
        for case in cases {
            assert!(
                matches!(validate_fee_params(&case), Err(EngineError::InvariantViolation(_))),
                "{:?} should be rejected",
                case
            );
        }
    }

    #[test]
    fn boundaries_are_inclusive() {
        validate_fee_params(&FactoryFeeParams {
            entry_fee_bps: 1_000,
            exit_fee_bps: 1_000,
            min_management_fee_bps: 2_000,
            max_management_fee_bps: 2_000,
            ..params()
        })
        .unwrap();
    }
}
