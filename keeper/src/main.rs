// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Vault Keeper
//!
//! Entry point for the `vault-keeper` binary. Parses the command line,
//! wires the engine to the configured endpoints, runs one operation and
//! prints its receipt as JSON on stdout.
//!
//! Exit status is non-zero when the operation fails, including a strict
//! deposit that stopped at a failed asset.

mod cli;
mod logging;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use vault_engine::config::EngineConfig;
use vault_engine::ledger::instruction::FactoryFeeParams;
use vault_engine::ledger::Keypair;
use vault_engine::orchestrator::{
    AdminOrchestrator, DepositOrchestrator, DepositState, EngineContext, FeeDistributionEngine,
    RedeemOrchestrator,
};
use vault_engine::valuation::format_usd;

use cli::{Commands, GlobalArgs, KeeperCli};

/// What goes to stdout.
#[derive(Serialize)]
struct RunReport {
    run_id: Uuid,
    operation: &'static str,
    finished_at: chrono::DateTime<chrono::Utc>,
    receipt: serde_json::Value,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = KeeperCli::parse();
    logging::init_logging(logging::DEFAULT_DIRECTIVE, cli.global.log_format);

    let run_id = Uuid::new_v4();
    let operation = cli.command.name();
    let span = tracing::info_span!("run", %run_id, operation);

    let result = execute(cli).instrument(span).await;
    let (receipt, failed) = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(%run_id, operation, error = %format!("{:#}", e), "operation failed");
            return Err(e);
        }
    };

    let report = RunReport {
        run_id,
        operation,
        finished_at: chrono::Utc::now(),
        receipt,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to render receipt")?
    );

    if failed {
        bail!("{} did not complete, see receipt for the failed asset", operation);
    }
    Ok(())
}

/// Runs the selected operation. Returns the receipt and whether it records
/// a failure the operator must act on.
async fn execute(cli: KeeperCli) -> Result<(serde_json::Value, bool)> {
    let config = engine_config(&cli.global);
    tracing::info!(
        rpc_url = %config.rpc_url,
        program_id = %config.program_id,
        swap_mode = ?config.swap_mode,
        policy = ?config.swap_failure_policy,
        "connecting"
    );
    let ctx = Arc::new(EngineContext::connect(config).context("failed to set up engine")?);

    match cli.command {
        Commands::Valuate(args) => {
            let valuation = ctx
                .valuation
                .valuate(args.vault_index)
                .await
                .with_context(|| format!("valuation of vault {} failed", args.vault_index))?;
            tracing::info!(
                gav = %format_usd(valuation.gav),
                nav = %format_usd(valuation.nav),
                nav_per_token = %format_usd(valuation.nav_per_token),
                accrued_fees = %format_usd(valuation.accrued_fees_usd),
                fully_priced = valuation.is_fully_priced(),
                "vault valued"
            );
            Ok((serde_json::to_value(valuation)?, false))
        }
        Commands::Deposit(args) => {
            let signer = load_signer(cli.global.keypair.as_deref())?;
            let receipt = DepositOrchestrator::new(ctx)
                .deposit(args.vault_index, args.amount, args.share_price, &signer)
                .await
                .with_context(|| format!("deposit into vault {} failed", args.vault_index))?;
            let failed = receipt.state == DepositState::Failed;
            Ok((serde_json::to_value(receipt)?, failed))
        }
        Commands::Redeem(args) => {
            let signer = load_signer(cli.global.keypair.as_deref())?;
            let receipt = RedeemOrchestrator::new(ctx)
                .redeem(args.vault_index, args.amount, args.share_price, &signer)
                .await
                .with_context(|| format!("redemption from vault {} failed", args.vault_index))?;
            Ok((serde_json::to_value(receipt)?, false))
        }
        Commands::DistributeFees(args) => {
            let signer = load_signer(cli.global.keypair.as_deref())?;
            let outcome = FeeDistributionEngine::new(ctx)
                .distribute(args.vault_index, &signer)
                .await
                .with_context(|| format!("fee distribution for vault {} failed", args.vault_index))?;
            Ok((serde_json::to_value(outcome)?, false))
        }
        Commands::ClaimFee(args) => {
            let signer = load_signer(cli.global.keypair.as_deref())?;
            let outcome = FeeDistributionEngine::new(ctx)
                .claim(args.vault_index, &signer)
                .await
                .with_context(|| format!("fee claim for vault {} failed", args.vault_index))?;
            Ok((serde_json::to_value(outcome)?, false))
        }
        Commands::AccrueFees(args) => {
            let signer = load_signer(cli.global.keypair.as_deref())?;
            let outcome = FeeDistributionEngine::new(ctx)
                .accrue(args.vault_index, &signer)
                .await
                .with_context(|| format!("fee accrual for vault {} failed", args.vault_index))?;
            Ok((serde_json::to_value(outcome)?, false))
        }
        Commands::CollectFees(args) => {
            let signer = load_signer(cli.global.keypair.as_deref())?;
            let outcome = FeeDistributionEngine::new(ctx)
                .collect(args.vault_index, &signer)
                .await
                .with_context(|| format!("fee collection for vault {} failed", args.vault_index))?;
            Ok((serde_json::to_value(outcome)?, false))
        }
        Commands::VaultFees(args) => {
            let fees = ctx
                .reader
                .vault_fees(args.vault_index)
                .await
                .with_context(|| format!("reading fees of vault {} failed", args.vault_index))?;
            Ok((serde_json::to_value(fees)?, false))
        }
        Commands::Position(args) => {
            let owner = match args.owner {
                Some(owner) => owner,
                None => load_signer(cli.global.keypair.as_deref())?.pubkey(),
            };
            let details = ctx
                .reader
                .deposit_details(args.vault_index, &owner)
                .await
                .with_context(|| format!("reading position in vault {} failed", args.vault_index))?;
            Ok((serde_json::to_value(details)?, false))
        }
        Commands::Pause(args) => set_paused(ctx, &cli.global, args.vault_index, true).await,
        Commands::Resume(args) => set_paused(ctx, &cli.global, args.vault_index, false).await,
        Commands::UpdateFees(args) => {
            let signer = load_signer(cli.global.keypair.as_deref())?;
            let params = FactoryFeeParams {
                entry_fee_bps: args.entry_fee_bps,
                exit_fee_bps: args.exit_fee_bps,
                vault_creation_fee_usdc: args.vault_creation_fee,
                min_management_fee_bps: args.min_management_fee_bps,
                max_management_fee_bps: args.max_management_fee_bps,
                vault_creator_fee_ratio_bps: args.creator_fee_ratio_bps,
                platform_fee_ratio_bps: args.platform_fee_ratio_bps,
            };
            let receipt = AdminOrchestrator::new(ctx)
                .update_factory_fees(params, &signer)
                .await
                .context("factory fee update failed")?;
            Ok((serde_json::to_value(receipt)?, false))
        }
    }
}

async fn set_paused(
    ctx: Arc<EngineContext>,
    global: &GlobalArgs,
    vault_index: u32,
    paused: bool,
) -> Result<(serde_json::Value, bool)> {
    let signer = load_signer(global.keypair.as_deref())?;
    let receipt = AdminOrchestrator::new(ctx)
        .set_paused(vault_index, paused, &signer)
        .await
        .with_context(|| format!("state change of vault {} failed", vault_index))?;
    Ok((serde_json::to_value(receipt)?, false))
}

/// Maps the command line onto the engine's configuration.
fn engine_config(global: &GlobalArgs) -> EngineConfig {
    EngineConfig {
        rpc_url: global.rpc_url.clone(),
        price_url: global.price_url.clone(),
        swap_url: global.swap_url.clone(),
        program_id: global.program_id,
        stablecoin_mint: global.stablecoin_mint,
        slippage_bps: global.slippage_bps,
        swap_failure_policy: global.failure_policy(),
        swap_mode: global.swap_mode.into(),
        known_pools: global.pools.iter().copied().collect(),
        ..EngineConfig::default()
    }
}

fn load_signer(path: Option<&Path>) -> Result<Keypair> {
    let path = path.context("this operation signs transactions: pass --keypair or set VAULT_KEYPAIR")?;
    let keypair = Keypair::read_from_file(path)
        .with_context(|| format!("failed to load keypair from {}", path.display()))?;
    tracing::info!(signer = %keypair.pubkey(), "signer loaded");
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn keypair_file_round_trips() {
        let keypair = Keypair::from_seed(&[5u8; 32]);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let bytes: Vec<u8> = keypair.to_keypair_bytes().to_vec();
        write!(file, "{}", serde_json::to_string(&bytes).unwrap()).unwrap();

        let loaded = load_signer(Some(file.path())).unwrap();
        assert_eq!(loaded.pubkey(), keypair.pubkey());
    }

    #[test]
    fn signing_without_a_keypair_is_an_error() {
        let err = load_signer(None).unwrap_err();
        assert!(err.to_string().contains("--keypair"));
    }

    #[test]
    fn flags_reach_the_engine_config() {
        let cli = KeeperCli::try_parse_from([
            "vault-keeper",
            "--slippage-bps",
            "75",
            "--strict",
            "pause",
            "4",
        ])
        .unwrap();
        let config = engine_config(&cli.global);
        assert_eq!(config.slippage_bps, 75);
        assert_eq!(
            config.swap_failure_policy,
            vault_engine::config::SwapFailurePolicy::AbortRemaining
        );
        assert!(config.known_pools.is_empty());
    }
}
