//! # CLI Interface
//!
//! `vault-keeper <op> <vault_index> [amount] [share_price]`. Connection and
//! tuning flags are global and fall back to `VAULT_*` environment variables.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use vault_engine::config::{
    SwapFailurePolicy, SwapMode, DEFAULT_PRICE_URL, DEFAULT_RPC_URL, DEFAULT_SLIPPAGE_BPS,
    DEFAULT_SWAP_URL, USDC_MINT, VAULT_PROGRAM_ID,
};
use vault_engine::Address;

use crate::logging::LogFormat;

/// Operator CLI for multi-asset vaults.
///
/// Deposits, redemptions, fee distribution and admin operations against the
/// vault program. Prints a JSON receipt on stdout; logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "vault-keeper", version, propagate_version = true)]
pub struct KeeperCli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Ledger JSON-RPC endpoint.
    #[arg(long, global = true, env = "VAULT_RPC_URL", default_value = DEFAULT_RPC_URL)]
    pub rpc_url: String,

    /// Batched USD price endpoint.
    #[arg(long, global = true, env = "VAULT_PRICE_URL", default_value = DEFAULT_PRICE_URL)]
    pub price_url: String,

    /// Swap aggregator base URL.
    #[arg(long, global = true, env = "VAULT_SWAP_URL", default_value = DEFAULT_SWAP_URL)]
    pub swap_url: String,

    /// Vault program id.
    #[arg(long, global = true, env = "VAULT_PROGRAM_ID", default_value = VAULT_PROGRAM_ID)]
    pub program_id: Address,

    /// Stablecoin mint deposits start from and redemptions end in.
    #[arg(long, global = true, env = "VAULT_STABLECOIN_MINT", default_value = USDC_MINT)]
    pub stablecoin_mint: Address,

    /// Signing keypair (JSON array of 64 bytes).
    #[arg(long, short = 'k', global = true, env = "VAULT_KEYPAIR")]
    pub keypair: Option<PathBuf>,

    /// Slippage bound for swaps, in basis points.
    #[arg(long, global = true, env = "VAULT_SLIPPAGE_BPS", default_value_t = DEFAULT_SLIPPAGE_BPS)]
    pub slippage_bps: u16,

    /// Where swap instructions come from.
    #[arg(long, global = true, env = "VAULT_SWAP_MODE", value_enum, default_value_t = SwapModeArg::Aggregator)]
    pub swap_mode: SwapModeArg,

    /// Known pool for a mint, as `MINT=POOL`. Repeatable. Known pools are
    /// used without probing.
    #[arg(long = "pool", global = true, value_parser = parse_pool)]
    pub pools: Vec<(Address, Address)>,

    /// Stop a deposit at the first asset whose swap fails.
    #[arg(long, global = true, env = "VAULT_STRICT")]
    pub strict: bool,

    /// Log output format.
    #[arg(long, global = true, env = "VAULT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SwapModeArg {
    Aggregator,
    DirectPool,
}

impl From<SwapModeArg> for SwapMode {
    fn from(arg: SwapModeArg) -> Self {
        match arg {
            SwapModeArg::Aggregator => SwapMode::Aggregator,
            SwapModeArg::DirectPool => SwapMode::DirectPool,
        }
    }
}

impl GlobalArgs {
    pub fn failure_policy(&self) -> SwapFailurePolicy {
        if self.strict {
            SwapFailurePolicy::AbortRemaining
        } else {
            SwapFailurePolicy::SkipAndWarn
        }
    }
}

/// Operations.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deposit stablecoin and swap it into the vault's allocation.
    Deposit(AmountArgs),
    /// Redeem shares for stablecoin.
    Redeem(AmountArgs),
    /// Mint accrued management fees as shares (any signer).
    DistributeFees(VaultArgs),
    /// Mint accrued management fees as shares (vault creator only).
    ClaimFee(VaultArgs),
    /// Book management fees earned since the last accrual.
    AccrueFees(VaultArgs),
    /// Pay accrued management fees out of stablecoin custody.
    CollectFees(VaultArgs),
    /// Pause a vault.
    Pause(VaultArgs),
    /// Resume a paused vault.
    Resume(VaultArgs),
    /// Print the vault's GAV, NAV and accrued fees. Sends nothing.
    Valuate(VaultArgs),
    /// Print the vault's fee schedule. Sends nothing.
    VaultFees(VaultArgs),
    /// Print a holder's shares and the vault's book. Sends nothing.
    Position(PositionArgs),
    /// Replace the factory fee schedule.
    UpdateFees(FeeArgs),
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Deposit(_) => "deposit",
            Commands::Redeem(_) => "redeem",
            Commands::DistributeFees(_) => "distribute-fees",
            Commands::ClaimFee(_) => "claim-fee",
            Commands::AccrueFees(_) => "accrue-fees",
            Commands::CollectFees(_) => "collect-fees",
            Commands::VaultFees(_) => "vault-fees",
            Commands::Position(_) => "position",
            Commands::Pause(_) => "pause",
            Commands::Resume(_) => "resume",
            Commands::Valuate(_) => "valuate",
            Commands::UpdateFees(_) => "update-fees",
        }
    }
}

#[derive(Args, Debug)]
pub struct VaultArgs {
    pub vault_index: u32,
}

#[derive(Args, Debug)]
pub struct PositionArgs {
    pub vault_index: u32,

    /// Share holder. Defaults to the keypair's address.
    #[arg(long)]
    pub owner: Option<Address>,
}

#[derive(Args, Debug)]
pub struct AmountArgs {
    pub vault_index: u32,

    /// Raw amount: stablecoin for deposits, shares for redemptions.
    pub amount: u64,

    /// Share price in 6-decimal USD. Defaults to the current NAV per share.
    pub share_price: Option<u64>,
}

#[derive(Args, Debug)]
pub struct FeeArgs {
    #[arg(long)]
    pub entry_fee_bps: u16,
    #[arg(long)]
    pub exit_fee_bps: u16,
    /// Vault creation fee in raw stablecoin.
    #[arg(long)]
    pub vault_creation_fee: u64,
    #[arg(long)]
    pub min_management_fee_bps: u16,
    #[arg(long)]
    pub max_management_fee_bps: u16,
    #[arg(long)]
    pub creator_fee_ratio_bps: u16,
    #[arg(long)]
    pub platform_fee_ratio_bps: u16,
}

fn parse_pool(raw: &str) -> Result<(Address, Address), String> {
    let (mint, pool) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected MINT=POOL, got {:?}", raw))?;
    let mint = mint.trim().parse().map_err(|e| format!("mint: {}", e))?;
    let pool = pool.trim().parse().map_err(|e| format!("pool: {}", e))?;
    Ok((mint, pool))
}
