//! # Orchestrators
//!
//! The flows that change vault state: deposit, redeem, fee distribution and
//! the admin operations. Each one reads, prices, plans, then proposes
//! transactions to the ledger program one at a time, awaiting confirmation
//! before the next step. Nothing runs in parallel inside a flow.
//!
//! ```text
//! deposit.rs  : stablecoin in, swapped into the target allocation
//! redeem.rs   : pro-rata unwind to stablecoin, liquidity downscaling, finalize
//! fees.rs     : management fees minted as shares to creator and platform
//! admin.rs    : pause/resume, factory fee updates
//! ```
//!
//! [`EngineContext`] wires the leaf components together once and is shared
//! by every orchestrator.

pub mod admin;
pub mod deposit;
pub mod fees;
pub mod redeem;

use std::sync::Arc;

use serde::Serialize;

use crate::config::{EngineConfig, SwapMode};
use crate::error::{EngineError, EngineResult};
use crate::ledger::instruction::create_associated_token_account_idempotent;
use crate::ledger::reader::VaultAccountReader;
use crate::ledger::{Address, Instruction, Keypair, LedgerClient, RpcLedgerClient};
use crate::oracle::{HttpPriceFeed, PriceFeed, PriceOracle};
use crate::swap::pool::{build_pool_swap, PoolSwapAccounts};
use crate::swap::{HttpSwapAggregator, SwapAggregator, SwapPoolResolver, SwapQuoteClient};
use crate::valuation::ValuationEngine;

pub use admin::{AdminAction, AdminOrchestrator, AdminReceipt};
pub use deposit::{DepositOrchestrator, DepositPlan, DepositReceipt, DepositState};
pub use fees::{FeeDistribution, FeeDistributionEngine};
pub use redeem::{RedeemOrchestrator, RedeemPlan, RedeemReceipt, RedeemState};

/// Build attempts for one aggregator swap before an expiring quote is
/// given up on.
const QUOTE_ATTEMPTS: u32 = 2;

/// Everything a flow needs, built once per process.
pub struct EngineContext {
    pub config: EngineConfig,
    pub ledger: Arc<dyn LedgerClient>,
    pub reader: Arc<VaultAccountReader>,
    pub valuation: Arc<ValuationEngine>,
    pub quotes: Arc<SwapQuoteClient>,
    pub pools: Arc<SwapPoolResolver>,
}

impl EngineContext {
    /// Wires the engine around caller-supplied I/O.
    pub fn new(
        config: EngineConfig,
        ledger: Arc<dyn LedgerClient>,
        feed: Arc<dyn PriceFeed>,
        aggregator: Arc<dyn SwapAggregator>,
    ) -> Self {
        let reader = Arc::new(VaultAccountReader::new(
            ledger.clone(),
            config.program_id,
            config.stablecoin_mint,
        ));
        let oracle = Arc::new(PriceOracle::new(
            feed,
            ledger.clone(),
            config.stablecoin_mint,
            config.retry,
            config.price_cache_ttl,
        ));
        let valuation = Arc::new(ValuationEngine::new(reader.clone(), oracle));
        let quotes = Arc::new(SwapQuoteClient::new(
            aggregator,
            config.slippage_bps,
            config.quote_ttl,
            config.retry,
        ));
        let pools = Arc::new(SwapPoolResolver::new(
            ledger.clone(),
            config.venues.clone(),
            config.pool_index_space,
        ));
        Self {
            config,
            ledger,
            reader,
            valuation,
            quotes,
            pools,
        }
    }

    /// Wires the engine to the configured RPC node, price feed and
    /// aggregator.
    pub fn connect(config: EngineConfig) -> EngineResult<Self> {
        let ledger = Arc::new(RpcLedgerClient::new(
            config.rpc_url.clone(),
            config.http_timeout,
            config.retry,
            config.confirmation_timeout,
        )?);
        let feed = Arc::new(HttpPriceFeed::new(config.price_url.clone(), config.http_timeout)?);
        let aggregator = Arc::new(HttpSwapAggregator::new(
            config.swap_url.clone(),
            config.http_timeout,
        )?);
        Ok(Self::new(config, ledger, feed, aggregator))
    }

    /// `owner`'s token account for `mint`, plus an instruction creating it
    /// if it does not exist yet.
    pub(crate) async fn ensure_token_account(
        &self,
        payer: &Address,
        owner: &Address,
        mint: &Address,
    ) -> EngineResult<(Address, Instruction)> {
        let account = self.reader.token_account_for(owner, mint).await?;
        let program = self.reader.token_program(mint).await?;
        Ok((
            account,
            create_associated_token_account_idempotent(*payer, account, *owner, *mint, program.id()),
        ))
    }

    /// Swaps `leg.amount` of `leg.input_mint` into `leg.destination` in one
    /// transaction, preceded by `funding`.
    pub(crate) async fn execute_swap(
        &self,
        signer: &Keypair,
        leg: &SwapLeg,
        funding: Vec<Instruction>,
    ) -> EngineResult<SettledSwap> {
        match self.config.swap_mode {
            SwapMode::Aggregator => self.swap_via_aggregator(signer, leg, funding).await,
            SwapMode::DirectPool => self.swap_via_pool(signer, leg, funding).await,
        }
    }

    async fn swap_via_aggregator(
        &self,
        signer: &Keypair,
        leg: &SwapLeg,
        funding: Vec<Instruction>,
    ) -> EngineResult<SettledSwap> {
        let payer = signer.pubkey();
        let mut route = self
            .quotes
            .quote(&leg.input_mint, &leg.output_mint, leg.amount)
            .await?;

        let mut attempt = 1;
        let instructions = loop {
            route = self.quotes.refresh(route).await?;
            match self
                .quotes
                .build_instructions(&route, &payer, &leg.destination)
                .await
            {
                Err(EngineError::QuoteExpired { .. }) if attempt < QUOTE_ATTEMPTS => attempt += 1,
                result => break result?,
            }
        };
        self.quotes.ensure_fresh(&route)?;

        let lookup_tables = instructions.lookup_tables.clone();
        let signature = self
            .ledger
            .submit(signer, instructions.assemble(funding), lookup_tables)
            .await?;
        Ok(SettledSwap {
            signature,
            venue: "aggregator".to_string(),
            expected_out: route.out_amount,
            min_out: route.min_out_amount,
            price_impact_pct: Some(route.price_impact_pct),
        })
    }

    async fn swap_via_pool(
        &self,
        signer: &Keypair,
        leg: &SwapLeg,
        funding: Vec<Instruction>,
    ) -> EngineResult<SettledSwap> {
        let payer = signer.pubkey();
        let known = self
            .config
            .known_pools
            .get(&leg.input_mint)
            .or_else(|| self.config.known_pools.get(&leg.output_mint));
        let pool = self
            .pools
            .resolve(&leg.input_mint, &leg.output_mint, known)
            .await?;
        let (expected_out, min_out) = self
            .pools
            .quote_direct(&pool, &leg.input_mint, leg.amount, self.config.slippage_bps)
            .await?;

        let accounts = PoolSwapAccounts {
            payer,
            input_account: self.reader.token_account_for(&payer, &leg.input_mint).await?,
            output_account: leg.destination,
            input_mint: leg.input_mint,
            output_mint: leg.output_mint,
            input_token_program: self.reader.token_program(&leg.input_mint).await?.id(),
            output_token_program: self.reader.token_program(&leg.output_mint).await?.id(),
        };
        let mut instructions = funding;
        instructions.push(build_pool_swap(&pool, &accounts, leg.amount, min_out)?);

        let signature = self.ledger.submit(signer, instructions, Vec::new()).await?;
        Ok(SettledSwap {
            signature,
            venue: pool.venue,
            expected_out,
            min_out,
            price_impact_pct: None,
        })
    }
}

/// One swap a flow wants to make.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SwapLeg {
    pub input_mint: Address,
    pub output_mint: Address,
    pub amount: u64,
    pub destination: Address,
}

/// A swap the ledger confirmed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettledSwap {
    pub signature: String,
    /// `aggregator`, or the name of the pool venue.
    pub venue: String,
    pub expected_out: u64,
    pub min_out: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_impact_pct: Option<f64>,
}

/// What happened to one asset in a multi-asset flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssetOutcome {
    /// Swapped and confirmed.
    Settled(SettledSwap),
    /// The asset is the stablecoin itself; nothing to swap.
    Retained,
    /// Nothing to move for this asset.
    Empty,
    /// The swap failed and the asset was skipped.
    Skipped { reason: String },
    /// The swap was sent but its confirmation timed out. It may have landed;
    /// the balance read back afterwards says whether it did.
    Unconfirmed { signature: String, reason: String },
    /// An earlier failure stopped the flow before this asset.
    NotAttempted,
}

impl AssetOutcome {
    pub fn is_settled(&self) -> bool {
        matches!(self, AssetOutcome::Settled(_))
    }

    /// Settled, or sent without a confirmation either way.
    pub fn may_have_landed(&self) -> bool {
        matches!(self, AssetOutcome::Settled(_) | AssetOutcome::Unconfirmed { .. })
    }

    /// Maps a swap error that [`is_asset_failure`] accepts onto an outcome.
    pub(crate) fn from_failure(err: &EngineError) -> Self {
        match err {
            EngineError::Unconfirmed { signature, .. } => AssetOutcome::Unconfirmed {
                signature: signature.clone(),
                reason: err.to_string(),
            },
            _ => AssetOutcome::Skipped {
                reason: err.to_string(),
            },
        }
    }
}

/// Whether a swap-step error is scoped to the asset. Invariant and decoding
/// failures mean the flow itself is wrong and must stop.
pub(crate) fn is_asset_failure(err: &EngineError) -> bool {
    err.is_per_asset()
        || matches!(
            err,
            EngineError::LedgerRejection { .. } | EngineError::Unconfirmed { .. }
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_are_asset_scoped_but_invariants_are_not() {
        assert!(is_asset_failure(&EngineError::LedgerRejection {
            message: "slippage tolerance exceeded".into(),
            logs: vec![],
        }));
        assert!(is_asset_failure(&EngineError::transient("quote", "timeout")));
        assert!(!is_asset_failure(&EngineError::invariant("bps > 10000")));
        assert!(!is_asset_failure(&EngineError::Config("bad key".into())));
    }

    #[test]
    fn timed_out_swap_is_kept_apart_from_a_skip() {
        let outcome = AssetOutcome::from_failure(&EngineError::Unconfirmed {
            signature: "3sig".into(),
            waited_ms: 60_000,
        });
        assert!(matches!(&outcome, AssetOutcome::Unconfirmed { signature, .. } if signature == "3sig"));
        assert!(outcome.may_have_landed());
        assert!(!outcome.is_settled());

        let skipped = AssetOutcome::from_failure(&EngineError::transient("quote", "503"));
        assert!(matches!(skipped, AssetOutcome::Skipped { .. }));
        assert!(!skipped.may_have_landed());
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(AssetOutcome::Skipped {
            reason: "no pool".into(),
        })
        .unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "no pool");
    }
}
