//! # Engine Configuration & Constants
//!
//! Every magic number the engine depends on lives here: fee limits mirrored
//! from the ledger program, PDA seed strings, well-known program ids, and the
//! timing knobs for quotes, prices, and retries.
//!
//! The seed strings and limits are part of the program's ABI. Changing them
//! here without redeploying the program produces addresses that do not exist
//! and fee checks that disagree with the chain.

use std::collections::HashMap;
use std::time::Duration;

use crate::ledger::Address;
use crate::retry::RetryPolicy;
use crate::swap::pool::{Venue, VenueKind};

// ---------------------------------------------------------------------------
// Fixed-Point Scales
// ---------------------------------------------------------------------------

/// 100% in basis points.
pub const MAX_BPS: u64 = 10_000;

/// Seconds in a (non-leap) year, used by the management-fee accrual.
pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 60 * 60;

/// USD amounts are 6-decimal fixed point, same as the stablecoin.
pub const USD_DECIMALS: u8 = 6;

/// `10^USD_DECIMALS`.
pub const USD_SCALE: u64 = 1_000_000;

// ---------------------------------------------------------------------------
// Program Fee Limits
// ---------------------------------------------------------------------------

/// Upper bound for entry and exit fees accepted by the program (10%).
pub const MAX_ENTRY_EXIT_FEE_BPS: u16 = 1_000;

/// Upper bound for the management fee range accepted by the program (20%).
pub const MAX_MANAGEMENT_FEE_BPS: u16 = 2_000;

/// Largest underlying-asset list the program can store.
pub const MAX_UNDERLYING_ASSETS: usize = 240;

// ---------------------------------------------------------------------------
// PDA Seeds
// ---------------------------------------------------------------------------

/// Factory singleton: `["factory_v2"]`.
pub const SEED_FACTORY: &[u8] = b"factory_v2";

/// Vault: `["vault", factory, index_le]`.
pub const SEED_VAULT: &[u8] = b"vault";

/// Vault share mint: `["vault_mint", vault]`.
pub const SEED_VAULT_MINT: &[u8] = b"vault_mint";

/// Vault stablecoin custody: `["vault_stablecoin_account", vault]`.
pub const SEED_VAULT_STABLECOIN: &[u8] = b"vault_stablecoin_account";

// ---------------------------------------------------------------------------
// Well-Known Programs & Mints
// ---------------------------------------------------------------------------

/// The deployed vault program.
pub const VAULT_PROGRAM_ID: &str = "5tAdLifeaGj3oUVVpr7gG5ntjW6c2Lg3sY2ftBCi8MkZ";

/// SPL Token.
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

/// SPL Token-2022.
pub const TOKEN_2022_PROGRAM_ID: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

/// Associated Token Account program.
pub const ASSOCIATED_TOKEN_PROGRAM_ID: &str = "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL";

/// System program.
pub const SYSTEM_PROGRAM_ID: &str = "11111111111111111111111111111111";

/// Address lookup table program (owner of every ALT account).
pub const ADDRESS_LOOKUP_TABLE_PROGRAM_ID: &str = "AddressLookupTab1e1111111111111111111111111";

/// USDC on mainnet. The default stablecoin leg of every flow.
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// Swap aggregator program. The vault's `deposit` account list carries it.
pub const AGGREGATOR_PROGRAM_ID: &str = "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4";

/// Constant-product AMM venue (Raydium CPMM).
pub const CPMM_PROGRAM_ID: &str = "CPMMoo8L3F4NbTegBCKVNunggL7H1ZpdTHKxQB5qKP1C";

/// Concentrated-liquidity venue (Raydium CLMM).
pub const CLMM_PROGRAM_ID: &str = "CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK";

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Default ledger JSON-RPC endpoint.
pub const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";

/// Default batched price endpoint.
pub const DEFAULT_PRICE_URL: &str = "https://lite-api.jup.ag/price/v3";

/// Default swap aggregator base URL (`/quote`, `/swap-instructions`).
pub const DEFAULT_SWAP_URL: &str = "https://lite-api.jup.ag/swap/v1";

// ---------------------------------------------------------------------------
// Timing & Limits
// ---------------------------------------------------------------------------

/// Slippage bound sent with every quote: 2%.
pub const DEFAULT_SLIPPAGE_BPS: u16 = 200;

/// Quotes older than this are re-fetched, never submitted.
pub const QUOTE_TTL: Duration = Duration::from_secs(8);

/// Cached prices are reused for this long.
pub const PRICE_CACHE_TTL: Duration = Duration::from_secs(30);

/// Per-request HTTP timeout for the price and swap services.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for a submitted transaction to reach `confirmed`.
pub const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Polling interval while waiting for confirmation.
pub const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Pool config indices probed per venue when no pool id is known.
pub const POOL_CONFIG_INDEX_SPACE: u16 = 8;

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// What a deposit does when one asset's swap cannot be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwapFailurePolicy {
    /// Log a warning, record the asset as skipped, continue with the rest.
    #[default]
    SkipAndWarn,
    /// Stop at the first failed asset. Swaps already settled stay settled.
    AbortRemaining,
}

/// Where swap instructions come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwapMode {
    /// Quote and build through the aggregation service.
    #[default]
    Aggregator,
    /// Swap directly against a resolved constant-product pool.
    DirectPool,
}

/// Tuning knobs for the engine.
///
/// Defaults target mainnet. Override individual fields for devnet or local
/// validators; the CLI maps its flags onto this struct.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Ledger JSON-RPC endpoint.
    pub rpc_url: String,
    /// Batched price endpoint.
    pub price_url: String,
    /// Swap aggregator base URL.
    pub swap_url: String,
    /// The vault program id.
    pub program_id: Address,
    /// The stablecoin every deposit starts from and every redemption ends in.
    pub stablecoin_mint: Address,
    /// Slippage bound for quotes and direct pool swaps.
    pub slippage_bps: u16,
    /// Maximum quote age before re-fetching.
    pub quote_ttl: Duration,
    /// Price cache lifetime.
    pub price_cache_ttl: Duration,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    /// Backoff policy for transient failures.
    pub retry: RetryPolicy,
    /// Deposit strictness when one asset fails.
    pub swap_failure_policy: SwapFailurePolicy,
    /// Aggregator or direct-pool swaps.
    pub swap_mode: SwapMode,
    /// Venues probed by the pool resolver, in priority order.
    pub venues: Vec<Venue>,
    /// Config indices probed per venue.
    pub pool_index_space: u16,
    /// Pool ids known in advance, keyed by the non-stablecoin mint. A known
    /// pool is matched by address and never probed.
    pub known_pools: HashMap<Address, Address>,
    /// Confirmation wait for submitted transactions.
    pub confirmation_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            price_url: DEFAULT_PRICE_URL.to_string(),
            swap_url: DEFAULT_SWAP_URL.to_string(),
            program_id: Address::from_static(VAULT_PROGRAM_ID),
            stablecoin_mint: Address::from_static(USDC_MINT),
            slippage_bps: DEFAULT_SLIPPAGE_BPS,
            quote_ttl: QUOTE_TTL,
            price_cache_ttl: PRICE_CACHE_TTL,
            http_timeout: HTTP_TIMEOUT,
            retry: RetryPolicy::default(),
            swap_failure_policy: SwapFailurePolicy::default(),
            swap_mode: SwapMode::default(),
            venues: default_venues(),
            pool_index_space: POOL_CONFIG_INDEX_SPACE,
            known_pools: HashMap::new(),
            confirmation_timeout: CONFIRMATION_TIMEOUT,
        }
    }
}

/// The venues probed when the caller does not supply its own list.
pub fn default_venues() -> Vec<Venue> {
    vec![
        Venue::new(
            "cpmm",
            Address::from_static(CPMM_PROGRAM_ID),
            VenueKind::ConstantProduct,
        ),
        Venue::new(
            "clmm",
            Address::from_static(CLMM_PROGRAM_ID),
            VenueKind::ConcentratedLiquidity,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_program_ids_parse() {
        for id in [
            VAULT_PROGRAM_ID,
            TOKEN_PROGRAM_ID,
            TOKEN_2022_PROGRAM_ID,
            ASSOCIATED_TOKEN_PROGRAM_ID,
            SYSTEM_PROGRAM_ID,
            ADDRESS_LOOKUP_TABLE_PROGRAM_ID,
            USDC_MINT,
            AGGREGATOR_PROGRAM_ID,
            CPMM_PROGRAM_ID,
            CLMM_PROGRAM_ID,
        ] {
            assert!(id.parse::<Address>().is_ok(), "{} should parse", id);
        }
    }

    #[test]
    fn quote_ttl_within_freshness_window() {
        assert!(QUOTE_TTL >= Duration::from_secs(5));
        assert!(QUOTE_TTL <= Duration::from_secs(10));
    }

    #[test]
    fn fee_limits_sanity() {
        assert!(u64::from(MAX_ENTRY_EXIT_FEE_BPS) < MAX_BPS);
        assert!(u64::from(MAX_MANAGEMENT_FEE_BPS) < MAX_BPS);
        assert_eq!(USD_SCALE, 10u64.pow(USD_DECIMALS as u32));
    }

    #[test]
    fn default_config_uses_skip_and_aggregator() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.swap_failure_policy, SwapFailurePolicy::SkipAndWarn);
        assert_eq!(cfg.swap_mode, SwapMode::Aggregator);
        assert_eq!(cfg.slippage_bps, 200);
        assert_eq!(cfg.venues.len(), 2);
    }
}
