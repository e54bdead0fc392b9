//! # Pool Discovery
//!
//! Finds the liquidity pool for a token pair on a set of AMM venues without
//! any index service: every pool address is a PDA of the venue program, so
//! we derive candidates and ask the ledger which one exists.
//!
//! ```text
//! amm_config   = PDA(venue, ["amm_config", index_be16])
//! pool         = PDA(venue, ["pool", amm_config, mint_0, mint_1])
//! pool_vault   = PDA(venue, ["pool_vault", pool, mint])
//! observation  = PDA(venue, ["observation", pool])
//! authority    = PDA(venue, ["vault_and_lp_mint_auth_seed"])   constant product
//!              = pool                                          concentrated liquidity
//! ```
//!
//! Candidate generation ([`pool_candidates`]) is pure. The resolver walks it
//! in (venue, config index, ordering) order and stops at the first pool that
//! exists. With a known pool id it only compares addresses and never probes.
//! Dependent accounts are derived once the pool is pinned down.

use std::sync::Arc;

use borsh::BorshSerialize;
use dashmap::DashMap;
use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::ledger::pda::find_program_address;
use crate::ledger::{AccountMeta, Address, Instruction, LedgerClient};
use crate::math::{bps_of, mul_div_wide};

pub const SEED_AMM_CONFIG: &[u8] = b"amm_config";
pub const SEED_POOL: &[u8] = b"pool";
pub const SEED_POOL_VAULT: &[u8] = b"pool_vault";
pub const SEED_OBSERVATION: &[u8] = b"observation";
pub const SEED_CPMM_AUTHORITY: &[u8] = b"vault_and_lp_mint_auth_seed";

// ---------------------------------------------------------------------------
// Venues
// ---------------------------------------------------------------------------

/// Pool model of a venue. Determines the authority derivation and whether
/// direct swaps are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueKind {
    ConstantProduct,
    ConcentratedLiquidity,
}

/// An AMM program the resolver may search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Venue {
    pub name: String,
    pub program_id: Address,
    pub kind: VenueKind,
}

impl Venue {
    pub fn new(name: &str, program_id: Address, kind: VenueKind) -> Self {
        Self {
            name: name.to_string(),
            program_id,
            kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

pub fn amm_config_address(venue: &Address, index: u16) -> Option<Address> {
    find_program_address(&[SEED_AMM_CONFIG, &index.to_be_bytes()], venue).map(|(a, _)| a)
}

pub fn pool_address(venue: &Address, config: &Address, mint_0: &Address, mint_1: &Address) -> Option<Address> {
    find_program_address(
        &[SEED_POOL, config.as_ref(), mint_0.as_ref(), mint_1.as_ref()],
        venue,
    )
    .map(|(a, _)| a)
}

pub fn pool_vault_address(venue: &Address, pool: &Address, mint: &Address) -> Option<Address> {
    find_program_address(&[SEED_POOL_VAULT, pool.as_ref(), mint.as_ref()], venue).map(|(a, _)| a)
}

pub fn observation_address(venue: &Address, pool: &Address) -> Option<Address> {
    find_program_address(&[SEED_OBSERVATION, pool.as_ref()], venue).map(|(a, _)| a)
}

/// One derived pool address, not yet known to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCandidate {
    /// Position of the venue in the searched list.
    pub venue: usize,
    pub config_index: u16,
    pub config: Address,
    pub pool: Address,
    pub mint_0: Address,
    pub mint_1: Address,
}

/// Every candidate pool for the pair, in search order: venue, then config
/// index, then (a, b) before (b, a).
pub fn pool_candidates(
    venues: &[Venue],
    a: Address,
    b: Address,
    index_space: u16,
) -> impl Iterator<Item = PoolCandidate> + '_ {
    venues.iter().enumerate().flat_map(move |(venue_pos, venue)| {
        (0..index_space).flat_map(move |config_index| {
            let config = amm_config_address(&venue.program_id, config_index);
            [(a, b), (b, a)].into_iter().filter_map(move |(mint_0, mint_1)| {
                let config = config?;
                let pool = pool_address(&venue.program_id, &config, &mint_0, &mint_1)?;
                Some(PoolCandidate {
                    venue: venue_pos,
                    config_index,
                    config,
                    pool,
                    mint_0,
                    mint_1,
                })
            })
        })
    })
}

/// A pool confirmed to exist, with every account a swap against it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolReference {
    pub venue: String,
    pub kind: VenueKind,
    pub program_id: Address,
    pub config: Address,
    pub config_index: u16,
    pub pool: Address,
    pub authority: Address,
    pub mint_0: Address,
    pub mint_1: Address,
    pub vault_0: Address,
    pub vault_1: Address,
    pub observation: Address,
}

impl PoolReference {
    fn complete(venue: &Venue, candidate: PoolCandidate) -> EngineResult<Self> {
        let program = &venue.program_id;
        let derive = |what: &str, address: Option<Address>| {
            address.ok_or_else(|| {
                EngineError::invariant(format!("no valid bump for {} of pool {}", what, candidate.pool))
            })
        };
        let authority = match venue.kind {
            VenueKind::ConstantProduct => derive(
                "authority",
                find_program_address(&[SEED_CPMM_AUTHORITY], program).map(|(a, _)| a),
            )?,
            VenueKind::ConcentratedLiquidity => candidate.pool,
        };
        Ok(Self {
            venue: venue.name.clone(),
            kind: venue.kind,
            program_id: *program,
            config: candidate.config,
            config_index: candidate.config_index,
            pool: candidate.pool,
            authority,
            mint_0: candidate.mint_0,
            mint_1: candidate.mint_1,
            vault_0: derive(
                "vault 0",
                pool_vault_address(program, &candidate.pool, &candidate.mint_0),
            )?,
            vault_1: derive(
                "vault 1",
                pool_vault_address(program, &candidate.pool, &candidate.mint_1),
            )?,
            observation: derive("observation", observation_address(program, &candidate.pool))?,
        })
    }

    /// The pool's token vault for `mint`.
    pub fn vault_for(&self, mint: &Address) -> Option<Address> {
        if *mint == self.mint_0 {
            Some(self.vault_0)
        } else if *mint == self.mint_1 {
            Some(self.vault_1)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Unordered pair, searched venue ids, known pool id.
type CacheKey = (Address, Address, Vec<Address>, Option<Address>);

/// Probes the ledger for pools and remembers the answers.
pub struct SwapPoolResolver {
    ledger: Arc<dyn LedgerClient>,
    venues: Vec<Venue>,
    index_space: u16,
    cache: DashMap<CacheKey, Option<PoolReference>>,
}

impl SwapPoolResolver {
    pub fn new(ledger: Arc<dyn LedgerClient>, venues: Vec<Venue>, index_space: u16) -> Self {
        Self {
            ledger,
            venues,
            index_space,
            cache: DashMap::new(),
        }
    }

    pub fn venues(&self) -> &[Venue] {
        &self.venues
    }

    /// Resolves on the configured venues.
    pub async fn resolve(
        &self,
        input: &Address,
        output: &Address,
        known_pool: Option<&Address>,
    ) -> EngineResult<PoolReference> {
        self.resolve_on(input, output, &self.venues, known_pool).await
    }

    /// Finds the pool for `input`/`output` on `venues`.
    ///
    /// With `known_pool` the candidates are matched by address and the
    /// ledger is never asked. Otherwise candidates are probed in order until
    /// one exists. Both outcomes are cached; probe errors are not.
    pub async fn resolve_on(
        &self,
        input: &Address,
        output: &Address,
        venues: &[Venue],
        known_pool: Option<&Address>,
    ) -> EngineResult<PoolReference> {
        let (a, b) = if input <= output {
            (*input, *output)
        } else {
            (*output, *input)
        };
        let key: CacheKey = (
            a,
            b,
            venues.iter().map(|v| v.program_id).collect(),
            known_pool.copied(),
        );
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone().ok_or(EngineError::PoolNotFound {
                input: *input,
                output: *output,
            });
        }

        let mut probes = 0usize;
        let hit = match known_pool {
            Some(id) => pool_candidates(venues, a, b, self.index_space).find(|c| c.pool == *id),
            None => {
                let mut found = None;
                for candidate in pool_candidates(venues, a, b, self.index_space) {
                    probes += 1;
                    if self.ledger.account_exists(&candidate.pool).await? {
                        found = Some(candidate);
                        break;
                    }
                }
                found
            }
        };

        let reference = hit
            .map(|c| PoolReference::complete(&venues[c.venue], c))
            .transpose()?;
        self.cache.insert(key, reference.clone());

        match reference {
            Some(pool) => {
                tracing::debug!(
                    %input,
                    %output,
                    venue = %pool.venue,
                    pool = %pool.pool,
                    config_index = pool.config_index,
                    probes,
                    "pool resolved"
                );
                Ok(pool)
            }
            None => {
                tracing::warn!(%input, %output, probes, "no pool on any venue");
                Err(EngineError::PoolNotFound {
                    input: *input,
                    output: *output,
                })
            }
        }
    }

    /// Expected and minimum output of swapping `amount_in` of `input` through
    /// a constant-product pool at current reserves.
    pub async fn quote_direct(
        &self,
        pool: &PoolReference,
        input: &Address,
        amount_in: u64,
        slippage_bps: u16,
    ) -> EngineResult<(u64, u64)> {
        let output = if *input == pool.mint_0 {
            pool.mint_1
        } else {
            pool.mint_0
        };
        let (vault_in, vault_out) = match (pool.vault_for(input), pool.vault_for(&output)) {
            (Some(i), Some(o)) => (i, o),
            _ => {
                return Err(EngineError::invariant(format!(
                    "{} is not a side of pool {}",
                    input, pool.pool
                )))
            }
        };
        let reserve_in = self.ledger.token_balance(&vault_in).await?.unwrap_or(0);
        let reserve_out = self.ledger.token_balance(&vault_out).await?.unwrap_or(0);

        let expected = constant_product_out(amount_in, reserve_in, reserve_out)?;
        if expected == 0 {
            return Err(EngineError::NoRoute {
                input: *input,
                output,
                reason: format!("pool {} has no usable reserves", pool.pool),
            });
        }
        let minimum = expected - bps_of(expected, slippage_bps)?;
        Ok((expected, minimum))
    }
}

/// `reserve_out × amount_in / (reserve_in + amount_in)`, ignoring the pool's
/// trade fee. 0 when either reserve is empty.
pub fn constant_product_out(amount_in: u64, reserve_in: u64, reserve_out: u64) -> EngineResult<u64> {
    if reserve_in == 0 || reserve_out == 0 {
        return Ok(0);
    }
    mul_div_wide(
        reserve_out as u128,
        amount_in as u128,
        reserve_in as u128 + amount_in as u128,
    )
}

// ---------------------------------------------------------------------------
// Direct Swap
// ---------------------------------------------------------------------------

#[derive(BorshSerialize)]
struct SwapBaseInputArgs {
    amount_in: u64,
    minimum_amount_out: u64,
}

/// Token accounts for a direct pool swap.
#[derive(Debug, Clone, Copy)]
pub struct PoolSwapAccounts {
    pub payer: Address,
    pub input_account: Address,
    pub output_account: Address,
    pub input_mint: Address,
    pub output_mint: Address,
    pub input_token_program: Address,
    pub output_token_program: Address,
}

/// `swap_base_input(amount_in, minimum_amount_out)` on a constant-product
/// pool.
pub fn build_pool_swap(
    pool: &PoolReference,
    accounts: &PoolSwapAccounts,
    amount_in: u64,
    minimum_amount_out: u64,
) -> EngineResult<Instruction> {
    if pool.kind != VenueKind::ConstantProduct {
        return Err(EngineError::Config(format!(
            "direct swaps are only supported on constant-product venues, {} is not",
            pool.venue
        )));
    }
    let missing = |mint: &Address| {
        EngineError::invariant(format!("{} is not a side of pool {}", mint, pool.pool))
    };
    let input_vault = pool
        .vault_for(&accounts.input_mint)
        .ok_or_else(|| missing(&accounts.input_mint))?;
    let output_vault = pool
        .vault_for(&accounts.output_mint)
        .ok_or_else(|| missing(&accounts.output_mint))?;

    Instruction::anchor(
        pool.program_id,
        "swap_base_input",
        &SwapBaseInputArgs {
            amount_in,
            minimum_amount_out,
        },
        vec![
            AccountMeta::new_readonly(accounts.payer, true),
            AccountMeta::new_readonly(pool.authority, false),
            AccountMeta::new_readonly(pool.config, false),
            AccountMeta::new(pool.pool, false),
            AccountMeta::new(accounts.input_account, false),
            AccountMeta::new(accounts.output_account, false),
            AccountMeta::new(input_vault, false),
            AccountMeta::new(output_vault, false),
            AccountMeta::new_readonly(accounts.input_token_program, false),
            AccountMeta::new_readonly(accounts.output_token_program, false),
            AccountMeta::new_readonly(accounts.input_mint, false),
            AccountMeta::new_readonly(accounts.output_mint, false),
            AccountMeta::new(pool.observation, false),
        ],
    )
}
