//! # Vault Valuation
//!
//! Gross asset value, net asset value, per-share values and the management
//! fee accrued since the last on-chain accrual.
//!
//! ```text
//! GAV           = stablecoin custody + Σ balance × price / 10^decimals
//! newly accrued = GAV × fee_bps × elapsed / (10000 × seconds_per_year)
//! total accrued = min(previously accrued + newly accrued, GAV)
//! NAV           = GAV − total accrued
//! per share     = value × 10^share_decimals / total_supply   (0 if no supply)
//! ```
//!
//! [`compute`] is the whole calculation as a pure function of a snapshot, a
//! price map, and a clock reading. [`ValuationEngine`] only gathers those
//! inputs. Nothing is persisted; every call recomputes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::config::USD_SCALE;
use crate::error::{EngineError, EngineResult};
use crate::ledger::reader::{VaultAccountReader, VaultSnapshot};
use crate::ledger::Address;
use crate::math::{accrued_fee, bps_of, mul_div_wide, per_share, pow10};
use crate::oracle::{AssetPrice, PriceOracle, PriceSource};

/// Something the caller should know before trusting the numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValuationWarning {
    /// No price for a held asset. It was valued at 0, which understates GAV.
    UnresolvedPrice { mint: Address, balance: u64 },
    /// The asset's mint could not be read, so its balance cannot be scaled.
    /// Valued at 0 like an unpriced asset.
    UnresolvedDecimals { mint: Address, balance: u64 },
    /// Accrued fees exceeded GAV and were capped.
    FeesClamped { accrued: u64, gav: u64 },
}

impl fmt::Display for ValuationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedPrice { mint, balance } => {
                write!(f, "price unresolved for {} (balance {}), valued at 0", mint, balance)
            }
            Self::UnresolvedDecimals { mint, balance } => {
                write!(f, "decimals unresolved for {} (balance {}), valued at 0", mint, balance)
            }
            Self::FeesClamped { accrued, gav } => {
                write!(f, "accrued fees {} capped at GAV {}", accrued, gav)
            }
        }
    }
}

/// Contribution of one asset to GAV.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetValuation {
    pub mint: Address,
    pub allocation_bps: u16,
    pub balance: u64,
    pub decimals: u8,
    pub usd_price: u64,
    pub price_source: PriceSource,
    pub usd_value: u64,
}

/// Point-in-time valuation of one vault. USD figures are 6-decimal fixed
/// point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Valuation {
    pub vault: Address,
    pub vault_index: u32,
    pub gav: u64,
    pub nav: u64,
    pub gav_per_token: u64,
    pub nav_per_token: u64,
    pub accrued_fees_usd: u64,
    pub previously_accrued: u64,
    pub newly_accrued: u64,
    pub elapsed_seconds: u64,
    pub management_fee_bps: u16,
    pub total_supply: u64,
    pub total_assets: u64,
    pub share_decimals: u8,
    pub stablecoin_balance: u64,
    pub assets: Vec<AssetValuation>,
    pub warnings: Vec<ValuationWarning>,
    /// Unix seconds the valuation was taken at.
    pub valued_at: i64,
}

impl Valuation {
    /// `GAV × fee_bps / 10000`: a year's fee at today's GAV. For display
    /// only; the time-based accrual is what gets charged.
    pub fn annual_fee_estimate(&self) -> EngineResult<u64> {
        bps_of(self.gav, self.management_fee_bps)
    }

    /// `true` when every held asset was valued.
    pub fn is_fully_priced(&self) -> bool {
        !self.warnings.iter().any(|w| {
            matches!(
                w,
                ValuationWarning::UnresolvedPrice { .. } | ValuationWarning::UnresolvedDecimals { .. }
            )
        })
    }
}

/// Values a snapshot at the given prices and clock reading.
///
/// Held assets missing from `prices` or `decimals` are valued at 0 with a
/// warning naming which input was missing. The stablecoin custody balance is
/// counted 1:1 in USD.
pub fn compute(
    snapshot: &VaultSnapshot,
    prices: &HashMap<Address, AssetPrice>,
    decimals: &HashMap<Address, u8>,
    now: i64,
) -> EngineResult<Valuation> {
    let vault = &snapshot.vault;
    let mut warnings = Vec::new();
    let mut assets = Vec::with_capacity(snapshot.holdings.len());
    let mut gav = snapshot.stablecoin_balance as u128;

    for holding in &snapshot.holdings {
        let price = prices.get(&holding.mint).filter(|p| p.is_resolved());
        let decimals_of = decimals.get(&holding.mint).copied();

        let (usd_price, price_source, usd_value, decimals) = match (price, decimals_of) {
            (Some(price), Some(d)) => (
                price.usd_price,
                price.source,
                mul_div_wide(holding.balance as u128, price.usd_price as u128, pow10(d)?)?,
                d,
            ),
            (price, _) => {
                if holding.balance > 0 {
                    warnings.push(match price {
                        Some(_) => ValuationWarning::UnresolvedDecimals {
                            mint: holding.mint,
                            balance: holding.balance,
                        },
                        None => ValuationWarning::UnresolvedPrice {
                            mint: holding.mint,
                            balance: holding.balance,
                        },
                    });
                }
                (0, PriceSource::Unresolved, 0, decimals_of.unwrap_or(0))
            }
        };

        gav += usd_value as u128;
        assets.push(AssetValuation {
            mint: holding.mint,
            allocation_bps: holding.allocation_bps,
            balance: holding.balance,
            decimals,
            usd_price,
            price_source,
            usd_value,
        });
    }

    let gav = u64::try_from(gav)
        .map_err(|_| EngineError::invariant(format!("GAV overflows u64: {}", gav)))?;

    let elapsed_seconds = now.saturating_sub(vault.last_fee_accrual_ts).max(0) as u64;
    let previously_accrued = vault.accrued_management_fees_usdc;
    let newly_accrued = accrued_fee(gav, vault.management_fees, elapsed_seconds)?;
    let uncapped = previously_accrued.saturating_add(newly_accrued);
    if uncapped > gav {
        warnings.push(ValuationWarning::FeesClamped {
            accrued: uncapped,
            gav,
        });
    }
    let accrued_fees_usd = uncapped.min(gav);
    let nav = gav - accrued_fees_usd;

    Ok(Valuation {
        vault: snapshot.addresses.vault,
        vault_index: snapshot.addresses.vault_index,
        gav,
        nav,
        gav_per_token: per_share(gav, vault.total_supply, snapshot.share_decimals)?,
        nav_per_token: per_share(nav, vault.total_supply, snapshot.share_decimals)?,
        accrued_fees_usd,
        previously_accrued,
        newly_accrued,
        elapsed_seconds,
        management_fee_bps: vault.management_fees,
        total_supply: vault.total_supply,
        total_assets: vault.total_assets,
        share_decimals: snapshot.share_decimals,
        stablecoin_balance: snapshot.stablecoin_balance,
        assets,
        warnings,
        valued_at: now,
    })
}

/// Gathers prices and decimals for a vault and runs [`compute`].
pub struct ValuationEngine {
    reader: Arc<VaultAccountReader>,
    oracle: Arc<PriceOracle>,
}

impl ValuationEngine {
    pub fn new(reader: Arc<VaultAccountReader>, oracle: Arc<PriceOracle>) -> Self {
        Self { reader, oracle }
    }

    pub fn reader(&self) -> &Arc<VaultAccountReader> {
        &self.reader
    }

    pub fn oracle(&self) -> &Arc<PriceOracle> {
        &self.oracle
    }

    /// Reads vault `vault_index` and values it now.
    pub async fn valuate(&self, vault_index: u32) -> EngineResult<Valuation> {
        let snapshot = self.reader.snapshot(vault_index).await?;
        self.valuate_snapshot(&snapshot).await
    }

    /// Values an already-read snapshot now.
    pub async fn valuate_snapshot(&self, snapshot: &VaultSnapshot) -> EngineResult<Valuation> {
        self.valuate_at(snapshot, chrono::Utc::now().timestamp()).await
    }

    /// Values a snapshot as of `now` (unix seconds).
    pub async fn valuate_at(&self, snapshot: &VaultSnapshot, now: i64) -> EngineResult<Valuation> {
        let mints: Vec<Address> = snapshot.holdings.iter().map(|h| h.mint).collect();
        let prices = self.oracle.get_prices(&mints).await;

        let mut decimals = HashMap::with_capacity(mints.len());
        for mint in &mints {
            match self.oracle.decimals(mint).await {
                Ok(d) => {
                    decimals.insert(*mint, d);
                }
                Err(err) => {
                    tracing::warn!(vault = %snapshot.addresses.vault, %mint, error = %err, "mint decimals unavailable");
                }
            }
        }

        let valuation = compute(snapshot, &prices, &decimals, now)?;
        for warning in &valuation.warnings {
            tracing::warn!(vault = %valuation.vault, "{}", warning);
        }
        tracing::info!(
            vault = %valuation.vault,
            gav = valuation.gav,
            nav = valuation.nav,
            nav_per_token = valuation.nav_per_token,
            accrued_fees = valuation.accrued_fees_usd,
            newly_accrued = valuation.newly_accrued,
            elapsed_seconds = valuation.elapsed_seconds,
            "vault valued"
        );
        Ok(valuation)
    }
}

/// Renders a micro-USD amount as `123.456789`.
pub fn format_usd(micros: u64) -> String {
    format!("{}.{:06}", micros / USD_SCALE, micros % USD_SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VAULT_PROGRAM_ID;
    use crate::ledger::accounts::{
        Factory, FactoryState, TokenProgram, UnderlyingAsset, Vault, VaultState,
    };
    use crate::ledger::pda::VaultAddresses;
    use crate::ledger::reader::AssetHolding;

    const YEAR: i64 = 365 * 86_400;

    fn mint(b: u8) -> Address {
        Address::new_from_array([b; 32])
    }

    fn snapshot(fee_bps: u16, previously_accrued: u64, supply: u64) -> VaultSnapshot {
        let addresses = VaultAddresses::derive(&Address::from_static(VAULT_PROGRAM_ID), 0).unwrap();
        VaultSnapshot {
            addresses,
            vault: Vault {
                bump: 255,
                vault_index: 0,
                factory: addresses.factory,
                admin: mint(9),
                vault_name: "Blue Chips".into(),
                vault_symbol: "BLUE".into(),
                underlying_assets: vec![
                    UnderlyingAsset { mint_address: mint(1), mint_bps: 6_000 },
                    UnderlyingAsset { mint_address: mint(2), mint_bps: 4_000 },
                ],
                management_fees: fee_bps,
                state: VaultState::Active,
                total_assets: 1_000_000,
                total_supply: supply,
                created_at: 0,
                last_fee_accrual_ts: 1_000,
                accrued_management_fees_usdc: previously_accrued,
            },
            factory: Factory {
                bump: 255,
                admin: mint(9),
                fee_recipient: mint(8),
                vault_count: 1,
                state: FactoryState::Active,
                entry_fee_bps: 25,
                exit_fee_bps: 25,
                vault_creation_fee_usdc: 0,
                min_management_fee_bps: 0,
                max_management_fee_bps: 2_000,
                vault_creator_fee_ratio_bps: 7_000,
                platform_fee_ratio_bps: 3_000,
            },
            share_decimals: 6,
            stablecoin_mint: mint(99),
            stablecoin_balance: 1_000_000,
            holdings: vec![
                AssetHolding {
                    mint: mint(1),
                    allocation_bps: 6_000,
                    token_program: TokenProgram::Spl,
                    vault_account: mint(11),
                    // 2 tokens at 9 decimals
                    balance: 2_000_000_000,
                },
                AssetHolding {
                    mint: mint(2),
                    allocation_bps: 4_000,
                    token_program: TokenProgram::Spl,
                    vault_account: mint(12),
                    // 3 tokens at 6 decimals
                    balance: 3_000_000,
                },
            ],
        }
    }

    fn price(m: Address, usd_price: u64) -> (Address, AssetPrice) {
        (
            m,
            AssetPrice {
                mint: m,
                usd_price,
                price_change_24h: None,
                source: PriceSource::Feed,
            },
        )
    }

    fn inputs() -> (HashMap<Address, AssetPrice>, HashMap<Address, u8>) {
        (
            [price(mint(1), 150_000_000), price(mint(2), 1_500_000)].into(),
            [(mint(1), 9), (mint(2), 6)].into(),
        )
    }

    #[test]
    fn gav_sums_stablecoin_and_priced_assets() {
        let (prices, decimals) = inputs();
        let v = compute(&snapshot(0, 0, 2_000_000), &prices, &decimals, 1_000).unwrap();
        // 1 + 2 × 150 + 3 × 1.5 = 305.5 USD
        assert_eq!(v.gav, 305_500_000);
        assert_eq!(v.nav, v.gav);
        assert_eq!(v.gav_per_token, 152_750_000);
        assert!(v.warnings.is_empty());
    }

    #[test]
    fn valuation_is_idempotent() {
        let (prices, decimals) = inputs();
        let snap = snapshot(200, 5_000, 2_000_000);
        let a = compute(&snap, &prices, &decimals, 1_000 + YEAR / 2).unwrap();
        let b = compute(&snap, &prices, &decimals, 1_000 + YEAR / 2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn accrual_is_zero_at_zero_elapsed_and_monotone() {
        let (prices, decimals) = inputs();
        let snap = snapshot(200, 0, 2_000_000);
        let at = |now| compute(&snap, &prices, &decimals, now).unwrap().newly_accrued;

        assert_eq!(at(1_000), 0);
        // Clock behind the last accrual counts as zero elapsed.
        assert_eq!(at(500), 0);

        let mut last = 0;
        for step in 1..=12 {
            let fee = at(1_000 + step * YEAR / 12);
            assert!(fee >= last);
            last = fee;
        }
        // 2% of 305.5 USD over a year.
        assert_eq!(last, 6_110_000);
    }

    #[test]
    fn accrued_fees_never_exceed_gav() {
        let (prices, decimals) = inputs();
        let v = compute(&snapshot(2_000, 400_000_000, 2_000_000), &prices, &decimals, 1_000 + YEAR).unwrap();
        assert_eq!(v.accrued_fees_usd, v.gav);
        assert_eq!(v.nav, 0);
        assert!(matches!(v.warnings[0], ValuationWarning::FeesClamped { .. }));
    }

    #[test]
    fn unresolved_price_contributes_zero_and_warns() {
        let (mut prices, decimals) = inputs();
        prices.insert(
            mint(2),
            AssetPrice {
                mint: mint(2),
                usd_price: 0,
                price_change_24h: None,
                source: PriceSource::Unresolved,
            },
        );
        let v = compute(&snapshot(0, 0, 2_000_000), &prices, &decimals, 1_000).unwrap();
        assert_eq!(v.gav, 301_000_000);
        assert!(!v.is_fully_priced());
        assert_eq!(
            v.warnings,
            vec![ValuationWarning::UnresolvedPrice { mint: mint(2), balance: 3_000_000 }]
        );
    }

    #[test]
    fn missing_decimals_contribute_zero_with_their_own_warning() {
        let (prices, mut decimals) = inputs();
        decimals.remove(&mint(1));
        let v = compute(&snapshot(0, 0, 2_000_000), &prices, &decimals, 1_000).unwrap();
        // 1 + 3 × 1.5 USD; the 2 tokens of mint(1) count for nothing.
        assert_eq!(v.gav, 5_500_000);
        assert_eq!(v.assets[0].usd_value, 0);
        assert!(!v.is_fully_priced());
        assert_eq!(
            v.warnings,
            vec![ValuationWarning::UnresolvedDecimals { mint: mint(1), balance: 2_000_000_000 }]
        );
    }

    #[test]
    fn zero_supply_gives_zero_per_token() {
        let (prices, decimals) = inputs();
        let v = compute(&snapshot(0, 0, 0), &prices, &decimals, 1_000).unwrap();
        assert_eq!(v.gav_per_token, 0);
        assert_eq!(v.nav_per_token, 0);
    }

    #[test]
    fn annual_estimate_is_simple_bps() {
        let (prices, decimals) = inputs();
        let v = compute(&snapshot(200, 0, 2_000_000), &prices, &decimals, 1_000).unwrap();
        assert_eq!(v.annual_fee_estimate().unwrap(), 6_110_000);
        assert_eq!(format_usd(v.gav), "305.500000");
    }
}
