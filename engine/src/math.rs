//! # Fixed-Point Vault Arithmetic
//!
//! All the formulas that turn balances, basis points, and share prices into
//! token amounts. Pure functions, no I/O, no floats.
//!
//! Every product is taken in `u128` and narrowed back to `u64` with a checked
//! conversion. Division rounds toward zero, which is what the ledger program
//! does, so a preview computed here matches the program to the unit.

use crate::config::{MAX_BPS, SECONDS_PER_YEAR};
use crate::error::{EngineError, EngineResult};

/// `10^decimals` as `u128`. Token decimals never exceed 19 in practice;
/// anything larger is rejected.
pub fn pow10(decimals: u8) -> EngineResult<u128> {
    10u128
        .checked_pow(decimals as u32)
        .filter(|_| decimals <= 19)
        .ok_or_else(|| EngineError::invariant(format!("unsupported decimals: {}", decimals)))
}

/// `a × b / d`, rounded down.
pub fn mul_div(a: u64, b: u64, d: u64) -> EngineResult<u64> {
    mul_div_wide(a as u128, b as u128, d as u128)
}

/// `a × b / d` on wide operands, narrowed to `u64`.
pub fn mul_div_wide(a: u128, b: u128, d: u128) -> EngineResult<u64> {
    if d == 0 {
        return Err(EngineError::invariant("division by zero"));
    }
    let product = a
        .checked_mul(b)
        .ok_or_else(|| EngineError::invariant(format!("overflow: {} * {}", a, b)))?;
    u64::try_from(product / d)
        .map_err(|_| EngineError::invariant(format!("result exceeds u64: {} / {}", product, d)))
}

/// `amount × bps / 10000`.
pub fn bps_of(amount: u64, bps: u16) -> EngineResult<u64> {
    if u64::from(bps) > MAX_BPS {
        return Err(EngineError::invariant(format!("bps out of range: {}", bps)));
    }
    mul_div(amount, bps as u64, MAX_BPS)
}

/// Gross amount split into fee and net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FeeBreakdown {
    /// Amount before the fee.
    pub gross: u64,
    /// Fee charged.
    pub fee: u64,
    /// `gross - fee`.
    pub net: u64,
}

/// Applies a basis-point fee to a gross amount.
pub fn apply_fee(gross: u64, fee_bps: u16) -> EngineResult<FeeBreakdown> {
    let fee = bps_of(gross, fee_bps)?;
    let net = gross
        .checked_sub(fee)
        .ok_or_else(|| EngineError::invariant("fee exceeds gross amount"))?;
    Ok(FeeBreakdown { gross, fee, net })
}

/// Shares minted for a net stablecoin deposit.
///
/// A share price of zero means "no price yet": the first depositor gets
/// shares 1:1 with the stablecoin amount.
pub fn shares_for_deposit(net: u64, share_price: u64, share_decimals: u8) -> EngineResult<u64> {
    if share_price == 0 {
        return Ok(net);
    }
    mul_div_wide(net as u128, pow10(share_decimals)?, share_price as u128)
}

/// Stablecoin value of a share amount at the given price.
pub fn stablecoin_for_shares(shares: u64, share_price: u64, share_decimals: u8) -> EngineResult<u64> {
    mul_div_wide(shares as u128, share_price as u128, pow10(share_decimals)?)
}

/// `value × 10^decimals / supply`, or 0 when there is no supply.
pub fn per_share(value: u64, total_supply: u64, share_decimals: u8) -> EngineResult<u64> {
    if total_supply == 0 {
        return Ok(0);
    }
    mul_div_wide(value as u128, pow10(share_decimals)?, total_supply as u128)
}

/// Book share price used for fee minting: `total_assets × 10^decimals / total_supply`.
pub fn book_share_price(total_assets: u64, total_supply: u64, share_decimals: u8) -> EngineResult<u64> {
    per_share(total_assets, total_supply, share_decimals)
}

/// Pro-rata slice of a vault balance: `floor(balance × shares / supply)`.
pub fn pro_rata(balance: u64, shares: u64, total_supply: u64) -> EngineResult<u64> {
    if total_supply == 0 {
        return Err(EngineError::invariant("pro-rata against zero supply"));
    }
    if shares > total_supply {
        return Err(EngineError::invariant(format!(
            "shares {} exceed supply {}",
            shares, total_supply
        )));
    }
    mul_div(balance, shares, total_supply)
}

/// Largest share amount the available stablecoin can cover:
/// `min(requested, available × supply / assets)`.
pub fn downscale_shares(
    requested: u64,
    available: u64,
    total_supply: u64,
    total_assets: u64,
) -> EngineResult<u64> {
    if total_assets == 0 || total_supply == 0 {
        return Ok(0);
    }
    let affordable = mul_div(available, total_supply, total_assets)?;
    Ok(affordable.min(requested))
}

/// Management fee accrued over `elapsed_secs` at `fee_bps` per year:
/// `gav × bps × elapsed / (10000 × seconds_per_year)`.
pub fn accrued_fee(gav: u64, fee_bps: u16, elapsed_secs: u64) -> EngineResult<u64> {
    if elapsed_secs == 0 || fee_bps == 0 || gav == 0 {
        return Ok(0);
    }
    let numerator = (gav as u128)
        .checked_mul(fee_bps as u128)
        .and_then(|v| v.checked_mul(elapsed_secs as u128))
        .ok_or_else(|| EngineError::invariant("fee accrual overflow"))?;
    let denominator = (MAX_BPS as u128) * (SECONDS_PER_YEAR as u128);
    u64::try_from(numerator / denominator)
        .map_err(|_| EngineError::invariant("accrued fee exceeds u64"))
}

/// Splits a fee between creator and platform. The platform takes the
/// rounding remainder so the two parts always sum to `total`.
pub fn split_fee(total: u64, creator_ratio_bps: u16) -> EngineResult<(u64, u64)> {
    let creator = bps_of(total, creator_ratio_bps)?;
    Ok((creator, total - creator))
}
