// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Vault Engine: Core Library
//!
//! Off-chain brain for a multi-asset investment vault whose books live on a
//! Solana-style ledger. The ledger program owns every balance; this crate
//! reads its accounts, prices them, works out what the fees should be, and
//! proposes state transitions as signed program transactions.
//!
//! ## Architecture
//!
//! Modules are layered leaf-first. Nothing below the orchestrators knows
//! that deposits or redemptions exist.
//!
//! - **config**: Protocol constants, program ids, and [`config::EngineConfig`].
//! - **error**: The single [`EngineError`] enum and its retry classification.
//! - **retry**: Bounded exponential backoff for transient I/O.
//! - **math**: Fixed-point fee, share, and pro-rata arithmetic. No I/O.
//! - **ledger**: Addresses, PDAs, account codecs, instruction builders,
//!   message signing, and the JSON-RPC client.
//! - **oracle**: Batched USD price feed with caching and decimals lookup.
//! - **swap**: Aggregator quotes/instructions and direct pool resolution.
//! - **valuation**: GAV, NAV, per-share values, management-fee accrual.
//! - **orchestrator**: Deposit, redeem, fee distribution, admin flows.
//!
//! ## Ground Rules
//!
//! 1. Every amount is an integer in the smallest unit. USD values are
//!    6-decimal fixed point, the same scale as the vault's stablecoin.
//! 2. Products are taken in `u128` and narrowed with a checked conversion.
//!    An overflow is an invariant violation, never a silent wrap.
//! 3. Nothing is final until the ledger says so. Client-side fee figures are
//!    previews; the program computes the authoritative ones at settlement.

pub mod config;
pub mod error;
pub mod ledger;
pub mod math;
pub mod oracle;
pub mod orchestrator;
pub mod retry;
pub mod swap;
pub mod valuation;

pub use error::{EngineError, EngineResult};
pub use ledger::Address;
