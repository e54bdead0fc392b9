//! # Ledger Plumbing
//!
//! Everything needed to talk to the vault program without pulling in a full
//! chain SDK: 32-byte addresses, program-derived address search, Anchor-style
//! account and instruction codecs, message compilation and signing, and a
//! JSON-RPC client behind the [`LedgerClient`] trait.
//!
//! The orchestrators only ever see [`LedgerClient`] and [`reader::VaultAccountReader`].
//! Tests swap in an in-memory client and never touch the network.

pub mod accounts;
pub mod address;
pub mod client;
pub mod instruction;
pub mod pda;
pub mod reader;
pub mod rpc;
pub mod signer;
pub mod transaction;

pub use address::{Address, AddressError};
pub use client::{AccountData, LedgerClient, RpcLedgerClient};
pub use instruction::{AccountMeta, Instruction};
pub use signer::Keypair;
