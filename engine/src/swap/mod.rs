//! # Swap Module: Quotes, Routes & Pools
//!
//! Two ways to turn one token into another:
//!
//! ```text
//! quote.rs  : aggregator quotes with a validity window, instruction building
//! pool.rs   : direct pool discovery by PDA derivation, constant-product swaps
//! ```
//!
//! The orchestrators pick one per [`crate::config::SwapMode`]. Either way the
//! result is a list of instructions plus lookup tables, submitted in a single
//! transaction together with whatever moves the input funds into place.
//!
//! A failure here is always scoped to one asset. Callers decide whether that
//! asset is skipped or the whole flow stops.

pub mod pool;
pub mod quote;

pub use pool::{PoolReference, SwapPoolResolver, Venue, VenueKind};
pub use quote::{HttpSwapAggregator, SwapAggregator, SwapInstructions, SwapQuoteClient, SwapRoute};
