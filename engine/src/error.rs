//! Error types for the vault engine.
//!
//! Every fallible operation in the crate returns an [`EngineError`]. The
//! variants map one-to-one onto the recovery strategies the orchestrators
//! apply: transient failures are retried, per-asset failures are skipped,
//! liquidity shortfalls are downscaled, and everything else stops the
//! current operation.

use thiserror::Error;

use crate::ledger::Address;

/// Convenience alias used throughout the crate.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while valuing, swapping, or settling a vault.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A price, quote, instruction-build, or RPC call failed in a way that
    /// may succeed on retry (timeout, connection reset, 5xx, rate limit).
    #[error("transient network error during {operation}: {message}")]
    TransientNetwork {
        /// The operation that failed, e.g. `"price fetch"`.
        operation: String,
        /// Transport-level description.
        message: String,
    },

    /// No liquidity pool exists for the pair on any candidate venue.
    #[error("no pool found for {input} -> {output}")]
    PoolNotFound {
        /// Asset being sold.
        input: Address,
        /// Asset being bought.
        output: Address,
    },

    /// The aggregator answered, but has no route for the pair and amount.
    #[error("no swap route for {input} -> {output}: {reason}")]
    NoRoute {
        /// Asset being sold.
        input: Address,
        /// Asset being bought.
        output: Address,
        /// The aggregator's explanation.
        reason: String,
    },

    /// A quote outlived its validity window and must be re-fetched.
    #[error("quote for {input} -> {output} expired {age_ms}ms after fetch")]
    QuoteExpired {
        /// Asset being sold.
        input: Address,
        /// Asset being bought.
        output: Address,
        /// Age of the quote when it was checked.
        age_ms: u64,
    },

    /// The vault holds less stablecoin than a redemption requires.
    #[error("insufficient liquidity: available {available}, required {required}")]
    InsufficientLiquidity {
        /// Stablecoin currently in the vault.
        available: u64,
        /// Stablecoin needed for the full request.
        required: u64,
    },

    /// Downscaling left nothing to redeem.
    #[error("no liquidity: {requested_shares} shares requested, 0 redeemable")]
    NoLiquidity {
        /// The share amount the caller asked for.
        requested_shares: u64,
    },

    /// The ledger program (or the node's preflight) rejected a transaction.
    /// Never retried: the ledger state may have moved underneath us.
    #[error("ledger rejected transaction: {message}")]
    LedgerRejection {
        /// The error message returned by the node.
        message: String,
        /// Program log lines captured during simulation, if any.
        logs: Vec<String>,
    },

    /// A transaction was sent but not seen confirmed in time. It may still
    /// land, so it is never retried and its effects must be read back.
    #[error("transaction {signature} not confirmed after {waited_ms}ms")]
    Unconfirmed {
        /// Signature of the sent transaction.
        signature: String,
        /// How long confirmation was awaited.
        waited_ms: u64,
    },

    /// A configuration or arithmetic invariant does not hold.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// An account the flow depends on does not exist.
    #[error("{kind} account not found: {address}")]
    AccountNotFound {
        /// Human-readable account role, e.g. `"vault"`.
        kind: &'static str,
        /// The address that was queried.
        address: Address,
    },

    /// Account data did not match the expected layout.
    #[error("failed to decode {kind} account {address}: {reason}")]
    AccountDecode {
        /// Human-readable account role.
        kind: &'static str,
        /// The address whose data failed to decode.
        address: Address,
        /// What went wrong.
        reason: String,
    },

    /// A remote service answered with a payload we could not make sense of.
    #[error("invalid response from {service}: {reason}")]
    InvalidResponse {
        /// Which service produced the payload.
        service: &'static str,
        /// What went wrong.
        reason: String,
    },

    /// The vault or factory is not in a state that allows the operation.
    #[error("vault {vault} is not active ({state})")]
    VaultNotActive {
        /// The vault address.
        vault: Address,
        /// Current state, rendered for display.
        state: String,
    },

    /// Caller-supplied configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Returns `true` if retrying the same call might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientNetwork { .. })
    }

    /// Returns `true` for failures scoped to a single asset, which the
    /// orchestrators may skip instead of aborting the whole operation.
    pub fn is_per_asset(&self) -> bool {
        matches!(
            self,
            EngineError::PoolNotFound { .. }
                | EngineError::NoRoute { .. }
                | EngineError::QuoteExpired { .. }
                | EngineError::TransientNetwork { .. }
        )
    }

    /// Shorthand for building a [`EngineError::TransientNetwork`].
    pub fn transient(operation: impl Into<String>, message: impl ToString) -> Self {
        EngineError::TransientNetwork {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for building an [`EngineError::InvariantViolation`].
    pub fn invariant(message: impl Into<String>) -> Self {
        EngineError::InvariantViolation(message.into())
    }

    /// Classifies a `reqwest` failure. Connection problems, timeouts and
    /// server-side statuses are transient; everything else is not.
    pub fn from_http(operation: &str, service: &'static str, err: reqwest::Error) -> Self {
        let transient = err.is_timeout()
            || err.is_connect()
            || err.is_request()
            || err
                .status()
                .map(|s| s.is_server_error() || s.as_u16() == 429)
                .unwrap_or(false);

        if transient {
            EngineError::transient(operation, err)
        } else {
            EngineError::InvalidResponse {
                service,
                reason: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_errors_are_transient() {
        assert!(EngineError::transient("quote", "timed out").is_transient());
        assert!(!EngineError::invariant("bps > 10000").is_transient());
        assert!(!EngineError::LedgerRejection {
            message: "stale share price".into(),
            logs: vec![],
        }
        .is_transient());
    }

    #[test]
    fn per_asset_classification() {
        let a = Address::new_from_array([1; 32]);
        let b = Address::new_from_array([2; 32]);
        assert!(EngineError::PoolNotFound { input: a, output: b }.is_per_asset());
        assert!(EngineError::NoRoute {
            input: a,
            output: b,
            reason: "no liquidity".into()
        }
        .is_per_asset());
        assert!(!EngineError::NoLiquidity { requested_shares: 5 }.is_per_asset());
        assert!(!EngineError::invariant("x").is_per_asset());
    }

    #[test]
    fn unconfirmed_is_neither_retried_nor_skipped() {
        let err = EngineError::Unconfirmed {
            signature: "5x".into(),
            waited_ms: 60_000,
        };
        assert!(!err.is_transient());
        assert!(!err.is_per_asset());
        assert_eq!(err.to_string(), "transaction 5x not confirmed after 60000ms");
    }

    #[test]
    fn rejection_message_is_verbatim() {
        let err = EngineError::LedgerRejection {
            message: "custom program error: 0x1771".into(),
            logs: vec!["Program log: Invalid amount".into()],
        };
        assert_eq!(
            err.to_string(),
            "ledger rejected transaction: custom program error: 0x1771"
        );
    }
}
