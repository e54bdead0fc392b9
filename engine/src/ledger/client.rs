//! # Ledger Client
//!
//! [`LedgerClient`] is the seam between the engine and the chain. The
//! production implementation, [`RpcLedgerClient`], speaks JSON-RPC over
//! `reqwest`; tests plug in an in-memory ledger.
//!
//! Reads are retried on transient failures. Submission is not: a transaction
//! that may or may not have landed is never blindly re-sent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::accounts::TokenAccount;
use super::address::Address;
use super::instruction::Instruction;
use super::rpc::{
    RpcAccountInfo, RpcBlockhash, RpcContextual, RpcError, RpcMethod, RpcRequest, RpcResponse,
    RpcSignatureStatus, RpcTokenAmount, RpcTransaction,
};
use super::signer::Keypair;
use super::transaction::{AddressLookupTable, Message};
use crate::config::CONFIRMATION_POLL_INTERVAL;
use crate::error::{EngineError, EngineResult};
use crate::retry::{retry, RetryPolicy};

/// Raw account contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountData {
    pub owner: Address,
    pub lamports: u64,
    pub data: Vec<u8>,
}

/// Read and write access to the ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetches an account, `None` if it does not exist.
    async fn get_account(&self, address: &Address) -> EngineResult<Option<AccountData>>;

    /// Existence probe. Used by pool discovery, so implementations may want
    /// to make it cheaper than a full read.
    async fn account_exists(&self, address: &Address) -> EngineResult<bool> {
        Ok(self.get_account(address).await?.is_some())
    }

    /// Raw balance of a token account, `None` if the account does not exist.
    async fn token_balance(&self, account: &Address) -> EngineResult<Option<u64>> {
        match self.get_account(account).await? {
            Some(acc) => Ok(Some(TokenAccount::decode(account, &acc.data)?.amount)),
            None => Ok(None),
        }
    }

    /// Loads an address lookup table.
    async fn lookup_table(&self, address: &Address) -> EngineResult<AddressLookupTable> {
        let account = self
            .get_account(address)
            .await?
            .ok_or(EngineError::AccountNotFound {
                kind: "lookup table",
                address: *address,
            })?;
        AddressLookupTable::decode(*address, &account.data)
    }

    /// Compiles, signs, submits, and waits for confirmation. Returns the
    /// transaction signature.
    async fn submit(
        &self,
        payer: &Keypair,
        instructions: Vec<Instruction>,
        lookup_tables: Vec<Address>,
    ) -> EngineResult<String>;
}

/// Failure of a single round trip: either the node answered with an error
/// object, or we never got a usable answer.
enum CallError {
    Node(RpcError),
    Engine(EngineError),
}

/// JSON-RPC implementation of [`LedgerClient`].
pub struct RpcLedgerClient {
    http: reqwest::Client,
    url: String,
    retry: RetryPolicy,
    confirmation_timeout: Duration,
    next_id: AtomicU64,
}

impl RpcLedgerClient {
    pub fn new(
        url: impl Into<String>,
        http_timeout: Duration,
        retry: RetryPolicy,
        confirmation_timeout: Duration,
    ) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("http client: {}", e)))?;
        Ok(Self {
            http,
            url: url.into(),
            retry,
            confirmation_timeout,
            next_id: AtomicU64::new(1),
        })
    }

    /// One JSON-RPC round trip. Node-level errors are returned unclassified
    /// so callers can interpret them per method.
    async fn call_raw<T: DeserializeOwned>(
        &self,
        method: RpcMethod,
        params: serde_json::Value,
    ) -> Result<T, CallError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(id, method, params);
        let operation = method.as_str();

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CallError::Engine(EngineError::from_http(operation, "ledger rpc", e)))?;

        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| CallError::Engine(EngineError::from_http(operation, "ledger rpc", e)))?;

        match (body.result, body.error) {
            (_, Some(err)) => Err(CallError::Node(err)),
            (Some(result), None) => Ok(result),
            (None, None) => Err(CallError::Engine(EngineError::InvalidResponse {
                service: "ledger rpc",
                reason: format!("{}: neither result nor error", operation),
            })),
        }
    }

    /// A read call with default error classification.
    async fn call<T: DeserializeOwned>(
        &self,
        method: RpcMethod,
        params: serde_json::Value,
    ) -> EngineResult<T> {
        self.call_raw(method, params).await.map_err(|e| match e {
            CallError::Node(rpc) if rpc.is_transient() => {
                EngineError::transient(method.as_str(), rpc.message)
            }
            CallError::Node(rpc) => EngineError::InvalidResponse {
                service: "ledger rpc",
                reason: format!("{} ({}): {}", method.as_str(), rpc.code, rpc.message),
            },
            CallError::Engine(engine) => engine,
        })
    }

    async fn latest_blockhash(&self) -> EngineResult<[u8; 32]> {
        let ctx: RpcContextual<RpcBlockhash> = retry(&self.retry, "getLatestBlockhash", || {
            self.call(
                RpcMethod::GetLatestBlockhash,
                json!([{ "commitment": "confirmed" }]),
            )
        })
        .await?;
        let decoded: Address = ctx.value.blockhash.parse().map_err(|e| EngineError::InvalidResponse {
            service: "ledger rpc",
            reason: format!("blockhash: {}", e),
        })?;
        Ok(decoded.to_bytes())
    }

    async fn send(&self, wire: &[u8]) -> EngineResult<String> {
        let params = json!([
            BASE64.encode(wire),
            { "encoding": "base64", "preflightCommitment": "confirmed" }
        ]);
        self.call_raw(RpcMethod::SendTransaction, params)
            .await
            .map_err(|e| match e {
                CallError::Node(rpc) if rpc.is_transient() => {
                    EngineError::transient("sendTransaction", rpc.message)
                }
                // Preflight failures carry the program logs.
                CallError::Node(rpc) => EngineError::LedgerRejection {
                    logs: rpc.logs(),
                    message: rpc.message,
                },
                CallError::Engine(engine) => engine,
            })
    }

    async fn await_confirmation(&self, signature: &str) -> EngineResult<()> {
        let deadline = tokio::time::Instant::now() + self.confirmation_timeout;
        loop {
            let statuses: RpcContextual<Vec<Option<RpcSignatureStatus>>> = self
                .call(
                    RpcMethod::GetSignatureStatuses,
                    json!([[signature], { "searchTransactionHistory": false }]),
                )
                .await?;

            if let Some(Some(status)) = statuses.value.into_iter().next() {
                if let Some(err) = status.err {
                    let logs = self.transaction_logs(signature).await;
                    return Err(on_chain_rejection(signature, &err, logs));
                }
                if status.is_confirmed() {
                    return Ok(());
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::Unconfirmed {
                    signature: signature.to_string(),
                    waited_ms: self.confirmation_timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(CONFIRMATION_POLL_INTERVAL).await;
        }
    }
}

impl RpcLedgerClient {
    /// Program logs of a landed transaction. A failure to fetch them is
    /// logged and yields no lines; it never replaces the rejection itself.
    async fn transaction_logs(&self, signature: &str) -> Vec<String> {
        let fetched: EngineResult<Option<RpcTransaction>> = retry(&self.retry, "getTransaction", || {
            self.call(
                RpcMethod::GetTransaction,
                json!([
                    signature,
                    {
                        "encoding": "base64",
                        "commitment": "confirmed",
                        "maxSupportedTransactionVersion": 0
                    }
                ]),
            )
        })
        .await;
        match fetched {
            Ok(tx) => tx.map(RpcTransaction::logs).unwrap_or_default(),
            Err(err) => {
                tracing::warn!(%signature, error = %err, "program logs unavailable");
                Vec::new()
            }
        }
    }
}

/// A transaction that landed but whose program failed.
fn on_chain_rejection(signature: &str, err: &serde_json::Value, logs: Vec<String>) -> EngineError {
    EngineError::LedgerRejection {
        message: format!("transaction {} failed: {}", signature, err),
        logs,
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn get_account(&self, address: &Address) -> EngineResult<Option<AccountData>> {
        let ctx: RpcContextual<Option<RpcAccountInfo>> = retry(&self.retry, "getAccountInfo", || {
            self.call(
                RpcMethod::GetAccountInfo,
                json!([address.to_string(), { "encoding": "base64", "commitment": "confirmed" }]),
            )
        })
        .await?;

        let Some(info) = ctx.value else {
            return Ok(None);
        };
        let data = BASE64
            .decode(info.data.0.as_bytes())
            .map_err(|e| EngineError::AccountDecode {
                kind: "account",
                address: *address,
                reason: format!("base64: {}", e),
            })?;
        let owner = info.owner.parse().map_err(|e| EngineError::InvalidResponse {
            service: "ledger rpc",
            reason: format!("owner of {}: {}", address, e),
        })?;
        Ok(Some(AccountData {
            owner,
            lamports: info.lamports,
            data,
        }))
    }

    async fn token_balance(&self, account: &Address) -> EngineResult<Option<u64>> {
        let result = retry(&self.retry, "getTokenAccountBalance", || async {
            match self
                .call_raw::<RpcContextual<RpcTokenAmount>>(
                    RpcMethod::GetTokenAccountBalance,
                    json!([account.to_string(), { "commitment": "confirmed" }]),
                )
                .await
            {
                Ok(ctx) => Ok(Some(ctx.value)),
                Err(CallError::Node(rpc)) if rpc.is_missing_account() => Ok(None),
                Err(CallError::Node(rpc)) if rpc.is_transient() => {
                    Err(EngineError::transient("getTokenAccountBalance", rpc.message))
                }
                Err(CallError::Node(rpc)) => Err(EngineError::InvalidResponse {
                    service: "ledger rpc",
                    reason: format!("getTokenAccountBalance ({}): {}", rpc.code, rpc.message),
                }),
                Err(CallError::Engine(engine)) => Err(engine),
            }
        })
        .await?;

        result
            .map(|amount| {
                amount.amount.parse::<u64>().map_err(|e| EngineError::InvalidResponse {
                    service: "ledger rpc",
                    reason: format!("token amount {:?}: {}", amount.amount, e),
                })
            })
            .transpose()
    }

    async fn submit(
        &self,
        payer: &Keypair,
        instructions: Vec<Instruction>,
        lookup_tables: Vec<Address>,
    ) -> EngineResult<String> {
        let mut tables = Vec::with_capacity(lookup_tables.len());
        for address in &lookup_tables {
            tables.push(self.lookup_table(address).await?);
        }
        let blockhash = self.latest_blockhash().await?;
        let message = Message::compile(&payer.pubkey(), &instructions, &tables, &blockhash)?;
        let signed = message.sign(&[payer])?;
        let wire = signed.serialize()?;

        tracing::debug!(
            instructions = instructions.len(),
            lookup_tables = tables.len(),
            bytes = wire.len(),
            "submitting transaction"
        );

        let signature = self.send(&wire).await?;
        self.await_confirmation(&signature).await?;
        tracing::info!(%signature, "transaction confirmed");
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_chain_failure_keeps_program_logs() {
        let tx: RpcTransaction = serde_json::from_value(json!({
            "slot": 9,
            "meta": {
                "err": { "InstructionError": [1, { "Custom": 6001 }] },
                "logMessages": ["Program log: Instruction: Route", "Program log: slippage exceeded"]
            }
        }))
        .unwrap();
        let err_value = json!({ "InstructionError": [1, { "Custom": 6001 }] });

        match on_chain_rejection("4sig", &err_value, tx.logs()) {
            EngineError::LedgerRejection { message, logs } => {
                assert!(message.starts_with("transaction 4sig failed"));
                assert_eq!(logs.len(), 2);
                assert_eq!(logs[1], "Program log: slippage exceeded");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
