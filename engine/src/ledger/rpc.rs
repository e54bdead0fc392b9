//! # JSON-RPC Wire Types
//!
//! Request/response envelopes for the ledger node's JSON-RPC 2.0 API and the
//! typed payloads of the handful of methods the engine calls.
//!
//! | Method                    | Used for                                  |
//! |---------------------------|-------------------------------------------|
//! | `getAccountInfo`          | vault/factory state, mints, pool probes   |
//! | `getTokenAccountBalance`  | custody balances                          |
//! | `getLatestBlockhash`      | message compilation                       |
//! | `sendTransaction`         | submitting signed transactions            |
//! | `getSignatureStatuses`    | waiting for confirmation                  |
//! | `getTransaction`          | program logs of a transaction that failed |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RPC Method Enumeration
// ---------------------------------------------------------------------------

/// The methods the engine calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcMethod {
    #[serde(rename = "getAccountInfo")]
    GetAccountInfo,
    #[serde(rename = "getTokenAccountBalance")]
    GetTokenAccountBalance,
    #[serde(rename = "getLatestBlockhash")]
    GetLatestBlockhash,
    #[serde(rename = "sendTransaction")]
    SendTransaction,
    #[serde(rename = "getSignatureStatuses")]
    GetSignatureStatuses,
    #[serde(rename = "getTransaction")]
    GetTransaction,
}

impl RpcMethod {
    /// Wire name, for logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcMethod::GetAccountInfo => "getAccountInfo",
            RpcMethod::GetTokenAccountBalance => "getTokenAccountBalance",
            RpcMethod::GetLatestBlockhash => "getLatestBlockhash",
            RpcMethod::SendTransaction => "sendTransaction",
            RpcMethod::GetSignatureStatuses => "getSignatureStatuses",
            RpcMethod::GetTransaction => "getTransaction",
        }
    }
}

// ---------------------------------------------------------------------------
// RPC Request / Response
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Always "2.0".
    pub jsonrpc: String,
    pub id: u64,
    pub method: RpcMethod,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: RpcMethod, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method,
            params,
        }
    }
}

/// A JSON-RPC 2.0 response. Exactly one of `result` / `error` is set by a
/// conforming node.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse<T> {
    #[serde(default)]
    pub id: Option<u64>,
    pub result: Option<T>,
    pub error: Option<RpcError>,
}

// ---------------------------------------------------------------------------
// RPC Errors
// ---------------------------------------------------------------------------

/// Preflight simulation failed.
pub const SEND_TRANSACTION_PREFLIGHT_FAILURE: i64 = -32002;
/// Node is behind and refusing to serve.
pub const NODE_UNHEALTHY: i64 = -32005;
/// Block or slot not yet available.
pub const BLOCK_NOT_AVAILABLE: i64 = -32004;
/// Invalid params (also returned for missing token accounts).
pub const INVALID_PARAMS: i64 = -32602;

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// Program log lines from a failed simulation, if the node sent any.
    pub fn logs(&self) -> Vec<String> {
        self.data
            .as_ref()
            .and_then(|d| d.get("logs"))
            .and_then(|l| l.as_array())
            .map(|lines| {
                lines
                    .iter()
                    .filter_map(|l| l.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Errors that say "try again later" rather than "no".
    pub fn is_transient(&self) -> bool {
        matches!(self.code, NODE_UNHEALTHY | BLOCK_NOT_AVAILABLE)
    }

    /// `getTokenAccountBalance` on an account that does not exist.
    pub fn is_missing_account(&self) -> bool {
        self.code == INVALID_PARAMS && self.message.contains("could not find account")
    }
}

// ---------------------------------------------------------------------------
// Typed Response Payloads
// ---------------------------------------------------------------------------

/// `{ context: { slot }, value }` wrapper used by most read methods.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcContextual<T> {
    pub context: RpcContext,
    pub value: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcContext {
    pub slot: u64,
}

/// `getAccountInfo` with `encoding: base64`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcAccountInfo {
    pub lamports: u64,
    /// `[payload, "base64"]`.
    pub data: (String, String),
    pub owner: String,
    pub executable: bool,
}

/// `getTokenAccountBalance`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTokenAmount {
    /// Raw amount as a decimal string.
    pub amount: String,
    pub decimals: u8,
}

/// `getLatestBlockhash`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlockhash {
    pub blockhash: String,
    pub last_valid_block_height: u64,
}

/// One entry of `getSignatureStatuses`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcSignatureStatus {
    pub slot: u64,
    pub confirmations: Option<u64>,
    pub err: Option<serde_json::Value>,
    pub confirmation_status: Option<String>,
}

impl RpcSignatureStatus {
    /// `confirmed` or `finalized`.
    pub fn is_confirmed(&self) -> bool {
        matches!(
            self.confirmation_status.as_deref(),
            Some("confirmed") | Some("finalized")
        )
    }
}

/// `getTransaction`. Only the status metadata is read.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcTransaction {
    pub slot: u64,
    pub meta: Option<RpcTransactionMeta>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransactionMeta {
    pub err: Option<serde_json::Value>,
    #[serde(default)]
    pub log_messages: Option<Vec<String>>,
}

impl RpcTransaction {
    /// Program log lines, empty if the node pruned them.
    pub fn logs(self) -> Vec<String> {
        self.meta
            .and_then(|m| m.log_messages)
            .unwrap_or_default()
    }
}
