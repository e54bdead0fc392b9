//! # Aggregator Quotes
//!
//! `GET {base}/quote` prices a route; `POST {base}/swap-instructions` turns
//! that quote into ready-to-sign instructions whose output lands in a
//! caller-chosen token account.
//!
//! Quotes go stale. Every [`SwapRoute`] carries the instant it was fetched and
//! the instant it stops being usable. [`SwapQuoteClient::build_instructions`]
//! refuses an expired route, and [`SwapQuoteClient::refresh`] re-quotes one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;

use crate::error::{EngineError, EngineResult};
use crate::ledger::{AccountMeta, Address, Instruction};
use crate::retry::{retry, RetryPolicy};

const SERVICE: &str = "swap aggregator";

// ---------------------------------------------------------------------------
// Aggregator Payloads
// ---------------------------------------------------------------------------

/// A quote as the aggregator returned it.
#[derive(Debug, Clone)]
pub struct AggregatorQuote {
    pub input_mint: Address,
    pub output_mint: Address,
    pub in_amount: u64,
    pub out_amount: u64,
    /// Minimum output after slippage.
    pub other_amount_threshold: u64,
    /// Percent, e.g. `0.12` for 0.12%.
    pub price_impact_pct: f64,
    /// The full response, echoed back when building instructions.
    pub raw: serde_json::Value,
}

/// Instructions for one swap, grouped the way they must be ordered.
#[derive(Debug, Clone, Default)]
pub struct SwapInstructions {
    pub compute_budget: Vec<Instruction>,
    pub setup: Vec<Instruction>,
    pub swap: Vec<Instruction>,
    pub cleanup: Vec<Instruction>,
    pub lookup_tables: Vec<Address>,
}

impl SwapInstructions {
    /// Flattens into submission order: compute budget, `funding`, setup,
    /// swap, cleanup.
    pub fn assemble(self, funding: Vec<Instruction>) -> Vec<Instruction> {
        let mut out = Vec::with_capacity(
            self.compute_budget.len()
                + funding.len()
                + self.setup.len()
                + self.swap.len()
                + self.cleanup.len(),
        );
        out.extend(self.compute_budget);
        out.extend(funding);
        out.extend(self.setup);
        out.extend(self.swap);
        out.extend(self.cleanup);
        out
    }
}

/// The swap-aggregation service.
#[async_trait]
pub trait SwapAggregator: Send + Sync {
    async fn quote(
        &self,
        input: &Address,
        output: &Address,
        amount: u64,
        slippage_bps: u16,
    ) -> EngineResult<AggregatorQuote>;

    async fn swap_instructions(
        &self,
        quote: &AggregatorQuote,
        payer: &Address,
        destination: &Address,
    ) -> EngineResult<SwapInstructions>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireQuote {
    in_amount: String,
    out_amount: String,
    other_amount_threshold: String,
    #[serde(default)]
    price_impact_pct: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAccount {
    pubkey: String,
    is_signer: bool,
    is_writable: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInstruction {
    program_id: String,
    accounts: Vec<WireAccount>,
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSwapInstructions {
    #[serde(default)]
    compute_budget_instructions: Vec<WireInstruction>,
    #[serde(default)]
    setup_instructions: Vec<WireInstruction>,
    swap_instruction: WireInstruction,
    #[serde(default)]
    cleanup_instruction: Option<WireInstruction>,
    #[serde(default)]
    address_lookup_table_addresses: Vec<String>,
}

fn parse_address(field: &str, raw: &str) -> EngineResult<Address> {
    raw.parse().map_err(|e| EngineError::InvalidResponse {
        service: SERVICE,
        reason: format!("{} {:?}: {}", field, raw, e),
    })
}

fn parse_amount(field: &str, raw: &str) -> EngineResult<u64> {
    raw.parse().map_err(|e| EngineError::InvalidResponse {
        service: SERVICE,
        reason: format!("{} {:?}: {}", field, raw, e),
    })
}

impl WireInstruction {
    fn into_instruction(self) -> EngineResult<Instruction> {
        let accounts = self
            .accounts
            .into_iter()
            .map(|a| {
                Ok(AccountMeta {
                    pubkey: parse_address("account", &a.pubkey)?,
                    is_signer: a.is_signer,
                    is_writable: a.is_writable,
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;
        let data = BASE64
            .decode(self.data.as_bytes())
            .map_err(|e| EngineError::InvalidResponse {
                service: SERVICE,
                reason: format!("instruction data: {}", e),
            })?;
        Ok(Instruction {
            program_id: parse_address("programId", &self.program_id)?,
            accounts,
            data,
        })
    }
}

impl WireSwapInstructions {
    fn into_instructions(self) -> EngineResult<SwapInstructions> {
        let convert = |list: Vec<WireInstruction>| {
            list.into_iter()
                .map(WireInstruction::into_instruction)
                .collect::<EngineResult<Vec<_>>>()
        };
        Ok(SwapInstructions {
            compute_budget: convert(self.compute_budget_instructions)?,
            setup: convert(self.setup_instructions)?,
            swap: vec![self.swap_instruction.into_instruction()?],
            cleanup: convert(self.cleanup_instruction.into_iter().collect())?,
            lookup_tables: self
                .address_lookup_table_addresses
                .iter()
                .map(|a| parse_address("addressLookupTableAddresses", a))
                .collect::<EngineResult<Vec<_>>>()?,
        })
    }
}

// ---------------------------------------------------------------------------
// HTTP Aggregator
// ---------------------------------------------------------------------------

/// [`SwapAggregator`] over the aggregator's REST API.
pub struct HttpSwapAggregator {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSwapAggregator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("http client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Passes the response through unless it is a refusal; see
    /// [`client_rejection`].
    async fn reject_client_error(
        response: reqwest::Response,
        input: &Address,
        output: &Address,
    ) -> EngineResult<reqwest::Response> {
        let status = response.status();
        if !is_refusal(status) {
            return Ok(response);
        }
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        Err(client_rejection(status, &body, input, output))
    }
}

/// A 4xx other than 429 means the service understood and said no.
fn is_refusal(status: reqwest::StatusCode) -> bool {
    status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS
}

/// The aggregator's refusal for a pair, as [`EngineError::NoRoute`] so the
/// flows can skip that one asset.
fn client_rejection(
    status: reqwest::StatusCode,
    body: &serde_json::Value,
    input: &Address,
    output: &Address,
) -> EngineError {
    let reason = body
        .get("error")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .unwrap_or_else(|| status.to_string());
    EngineError::NoRoute {
        input: *input,
        output: *output,
        reason,
    }
}

#[async_trait]
impl SwapAggregator for HttpSwapAggregator {
    async fn quote(
        &self,
        input: &Address,
        output: &Address,
        amount: u64,
        slippage_bps: u16,
    ) -> EngineResult<AggregatorQuote> {
        let response = self
            .http
            .get(format!("{}/quote", self.base_url))
            .query(&[
                ("inputMint", input.to_string()),
                ("outputMint", output.to_string()),
                ("amount", amount.to_string()),
                ("slippageBps", slippage_bps.to_string()),
            ])
            .send()
            .await
            .map_err(|e| EngineError::from_http("quote", SERVICE, e))?;
        let raw: serde_json::Value = Self::reject_client_error(response, input, output)
            .await?
            .error_for_status()
            .map_err(|e| EngineError::from_http("quote", SERVICE, e))?
            .json()
            .await
            .map_err(|e| EngineError::from_http("quote", SERVICE, e))?;

        let wire: WireQuote =
            serde_json::from_value(raw.clone()).map_err(|e| EngineError::InvalidResponse {
                service: SERVICE,
                reason: format!("quote: {}", e),
            })?;
        Ok(AggregatorQuote {
            input_mint: *input,
            output_mint: *output,
            in_amount: parse_amount("inAmount", &wire.in_amount)?,
            out_amount: parse_amount("outAmount", &wire.out_amount)?,
            other_amount_threshold: parse_amount(
                "otherAmountThreshold",
                &wire.other_amount_threshold,
            )?,
            price_impact_pct: wire
                .price_impact_pct
                .and_then(|p| p.parse().ok())
                .unwrap_or(0.0),
            raw,
        })
    }

    async fn swap_instructions(
        &self,
        quote: &AggregatorQuote,
        payer: &Address,
        destination: &Address,
    ) -> EngineResult<SwapInstructions> {
        let body = json!({
            "quoteResponse": quote.raw,
            "userPublicKey": payer.to_string(),
            "destinationTokenAccount": destination.to_string(),
            "wrapAndUnwrapSol": false,
            "dynamicComputeUnitLimit": true,
        });
        let response = self
            .http
            .post(format!("{}/swap-instructions", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::from_http("swap instructions", SERVICE, e))?;
        let wire: WireSwapInstructions =
            Self::reject_client_error(response, &quote.input_mint, &quote.output_mint)
                .await?
                .error_for_status()
                .map_err(|e| EngineError::from_http("swap instructions", SERVICE, e))?
                .json()
                .await
                .map_err(|e| EngineError::from_http("swap instructions", SERVICE, e))?;
        wire.into_instructions()
    }
}

// ---------------------------------------------------------------------------
// Quote Client
// ---------------------------------------------------------------------------

/// A quoted route with its validity window.
#[derive(Debug, Clone, Serialize)]
pub struct SwapRoute {
    pub input_mint: Address,
    pub output_mint: Address,
    pub in_amount: u64,
    pub out_amount: u64,
    pub min_out_amount: u64,
    pub price_impact_pct: f64,
    pub slippage_bps: u16,
    #[serde(skip)]
    pub quote: AggregatorQuote,
    #[serde(skip)]
    pub fetched_at: Instant,
    #[serde(skip)]
    pub valid_until: Instant,
}

impl SwapRoute {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.valid_until
    }
}

/// Quotes, freshness checks, and instruction building, with retries.
pub struct SwapQuoteClient {
    aggregator: Arc<dyn SwapAggregator>,
    slippage_bps: u16,
    ttl: Duration,
    retry: RetryPolicy,
}

impl SwapQuoteClient {
    pub fn new(
        aggregator: Arc<dyn SwapAggregator>,
        slippage_bps: u16,
        ttl: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            aggregator,
            slippage_bps,
            ttl,
            retry,
        }
    }

    pub fn slippage_bps(&self) -> u16 {
        self.slippage_bps
    }

    /// Quotes `amount` of `input` into `output`. "No route" is returned
    /// immediately; transport failures are retried.
    pub async fn quote(&self, input: &Address, output: &Address, amount: u64) -> EngineResult<SwapRoute> {
        if amount == 0 {
            return Err(EngineError::invariant("cannot quote a zero amount"));
        }
        if input == output {
            return Err(EngineError::invariant(format!("cannot swap {} into itself", input)));
        }

        let quote = retry(&self.retry, "quote", || {
            self.aggregator.quote(input, output, amount, self.slippage_bps)
        })
        .await?;

        if quote.out_amount == 0 {
            return Err(EngineError::NoRoute {
                input: *input,
                output: *output,
                reason: "quoted output is zero".into(),
            });
        }

        let fetched_at = Instant::now();
        tracing::debug!(
            %input,
            %output,
            in_amount = quote.in_amount,
            out_amount = quote.out_amount,
            price_impact_pct = quote.price_impact_pct,
            "quote received"
        );
        Ok(SwapRoute {
            input_mint: *input,
            output_mint: *output,
            in_amount: quote.in_amount,
            out_amount: quote.out_amount,
            min_out_amount: quote.other_amount_threshold,
            price_impact_pct: quote.price_impact_pct,
            slippage_bps: self.slippage_bps,
            quote,
            fetched_at,
            valid_until: fetched_at + self.ttl,
        })
    }

    /// Fails with [`EngineError::QuoteExpired`] once the route is past its
    /// validity window.
    pub fn ensure_fresh(&self, route: &SwapRoute) -> EngineResult<()> {
        let now = Instant::now();
        if route.is_fresh(now) {
            return Ok(());
        }
        Err(EngineError::QuoteExpired {
            input: route.input_mint,
            output: route.output_mint,
            age_ms: now.duration_since(route.fetched_at).as_millis() as u64,
        })
    }

    /// Returns `route` unchanged if still fresh, otherwise a new quote for
    /// the same input amount.
    pub async fn refresh(&self, route: SwapRoute) -> EngineResult<SwapRoute> {
        if route.is_fresh(Instant::now()) {
            return Ok(route);
        }
        tracing::info!(
            input = %route.input_mint,
            output = %route.output_mint,
            "quote expired, re-quoting"
        );
        self.quote(&route.input_mint, &route.output_mint, route.in_amount)
            .await
    }

    /// Instructions that swap along `route`, paying out into `destination`.
    pub async fn build_instructions(
        &self,
        route: &SwapRoute,
        payer: &Address,
        destination: &Address,
    ) -> EngineResult<SwapInstructions> {
        self.ensure_fresh(route)?;
        retry(&self.retry, "swap instructions", || {
            self.aggregator
                .swap_instructions(&route.quote, payer, destination)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedAggregator {
        quotes: AtomicUsize,
        builds: AtomicUsize,
        transient_failures: usize,
        no_route: bool,
    }

    impl ScriptedAggregator {
        fn new() -> Self {
            Self {
                quotes: AtomicUsize::new(0),
                builds: AtomicUsize::new(0),
                transient_failures: 0,
                no_route: false,
            }
        }
    }

    #[async_trait]
    impl SwapAggregator for ScriptedAggregator {
        async fn quote(
            &self,
            input: &Address,
            output: &Address,
            amount: u64,
            _slippage_bps: u16,
        ) -> EngineResult<AggregatorQuote> {
            let n = self.quotes.fetch_add(1, Ordering::SeqCst);
            if self.no_route {
                return Err(EngineError::NoRoute {
                    input: *input,
                    output: *output,
                    reason: "Could not find any route".into(),
                });
            }
            if n < self.transient_failures {
                return Err(EngineError::transient("quote", "503"));
            }
            Ok(AggregatorQuote {
                input_mint: *input,
                output_mint: *output,
                in_amount: amount,
                out_amount: amount * 2,
                other_amount_threshold: amount * 2 * 98 / 100,
                price_impact_pct: 0.01,
                raw: json!({ "inAmount": amount.to_string() }),
            })
        }

        async fn swap_instructions(
            &self,
            _quote: &AggregatorQuote,
            _payer: &Address,
            _destination: &Address,
        ) -> EngineResult<SwapInstructions> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(SwapInstructions::default())
        }
    }

    fn mint(b: u8) -> Address {
        Address::new_from_array([b; 32])
    }

    fn client(agg: Arc<ScriptedAggregator>) -> SwapQuoteClient {
        SwapQuoteClient::new(agg, 200, Duration::from_secs(8), RetryPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn transient_quote_failures_are_retried() {
        let agg = Arc::new(ScriptedAggregator {
            transient_failures: 2,
            ..ScriptedAggregator::new()
        });
        let route = client(agg.clone()).quote(&mint(1), &mint(2), 1_000).await.unwrap();
        assert_eq!(agg.quotes.load(Ordering::SeqCst), 3);
        assert_eq!(route.out_amount, 2_000);
        assert_eq!(route.min_out_amount, 1_960);
    }

    #[tokio::test]
    async fn no_route_is_not_retried() {
        let agg = Arc::new(ScriptedAggregator {
            no_route: true,
            ..ScriptedAggregator::new()
        });
        let err = client(agg.clone()).quote(&mint(1), &mint(2), 1_000).await.unwrap_err();
        assert!(matches!(err, EngineError::NoRoute { .. }));
        assert!(err.is_per_asset());
        assert_eq!(agg.quotes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_route_is_never_built() {
        let agg = Arc::new(ScriptedAggregator::new());
        let client = client(agg.clone());
        let route = client.quote(&mint(1), &mint(2), 1_000).await.unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        let err = client
            .build_instructions(&route, &mint(3), &mint(4))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::QuoteExpired { age_ms, .. } if age_ms >= 9_000));
        assert_eq!(agg.builds.load(Ordering::SeqCst), 0);

        let fresh = client.refresh(route).await.unwrap();
        assert_eq!(agg.quotes.load(Ordering::SeqCst), 2);
        client.build_instructions(&fresh, &mint(3), &mint(4)).await.unwrap();
        assert_eq!(agg.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_route_is_not_requoted() {
        let agg = Arc::new(ScriptedAggregator::new());
        let client = client(agg.clone());
        let route = client.quote(&mint(1), &mint(2), 1_000).await.unwrap();
        client.refresh(route).await.unwrap();
        assert_eq!(agg.quotes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_amount_is_rejected_before_any_call() {
        let agg = Arc::new(ScriptedAggregator::new());
        let err = client(agg.clone()).quote(&mint(1), &mint(2), 0).await.unwrap_err();
        assert!(matches!(err, EngineError::InvariantViolation(_)));
        assert_eq!(agg.quotes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn compute_budget_stays_in_front_of_funding() {
        let ix = |b: u8| Instruction {
            program_id: mint(b),
            accounts: vec![],
            data: vec![],
        };
        let set = SwapInstructions {
            compute_budget: vec![ix(1)],
            setup: vec![ix(3)],
            swap: vec![ix(4)],
            cleanup: vec![ix(5)],
            lookup_tables: vec![],
        };
        let order: Vec<u8> = set
            .assemble(vec![ix(2)])
            .iter()
            .map(|i| i.program_id.as_bytes()[0])
            .collect();
        assert_eq!(order, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn refusals_become_no_route() {
        use reqwest::StatusCode;

        assert!(is_refusal(StatusCode::BAD_REQUEST));
        assert!(is_refusal(StatusCode::NOT_FOUND));
        assert!(!is_refusal(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_refusal(StatusCode::BAD_GATEWAY));
        assert!(!is_refusal(StatusCode::OK));

        let body = json!({ "error": "Route not found", "errorCode": "ROUTE_PLAN_DOES_NOT_CONSUME_ALL_THE_AMOUNT" });
        let err = client_rejection(StatusCode::BAD_REQUEST, &body, &mint(1), &mint(2));
        assert!(matches!(&err, EngineError::NoRoute { reason, .. } if reason == "Route not found"));
        assert!(err.is_per_asset());

        let bare = client_rejection(StatusCode::UNPROCESSABLE_ENTITY, &serde_json::Value::Null, &mint(1), &mint(2));
        assert!(matches!(bare, EngineError::NoRoute { reason, .. } if reason.contains("422")));
    }

    #[test]
    fn wire_instructions_decode() {
        let raw = json!({
            "computeBudgetInstructions": [{
                "programId": "ComputeBudget111111111111111111111111111111",
                "accounts": [],
                "data": "AsBcFQA="
            }],
            "setupInstructions": [],
            "swapInstruction": {
                "programId": "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4",
                "accounts": [{
                    "pubkey": "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA",
                    "isSigner": false,
                    "isWritable": false
                }],
                "data": "AQID"
            },
            "cleanupInstruction": null,
            "addressLookupTableAddresses": ["AddressLookupTab1e1111111111111111111111111"]
        });
        let wire: WireSwapInstructions = serde_json::from_value(raw).unwrap();
        let set = wire.into_instructions().unwrap();
        assert_eq!(set.compute_budget.len(), 1);
        assert_eq!(set.swap[0].data, vec![1, 2, 3]);
        assert!(set.cleanup.is_empty());
        assert_eq!(set.lookup_tables.len(), 1);
    }
}
