//! # Price Oracle
//!
//! USD prices and decimal precision for every asset a vault holds.
//!
//! ## Prices
//!
//! All mints of a request go out in one batched call (comma-joined ids).
//! Answers are cached per mint for a short TTL so that a flow which valuates
//! twice sees the same snapshot. When the feed stays down after retries the
//! oracle does not fail: the affected mints come back with price 0 and
//! [`PriceSource::Unresolved`], which the valuation turns into a warning.
//! "Unknown" and "worthless" are never confused.
//!
//! The configured stablecoin is pinned at exactly 1.000000 USD and never
//! requested from the feed.
//!
//! ## Decimals
//!
//! A static table of well-known mints answers first. Anything else costs one
//! on-chain mint read, after which the answer is cached for the process
//! lifetime. Decimals never change, so the cache is write-once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::{USD_DECIMALS, USD_SCALE};
use crate::error::{EngineError, EngineResult};
use crate::ledger::accounts::Mint;
use crate::ledger::{Address, LedgerClient};
use crate::retry::{retry, RetryPolicy};

/// Most ids the price endpoint accepts per request.
pub const MAX_IDS_PER_REQUEST: usize = 50;

/// Well-known mints and their decimals.
pub const KNOWN_DECIMALS: &[(&str, u8)] = &[
    ("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", 6), // USDC
    ("Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB", 6), // USDT
    ("So11111111111111111111111111111111111111112", 9),  // wrapped SOL
    ("mSoLzYCxHdYgdzU16g5QSh3i5K3z3KZK7ytfqcJm7So", 9),  // mSOL
    ("J1toso1uCk3RLmjorhTtrVwY9HJ7X8V9yYac6Y7kGCPn", 9), // jitoSOL
    ("JUPyiwrYJFskUPiHa7hkeR8VUtAeFoSYbKedZNsDvCN", 6),  // JUP
    ("DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263", 5), // BONK
    ("4k3Dyjzvzp8eMZWUXbBCjEvwSkkk59S5iCNLY3QrkX6R", 6), // RAY
    ("7vfCXTUXx5WJV5JADk17DUJ4ksgau7utNKj4b963voxs", 8), // WETH (Wormhole)
];

// ---------------------------------------------------------------------------
// Price Types
// ---------------------------------------------------------------------------

/// Where a price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    /// Fresh from the feed.
    Feed,
    /// Served from the in-memory cache.
    Cache,
    /// The vault's stablecoin, pinned at 1 USD.
    Pinned,
    /// The feed did not answer for this mint. The price is 0.
    Unresolved,
}

/// A USD price in 6-decimal fixed point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AssetPrice {
    pub mint: Address,
    /// Micro-USD per whole token.
    pub usd_price: u64,
    /// Percent change over 24 hours, if the feed reported it.
    pub price_change_24h: Option<f64>,
    pub source: PriceSource,
}

impl AssetPrice {
    pub fn is_resolved(&self) -> bool {
        self.source != PriceSource::Unresolved
    }

    fn unresolved(mint: Address) -> Self {
        Self {
            mint,
            usd_price: 0,
            price_change_24h: None,
            source: PriceSource::Unresolved,
        }
    }
}

/// One entry of a feed response.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedQuote {
    pub usd_price: f64,
    #[serde(default)]
    pub price_change_24h: Option<f64>,
}

/// Converts a float USD price to micro-USD. Non-finite or negative prices
/// are treated as missing.
pub fn usd_to_micros(usd: f64) -> Option<u64> {
    if !usd.is_finite() || usd < 0.0 {
        return None;
    }
    let micros = (usd * USD_SCALE as f64).round();
    (micros <= u64::MAX as f64).then_some(micros as u64)
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

/// A batched USD price source.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Prices for `mints`. Mints the feed does not know are simply absent.
    async fn fetch(&self, mints: &[Address]) -> EngineResult<HashMap<Address, FeedQuote>>;
}

/// `GET {url}?ids=a,b,c` returning `{ "<mint>": { "usdPrice": .., "priceChange24h": .. } }`.
pub struct HttpPriceFeed {
    http: reqwest::Client,
    url: String,
}

impl HttpPriceFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("http client: {}", e)))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    async fn fetch(&self, mints: &[Address]) -> EngineResult<HashMap<Address, FeedQuote>> {
        let ids = mints
            .iter()
            .map(Address::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let raw: HashMap<String, Option<FeedQuote>> = self
            .http
            .get(&self.url)
            .query(&[("ids", ids)])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EngineError::from_http("price fetch", "price feed", e))?
            .json()
            .await
            .map_err(|e| EngineError::from_http("price fetch", "price feed", e))?;

        let mut out = HashMap::with_capacity(raw.len());
        for (id, quote) in raw {
            let (Ok(mint), Some(quote)) = (id.parse::<Address>(), quote) else {
                continue;
            };
            out.insert(mint, quote);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

/// Cached, degrading price and decimals lookup.
pub struct PriceOracle {
    feed: Arc<dyn PriceFeed>,
    ledger: Arc<dyn LedgerClient>,
    stablecoin_mint: Address,
    retry: RetryPolicy,
    ttl: Duration,
    prices: DashMap<Address, (AssetPrice, Instant)>,
    decimals: DashMap<Address, u8>,
}

impl PriceOracle {
    pub fn new(
        feed: Arc<dyn PriceFeed>,
        ledger: Arc<dyn LedgerClient>,
        stablecoin_mint: Address,
        retry: RetryPolicy,
        ttl: Duration,
    ) -> Self {
        Self {
            feed,
            ledger,
            stablecoin_mint,
            retry,
            ttl,
            prices: DashMap::new(),
            decimals: DashMap::new(),
        }
    }

    fn cached(&self, mint: &Address, now: Instant) -> Option<AssetPrice> {
        let entry = self.prices.get(mint)?;
        let (price, fetched_at) = *entry;
        (now.duration_since(fetched_at) < self.ttl).then_some(AssetPrice {
            source: PriceSource::Cache,
            ..price
        })
    }

    /// Prices for `mints`. Never fails: unresolvable mints get price 0 and
    /// [`PriceSource::Unresolved`].
    pub async fn get_prices(&self, mints: &[Address]) -> HashMap<Address, AssetPrice> {
        let mut out = HashMap::with_capacity(mints.len());
        if mints.is_empty() {
            return out;
        }

        let now = Instant::now();
        let mut to_fetch: Vec<Address> = Vec::new();
        for mint in mints {
            if out.contains_key(mint) || to_fetch.contains(mint) {
                continue;
            }
            if *mint == self.stablecoin_mint {
                out.insert(
                    *mint,
                    AssetPrice {
                        mint: *mint,
                        usd_price: USD_SCALE,
                        price_change_24h: Some(0.0),
                        source: PriceSource::Pinned,
                    },
                );
            } else if let Some(price) = self.cached(mint, now) {
                out.insert(*mint, price);
            } else {
                to_fetch.push(*mint);
            }
        }

        for batch in to_fetch.chunks(MAX_IDS_PER_REQUEST) {
            let fetched = retry(&self.retry, "price fetch", || self.feed.fetch(batch)).await;
            let quotes = match fetched {
                Ok(quotes) => quotes,
                Err(e) => {
                    tracing::warn!(mints = batch.len(), error = %e, "price feed unavailable, degrading to zero");
                    HashMap::new()
                }
            };

            for mint in batch {
                let price = quotes
                    .get(mint)
                    .and_then(|q| {
                        usd_to_micros(q.usd_price).map(|usd_price| AssetPrice {
                            mint: *mint,
                            usd_price,
                            price_change_24h: q.price_change_24h,
                            source: PriceSource::Feed,
                        })
                    })
                    .unwrap_or_else(|| AssetPrice::unresolved(*mint));

                if price.is_resolved() {
                    self.prices.insert(*mint, (price, Instant::now()));
                } else {
                    tracing::warn!(%mint, "no price for asset");
                }
                out.insert(*mint, price);
            }
        }

        tracing::debug!(
            requested = mints.len(),
            resolved = out.values().filter(|p| p.is_resolved()).count(),
            "prices loaded"
        );
        out
    }

    /// Decimal precision of `mint`.
    pub async fn decimals(&self, mint: &Address) -> EngineResult<u8> {
        if *mint == self.stablecoin_mint {
            return Ok(USD_DECIMALS);
        }
        if let Some(known) = known_decimals(mint) {
            return Ok(known);
        }
        if let Some(cached) = self.decimals.get(mint) {
            return Ok(*cached);
        }

        let account = retry(&self.retry, "mint read", || self.ledger.get_account(mint))
            .await?
            .ok_or(EngineError::AccountNotFound {
                kind: "mint",
                address: *mint,
            })?;
        let decimals = Mint::decode(mint, &account.data)?.decimals;
        Ok(*self.decimals.entry(*mint).or_insert(decimals))
    }
}

/// Looks `mint` up in [`KNOWN_DECIMALS`].
pub fn known_decimals(mint: &Address) -> Option<u8> {
    let rendered = mint.to_string();
    KNOWN_DECIMALS
        .iter()
        .find(|(id, _)| *id == rendered)
        .map(|(_, d)| *d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::client::AccountData;
    use crate::ledger::{Instruction, Keypair};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFeed {
        calls: AtomicUsize,
        fail: bool,
        prices: HashMap<Address, f64>,
    }

    #[async_trait]
    impl PriceFeed for CountingFeed {
        async fn fetch(&self, mints: &[Address]) -> EngineResult<HashMap<Address, FeedQuote>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EngineError::transient("price fetch", "connection reset"));
            }
            Ok(mints
                .iter()
                .filter_map(|m| {
                    self.prices.get(m).map(|p| {
                        (
                            *m,
                            FeedQuote {
                                usd_price: *p,
                                price_change_24h: Some(1.5),
                            },
                        )
                    })
                })
                .collect())
        }
    }

    struct MintLedger {
        reads: AtomicUsize,
    }

    #[async_trait]
    impl LedgerClient for MintLedger {
        async fn get_account(&self, _address: &Address) -> EngineResult<Option<AccountData>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(Some(AccountData {
                owner: Address::default(),
                lamports: 0,
                data: Mint {
                    supply: 1,
                    decimals: 8,
                }
                .encode(),
            }))
        }

        async fn submit(&self, _: &Keypair, _: Vec<Instruction>, _: Vec<Address>) -> EngineResult<String> {
            unreachable!("oracle never submits")
        }
    }

    fn mint(b: u8) -> Address {
        Address::new_from_array([b; 32])
    }

    fn oracle(feed: CountingFeed) -> (PriceOracle, Arc<CountingFeed>, Arc<MintLedger>) {
        let feed = Arc::new(feed);
        let ledger = Arc::new(MintLedger {
            reads: AtomicUsize::new(0),
        });
        let oracle = PriceOracle::new(
            feed.clone(),
            ledger.clone(),
            mint(99),
            RetryPolicy::default(),
            Duration::from_secs(30),
        );
        (oracle, feed, ledger)
    }

    fn feed_with(prices: &[(u8, f64)], fail: bool) -> CountingFeed {
        CountingFeed {
            calls: AtomicUsize::new(0),
            fail,
            prices: prices.iter().map(|(b, p)| (mint(*b), *p)).collect(),
        }
    }

    #[tokio::test]
    async fn empty_input_makes_no_call() {
        let (oracle, feed, _) = oracle(feed_with(&[], false));
        assert!(oracle.get_prices(&[]).await.is_empty());
        assert_eq!(feed.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batch_is_one_call_and_duplicates_collapse() {
        let (oracle, feed, _) = oracle(feed_with(&[(1, 147.25), (2, 0.5)], false));
        let prices = oracle.get_prices(&[mint(1), mint(2), mint(1)]).await;

        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
        assert_eq!(prices[&mint(1)].usd_price, 147_250_000);
        assert_eq!(prices[&mint(2)].usd_price, 500_000);
        assert_eq!(prices[&mint(1)].source, PriceSource::Feed);
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let (oracle, feed, _) = oracle(feed_with(&[(1, 2.0)], false));
        oracle.get_prices(&[mint(1)]).await;
        let again = oracle.get_prices(&[mint(1)]).await;

        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);
        assert_eq!(again[&mint(1)].source, PriceSource::Cache);
        assert_eq!(again[&mint(1)].usd_price, 2_000_000);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_expires_after_ttl() {
        let (oracle, feed, _) = oracle(feed_with(&[(1, 2.0)], false));
        oracle.get_prices(&[mint(1)]).await;
        tokio::time::advance(Duration::from_secs(31)).await;
        oracle.get_prices(&[mint(1)]).await;
        assert_eq!(feed.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn feed_outage_degrades_to_unresolved_zero() {
        let (oracle, feed, _) = oracle(feed_with(&[], true));
        let prices = oracle.get_prices(&[mint(1), mint(99)]).await;

        // Retried per policy, then degraded.
        assert_eq!(feed.calls.load(Ordering::SeqCst), 3);
        assert_eq!(prices[&mint(1)].usd_price, 0);
        assert!(!prices[&mint(1)].is_resolved());
        // Stablecoin never depends on the feed.
        assert_eq!(prices[&mint(99)].usd_price, USD_SCALE);
    }

    #[tokio::test]
    async fn unknown_mint_is_unresolved_not_zero_priced() {
        let (oracle, _, _) = oracle(feed_with(&[(1, 0.0)], false));
        let prices = oracle.get_prices(&[mint(1), mint(2)]).await;
        assert!(prices[&mint(1)].is_resolved());
        assert_eq!(prices[&mint(1)].usd_price, 0);
        assert!(!prices[&mint(2)].is_resolved());
    }

    #[tokio::test]
    async fn decimals_table_then_single_chain_read() {
        let (oracle, _, ledger) = oracle(feed_with(&[], false));
        let usdt: Address = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB".parse().unwrap();
        assert_eq!(oracle.decimals(&usdt).await.unwrap(), 6);
        assert_eq!(ledger.reads.load(Ordering::SeqCst), 0);

        assert_eq!(oracle.decimals(&mint(7)).await.unwrap(), 8);
        assert_eq!(oracle.decimals(&mint(7)).await.unwrap(), 8);
        assert_eq!(ledger.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn known_table_parses() {
        for (id, _) in KNOWN_DECIMALS {
            assert!(id.parse::<Address>().is_ok(), "{}", id);
        }
    }

    #[test]
    fn float_conversion_rounds_and_rejects_garbage() {
        assert_eq!(usd_to_micros(1.0000005), Some(1_000_001));
        assert_eq!(usd_to_micros(0.0), Some(0));
        assert_eq!(usd_to_micros(-1.0), None);
        assert_eq!(usd_to_micros(f64::NAN), None);
    }
}
