//! USD price lookups for reserve assets.
//!
//! Prices are cached for the lifetime of the process once a lookup succeeds.
//! Failed lookups yield `0.0` and are retried on the next call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::OracleConfig;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("price request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("price response for `{symbol}` carried no USD quote")]
    MissingQuote { symbol: String },
    #[error("price source unavailable: {0}")]
    Unavailable(String),
}

/// Raw price feed without caching.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_usd_price(&self, symbol: &str) -> Result<f64, OracleError>;
}

#[derive(Debug, Deserialize)]
struct UsdQuote {
    #[serde(rename = "USD")]
    usd: Option<f64>,
}

/// Price feed backed by an HTTP endpoint answering `?fsym=SYM&tsyms=USD`
/// with `{"USD": <price>}`.
#[derive(Clone, Debug)]
pub struct HttpPriceSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPriceSource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &OracleConfig) -> Result<Self, OracleError> {
        Self::new(
            config.endpoint.clone(),
            Duration::from_millis(config.timeout_ms),
        )
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn fetch_usd_price(&self, symbol: &str) -> Result<f64, OracleError> {
        let quote: UsdQuote = self
            .client
            .get(&self.endpoint)
            .query(&[("fsym", symbol), ("tsyms", "USD")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        quote
            .usd
            .filter(|price| price.is_finite())
            .ok_or_else(|| OracleError::MissingQuote {
                symbol: symbol.to_string(),
            })
    }
}

/// Caching front for a [`PriceSource`].
pub struct PriceOracle {
    source: Arc<dyn PriceSource>,
    cache: Mutex<HashMap<String, f64>>,
}

impl PriceOracle {
    pub fn new(source: Arc<dyn PriceSource>) -> Self {
        Self {
            source,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn usd_price(&self, symbol: &str) -> f64 {
        if let Some(price) = self.cached(symbol) {
            return price;
        }
        match self.source.fetch_usd_price(symbol).await {
            Ok(price) => {
                let mut cache = self.cache.lock();
                let price = *cache.entry(symbol.to_string()).or_insert(price);
                debug!(symbol, price, "cached usd price");
                price
            }
            Err(error) => {
                warn!(symbol, %error, "usd price lookup failed");
                0.0
            }
        }
    }

    pub fn cached(&self, symbol: &str) -> Option<f64> {
        self.cache.lock().get(symbol).copied()
    }
}

/// Fixed prices for tests and offline runs. Symbols without a price fail.
#[derive(Default)]
pub struct StaticPriceSource {
    prices: Mutex<HashMap<String, f64>>,
    lookups: Mutex<Vec<String>>,
}

impl StaticPriceSource {
    pub fn new(prices: impl IntoIterator<Item = (&'static str, f64)>) -> Self {
        Self {
            prices: Mutex::new(
                prices
                    .into_iter()
                    .map(|(symbol, price)| (symbol.to_string(), price))
                    .collect(),
            ),
            lookups: Mutex::new(Vec::new()),
        }
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.prices.lock().insert(symbol.to_string(), price);
    }

    pub fn remove_price(&self, symbol: &str) {
        self.prices.lock().remove(symbol);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.lock().len()
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    async fn fetch_usd_price(&self, symbol: &str) -> Result<f64, OracleError> {
        self.lookups.lock().push(symbol.to_string());
        self.prices
            .lock()
            .get(symbol)
            .copied()
            .ok_or_else(|| OracleError::Unavailable(format!("no static price for {symbol}")))
    }
}
