//! HTTP price/volume feed.
//!
//! Talks to a JSON price endpoint of the shape
//! `GET {base}/price?ids=SOL` →
//! `{ "data": { "SOL": { "price": "151.2", "volume24h": 1.2e9 } } }`.
//! Prices may arrive as strings (full precision) or numbers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use super::MarketFeed;
use crate::types::CascadeError;

fn feed_error(message: String) -> anyhow::Error {
    CascadeError::Feed {
        feed: "http".to_string(),
        message,
    }
    .into()
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    data: HashMap<String, TokenQuote>,
}

#[derive(Debug, Deserialize)]
struct TokenQuote {
    price: serde_json::Value,
    #[serde(default, rename = "volume24h")]
    volume_24h: Option<f64>,
}

impl PriceResponse {
    fn take(mut self, symbol: &str) -> Result<TokenQuote> {
        self.data
            .remove(symbol)
            .ok_or_else(|| feed_error(format!("no quote for {symbol} in response")))
    }
}

impl TokenQuote {
    fn price(&self) -> Option<f64> {
        match &self.price {
            serde_json::Value::String(s) => s.parse().ok(),
            serde_json::Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }
}

pub struct HttpPriceFeed {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpPriceFeed {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .user_agent("CASCADE/0.1.0")
            .build()
            .context("Failed to build price feed HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn fetch_quote(&self, asset: &str) -> Result<TokenQuote> {
        let symbol = asset.to_uppercase();
        let url = format!("{}/price", self.base_url);

        let mut request = self.http.get(&url).query(&[("ids", symbol.as_str())]);
        if let Some(ref key) = self.api_key {
            request = request.header("X-API-Key", key);
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("Price request failed for {symbol}"))?
            .error_for_status()
            .with_context(|| format!("Price endpoint returned error for {symbol}"))?;

        let body: PriceResponse = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse price response for {symbol}"))?;

        debug!(asset = %symbol, "Price quote fetched");
        body.take(&symbol)
    }
}

#[async_trait]
impl MarketFeed for HttpPriceFeed {
    async fn fetch_price(&self, asset: &str) -> Result<f64> {
        self.fetch_quote(asset)
            .await?
            .price()
            .ok_or_else(|| feed_error(format!("unparseable price for {asset}")))
    }

    async fn fetch_volume_24h(&self, asset: &str) -> Result<f64> {
        self.fetch_quote(asset)
            .await?
            .volume_24h
            .ok_or_else(|| feed_error(format!("no 24h volume for {asset}")))
    }

    fn name(&self) -> &str {
        "http"
    }
}
