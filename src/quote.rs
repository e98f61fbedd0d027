// src/quote.rs
use crate::error::{FinanceError, Result};
use crate::models::Quote;
use async_trait::async_trait;
use log::{debug, error};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::RwLock;

pub const ALPHA_VANTAGE_URL: &str = "https://www.alphavantage.co/query";

/// Point-in-time price lookup. Every failure, whether an unknown ticker or an
/// unreachable provider, is reported as `None`.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn lookup(&self, symbol: &str) -> Option<Quote>;
}

fn normalize(symbol: &str) -> Option<String> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() {
        None
    } else {
        Some(symbol)
    }
}

#[derive(Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
}

#[derive(Deserialize)]
struct GlobalQuote {
    #[serde(rename = "01. symbol")]
    symbol: Option<String>,
    #[serde(rename = "05. price")]
    price: Option<String>,
}

#[derive(Deserialize)]
struct SymbolSearchResponse {
    #[serde(rename = "bestMatches", default)]
    best_matches: Vec<SymbolMatch>,
}

#[derive(Deserialize)]
struct SymbolMatch {
    #[serde(rename = "1. symbol")]
    symbol: String,
    #[serde(rename = "2. name")]
    name: String,
}

/// Symbol and price from a `GLOBAL_QUOTE` body. Unknown tickers come back as
/// an empty object and rate-limit notices have no quote at all.
fn parse_global_quote(body: &str) -> Option<(String, Decimal)> {
    let response: GlobalQuoteResponse = serde_json::from_str(body).ok()?;
    let quote = response.global_quote?;
    let price = Decimal::from_str(quote.price?.trim()).ok()?;
    if price <= Decimal::ZERO {
        return None;
    }
    Some((quote.symbol?, price))
}

fn parse_company_name(body: &str, symbol: &str) -> Option<String> {
    let response: SymbolSearchResponse = serde_json::from_str(body).ok()?;
    response
        .best_matches
        .into_iter()
        .find(|m| m.symbol.eq_ignore_ascii_case(symbol))
        .map(|m| m.name)
}

pub struct AlphaVantageQuotes {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AlphaVantageQuotes {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn query(&self, function: &str, param: &str, value: &str) -> reqwest::Result<String> {
        self.client
            .get(&self.base_url)
            .query(&[("function", function), (param, value), ("apikey", self.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

#[async_trait]
impl QuoteProvider for AlphaVantageQuotes {
    async fn lookup(&self, symbol: &str) -> Option<Quote> {
        let symbol = normalize(symbol)?;
        let body = match self.query("GLOBAL_QUOTE", "symbol", &symbol).await {
            Ok(body) => body,
            Err(e) => {
                error!("Quote request for {} failed: {}", symbol, e);
                return None;
            }
        };
        let (symbol, price) = parse_global_quote(&body)?;

        let name = match self.query("SYMBOL_SEARCH", "keywords", &symbol).await {
            Ok(body) => parse_company_name(&body, &symbol),
            Err(e) => {
                error!("Symbol search for {} failed: {}", symbol, e);
                None
            }
        };
        debug!("Quoted {} at {}.", symbol, price);
        Some(Quote {
            name: name.unwrap_or_else(|| symbol.clone()),
            symbol,
            price,
        })
    }
}

/// Quotes served from memory, keyed by upper-case symbol.
#[derive(Default)]
pub struct FixedQuotes {
    quotes: RwLock<HashMap<String, Quote>>,
}

impl FixedQuotes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `SYM=PRICE` pairs separated by commas, e.g. `NFLX=50,AAPL=180.25`.
    pub fn parse(table: &str) -> Result<Self> {
        let mut quotes = HashMap::new();
        for entry in table.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (symbol, price) = entry
                .split_once('=')
                .ok_or_else(|| FinanceError::invalid(format!("bad quote entry {:?}", entry)))?;
            let symbol = normalize(symbol)
                .ok_or_else(|| FinanceError::invalid(format!("bad quote entry {:?}", entry)))?;
            let price = Decimal::from_str(price.trim())
                .map_err(|_| FinanceError::invalid(format!("bad quote price {:?}", entry)))?;
            quotes.insert(
                symbol.clone(),
                Quote {
                    name: symbol.clone(),
                    symbol,
                    price,
                },
            );
        }
        Ok(Self {
            quotes: RwLock::new(quotes),
        })
    }

    pub async fn set(&self, symbol: &str, name: &str, price: Decimal) {
        if let Some(symbol) = normalize(symbol) {
            let quote = Quote {
                symbol: symbol.clone(),
                name: name.to_string(),
                price,
            };
            self.quotes.write().await.insert(symbol, quote);
        }
    }
}

#[async_trait]
impl QuoteProvider for FixedQuotes {
    async fn lookup(&self, symbol: &str) -> Option<Quote> {
        let symbol = normalize(symbol)?;
        self.quotes.read().await.get(&symbol).cloned()
    }
}
