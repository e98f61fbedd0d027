// src/main.rs
use clap::Parser;
use env_logger::Builder;
use log::{error, info, warn};
use reqwest::Client;
use std::sync::Arc;

use stock_ledger::api::{self, App};
use stock_ledger::auth::{Accounts, SessionKeys};
use stock_ledger::config::Config;
use stock_ledger::db::Store;
use stock_ledger::quote::{AlphaVantageQuotes, FixedQuotes, QuoteProvider};

fn quote_provider(config: &Config) -> Result<Arc<dyn QuoteProvider>, String> {
    if let Some(table) = &config.fixed_quotes {
        let quotes = FixedQuotes::parse(table).map_err(|e| e.to_string())?;
        warn!("Serving fixed quotes; prices will not move.");
        return Ok(Arc::new(quotes));
    }
    match &config.api_key {
        Some(key) => Ok(Arc::new(AlphaVantageQuotes::new(
            Client::new(),
            config.quote_url.clone(),
            key.clone(),
        ))),
        None => Err("set ALPHAVANTAGE_API_KEY or FINANCE_FIXED_QUOTES".to_string()),
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let config = Config::parse();

    Builder::new()
        .parse_filters(&config.log_level)
        .format_timestamp_secs()
        .init();

    let quotes = match quote_provider(&config) {
        Ok(quotes) => quotes,
        Err(e) => {
            error!("No quote source configured: {}", e);
            return;
        }
    };

    let store = match Store::open(&config.database) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };

    let accounts = match Accounts::new(store.clone(), config.bcrypt_cost, config.starting_cash) {
        Ok(accounts) => accounts,
        Err(e) => {
            error!("Failed to set up accounts: {}", e);
            return;
        }
    };

    let app = Arc::new(App {
        store,
        accounts,
        quotes,
        sessions: SessionKeys::new(config.session_secret.clone(), config.session_hours),
    });

    info!("Starting the stock ledger on http://{}", config.bind);
    warp::serve(api::routes(app)).run(config.bind).await;
}
