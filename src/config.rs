// src/config.rs
use clap::Parser;
use rust_decimal::Decimal;
use std::net::SocketAddr;

use crate::quote::ALPHA_VANTAGE_URL;

#[derive(Parser, Debug, Clone)]
#[command(name = "stock_ledger")]
#[command(about = "Paper-trading stock ledger served over HTTP")]
pub struct Config {
    /// Address the HTTP server listens on.
    #[arg(long, env = "FINANCE_BIND", default_value = "127.0.0.1:3030")]
    pub bind: SocketAddr,

    /// SQLite database file.
    #[arg(long, env = "FINANCE_DATABASE", default_value = "finance.db")]
    pub database: String,

    /// Alpha Vantage API key used for live quotes.
    #[arg(long, env = "ALPHAVANTAGE_API_KEY")]
    pub api_key: Option<String>,

    #[arg(long, env = "FINANCE_QUOTE_URL", default_value = ALPHA_VANTAGE_URL)]
    pub quote_url: String,

    /// Offline quotes as `SYM=PRICE,...`; takes precedence over the API key.
    #[arg(long, env = "FINANCE_FIXED_QUOTES")]
    pub fixed_quotes: Option<String>,

    /// HMAC secret for session cookies.
    #[arg(long, env = "FINANCE_SESSION_SECRET", hide_env_values = true)]
    pub session_secret: String,

    #[arg(long, env = "FINANCE_SESSION_HOURS", default_value = "24")]
    pub session_hours: i64,

    /// Cash credited to every new account.
    #[arg(long, env = "FINANCE_STARTING_CASH", default_value = "10000.00")]
    pub starting_cash: Decimal,

    #[arg(long, env = "FINANCE_BCRYPT_COST", default_value_t = bcrypt::DEFAULT_COST)]
    pub bcrypt_cost: u32,

    /// env_logger filter, e.g. `info` or `stock_ledger=debug`.
    #[arg(long, env = "FINANCE_LOG", default_value = "info")]
    pub log_level: String,
}
