// src/ledger.rs
//! Cash and share bookkeeping. `buy` and `sell` are the only operations that
//! move money; each validates and mutates inside one `Store::atomically`
//! unit so concurrent trades for the same user never commit on stale reads.

use crate::db::{decimal_at, Store};
use crate::error::{FinanceError, Result};
use crate::models::Transaction;
use chrono::{DateTime, Utc};
use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

impl Store {
    /// Debits `price * shares` from the user's cash and appends a purchase.
    pub async fn buy(
        &self,
        user_id: i64,
        symbol: &str,
        shares: i64,
        price: Decimal,
    ) -> Result<Transaction> {
        let cost = trade_value(symbol, shares, price)?;
        let result = self
            .atomically(|conn| {
                let cash = cash_of(conn, user_id)?;
                if cash < cost {
                    return Err(FinanceError::InsufficientFunds);
                }
                set_cash(conn, user_id, cash - cost)?;
                append(conn, user_id, symbol, shares, -cost)
            })
            .await;

        match &result {
            Ok(_) => info!(
                "User {} bought {} {} for {}.",
                user_id, shares, symbol, cost
            ),
            Err(e) => warn!("User {} buy of {} {} rejected: {}", user_id, shares, symbol, e),
        }
        result
    }

    /// Credits `price * shares` to the user's cash and appends a sale.
    pub async fn sell(
        &self,
        user_id: i64,
        symbol: &str,
        shares: i64,
        price: Decimal,
    ) -> Result<Transaction> {
        let proceeds = trade_value(symbol, shares, price)?;
        let result = self
            .atomically(|conn| {
                let cash = cash_of(conn, user_id)?;
                if held(conn, user_id, symbol)? < shares {
                    return Err(FinanceError::InsufficientShares);
                }
                let cash = cash
                    .checked_add(proceeds)
                    .ok_or_else(|| FinanceError::invalid("Transaction amount too large."))?;
                set_cash(conn, user_id, cash)?;
                append(conn, user_id, symbol, -shares, proceeds)
            })
            .await;

        match &result {
            Ok(_) => info!(
                "User {} sold {} {} for {}.",
                user_id, shares, symbol, proceeds
            ),
            Err(e) => warn!("User {} sale of {} {} rejected: {}", user_id, shares, symbol, e),
        }
        result
    }

    /// Net shares per symbol for the user, strictly positive positions only.
    pub async fn current_holdings(&self, user_id: i64) -> Result<BTreeMap<String, i64>> {
        self.read(|conn| {
            cash_of(conn, user_id)?;
            let mut stmt = conn.prepare(
                "SELECT symbol, SUM(shares) FROM transactions WHERE user_id = ?1
                 GROUP BY symbol HAVING SUM(shares) > 0 ORDER BY symbol",
            )?;
            let rows = stmt.query_map(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let holdings = rows.collect::<rusqlite::Result<BTreeMap<String, i64>>>()?;
            Ok(holdings)
        })
        .await
    }

    pub async fn current_cash(&self, user_id: i64) -> Result<Decimal> {
        self.read(|conn| cash_of(conn, user_id)).await
    }

    /// The user's transactions, oldest first.
    pub async fn history(&self, user_id: i64) -> Result<Vec<Transaction>> {
        self.read(|conn| {
            cash_of(conn, user_id)?;
            let mut stmt = conn.prepare(
                "SELECT id, user_id, symbol, shares, amount, time FROM transactions
                 WHERE user_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok(Transaction {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    symbol: row.get(2)?,
                    shares: row.get(3)?,
                    amount: decimal_at(row, 4)?,
                    time: row.get(5)?,
                })
            })?;
            let transactions = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(transactions)
        })
        .await
    }
}

/// Validates trade arguments and returns `price * shares`.
fn trade_value(symbol: &str, shares: i64, price: Decimal) -> Result<Decimal> {
    if symbol.trim().is_empty() {
        return Err(FinanceError::invalid("Please enter stock symbol."));
    }
    if shares < 1 {
        return Err(FinanceError::invalid("Share count must be at least 1."));
    }
    if price <= Decimal::ZERO {
        return Err(FinanceError::invalid("Price must be positive."));
    }
    price
        .checked_mul(Decimal::from(shares))
        .ok_or_else(|| FinanceError::invalid("Transaction amount too large."))
}

fn cash_of(conn: &Connection, user_id: i64) -> Result<Decimal> {
    conn.query_row(
        "SELECT cash FROM users WHERE id = ?1",
        params![user_id],
        |row| decimal_at(row, 0),
    )
    .optional()?
    .ok_or(FinanceError::UnknownUser(user_id))
}

fn held(conn: &Connection, user_id: i64, symbol: &str) -> Result<i64> {
    let shares = conn.query_row(
        "SELECT COALESCE(SUM(shares), 0) FROM transactions WHERE user_id = ?1 AND symbol = ?2",
        params![user_id, symbol],
        |row| row.get(0),
    )?;
    Ok(shares)
}

fn set_cash(conn: &Connection, user_id: i64, cash: Decimal) -> Result<()> {
    conn.execute(
        "UPDATE users SET cash = ?1 WHERE id = ?2",
        params![cash.to_string(), user_id],
    )?;
    Ok(())
}

fn append(
    conn: &Connection,
    user_id: i64,
    symbol: &str,
    shares: i64,
    amount: Decimal,
) -> Result<Transaction> {
    let time: DateTime<Utc> = Utc::now();
    conn.execute(
        "INSERT INTO transactions (user_id, symbol, shares, amount, time) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id, symbol, shares, amount.to_string(), time],
    )?;
    Ok(Transaction {
        id: conn.last_insert_rowid(),
        user_id,
        symbol: symbol.to_string(),
        shares,
        amount,
        time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn funded(cash: Decimal) -> (Store, i64) {
        let store = Store::open_in_memory().unwrap();
        let user = store.insert_user("trader", "hash", cash).await.unwrap();
        (store, user.id)
    }

    async fn snapshot(store: &Store, user_id: i64) -> (Decimal, BTreeMap<String, i64>) {
        (
            store.current_cash(user_id).await.unwrap(),
            store.current_holdings(user_id).await.unwrap(),
        )
    }

    #[tokio::test]
    async fn buy_debits_cash_and_records_purchase() {
        let (store, id) = funded(dec!(10000)).await;

        let tx = store.buy(id, "NFLX", 10, dec!(50)).await.unwrap();
        assert_eq!(tx.shares, 10);
        assert_eq!(tx.amount, dec!(-500));

        assert_eq!(store.current_cash(id).await.unwrap(), dec!(9500));
        assert_eq!(store.current_holdings(id).await.unwrap()["NFLX"], 10);
    }

    #[tokio::test]
    async fn buy_beyond_cash_changes_nothing() {
        let (store, id) = funded(dec!(100)).await;
        store.buy(id, "AAPL", 1, dec!(40)).await.unwrap();
        let before = snapshot(&store, id).await;

        let err = store.buy(id, "AAPL", 2, dec!(30.01)).await.unwrap_err();
        assert!(matches!(err, FinanceError::InsufficientFunds));
        assert_eq!(snapshot(&store, id).await, before);
        assert_eq!(store.history(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn buy_can_spend_exact_balance() {
        let (store, id) = funded(dec!(99.99)).await;
        store.buy(id, "F", 3, dec!(33.33)).await.unwrap();
        assert_eq!(store.current_cash(id).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn sell_credits_cash_with_negative_shares() {
        let (store, id) = funded(dec!(1000)).await;
        store.buy(id, "IBM", 5, dec!(100)).await.unwrap();

        let tx = store.sell(id, "IBM", 2, dec!(110.50)).await.unwrap();
        assert_eq!(tx.shares, -2);
        assert_eq!(tx.amount, dec!(221.00));
        assert_eq!(store.current_cash(id).await.unwrap(), dec!(721.00));
        assert_eq!(store.current_holdings(id).await.unwrap()["IBM"], 3);
    }

    #[tokio::test]
    async fn selling_out_drops_the_holding() {
        let (store, id) = funded(dec!(1000)).await;
        store.buy(id, "IBM", 5, dec!(10)).await.unwrap();
        store.sell(id, "IBM", 5, dec!(10)).await.unwrap();

        assert!(store.current_holdings(id).await.unwrap().is_empty());
        let err = store.sell(id, "IBM", 1, dec!(10)).await.unwrap_err();
        assert!(matches!(err, FinanceError::InsufficientShares));
    }

    #[tokio::test]
    async fn holdings_are_scoped_to_the_owner() {
        let store = Store::open_in_memory().unwrap();
        let alice = store.insert_user("alice", "h", dec!(1000)).await.unwrap().id;
        let bob = store.insert_user("bob", "h", dec!(1000)).await.unwrap().id;
        store.buy(alice, "TSLA", 4, dec!(10)).await.unwrap();

        let err = store.sell(bob, "TSLA", 1, dec!(10)).await.unwrap_err();
        assert!(matches!(err, FinanceError::InsufficientShares));
        assert!(store.current_holdings(bob).await.unwrap().is_empty());
        assert_eq!(store.current_cash(bob).await.unwrap(), dec!(1000));
    }

    #[tokio::test]
    async fn rejects_invalid_trades_before_touching_the_store() {
        let (store, id) = funded(dec!(1000)).await;

        let cases = [
            ("", 1, dec!(1)),
            ("A", 0, dec!(1)),
            ("A", -3, dec!(1)),
            ("A", 1, dec!(0)),
        ];
        for (symbol, shares, price) in cases {
            let err = store.buy(id, symbol, shares, price).await.unwrap_err();
            assert!(matches!(err, FinanceError::InvalidInput(_)), "{:?}", err);
        }
        assert!(store.history(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_user_cannot_trade() {
        let store = Store::open_in_memory().unwrap();
        let err = store.buy(42, "AAPL", 1, dec!(1)).await.unwrap_err();
        assert!(matches!(err, FinanceError::UnknownUser(42)));
        assert!(matches!(
            store.current_cash(42).await.unwrap_err(),
            FinanceError::UnknownUser(42)
        ));
    }

    #[tokio::test]
    async fn reads_are_repeatable() {
        let (store, id) = funded(dec!(500)).await;
        store.buy(id, "MSFT", 2, dec!(12.5)).await.unwrap();

        let first = snapshot(&store, id).await;
        let second = snapshot(&store, id).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn buy_sell_round_trip() {
        let (store, id) = funded(dec!(10000)).await;

        store.buy(id, "NFLX", 10, dec!(50)).await.unwrap();
        assert_eq!(snapshot(&store, id).await.0, dec!(9500));

        store.sell(id, "NFLX", 4, dec!(60)).await.unwrap();
        let (cash, holdings) = snapshot(&store, id).await;
        assert_eq!(cash, dec!(9740));
        assert_eq!(holdings["NFLX"], 6);

        let err = store.sell(id, "NFLX", 10, dec!(60)).await.unwrap_err();
        assert!(matches!(err, FinanceError::InsufficientShares));
        let (cash, holdings) = snapshot(&store, id).await;
        assert_eq!(cash, dec!(9740));
        assert_eq!(holdings["NFLX"], 6);

        let history = store.history(id).await.unwrap();
        assert_eq!(
            history.iter().map(|t| (t.shares, t.amount)).collect::<Vec<_>>(),
            vec![(10, dec!(-500)), (-4, dec!(240))]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sells_of_one_holding_commit_once() {
        let (store, id) = funded(dec!(1000)).await;
        store.buy(id, "GME", 5, dec!(20)).await.unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.sell(id, "GME", 5, dec!(20)).await })
            })
            .collect();

        let mut sold = 0;
        let mut refused = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => sold += 1,
                Err(FinanceError::InsufficientShares) => refused += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!((sold, refused), (1, 1));
        assert_eq!(store.current_cash(id).await.unwrap(), dec!(1000));
        assert!(store.current_holdings(id).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_buys_never_overdraw() {
        let (store, id) = funded(dec!(100)).await;

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.buy(id, "AMC", 1, dec!(30)).await })
            })
            .collect();

        let mut bought = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                bought += 1;
            }
        }
        assert_eq!(bought, 3);
        assert_eq!(store.current_cash(id).await.unwrap(), dec!(10));
        assert_eq!(store.current_holdings(id).await.unwrap()["AMC"], 3);
    }
}
