// src/db.rs
use crate::error::{FinanceError, Result};
use crate::models::User;
use log::{error, info};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT UNIQUE NOT NULL,
        hash TEXT NOT NULL,
        cash TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS transactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        symbol TEXT NOT NULL,
        shares INTEGER NOT NULL,
        amount TEXT NOT NULL,
        time TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_transactions_user_symbol ON transactions(user_id, symbol);
";

/// Handle to the SQLite database. Cloning shares the same connection; every
/// access goes through one async mutex, so mutations are serialized.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &str) -> Result<Self> {
        let store = Self::init(Connection::open(path)?)?;
        info!("Opened ledger database at {}.", path);
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` inside a `BEGIN IMMEDIATE` transaction. Commits when `f`
    /// returns `Ok`, rolls back otherwise. Reads made by `f` see the latest
    /// committed state and no other writer can interleave before commit.
    pub async fn atomically<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        match f(&*tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    error!("Rollback failed after {}: {}", e, rollback);
                }
                Err(e)
            }
        }
    }

    /// Runs a read-only closure against the connection.
    pub async fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().await;
        f(&*conn)
    }

    pub async fn insert_user(&self, username: &str, hash: &str, cash: Decimal) -> Result<User> {
        self.atomically(|conn| {
            conn.execute(
                "INSERT INTO users (username, hash, cash) VALUES (?1, ?2, ?3)",
                params![username, hash, cash.to_string()],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(ref failure, _)
                    if failure.code == ErrorCode::ConstraintViolation =>
                {
                    FinanceError::DuplicateUsername
                }
                other => FinanceError::Store(other),
            })?;
            Ok(User {
                id: conn.last_insert_rowid(),
                username: username.to_string(),
                hash: hash.to_string(),
                cash,
            })
        })
        .await
    }

    pub async fn find_user(&self, username: &str) -> Result<Option<User>> {
        self.read(|conn| {
            let user = conn
                .query_row(
                    "SELECT id, username, hash, cash FROM users WHERE username = ?1",
                    params![username],
                    user_from_row,
                )
                .optional()?;
            Ok(user)
        })
        .await
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        hash: row.get(2)?,
        cash: decimal_at(row, 3)?,
    })
}

/// Money columns are stored as decimal text; this reads one back.
pub(crate) fn decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn inserts_and_finds_users() {
        let store = Store::open_in_memory().unwrap();
        let created = store.insert_user("alice", "hash", dec!(10000.00)).await.unwrap();

        let found = store.find_user("alice").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.cash, dec!(10000));
        assert!(store.find_user("Alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_username_is_reported() {
        let store = Store::open_in_memory().unwrap();
        store.insert_user("bob", "h1", dec!(1)).await.unwrap();

        let err = store.insert_user("bob", "h2", dec!(1)).await.unwrap_err();
        assert!(matches!(err, FinanceError::DuplicateUsername));
    }

    #[tokio::test]
    async fn failed_unit_rolls_back() {
        let store = Store::open_in_memory().unwrap();
        let result: Result<()> = store
            .atomically(|conn| {
                conn.execute(
                    "INSERT INTO users (username, hash, cash) VALUES ('carol', 'h', '5')",
                    [],
                )?;
                Err(FinanceError::InsufficientFunds)
            })
            .await;

        assert!(result.is_err());
        assert!(store.find_user("carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finance.db");
        let path = path.to_str().unwrap();

        Store::open(path)
            .unwrap()
            .insert_user("dave", "h", dec!(12.34))
            .await
            .unwrap();

        let reopened = Store::open(path).unwrap();
        let dave = reopened.find_user("dave").await.unwrap().unwrap();
        assert_eq!(dave.cash, dec!(12.34));
    }
}
