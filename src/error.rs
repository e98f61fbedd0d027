// src/error.rs
use thiserror::Error;
use warp::http::StatusCode;
use warp::reject::Reject;

#[derive(Error, Debug)]
pub enum FinanceError {
    /// Missing or malformed form field, or a non-positive amount.
    #[error("{0}")]
    InvalidInput(String),

    #[error("Invalid stock symbol.")]
    InvalidSymbol,

    #[error("Not enough money to perform transaction.")]
    InsufficientFunds,

    #[error("Not enough shares to sell.")]
    InsufficientShares,

    #[error("Username taken.")]
    DuplicateUsername,

    #[error("must provide {0}")]
    MissingCredential(&'static str),

    /// Deliberately the same for unknown users and wrong passwords.
    #[error("invalid username and/or password")]
    AuthenticationFailure,

    #[error("unknown user {0}")]
    UnknownUser(i64),

    #[error("Could not complete transaction. Error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("session token error: {0}")]
    Session(#[from] jsonwebtoken::errors::Error),
}

impl FinanceError {
    pub fn invalid(message: impl Into<String>) -> Self {
        FinanceError::InvalidInput(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            FinanceError::InvalidInput(_)
            | FinanceError::InvalidSymbol
            | FinanceError::InsufficientFunds
            | FinanceError::InsufficientShares
            | FinanceError::DuplicateUsername => StatusCode::BAD_REQUEST,
            FinanceError::MissingCredential(_)
            | FinanceError::AuthenticationFailure
            | FinanceError::UnknownUser(_) => StatusCode::FORBIDDEN,
            FinanceError::Store(_) | FinanceError::Hash(_) | FinanceError::Session(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl Reject for FinanceError {}

/// Raised by the session filter when a protected route has no valid session.
#[derive(Debug)]
pub struct Unauthenticated;

impl Reject for Unauthenticated {}

pub type Result<T> = std::result::Result<T, FinanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_forbidden() {
        assert_eq!(
            FinanceError::AuthenticationFailure.status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(FinanceError::UnknownUser(7).status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn ledger_rejections_are_bad_requests() {
        assert_eq!(
            FinanceError::InsufficientFunds.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            FinanceError::invalid("Must buy at least 1 share.").to_string(),
            "Must buy at least 1 share."
        );
    }

    #[test]
    fn store_failures_are_server_errors() {
        let err = FinanceError::from(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
