// src/auth.rs
use crate::db::Store;
use crate::error::{FinanceError, Result};
use crate::models::{LoginForm, RegisterForm, User};
use bcrypt::{hash, verify};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const SESSION_COOKIE: &str = "session";

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

/// Signs and checks the session cookie. The token carries only the user id.
#[derive(Clone)]
pub struct SessionKeys {
    secret: String,
    ttl: Duration,
}

impl SessionKeys {
    pub fn new(secret: impl Into<String>, ttl_hours: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl: Duration::hours(ttl_hours),
        }
    }

    pub fn create_token(&self, user_id: i64) -> Result<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (Utc::now() + self.ttl).timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// The user id behind a token, or `None` for anything forged, expired or
    /// malformed.
    pub fn user_id(&self, token: &str) -> Option<i64> {
        match decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        ) {
            Ok(data) => data.claims.sub.parse().ok(),
            Err(e) => {
                debug!("Rejected session token: {}", e);
                None
            }
        }
    }

    pub fn set_cookie(&self, token: &str) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            SESSION_COOKIE,
            token,
            self.ttl.num_seconds()
        )
    }
}

/// A `Set-Cookie` value that ends the session in the browser.
pub fn clear_session_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}

/// Registration and login on top of the users table.
pub struct Accounts {
    store: Store,
    cost: u32,
    starting_cash: Decimal,
    // Verified against when the username is unknown so both failure paths
    // cost one bcrypt verification.
    dummy_hash: String,
}

impl Accounts {
    pub fn new(store: Store, cost: u32, starting_cash: Decimal) -> Result<Self> {
        let dummy_hash = hash("not a real password", cost)?;
        Ok(Self {
            store,
            cost,
            starting_cash,
            dummy_hash,
        })
    }

    pub async fn register(&self, form: &RegisterForm) -> Result<User> {
        let username = present(&form.username)
            .ok_or_else(|| FinanceError::invalid("Please input a username."))?;
        if self.store.find_user(username).await?.is_some() {
            return Err(FinanceError::DuplicateUsername);
        }
        let password = present(&form.password)
            .ok_or_else(|| FinanceError::invalid("Please enter a password."))?;
        let confirmation = present(&form.confirmation)
            .ok_or_else(|| FinanceError::invalid("Please confirm your password."))?;
        if password != confirmation {
            return Err(FinanceError::invalid("Passwords don't match!"));
        }

        let password_hash = hash(password, self.cost)?;
        let user = self
            .store
            .insert_user(username, &password_hash, self.starting_cash)
            .await?;
        info!("Registered user {} ({}).", user.username, user.id);
        Ok(user)
    }

    pub async fn login(&self, form: &LoginForm) -> Result<User> {
        let username = present(&form.username).ok_or(FinanceError::MissingCredential("username"))?;
        let password = present(&form.password).ok_or(FinanceError::MissingCredential("password"))?;

        let user = self.store.find_user(username).await?;
        let stored = user.as_ref().map_or(self.dummy_hash.as_str(), |u| u.hash.as_str());
        let valid = verify(password, stored)?;

        match user {
            Some(user) if valid => {
                info!("User {} logged in.", user.id);
                Ok(user)
            }
            _ => {
                warn!("Failed login attempt for {:?}.", username);
                Err(FinanceError::AuthenticationFailure)
            }
        }
    }
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|value| !value.is_empty())
}
