//! The bearer token and its persistence.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use gbridge_core::{LocalStore, StoreResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Store key holding the current token.
pub const TOKEN_KEY: &str = "gbridge.google.token";

/// An OAuth bearer token obtained through the implicit flow.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// Builds a token that expires `expires_in` seconds from now, or `None`
    /// when that instant is not representable.
    pub fn try_new(
        access_token: impl Into<String>,
        token_type: impl Into<String>,
        scope: impl Into<String>,
        expires_in: i64,
    ) -> Option<Self> {
        let expires_at = expiry_after(expires_in)?;
        Some(Self::with_expiry(access_token, token_type, scope, expires_at))
    }

    /// Like [`Token::try_new`], clamping an unrepresentable expiry to the
    /// nearest end of the calendar.
    pub fn new(
        access_token: impl Into<String>,
        token_type: impl Into<String>,
        scope: impl Into<String>,
        expires_in: i64,
    ) -> Self {
        let expires_at = expiry_after(expires_in).unwrap_or(if expires_in < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        });
        Self::with_expiry(access_token, token_type, scope, expires_at)
    }

    fn with_expiry(
        access_token: impl Into<String>,
        token_type: impl Into<String>,
        scope: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            scope: scope.into(),
            expires_at,
        }
    }

    /// True while the token has not expired yet.
    pub fn is_valid(&self) -> bool {
        self.expires_at > Utc::now()
    }

    /// True once the token is within `lookahead` of expiring.
    pub fn needs_refresh(&self, lookahead: Duration) -> bool {
        let lookahead = chrono::Duration::from_std(lookahead).unwrap_or(chrono::Duration::MAX);
        Utc::now()
            .checked_add_signed(lookahead)
            .is_none_or(|threshold| self.expires_at <= threshold)
    }
}

fn expiry_after(seconds: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_seconds(seconds).and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
}

// The access token itself never reaches the logs.
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Durable storage of the current token in the shared store.
#[derive(Debug, Clone)]
pub struct TokenStore {
    store: LocalStore,
}

impl TokenStore {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> StoreResult<Option<Token>> {
        self.store.get_as(TOKEN_KEY).await
    }

    pub async fn save(&self, token: &Token) -> StoreResult<()> {
        self.store.set(TOKEN_KEY, token).await?;
        debug!(expires_at = %token.expires_at, "persisted token");
        Ok(())
    }

    pub async fn clear(&self) -> StoreResult<()> {
        self.store.remove(TOKEN_KEY).await
    }
}
