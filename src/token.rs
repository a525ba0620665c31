//! Bearer tokens as handed out by a token provider

use crate::account::AccountId;
use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;

/// Tokens this close to their expiry are treated as expired, so a
/// handshake never starts with a token that lapses mid-flight.
pub const EXPIRY_SKEW_SECS: i64 = 60;

/// An OAuth2 access token for one account.
///
/// The secret never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    secret: String,
    expires_at: Option<DateTime<Utc>>,
    account: AccountId,
}

impl BearerToken {
    #[must_use]
    pub fn new(
        account: AccountId,
        secret: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
            account,
        }
    }

    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    #[must_use]
    pub const fn account(&self) -> &AccountId {
        &self.account
    }

    /// Whether the token is (about to be) expired at `now`.
    ///
    /// Tokens without a known expiry are assumed valid; the server
    /// has the final say.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|at| at <= now + TimeDelta::seconds(EXPIRY_SKEW_SECS))
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("account", &self.account)
            .finish()
    }
}

/// What a token provider returns: the token plus the identity the
/// mailbox must be addressed as in the XOAUTH2 payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub token: BearerToken,
    pub user_identity: String,
}
