//! Where bearer tokens come from
//!
//! The probe only ever talks to a [`TokenProvider`]. The bundled
//! implementation is a [`TokenCache`] in front of an [`OAuthSource`],
//! which exchanges refresh tokens at the provider's token endpoint and
//! hands rotated refresh tokens to a [`CredentialSink`] such as
//! [`EnvFileSink`].

mod cache;
mod env_file;
mod identity;
mod oauth;

pub use cache::TokenCache;
pub use env_file::{EnvFileSink, update_env_file};
pub use identity::resolve_identity;
pub use oauth::{AccountCredentials, OAuthSource, RefreshCredentials};

use crate::account::Account;
use crate::error::Result;
use crate::token::{BearerToken, TokenGrant};
use std::future::Future;
use std::sync::Arc;

/// Supplies valid bearer tokens to sessions.
pub trait TokenProvider: Send + Sync {
    /// A token believed to be valid for `account`.
    fn get_token(&self, account: &Account) -> impl Future<Output = Result<TokenGrant>> + Send;

    /// A replacement for `rejected`, which the server refused.
    ///
    /// Implementations must not hand back `rejected` itself.
    fn refresh(
        &self,
        account: &Account,
        rejected: &BearerToken,
    ) -> impl Future<Output = Result<TokenGrant>> + Send;
}

impl<P: TokenProvider> TokenProvider for Arc<P> {
    fn get_token(&self, account: &Account) -> impl Future<Output = Result<TokenGrant>> + Send {
        (**self).get_token(account)
    }

    fn refresh(
        &self,
        account: &Account,
        rejected: &BearerToken,
    ) -> impl Future<Output = Result<TokenGrant>> + Send {
        (**self).refresh(account, rejected)
    }
}

/// One uncached exchange with an identity service.
pub trait TokenSource: Send + Sync {
    fn fetch(&self, account: &Account) -> impl Future<Output = Result<TokenGrant>> + Send;
}

/// Receives refresh tokens the identity service rotated.
pub trait CredentialSink: Send + Sync {
    fn rotated(&self, account: &Account, refresh_token: &str);
}

/// Discard rotated refresh tokens.
impl CredentialSink for () {
    fn rotated(&self, _account: &Account, _refresh_token: &str) {}
}
