use super::{TokenProvider, TokenSource};
use crate::account::{Account, AccountId};
use crate::error::{Error, Result};
use crate::token::{BearerToken, TokenGrant};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

type Slot = Arc<tokio::sync::Mutex<Option<TokenGrant>>>;

/// Caches one grant per account and serializes exchanges per account.
///
/// Sessions of the same account never run two exchanges at once: the
/// second waiter finds the token the first one obtained and uses it.
/// Different accounts never wait on each other.
pub struct TokenCache<S> {
    source: S,
    slots: Mutex<HashMap<AccountId, Slot>>,
}

impl<S: TokenSource> TokenCache<S> {
    #[must_use]
    pub fn new(source: S) -> Self {
        Self {
            source,
            slots: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn source(&self) -> &S {
        &self.source
    }

    fn slot(&self, id: &AccountId) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(id.clone()).or_default())
    }
}

impl<S: TokenSource> TokenProvider for TokenCache<S> {
    async fn get_token(&self, account: &Account) -> Result<TokenGrant> {
        let slot = self.slot(&account.id);
        let mut cached = slot.lock().await;

        if let Some(grant) = cached.as_ref()
            && !grant.token.is_expired()
        {
            debug!(account = %account.id, "using cached token");
            return Ok(grant.clone());
        }

        let grant = self.source.fetch(account).await?;
        *cached = Some(grant.clone());
        Ok(grant)
    }

    async fn refresh(&self, account: &Account, rejected: &BearerToken) -> Result<TokenGrant> {
        let slot = self.slot(&account.id);
        let mut cached = slot.lock().await;

        if let Some(grant) = cached.as_ref()
            && grant.token.secret() != rejected.secret()
            && !grant.token.is_expired()
        {
            debug!(account = %account.id, "token already replaced by another session");
            return Ok(grant.clone());
        }

        let grant = self.source.fetch(account).await?;
        if grant.token.secret() == rejected.secret() {
            *cached = None;
            return Err(Error::Auth(format!(
                "no replacement token available for {}",
                account.id
            )));
        }

        info!(account = %account.id, "token refreshed");
        *cached = Some(grant.clone());
        Ok(grant)
    }
}
