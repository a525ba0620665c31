//! Scripted token source for driving the checker against the fake
//! server. Wrap it in a `TokenCache` to get a `TokenProvider`.

use chrono::{TimeDelta, Utc};
use oauth_imap_probe::provider::TokenSource;
use oauth_imap_probe::{Account, BearerToken, Result, TokenGrant};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const USER: &str = "user@example.com";

/// Hands out the scripted tokens one per exchange. The last token is
/// repeated once the script runs out.
pub struct ScriptedTokens {
    tokens: Mutex<VecDeque<String>>,
    expired_first: bool,
    fetches: AtomicUsize,
}

impl ScriptedTokens {
    pub fn new(tokens: &[&str]) -> Self {
        assert!(!tokens.is_empty(), "script at least one token");
        Self {
            tokens: Mutex::new(tokens.iter().map(|t| (*t).to_string()).collect()),
            expired_first: false,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Mark the first token as already expired.
    pub fn expired_first(mut self) -> Self {
        self.expired_first = true;
        self
    }

    /// Number of exchanges performed so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl TokenSource for ScriptedTokens {
    async fn fetch(&self, account: &Account) -> Result<TokenGrant> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        let secret = {
            let mut tokens = self.tokens.lock().unwrap();
            if tokens.len() > 1 {
                tokens.pop_front().unwrap()
            } else {
                tokens.front().cloned().unwrap()
            }
        };
        let lifetime = if n == 1 && self.expired_first {
            TimeDelta::hours(-1)
        } else {
            TimeDelta::hours(1)
        };
        Ok(TokenGrant {
            token: BearerToken::new(account.id.clone(), secret, Some(Utc::now() + lifetime)),
            user_identity: USER.to_string(),
        })
    }
}
