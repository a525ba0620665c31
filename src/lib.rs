//! XOAUTH2 IMAP connectivity checks
//!
//! Verifies that OAuth2-authorized mail accounts (Gmail, Outlook /
//! Office 365, or any XOAUTH2-capable IMAP server) can actually be
//! reached: each account is connected over TLS, authenticated with
//! `AUTHENTICATE XOAUTH2`, has its mailbox selected and its most
//! recent message headers summarized, all concurrently.
//!
//! Tokens come from a [`TokenProvider`]. The bundled
//! [`TokenCache`](provider::TokenCache) over an
//! [`OAuthSource`](provider::OAuthSource) refreshes tokens at the
//! providers' token endpoints. A token the server rejects as expired
//! is refreshed and retried exactly once.
//!
//! ```no_run
//! use oauth_imap_probe::provider::{AccountCredentials, OAuthSource, TokenCache};
//! use oauth_imap_probe::{Account, ProbeOptions, Provider, test_connectivity};
//! use std::sync::Arc;
//!
//! # async fn run() -> oauth_imap_probe::Result<()> {
//! let account = Account::new("work", Provider::Gmail)?.email("me@example.com");
//! let mut source = OAuthSource::new()?;
//! source.insert(account.id.clone(), AccountCredentials::AccessToken("ya29...".into()));
//!
//! let results = test_connectivity(
//!     &[account],
//!     ProbeOptions::default(),
//!     Arc::new(TokenCache::new(source)),
//! )
//! .await?;
//! for (id, result) in &results {
//!     println!("{id}: {}", if result.is_success() { "ok" } else { "failed" });
//! }
//! # Ok(())
//! # }
//! ```

mod account;
pub mod codec;
mod config;
pub mod connection;
mod error;
mod folder;
mod mailbox;
mod orchestrator;
mod outcome;
mod probe;
pub mod provider;
pub mod session;
mod token;
pub mod xoauth2;

pub use account::{Account, AccountId, Endpoint, Provider, TlsMode};
pub use config::{AccountConfig, ProbeOptions, accounts_from_env, env_file_path};
pub use error::{Error, ErrorKind, Result};
pub use folder::Folder;
pub use mailbox::{MailboxInfo, MessageSummary};
pub use orchestrator::{Orchestrator, RunResults, test_connectivity, test_connectivity_blocking};
pub use outcome::{ConnectionResult, MailboxSummary};
pub use probe::probe_account;
pub use provider::TokenProvider;
pub use session::{ImapSession, SessionState};
pub use token::{BearerToken, TokenGrant};
