//! One account's connectivity check
//!
//! connect → authenticate → select → fetch → logout, each phase under
//! its own timeout. An authentication rejected as expired gets exactly
//! one refreshed token and one more attempt on a new connection.

use crate::account::Account;
use crate::config::ProbeOptions;
use crate::connection::{self, TlsImapStream};
use crate::error::{Error, Result};
use crate::outcome::{ConnectionResult, MailboxSummary};
use crate::provider::TokenProvider;
use crate::session::ImapSession;
use crate::token::TokenGrant;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Run the full check for one account. Never fails: every error ends
/// up in the returned [`ConnectionResult`].
pub async fn probe_account<P: TokenProvider>(
    account: &Account,
    options: &ProbeOptions,
    provider: &P,
) -> ConnectionResult {
    match run(account, options, provider).await {
        Ok(summary) => {
            info!(
                mailbox = %summary.mailbox,
                exists = summary.info.exists,
                refreshed = summary.token_refreshed,
                "probe succeeded"
            );
            ConnectionResult::Success(summary)
        }
        Err(e) => {
            warn!(kind = %e.kind(), "probe failed: {e}");
            ConnectionResult::from_error(&e)
        }
    }
}

async fn run<P: TokenProvider>(
    account: &Account,
    options: &ProbeOptions,
    provider: &P,
) -> Result<MailboxSummary> {
    let mut grant = within(
        options.auth_timeout,
        "token acquisition",
        provider.get_token(account),
    )
    .await?;

    // Refreshing a token known to be stale does not use up the retry.
    let mut refreshed = false;
    if grant.token.is_expired() {
        debug!("token expired before use, refreshing");
        grant = within(
            options.auth_timeout,
            "token refresh",
            provider.refresh(account, &grant.token),
        )
        .await?;
        refreshed = true;
    }

    match attempt(account, options, &grant).await {
        Ok(mut summary) => {
            summary.token_refreshed = refreshed;
            Ok(summary)
        }
        Err(Error::AuthExpired(detail)) => {
            info!(%detail, "token rejected as expired, retrying once with a fresh token");
            let fresh = within(
                options.auth_timeout,
                "token refresh",
                provider.refresh(account, &grant.token),
            )
            .await
            .map_err(|e| match e {
                Error::Timeout(_) | Error::Cancelled => e,
                other => Error::AuthExpired(format!("{detail}; refresh failed: {other}")),
            })?;

            let mut summary = attempt(account, options, &fresh).await?;
            summary.token_refreshed = true;
            Ok(summary)
        }
        Err(e) => Err(e),
    }
}

/// One connection from connect to logout. The session is always
/// closed, whatever the outcome.
async fn attempt(
    account: &Account,
    options: &ProbeOptions,
    grant: &TokenGrant,
) -> Result<MailboxSummary> {
    let mut session = ImapSession::disconnected();
    let result = drive(&mut session, account, options, grant).await;

    if let Err(e) = &result {
        session.fail(e.kind());
    }
    if timeout(options.command_timeout, session.close()).await.is_err() {
        debug!("close timed out");
    }
    debug!(state = %session.state(), "session finished");
    result
}

async fn drive(
    session: &mut ImapSession<TlsImapStream>,
    account: &Account,
    options: &ProbeOptions,
    grant: &TokenGrant,
) -> Result<MailboxSummary> {
    within(options.connect_timeout, "connect", async {
        let connected = connection::open(&account.endpoint, options.tls_verify).await?;
        session
            .attach(connected.stream, connected.greeting_pending)
            .await
    })
    .await?;

    within(
        options.auth_timeout,
        "authenticate",
        session.authenticate(&grant.user_identity, &grant.token),
    )
    .await?;

    let info = within(
        options.command_timeout,
        "select",
        session.select(&options.mailbox_name),
    )
    .await?;
    let mut summary = MailboxSummary::new(&options.mailbox_name, &grant.user_identity, info);

    if options.fetch_limit > 0 {
        summary.recent_messages = within(
            options.command_timeout,
            "fetch",
            session.fetch_recent(summary.info.exists, options.fetch_limit),
        )
        .await?;
    }
    Ok(summary)
}

async fn within<T>(
    limit: Duration,
    phase: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    timeout(limit, fut)
        .await
        .unwrap_or(Err(Error::Timeout(phase)))
}
