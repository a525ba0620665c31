//! Concurrent checks across many accounts
//!
//! Every account gets its own task and its own connection. Results
//! land in a slot per account, so the caller always gets exactly one
//! [`ConnectionResult`] per requested account, whatever order the
//! tasks finish in and however the run ends.

use crate::account::{Account, AccountId};
use crate::config::ProbeOptions;
use crate::error::{Error, ErrorKind, Result};
use crate::outcome::ConnectionResult;
use crate::probe::probe_account;
use crate::provider::TokenProvider;
use futures::FutureExt;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

pub type RunResults = BTreeMap<AccountId, ConnectionResult>;

/// Runs one probe per account under a shared deadline.
pub struct Orchestrator<P> {
    options: ProbeOptions,
    provider: Arc<P>,
}

impl<P: TokenProvider + 'static> Orchestrator<P> {
    #[must_use]
    pub const fn new(options: ProbeOptions, provider: Arc<P>) -> Self {
        Self { options, provider }
    }

    #[must_use]
    pub const fn options(&self) -> &ProbeOptions {
        &self.options
    }

    /// Probe all `accounts` concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if two accounts share an id. Probe
    /// failures are reported per account, never as an error.
    pub async fn run(&self, accounts: &[Account]) -> Result<RunResults> {
        self.run_until_cancelled(accounts, &CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), but stops early when `cancel` fires.
    /// Accounts still pending then are reported as `Cancelled`; those
    /// pending at the overall deadline as `Timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if two accounts share an id.
    pub async fn run_until_cancelled(
        &self,
        accounts: &[Account],
        cancel: &CancellationToken,
    ) -> Result<RunResults> {
        let mut seen = BTreeSet::new();
        for account in accounts {
            if !seen.insert(&account.id) {
                return Err(Error::Config(format!("duplicate account id {}", account.id)));
            }
        }

        info!(accounts = accounts.len(), "starting connectivity run");
        let deadline = Instant::now() + self.options.overall_timeout;
        let options = Arc::new(self.options.clone());
        let mut slots: Vec<Option<ConnectionResult>> = vec![None; accounts.len()];
        let mut tasks = JoinSet::new();

        for (index, account) in accounts.iter().cloned().enumerate() {
            let options = Arc::clone(&options);
            let provider = Arc::clone(&self.provider);
            let span = info_span!("probe", account = %account.id, provider = %account.provider);
            tasks.spawn(
                async move {
                    let result = AssertUnwindSafe(probe_account(&account, &options, &*provider))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| {
                            warn!("probe panicked");
                            ConnectionResult::failure(
                                ErrorKind::Protocol,
                                format!("probe panicked: {}", panic_message(panic.as_ref())),
                            )
                        });
                    (index, result)
                }
                .instrument(span),
            );
        }

        let interrupted = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break Some(ErrorKind::Cancelled),
                () = tokio::time::sleep_until(deadline) => break Some(ErrorKind::Timeout),
                joined = tasks.join_next() => match joined {
                    Some(Ok((index, result))) => slots[index] = Some(result),
                    Some(Err(e)) => warn!("probe task failed: {e}"),
                    None => break None,
                },
            }
        };

        if let Some(kind) = interrupted {
            let pending = slots.iter().filter(|s| s.is_none()).count();
            warn!(%kind, pending, "run interrupted, aborting pending probes");
            tasks.abort_all();
            while let Some(joined) = tasks.join_next().await {
                if let Ok((index, result)) = joined {
                    slots[index] = Some(result);
                }
            }
        }

        let results: RunResults = accounts
            .iter()
            .zip(slots)
            .map(|(account, slot)| {
                let result = slot.unwrap_or_else(|| match interrupted {
                    Some(ErrorKind::Cancelled) => {
                        ConnectionResult::failure(ErrorKind::Cancelled, "run cancelled")
                    }
                    Some(_) => ConnectionResult::failure(
                        ErrorKind::Timeout,
                        format!(
                            "overall deadline of {}s exceeded",
                            self.options.overall_timeout.as_secs_f64()
                        ),
                    ),
                    None => ConnectionResult::failure(ErrorKind::Protocol, "probe task failed"),
                });
                (account.id.clone(), result)
            })
            .collect();

        let failed = results.values().filter(|r| !r.is_success()).count();
        debug!(total = results.len(), failed, "connectivity run finished");
        Ok(results)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Probe `accounts` with `provider` and return one result per account.
///
/// # Errors
///
/// Returns [`Error::Config`] if two accounts share an id.
pub async fn test_connectivity<P: TokenProvider + 'static>(
    accounts: &[Account],
    options: ProbeOptions,
    provider: Arc<P>,
) -> Result<RunResults> {
    Orchestrator::new(options, provider).run(accounts).await
}

/// [`test_connectivity`] for callers without a tokio runtime.
///
/// # Errors
///
/// Returns [`Error::Io`] if the runtime cannot be started and
/// [`Error::Config`] if two accounts share an id.
pub fn test_connectivity_blocking<P: TokenProvider + 'static>(
    accounts: &[Account],
    options: ProbeOptions,
    provider: Arc<P>,
) -> Result<RunResults> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(test_connectivity(accounts, options, provider))
}
