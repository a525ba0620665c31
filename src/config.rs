//! Probe options and account configuration from the environment

use crate::account::{Account, Endpoint, Provider, TlsMode};
use crate::error::{Error, Result};
use crate::folder::Folder;
use crate::provider::{AccountCredentials, RefreshCredentials};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Tunables for one connectivity run. Immutable once the run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    /// TCP connect plus TLS handshake (and STARTTLS, if used).
    pub connect_timeout: Duration,
    /// The whole AUTHENTICATE exchange.
    pub auth_timeout: Duration,
    /// Each of SELECT, FETCH and LOGOUT.
    pub command_timeout: Duration,
    /// Upper bound for the whole run, across all accounts.
    pub overall_timeout: Duration,
    pub mailbox_name: Folder,
    pub tls_verify: bool,
    /// Number of recent messages to summarize; 0 skips the FETCH.
    pub fetch_limit: u32,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(15),
            command_timeout: Duration::from_secs(15),
            overall_timeout: Duration::from_secs(60),
            mailbox_name: Folder::Inbox,
            tls_verify: true,
            fetch_limit: 5,
        }
    }
}

impl ProbeOptions {
    /// Load options from environment variables
    ///
    /// Reads from `.env` file if present. All variables are optional:
    /// - `IMAP_CONNECT_TIMEOUT_SECS` (default: `10`)
    /// - `IMAP_AUTH_TIMEOUT_SECS` (default: `15`)
    /// - `IMAP_COMMAND_TIMEOUT_SECS` (default: `15`)
    /// - `IMAP_OVERALL_TIMEOUT_SECS` (default: `60`)
    /// - `IMAP_MAILBOX` (default: `INBOX`)
    /// - `IMAP_TLS_VERIFY` (default: `true`)
    /// - `IMAP_FETCH_LIMIT` (default: `5`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for values that do not parse.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| -> Result<Duration> {
            Ok(parse_var::<u64>(&lookup, key)?.map_or(default, Duration::from_secs))
        };

        Ok(Self {
            connect_timeout: secs("IMAP_CONNECT_TIMEOUT_SECS", defaults.connect_timeout)?,
            auth_timeout: secs("IMAP_AUTH_TIMEOUT_SECS", defaults.auth_timeout)?,
            command_timeout: secs("IMAP_COMMAND_TIMEOUT_SECS", defaults.command_timeout)?,
            overall_timeout: secs("IMAP_OVERALL_TIMEOUT_SECS", defaults.overall_timeout)?,
            mailbox_name: var(&lookup, "IMAP_MAILBOX").map_or(defaults.mailbox_name, Folder::from),
            tls_verify: match var(&lookup, "IMAP_TLS_VERIFY") {
                Some(value) => parse_bool("IMAP_TLS_VERIFY", &value)?,
                None => defaults.tls_verify,
            },
            fetch_limit: parse_var(&lookup, "IMAP_FETCH_LIMIT")?.unwrap_or(defaults.fetch_limit),
        })
    }
}

/// An account together with how its tokens are obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountConfig {
    pub account: Account,
    pub credentials: AccountCredentials,
}

/// Load the Gmail and Outlook accounts configured in the environment
///
/// Reads from `.env` file if present. For each of the `GMAIL_` and
/// `OUTLOOK_` prefixes, an account is configured when either
/// `<P>_REFRESH_TOKEN` or `<P>_ACCESS_TOKEN` is set; a refresh token
/// takes precedence, with the access token used when the refresh
/// fails. Further variables:
/// - `<P>_EMAIL`: mailbox login (Outlook can derive it from the token,
///   Gmail from the profile API)
/// - `<P>_CLIENT_ID` (required with a refresh token)
/// - `<P>_CLIENT_SECRET` (required for Gmail refresh tokens)
/// - `OUTLOOK_TENANT_ID` (default: `common`)
/// - `<P>_TOKEN_URL`: token endpoint override
/// - `<P>_IMAP_HOST`, `<P>_IMAP_PORT`, `<P>_IMAP_TLS`
///   (`implicit` or `starttls`): endpoint override
///
/// # Errors
///
/// Returns [`Error::Config`] when a configured account is incomplete
/// or a value does not parse.
pub fn accounts_from_env() -> Result<Vec<AccountConfig>> {
    dotenvy::dotenv().ok();
    accounts_from_lookup(|key| env::var(key).ok())
}

/// Path of the env file rotated refresh tokens are written to
/// (`ENV_FILE_PATH`, default `.env`).
#[must_use]
pub fn env_file_path() -> String {
    env::var("ENV_FILE_PATH")
        .ok()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| ".env".to_string())
}

fn accounts_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Vec<AccountConfig>> {
    let mut accounts = Vec::new();
    for (prefix, provider) in [("GMAIL", Provider::Gmail), ("OUTLOOK", Provider::Outlook)] {
        let get = |suffix: &str| var(&lookup, &format!("{prefix}_{suffix}"));

        let credentials = if let Some(refresh_token) = get("REFRESH_TOKEN") {
            let client_id = get("CLIENT_ID")
                .ok_or_else(|| Error::Config(format!("{prefix}_CLIENT_ID must be set")))?;
            let client_secret = get("CLIENT_SECRET");
            if provider == Provider::Gmail && client_secret.is_none() {
                return Err(Error::Config(format!("{prefix}_CLIENT_SECRET must be set")));
            }
            AccountCredentials::Refresh(RefreshCredentials {
                client_id,
                client_secret,
                tenant: get("TENANT_ID"),
                refresh_token,
                token_url: get("TOKEN_URL"),
                fallback_access_token: get("ACCESS_TOKEN"),
            })
        } else if let Some(token) = get("ACCESS_TOKEN") {
            AccountCredentials::AccessToken(token)
        } else {
            continue;
        };

        let mut endpoint = provider
            .default_endpoint()
            .ok_or_else(|| Error::Config(format!("no default endpoint for {provider}")))?;
        if let Some(host) = get("IMAP_HOST") {
            endpoint.host = host;
        }
        if let Some(port) = parse_var(&lookup, &format!("{prefix}_IMAP_PORT"))? {
            endpoint.port = port;
        }
        if let Some(tls) = parse_var::<TlsMode>(&lookup, &format!("{prefix}_IMAP_TLS"))? {
            endpoint.tls = tls;
        }

        let mut account = Account::with_endpoint(prefix.to_ascii_lowercase(), provider, endpoint);
        account.email = get("EMAIL");
        accounts.push(AccountConfig {
            account,
            credentials,
        });
    }
    Ok(accounts)
}

/// A variable's value, with empty values treated as unset.
fn var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(lookup, key)
        .map(|v| {
            v.parse()
                .map_err(|e| Error::Config(format!("Invalid {key}: {e}")))
        })
        .transpose()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("Invalid {key}: {value}"))),
    }
}
