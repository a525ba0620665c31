//! Accounts under test and the IMAP endpoints they connect to

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of an account within one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Mail provider an account belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gmail,
    Outlook,
    /// Any other XOAUTH2-capable server; needs an explicit endpoint.
    Custom,
}

impl Provider {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::Outlook => "outlook",
            Self::Custom => "custom",
        }
    }

    /// Well-known IMAP endpoint, implicit TLS on 993.
    #[must_use]
    pub fn default_endpoint(self) -> Option<Endpoint> {
        let host = match self {
            Self::Gmail => "imap.gmail.com",
            Self::Outlook => "outlook.office365.com",
            Self::Custom => return None,
        };
        Some(Endpoint::new(host, 993, TlsMode::Implicit))
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gmail" | "google" => Ok(Self::Gmail),
            "outlook" | "office365" | "microsoft" => Ok(Self::Outlook),
            "custom" => Ok(Self::Custom),
            other => Err(Error::Config(format!("unsupported provider: {other}"))),
        }
    }
}

/// How TLS is established on the IMAP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// TLS from the first byte (port 993).
    Implicit,
    /// Plain greeting, then `STARTTLS` (port 143).
    StartTls,
}

impl std::str::FromStr for TlsMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "implicit" | "tls" | "ssl" => Ok(Self::Implicit),
            "starttls" => Ok(Self::StartTls),
            other => Err(Error::Config(format!("unknown TLS mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: TlsMode,
}

impl Endpoint {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, tls: TlsMode) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One account under test. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub provider: Provider,
    /// Mailbox login, when known up front. The token provider may
    /// resolve it from the token instead.
    pub email: Option<String>,
    pub endpoint: Endpoint,
}

impl Account {
    /// An account on a provider's well-known endpoint.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for [`Provider::Custom`], which
    /// has no default endpoint; use [`Account::with_endpoint`].
    pub fn new(id: impl Into<AccountId>, provider: Provider) -> Result<Self> {
        let endpoint = provider.default_endpoint().ok_or_else(|| {
            Error::Config(format!("provider {provider} needs an explicit endpoint"))
        })?;
        Ok(Self::with_endpoint(id, provider, endpoint))
    }

    #[must_use]
    pub fn with_endpoint(id: impl Into<AccountId>, provider: Provider, endpoint: Endpoint) -> Self {
        Self {
            id: id.into(),
            provider,
            email: None,
            endpoint,
        }
    }

    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}
