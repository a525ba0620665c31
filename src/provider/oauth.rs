use super::{CredentialSink, TokenSource, resolve_identity};
use crate::account::{Account, AccountId, Provider};
use crate::error::{Error, Result};
use crate::token::{BearerToken, TokenGrant};
use chrono::{TimeDelta, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GMAIL_PROFILE_URL: &str = "https://www.googleapis.com/gmail/v1/users/me/profile";
const OUTLOOK_IMAP_SCOPE: &str = "https://outlook.office.com/IMAP.AccessAsUser.All offline_access";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Refresh-token grant parameters for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshCredentials {
    pub client_id: String,
    /// Required by Google; optional for public Microsoft clients.
    pub client_secret: Option<String>,
    /// Microsoft tenant, `common` when unset.
    pub tenant: Option<String>,
    pub refresh_token: String,
    /// Overrides the provider's token endpoint.
    pub token_url: Option<String>,
    /// Access token handed out when the exchange fails.
    pub fallback_access_token: Option<String>,
}

impl RefreshCredentials {
    fn token_url(&self, provider: Provider) -> Result<String> {
        if let Some(url) = &self.token_url {
            return Ok(url.clone());
        }
        match provider {
            Provider::Gmail => Ok(GOOGLE_TOKEN_URL.to_string()),
            Provider::Outlook => Ok(format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
                self.tenant.as_deref().unwrap_or("common")
            )),
            Provider::Custom => Err(Error::Config(
                "custom provider needs an explicit token URL".into(),
            )),
        }
    }
}

/// How tokens for one account are obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountCredentials {
    /// Exchange a refresh token at the token endpoint.
    Refresh(RefreshCredentials),
    /// A fixed access token. It is handed out as-is and cannot be
    /// refreshed.
    AccessToken(String),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailProfile {
    email_address: String,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Token source backed by the providers' OAuth2 token endpoints.
pub struct OAuthSource<K = ()> {
    http: reqwest::Client,
    profile_url: String,
    credentials: HashMap<AccountId, AccountCredentials>,
    /// Refresh tokens rotated during this run, by account.
    rotated: Mutex<HashMap<AccountId, String>>,
    sink: K,
}

impl OAuthSource<()> {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client setup failed: {e}")))?;
        Ok(Self {
            http,
            profile_url: GMAIL_PROFILE_URL.to_string(),
            credentials: HashMap::new(),
            rotated: Mutex::new(HashMap::new()),
            sink: (),
        })
    }
}

impl<K: CredentialSink> OAuthSource<K> {
    /// Report rotated refresh tokens to `sink`.
    #[must_use]
    pub fn with_sink<T: CredentialSink>(self, sink: T) -> OAuthSource<T> {
        OAuthSource {
            http: self.http,
            profile_url: self.profile_url,
            credentials: self.credentials,
            rotated: self.rotated,
            sink,
        }
    }

    /// Look up Gmail identities at `url` instead of the Gmail API.
    #[must_use]
    pub fn with_profile_url(mut self, url: impl Into<String>) -> Self {
        self.profile_url = url.into();
        self
    }

    pub fn insert(&mut self, id: AccountId, credentials: AccountCredentials) {
        self.credentials.insert(id, credentials);
    }

    #[must_use]
    pub fn credentials(&self, id: &AccountId) -> Option<&AccountCredentials> {
        self.credentials.get(id)
    }

    #[must_use]
    pub const fn sink(&self) -> &K {
        &self.sink
    }

    async fn exchange(&self, account: &Account, creds: &RefreshCredentials) -> Result<TokenGrant> {
        let url = creds.token_url(account.provider)?;
        let refresh_token = self
            .rotated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&account.id)
            .cloned()
            .unwrap_or_else(|| creds.refresh_token.clone());

        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("client_id", creds.client_id.as_str()),
            ("refresh_token", refresh_token.as_str()),
        ];
        if let Some(secret) = &creds.client_secret {
            params.push(("client_secret", secret.as_str()));
        }
        if account.provider == Provider::Outlook {
            params.push(("scope", OUTLOOK_IMAP_SCOPE));
        }

        debug!(account = %account.id, %url, "exchanging refresh token");
        let response = self
            .http
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::Network(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<TokenErrorResponse>(&body).map_or_else(
                |_| body.clone(),
                |e| match e.error_description {
                    Some(description) => format!("{}: {description}", e.error),
                    None => e.error,
                },
            );
            warn!(account = %account.id, %status, "token refresh rejected");
            return Err(Error::Auth(format!("token endpoint returned {status}: {reason}")));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Auth(format!("malformed token response: {e}")))?;

        if let Some(new) = body.refresh_token.filter(|t| !t.is_empty() && *t != refresh_token) {
            info!(account = %account.id, "refresh token rotated");
            self.sink.rotated(account, &new);
            self.rotated
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(account.id.clone(), new);
        }

        let expires_at = body
            .expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| Utc::now() + TimeDelta::seconds(secs));
        let user_identity = self.identity(account, &body.access_token).await?;
        Ok(TokenGrant {
            token: BearerToken::new(account.id.clone(), body.access_token, expires_at),
            user_identity,
        })
    }

    async fn static_grant(&self, account: &Account, token: &str) -> Result<TokenGrant> {
        Ok(TokenGrant {
            token: BearerToken::new(account.id.clone(), token.to_string(), None),
            user_identity: self.identity(account, token).await?,
        })
    }

    /// The login identity for `access_token`. Gmail tokens are opaque,
    /// so without a configured email Gmail accounts ask the profile API.
    async fn identity(&self, account: &Account, access_token: &str) -> Result<String> {
        match resolve_identity(account, access_token) {
            Err(_) if account.provider == Provider::Gmail => {
                self.gmail_profile(account, access_token).await
            }
            resolved => resolved,
        }
    }

    async fn gmail_profile(&self, account: &Account, access_token: &str) -> Result<String> {
        debug!(account = %account.id, url = %self.profile_url, "looking up Gmail profile");
        let response = self
            .http
            .get(&self.profile_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Gmail profile unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            warn!(account = %account.id, %status, "Gmail profile lookup rejected");
            return Err(Error::Auth(format!(
                "no email configured for {} and the Gmail profile lookup returned {status}",
                account.id
            )));
        }

        let profile: GmailProfile = response
            .json()
            .await
            .map_err(|e| Error::Auth(format!("malformed Gmail profile: {e}")))?;
        Ok(profile.email_address)
    }
}

impl<K: CredentialSink> TokenSource for OAuthSource<K> {
    async fn fetch(&self, account: &Account) -> Result<TokenGrant> {
        match self.credentials.get(&account.id) {
            Some(AccountCredentials::Refresh(creds)) => {
                match (self.exchange(account, creds).await, &creds.fallback_access_token) {
                    (Err(err), Some(token)) => {
                        warn!(
                            account = %account.id,
                            error = %err,
                            "refresh failed, using the configured access token"
                        );
                        self.static_grant(account, token).await
                    }
                    (grant, _) => grant,
                }
            }
            Some(AccountCredentials::AccessToken(token)) => self.static_grant(account, token).await,
            None => Err(Error::Config(format!(
                "no credentials configured for {}",
                account.id
            ))),
        }
    }
}
