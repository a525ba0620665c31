use crate::account::Account;
use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;

/// JWT claims that carry the mailbox login, most specific first.
const IDENTITY_CLAIMS: [&str; 5] = [
    "preferred_username",
    "email",
    "upn",
    "unique_name",
    "userPrincipalName",
];

/// The login to put in the XOAUTH2 payload for `account`.
///
/// A configured email address wins. Otherwise the access token is read
/// as a JWT (Microsoft tokens are; Google tokens are opaque) and the
/// first identity claim found is used.
///
/// # Errors
///
/// Returns [`Error::Auth`] if no identity can be determined.
pub fn resolve_identity(account: &Account, access_token: &str) -> Result<String> {
    if let Some(email) = account.email.as_deref().filter(|e| !e.is_empty()) {
        return Ok(email.to_string());
    }
    identity_from_jwt(access_token).ok_or_else(|| {
        Error::Auth(format!(
            "no email configured for {} and the access token carries no identity claim",
            account.id
        ))
    })
}

fn identity_from_jwt(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let raw = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&raw).ok()?;
    IDENTITY_CLAIMS
        .iter()
        .filter_map(|key| claims.get(*key).and_then(Value::as_str))
        .find(|v| !v.is_empty())
        .map(str::to_string)
}
