//! SASL XOAUTH2 initial response and error payloads
//!
//! The initial client response is
//!
//! ```text
//! base64("user=" identity "\x01auth=Bearer " token "\x01\x01")
//! ```
//!
//! sent as the single argument of `AUTHENTICATE XOAUTH2`. When the
//! server rejects the token it first sends a continuation carrying a
//! base64 JSON document such as
//! `{"status":"401","schemes":"bearer","scope":"https://mail.google.com/"}`;
//! the client answers with an empty line and then receives the tagged
//! `NO`.

use crate::error::{Error, ErrorKind, Result};
use crate::token::BearerToken;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

/// Build the base64-encoded XOAUTH2 initial response.
///
/// # Errors
///
/// Returns [`Error::InvalidCredential`] if the identity or the token
/// is empty.
pub fn encode(user_identity: &str, token: &BearerToken) -> Result<String> {
    encode_parts(user_identity, token.secret())
}

/// Same as [`encode`], on a raw token string.
///
/// # Errors
///
/// Returns [`Error::InvalidCredential`] if either part is empty.
pub fn encode_parts(user_identity: &str, token: &str) -> Result<String> {
    if user_identity.is_empty() {
        return Err(Error::InvalidCredential("empty user identity"));
    }
    if token.is_empty() {
        return Err(Error::InvalidCredential("empty bearer token"));
    }
    let payload = format!("user={user_identity}\x01auth=Bearer {token}\x01\x01");
    Ok(STANDARD.encode(payload))
}

/// Recover `(identity, token)` from an encoded initial response.
///
/// # Errors
///
/// Returns [`Error::InvalidCredential`] when the input is not valid
/// base64 or not an XOAUTH2 payload.
pub fn decode(encoded: &str) -> Result<(String, String)> {
    let raw = STANDARD
        .decode(encoded.trim())
        .map_err(|_| Error::InvalidCredential("response is not base64"))?;
    let text =
        String::from_utf8(raw).map_err(|_| Error::InvalidCredential("response is not UTF-8"))?;

    let body = text
        .strip_suffix("\x01\x01")
        .ok_or(Error::InvalidCredential("missing XOAUTH2 terminator"))?;
    let (user, auth) = body
        .split_once('\x01')
        .ok_or(Error::InvalidCredential("missing XOAUTH2 separator"))?;
    let identity = user
        .strip_prefix("user=")
        .ok_or(Error::InvalidCredential("missing user field"))?;
    let token = auth
        .strip_prefix("auth=Bearer ")
        .ok_or(Error::InvalidCredential("missing auth field"))?;

    Ok((identity.to_string(), token.to_string()))
}

/// Structured failure sent by the server in an error continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XOAuth2Failure {
    pub status: String,
    pub schemes: Option<String>,
    pub scope: Option<String>,
}

#[derive(Deserialize)]
struct RawFailure {
    status: serde_json::Value,
    schemes: Option<String>,
    scope: Option<String>,
}

impl XOAuth2Failure {
    /// Parse the text of a `+` continuation. Returns `None` for
    /// anything that is not a base64 JSON object with a `status`.
    #[must_use]
    pub fn from_challenge(text: &str) -> Option<Self> {
        let raw = STANDARD.decode(text.trim()).ok()?;
        let parsed: RawFailure = serde_json::from_slice(&raw).ok()?;
        let status = match parsed.status {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };
        Some(Self {
            status,
            schemes: parsed.schemes,
            scope: parsed.scope,
        })
    }

    /// HTTP-style 401 means the bearer token itself was not accepted,
    /// which a fresh token may fix. Everything else is permanent.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        if self.status.trim() == "401" {
            ErrorKind::AuthExpired
        } else {
            ErrorKind::Auth
        }
    }
}
