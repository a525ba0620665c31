//! Per-account results of a connectivity run

use crate::error::{Error, ErrorKind};
use crate::folder::Folder;
use crate::mailbox::{MailboxInfo, MessageSummary};
use serde::Serialize;

/// What a successful probe saw in the selected mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailboxSummary {
    pub mailbox: String,
    pub user_identity: String,
    #[serde(flatten)]
    pub info: MailboxInfo,
    pub recent_messages: Vec<MessageSummary>,
    /// Whether a token refresh was needed to get in.
    pub token_refreshed: bool,
}

impl MailboxSummary {
    #[must_use]
    pub fn new(mailbox: &Folder, user_identity: impl Into<String>, info: MailboxInfo) -> Self {
        Self {
            mailbox: mailbox.as_str().to_string(),
            user_identity: user_identity.into(),
            info,
            recent_messages: Vec::new(),
            token_refreshed: false,
        }
    }
}

/// Exactly one of these is reported for every account in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum ConnectionResult {
    Success(MailboxSummary),
    Failure { kind: ErrorKind, detail: String },
}

impl ConnectionResult {
    #[must_use]
    pub fn failure(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        Self::failure(error.kind(), error.to_string())
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Failure classification, `None` on success.
    #[must_use]
    pub const fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success(_) => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }
}
