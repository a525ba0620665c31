use super::CredentialSink;
use crate::account::Account;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Writes rotated refresh tokens back to a `.env` file as
/// `<ACCOUNT>_REFRESH_TOKEN=...`, so the next run starts from the
/// current token.
#[derive(Debug, Clone)]
pub struct EnvFileSink {
    path: PathBuf,
}

impl EnvFileSink {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn key(account: &Account) -> String {
        format!(
            "{}_REFRESH_TOKEN",
            account.id.as_str().to_ascii_uppercase().replace('-', "_")
        )
    }
}

impl CredentialSink for EnvFileSink {
    fn rotated(&self, account: &Account, refresh_token: &str) {
        let key = Self::key(account);
        match update_env_file(&self.path, &key, refresh_token) {
            Ok(()) => info!(path = %self.path.display(), %key, "stored rotated refresh token"),
            Err(e) => warn!(path = %self.path.display(), %key, "failed to store rotated refresh token: {e}"),
        }
    }
}

/// Set `key=value` in the env file at `path`: the first `key=` line is
/// replaced, or a line is appended. A missing file is created.
///
/// # Errors
///
/// Returns the underlying I/O error if the file cannot be read or
/// written.
pub fn update_env_file(path: &Path, key: &str, value: &str) -> io::Result<()> {
    let existing = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let prefix = format!("{key}=");
    let mut found = false;
    let mut lines: Vec<String> = existing
        .lines()
        .map(|line| {
            if !found && line.starts_with(&prefix) {
                found = true;
                format!("{key}={value}")
            } else {
                line.to_string()
            }
        })
        .collect();
    if !found {
        lines.push(format!("{key}={value}"));
    }

    let mut content = lines.join("\n");
    content.push('\n');
    std::fs::write(path, content)
}
