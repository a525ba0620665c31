//! Mailbox metadata from SELECT and message summaries from FETCH

use crate::codec::split_response_code;
use crate::error::{Error, Result};
use bytes::Bytes;
use mail_parser::{Addr, Address, MessageParser};
use serde::Serialize;

/// State of the selected mailbox, from SELECT's untagged responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MailboxInfo {
    pub exists: u32,
    pub recent: u32,
    pub uid_validity: Option<u32>,
    pub uid_next: Option<u32>,
    /// Sequence number of the first unseen message.
    pub unseen: Option<u32>,
    pub flags: Vec<String>,
    pub read_only: bool,
}

impl MailboxInfo {
    /// Fold one untagged response (without the leading `* `) into
    /// the mailbox state. Unrelated responses are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when a recognized response carries
    /// a malformed number.
    pub fn apply(&mut self, text: &str) -> Result<()> {
        if let Some(rest) = text.strip_prefix("FLAGS ") {
            self.flags = parse_paren_list(rest)?;
            return Ok(());
        }

        if let Some(rest) = text.strip_prefix("OK ") {
            let (Some(code), _) = split_response_code(rest) else {
                return Ok(());
            };
            let (name, arg) = code.split_once(' ').unwrap_or((code.as_str(), ""));
            match name.to_ascii_uppercase().as_str() {
                "UIDVALIDITY" => self.uid_validity = Some(parse_number(arg, "UIDVALIDITY")?),
                "UIDNEXT" => self.uid_next = Some(parse_number(arg, "UIDNEXT")?),
                "UNSEEN" => self.unseen = Some(parse_number(arg, "UNSEEN")?),
                _ => {}
            }
            return Ok(());
        }

        if let Some((count, word)) = text.split_once(' ') {
            match word.trim().to_ascii_uppercase().as_str() {
                "EXISTS" => self.exists = parse_number(count, "EXISTS")?,
                "RECENT" => self.recent = parse_number(count, "RECENT")?,
                _ => {}
            }
        }
        Ok(())
    }
}

fn parse_number(s: &str, what: &str) -> Result<u32> {
    s.trim()
        .parse()
        .map_err(|_| Error::Protocol(format!("malformed {what} value: {s:?}")))
}

fn parse_paren_list(s: &str) -> Result<Vec<String>> {
    let inner = s
        .trim()
        .strip_prefix('(')
        .and_then(|rest| rest.split_once(')'))
        .map(|(inner, _)| inner)
        .ok_or_else(|| Error::Protocol(format!("malformed list: {s:?}")))?;
    Ok(inner.split_whitespace().map(str::to_string).collect())
}

/// Summary of one message from a header-only FETCH.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageSummary {
    pub seq: u32,
    pub uid: Option<u32>,
    pub flags: Vec<String>,
    pub size: Option<u32>,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub date: Option<String>,
}

impl MessageSummary {
    /// Parse an untagged `N FETCH (...)` response. Returns `Ok(None)`
    /// for responses that are not FETCH data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for FETCH data with malformed
    /// numbers or flag lists.
    pub fn parse(text: &str, literals: &[Bytes]) -> Result<Option<Self>> {
        let Some((seq, rest)) = text.split_once(' ') else {
            return Ok(None);
        };
        let Some(items) = rest.strip_prefix("FETCH ") else {
            return Ok(None);
        };

        let mut summary = Self {
            seq: parse_number(seq, "FETCH sequence number")?,
            ..Self::default()
        };

        if let Some(value) = value_after(items, "UID ") {
            summary.uid = Some(parse_number(value, "UID")?);
        }
        if let Some(value) = value_after(items, "RFC822.SIZE ") {
            summary.size = Some(parse_number(value, "RFC822.SIZE")?);
        }
        if let Some(pos) = items.find("FLAGS (") {
            summary.flags = parse_paren_list(&items[pos + "FLAGS ".len()..])?;
        }

        if let Some(header) = literals.first()
            && let Some(message) = MessageParser::default().parse(&header[..])
        {
            summary.subject = message.subject().map(str::to_string);
            summary.from = message
                .from()
                .and_then(Address::first)
                .and_then(display_address);
            summary.date = message
                .header_raw("Date")
                .map(|date| date.trim().to_string());
        }

        Ok(Some(summary))
    }

    /// Fold in another FETCH response for the same message, such as a
    /// flag update the server sent alongside the requested data.
    pub fn merge(&mut self, other: Self) {
        self.uid = self.uid.or(other.uid);
        self.size = self.size.or(other.size);
        if !other.flags.is_empty() {
            self.flags = other.flags;
        }
        self.subject = self.subject.take().or(other.subject);
        self.from = self.from.take().or(other.from);
        self.date = self.date.take().or(other.date);
    }
}

/// The token following `key` (e.g. `"UID "`) in a FETCH item list.
fn value_after<'a>(items: &'a str, key: &str) -> Option<&'a str> {
    let start = items
        .match_indices(key)
        .find(|(i, _)| *i == 0 || items.as_bytes()[i - 1] == b' ' || items.as_bytes()[i - 1] == b'(')?
        .0
        + key.len();
    let rest = &items[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

fn display_address(addr: &Addr<'_>) -> Option<String> {
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) => Some(format!("{name} <{address}>")),
        (None, Some(address)) => Some(address.to_string()),
        (Some(name), None) => Some(name.to_string()),
        (None, None) => None,
    }
}
