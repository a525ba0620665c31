//! IMAP response framing
//!
//! Server responses are CRLF-terminated lines, except that a line
//! ending in a literal marker `{N}` is followed by exactly `N` raw
//! bytes, after which the same response continues on the next line:
//!
//! ```text
//! * 1 FETCH (UID 7 BODY[HEADER.FIELDS (SUBJECT)] {20}\r\n
//! Subject: hi\r\n
//! \r\n
//! )\r\n
//! ```
//!
//! Literal bytes may contain CRLF, so the decoder skips them by their
//! declared length instead of scanning for line breaks inside them.

use crate::error::{Error, Result};
use bytes::{Buf, Bytes, BytesMut};
use std::ops::Range;
use tokio_util::codec::{Decoder, Encoder};

/// Longest text line accepted, excluding literal payloads.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Largest literal accepted in a single response.
pub const MAX_LITERAL_LEN: usize = 16 * 1024 * 1024;

/// Completion status of a tagged or greeting response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bad,
}

/// One complete server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `<tag> OK|NO|BAD [code] text`
    Tagged {
        tag: String,
        status: Status,
        code: Option<String>,
        text: String,
    },
    /// `* ...`, with literal markers kept in `text` and the literal
    /// payloads in order in `literals`.
    Untagged { text: String, literals: Vec<Bytes> },
    /// `+ ...`
    Continuation { text: String },
}

impl Response {
    fn parse(text: String, literals: Vec<Bytes>) -> Result<Self> {
        if let Some(rest) = text.strip_prefix('+') {
            return Ok(Self::Continuation {
                text: rest.strip_prefix(' ').unwrap_or(rest).to_string(),
            });
        }

        if let Some(rest) = text.strip_prefix("* ") {
            return Ok(Self::Untagged {
                text: rest.to_string(),
                literals,
            });
        }

        let (tag, rest) = text
            .split_once(' ')
            .ok_or_else(|| Error::Protocol(format!("unparseable response: {text:?}")))?;
        let (word, rest) = rest.split_once(' ').unwrap_or((rest, ""));
        let status = match word.to_ascii_uppercase().as_str() {
            "OK" => Status::Ok,
            "NO" => Status::No,
            "BAD" => Status::Bad,
            other => {
                return Err(Error::Protocol(format!(
                    "unexpected status {other:?} for tag {tag}"
                )));
            }
        };
        let (code, text) = split_response_code(rest);

        Ok(Self::Tagged {
            tag: tag.to_string(),
            status,
            code,
            text,
        })
    }
}

/// Split `[CODE args] human text` into its parts.
pub fn split_response_code(text: &str) -> (Option<String>, String) {
    if let Some(rest) = text.strip_prefix('[')
        && let Some(end) = rest.find(']')
    {
        let code = rest[..end].to_string();
        let human = rest[end + 1..].trim_start().to_string();
        return (Some(code), human);
    }
    (None, text.to_string())
}

/// Parse a trailing `{N}` or `{N+}` literal marker.
fn literal_len(line: &[u8]) -> Result<Option<usize>> {
    let Some(inner) = line.strip_suffix(b"}") else {
        return Ok(None);
    };
    let Some(open) = inner.iter().rposition(|&b| b == b'{') else {
        return Ok(None);
    };
    let digits = &inner[open + 1..];
    let digits = digits.strip_suffix(b"+").unwrap_or(digits);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Ok(None);
    }

    // Digits only, so this is valid UTF-8.
    let len: usize = std::str::from_utf8(digits)
        .ok()
        .and_then(|d| d.parse().ok())
        .ok_or_else(|| Error::Protocol("literal length overflows".into()))?;
    if len > MAX_LITERAL_LEN {
        return Err(Error::Protocol(format!(
            "literal of {len} bytes exceeds limit of {MAX_LITERAL_LEN}"
        )));
    }
    Ok(Some(len))
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Codec for the client side of an IMAP connection: decodes
/// [`Response`]s and encodes command lines.
#[derive(Debug, Default)]
pub struct ImapCodec;

impl Decoder for ImapCodec {
    type Item = Response;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Response>> {
        let mut pos = 0;
        let mut text_parts: Vec<Range<usize>> = Vec::new();
        let mut literal_parts: Vec<Range<usize>> = Vec::new();

        loop {
            let Some(offset) = find_crlf(&src[pos..]) else {
                if src.len() - pos > MAX_LINE_LEN {
                    return Err(Error::Protocol("response line too long".into()));
                }
                return Ok(None);
            };
            if offset > MAX_LINE_LEN {
                return Err(Error::Protocol("response line too long".into()));
            }

            let line_end = pos + offset;
            text_parts.push(pos..line_end);

            match literal_len(&src[pos..line_end])? {
                Some(len) => {
                    let start = line_end + 2;
                    let end = start + len;
                    if src.len() < end {
                        src.reserve(end - src.len());
                        return Ok(None);
                    }
                    literal_parts.push(start..end);
                    pos = end;
                }
                None => {
                    let text: String = text_parts
                        .iter()
                        .map(|r| String::from_utf8_lossy(&src[r.clone()]))
                        .collect();
                    let literals = literal_parts
                        .iter()
                        .map(|r| Bytes::copy_from_slice(&src[r.clone()]))
                        .collect();
                    src.advance(line_end + 2);
                    return Response::parse(text, literals).map(Some);
                }
            }
        }
    }
}

impl Encoder<String> for ImapCodec {
    type Error = Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<()> {
        if line.contains(['\r', '\n']) {
            return Err(Error::Protocol("command line contains a line break".into()));
        }
        dst.reserve(line.len() + 2);
        dst.extend_from_slice(line.as_bytes());
        dst.extend_from_slice(b"\r\n");
        Ok(())
    }
}
