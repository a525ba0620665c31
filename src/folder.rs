//! Mailbox names used by SELECT
//!
//! INBOX is special in IMAP: it is case-insensitive and always
//! exists. Everything else is server-specific, sent in modified
//! UTF-7 (RFC 3501 section 5.1.3) and quoted when it is not a plain
//! atom.

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use std::fmt;

/// The mailbox a probe selects.
///
/// # Examples
///
/// ```
/// use oauth_imap_probe::Folder;
///
/// assert_eq!(Folder::from("inbox"), Folder::Inbox);
/// assert_eq!(Folder::named("[Gmail]/All Mail").to_wire(), "\"[Gmail]/All Mail\"");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Folder {
    /// The INBOX folder (RFC 3501 required, case-insensitive).
    #[default]
    Inbox,
    /// Any other mailbox, by its server-side name.
    Named(String),
}

impl Folder {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::from(name.into())
    }

    /// The mailbox name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Inbox => "INBOX",
            Self::Named(name) => name,
        }
    }

    /// The mailbox as an IMAP `astring`: modified UTF-7, then a bare
    /// atom when possible, otherwise a quoted string with `"` and `\`
    /// escaped.
    #[must_use]
    pub fn to_wire(&self) -> String {
        let name = encode_utf7(self.as_str());
        if !name.is_empty() && name.bytes().all(is_atom_char) {
            return name;
        }

        let mut quoted = String::with_capacity(name.len() + 2);
        quoted.push('"');
        for c in name.chars() {
            if c == '"' || c == '\\' {
                quoted.push('\\');
            }
            quoted.push(c);
        }
        quoted.push('"');
        quoted
    }
}

/// Modified UTF-7: printable ASCII passes through, `&` becomes `&-`,
/// and runs of anything else become `&` + base64 of their UTF-16BE
/// form with `,` for `/` + `-`.
fn encode_utf7(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut run: Vec<u16> = Vec::new();
    for c in name.chars() {
        if matches!(c, ' '..='~') {
            flush_utf7_run(&mut out, &mut run);
            if c == '&' {
                out.push_str("&-");
            } else {
                out.push(c);
            }
        } else {
            let mut units = [0; 2];
            run.extend_from_slice(c.encode_utf16(&mut units));
        }
    }
    flush_utf7_run(&mut out, &mut run);
    out
}

fn flush_utf7_run(out: &mut String, run: &mut Vec<u16>) {
    if run.is_empty() {
        return;
    }
    let bytes: Vec<u8> = run.drain(..).flat_map(u16::to_be_bytes).collect();
    out.push('&');
    out.push_str(&STANDARD_NO_PAD.encode(bytes).replace('/', ","));
    out.push('-');
}

/// ATOM-CHAR from RFC 3501, plus `]` which is allowed in an astring.
const fn is_atom_char(b: u8) -> bool {
    b.is_ascii_graphic()
        && !matches!(b, b'(' | b')' | b'{' | b'%' | b'*' | b'"' | b'\\')
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Folder {
    fn from(s: &str) -> Self {
        if s.eq_ignore_ascii_case("inbox") {
            Self::Inbox
        } else {
            Self::Named(s.to_string())
        }
    }
}

impl From<String> for Folder {
    fn from(s: String) -> Self {
        if s.eq_ignore_ascii_case("inbox") {
            Self::Inbox
        } else {
            Self::Named(s)
        }
    }
}
