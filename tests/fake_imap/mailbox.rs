//! Test data model for the fake IMAP server
//!
//! ```ignore
//! let mailbox = MailboxBuilder::new()
//!     .folder("INBOX")
//!         .message(1, &["\\Seen"], raw_rfc2822_bytes)
//!         .message(2, &[], raw_rfc2822_bytes)
//!     .folder("Archive")
//!     .build();
//! ```

/// Folders and the messages in them, shared read-only by every
/// connection to the server.
#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    pub folders: Vec<Folder>,
}

impl Mailbox {
    /// Look up a folder. INBOX matches case-insensitively, everything
    /// else exactly.
    pub fn get_folder(&self, name: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| {
            f.name == name || (f.name.eq_ignore_ascii_case("INBOX") && name.eq_ignore_ascii_case("INBOX"))
        })
    }
}

#[derive(Debug, Clone)]
pub struct Folder {
    pub name: String,
    pub messages: Vec<TestMessage>,
}

/// A stored message. Its sequence number is its 1-based position in
/// the folder.
#[derive(Debug, Clone)]
pub struct TestMessage {
    pub uid: u32,
    pub flags: Vec<String>,
    pub raw: Vec<u8>,
}

impl TestMessage {
    /// The requested header fields in RFC 2822 form, terminated by
    /// the empty line, as `BODY[HEADER.FIELDS (...)]` returns them.
    pub fn header_fields(&self, names: &[&str]) -> Vec<u8> {
        let text = String::from_utf8_lossy(&self.raw);
        let header = text.split("\r\n\r\n").next().unwrap_or_default();

        let mut out = String::new();
        let mut keep = false;
        for line in header.split("\r\n") {
            if line.starts_with([' ', '\t']) {
                if keep {
                    out.push_str(line);
                    out.push_str("\r\n");
                }
                continue;
            }
            keep = line
                .split_once(':')
                .is_some_and(|(name, _)| names.iter().any(|n| n.eq_ignore_ascii_case(name.trim())));
            if keep {
                out.push_str(line);
                out.push_str("\r\n");
            }
        }
        out.push_str("\r\n");
        out.into_bytes()
    }

    pub fn is_seen(&self) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case("\\Seen"))
    }
}

pub struct MailboxBuilder {
    folders: Vec<Folder>,
}

impl MailboxBuilder {
    pub fn new() -> Self {
        Self {
            folders: Vec::new(),
        }
    }

    /// Start a new folder; following `.message()` calls fill it.
    pub fn folder(mut self, name: &str) -> Self {
        self.folders.push(Folder {
            name: name.to_string(),
            messages: Vec::new(),
        });
        self
    }

    /// # Panics
    ///
    /// Panics if called before any `.folder()` call.
    pub fn message(mut self, uid: u32, flags: &[&str], raw: &[u8]) -> Self {
        self.folders
            .last_mut()
            .expect("call .folder() before .message()")
            .messages
            .push(TestMessage {
                uid,
                flags: flags.iter().map(|f| (*f).to_string()).collect(),
                raw: raw.to_vec(),
            });
        self
    }

    pub fn build(self) -> Mailbox {
        Mailbox {
            folders: self.folders,
        }
    }
}

/// A minimal RFC 2822 message.
pub fn raw_message(from: &str, subject: &str, date: &str, body: &str) -> Vec<u8> {
    format!(
        "From: {from}\r\n\
         To: user@example.com\r\n\
         Subject: {subject}\r\n\
         Date: {date}\r\n\
         Message-ID: <{subject}@fake.test>\r\n\
         \r\n\
         {body}"
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fields_keeps_requested_headers_only() {
        let message = TestMessage {
            uid: 1,
            flags: vec![],
            raw: b"From: a@b.c\r\nTo: x@y.z\r\nSubject: long\r\n subject\r\n\r\nSubject: in body".to_vec(),
        };
        let fields = message.header_fields(&["SUBJECT", "FROM"]);
        assert_eq!(fields, b"From: a@b.c\r\nSubject: long\r\n subject\r\n\r\n");
    }

    #[test]
    fn inbox_lookup_is_case_insensitive() {
        let mailbox = MailboxBuilder::new().folder("INBOX").folder("Archive").build();
        assert!(mailbox.get_folder("inbox").is_some());
        assert!(mailbox.get_folder("archive").is_none());
    }
}
