//! FETCH command handler (sequence numbers, not UIDs).
//!
//! The checker asks for headers only:
//!
//! ```text
//! A0003 FETCH 2:3 (UID FLAGS RFC822.SIZE BODY.PEEK[HEADER.FIELDS (SUBJECT FROM DATE)])
//! ```
//!
//! and each message comes back with its header fields as a counted
//! literal:
//!
//! ```text
//! * 2 FETCH (UID 9 FLAGS () RFC822.SIZE 412 BODY[HEADER.FIELDS (SUBJECT FROM DATE)] {87}
//! <exactly 87 bytes of header fields>
//! )
//! ```

use crate::fake_imap::io::{write_bytes, write_line};
use crate::fake_imap::mailbox::Mailbox;
use imap_codec::imap_types::sequence::{SeqOrUid, Sequence, SequenceSet};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

const HEADER_FIELDS: [&str; 3] = ["SUBJECT", "FROM", "DATE"];

/// Sequence numbers named by `seq_set`, clamped to `1..=exists`, in
/// ascending order. `*` stands for the last message.
fn resolve(seq_set: &SequenceSet, exists: u32) -> Vec<u32> {
    let value = |s: &SeqOrUid| match s {
        SeqOrUid::Value(v) => v.get(),
        SeqOrUid::Asterisk => exists,
    };

    let mut seqs: Vec<u32> = seq_set
        .0
        .as_ref()
        .iter()
        .flat_map(|seq| match seq {
            Sequence::Single(s) => value(s)..=value(s),
            Sequence::Range(a, b) => {
                let (a, b) = (value(a), value(b));
                a.min(b)..=a.max(b)
            }
        })
        .filter(|seq| (1..=exists).contains(seq))
        .collect();
    seqs.sort_unstable();
    seqs.dedup();
    seqs
}

pub async fn handle_fetch<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    sequence_set: &SequenceSet,
    mailbox: &Mailbox,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder) = selected_folder.and_then(|name| mailbox.get_folder(name)) else {
        let _ = write_line(stream, &format!("{tag} BAD No mailbox selected\r\n")).await;
        return;
    };

    let exists = u32::try_from(folder.messages.len()).unwrap();
    for seq in resolve(sequence_set, exists) {
        let message = &folder.messages[seq as usize - 1];
        let fields = message.header_fields(&HEADER_FIELDS);
        let head = format!(
            "* {seq} FETCH (UID {} FLAGS ({}) RFC822.SIZE {} BODY[HEADER.FIELDS (SUBJECT FROM DATE)] {{{}}}\r\n",
            message.uid,
            message.flags.join(" "),
            message.raw.len(),
            fields.len()
        );
        if write_line(stream, &head).await.is_err()
            || write_bytes(stream, &fields).await.is_err()
            || write_line(stream, ")\r\n").await.is_err()
        {
            return;
        }
    }

    let _ = write_line(stream, &format!("{tag} OK Success\r\n")).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::{MailboxBuilder, raw_message};
    use std::num::NonZeroU32;
    use tokio::io::AsyncReadExt;

    fn n(v: u32) -> SeqOrUid {
        SeqOrUid::Value(NonZeroU32::new(v).unwrap())
    }

    fn set(sequences: Vec<Sequence>) -> SequenceSet {
        SequenceSet(sequences.try_into().unwrap())
    }

    fn mailbox() -> Mailbox {
        MailboxBuilder::new()
            .folder("INBOX")
            .message(
                7,
                &["\\Seen"],
                &raw_message("a@b.c", "first", "Mon, 1 Jan 2024 10:00:00 +0000", "one"),
            )
            .message(
                8,
                &[],
                &raw_message("d@e.f", "second", "Tue, 2 Jan 2024 10:00:00 +0000", "two"),
            )
            .message(
                9,
                &[],
                &raw_message("g@h.i", "third", "Wed, 3 Jan 2024 10:00:00 +0000", "three"),
            )
            .build()
    }

    async fn run(sequence_set: &SequenceSet, selected: Option<&str>) -> String {
        let (mut client, server) = tokio::io::duplex(8192);
        let mut stream = BufReader::new(server);
        handle_fetch("A3", sequence_set, &mailbox(), selected, &mut stream).await;
        drop(stream);

        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        output
    }

    #[test]
    fn ranges_are_clamped_and_ordered() {
        let seqs = resolve(
            &set(vec![Sequence::Range(n(5), n(2)), Sequence::Single(n(1))]),
            3,
        );
        assert_eq!(seqs, vec![1, 2, 3]);

        let last = resolve(&set(vec![Sequence::Single(SeqOrUid::Asterisk)]), 3);
        assert_eq!(last, vec![3]);
    }

    #[tokio::test]
    async fn returns_header_literals_for_range() {
        let output = run(&set(vec![Sequence::Range(n(2), n(3))]), Some("INBOX")).await;

        assert!(output.starts_with("* 2 FETCH (UID 8 FLAGS () RFC822.SIZE "));
        assert!(output.contains("Subject: second\r\n"));
        assert!(output.contains("* 3 FETCH (UID 9 "));
        assert!(!output.contains("first"));
        assert!(!output.contains("To: "));
        assert!(output.ends_with("A3 OK Success\r\n"));
    }

    #[tokio::test]
    async fn literal_length_matches_payload() {
        let output = run(&set(vec![Sequence::Single(n(1))]), Some("INBOX")).await;

        let open = output.find('{').unwrap();
        let close = output.find("}\r\n").unwrap();
        let len: usize = output[open + 1..close].parse().unwrap();
        let literal = &output[close + 3..close + 3 + len];
        assert!(literal.starts_with("From: a@b.c\r\n"));
        assert!(literal.ends_with("\r\n\r\n"));
        assert_eq!(&output[close + 3 + len..close + 6 + len], ")\r\n");
    }

    #[tokio::test]
    async fn requires_selected_mailbox() {
        let output = run(&set(vec![Sequence::Single(n(1))]), None).await;
        assert_eq!(output, "A3 BAD No mailbox selected\r\n");
    }
}
