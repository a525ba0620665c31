//! SELECT command handler.
//!
//! Opens a folder and reports what the checker summarizes:
//! `* N EXISTS`, `* N RECENT`, `[UIDVALIDITY]`, `[UIDNEXT]` and
//! `[UNSEEN]` (sequence number of the first unseen message).

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Fixed UIDVALIDITY of every fake folder.
pub const UIDVALIDITY: u32 = 1_700_000_000;

/// Handle the SELECT command. Returns the selected folder name.
pub async fn handle_select<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    folder_name: &str,
    mailbox: &Mailbox,
    stream: &mut BufReader<S>,
) -> Option<String> {
    let Some(folder) = mailbox.get_folder(folder_name) else {
        let resp = format!("{tag} NO [NONEXISTENT] Unknown Mailbox: {folder_name}\r\n");
        let _ = write_line(stream, &resp).await;
        return None;
    };

    let mut lines = vec![
        "* FLAGS (\\Answered \\Flagged \\Draft \\Deleted \\Seen)\r\n".to_string(),
        format!("* {} EXISTS\r\n", folder.messages.len()),
        // Messages nobody has seen yet count as recent here.
        format!(
            "* {} RECENT\r\n",
            folder.messages.iter().filter(|m| !m.is_seen()).count()
        ),
        format!("* OK [UIDVALIDITY {UIDVALIDITY}] UIDs valid\r\n"),
    ];
    let uidnext = folder
        .messages
        .iter()
        .map(|m| m.uid)
        .max()
        .map_or(1, |max| max + 1);
    lines.push(format!("* OK [UIDNEXT {uidnext}] Predicted next UID\r\n"));
    if let Some(pos) = folder.messages.iter().position(|m| !m.is_seen()) {
        lines.push(format!("* OK [UNSEEN {}] First unseen\r\n", pos + 1));
    }
    lines.push(format!("{tag} OK [READ-WRITE] {folder_name} selected. (Success)\r\n"));

    for line in &lines {
        if write_line(stream, line).await.is_err() {
            return None;
        }
    }
    Some(folder.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::{MailboxBuilder, raw_message};
    use tokio::io::AsyncReadExt;

    async fn run(folder_name: &str, mailbox: &Mailbox) -> (String, Option<String>) {
        let (mut client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        let selected = handle_select("A2", folder_name, mailbox, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        (String::from_utf8(buf).unwrap(), selected)
    }

    fn inbox() -> Mailbox {
        let raw = raw_message("a@b.c", "hi", "Mon, 1 Jan 2024 10:00:00 +0000", "body");
        MailboxBuilder::new()
            .folder("INBOX")
            .message(5, &["\\Seen"], &raw)
            .message(9, &[], &raw)
            .message(12, &[], &raw)
            .build()
    }

    #[tokio::test]
    async fn reports_counts_and_uids() {
        let (output, selected) = run("INBOX", &inbox()).await;

        assert_eq!(selected.as_deref(), Some("INBOX"));
        assert!(output.contains("* 3 EXISTS\r\n"));
        assert!(output.contains("* 2 RECENT\r\n"));
        assert!(output.contains("[UIDVALIDITY 1700000000]"));
        assert!(output.contains("[UIDNEXT 13]"));
        assert!(output.contains("[UNSEEN 2]"));
        assert!(output.ends_with("A2 OK [READ-WRITE] INBOX selected. (Success)\r\n"));
    }

    #[tokio::test]
    async fn empty_folder_has_uidnext_1_and_no_unseen() {
        let mailbox = MailboxBuilder::new().folder("INBOX").build();
        let (output, _) = run("inbox", &mailbox).await;
        assert!(output.contains("* 0 EXISTS\r\n"));
        assert!(output.contains("[UIDNEXT 1]"));
        assert!(!output.contains("UNSEEN"));
    }

    #[tokio::test]
    async fn missing_folder_is_refused() {
        let (output, selected) = run("Nope", &inbox()).await;
        assert!(selected.is_none());
        assert_eq!(output, "A2 NO [NONEXISTENT] Unknown Mailbox: Nope\r\n");
    }
}
