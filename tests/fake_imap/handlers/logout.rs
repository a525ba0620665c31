//! LOGOUT command handler: untagged BYE, then the tagged OK.

use crate::fake_imap::io::write_line;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

pub async fn handle_logout<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    stream: &mut BufReader<S>,
) {
    let _ = write_line(stream, "* BYE LOGOUT Requested\r\n").await;
    let _ = write_line(stream, &format!("{tag} OK 73 good day (Success)\r\n")).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn bye_comes_before_tagged_ok() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(server);
        handle_logout("A0004", &mut stream).await;
        drop(stream);

        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        assert_eq!(
            output,
            "* BYE LOGOUT Requested\r\nA0004 OK 73 good day (Success)\r\n"
        );
    }
}
