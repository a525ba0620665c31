//! In-process fake IMAP server for integration testing
//!
//! # What the checker exercises
//!
//! ```text
//!   Client connects via TCP
//!       |
//!   STARTTLS:  plaintext greeting, "S0001 STARTTLS", TLS handshake
//!   implicit:  TLS handshake, then the greeting over TLS
//!       |
//!   Client sends AUTHENTICATE XOAUTH2 (initial response inline when
//!   the greeting advertises SASL-IR, after a "+" otherwise)
//!       |
//!   SELECT, FETCH of the newest headers, LOGOUT
//! ```
//!
//! ## XOAUTH2 failures
//!
//! A server that does not like the bearer token answers with a `+`
//! continuation carrying a base64 JSON error (`{"status":"401",...}`).
//! The client must reply with an empty line, after which the server
//! sends the tagged `NO`:
//!
//! ```text
//!   Client:  A0001 AUTHENTICATE XOAUTH2 dXNlcj1...
//!   Server:  + eyJzdGF0dXMiOiI0MDEiLC4uLn0=
//!   Client:
//!   Server:  A0001 NO [AUTHENTICATIONFAILED] Invalid credentials (Failure)
//! ```
//!
//! The server records every command it receives and counts
//! AUTHENTICATE attempts so tests can assert on the retry policy.
//! With [`ServerOptions::stall`] set it goes silent after reading the
//! chosen command, so tests can drive the per-phase timeouts, and it
//! counts closed connections so they can check the client hung up.

use super::handlers::{AuthPolicy, handle_authenticate, handle_fetch, handle_logout, handle_select};
use super::io::{read_line, write_line};
use super::mailbox::Mailbox;
use imap_codec::CommandCodec;
use imap_codec::decode::Decoder;
use imap_codec::imap_types::command::CommandBody;
use imap_codec::imap_types::mailbox::Mailbox as ImapMailbox;
use oauth_imap_probe::{Endpoint, TlsMode};
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

/// How the fake server behaves.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub tls: TlsMode,
    /// Wait this long before sending the greeting.
    pub greeting_delay: Duration,
    /// Advertise SASL-IR in the (TLS) greeting. Only visible to the
    /// client in implicit TLS mode.
    pub sasl_ir: bool,
    pub auth: AuthPolicy,
    /// Never answer this command or anything after it.
    pub stall: Option<Stall>,
}

/// A command the server reads and then leaves unanswered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stall {
    Authenticate,
    Select,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            tls: TlsMode::StartTls,
            greeting_delay: Duration::ZERO,
            sasl_ir: true,
            auth: AuthPolicy::Accept(vec![GOOD_TOKEN.to_string()]),
            stall: None,
        }
    }
}

/// The token the default server accepts.
pub const GOOD_TOKEN: &str = "good-token";

struct ServerState {
    mailbox: Mailbox,
    options: ServerOptions,
    commands: Mutex<Vec<String>>,
    auth_attempts: AtomicUsize,
    closed: AtomicUsize,
}

impl ServerState {
    fn record(&self, command: &str) {
        self.commands.lock().unwrap().push(command.to_string());
    }
}

/// A fake XOAUTH2 IMAP server on localhost with an OS-assigned port.
///
/// The TLS certificate is self-signed (generated with `rcgen`), so
/// probes must run with `tls_verify: false`.
pub struct FakeImapServer {
    port: u16,
    state: Arc<ServerState>,
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Start a STARTTLS server that accepts [`GOOD_TOKEN`].
    pub async fn start(mailbox: Mailbox) -> Self {
        Self::start_with(mailbox, ServerOptions::default()).await
    }

    pub async fn start_with(mailbox: Mailbox, options: ServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");
        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der.into())
        .expect("build server TLS config");

        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let state = Arc::new(ServerState {
            mailbox,
            options,
            commands: Mutex::new(Vec::new()),
            auth_attempts: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        });

        let shared = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let state = Arc::clone(&shared);
                tokio::spawn(async move {
                    handle_connection(stream, acceptor, &state).await;
                    state.closed.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            port,
            state,
            _handle: handle,
        }
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.port, self.state.options.tls)
    }

    /// Number of AUTHENTICATE commands received so far.
    pub fn auth_attempts(&self) -> usize {
        self.state.auth_attempts.load(Ordering::SeqCst)
    }

    /// Number of connections that have ended, by either side.
    pub fn closed_connections(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Wait up to `limit` for `count` connections to have ended.
    pub async fn wait_closed(&self, count: usize, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while self.closed_connections() < count {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    /// Command names received so far, in order, across connections.
    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().unwrap().clone()
    }
}

/// A port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind to ephemeral port");
    listener.local_addr().unwrap().port()
}

async fn handle_connection(stream: TcpStream, acceptor: TlsAcceptor, state: &ServerState) {
    let options = &state.options;

    match options.tls {
        TlsMode::Implicit => {
            let Ok(tls) = acceptor.accept(stream).await else {
                return;
            };
            let mut reader = BufReader::new(tls);
            tokio::time::sleep(options.greeting_delay).await;
            let caps = if options.sasl_ir {
                "IMAP4rev1 AUTH=XOAUTH2 SASL-IR"
            } else {
                "IMAP4rev1 AUTH=XOAUTH2"
            };
            let greeting = format!("* OK [CAPABILITY {caps}] Fake server ready\r\n");
            if write_line(&mut reader, &greeting).await.is_err() {
                return;
            }
            handle_imap_session(reader, state).await;
        }
        TlsMode::StartTls => {
            let mut reader = BufReader::new(stream);
            tokio::time::sleep(options.greeting_delay).await;
            if write_line(
                &mut reader,
                "* OK [CAPABILITY IMAP4rev1 STARTTLS LOGINDISABLED] Fake server ready\r\n",
            )
            .await
            .is_err()
            {
                return;
            }

            let Some(line) = read_line(&mut reader).await else {
                return;
            };
            let (tag, command) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            if !command.eq_ignore_ascii_case("STARTTLS") {
                let _ = write_line(&mut reader, &format!("{tag} BAD Expected STARTTLS\r\n")).await;
                return;
            }
            state.record("STARTTLS");
            let resp = format!("{tag} OK Begin TLS negotiation now\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                return;
            }

            let Ok(tls) = acceptor.accept(reader.into_inner()).await else {
                return;
            };
            handle_imap_session(BufReader::new(tls), state).await;
        }
    }
}

/// Stop answering: record whatever the client still sends and return
/// once it closes the connection.
async fn go_silent<S: AsyncRead + AsyncWrite + Unpin>(
    reader: &mut BufReader<S>,
    state: &ServerState,
) {
    while let Some(line) = read_line(reader).await {
        if let Some(name) = line.split(' ').nth(1) {
            state.record(&name.to_ascii_uppercase());
        }
    }
}

fn mailbox_name(mb: &ImapMailbox<'_>) -> String {
    match mb {
        ImapMailbox::Inbox => "INBOX".to_string(),
        ImapMailbox::Other(other) => {
            let bytes: &[u8] = other.as_ref();
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Command loop after TLS is up.
///
/// AUTHENTICATE is handled by hand because its initial response and
/// the continuation exchange are not plain commands. Everything else
/// goes through `imap-codec`.
async fn handle_imap_session<S: AsyncRead + AsyncWrite + Unpin>(
    mut reader: BufReader<S>,
    state: &ServerState,
) {
    let codec = CommandCodec::default();
    let mut authenticated = false;
    let mut selected: Option<String> = None;

    while let Some(line) = read_line(&mut reader).await {
        if line.trim().is_empty() {
            continue;
        }

        let mut words = line.splitn(3, ' ');
        let tag = words.next().unwrap_or("*").to_string();
        let name = words.next().unwrap_or_default().to_ascii_uppercase();
        let args = words.next().unwrap_or_default();

        if name == "AUTHENTICATE" {
            state.record("AUTHENTICATE");
            state.auth_attempts.fetch_add(1, Ordering::SeqCst);
            if state.options.stall == Some(Stall::Authenticate) {
                go_silent(&mut reader, state).await;
                break;
            }
            authenticated = handle_authenticate(
                &tag,
                args,
                &state.options.auth,
                state.options.sasl_ir,
                &mut reader,
            )
            .await;
            continue;
        }

        let with_crlf = format!("{line}\r\n");
        let Ok((_, command)) = codec.decode(with_crlf.as_bytes()) else {
            if write_line(&mut reader, &format!("{tag} BAD Parse error\r\n"))
                .await
                .is_err()
            {
                break;
            }
            continue;
        };
        state.record(&name);

        match command.body {
            CommandBody::Logout => {
                handle_logout(&tag, &mut reader).await;
                break;
            }
            _ if !authenticated => {
                let resp = format!("{tag} BAD Authenticate first\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
            }
            CommandBody::Select { .. } if state.options.stall == Some(Stall::Select) => {
                go_silent(&mut reader, state).await;
                break;
            }
            CommandBody::Select { mailbox: mb, .. } => {
                let name = mailbox_name(&mb);
                selected = handle_select(&tag, &name, &state.mailbox, &mut reader).await;
            }
            CommandBody::Fetch {
                sequence_set,
                uid: false,
                ..
            } => {
                handle_fetch(
                    &tag,
                    &sequence_set,
                    &state.mailbox,
                    selected.as_deref(),
                    &mut reader,
                )
                .await;
            }
            _ => {
                let resp = format!("{tag} BAD Unknown command\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
            }
        }
    }
}
