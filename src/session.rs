//! IMAP session state machine
//!
//! One [`ImapSession`] owns one connection for its whole life:
//!
//! ```text
//! Disconnected -> TlsConnected -> Authenticating -> Authenticated -> Selected -> Closed
//!        \              \               \                 \              \
//!         +--------------+---------------+-----------------+--------------+--> Errored(kind)
//! ```
//!
//! `Closed` and `Errored` are sinks. Nothing moves backwards, so a
//! second authentication attempt always needs a new session (and a new
//! connection).

use crate::codec::{ImapCodec, Response, Status, split_response_code};
use crate::error::{Error, ErrorKind, Result};
use crate::folder::Folder;
use crate::mailbox::{MailboxInfo, MessageSummary};
use crate::token::BearerToken;
use crate::xoauth2::{self, XOAuth2Failure};
use futures::{SinkExt, StreamExt};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    TlsConnected,
    Authenticating,
    Authenticated,
    Selected,
    Closed,
    Errored(ErrorKind),
}

impl SessionState {
    const fn rank(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::TlsConnected => 1,
            Self::Authenticating => 2,
            Self::Authenticated => 3,
            Self::Selected => 4,
            Self::Closed | Self::Errored(_) => 5,
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored(_))
    }

    /// Whether `self -> next` is an edge of the session DAG.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Closed | Self::Errored(_) => true,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("Disconnected"),
            Self::TlsConnected => f.write_str("TLSConnected"),
            Self::Authenticating => f.write_str("Authenticating"),
            Self::Authenticated => f.write_str("Authenticated"),
            Self::Selected => f.write_str("Selected"),
            Self::Closed => f.write_str("Closed"),
            Self::Errored(kind) => write!(f, "Errored({kind})"),
        }
    }
}

/// Capabilities announced in the server greeting, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Greeting {
    pub capabilities: Option<Vec<String>>,
}

impl Greeting {
    /// Validate a server greeting.
    ///
    /// # Errors
    ///
    /// `* BYE` is a [`Error::Network`] (the server refused the
    /// connection). `* PREAUTH` and anything else are
    /// [`Error::Protocol`]: XOAUTH2 needs a not-yet-authenticated
    /// connection.
    pub fn parse(response: &Response) -> Result<Self> {
        let Response::Untagged { text, .. } = response else {
            return Err(Error::Protocol(format!("unexpected greeting: {response:?}")));
        };
        let (word, rest) = text.split_once(' ').unwrap_or((text.as_str(), ""));
        match word.to_ascii_uppercase().as_str() {
            "OK" => {
                let capabilities = match split_response_code(rest) {
                    (Some(code), _) => code
                        .strip_prefix("CAPABILITY ")
                        .map(|caps| caps.split_whitespace().map(str::to_string).collect()),
                    (None, _) => None,
                };
                Ok(Self { capabilities })
            }
            "BYE" => Err(Error::Network(format!("server refused connection: {rest}"))),
            "PREAUTH" => Err(Error::Protocol(
                "server pre-authenticated the connection".into(),
            )),
            _ => Err(Error::Protocol(format!("unexpected greeting: {text:?}"))),
        }
    }

    fn has(&self, capability: &str) -> Option<bool> {
        self.capabilities
            .as_ref()
            .map(|caps| caps.iter().any(|c| c.eq_ignore_ascii_case(capability)))
    }
}

/// Why an AUTHENTICATE exchange failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRejection {
    pub kind: ErrorKind,
    pub detail: String,
}

impl AuthRejection {
    fn into_error(self) -> Error {
        match self.kind {
            ErrorKind::AuthExpired => Error::AuthExpired(self.detail),
            ErrorKind::Protocol => Error::Protocol(self.detail),
            _ => Error::Auth(self.detail),
        }
    }
}

/// What the client must do next in an AUTHENTICATE exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStep {
    /// Untagged data; keep reading.
    Pending,
    /// Server asked for the initial response (no SASL-IR).
    SendInitialResponse,
    /// Server sent an error challenge; answer with an empty line.
    AcknowledgeFailure,
    Accepted,
    Rejected(AuthRejection),
}

/// Pure state of one XOAUTH2 exchange, fed one response at a time.
#[derive(Debug)]
pub struct AuthExchange {
    tag: String,
    response_sent: bool,
    acknowledged: bool,
    failure: Option<XOAuth2Failure>,
}

impl AuthExchange {
    /// `response_sent` is true when the initial response went out
    /// with the command (SASL-IR).
    #[must_use]
    pub const fn new(tag: String, response_sent: bool) -> Self {
        Self {
            tag,
            response_sent,
            acknowledged: false,
            failure: None,
        }
    }

    pub fn step(&mut self, response: &Response) -> AuthStep {
        match response {
            Response::Untagged { .. } => AuthStep::Pending,
            Response::Continuation { .. } if !self.response_sent => {
                self.response_sent = true;
                AuthStep::SendInitialResponse
            }
            Response::Continuation { .. } if self.acknowledged => {
                AuthStep::Rejected(AuthRejection {
                    kind: ErrorKind::Protocol,
                    detail: "repeated continuation after error challenge".into(),
                })
            }
            Response::Continuation { text } => {
                self.failure = XOAuth2Failure::from_challenge(text);
                self.acknowledged = true;
                AuthStep::AcknowledgeFailure
            }
            Response::Tagged { tag, .. } if *tag != self.tag => AuthStep::Rejected(AuthRejection {
                kind: ErrorKind::Protocol,
                detail: format!("response for unknown tag {tag}"),
            }),
            Response::Tagged {
                status: Status::Ok, ..
            } => AuthStep::Accepted,
            Response::Tagged { status, text, .. } => {
                AuthStep::Rejected(classify_rejection(self.failure.as_ref(), *status, text))
            }
        }
    }
}

/// Classify a failed AUTHENTICATE.
///
/// Only a structured error payload with status 401 counts as an
/// expired/invalid token worth one refresh. A plain `NO`/`BAD`, or a
/// payload with any other status, is a permanent rejection.
#[must_use]
pub fn classify_rejection(
    failure: Option<&XOAuth2Failure>,
    status: Status,
    text: &str,
) -> AuthRejection {
    let verdict = if status == Status::Bad { "BAD" } else { "NO" };
    match failure {
        Some(failure) => AuthRejection {
            kind: failure.kind(),
            detail: format!(
                "server answered {verdict} ({text}) with XOAUTH2 status {}{}",
                failure.status,
                failure
                    .scope
                    .as_deref()
                    .map(|scope| format!(", scope {scope}"))
                    .unwrap_or_default()
            ),
        },
        None => AuthRejection {
            kind: ErrorKind::Auth,
            detail: format!("server answered {verdict}: {text}"),
        },
    }
}

/// Tagged completion of a command.
#[derive(Debug)]
struct Completion {
    status: Status,
    code: Option<String>,
    text: String,
}

#[derive(Debug, Default)]
struct Tags(u32);

impl Tags {
    fn next(&mut self) -> String {
        self.0 += 1;
        format!("A{:04}", self.0)
    }
}

/// One IMAP connection and its lifecycle.
pub struct ImapSession<S> {
    transport: Option<Framed<S, ImapCodec>>,
    state: SessionState,
    tags: Tags,
    greeting: Greeting,
}

impl<S> Default for ImapSession<S> {
    fn default() -> Self {
        Self::disconnected()
    }
}

impl<S> ImapSession<S> {
    #[must_use]
    pub const fn disconnected() -> Self {
        Self {
            transport: None,
            state: SessionState::Disconnected,
            tags: Tags(0),
            greeting: Greeting {
                capabilities: None,
            },
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn greeting(&self) -> &Greeting {
        &self.greeting
    }

    /// Move to `Errored(kind)` unless already in a terminal state.
    pub fn fail(&mut self, kind: ErrorKind) {
        if !self.state.is_terminal() {
            debug!(from = %self.state, %kind, "session errored");
            self.state = SessionState::Errored(kind);
        }
    }

    fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::Protocol(format!(
                "illegal session transition {} -> {next}",
                self.state
            )));
        }
        debug!(from = %self.state, to = %next, "session transition");
        self.state = next;
        Ok(())
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.fail(e.kind());
        }
        result
    }

    fn require(&self, expected: SessionState, command: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "{command} not allowed in state {}",
                self.state
            )))
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> ImapSession<S> {
    /// Take ownership of an encrypted stream.
    ///
    /// With `greeting_pending` the server greeting is read first
    /// (implicit TLS). After STARTTLS the greeting was consumed in the
    /// clear and the capabilities it listed are not trusted.
    ///
    /// # Errors
    ///
    /// Fails on a refused or malformed greeting, leaving the session
    /// `Errored`.
    pub async fn attach(&mut self, stream: S, greeting_pending: bool) -> Result<()> {
        let result = self.run_attach(stream, greeting_pending).await;
        self.record(result)
    }

    async fn run_attach(&mut self, stream: S, greeting_pending: bool) -> Result<()> {
        self.require(SessionState::Disconnected, "attach")?;
        self.transport = Some(Framed::new(stream, ImapCodec));

        if greeting_pending {
            let response = self.next_response().await?;
            self.greeting = Greeting::parse(&response)?;
            debug!(capabilities = ?self.greeting.capabilities, "greeting received");
        }
        self.transition(SessionState::TlsConnected)
    }

    /// Run `AUTHENTICATE XOAUTH2` with the given identity and token.
    ///
    /// # Errors
    ///
    /// [`Error::AuthExpired`] when the server reported the token as
    /// expired or invalid, [`Error::Auth`] for any other rejection or
    /// an unusable credential. The session is `Errored` afterwards.
    pub async fn authenticate(&mut self, user_identity: &str, token: &BearerToken) -> Result<()> {
        let result = self.run_authenticate(user_identity, token).await;
        self.record(result)
    }

    async fn run_authenticate(&mut self, user_identity: &str, token: &BearerToken) -> Result<()> {
        self.require(SessionState::TlsConnected, "AUTHENTICATE")?;
        let encoded = xoauth2::encode(user_identity, token)?;

        if self.greeting.has("AUTH=XOAUTH2") == Some(false) {
            return Err(Error::Auth(
                "server does not advertise AUTH=XOAUTH2".into(),
            ));
        }
        let sasl_ir = self.greeting.has("SASL-IR").unwrap_or(true);

        self.transition(SessionState::Authenticating)?;
        let tag = self.tags.next();
        let command = if sasl_ir {
            format!("{tag} AUTHENTICATE XOAUTH2 {encoded}")
        } else {
            format!("{tag} AUTHENTICATE XOAUTH2")
        };
        debug!(%tag, sasl_ir, "AUTHENTICATE XOAUTH2 <redacted>");
        self.send(command).await?;

        let mut exchange = AuthExchange::new(tag, sasl_ir);
        loop {
            let response = self.next_response().await?;
            match exchange.step(&response) {
                AuthStep::Pending => {}
                AuthStep::SendInitialResponse => self.send(encoded.clone()).await?,
                AuthStep::AcknowledgeFailure => {
                    debug!("error challenge received, acknowledging");
                    self.send(String::new()).await?;
                }
                AuthStep::Accepted => {
                    info!(user = user_identity, "authenticated");
                    return self.transition(SessionState::Authenticated);
                }
                AuthStep::Rejected(rejection) => {
                    warn!(kind = %rejection.kind, detail = %rejection.detail, "authentication rejected");
                    return Err(rejection.into_error());
                }
            }
        }
    }

    /// `SELECT` a mailbox.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] if the session is not authenticated (nothing
    /// is sent), the server refuses the mailbox, or the SELECT data is
    /// malformed.
    pub async fn select(&mut self, mailbox: &Folder) -> Result<MailboxInfo> {
        let result = self.run_select(mailbox).await;
        self.record(result)
    }

    async fn run_select(&mut self, mailbox: &Folder) -> Result<MailboxInfo> {
        self.require(SessionState::Authenticated, "SELECT")?;
        let (untagged, done) = self
            .run_command(format!("SELECT {}", mailbox.to_wire()))
            .await?;
        if done.status != Status::Ok {
            return Err(Error::Protocol(format!(
                "SELECT {mailbox} refused: {}",
                done.text
            )));
        }

        let mut info = MailboxInfo::default();
        for response in &untagged {
            if let Response::Untagged { text, .. } = response {
                info.apply(text)?;
            }
        }
        info.read_only = done
            .code
            .is_some_and(|c| c.eq_ignore_ascii_case("READ-ONLY"));

        info!(%mailbox, exists = info.exists, "mailbox selected");
        self.transition(SessionState::Selected)?;
        Ok(info)
    }

    /// Header summaries of the last `limit` messages of a mailbox
    /// holding `exists` messages.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] if no mailbox is selected or the FETCH
    /// fails.
    pub async fn fetch_recent(&mut self, exists: u32, limit: u32) -> Result<Vec<MessageSummary>> {
        let result = self.run_fetch_recent(exists, limit).await;
        self.record(result)
    }

    async fn run_fetch_recent(&mut self, exists: u32, limit: u32) -> Result<Vec<MessageSummary>> {
        self.require(SessionState::Selected, "FETCH")?;
        if exists == 0 || limit == 0 {
            return Ok(Vec::new());
        }

        let first = exists.saturating_sub(limit - 1).max(1);
        let (untagged, done) = self
            .run_command(format!(
                "FETCH {first}:{exists} (UID FLAGS RFC822.SIZE BODY.PEEK[HEADER.FIELDS (SUBJECT FROM DATE)])"
            ))
            .await?;
        if done.status != Status::Ok {
            return Err(Error::Protocol(format!("FETCH refused: {}", done.text)));
        }

        // Servers may interleave flag updates for other messages, or send
        // more than one response for the same sequence number.
        let mut messages: BTreeMap<u32, MessageSummary> = BTreeMap::new();
        for response in &untagged {
            if let Response::Untagged { text, literals } = response
                && let Some(summary) = MessageSummary::parse(text, literals)?
                && (first..=exists).contains(&summary.seq)
            {
                match messages.entry(summary.seq) {
                    Entry::Occupied(mut entry) => entry.get_mut().merge(summary),
                    Entry::Vacant(entry) => {
                        entry.insert(summary);
                    }
                }
            }
        }
        Ok(messages.into_values().collect())
    }

    /// `LOGOUT` and shut the socket down. Idempotent.
    ///
    /// A healthy session ends `Closed`; an errored one stays
    /// `Errored` and skips LOGOUT, since its stream may be mid-response.
    /// Callers bound this with a timeout; I/O errors are ignored.
    pub async fn close(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            if !self.state.is_terminal() {
                self.state = SessionState::Closed;
            }
            return;
        };

        if !self.state.is_terminal() {
            let tag = self.tags.next();
            if transport.send(format!("{tag} LOGOUT")).await.is_ok() {
                while let Some(Ok(response)) = transport.next().await {
                    if matches!(&response, Response::Tagged { tag: t, .. } if *t == tag) {
                        break;
                    }
                }
            }
            self.state = SessionState::Closed;
        }

        if let Err(e) = transport.get_mut().shutdown().await {
            debug!("socket shutdown failed: {e}");
        }
    }

    async fn send(&mut self, line: String) -> Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::Protocol("session is not connected".into()))?;
        transport.send(line).await
    }

    async fn next_response(&mut self) -> Result<Response> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::Protocol("session is not connected".into()))?;
        match transport.next().await {
            Some(response) => response,
            None => Err(Error::Network("connection closed by server".into())),
        }
    }

    /// Send a tagged command and collect untagged data up to its
    /// tagged completion.
    async fn run_command(&mut self, command: String) -> Result<(Vec<Response>, Completion)> {
        let tag = self.tags.next();
        debug!(%tag, %command, "sending command");
        self.send(format!("{tag} {command}")).await?;

        let mut untagged = Vec::new();
        loop {
            match self.next_response().await? {
                Response::Tagged { tag: t, .. } if t != tag => {
                    return Err(Error::Protocol(format!("response for unknown tag {t}")));
                }
                Response::Tagged {
                    status, code, text, ..
                } => return Ok((untagged, Completion { status, code, text })),
                Response::Continuation { .. } => {
                    return Err(Error::Protocol(format!(
                        "unexpected continuation for {command}"
                    )));
                }
                Response::Untagged { text, .. } if text.to_ascii_uppercase().starts_with("BYE") => {
                    return Err(Error::Network(format!("server closed session: {text}")));
                }
                response => untagged.push(response),
            }
        }
    }
}
