//! Fake XOAUTH2 IMAP server for integration testing
//!
//! An in-process server that speaks enough IMAP to take the checker
//! through its whole lifecycle:
//!
//! TCP -> greeting / STARTTLS -> TLS -> AUTHENTICATE XOAUTH2 -> SELECT -> FETCH -> LOGOUT
//!
//! ## Module layout
//!
//! - `server` -- TCP listener, TLS modes, greeting, command dispatch
//! - `handlers/` -- one file per IMAP command
//! - `mailbox` -- test data model (folders, messages, builder)
//! - `tokens` -- scripted token provider
//! - `io` -- shared line I/O helpers

#![allow(dead_code)]

pub mod mailbox;
mod server;
pub mod tokens;

pub use handlers::AuthPolicy;
pub use mailbox::{MailboxBuilder, raw_message};
pub use server::{FakeImapServer, GOOD_TOKEN, ServerOptions, Stall, closed_port};
pub use tokens::ScriptedTokens;
