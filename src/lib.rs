//! # IMAP Client Session
//!
//! imap-session drives the client side of an [IMAP4rev1](https://tools.ietf.org/html/rfc3501)
//! connection: it tags commands, correlates the server's responses with them, and decodes the
//! interesting parts of those responses (`LIST`, `SEARCH`, `FETCH`, ...) into plain structs.
//!
//! The crate does no I/O on its own. Bytes go out through a [`Transport`](session::Transport)
//! and come back in through [`Session::on_data`](session::Session::on_data), in chunks of any
//! size. With the `tokio` feature, [`tokio`] provides the glue for async sockets.
//!
//! ## Framing
//!
//! Server responses are not line-oriented: literals (`{42}\r\n...`) may contain line breaks.
//! The [`frame`] module collects bytes until a complete response unit, i.e., everything up to a
//! tagged status, a continuation request, or the greeting, is available.
//!
//! ## Decoding
//!
//! [`Message::decode`](decode::Message::decode) is a best-effort decoder. It never fails, but
//! leaves everything it doesn't understand unset.
//!
//! ## Chaining
//!
//! Commands can be queued and executed one after the other. A failing command stops the chain.
//!
//! ```rust
//! use imap_session::session::Session;
//!
//! let mut session = Session::new(Vec::new());
//!
//! session
//!     .chained()
//!     .connect()
//!     .login("alice", "password")
//!     .unwrap()
//!     .select("INBOX")
//!     .unwrap()
//!     .then(|session| {
//!         if let Some(message) = session.get("SELECT") {
//!             println!("{} messages", message.exists.unwrap_or_default());
//!         }
//!     })
//!     .logout();
//!
//! session.execute().unwrap();
//!
//! session.on_connect();
//! session.on_data(b"* OK IMAP4rev1 Service Ready\r\n");
//! session.on_data(b"A1 OK LOGIN completed\r\n");
//! session.on_data(b"* 172 EXISTS\r\nA2 OK [READ-WRITE] SELECT completed\r\n");
//!
//! assert_eq!(
//!     std::str::from_utf8(session.transport()).unwrap(),
//!     "A1 LOGIN \"alice\" \"password\"\r\nA2 SELECT \"INBOX\"\r\nA3 LOGOUT\r\n",
//! );
//! ```

#![forbid(unsafe_code)]
#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod auth;
pub mod body;
pub mod chain;
pub mod command;
pub mod datetime;
pub mod decode;
pub mod envelope;
pub mod error;
pub mod fetch;
pub mod flag;
pub mod frame;
pub mod session;
#[cfg(test)]
mod testing;
#[cfg(feature = "tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
pub mod tokio;

pub use crate::{
    command::Command,
    decode::Message,
    error::{ArgumentError, ChainError, SessionError},
    session::{Event, Outcome, Session, Transport},
};
