//! Correlation of commands and responses.
//!
//! A [`Session`] owns everything that belongs to one connection: the transport, the frame buffer,
//! the tag counter, and the results of completed commands. It doesn't do any I/O on its own.
//! The caller delivers transport notifications ([`Session::on_connect`], [`Session::on_data`],
//! [`Session::on_error`], [`Session::on_close`]) and drains [`Event`]s with
//! [`Session::poll_event`].
//!
//! # Example
//!
//! ```rust
//! use imap_session::session::{Event, Outcome, Session};
//!
//! let mut session = Session::new(Vec::new());
//! session.on_connect();
//! session.on_data(b"* OK IMAP4rev1 ready\r\n");
//!
//! session.search("UNSEEN", None).unwrap();
//! assert_eq!(session.transport(), b"A1 SEARCH UNSEEN\r\n");
//!
//! session.on_data(b"* SEARCH 2 84 882\r\nA1 OK SEARCH completed\r\n");
//!
//! assert!(session.executed("SEARCH"));
//! assert_eq!(session.get("SEARCH").unwrap().search_ids, ["2", "84", "882"]);
//!
//! while let Some(event) = session.poll_event() {
//!     if let Event::Completed { key, outcome } = event {
//!         assert_eq!(key, "SEARCH");
//!         assert!(matches!(outcome, Outcome::Success { .. }));
//!     }
//! }
//! ```

use std::{
    collections::{HashMap, VecDeque},
    fmt::{Display, Formatter},
    io,
};

use bytes::BytesMut;
use log::{debug, error, trace, warn};

use crate::{
    chain::{Chain, ChainState, ChainStep},
    command::{Command, Verb},
    decode::Message,
    error::{ArgumentError, ChainError, SessionError},
    flag::{StoreResponse, StoreType},
    frame::{FrameBuffer, FrameKey, ResponseFrame, Status, DEFAULT_MAX_LITERAL_LENGTH},
};

/// Key under which untagged data (e.g., the greeting) is stored.
pub const UNTAGGED_KEY: &str = "*";

/// The byte stream to the server.
///
/// Implementations only need to accept writes. Incoming bytes and state changes are reported to
/// the session by the caller.
pub trait Transport {
    fn is_writable(&self) -> bool;

    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn close(&mut self);
}

/// Collects everything written, e.g., for tests or dry runs.
impl Transport for Vec<u8> {
    fn is_writable(&self) -> bool {
        true
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }

    fn close(&mut self) {}
}

/// Tag of a dispatched command (`A1`, `A2`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub(crate) u32);

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "A{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionOptions {
    /// Longest literal accepted from the server.
    pub max_literal_length: u32,
    /// Largest response unit accepted from the server (unbounded if `None`).
    pub max_frame_size: Option<u32>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_literal_length: DEFAULT_MAX_LITERAL_LENGTH,
            max_frame_size: None,
        }
    }
}

/// A command that was sent but not completed yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingCommand {
    pub tag: Tag,
    pub key: String,
    pub verb: Verb,
    /// The command text with credentials removed.
    pub command: String,
}

/// How a command ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// `OK`
    Success { message: Message, text: String },
    /// `NO`
    Failure { message: Message, text: String },
    /// The connection ended before the command completed.
    ConnectionClosed,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn message(&self) -> Option<&Message> {
        match self {
            Outcome::Success { message, .. } | Outcome::Failure { message, .. } => Some(message),
            Outcome::ConnectionClosed => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Outcome::Success { text, .. } | Outcome::Failure { text, .. } => Some(text),
            Outcome::ConnectionClosed => None,
        }
    }
}

#[derive(Debug)]
pub enum Event {
    Connected,
    /// The server greeted us (`OK`, `PREAUTH`) or refused the connection (`BYE`).
    Greeting { status: Status, text: String },
    Completed { key: String, outcome: Outcome },
    /// A chained command failed (or couldn't be sent). Nothing else of the chain runs.
    ChainAborted {
        key: String,
        message: Message,
        text: String,
    },
    ChainCompleted,
    /// The session ended. `error` is set when it didn't end orderly.
    Closed { error: Option<SessionError> },
}

/// An IMAP client session over a transport `T`.
#[derive(Debug)]
pub struct Session<T> {
    transport: T,
    frames: FrameBuffer,
    /// Body of units that were not resolved (`BAD`, continuation requests, unknown tags).
    carry: BytesMut,
    tag_counter: u32,
    /// Tag → pending command.
    pending: HashMap<String, PendingCommand>,
    /// Key → tag of the last command dispatched under this key.
    dispatched: HashMap<String, Tag>,
    results: HashMap<String, Outcome>,
    connected: bool,
    greeted: bool,
    closed: bool,
    chain: Chain<T>,
    events: VecDeque<Event>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, SessionOptions::default())
    }

    pub fn with_options(transport: T, options: SessionOptions) -> Self {
        Self {
            transport,
            frames: FrameBuffer::new(options.max_literal_length, options.max_frame_size),
            carry: BytesMut::new(),
            tag_counter: 0,
            pending: HashMap::new(),
            dispatched: HashMap::new(),
            results: HashMap::new(),
            connected: false,
            greeted: false,
            closed: false,
            chain: Chain::default(),
            events: VecDeque::new(),
        }
    }

    // ----- Transport notifications -----

    pub fn on_connect(&mut self) {
        if self.closed {
            warn!("Ignoring connect of a closed session");
            return;
        }

        self.connected = true;
        self.events.push_back(Event::Connected);
    }

    /// Feed bytes as received from the server. Chunk boundaries don't matter.
    pub fn on_data(&mut self, bytes: &[u8]) {
        if self.closed {
            debug!("Ignoring {} bytes received after close", bytes.len());
            return;
        }

        trace!("S: <{} bytes>", bytes.len());
        self.frames.append(bytes);

        while !self.closed {
            match self.frames.try_extract_frame() {
                Ok(Some(frame)) => self.on_frame(frame),
                Ok(None) => break,
                Err(framing_error) => {
                    error!("{framing_error}");
                    self.shutdown(Some(framing_error.into()));
                }
            }
        }
    }

    /// Process a complete response unit, e.g., as produced by a codec.
    pub fn on_frame(&mut self, frame: ResponseFrame) {
        if self.closed {
            return;
        }

        let ResponseFrame { body, completion } = frame;
        trace!("S: <{} bytes> {:?}", body.len(), completion);

        let mut unit = std::mem::take(&mut self.carry);
        unit.extend_from_slice(&body);

        match completion.key {
            FrameKey::Greeting => self.on_greeting(unit, completion.status, completion.text),
            FrameKey::Continuation => {
                self.carry = unit;
                self.on_continuation(&completion.text);
            }
            FrameKey::Tagged(tag) => match completion.status {
                Status::Ok | Status::No => match self.pending.remove(&tag) {
                    Some(pending) => {
                        self.on_completion(pending, unit, completion.status, completion.text)
                    }
                    None => {
                        warn!("Completion for unknown tag `{tag}`: {}", completion.text);
                        self.carry = unit;
                    }
                },
                status => {
                    warn!("{tag} {status:?} {}", completion.text);
                    self.carry = unit;
                }
            },
        }
    }

    pub fn on_error(&mut self, error: impl Into<SessionError>) {
        let error = error.into();
        error!("{error}");
        self.shutdown(Some(error));
    }

    pub fn on_close(&mut self) {
        self.shutdown(None);
    }

    /// Next event, if any.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    // ----- Dispatching -----

    /// Send `command` right away (bypassing any chain) and remember it under `key`.
    ///
    /// Returns `None` (and sends nothing) if the session is closed, the transport isn't
    /// writable, or `key` is reserved.
    pub fn send(&mut self, command: &Command, key: &str) -> Option<Tag> {
        self.write_command(command, key, false)
    }

    /// With `chained`, the tag becomes the chain's in-flight command before anything is written.
    fn write_command(&mut self, command: &Command, key: &str, chained: bool) -> Option<Tag> {
        if let Err(argument_error) = validate_key(key) {
            warn!("Dropping `{}`: {argument_error}", command.redacted());
            return None;
        }

        if self.closed || !self.transport.is_writable() {
            warn!("Dropping `{}`: transport is not writable", command.redacted());
            return None;
        }

        self.tag_counter += 1;
        let tag = Tag(self.tag_counter);

        debug!("C: {tag} {}", command.redacted());
        self.pending.insert(
            tag.to_string(),
            PendingCommand {
                tag,
                key: key.to_owned(),
                verb: command.verb(),
                command: command.redacted(),
            },
        );
        self.dispatched.insert(key.to_owned(), tag);
        self.results.remove(key);
        if chained {
            self.chain.set_in_flight(tag);
        }

        let line = format!("{tag} {}\r\n", command.text());
        if let Err(io_error) = self.transport.write(line.as_bytes()) {
            error!("Could not write {tag}: {io_error}");
            self.shutdown(Some(io_error.into()));
            return None;
        }

        Some(tag)
    }

    /// Send `command` (or queue it while a chain is built or executed) under its default key.
    pub fn issue(&mut self, command: Command) -> Result<&mut Self, ArgumentError> {
        let key = command.default_key();
        self.issue_as(command, &key)
    }

    /// Like [`Session::issue`], but under a caller-chosen key.
    pub fn issue_as(&mut self, command: Command, key: &str) -> Result<&mut Self, ArgumentError> {
        validate_key(key)?;
        self.dispatch(command, key.to_owned());
        Ok(self)
    }

    fn dispatch(&mut self, command: Command, key: String) -> &mut Self {
        if self.chain.is_queueing() {
            self.chain.push(ChainStep::Command { command, key });
        } else {
            self.send(&command, &key);
        }

        self
    }

    fn dispatch_default(&mut self, command: Command) -> &mut Self {
        let key = command.default_key();
        self.dispatch(command, key)
    }

    // ----- Chaining -----

    /// Start building a new chain. Builder calls are queued until [`Session::execute`].
    pub fn chained(&mut self) -> &mut Self {
        self.chain.build();
        self
    }

    /// Execute the chain that is being built.
    pub fn execute(&mut self) -> Result<&mut Self, ChainError> {
        let state = self.chain.state();
        if state != ChainState::Building {
            return Err(ChainError::NotBuilding { state });
        }

        debug!("Executing chain");
        self.chain.start();
        self.advance_chain();
        Ok(self)
    }

    /// Wait for the server greeting before the next chain step (no-op outside of a chain).
    pub fn connect(&mut self) -> &mut Self {
        if self.chain.is_queueing() {
            self.chain.push(ChainStep::AwaitGreeting);
        }

        self
    }

    /// Run `action` once everything queued before succeeded (or right away outside of a chain).
    pub fn then<F>(&mut self, action: F) -> &mut Self
    where
        F: FnOnce(&mut Session<T>) + 'static,
    {
        if self.chain.is_queueing() {
            self.chain.push(ChainStep::Action(Box::new(action)));
        } else {
            action(self);
        }

        self
    }

    pub fn chain_state(&self) -> ChainState {
        self.chain.state()
    }

    // ----- Commands -----

    pub fn capability(&mut self) -> &mut Self {
        self.dispatch_default(Command::capability())
    }

    pub fn noop(&mut self) -> &mut Self {
        self.dispatch_default(Command::noop())
    }

    pub fn logout(&mut self) -> &mut Self {
        self.dispatch_default(Command::logout())
    }

    #[cfg(feature = "starttls")]
    pub fn starttls(&mut self) -> &mut Self {
        self.dispatch_default(Command::starttls())
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::login(username, password)?)
    }

    pub fn authenticate_plain(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::authenticate_plain(username, password)?)
    }

    pub fn authenticate_xoauth2(
        &mut self,
        username: &str,
        token: &str,
    ) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::authenticate_xoauth2(username, token)?)
    }

    pub fn select(&mut self, mailbox: &str) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::select(mailbox)?)
    }

    pub fn examine(&mut self, mailbox: &str) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::examine(mailbox)?)
    }

    pub fn create(&mut self, mailbox: &str) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::create(mailbox)?)
    }

    pub fn delete(&mut self, mailbox: &str) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::delete(mailbox)?)
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::rename(from, to)?)
    }

    pub fn subscribe(&mut self, mailbox: &str) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::subscribe(mailbox)?)
    }

    pub fn unsubscribe(&mut self, mailbox: &str) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::unsubscribe(mailbox)?)
    }

    pub fn list(&mut self, reference: &str, pattern: &str) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::list(reference, pattern)?)
    }

    pub fn lsub(&mut self, reference: &str, pattern: &str) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::lsub(reference, pattern)?)
    }

    pub fn search(
        &mut self,
        criteria: &str,
        charset: Option<&str>,
    ) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::search(criteria, charset, false)?)
    }

    pub fn uid_search(
        &mut self,
        criteria: &str,
        charset: Option<&str>,
    ) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::search(criteria, charset, true)?)
    }

    pub fn fetch(&mut self, sequence_set: &str, items: &str) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::fetch(sequence_set, items, false)?)
    }

    pub fn uid_fetch(
        &mut self,
        sequence_set: &str,
        items: &str,
    ) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::fetch(sequence_set, items, true)?)
    }

    pub fn store(
        &mut self,
        sequence_set: &str,
        kind: StoreType,
        response: StoreResponse,
        flags: &[&str],
    ) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::store(sequence_set, kind, response, flags, false)?)
    }

    pub fn uid_store(
        &mut self,
        sequence_set: &str,
        kind: StoreType,
        response: StoreResponse,
        flags: &[&str],
    ) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::store(sequence_set, kind, response, flags, true)?)
    }

    pub fn copy(&mut self, sequence_set: &str, mailbox: &str) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::copy(sequence_set, mailbox, false)?)
    }

    pub fn uid_copy(
        &mut self,
        sequence_set: &str,
        mailbox: &str,
    ) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::copy(sequence_set, mailbox, true)?)
    }

    pub fn expunge(&mut self) -> &mut Self {
        self.dispatch_default(Command::expunge())
    }

    pub fn raw(&mut self, text: &str) -> Result<&mut Self, ArgumentError> {
        self.issue(Command::raw(text)?)
    }

    // ----- Internals -----

    fn on_greeting(&mut self, unit: BytesMut, status: Status, text: String) {
        debug!("Greeting: {status:?} {text}");
        self.greeted = true;

        let message = Message::decode(&unit);
        let outcome = match status {
            Status::Bye => Outcome::Failure {
                message: message.clone(),
                text: text.clone(),
            },
            _ => Outcome::Success {
                message: message.clone(),
                text: text.clone(),
            },
        };
        self.results.insert(UNTAGGED_KEY.to_owned(), outcome);
        self.events.push_back(Event::Greeting {
            status,
            text: text.clone(),
        });

        if self.chain.greeted() {
            if status == Status::Bye {
                self.abort_chain(UNTAGGED_KEY.to_owned(), message, text);
                self.shutdown(None);
            } else {
                self.advance_chain();
            }
        }
    }

    fn on_continuation(&mut self, text: &str) {
        let authenticating = self
            .pending
            .values()
            .any(|pending| pending.verb == Verb::Authenticate);

        if !authenticating {
            warn!("Unexpected continuation request: {text}");
            return;
        }

        // An empty response cancels the exchange, so the server finishes with a tagged status.
        debug!("Cancelling SASL exchange after continuation request: {text}");
        if let Err(io_error) = self.transport.write(b"\r\n") {
            error!("Could not cancel SASL exchange: {io_error}");
            self.shutdown(Some(io_error.into()));
        }
    }

    fn on_completion(
        &mut self,
        pending: PendingCommand,
        unit: BytesMut,
        status: Status,
        text: String,
    ) {
        let PendingCommand { tag, key, .. } = pending;
        debug!("{tag} ({key}) completed: {status:?} {text}");

        let message = Message::decode(&unit);
        let outcome = if status == Status::Ok {
            Outcome::Success {
                message: message.clone(),
                text: text.clone(),
            }
        } else {
            Outcome::Failure {
                message: message.clone(),
                text: text.clone(),
            }
        };

        self.results.insert(key.clone(), outcome.clone());
        self.events.push_back(Event::Completed {
            key: key.clone(),
            outcome,
        });

        if self.chain.complete(tag) {
            if status == Status::Ok {
                self.advance_chain();
            } else {
                self.abort_chain(key, message, text);
                self.shutdown(None);
            }
        }
    }

    fn advance_chain(&mut self) {
        loop {
            let Some(step) = self.chain.next_step() else {
                if self.chain.state() == ChainState::Completed {
                    debug!("Chain completed");
                    self.events.push_back(Event::ChainCompleted);
                }
                return;
            };

            match step {
                ChainStep::Command { command, key } => {
                    if self.write_command(&command, &key, true).is_none() {
                        // A failed write already aborted the chain during shutdown.
                        if self.chain.state() == ChainState::Draining {
                            let text = format!("Could not send `{}`", command.redacted());
                            self.abort_chain(key, Message::default(), text);
                        }
                        return;
                    }
                }
                ChainStep::Action(action) => {
                    debug!("Running chained action");
                    self.chain.begin_action();
                    action(self);
                    self.chain.end_action();
                }
                ChainStep::AwaitGreeting => {
                    if !self.greeted {
                        debug!("Chain awaits greeting");
                        self.chain.await_greeting();
                    }
                }
            }
        }
    }

    fn abort_chain(&mut self, key: String, message: Message, text: String) {
        let discarded = self.chain.abort();
        debug!("Chain aborted at `{key}`, discarding {discarded} step(s)");

        self.events
            .push_back(Event::ChainAborted { key, message, text });
    }

    fn shutdown(&mut self, error: Option<SessionError>) {
        if self.closed {
            return;
        }

        debug!("Closing session");
        self.closed = true;
        self.connected = false;
        self.transport.close();

        let in_flight = self.chain.in_flight();
        let mut pending: Vec<_> = self.pending.drain().map(|(_, pending)| pending).collect();
        pending.sort_by_key(|pending| pending.tag);

        let mut aborted_key = None;
        for PendingCommand { tag, key, .. } in pending {
            if Some(tag) == in_flight {
                aborted_key = Some(key.clone());
            }

            self.results.insert(key.clone(), Outcome::ConnectionClosed);
            self.events.push_back(Event::Completed {
                key,
                outcome: Outcome::ConnectionClosed,
            });
        }

        if self.chain.state() == ChainState::Draining {
            self.abort_chain(
                aborted_key.unwrap_or_else(|| UNTAGGED_KEY.to_owned()),
                Message::default(),
                "Connection closed".to_owned(),
            );
        }

        // Untagged data that never got a completion.
        self.carry.extend_from_slice(self.frames.buffered());
        if !self.carry.is_empty() {
            let message = Message::decode(&self.carry);
            self.results.insert(
                UNTAGGED_KEY.to_owned(),
                Outcome::Success {
                    message,
                    text: String::new(),
                },
            );
        }
        self.carry.clear();
        self.frames.clear();

        self.events.push_back(Event::Closed { error });
    }

    // ----- Queries -----

    /// The decoded response of the last completed command under `key`.
    pub fn get(&self, key: &str) -> Option<&Message> {
        self.results.get(key)?.message()
    }

    /// Whether a command was dispatched under `key`.
    pub fn has(&self, key: &str) -> bool {
        self.dispatched.contains_key(key)
    }

    /// Whether the last command under `key` completed with `OK` or `NO`.
    pub fn executed(&self, key: &str) -> bool {
        matches!(
            self.results.get(key),
            Some(Outcome::Success { .. } | Outcome::Failure { .. })
        )
    }

    pub fn outcome(&self, key: &str) -> Option<&Outcome> {
        self.results.get(key)
    }

    /// Tag of the last command dispatched under `key`.
    pub fn tag_of(&self, key: &str) -> Option<Tag> {
        self.dispatched.get(key).copied()
    }

    /// Pending commands in tag order.
    pub fn pending(&self) -> Vec<&PendingCommand> {
        let mut pending: Vec<_> = self.pending.values().collect();
        pending.sort_by_key(|pending| pending.tag);
        pending
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_greeted(&self) -> bool {
        self.greeted
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

fn validate_key(key: &str) -> Result<(), ArgumentError> {
    if key.is_empty() {
        return Err(ArgumentError::Empty { argument: "key" });
    }

    if key == UNTAGGED_KEY {
        return Err(ArgumentError::ReservedKey {
            key: key.to_owned(),
        });
    }

    Ok(())
}
