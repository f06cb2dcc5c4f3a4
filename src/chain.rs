//! Sequential execution of queued commands and actions.
//!
//! While a chain is built (see [`Session::chained`]), builder calls enqueue instead of sending.
//! [`Session::execute`] then sends one command at a time and only moves on when it completed
//! with `OK`. The first `NO` aborts the chain and discards everything still queued.
//!
//! ```rust
//! use imap_session::{chain::ChainState, session::Session};
//!
//! let mut session = Session::new(Vec::new());
//! session.on_connect();
//!
//! session
//!     .chained()
//!     .connect()
//!     .login("alice", "password")
//!     .unwrap()
//!     .select("INBOX")
//!     .unwrap()
//!     .then(|session| {
//!         // Runs after SELECT succeeded.
//!         session.noop();
//!     });
//! session.execute().unwrap();
//!
//! // Waiting for the greeting ...
//! assert!(session.transport().is_empty());
//!
//! session.on_data(b"* OK IMAP4rev1 ready\r\n");
//! assert_eq!(session.transport(), b"A1 LOGIN \"alice\" \"password\"\r\n");
//! assert_eq!(session.chain_state(), ChainState::Draining);
//! ```
//!
//! [`Session::chained`]: crate::session::Session::chained
//! [`Session::execute`]: crate::session::Session::execute

use std::{
    collections::VecDeque,
    fmt::{Debug, Formatter},
};

use crate::{
    command::Command,
    session::{Session, Tag},
};

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ChainState {
    /// No chain was built yet.
    #[default]
    Idle,
    /// Builder calls are queued.
    Building,
    /// Queued steps are executed.
    Draining,
    /// A step failed, the rest was discarded.
    Aborted,
    /// All steps succeeded.
    Completed,
}

/// Code that runs against the session once all previous steps succeeded.
pub type Action<T> = Box<dyn FnOnce(&mut Session<T>)>;

pub enum ChainStep<T> {
    /// Send `command` and wait for its completion.
    Command { command: Command, key: String },
    /// Run synchronously. Commands issued by the action run next.
    Action(Action<T>),
    /// Wait for the server greeting (if it wasn't received yet).
    AwaitGreeting,
}

impl<T> Debug for ChainStep<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainStep::Command { command, key } => f
                .debug_struct("Command")
                .field("command", command)
                .field("key", key)
                .finish(),
            ChainStep::Action(_) => f.write_str("Action(..)"),
            ChainStep::AwaitGreeting => f.write_str("AwaitGreeting"),
        }
    }
}

pub(crate) struct Chain<T> {
    state: ChainState,
    steps: VecDeque<ChainStep<T>>,
    /// Tag of the command the chain waits for.
    in_flight: Option<Tag>,
    awaiting_greeting: bool,
    /// Set while an action runs. Steps queued by the action go here (in order).
    insert_at: Option<usize>,
}

impl<T> Default for Chain<T> {
    fn default() -> Self {
        Self {
            state: ChainState::Idle,
            steps: VecDeque::new(),
            in_flight: None,
            awaiting_greeting: false,
            insert_at: None,
        }
    }
}

impl<T> Debug for Chain<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("state", &self.state)
            .field("steps", &self.steps)
            .field("in_flight", &self.in_flight)
            .field("awaiting_greeting", &self.awaiting_greeting)
            .finish()
    }
}

impl<T> Chain<T> {
    pub(crate) fn state(&self) -> ChainState {
        self.state
    }

    /// Whether builder calls should be queued instead of sent.
    pub(crate) fn is_queueing(&self) -> bool {
        matches!(self.state, ChainState::Building | ChainState::Draining)
    }

    /// Start building a new chain.
    pub(crate) fn build(&mut self) {
        *self = Self {
            state: ChainState::Building,
            ..Self::default()
        };
    }

    pub(crate) fn start(&mut self) {
        self.state = ChainState::Draining;
    }

    pub(crate) fn push(&mut self, step: ChainStep<T>) {
        match self.insert_at.as_mut() {
            Some(index) => {
                self.steps.insert(*index, step);
                *index += 1;
            }
            None => self.steps.push_back(step),
        }
    }

    /// Next step to execute. Marks the chain completed when there is none.
    pub(crate) fn next_step(&mut self) -> Option<ChainStep<T>> {
        if self.state != ChainState::Draining || self.in_flight.is_some() || self.awaiting_greeting
        {
            return None;
        }

        let step = self.steps.pop_front();
        if step.is_none() {
            self.state = ChainState::Completed;
        }

        step
    }

    pub(crate) fn begin_action(&mut self) {
        self.insert_at = Some(0);
    }

    pub(crate) fn end_action(&mut self) {
        self.insert_at = None;
    }

    pub(crate) fn set_in_flight(&mut self, tag: Tag) {
        self.in_flight = Some(tag);
    }

    /// Returns `true` if `tag` was in flight.
    pub(crate) fn complete(&mut self, tag: Tag) -> bool {
        if self.in_flight == Some(tag) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn in_flight(&self) -> Option<Tag> {
        self.in_flight
    }

    pub(crate) fn await_greeting(&mut self) {
        self.awaiting_greeting = true;
    }

    /// Returns `true` if the chain was waiting for the greeting.
    pub(crate) fn greeted(&mut self) -> bool {
        std::mem::replace(&mut self.awaiting_greeting, false)
    }

    /// Discard all remaining steps. Returns the number of discarded steps.
    pub(crate) fn abort(&mut self) -> usize {
        let discarded = self.steps.len();

        self.state = ChainState::Aborted;
        self.steps.clear();
        self.in_flight = None;
        self.awaiting_greeting = false;
        self.insert_at = None;

        discarded
    }
}
