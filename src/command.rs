//! Construction of command lines.
//!
//! Every constructor validates its arguments and fails with an [`ArgumentError`] before anything
//! could be sent. The resulting [`Command`] holds the command text without tag and line ending.
//!
//! ```rust
//! use imap_session::command::Command;
//!
//! let command = Command::select("Sent Items").unwrap();
//! assert_eq!(command.text(), "SELECT \"Sent Items\"");
//!
//! let command = Command::fetch("1:*", "(FLAGS UID)", true).unwrap();
//! assert_eq!(command.text(), "UID FETCH 1:* (FLAGS UID)");
//!
//! assert!(Command::select("").is_err());
//! ```

use std::fmt::{Debug, Formatter};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthMechanism,
    error::ArgumentError,
    flag::{StoreItem, StoreResponse, StoreType},
};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Login,
    Authenticate,
    Capability,
    Select,
    Examine,
    Create,
    Delete,
    Rename,
    Subscribe,
    Unsubscribe,
    List,
    Lsub,
    Search,
    Fetch,
    Store,
    Copy,
    Expunge,
    Noop,
    #[cfg(feature = "starttls")]
    StartTls,
    Logout,
    /// Caller-formatted command.
    Raw,
}

impl Verb {
    pub fn name(&self) -> &'static str {
        match self {
            Verb::Login => "LOGIN",
            Verb::Authenticate => "AUTHENTICATE",
            Verb::Capability => "CAPABILITY",
            Verb::Select => "SELECT",
            Verb::Examine => "EXAMINE",
            Verb::Create => "CREATE",
            Verb::Delete => "DELETE",
            Verb::Rename => "RENAME",
            Verb::Subscribe => "SUBSCRIBE",
            Verb::Unsubscribe => "UNSUBSCRIBE",
            Verb::List => "LIST",
            Verb::Lsub => "LSUB",
            Verb::Search => "SEARCH",
            Verb::Fetch => "FETCH",
            Verb::Store => "STORE",
            Verb::Copy => "COPY",
            Verb::Expunge => "EXPUNGE",
            Verb::Noop => "NOOP",
            #[cfg(feature = "starttls")]
            Verb::StartTls => "STARTTLS",
            Verb::Logout => "LOGOUT",
            Verb::Raw => "RAW",
        }
    }
}

/// A validated command, ready to be tagged and sent.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Command {
    verb: Verb,
    text: String,
    /// Whether `text` contains credentials.
    sensitive: bool,
}

impl Command {
    fn new(verb: Verb, uid: bool, arguments: Option<String>) -> Self {
        let mut text = String::new();

        if uid {
            text.push_str("UID ");
        }
        text.push_str(verb.name());
        if let Some(arguments) = arguments {
            text.push(' ');
            text.push_str(&arguments);
        }

        Self {
            verb,
            text,
            sensitive: false,
        }
    }

    fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    /// The command text without tag and line ending.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The request key used when the caller doesn't choose one.
    ///
    /// This is the verb name, or, for raw commands, the first word of the text.
    pub fn default_key(&self) -> String {
        match self.verb {
            Verb::Raw => self
                .text
                .split(' ')
                .next()
                .unwrap_or_default()
                .to_ascii_uppercase(),
            verb => verb.name().to_owned(),
        }
    }

    /// The command text with credentials removed, e.g., for logging.
    pub fn redacted(&self) -> String {
        if self.sensitive {
            format!("{} /* REDACTED */", self.verb.name())
        } else {
            self.text.clone()
        }
    }

    // ----- Any State -----

    pub fn capability() -> Self {
        Self::new(Verb::Capability, false, None)
    }

    pub fn noop() -> Self {
        Self::new(Verb::Noop, false, None)
    }

    pub fn logout() -> Self {
        Self::new(Verb::Logout, false, None)
    }

    // ----- Not Authenticated State -----

    #[cfg(feature = "starttls")]
    pub fn starttls() -> Self {
        Self::new(Verb::StartTls, false, None)
    }

    /// `LOGIN "<username>" "<password>"`
    ///
    /// Both may be empty (`userid` and `password` are `astring`s).
    pub fn login(username: &str, password: &str) -> Result<Self, ArgumentError> {
        safe("username", username)?;
        safe("password", password)?;

        Ok(Self::new(
            Verb::Login,
            false,
            Some(format!("{} {}", quote(username), quote(password))),
        )
        .sensitive())
    }

    /// `AUTHENTICATE <mechanism> <initial response>`
    pub fn authenticate(
        mechanism: AuthMechanism,
        username: &str,
        secret: &str,
    ) -> Result<Self, ArgumentError> {
        not_empty("username", username)?;
        safe("secret", secret)?;

        Ok(Self::new(
            Verb::Authenticate,
            false,
            Some(format!(
                "{mechanism} {}",
                mechanism.initial_response(username, secret)
            )),
        )
        .sensitive())
    }

    pub fn authenticate_plain(username: &str, password: &str) -> Result<Self, ArgumentError> {
        Self::authenticate(AuthMechanism::Plain, username, password)
    }

    pub fn authenticate_xoauth2(username: &str, token: &str) -> Result<Self, ArgumentError> {
        Self::authenticate(AuthMechanism::XOAuth2, username, token)
    }

    // ----- Authenticated State -----

    pub fn select(mailbox: &str) -> Result<Self, ArgumentError> {
        Self::with_mailbox(Verb::Select, mailbox)
    }

    pub fn examine(mailbox: &str) -> Result<Self, ArgumentError> {
        Self::with_mailbox(Verb::Examine, mailbox)
    }

    pub fn create(mailbox: &str) -> Result<Self, ArgumentError> {
        Self::with_mailbox(Verb::Create, mailbox)
    }

    pub fn delete(mailbox: &str) -> Result<Self, ArgumentError> {
        Self::with_mailbox(Verb::Delete, mailbox)
    }

    pub fn rename(from: &str, to: &str) -> Result<Self, ArgumentError> {
        not_empty("from", from)?;
        not_empty("to", to)?;

        Ok(Self::new(
            Verb::Rename,
            false,
            Some(format!("{} {}", quote(from), quote(to))),
        ))
    }

    pub fn subscribe(mailbox: &str) -> Result<Self, ArgumentError> {
        Self::with_mailbox(Verb::Subscribe, mailbox)
    }

    pub fn unsubscribe(mailbox: &str) -> Result<Self, ArgumentError> {
        Self::with_mailbox(Verb::Unsubscribe, mailbox)
    }

    /// `LIST "<reference>" "<pattern>"`
    ///
    /// Both may be empty, e.g., `LIST "" ""` asks for the hierarchy delimiter.
    pub fn list(reference: &str, pattern: &str) -> Result<Self, ArgumentError> {
        Self::with_reference(Verb::List, reference, pattern)
    }

    pub fn lsub(reference: &str, pattern: &str) -> Result<Self, ArgumentError> {
        Self::with_reference(Verb::Lsub, reference, pattern)
    }

    // ----- Selected State -----

    pub fn expunge() -> Self {
        Self::new(Verb::Expunge, false, None)
    }

    /// `[UID] SEARCH [CHARSET <charset>] <criteria>`
    ///
    /// `criteria` is used verbatim, e.g., `UNSEEN SINCE 1-Feb-1994`.
    pub fn search(criteria: &str, charset: Option<&str>, uid: bool) -> Result<Self, ArgumentError> {
        not_empty("criteria", criteria)?;

        let arguments = match charset {
            Some(charset) => {
                atom("charset", charset)?;
                format!("CHARSET {charset} {criteria}")
            }
            None => criteria.to_owned(),
        };

        Ok(Self::new(Verb::Search, uid, Some(arguments)))
    }

    /// `[UID] FETCH <sequence set> <items>`
    ///
    /// `items` is used verbatim, e.g., `(FLAGS BODY.PEEK[HEADER])` or `ALL`.
    pub fn fetch(sequence_set: &str, items: &str, uid: bool) -> Result<Self, ArgumentError> {
        self::sequence_set(sequence_set)?;
        not_empty("items", items)?;

        Ok(Self::new(
            Verb::Fetch,
            uid,
            Some(format!("{sequence_set} {items}")),
        ))
    }

    /// `[UID] STORE <sequence set> [+|-]FLAGS[.SILENT] (<flags>)`
    pub fn store(
        sequence_set: &str,
        kind: StoreType,
        response: StoreResponse,
        flags: &[&str],
        uid: bool,
    ) -> Result<Self, ArgumentError> {
        self::sequence_set(sequence_set)?;
        for flag in flags {
            self::flag(flag)?;
        }

        Ok(Self::new(
            Verb::Store,
            uid,
            Some(format!(
                "{sequence_set} {} ({})",
                StoreItem(kind, response),
                flags.join(" ")
            )),
        ))
    }

    /// `[UID] COPY <sequence set> "<mailbox>"`
    pub fn copy(sequence_set: &str, mailbox: &str, uid: bool) -> Result<Self, ArgumentError> {
        self::sequence_set(sequence_set)?;
        not_empty("mailbox", mailbox)?;

        Ok(Self::new(
            Verb::Copy,
            uid,
            Some(format!("{sequence_set} {}", quote(mailbox))),
        ))
    }

    // ----- Escape hatch -----

    /// A caller-formatted command, sent verbatim (after the tag).
    pub fn raw(text: &str) -> Result<Self, ArgumentError> {
        not_empty("text", text)?;

        Ok(Self {
            verb: Verb::Raw,
            text: text.to_owned(),
            sensitive: false,
        })
    }

    fn with_mailbox(verb: Verb, mailbox: &str) -> Result<Self, ArgumentError> {
        not_empty("mailbox", mailbox)?;

        Ok(Self::new(verb, false, Some(quote(mailbox))))
    }

    fn with_reference(verb: Verb, reference: &str, pattern: &str) -> Result<Self, ArgumentError> {
        safe("reference", reference)?;
        safe("pattern", pattern)?;

        Ok(Self::new(
            verb,
            false,
            Some(format!("{} {}", quote(reference), quote(pattern))),
        ))
    }
}

impl Debug for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text: &dyn Debug = if self.sensitive {
            &"/* REDACTED */"
        } else {
            &self.text
        };

        f.debug_struct("Command")
            .field("verb", &self.verb)
            .field("text", text)
            .finish()
    }
}

/// `quoted = DQUOTE *QUOTED-CHAR DQUOTE`
pub(crate) fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);

    quoted.push('"');
    for c in value.chars() {
        if c == '\\' || c == '"' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');

    quoted
}

/// No line ending and no NUL, i.e., the value can't break out of its command line.
fn safe(argument: &'static str, value: &str) -> Result<(), ArgumentError> {
    match value
        .bytes()
        .enumerate()
        .find(|(_, byte)| matches!(byte, b'\r' | b'\n' | b'\x00'))
    {
        Some((at, byte)) => Err(ArgumentError::InvalidByteAt { argument, byte, at }),
        None => Ok(()),
    }
}

fn not_empty(argument: &'static str, value: &str) -> Result<(), ArgumentError> {
    if value.is_empty() {
        return Err(ArgumentError::Empty { argument });
    }

    safe(argument, value)
}

fn only(
    argument: &'static str,
    value: &str,
    allowed: impl Fn(usize, u8) -> bool,
) -> Result<(), ArgumentError> {
    if value.is_empty() {
        return Err(ArgumentError::Empty { argument });
    }

    match value
        .bytes()
        .enumerate()
        .find(|(at, byte)| !allowed(*at, *byte))
    {
        Some((at, byte)) => Err(ArgumentError::InvalidByteAt { argument, byte, at }),
        None => Ok(()),
    }
}

/// ```abnf
/// sequence-set = (seq-number / seq-range) *("," sequence-set)
/// ```
///
/// Only the alphabet is checked.
fn sequence_set(value: &str) -> Result<(), ArgumentError> {
    only("sequence_set", value, |_, byte| {
        byte.is_ascii_digit() || matches!(byte, b':' | b',' | b'*')
    })
}

/// `flag = "\" atom / atom`
fn flag(value: &str) -> Result<(), ArgumentError> {
    only("flag", value, |at, byte| {
        is_atom_char(byte) || (at == 0 && byte == b'\\')
    })
}

fn atom(argument: &'static str, value: &str) -> Result<(), ArgumentError> {
    only(argument, value, |_, byte| is_atom_char(byte))
}

/// `ATOM-CHAR = <any CHAR except atom-specials>`
fn is_atom_char(byte: u8) -> bool {
    matches!(byte, 0x21..=0x7e) && !b"(){%*\"\\]".contains(&byte)
}
