use std::{fmt::Display, ops::Deref};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::decode::{split, Token};

/// An address structure.
///
/// Every part is empty when the server sent `NIL`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Address {
    /// Display name.
    pub name: String,
    /// SMTP at-domain-list.
    pub source_route: String,
    /// Local part, or the group name when `host` is empty.
    pub mailbox: String,
    pub host: String,
}

impl Address {
    fn decode(contents: &[u8]) -> Self {
        let fields = split(contents);
        let scalar = |index: usize| fields.get(index).map(Token::scalar).unwrap_or_default();

        Self {
            name: scalar(0),
            source_route: scalar(1),
            mailbox: scalar(2),
            host: scalar(3),
        }
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.name.is_empty(), self.host.is_empty()) {
            (true, true) => write!(f, "{}", self.mailbox),
            (true, false) => write!(f, "{}@{}", self.mailbox, self.host),
            (false, true) => write!(f, "{} <{}>", self.name, self.mailbox),
            (false, false) => write!(f, "{} <{}@{}>", self.name, self.mailbox, self.host),
        }
    }
}

/// The addresses of an envelope field (empty for `NIL`).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AddressList(pub Vec<Address>);

impl AddressList {
    fn decode(token: &Token<'_>) -> Self {
        let Some(contents) = token.list_contents() else {
            return Self::default();
        };

        let groups = split(contents);

        if groups.iter().all(Token::is_list) {
            Self(
                groups
                    .iter()
                    .filter_map(Token::list_contents)
                    .map(Address::decode)
                    .collect(),
            )
        } else {
            // Some servers omit the inner parentheses for a single address.
            Self(vec![Address::decode(contents)])
        }
    }

    /// The first address, or an all-empty one.
    pub fn first_or_empty(&self) -> Address {
        self.0.first().cloned().unwrap_or_default()
    }
}

impl Deref for AddressList {
    type Target = [Address];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The envelope structure of a message.
///
/// ```abnf
/// envelope = "(" env-date SP env-subject SP env-from SP
///            env-sender SP env-reply-to SP env-to SP env-cc SP
///            env-bcc SP env-in-reply-to SP env-message-id ")"
/// ```
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Envelope {
    pub date: String,
    pub subject: String,
    pub from: AddressList,
    pub sender: AddressList,
    pub reply_to: AddressList,
    pub to: AddressList,
    pub cc: AddressList,
    pub bcc: AddressList,
    pub in_reply_to: String,
    pub message_id: String,
}

impl Envelope {
    /// Decode the contents of an `ENVELOPE` group.
    pub(crate) fn decode(contents: &[u8]) -> Self {
        let fields = split(contents);
        let scalar = |index: usize| fields.get(index).map(Token::scalar).unwrap_or_default();
        let addresses = |index: usize| {
            fields
                .get(index)
                .map(AddressList::decode)
                .unwrap_or_default()
        };

        Self {
            date: scalar(0),
            subject: scalar(1),
            from: addresses(2),
            sender: addresses(3),
            reply_to: addresses(4),
            to: addresses(5),
            cc: addresses(6),
            bcc: addresses(7),
            in_reply_to: scalar(8),
            message_id: scalar(9),
        }
    }
}
