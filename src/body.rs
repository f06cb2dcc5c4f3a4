use log::debug;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::decode::{split, Token};

/// Groups nested deeper than this are kept as a single atom.
const MAX_NESTING: usize = 16;

/// A `BODY`/`BODYSTRUCTURE` tree.
///
/// The tree mirrors the parenthesized nesting sent by the server. No MIME-level typing is applied,
/// e.g., `("TEXT" "PLAIN" ("CHARSET" "US-ASCII") NIL NIL "7BIT" 2279 48)` becomes a list of atoms
/// with one nested list.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BodyStructure {
    Nil,
    /// Atom, number or string (quotes removed).
    Atom(String),
    List(Vec<BodyStructure>),
}

impl BodyStructure {
    pub(crate) fn decode(token: &Token<'_>) -> Self {
        Self::decode_limited(token, MAX_NESTING)
    }

    fn decode_limited(token: &Token<'_>, remaining_recursions: usize) -> Self {
        if token.is_nil() {
            return BodyStructure::Nil;
        }

        match token.list_contents() {
            Some(contents) if remaining_recursions > 0 => BodyStructure::List(
                split(contents)
                    .iter()
                    .map(|child| Self::decode_limited(child, remaining_recursions - 1))
                    .collect(),
            ),
            Some(_) => {
                debug!("Body structure nested too deeply, keeping it verbatim");
                BodyStructure::Atom(token.lossy())
            }
            None => BodyStructure::Atom(token.scalar()),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, BodyStructure::Nil)
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            BodyStructure::Atom(atom) => Some(atom),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BodyStructure]> {
        match self {
            BodyStructure::List(children) => Some(children),
            _ => None,
        }
    }

    /// Child at `index` (`None` for non-lists).
    pub fn get(&self, index: usize) -> Option<&BodyStructure> {
        self.as_list()?.get(index)
    }
}
