//! Best-effort decoding of response unit bodies.
//!
//! IMAP data is a parenthesized-list syntax: atoms, quoted strings, literals and (nested) groups.
//! Rather than implementing the complete grammar, the decoder splits a logical line into tokens
//! and picks the values it knows by name. Anything malformed or unknown is skipped, i.e., missing
//! fields are absent, never an error.
//!
//! ```rust
//! use imap_session::decode::Message;
//!
//! let message = Message::decode(b"* LIST (\\HasNoChildren) \"/\" \"INBOX\"\r\n* SEARCH 1 2 3\r\n");
//!
//! assert_eq!(message.list[0].name, "INBOX");
//! assert!(!message.list[0].has_children);
//! assert_eq!(message.search_ids, ["1", "2", "3"]);
//! ```

use std::{fmt::Display, str::from_utf8};

use abnf_core::is_digit;
use log::debug;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::char,
    combinator::{map_opt, opt},
    sequence::{delimited, terminated},
    IResult,
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{fetch::Fetch, frame::logical_lines};

/// A top-level element of a (logical) line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token<'a> {
    /// Atom, quoted string or group, verbatim (quotes and parentheses included).
    Text(&'a [u8]),
    /// The data of a literal, without the `{n}` announcement.
    Literal(&'a [u8]),
}

impl<'a> Token<'a> {
    pub fn as_bytes(&self) -> &'a [u8] {
        match self {
            Token::Text(bytes) | Token::Literal(bytes) => bytes,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Token::Text(bytes) if bytes.starts_with(b"("))
    }

    pub fn is_quoted(&self) -> bool {
        matches!(self, Token::Text(bytes) if bytes.starts_with(b"\""))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Token::Text(bytes) if bytes.eq_ignore_ascii_case(b"NIL"))
    }

    /// What is inside of a group, i.e., without the surrounding parentheses.
    ///
    /// A missing closing parenthesis is tolerated.
    pub fn list_contents(&self) -> Option<&'a [u8]> {
        match self {
            Token::Text(bytes) => {
                let inner = bytes.strip_prefix(b"(")?;
                Some(inner.strip_suffix(b")").unwrap_or(inner))
            }
            Token::Literal(_) => None,
        }
    }

    /// The value of a string-like token: `NIL` is empty, quotes are removed and escapes resolved.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Token::Literal(bytes) => bytes.to_vec(),
            Token::Text(_) if self.is_nil() => Vec::new(),
            Token::Text(bytes) => match bytes.strip_prefix(b"\"") {
                Some(inner) => unescape(inner.strip_suffix(b"\"").unwrap_or(inner)),
                None => bytes.to_vec(),
            },
        }
    }

    /// Like [`Token::to_bytes`], but as (lossy) UTF-8.
    pub fn scalar(&self) -> String {
        String::from_utf8_lossy(&self.to_bytes()).into_owned()
    }

    /// The token verbatim as (lossy) UTF-8.
    pub fn lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }

    pub fn eq_ignore_ascii_case(&self, other: &str) -> bool {
        matches!(self, Token::Text(bytes) if bytes.eq_ignore_ascii_case(other.as_bytes()))
    }

    pub fn as_number(&self) -> Option<u32> {
        match self {
            Token::Text(bytes) if bytes.iter().all(|byte| is_digit(*byte)) => {
                from_utf8(bytes).ok()?.parse().ok()
            }
            _ => None,
        }
    }
}

/// Split a line into whitespace-separated tokens.
///
/// Whitespace inside of (nested) parentheses, brackets or quoted strings does not split. A literal
/// announcement yields the announced data as a [`Token::Literal`] (truncated when fewer bytes are
/// available). Unbalanced input never fails but produces whatever tokens can be recovered.
pub fn split(input: &[u8]) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = None;
    let mut depth = 0usize;
    let mut quoted = false;
    let mut escaped = false;
    let mut cursor = 0;

    while cursor < input.len() {
        let byte = input[cursor];

        if quoted {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => quoted = false,
                _ => {}
            }
            cursor += 1;
            continue;
        }

        match byte {
            b'{' => {
                if let Ok((remaining, length)) = literal(&input[cursor..]) {
                    let data_start = input.len() - remaining.len();
                    let data_end = data_start.saturating_add(length as usize).min(input.len());

                    if depth == 0 && start.is_none() {
                        tokens.push(Token::Literal(&input[data_start..data_end]));
                    } else {
                        start.get_or_insert(cursor);
                    }

                    cursor = data_end;
                    continue;
                }

                start.get_or_insert(cursor);
            }
            b'"' => {
                quoted = true;
                start.get_or_insert(cursor);
            }
            b'(' | b'[' => {
                // Adjacent groups, e.g., `(a)(b)`, are separate tokens.
                if depth == 0 && byte == b'(' && cursor > 0 && input[cursor - 1] == b')' {
                    if let Some(start) = start.take() {
                        tokens.push(Token::Text(&input[start..cursor]));
                    }
                }
                depth += 1;
                start.get_or_insert(cursor);
            }
            b')' | b']' => {
                depth = depth.saturating_sub(1);
                start.get_or_insert(cursor);
            }
            b' ' | b'\t' | b'\r' | b'\n' if depth == 0 => {
                if let Some(start) = start.take() {
                    tokens.push(Token::Text(&input[start..cursor]));
                }
            }
            _ => {
                start.get_or_insert(cursor);
            }
        }

        cursor += 1;
    }

    if let Some(start) = start {
        tokens.push(Token::Text(&input[start..]));
    }

    tokens
}

/// Like [`split`], but returns owned strings.
///
/// ```rust
/// use imap_session::decode::split_list;
///
/// assert_eq!(
///     split_list("A B (C D) \"E F\""),
///     vec!["A", "B", "(C D)", "\"E F\""],
/// );
/// ```
pub fn split_list(input: &str) -> Vec<String> {
    split(input.as_bytes()).iter().map(Token::lossy).collect()
}

/// The atoms (or strings) of a group's contents, e.g., flags.
pub(crate) fn atoms(contents: &[u8]) -> Vec<String> {
    split(contents).iter().map(Token::scalar).collect()
}

/// ```abnf
/// literal = "{" number ["+"] "}" CRLF
/// ```
fn literal(input: &[u8]) -> IResult<&[u8], u32> {
    terminated(
        delimited(
            char('{'),
            map_opt(take_while1(is_digit), |digits: &[u8]| {
                from_utf8(digits).ok()?.parse::<u32>().ok()
            }),
            terminated(opt(char('+')), char('}')),
        ),
        alt((tag(b"\r\n"), tag(b"\n"))),
    )(input)
}

fn unescape(input: &[u8]) -> Vec<u8> {
    let mut unescaped = Vec::with_capacity(input.len());
    let mut escaped = false;

    for byte in input {
        if !escaped && *byte == b'\\' {
            escaped = true;
        } else {
            unescaped.push(*byte);
            escaped = false;
        }
    }

    unescaped
}

/// A mailbox as returned by `LIST` or `LSUB`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ListEntry {
    pub name: String,
    /// Hierarchy delimiter (empty for `NIL`).
    pub delimiter: String,
    /// `false` iff the server announced `\HasNoChildren`.
    pub has_children: bool,
    pub attributes: Vec<String>,
}

impl ListEntry {
    /// Decode the tokens following `* LIST`.
    fn decode(tokens: &[Token<'_>]) -> Self {
        let attributes = tokens
            .first()
            .and_then(Token::list_contents)
            .map(atoms)
            .unwrap_or_default();

        let has_children = !attributes
            .iter()
            .any(|attribute| attribute.eq_ignore_ascii_case("\\HasNoChildren"));

        Self {
            name: tokens.get(2).map(Token::scalar).unwrap_or_default(),
            delimiter: tokens.get(1).map(Token::scalar).unwrap_or_default(),
            has_children,
            attributes,
        }
    }
}

/// Everything decoded from a response unit.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    /// The unit body as (lossy) UTF-8.
    pub raw_text: String,
    pub list: Vec<ListEntry>,
    /// Sequence numbers (or UIDs) in order of appearance.
    pub search_ids: Vec<String>,
    pub fetches: Vec<Fetch>,
    pub capabilities: Vec<String>,
    pub exists: Option<u32>,
    pub recent: Option<u32>,
    /// Expunged sequence numbers in order of appearance.
    pub expunged: Vec<u32>,
}

impl Message {
    /// Decode a unit body. Never fails.
    pub fn decode(body: &[u8]) -> Self {
        let mut message = Message {
            raw_text: String::from_utf8_lossy(body).into_owned(),
            ..Default::default()
        };

        for line in logical_lines(body) {
            message.decode_line(line);
        }

        message
    }

    /// The first `FETCH` of the unit.
    pub fn fetch(&self) -> Option<&Fetch> {
        self.fetches.first()
    }

    /// `search_ids` as numbers, skipping anything that isn't one.
    pub fn search_numbers(&self) -> Vec<u32> {
        self.search_ids
            .iter()
            .filter_map(|id| id.parse().ok())
            .collect()
    }

    fn decode_line(&mut self, line: &[u8]) {
        let tokens = split(line);

        let [star, keyword, arguments @ ..] = tokens.as_slice() else {
            return;
        };

        if star.as_bytes() != b"*" {
            debug!("Skipping line without `*`: {:?}", String::from_utf8_lossy(line));
            return;
        }

        if keyword.eq_ignore_ascii_case("LIST") || keyword.eq_ignore_ascii_case("LSUB") {
            self.list.push(ListEntry::decode(arguments));
        } else if keyword.eq_ignore_ascii_case("SEARCH") {
            self.search_ids.extend(arguments.iter().map(Token::lossy));
        } else if keyword.eq_ignore_ascii_case("CAPABILITY") {
            self.capabilities
                .extend(arguments.iter().map(Token::lossy));
        } else if let Some(number) = keyword.as_number() {
            match arguments.first() {
                Some(kind) if kind.eq_ignore_ascii_case("FETCH") => {
                    self.fetches.push(Fetch::decode(number, arguments.get(1)));
                }
                Some(kind) if kind.eq_ignore_ascii_case("EXISTS") => self.exists = Some(number),
                Some(kind) if kind.eq_ignore_ascii_case("RECENT") => self.recent = Some(number),
                Some(kind) if kind.eq_ignore_ascii_case("EXPUNGE") => self.expunged.push(number),
                _ => debug!("Skipping unknown data: {:?}", String::from_utf8_lossy(line)),
            }
        }
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split() {
        let tests = [
            (b"".as_ref(), vec![]),
            (b"A B (C D) \"E F\"", vec!["A", "B", "(C D)", "\"E F\""]),
            (b"  A   B  ", vec!["A", "B"]),
            (b"(A (B C) D) E", vec!["(A (B C) D)", "E"]),
            (b"(A)(B C) D", vec!["(A)", "(B C)", "D"]),
            (b"\"a \\\" b\" c", vec!["\"a \\\" b\"", "c"]),
            (b"\"(\" x", vec!["\"(\"", "x"]),
            (b"BODY[HEADER.FIELDS (TO)] x", vec!["BODY[HEADER.FIELDS (TO)]", "x"]),
            (b"(A (B", vec!["(A (B"]),
            (b"A) B", vec!["A)", "B"]),
            (b"\"open", vec!["\"open"]),
        ];

        for (test, expected) in tests {
            let got: Vec<_> = split(test).iter().map(Token::lossy).collect();

            dbg!((std::str::from_utf8(test).unwrap(), &expected, &got));

            assert_eq!(expected, got);
        }
    }

    #[test]
    fn test_split_literal() {
        let tests = [
            (
                b"A {3}\r\nx y B".as_ref(),
                vec![Token::Text(b"A"), Token::Literal(b"x y"), Token::Text(b"B")],
            ),
            (b"{5+}\r\na\r\nbc", vec![Token::Literal(b"a\r\nbc")]),
            (b"{10}\r\nshort", vec![Token::Literal(b"short")]),
            (b"{0}\r\n", vec![Token::Literal(b"")]),
            (b"{x}\r\n", vec![Token::Text(b"{x}")]),
            // Literals inside of groups stay verbatim.
            (b"(A {3}\r\n) )) B", vec![Token::Text(b"(A {3}\r\n) ))"), Token::Text(b"B")]),
        ];

        for (test, expected) in tests {
            let got = split(test);

            dbg!((String::from_utf8_lossy(test), &expected, &got));

            assert_eq!(expected, got);
        }
    }

    #[test]
    fn test_token_values() {
        let tests = [
            (Token::Text(b"NIL"), ""),
            (Token::Text(b"nil"), ""),
            (Token::Text(b"\"NIL\""), "NIL"),
            (Token::Text(b"\"a \\\"b\\\" \\\\c\""), "a \"b\" \\c"),
            (Token::Text(b"\"unterminated"), "unterminated"),
            (Token::Text(b"atom"), "atom"),
            (Token::Literal(b"\"lit\""), "\"lit\""),
        ];

        for (test, expected) in tests {
            let got = test.scalar();

            dbg!((&test, expected, &got));

            assert_eq!(expected, got);
        }

        assert_eq!(Token::Text(b"(a b)").list_contents(), Some(b"a b".as_ref()));
        assert_eq!(Token::Text(b"(a b").list_contents(), Some(b"a b".as_ref()));
        assert_eq!(Token::Text(b"a").list_contents(), None);
        assert_eq!(Token::Text(b"42").as_number(), Some(42));
        assert_eq!(Token::Text(b"4x").as_number(), None);
    }

    #[test]
    fn test_decode_list() {
        let tests = [
            (
                b"* LIST (\\HasNoChildren) \"/\" \"INBOX\"".as_ref(),
                ListEntry {
                    name: "INBOX".into(),
                    delimiter: "/".into(),
                    has_children: false,
                    attributes: vec!["\\HasNoChildren".into()],
                },
            ),
            (
                b"* LSUB (\\hasnochildren \\Marked) NIL Archive",
                ListEntry {
                    name: "Archive".into(),
                    delimiter: "".into(),
                    has_children: false,
                    attributes: vec!["\\hasnochildren".into(), "\\Marked".into()],
                },
            ),
            (
                b"* LIST (\\HasChildren) \".\" {9}\r\nMy Folder",
                ListEntry {
                    name: "My Folder".into(),
                    delimiter: ".".into(),
                    has_children: true,
                    attributes: vec!["\\HasChildren".into()],
                },
            ),
            (
                b"* LIST ()",
                ListEntry {
                    has_children: true,
                    ..Default::default()
                },
            ),
        ];

        for (test, expected) in tests {
            let got = Message::decode(test);

            dbg!((String::from_utf8_lossy(test), &expected, &got));

            assert_eq!(vec![expected], got.list);
        }
    }

    #[test]
    fn test_decode_untagged_data() {
        let message = Message::decode(
            b"* SEARCH 1 2 3 2\r\n\
              * SEARCH 7\r\n\
              * CAPABILITY IMAP4rev1 STARTTLS AUTH=PLAIN\r\n\
              * 18 EXISTS\r\n\
              * 2 RECENT\r\n\
              * 3 EXPUNGE\r\n\
              * 3 EXPUNGE\r\n\
              * OK [UNSEEN 17] Message 17 is the first unseen message\r\n\
              garbage\r\n\
              * 5 UNKNOWN\r\n",
        );

        assert_eq!(message.search_ids, ["1", "2", "3", "2", "7"]);
        assert_eq!(message.search_numbers(), [1, 2, 3, 2, 7]);
        assert_eq!(
            message.capabilities,
            ["IMAP4rev1", "STARTTLS", "AUTH=PLAIN"]
        );
        assert_eq!(message.exists, Some(18));
        assert_eq!(message.recent, Some(2));
        assert_eq!(message.expunged, [3, 3]);
        assert!(message.list.is_empty());
        assert!(message.fetch().is_none());
    }

    #[test]
    fn test_decode_raw_text() {
        let body = b"* SEARCH\r\n* 1 FETCH (RFC822 {4}\r\na\r\nb)\r\n";
        let message = Message::decode(body);

        assert!(message.search_ids.is_empty());
        assert_eq!(message.raw_text, String::from_utf8_lossy(body));
        assert_eq!(message.to_string(), message.raw_text);
        assert_eq!(
            message.fetch().and_then(|fetch| fetch.text.clone()),
            Some(b"a\r\nb".to_vec())
        );
    }
}
