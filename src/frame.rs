//! Splitting of server bytes into response units.
//!
//! A response unit is every line the server sends up to, and including, the line that terminates
//! it. Terminating lines are tagged status responses (`A1 OK ...`), continuation requests
//! (`+ ...`) and, at the very beginning of a connection, the greeting (`* OK ...`).
//!
//! Lines may announce a literal (`{42}`). The announced bytes are opaque, i.e., they can contain
//! `\r\n` and even something that looks like a tagged status response. The framing state survives
//! chunk boundaries, so it doesn't matter how the transport splits the byte stream.
//!
//! # Example
//!
//! ```rust
//! use imap_session::frame::{FrameBuffer, FrameKey, Status};
//!
//! let mut buffer = FrameBuffer::default();
//!
//! buffer.append(b"* OK IMAP4rev1 ready\r\n* SEARCH 1 2");
//! let greeting = buffer.try_extract_frame().unwrap().unwrap();
//! assert_eq!(greeting.completion.key, FrameKey::Greeting);
//!
//! // Not complete yet ...
//! assert_eq!(buffer.try_extract_frame(), Ok(None));
//!
//! // ... but now.
//! buffer.append(b" 3\r\nA1 OK SEARCH completed\r\n");
//! let frame = buffer.try_extract_frame().unwrap().unwrap();
//! assert_eq!(frame.body.as_ref(), b"* SEARCH 1 2 3\r\n");
//! assert_eq!(frame.completion.status, Status::Ok);
//! ```

use std::str::from_utf8;

use abnf_core::is_digit;
use bytes::{Bytes, BytesMut};
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::char,
    combinator::{eof, rest, value},
    sequence::{preceded, tuple},
    IResult,
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default upper limit for a single literal (64 MiB).
pub const DEFAULT_MAX_LITERAL_LENGTH: u32 = 64 * 1024 * 1024;

/// All interactions transmitted by client and server are in the form of lines,
/// that is, strings that end with a CRLF.
///
/// The protocol receiver of an IMAP4rev1 client is either ...
#[derive(Debug, Clone, PartialEq, Eq)]
enum FramingState {
    /// ... reading a line, or ...
    ReadLine { to_consume_acc: usize },
    /// ... is reading a sequence of octets with a known count followed by a line.
    ReadLiteral { to_consume_acc: usize, length: u32 },
}

impl Default for FramingState {
    fn default() -> Self {
        FramingState::ReadLine { to_consume_acc: 0 }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("Could not find the end of a response unit within {max_frame_size} bytes")]
    FrameTooLarge { max_frame_size: u32 },
    #[error("Expected a maximum literal length of {max_literal_length} bytes, got {length} bytes")]
    LiteralTooLarge {
        max_literal_length: u32,
        length: u32,
    },
}

/// Status of the line that terminated a response unit.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    No,
    Bad,
    PreAuth,
    Bye,
    /// Continuation request (`+ ...`).
    Continue,
}

/// Who a response unit belongs to.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FrameKey {
    /// Completion of the command that was sent with this tag.
    Tagged(String),
    /// The server greeting.
    Greeting,
    /// A continuation request for the command in flight.
    Continuation,
}

/// The terminating line of a response unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub key: FrameKey,
    pub status: Status,
    /// Human-readable text following the status (response code included).
    pub text: String,
}

/// A complete response unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseFrame {
    /// All lines preceding the completion, including line endings and literal data.
    pub body: Bytes,
    pub completion: Completion,
}

impl ResponseFrame {
    /// The body as (lossy) UTF-8.
    pub fn raw_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Incremental framing state for a byte buffer owned elsewhere.
///
/// [`FrameBuffer`] owns its buffer. `Framer` exists separately so that the same logic can drive a
/// `tokio_util` codec, which hands in its own `BytesMut`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Framer {
    state: FramingState,
    /// Where the logical line that is currently read begins.
    line_start: usize,
    greeting_expected: bool,
    max_literal_length: u32,
    max_frame_size: Option<u32>,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LITERAL_LENGTH, None)
    }
}

impl Framer {
    /// Creates a framer that refuses literals longer than `max_literal_length` and, if given,
    /// units larger than `max_frame_size`.
    pub fn new(max_literal_length: u32, max_frame_size: Option<u32>) -> Self {
        Self {
            state: FramingState::default(),
            line_start: 0,
            greeting_expected: true,
            max_literal_length,
            max_frame_size,
        }
    }

    /// Split-off the next complete response unit from the front of `src`.
    ///
    /// Returns `Ok(None)` if more bytes are needed. Bytes of an incomplete unit stay in `src`.
    /// After an error, `src` is cleared and framing restarts with the next byte.
    pub fn extract(&mut self, src: &mut BytesMut) -> Result<Option<ResponseFrame>, FramingError> {
        loop {
            match self.state {
                FramingState::ReadLine { to_consume_acc } => {
                    let Some(to_consume) = find_lf_inclusive(to_consume_acc, src) else {
                        return self.incomplete(src);
                    };
                    let end = to_consume_acc + to_consume;

                    if let Some(length) = literal_announcement(&src[to_consume_acc..end]) {
                        if length > self.max_literal_length {
                            src.clear();
                            self.reset();

                            return Err(FramingError::LiteralTooLarge {
                                max_literal_length: self.max_literal_length,
                                length,
                            });
                        }

                        src.reserve(length as usize);
                        self.state = FramingState::ReadLiteral {
                            to_consume_acc: end,
                            length,
                        };
                        continue;
                    }

                    // Only the very first line can be a greeting.
                    let greeting_expected = std::mem::replace(&mut self.greeting_expected, false);

                    match completion(&src[self.line_start..end], greeting_expected) {
                        Some(completion) => {
                            let mut unit = src.split_to(end).freeze();
                            let body = unit.split_to(self.line_start);
                            self.reset();

                            return Ok(Some(ResponseFrame { body, completion }));
                        }
                        None => {
                            self.line_start = end;
                            self.state = FramingState::ReadLine {
                                to_consume_acc: end,
                            };
                        }
                    }
                }
                FramingState::ReadLiteral {
                    to_consume_acc,
                    length,
                } => {
                    let end = to_consume_acc + length as usize;

                    if end <= src.len() {
                        self.state = FramingState::ReadLine {
                            to_consume_acc: end,
                        };
                    } else {
                        return self.incomplete(src);
                    }
                }
            }
        }
    }

    /// Forget the partially framed unit (the greeting is never expected again).
    pub fn reset(&mut self) {
        self.state = FramingState::default();
        self.line_start = 0;
    }

    fn incomplete(&mut self, src: &mut BytesMut) -> Result<Option<ResponseFrame>, FramingError> {
        // Everything in `src` belongs to the current unit.
        match self.max_frame_size {
            Some(max_frame_size) if src.len() > max_frame_size as usize => {
                src.clear();
                self.reset();

                Err(FramingError::FrameTooLarge { max_frame_size })
            }
            _ => Ok(None),
        }
    }
}

/// Accumulates bytes and yields complete response units.
#[derive(Clone, Debug, Default)]
pub struct FrameBuffer {
    buffer: BytesMut,
    framer: Framer,
}

impl FrameBuffer {
    pub fn new(max_literal_length: u32, max_frame_size: Option<u32>) -> Self {
        Self {
            buffer: BytesMut::new(),
            framer: Framer::new(max_literal_length, max_frame_size),
        }
    }

    /// Enqueue bytes as delivered by the transport.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the next complete response unit (and consumes its bytes), or `None`.
    pub fn try_extract_frame(&mut self) -> Result<Option<ResponseFrame>, FramingError> {
        self.framer.extract(&mut self.buffer)
    }

    /// Bytes that were not consumed by a response unit yet.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.framer.reset();
    }
}

/// Split a unit body into logical lines.
///
/// Literal data stays inside the line that announced it. Line endings are removed, except for
/// those inside literals.
pub fn logical_lines(body: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut cursor = 0;

    while let Some(to_consume) = find_lf_inclusive(cursor, body) {
        let end = cursor + to_consume;

        match literal_announcement(&body[cursor..end]) {
            Some(length) => {
                cursor = end.saturating_add(length as usize).min(body.len());
            }
            None => {
                lines.push(trim_line_ending(&body[start..end]));
                start = end;
                cursor = end;
            }
        }
    }

    if start < body.len() {
        lines.push(trim_line_ending(&body[start..]));
    }

    lines
}

/// Skip the first `skip` bytes of `buf` and count how many more bytes are needed to cover the
/// next `\n`.
///
/// Servers are expected to send `\r\n`, but a bare `\n` ends a line, too.
fn find_lf_inclusive(skip: usize, buf: &[u8]) -> Option<usize> {
    buf.iter()
        .skip(skip)
        .position(|byte| *byte == b'\n')
        .map(|position| position + 1)
}

pub(crate) fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Length of the literal announced at the end of `line`, if any.
///
/// ```abnf
/// literal = "{" number ["+"] "}" CRLF *CHAR8
/// ```
pub(crate) fn literal_announcement(line: &[u8]) -> Option<u32> {
    let inner = trim_line_ending(line).strip_suffix(b"}")?;
    let open = inner.iter().rposition(|byte| *byte == b'{')?;
    let digits = &inner[open + 1..];
    let digits = digits.strip_suffix(b"+").unwrap_or(digits);

    if digits.is_empty() || !digits.iter().all(|byte| is_digit(*byte)) {
        return None;
    }

    // Overflowing numbers are not a literal announcement.
    from_utf8(digits).ok()?.parse().ok()
}

fn completion(line: &[u8], greeting_expected: bool) -> Option<Completion> {
    let line = trim_line_ending(line);

    if greeting_expected {
        if let Ok((_, (status, text))) = greeting(line) {
            if matches!(status, Status::Ok | Status::PreAuth | Status::Bye) {
                return Some(Completion {
                    key: FrameKey::Greeting,
                    status,
                    text: String::from_utf8_lossy(text).into_owned(),
                });
            }
        }
    }

    if let Ok((_, text)) = continue_req(line) {
        return Some(Completion {
            key: FrameKey::Continuation,
            status: Status::Continue,
            text: String::from_utf8_lossy(text).trim_start().to_owned(),
        });
    }

    match status_line(line) {
        Ok((_, (tag, status @ (Status::Ok | Status::No | Status::Bad), text))) => Some(Completion {
            key: FrameKey::Tagged(String::from_utf8_lossy(tag).into_owned()),
            status,
            text: String::from_utf8_lossy(text).into_owned(),
        }),
        _ => None,
    }
}

/// `greeting = "*" SP (resp-cond-auth / resp-cond-bye)`
fn greeting(input: &[u8]) -> IResult<&[u8], (Status, &[u8])> {
    preceded(tag(b"* "), tuple((status, text)))(input)
}

/// `continue-req = "+" SP (resp-text / base64)`
fn continue_req(input: &[u8]) -> IResult<&[u8], &[u8]> {
    preceded(char('+'), rest)(input)
}

/// `response-tagged = tag SP resp-cond-state`
fn status_line(input: &[u8]) -> IResult<&[u8], (&[u8], Status, &[u8])> {
    tuple((take_while1(is_tag_char), preceded(char(' '), status), text))(input)
}

fn status(input: &[u8]) -> IResult<&[u8], Status> {
    alt((
        value(Status::Ok, tag_no_case(b"OK")),
        value(Status::No, tag_no_case(b"NO")),
        value(Status::Bad, tag_no_case(b"BAD")),
        value(Status::PreAuth, tag_no_case(b"PREAUTH")),
        value(Status::Bye, tag_no_case(b"BYE")),
    ))(input)
}

/// `[SP resp-text]`
fn text(input: &[u8]) -> IResult<&[u8], &[u8]> {
    alt((preceded(char(' '), rest), eof))(input)
}

/// `tag = 1*<any ASTRING-CHAR except "+">`
fn is_tag_char(byte: u8) -> bool {
    matches!(byte, 0x21..=0x7e) && !b"(){%*\"\\+".contains(&byte)
}
