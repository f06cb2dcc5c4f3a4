use chrono::{DateTime, FixedOffset};
use log::debug;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    body::BodyStructure,
    datetime::parse_date_time,
    decode::{atoms, split, Token},
    envelope::Envelope,
};

/// Data of a `* <n> FETCH (...)` response.
///
/// Only what the server sent is set. Attributes are located by name, so their order doesn't
/// matter.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fetch {
    /// Message sequence number.
    pub number: u32,
    pub uid: Option<u32>,
    pub flags: Option<Vec<String>>,
    /// `INTERNALDATE` as sent (quotes removed).
    pub internal_date: Option<String>,
    /// `RFC822.SIZE`
    pub size: Option<u32>,
    pub envelope: Option<Envelope>,
    /// `BODY` or `BODYSTRUCTURE`
    pub body_structure: Option<BodyStructure>,
    /// `RFC822`, `RFC822.TEXT`, `RFC822.HEADER` or `BODY[<section>]`. The first one wins.
    pub text: Option<Vec<u8>>,
}

impl Fetch {
    /// Decode the attribute group following `* <number> FETCH`.
    pub(crate) fn decode(number: u32, attributes: Option<&Token<'_>>) -> Self {
        let mut fetch = Fetch {
            number,
            ..Default::default()
        };

        let Some(contents) = attributes.and_then(Token::list_contents) else {
            debug!("FETCH {number} without attribute group");
            return fetch;
        };

        let tokens = split(contents);
        let mut index = 0;

        while let Some(name) = tokens.get(index) {
            let value = tokens.get(index + 1);

            if fetch.decode_attribute(name, value) {
                index += 2;
            } else {
                debug!("Skipping FETCH attribute {:?}", name.lossy());
                index += 1;
            }
        }

        fetch
    }

    /// Returns `true` when `value` was consumed.
    fn decode_attribute(&mut self, name: &Token<'_>, value: Option<&Token<'_>>) -> bool {
        let Some(value) = value else {
            return false;
        };
        let name = name.lossy().to_ascii_uppercase();

        match name.as_str() {
            "FLAGS" => match value.list_contents() {
                Some(contents) => self.flags = Some(atoms(contents)),
                None => return false,
            },
            "INTERNALDATE" if value.is_quoted() => self.internal_date = Some(value.scalar()),
            "RFC822.SIZE" => match value.as_number() {
                Some(size) => self.size = Some(size),
                None => return false,
            },
            "UID" => match value.as_number() {
                Some(uid) => self.uid = Some(uid),
                None => return false,
            },
            "ENVELOPE" => match value.list_contents() {
                Some(contents) => self.envelope = Some(Envelope::decode(contents)),
                None => return false,
            },
            "BODY" | "BODYSTRUCTURE" if value.is_list() => {
                self.body_structure = Some(BodyStructure::decode(value));
            }
            _ if is_text_attribute(&name) => {
                if !(value.is_quoted() || matches!(value, Token::Literal(_)) || value.is_nil()) {
                    return false;
                }

                if self.text.is_none() && !value.is_nil() {
                    self.text = Some(value.to_bytes());
                }
            }
            _ => return false,
        }

        true
    }

    /// [`Fetch::text`] as (lossy) UTF-8.
    pub fn text_lossy(&self) -> Option<String> {
        self.text
            .as_deref()
            .map(|text| String::from_utf8_lossy(text).into_owned())
    }

    /// [`Fetch::internal_date`] as a point in time.
    pub fn internal_date_parsed(&self) -> Option<DateTime<FixedOffset>> {
        parse_date_time(self.internal_date.as_deref()?)
    }
}

fn is_text_attribute(name: &str) -> bool {
    matches!(name, "RFC822" | "RFC822.TEXT" | "RFC822.HEADER")
        || name.starts_with("BODY[")
        || name.starts_with("BINARY[")
}

#[cfg(test)]
mod tests {
    use chrono::Datelike;

    use super::*;
    use crate::{decode::Message, envelope::AddressList};

    fn decode(line: &[u8]) -> Fetch {
        Message::decode(line)
            .fetches
            .into_iter()
            .next()
            .unwrap()
    }

    #[test]
    fn test_decode_fetch() {
        let tests = [
            (
                b"* 12 FETCH (FLAGS (\\Seen \\Answered))".as_ref(),
                Fetch {
                    number: 12,
                    flags: Some(vec!["\\Seen".into(), "\\Answered".into()]),
                    ..Default::default()
                },
            ),
            (
                b"* 1 FETCH (FLAGS ())",
                Fetch {
                    number: 1,
                    flags: Some(vec![]),
                    ..Default::default()
                },
            ),
            (
                b"* 2 FETCH (UID 4827 RFC822.SIZE 44827 INTERNALDATE \"17-Jul-1996 02:44:25 -0700\")",
                Fetch {
                    number: 2,
                    uid: Some(4827),
                    size: Some(44827),
                    internal_date: Some("17-Jul-1996 02:44:25 -0700".into()),
                    ..Default::default()
                },
            ),
            (
                b"* 3 FETCH (BODY[HEADER.FIELDS (SUBJECT)] {15}\r\nSubject: hi\r\n\r\n UID 9)",
                Fetch {
                    number: 3,
                    uid: Some(9),
                    text: Some(b"Subject: hi\r\n\r\n".to_vec()),
                    ..Default::default()
                },
            ),
            (
                b"* 4 FETCH (RFC822.TEXT \"first\" BODY[] \"second\")",
                Fetch {
                    number: 4,
                    text: Some(b"first".to_vec()),
                    ..Default::default()
                },
            ),
            (
                b"* 5 FETCH (BODY (\"TEXT\" \"PLAIN\") RFC822 NIL)",
                Fetch {
                    number: 5,
                    body_structure: Some(BodyStructure::List(vec![
                        BodyStructure::Atom("TEXT".into()),
                        BodyStructure::Atom("PLAIN".into()),
                    ])),
                    ..Default::default()
                },
            ),
            (
                b"* 6 FETCH (UID x FLAGS)",
                Fetch {
                    number: 6,
                    ..Default::default()
                },
            ),
            (
                b"* 7 FETCH",
                Fetch {
                    number: 7,
                    ..Default::default()
                },
            ),
        ];

        for (test, expected) in tests {
            let got = decode(test);

            dbg!((String::from_utf8_lossy(test), &expected, &got));

            assert_eq!(expected, got);
        }
    }

    #[test]
    fn test_decode_fetch_envelope() {
        let got = decode(
            b"* 1 FETCH (ENVELOPE (\"Mon, 7 Feb 1994 21:52:25 -0800\" \"afternoon meeting\" \
              ((\"Fred Foobar\" NIL \"foobar\" \"Blurdybloop.COM\")) NIL NIL \
              ((NIL NIL \"mooch\" \"owatagu.siam.edu\")) NIL NIL NIL \
              \"<B27397-0100000@Blurdybloop.COM>\") FLAGS (\\Seen))",
        );

        let envelope = got.envelope.unwrap();
        assert_eq!(envelope.subject, "afternoon meeting");
        assert_eq!(envelope.from.first_or_empty().mailbox, "foobar");
        assert_eq!(envelope.from.first_or_empty().name, "Fred Foobar");
        assert_eq!(envelope.sender, AddressList::default());
        assert_eq!(envelope.to.first_or_empty().host, "owatagu.siam.edu");
        assert_eq!(envelope.message_id, "<B27397-0100000@Blurdybloop.COM>");
        assert_eq!(got.flags, Some(vec!["\\Seen".to_owned()]));
    }

    #[test]
    fn test_text_and_internal_date() {
        let got = decode(
            b"* 1 FETCH (INTERNALDATE \" 7-Feb-1994 21:52:25 -0800\" RFC822 {6}\r\nab\r\ncd)",
        );

        assert_eq!(got.text_lossy().as_deref(), Some("ab\r\ncd"));
        let date = got.internal_date_parsed().unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (1994, 2, 7));

        let got = decode(b"* 1 FETCH (INTERNALDATE \"yesterday\")");
        assert_eq!(got.internal_date.as_deref(), Some("yesterday"));
        assert_eq!(got.internal_date_parsed(), None);
        assert_eq!(got.text_lossy(), None);
    }
}
