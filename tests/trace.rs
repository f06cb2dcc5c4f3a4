use imap_session::{
    chain::ChainState,
    flag::{StoreResponse, StoreType},
    session::{Event, Outcome, UNTAGGED_KEY},
    Session,
};

enum Who {
    Client,
    Server,
}

struct TraceLines<'a> {
    trace: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for TraceLines<'a> {
    type Item = (Who, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let input = &self.trace[self.offset..];

        if let Some(pos) = input.iter().position(|b| *b == b'\n') {
            let who = match &input[..2] {
                b"C:" => Who::Client,
                b"S:" => Who::Server,
                _ => panic!("Line must begin with \"C:\" or \"S:\"."),
            };

            // An empty line may come without the space.
            let start = if input.get(2) == Some(&b' ') { 3 } else { 2 };

            self.offset += pos + 1;

            Some((who, &input[start..pos + 1]))
        } else {
            None
        }
    }
}

fn split_trace(trace: &[u8]) -> impl Iterator<Item = (Who, &[u8])> {
    TraceLines { trace, offset: 0 }
}

/// Replay `trace` against a session prepared by `prepare`.
///
/// Server lines are fed to the session (`\n` replaced by `\r\n`). Client lines must be exactly
/// what the session wrote up to this point.
fn replay<F>(trace: &[u8], prepare: F) -> Session<Vec<u8>>
where
    F: FnOnce(&mut Session<Vec<u8>>),
{
    let mut session = Session::new(Vec::new());
    session.on_connect();
    prepare(&mut session);

    let mut offset = 0;

    for (who, line) in split_trace(trace) {
        // Replace last "\n" with "\r\n".
        let line = {
            let mut line = line[..line.len().saturating_sub(1)].to_vec();
            line.extend_from_slice(b"\r\n");
            line
        };

        match who {
            Who::Client => {
                println!("C: {}", String::from_utf8_lossy(&line).trim());
                let written = session.transport();
                let end = (offset + line.len()).min(written.len());
                assert_eq!(
                    String::from_utf8_lossy(&line),
                    String::from_utf8_lossy(&written[offset..end])
                );
                offset = end;
            }
            Who::Server => {
                println!("S: {}", String::from_utf8_lossy(&line).trim());
                session.on_data(&line);
            }
        }
    }

    assert_eq!(
        "",
        String::from_utf8_lossy(&session.transport()[offset..]),
        "unexpected client lines"
    );

    session
}

fn events(session: &mut Session<Vec<u8>>) -> Vec<Event> {
    std::iter::from_fn(|| session.poll_event()).collect()
}

#[test]
fn test_from_select() {
    let trace = br#"S: * OK IMAP4rev1 Service Ready
C: A1 LOGIN "alice" "secret"
S: A1 OK LOGIN completed
C: A2 SELECT "INBOX"
S: * 172 EXISTS
S: * 1 RECENT
S: * OK [UNSEEN 12] Message 12 is first unseen
S: * OK [UIDVALIDITY 3857529045] UIDs valid
S: * FLAGS (\Answered \Flagged \Deleted \Seen \Draft)
S: * OK [PERMANENTFLAGS (\Deleted \Seen \*)] Limited
S: A2 OK [READ-WRITE] SELECT completed
C: A3 LOGOUT
S: * BYE IMAP4rev1 Server logging out
S: A3 OK LOGOUT completed
"#;

    let mut session = replay(trace, |session| {
        session
            .chained()
            .connect()
            .login("alice", "secret")
            .unwrap()
            .select("INBOX")
            .unwrap()
            .logout()
            .execute()
            .unwrap();
    });

    let select = session.get("SELECT").unwrap();
    assert_eq!(select.exists, Some(172));
    assert_eq!(select.recent, Some(1));
    assert_eq!(
        session.outcome("SELECT").and_then(Outcome::text),
        Some("[READ-WRITE] SELECT completed")
    );
    assert_eq!(session.chain_state(), ChainState::Completed);
    assert!(session.executed(UNTAGGED_KEY));
    assert!(matches!(
        events(&mut session).last(),
        Some(Event::ChainCompleted)
    ));
}

#[test]
fn test_from_list() {
    let trace = br#"S: * PREAUTH IMAP4rev1 server logged in as Smith
C: A1 LIST "" "*"
S: * LIST (\HasNoChildren) "/" "INBOX"
S: * LIST (\HasChildren \Noselect) "/" Archive
S: * LIST (\HasNoChildren) "/" {13}
S: Archive/2023)
S: * LIST (\HasNoChildren) NIL "Drafts"
S: A1 OK LIST completed
C: A2 LSUB "" "Archive/%"
S: * LSUB () "/" "Archive/2023)"
S: A2 OK LSUB completed
"#;

    let session = replay(trace, |session| {
        session
            .chained()
            .connect()
            .list("", "*")
            .unwrap()
            .lsub("", "Archive/%")
            .unwrap()
            .execute()
            .unwrap();
    });

    let list: Vec<_> = session
        .get("LIST")
        .unwrap()
        .list
        .iter()
        .map(|entry| {
            (
                entry.name.as_str(),
                entry.delimiter.as_str(),
                entry.has_children,
            )
        })
        .collect();

    assert_eq!(
        list,
        [
            ("INBOX", "/", false),
            ("Archive", "/", true),
            ("Archive/2023)", "/", false),
            ("Drafts", "", false),
        ]
    );
    assert_eq!(session.get("LSUB").unwrap().list[0].name, "Archive/2023)");
}

#[test]
fn test_from_search_then_fetch() {
    let trace = br#"S: * OK ready
C: A1 SELECT "INBOX"
S: * 3 EXISTS
S: A1 OK [READ-WRITE] SELECT completed
C: A2 SEARCH CHARSET UTF-8 UNSEEN
S: * SEARCH 2 3
S: A2 OK SEARCH completed
C: A3 FETCH 2,3 (FLAGS RFC822.SIZE)
S: * 2 FETCH (FLAGS () RFC822.SIZE 120)
S: * 3 FETCH (FLAGS (\Flagged) RFC822.SIZE 4410)
S: A3 OK FETCH completed
C: A4 STORE 2,3 +FLAGS.SILENT (\Seen)
S: A4 OK STORE completed
C: A5 COPY 2,3 "Archive"
S: A5 OK [COPYUID 38505 2:3 3956:3957] Done
C: A6 LOGOUT
S: * BYE
S: A6 OK
"#;

    let session = replay(trace, |session| {
        session
            .chained()
            .connect()
            .select("INBOX")
            .unwrap()
            .search("UNSEEN", Some("UTF-8"))
            .unwrap()
            .then(|session| {
                let ids = session.get("SEARCH").unwrap().search_ids.join(",");

                session
                    .fetch(&ids, "(FLAGS RFC822.SIZE)")
                    .unwrap()
                    .store(&ids, StoreType::Add, StoreResponse::Silent, &["\\Seen"])
                    .unwrap()
                    .copy(&ids, "Archive")
                    .unwrap();
            })
            .logout()
            .execute()
            .unwrap();
    });

    let fetches = &session.get("FETCH").unwrap().fetches;
    assert_eq!(fetches.len(), 2);
    assert_eq!(fetches[0].number, 2);
    assert_eq!(fetches[0].flags, Some(vec![]));
    assert_eq!(fetches[1].size, Some(4410));
    assert_eq!(fetches[1].flags, Some(vec!["\\Flagged".to_owned()]));
    assert!(session.executed("COPY"));
    assert_eq!(session.chain_state(), ChainState::Completed);
}

#[test]
fn test_from_fetch_envelope_and_body() {
    let trace = br#"S: * OK ready
C: A1 UID FETCH 4827 (UID FLAGS INTERNALDATE RFC822.SIZE ENVELOPE BODY[TEXT])
S: * 12 FETCH (UID 4827 FLAGS (\Seen) INTERNALDATE "17-Jul-1996 02:44:25 -0700" RFC822.SIZE 4286 ENVELOPE ("Wed, 17 Jul 1996 02:23:25 -0700 (PDT)" "IMAP4rev1 WG mtg summary and minutes" (("Terry Gray" NIL "gray" "cac.washington.edu")) (("Terry Gray" NIL "gray" "cac.washington.edu")) (("Terry Gray" NIL "gray" "cac.washington.edu")) ((NIL NIL "imap" "cac.washington.edu")) ((NIL NIL "minutes" "CNRI.Reston.VA.US")("John Klensin" NIL "KLENSIN" "MIT.EDU")) NIL NIL "<B27397-0100000@cac.washington.edu>") BODY[TEXT] {24}
S: Hello Joe,
S: A1 OK done
S: )
S: A1 OK FETCH completed
"#;

    let session = replay(trace, |session| {
        session
            .chained()
            .connect()
            .uid_fetch(
                "4827",
                "(UID FLAGS INTERNALDATE RFC822.SIZE ENVELOPE BODY[TEXT])",
            )
            .unwrap()
            .execute()
            .unwrap();
    });

    let fetch = session.get("FETCH").unwrap().fetch().unwrap().clone();
    assert_eq!(fetch.number, 12);
    assert_eq!(fetch.uid, Some(4827));
    assert_eq!(fetch.size, Some(4286));
    assert_eq!(
        fetch.internal_date.as_deref(),
        Some("17-Jul-1996 02:44:25 -0700")
    );
    assert!(fetch.internal_date_parsed().is_some());
    assert_eq!(fetch.text_lossy().as_deref(), Some("Hello Joe,\r\nA1 OK done\r\n"));

    let envelope = fetch.envelope.unwrap();
    assert_eq!(envelope.subject, "IMAP4rev1 WG mtg summary and minutes");
    assert_eq!(envelope.from.first_or_empty().to_string(), "Terry Gray <gray@cac.washington.edu>");
    assert_eq!(envelope.cc.len(), 2);
    assert_eq!(envelope.cc[1].name, "John Klensin");
    assert_eq!(envelope.message_id, "<B27397-0100000@cac.washington.edu>");
}

#[test]
fn test_from_failed_chain() {
    let trace = br#"S: * OK ready
C: A1 LOGIN "alice" "wrong"
S: A1 NO [AUTHENTICATIONFAILED] Authentication failed
"#;

    let mut session = replay(trace, |session| {
        session
            .chained()
            .connect()
            .login("alice", "wrong")
            .unwrap()
            .select("INBOX")
            .unwrap()
            .then(|_| panic!("must not run"))
            .execute()
            .unwrap();
    });

    assert_eq!(session.chain_state(), ChainState::Aborted);
    assert!(session.is_closed());
    assert!(!session.has("SELECT"));

    let aborted = events(&mut session).into_iter().find_map(|event| match event {
        Event::ChainAborted { key, text, .. } => Some((key, text)),
        _ => None,
    });
    assert_eq!(
        aborted,
        Some((
            "LOGIN".to_owned(),
            "[AUTHENTICATIONFAILED] Authentication failed".to_owned()
        ))
    );
}

#[test]
fn test_from_authenticate() {
    let trace = br#"S: * OK ready
C: A1 AUTHENTICATE PLAIN AGFsaWNlAHh5ejEyMw==
S: +
C:
S: A1 BAD Authentication exchange cancelled
S: A1 NO Authentication failed
"#;

    let session = replay(trace, |session| {
        session.authenticate_plain("alice", "xyz123").unwrap();
    });

    // BAD keeps the command pending, NO completes it.
    assert!(session.executed("AUTHENTICATE"));
    assert!(!session.outcome("AUTHENTICATE").unwrap().is_success());
}

#[test]
fn test_from_mailbox_management() {
    let trace = br#"S: * OK ready
C: A1 CREATE "owatagusiam/blurdybloop"
S: A1 OK CREATE completed
C: A2 RENAME "owatagusiam/blurdybloop" "owatagusiam/\"quoted\""
S: A2 OK RENAME completed
C: A3 SUBSCRIBE "owatagusiam/\"quoted\""
S: A3 OK SUBSCRIBE completed
C: A4 UNSUBSCRIBE "owatagusiam/\"quoted\""
S: A4 OK UNSUBSCRIBE completed
C: A5 EXAMINE "owatagusiam/\"quoted\""
S: * 0 EXISTS
S: A5 OK [READ-ONLY] EXAMINE completed
C: A6 DELETE "owatagusiam/\"quoted\""
S: A6 OK DELETE completed
C: A7 EXPUNGE
S: * 3 EXPUNGE
S: * 3 EXPUNGE
S: * 5 EXPUNGE
S: A7 OK EXPUNGE completed
C: A8 CAPABILITY
S: * CAPABILITY IMAP4rev1 STARTTLS AUTH=GSSAPI LOGINDISABLED
S: A8 OK CAPABILITY completed
C: A9 NOOP
S: A9 OK NOOP completed
"#;

    let quoted = "owatagusiam/\"quoted\"";
    let session = replay(trace, |session| {
        session
            .chained()
            .connect()
            .create("owatagusiam/blurdybloop")
            .unwrap()
            .rename("owatagusiam/blurdybloop", quoted)
            .unwrap()
            .subscribe(quoted)
            .unwrap()
            .unsubscribe(quoted)
            .unwrap()
            .examine(quoted)
            .unwrap()
            .delete(quoted)
            .unwrap()
            .expunge()
            .capability()
            .noop()
            .execute()
            .unwrap();
    });

    assert_eq!(session.get("EXAMINE").unwrap().exists, Some(0));
    assert_eq!(session.get("EXPUNGE").unwrap().expunged, [3, 3, 5]);
    assert!(session
        .get("CAPABILITY")
        .unwrap()
        .capabilities
        .contains(&"LOGINDISABLED".to_owned()));
    assert_eq!(session.chain_state(), ChainState::Completed);
}
