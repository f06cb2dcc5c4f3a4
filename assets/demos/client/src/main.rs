use anyhow::{Context, Error};
use futures::{SinkExt, StreamExt};
use imap_session::{
    session::{Event, Outcome, Session, SessionOptions},
    tokio::{channel, ResponseFrameCodec},
};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{info, warn};

const USAGE: &str = "USAGE: client <host> <port> <username> (password is read from IMAP_PASSWORD)";

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt().init();

    let mut args = std::env::args().skip(1);
    let host = args.next().context(USAGE)?;
    let port = args
        .next()
        .context(USAGE)?
        .parse::<u16>()
        .context("Could not parse port")?;
    let username = args.next().context(USAGE)?;
    let password = std::env::var("IMAP_PASSWORD").context(USAGE)?;

    let stream = TcpStream::connect((host.as_str(), port))
        .await
        .context(format!("Could not connect to {host}:{port}"))?;
    let (read_half, write_half) = stream.into_split();

    // Everything the session writes ends up here.
    let (transport, mut outgoing) = channel();
    let mut sink = FramedWrite::new(write_half, ResponseFrameCodec::default());
    let writer = tokio::spawn(async move {
        while let Some(bytes) = outgoing.recv().await {
            if let Err(error) = sink.send(bytes).await {
                warn!(%error, "Could not write");
                break;
            }
        }

        let _ = sink.close().await;
    });

    let options = SessionOptions::default();
    let mut session = Session::with_options(transport, options);

    session
        .chained()
        .connect()
        .login(&username, &password)?
        .select("INBOX")?
        .search("UNSEEN", None)?
        .then(|session| {
            let ids = session
                .get("SEARCH")
                .map(|message| message.search_ids.join(","))
                .unwrap_or_default();

            if ids.is_empty() {
                info!("No unseen messages");
            } else if let Err(error) = session.fetch(&ids, "(UID ENVELOPE)") {
                warn!(%error, "Could not fetch");
            }
        })
        .logout();
    session.execute()?;
    session.on_connect();

    let mut frames = FramedRead::new(read_half, ResponseFrameCodec::new(options));

    while !session.is_closed() {
        match frames.next().await {
            Some(Ok(frame)) => session.on_frame(frame),
            Some(Err(error)) => session.on_error(error),
            None => session.on_close(),
        }

        while let Some(event) = session.poll_event() {
            match event {
                Event::Greeting { status, text } => info!(?status, %text, "Greeting"),
                Event::Completed { key, outcome } => match outcome {
                    Outcome::Success { text, .. } => info!(%key, %text, "OK"),
                    Outcome::Failure { text, .. } => warn!(%key, %text, "NO"),
                    Outcome::ConnectionClosed => warn!(%key, "Connection closed"),
                },
                Event::ChainAborted { key, text, .. } => warn!(%key, %text, "Aborted"),
                Event::ChainCompleted => {
                    info!("Done");
                    session.on_close();
                }
                Event::Closed { error } => {
                    if let Some(error) = error {
                        warn!(%error, "Closed");
                    }
                }
                Event::Connected => {}
            }
        }
    }

    if let Some(message) = session.get("FETCH") {
        for fetch in &message.fetches {
            let subject = fetch
                .envelope
                .as_ref()
                .map(|envelope| envelope.subject.as_str())
                .unwrap_or_default();

            println!("UID: {}, Subject: {subject}", fetch.uid.unwrap_or_default());
        }
    }

    drop(session);
    writer.await.context("Writer task failed")?;

    Ok(())
}
