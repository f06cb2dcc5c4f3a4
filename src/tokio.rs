//! Tokio support.
//!
//! [`ResponseFrameCodec`] frames server bytes for a `FramedRead`, and [`ChannelTransport`]
//! hands outgoing bytes to a writer task. Together they connect a [`Session`] to any
//! `AsyncRead`/`AsyncWrite` pair.
//!
//! [`Session`]: crate::session::Session

use std::io;

use ::tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::SessionError,
    frame::{Framer, ResponseFrame},
    session::{SessionOptions, Transport},
};

/// Decodes [`ResponseFrame`]s and encodes raw command lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseFrameCodec {
    framer: Framer,
}

impl ResponseFrameCodec {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            framer: Framer::new(options.max_literal_length, options.max_frame_size),
        }
    }
}

impl Decoder for ResponseFrameCodec {
    type Item = ResponseFrame;
    type Error = SessionError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.framer.extract(src)?)
    }
}

impl Encoder<Bytes> for ResponseFrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}

/// A [`Transport`] that forwards writes into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sender: Option<UnboundedSender<Bytes>>,
}

impl ChannelTransport {
    pub fn new(sender: UnboundedSender<Bytes>) -> Self {
        Self {
            sender: Some(sender),
        }
    }
}

/// A transport and the receiving end a writer task drains.
///
/// The receiver yields `None` once the transport was closed (or dropped).
pub fn channel() -> (ChannelTransport, UnboundedReceiver<Bytes>) {
    let (sender, receiver) = unbounded_channel();

    (ChannelTransport::new(sender), receiver)
}

impl Transport for ChannelTransport {
    fn is_writable(&self) -> bool {
        self.sender
            .as_ref()
            .map_or(false, |sender| !sender.is_closed())
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let Some(sender) = self.sender.as_ref() else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport was closed",
            ));
        };

        sender
            .send(Bytes::copy_from_slice(bytes))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "writer is gone"))
    }

    fn close(&mut self) {
        self.sender = None;
    }
}
