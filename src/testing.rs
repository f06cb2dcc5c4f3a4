use std::io;

use crate::session::Transport;

/// Records everything written.
#[derive(Debug)]
pub(crate) struct MockTransport {
    pub(crate) written: Vec<u8>,
    pub(crate) writable: bool,
    pub(crate) closed: bool,
    pub(crate) fail_writes: bool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            written: Vec::new(),
            writable: true,
            closed: false,
            fail_writes: false,
        }
    }
}

impl MockTransport {
    /// Written lines without line endings.
    pub(crate) fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.written)
            .split_terminator("\r\n")
            .map(ToOwned::to_owned)
            .collect()
    }
}

impl Transport for MockTransport {
    fn is_writable(&self) -> bool {
        self.writable && !self.closed
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"));
        }

        self.written.extend_from_slice(bytes);
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
