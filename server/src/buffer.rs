//! Bounded read buffer for the event loop
//!
//! Every read from a client goes through one buffer of `max_data_size` bytes,
//! and its result is classified into a [`ReadOutcome`].

use std::io;

/// Result of one non-blocking read attempt.
#[derive(Debug)]
pub enum ReadOutcome {
    /// `n` bytes are available in [`ReadBuffer::filled`].
    Data(usize),
    /// The peer performed an orderly shutdown.
    Closed,
    /// Readiness was spurious; nothing to do.
    WouldBlock,
    Failed(io::Error),
}

/// Fixed-capacity scratch buffer shared by every read in the event loop.
pub struct ReadBuffer {
    bytes: Box<[u8]>,
    filled: usize,
}

impl ReadBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: vec![0u8; capacity].into_boxed_slice(),
            filled: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Bytes produced by the last successful read.
    pub fn filled(&self) -> &[u8] {
        &self.bytes[..self.filled]
    }

    /// Runs one read against the buffer and classifies the result.
    ///
    /// `read` follows the `try_read` contract: `Ok(0)` is end of stream and
    /// `WouldBlock` means no data right now.
    pub fn read_with<F>(&mut self, read: F) -> ReadOutcome
    where
        F: FnOnce(&mut [u8]) -> io::Result<usize>,
    {
        self.filled = 0;

        match read(&mut self.bytes) {
            Ok(0) => ReadOutcome::Closed,
            Ok(n) => {
                self.filled = n.min(self.bytes.len());
                ReadOutcome::Data(self.filled)
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                ReadOutcome::WouldBlock
            }
            Err(e) => ReadOutcome::Failed(e),
        }
    }
}
