use std::fmt;

/// Errors raised while encoding or decoding the wire format.
#[derive(Debug)]
pub enum Error {
    /// The buffer does not yet hold a full element or frame. Not fatal: the
    /// caller retries once more bytes arrive.
    Incomplete,
    /// `append`/`advance_write` would exceed the buffer's capacity.
    BufferOverflow,
    /// Read past the write cursor, or any other structurally invalid frame
    /// (unknown tag, bad UTF-8, wrong element where another was expected).
    Protocol(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Incomplete => write!(f, "incomplete frame"),
            Error::BufferOverflow => write!(f, "buffer overflow"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}
