use std::fmt;

/// Error taxonomy for the core engine (§7).
///
/// `Protocol`, `Transport`, `ShiftConflict` and `DuplicateKeyMismatch` are
/// recoverable: the caller logs and retries (the do-list drives the
/// retry). `Config` and `FatalTopology` are process-terminating.
#[derive(Debug)]
pub enum Error {
    Protocol(ringkv_codec::Error),
    Transport(std::io::Error),
    ShiftConflict(String),
    DuplicateKeyMismatch { key_int: u64, key_str: String },
    Config(String),
    FatalTopology(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Protocol(e) => write!(f, "protocol error: {e}"),
            Error::Transport(e) => write!(f, "transport error: {e}"),
            Error::ShiftConflict(msg) => write!(f, "shift conflict: {msg}"),
            Error::DuplicateKeyMismatch { key_int, key_str } => {
                write!(f, "duplicate key mismatch for ({key_int}, {key_str:?})")
            }
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
            Error::FatalTopology(msg) => write!(f, "fatal topology error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<ringkv_codec::Error> for Error {
    fn from(e: ringkv_codec::Error) -> Self {
        Error::Protocol(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(e)
    }
}
