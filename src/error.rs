use std::io;

use thiserror::Error as ThisError;

use crate::frame;

#[derive(Debug, ThisError)]
pub enum Error {
    /// The server is unreachable, the transport closed or timed out, or the stream is out of sync.
    /// The connection is always torn down before this error reaches the caller.
    #[error("{0}")]
    Connection(String),
    /// The server rejected the configured password during the handshake.
    #[error("{0}")]
    Authentication(String),
    /// The decode engine found malformed framing.
    #[error("protocol error; {0}")]
    InvalidResponse(String),
    /// A well formed error reply sent by the server, e.g. `ERR unknown command`. The connection
    /// remains usable.
    #[error("{0}")]
    Response(String),
    /// Text that can't be represented in the configured encoding under the `strict` policy.
    #[error("encoding error; {0}")]
    Encoding(String),
}

impl Error {
    pub(crate) fn closed() -> Error {
        Error::Connection("Socket closed on remote end".to_string())
    }

    /// Whether the error leaves the connection torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Authentication(_) | Error::InvalidResponse(_)
        )
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Connection(err.to_string())
    }
}

impl From<frame::Error> for Error {
    fn from(err: frame::Error) -> Error {
        Error::InvalidResponse(err.to_string())
    }
}
