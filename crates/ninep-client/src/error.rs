//! Client errors.

use ninep_proto::ProtoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The connection is gone; every pending and later call fails this way.
    #[error("connection closed")]
    ConnectionClosed,

    /// An `Rerror` from the server, verbatim.
    #[error("{0}")]
    Server(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    /// The server answered with the wrong message type.
    #[error("unexpected reply {got} to {sent}")]
    UnexpectedReply {
        sent: &'static str,
        got: &'static str,
    },

    #[error("walk stopped after {walked} of {wanted} elements")]
    WalkIncomplete { walked: usize, wanted: usize },

    #[error("server does not speak 9P2000 (offered {0:?})")]
    UnsupportedVersion(String),

    #[error("connect timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// The server's error string, if this came from an `Rerror`.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ClientError::Server(ename) => Some(ename),
            _ => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
