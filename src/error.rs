use std::io;

use remctl_proto::{ErrorCode, ProtocolError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server answered with an ERROR token.
    #[error("{message} (error {code})")]
    Remote { code: ErrorCode, message: String },

    /// The command ran and exited non-zero.
    #[error("remote command exited with status {exit}")]
    CommandFailed {
        exit: u8,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("connection not ready: {0}")]
    NotReady(&'static str),
}

impl Error {
    /// True if the connection that produced this error must not be reused.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Auth(_) | Self::Protocol(_))
    }

    /// Protocol error code, for remote errors and local protocol violations.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Remote { code, .. } => Some(*code),
            Self::Protocol(e) => Some(e.code()),
            _ => None,
        }
    }

    /// True for socket read/write deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::TimedOut)
    }

    pub(crate) fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }
}
