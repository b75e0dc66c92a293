use std::fmt;

use thiserror::Error;

/// Error codes carried by an ERROR token.
///
/// Servers may send codes outside this table; those are kept as `Other`
/// so the numeric value survives a decode/encode cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Internal,
    BadToken,
    UnknownMessage,
    BadCommand,
    UnknownCommand,
    Access,
    TooManyArgs,
    TooMuchData,
    UnexpectedMessage,
    NoHelp,
    Other(u32),
}

impl ErrorCode {
    pub fn from_u32(code: u32) -> Self {
        match code {
            1 => Self::Internal,
            2 => Self::BadToken,
            3 => Self::UnknownMessage,
            4 => Self::BadCommand,
            5 => Self::UnknownCommand,
            6 => Self::Access,
            7 => Self::TooManyArgs,
            8 => Self::TooMuchData,
            9 => Self::UnexpectedMessage,
            10 => Self::NoHelp,
            other => Self::Other(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Internal => 1,
            Self::BadToken => 2,
            Self::UnknownMessage => 3,
            Self::BadCommand => 4,
            Self::UnknownCommand => 5,
            Self::Access => 6,
            Self::TooManyArgs => 7,
            Self::TooMuchData => 8,
            Self::UnexpectedMessage => 9,
            Self::NoHelp => 10,
            Self::Other(code) => code,
        }
    }

    /// Canonical server message for this code.
    pub fn description(self) -> &'static str {
        match self {
            Self::Internal => "Internal server failure",
            Self::BadToken => "Invalid format in token",
            Self::UnknownMessage => "Unknown message type",
            Self::BadCommand => "Invalid command format in token",
            Self::UnknownCommand => "Unknown command",
            Self::Access => "Access denied",
            Self::TooManyArgs => "Argument count exceeds server limit",
            Self::TooMuchData => "Argument size exceeds server limit",
            Self::UnexpectedMessage => "Message type not valid now",
            Self::NoHelp => "No help defined for this command",
            Self::Other(_) => "Unknown error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// A frame or token that violates the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("token length {0} exceeds maximum")]
    TooLarge(usize),

    #[error("protocol v1 not supported")]
    V1Unsupported,

    #[error("protocol v{0} not supported")]
    UnsupportedVersion(u8),

    #[error("unexpected token flags 0x{0:02x}")]
    BadFlags(u8),

    #[error("malformed {0} token")]
    Malformed(&'static str),

    #[error("unknown message type {0}")]
    UnknownMessage(u8),

    #[error("unrecognized output stream {0}")]
    BadStream(u8),

    #[error("exit status {0} out of range")]
    StatusOutOfRange(i64),

    #[error("command requires at least one argument")]
    EmptyCommand,

    #[error("unexpected {0} token")]
    UnexpectedToken(&'static str),

    #[error("version negotiation: server supports up to protocol v{0}")]
    VersionNegotiation(u8),
}

impl ProtocolError {
    /// The protocol error code a server would use for the same fault.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownMessage(_) => ErrorCode::UnknownMessage,
            Self::UnexpectedToken(_) | Self::VersionNegotiation(_) => {
                ErrorCode::UnexpectedMessage
            }
            Self::EmptyCommand => ErrorCode::BadCommand,
            Self::TooLarge(_)
            | Self::V1Unsupported
            | Self::UnsupportedVersion(_)
            | Self::BadFlags(_)
            | Self::Malformed(_)
            | Self::BadStream(_)
            | Self::StatusOutOfRange(_) => ErrorCode::BadToken,
        }
    }
}
