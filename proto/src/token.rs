use crate::error::{ErrorCode, ProtocolError};
use crate::{message, MAX_FRAME_PAYLOAD, MAX_SUPPORTED_VERSION, NOOP_VERSION, PROTOCOL_VERSION};

/// Output stream of an OUTPUT token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Stdout => 1,
            Self::Stderr => 2,
        }
    }
}

/// A message token, i.e. the plaintext inside a DATA frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Command { keepalive: bool, args: Vec<Vec<u8>> },
    Quit,
    Output { stream: Stream, data: Vec<u8> },
    Status { exit: u8 },
    Error { code: ErrorCode, message: String },
    Version { highest: u8 },
    Noop,
}

impl Token {
    /// Build a COMMAND token. Arguments are sent as opaque bytes.
    pub fn command<I, A>(keepalive: bool, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        Self::Command {
            keepalive,
            args: args.into_iter().map(|a| a.as_ref().to_vec()).collect(),
        }
    }

    /// Build a STATUS token, rejecting exit codes that do not fit in a byte.
    pub fn status(exit: i64) -> Result<Self, ProtocolError> {
        u8::try_from(exit)
            .map(|exit| Self::Status { exit })
            .map_err(|_| ProtocolError::StatusOutOfRange(exit))
    }

    pub fn output(stream: Stream, data: impl Into<Vec<u8>>) -> Self {
        Self::Output {
            stream,
            data: data.into(),
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    pub fn message_type(&self) -> u8 {
        match self {
            Self::Command { .. } => message::COMMAND,
            Self::Quit => message::QUIT,
            Self::Output { .. } => message::OUTPUT,
            Self::Status { .. } => message::STATUS,
            Self::Error { .. } => message::ERROR,
            Self::Version { .. } => message::VERSION,
            Self::Noop => message::NOOP,
        }
    }

    /// Protocol version written in front of this token.
    pub fn version(&self) -> u8 {
        match self {
            Self::Noop => NOOP_VERSION,
            _ => PROTOCOL_VERSION,
        }
    }

    pub fn name(&self) -> &'static str {
        type_name(self.message_type())
    }

    /// Serialize to the plaintext form: [version] [type] [body].
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = vec![self.version(), self.message_type()];
        match self {
            Self::Command { keepalive, args } => {
                if args.is_empty() {
                    return Err(ProtocolError::EmptyCommand);
                }
                let body: usize = 6 + args.iter().map(|a| 4 + a.len()).sum::<usize>();
                check_size(body)?;
                buf.reserve(body);
                buf.push(u8::from(*keepalive));
                buf.push(0);
                buf.extend_from_slice(&(args.len() as u32).to_be_bytes());
                for arg in args {
                    buf.extend_from_slice(&(arg.len() as u32).to_be_bytes());
                    buf.extend_from_slice(arg);
                }
            }
            Self::Quit | Self::Noop => {}
            Self::Output { stream, data } => {
                check_size(5 + data.len())?;
                buf.push(stream.as_u8());
                buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
                buf.extend_from_slice(data);
            }
            Self::Status { exit } => buf.push(*exit),
            Self::Error { code, message } => {
                check_size(8 + message.len())?;
                buf.extend_from_slice(&code.as_u32().to_be_bytes());
                buf.extend_from_slice(&(message.len() as u32).to_be_bytes());
                buf.extend_from_slice(message.as_bytes());
            }
            Self::Version { highest } => {
                if *highest < PROTOCOL_VERSION {
                    return Err(ProtocolError::Malformed("version"));
                }
                buf.push(*highest);
            }
        }
        Ok(buf)
    }

    /// Parse a plaintext token. The body must be consumed exactly.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < 2 {
            return Err(ProtocolError::Malformed("message"));
        }
        let version = buf[0];
        match version {
            1 => return Err(ProtocolError::V1Unsupported),
            v if v < 1 || v > MAX_SUPPORTED_VERSION => {
                return Err(ProtocolError::UnsupportedVersion(v));
            }
            _ => {}
        }

        let kind = buf[1];
        let mut body = Reader::new(&buf[2..], type_name(kind));
        let token = match kind {
            message::COMMAND => {
                let keepalive = match body.u8()? {
                    0 => false,
                    1 => true,
                    _ => return Err(ProtocolError::Malformed("command")),
                };
                if body.u8()? != 0 {
                    return Err(ProtocolError::Malformed("command"));
                }
                let argc = body.u32()? as usize;
                if argc == 0 {
                    return Err(ProtocolError::EmptyCommand);
                }
                // Each argument needs at least its 4-byte length.
                let mut args = Vec::with_capacity(argc.min(body.remaining() / 4));
                for _ in 0..argc {
                    let len = body.u32()? as usize;
                    args.push(body.bytes(len)?.to_vec());
                }
                Self::Command { keepalive, args }
            }
            message::QUIT => Self::Quit,
            message::OUTPUT => {
                let raw = body.u8()?;
                let stream = Stream::from_u8(raw).ok_or(ProtocolError::BadStream(raw))?;
                let len = body.u32()? as usize;
                let data = body.bytes(len)?.to_vec();
                Self::Output { stream, data }
            }
            message::STATUS => Self::Status { exit: body.u8()? },
            message::ERROR => {
                let code = ErrorCode::from_u32(body.u32()?);
                let len = body.u32()? as usize;
                let message = String::from_utf8_lossy(body.bytes(len)?).into_owned();
                Self::Error { code, message }
            }
            message::VERSION => {
                let highest = body.u8()?;
                if highest < PROTOCOL_VERSION {
                    return Err(ProtocolError::Malformed("version"));
                }
                Self::Version { highest }
            }
            message::NOOP => {
                if version < NOOP_VERSION {
                    return Err(ProtocolError::Malformed("noop"));
                }
                Self::Noop
            }
            other => return Err(ProtocolError::UnknownMessage(other)),
        };
        body.finish()?;
        Ok(token)
    }
}

fn type_name(kind: u8) -> &'static str {
    match kind {
        message::COMMAND => "command",
        message::QUIT => "quit",
        message::OUTPUT => "output",
        message::STATUS => "status",
        message::ERROR => "error",
        message::VERSION => "version",
        message::NOOP => "noop",
        _ => "unknown",
    }
}

/// Plaintext is [version] [type] [body]; the whole thing has to fit in a frame.
fn check_size(body: usize) -> Result<(), ProtocolError> {
    if body + 2 > MAX_FRAME_PAYLOAD {
        return Err(ProtocolError::TooLarge(body + 2));
    }
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
    what: &'static str,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, what }
    }

    fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, ProtocolError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        if self.buf.len() < len {
            return Err(ProtocolError::Malformed(self.what));
        }
        let (head, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(head)
    }

    fn finish(self) -> Result<(), ProtocolError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::Malformed(self.what))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_layout() {
        let token = Token::command(true, ["echo", "hi"]);
        let encoded = token.encode().unwrap();
        assert_eq!(
            encoded,
            [
                2, 1, // version, type
                1, 0, // keepalive, continue
                0, 0, 0, 2, // argc
                0, 0, 0, 4, b'e', b'c', b'h', b'o', //
                0, 0, 0, 2, b'h', b'i',
            ]
        );
        assert_eq!(Token::decode(&encoded).unwrap(), token);
    }

    #[test]
    fn command_args_are_opaque_bytes() {
        let token = Token::command(false, [&b"store"[..], &[0xff, 0x00, 0xfe][..], &[][..]]);
        let decoded = Token::decode(&token.encode().unwrap()).unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn empty_command_rejected() {
        let token = Token::command(false, Vec::<Vec<u8>>::new());
        assert_eq!(token.encode(), Err(ProtocolError::EmptyCommand));
    }

    #[test]
    fn status_bounds() {
        for exit in [0, 255] {
            let token = Token::status(exit).unwrap();
            assert_eq!(Token::decode(&token.encode().unwrap()).unwrap(), token);
        }
        assert_eq!(Token::status(256), Err(ProtocolError::StatusOutOfRange(256)));
        assert_eq!(Token::status(-1), Err(ProtocolError::StatusOutOfRange(-1)));
    }

    #[test]
    fn bad_output_stream() {
        let err = Token::decode(&[2, message::OUTPUT, 3, 0, 0, 0, 1, b'x']).unwrap_err();
        assert_eq!(err, ProtocolError::BadStream(3));
        assert_eq!(err.code(), ErrorCode::BadToken);
    }

    #[test]
    fn output_length_must_match_body() {
        let short = [2, message::OUTPUT, 1, 0, 0, 0, 5, b'a', b'b'];
        assert_eq!(Token::decode(&short), Err(ProtocolError::Malformed("output")));
        let long = [2, message::OUTPUT, 1, 0, 0, 0, 1, b'a', b'b'];
        assert_eq!(Token::decode(&long), Err(ProtocolError::Malformed("output")));
    }

    #[test]
    fn error_with_empty_message() {
        let decoded = Token::decode(&[2, message::ERROR, 0, 0, 0, 6, 0, 0, 0, 0]).unwrap();
        assert_eq!(decoded, Token::error(ErrorCode::Access, ""));
    }

    #[test]
    fn error_length_must_match_body() {
        let buf = [2, message::ERROR, 0, 0, 0, 5, 0, 0, 0, 9, b'n', b'o'];
        assert_eq!(Token::decode(&buf), Err(ProtocolError::Malformed("error")));
    }

    #[test]
    fn error_unknown_code_roundtrips() {
        let token = Token::error(ErrorCode::Other(77), "site specific");
        let decoded = Token::decode(&token.encode().unwrap()).unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn version_checks() {
        assert_eq!(Token::decode(&[0, message::STATUS, 0]), Err(ProtocolError::UnsupportedVersion(0)));
        assert_eq!(Token::decode(&[1, message::STATUS, 0]), Err(ProtocolError::V1Unsupported));
        assert_eq!(Token::decode(&[4, message::STATUS, 0]), Err(ProtocolError::UnsupportedVersion(4)));
        assert_eq!(Token::decode(&[3, message::STATUS, 7]).unwrap(), Token::Status { exit: 7 });
    }

    #[test]
    fn noop_requires_v3() {
        assert_eq!(Token::Noop.encode().unwrap(), vec![3, message::NOOP]);
        assert_eq!(Token::decode(&[3, message::NOOP]).unwrap(), Token::Noop);
        assert_eq!(Token::decode(&[2, message::NOOP]), Err(ProtocolError::Malformed("noop")));
    }

    #[test]
    fn version_token() {
        assert_eq!(Token::decode(&[2, message::VERSION, 2]).unwrap(), Token::Version { highest: 2 });
        assert!(Token::decode(&[2, message::VERSION, 1]).is_err());
        assert!(Token::decode(&[2, message::VERSION]).is_err());
    }

    #[test]
    fn truncated_and_unknown() {
        assert_eq!(Token::decode(&[2]), Err(ProtocolError::Malformed("message")));
        assert_eq!(Token::decode(&[2, 42]), Err(ProtocolError::UnknownMessage(42)));
        assert_eq!(Token::decode(&[2, message::QUIT, 0]), Err(ProtocolError::Malformed("quit")));
    }

    #[test]
    fn huge_argc_does_not_preallocate() {
        let buf = [2, message::COMMAND, 0, 0, 0xff, 0xff, 0xff, 0xff];
        assert_eq!(Token::decode(&buf), Err(ProtocolError::Malformed("command")));
    }
}
