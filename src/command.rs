//! Command engine: one COMMAND out, OUTPUT* then STATUS or ERROR back.

use crate::error::{Error, Result};
use crate::session::{Session, State};
use remctl_proto::{ProtocolError, Stream, Token};
use std::borrow::Cow;
use std::io::{Read, Write};

/// Collected result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResponse {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Set iff the reply ended with a STATUS token.
    pub status: Option<u8>,
}

impl CommandResponse {
    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// Turn a non-zero (or missing) exit status into [`Error::CommandFailed`].
    pub fn into_success(self) -> Result<Self> {
        match self.status {
            Some(0) => Ok(self),
            status => Err(Error::CommandFailed {
                exit: status.unwrap_or(u8::MAX),
                stdout: self.stdout,
                stderr: self.stderr,
            }),
        }
    }
}

/// One element of a command's reply, in the order the server sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Data { stream: Stream, data: Vec<u8> },
    Status(u8),
}

/// Successful answer to a NOOP probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoopReply {
    /// Protocol v3 server
    Noop,
    /// Server only speaks up to the given version
    Version(u8),
}

impl<S: Read + Write> Session<S> {
    /// Send a command. `keepalive` asks the server to keep the connection
    /// open once the command finishes.
    pub fn send_command<A: AsRef<[u8]>>(&mut self, args: &[A], keepalive: bool) -> Result<()> {
        self.expect_idle()?;
        if args.is_empty() {
            return Err(ProtocolError::EmptyCommand.into());
        }
        self.write_token(&Token::command(keepalive, args))?;
        self.state = State::Collecting { keepalive };
        Ok(())
    }

    /// Read the next piece of the current command's reply.
    ///
    /// Returns `None` once the reply is complete (or no command was sent).
    /// An ERROR token ends the reply and is returned as [`Error::Remote`].
    pub fn output(&mut self) -> Result<Option<Output>> {
        let keepalive = match self.state {
            State::Collecting { keepalive } => keepalive,
            _ => return Ok(None),
        };

        match self.read_token()? {
            Token::Output { stream, data } => Ok(Some(Output::Data { stream, data })),
            Token::Status { exit } => {
                self.state = if keepalive { State::Ready } else { State::Finished };
                Ok(Some(Output::Status(exit)))
            }
            Token::Error { code, message } => {
                self.state = if keepalive { State::Suspect } else { State::Finished };
                Err(Error::Remote { code, message })
            }
            Token::Version { highest } => {
                self.check(Err(ProtocolError::VersionNegotiation(highest).into()))
            }
            other => self.check(Err(ProtocolError::UnexpectedToken(other.name()).into())),
        }
    }

    /// Read the whole reply, splitting it into stdout and stderr.
    pub fn recv_response(&mut self) -> Result<CommandResponse> {
        if !matches!(self.state, State::Collecting { .. }) {
            return Err(Error::NotReady("no command in progress"));
        }

        let mut response = CommandResponse::default();
        while let Some(output) = self.output()? {
            match output {
                Output::Data {
                    stream: Stream::Stdout,
                    data,
                } => response.stdout.extend_from_slice(&data),
                Output::Data {
                    stream: Stream::Stderr,
                    data,
                } => response.stderr.extend_from_slice(&data),
                Output::Status(exit) => {
                    response.status = Some(exit);
                    break;
                }
            }
        }
        Ok(response)
    }

    /// Send a NOOP and wait for the reply. Both a v3 NOOP and a v2 VERSION
    /// answer count as a live connection.
    pub fn noop(&mut self) -> Result<NoopReply> {
        self.expect_idle()?;
        self.write_token(&Token::Noop)?;
        match self.read_token()? {
            Token::Noop => Ok(NoopReply::Noop),
            Token::Version { highest } => Ok(NoopReply::Version(highest)),
            Token::Error { code, message } => Err(Error::Remote { code, message }),
            other => self.check(Err(ProtocolError::UnexpectedToken(other.name()).into())),
        }
    }

    /// Tell the server we are done. Nothing may be sent afterwards.
    pub fn quit(&mut self) -> Result<()> {
        match self.state {
            State::Closed | State::Broken | State::Finished => return Ok(()),
            _ => {}
        }
        self.write_token(&Token::Quit)?;
        self.state = State::Closed;
        Ok(())
    }

    fn expect_idle(&self) -> Result<()> {
        match self.state {
            State::Ready | State::Suspect => Ok(()),
            State::Collecting { .. } => Err(Error::NotReady("previous command output not consumed")),
            State::Finished => Err(Error::NotReady("server closes the connection after a command without keep-alive")),
            State::Closed => Err(Error::NotReady("connection closed")),
            State::Broken => Err(Error::NotReady("connection broken")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{frames, handshake_reply, server_tokens, IdentityProvider, MockStream};
    use remctl_proto::{message, ErrorCode};

    fn session(replies: &[Token]) -> Session<MockStream> {
        let provider = IdentityProvider::new();
        let mut input = handshake_reply(&provider);
        input.extend(server_tokens(replies).unwrap());
        Session::establish(MockStream::new(input), &provider, "host/test").unwrap()
    }

    fn out(data: &str) -> Token {
        Token::output(Stream::Stdout, data.as_bytes())
    }

    fn err(data: &str) -> Token {
        Token::output(Stream::Stderr, data.as_bytes())
    }

    fn last_sent(session: &Session<MockStream>) -> Token {
        let (_, payload) = frames(session.get_ref().written()).pop().unwrap();
        Token::decode(&payload).unwrap()
    }

    #[test]
    fn echo() {
        let mut s = session(&[out("hello\n"), Token::Status { exit: 0 }]);
        s.send_command(&["echo", "hello"], false).unwrap();
        assert_eq!(last_sent(&s), Token::command(false, ["echo", "hello"]));

        let response = s.recv_response().unwrap();
        assert_eq!(response.stdout, b"hello\n");
        assert!(response.stderr.is_empty());
        assert_eq!(response.status, Some(0));
        assert_eq!(s.state(), State::Finished);
    }

    #[test]
    fn mixed_streams_keep_order() {
        let mut s = session(&[
            out("out1\n"),
            err("err1\n"),
            out("out2\n"),
            Token::Status { exit: 0 },
        ]);
        s.send_command(&["test"], true).unwrap();
        let response = s.recv_response().unwrap();
        assert_eq!(response.stdout_lossy(), "out1\nout2\n");
        assert_eq!(response.stderr_lossy(), "err1\n");
        assert_eq!(s.state(), State::Ready);
    }

    #[test]
    fn streaming_output_preserves_interleaving() {
        let mut s = session(&[out("a"), err("b"), out("c"), Token::Status { exit: 3 }]);
        s.send_command(&["test"], false).unwrap();

        let mut seen = Vec::new();
        while let Some(o) = s.output().unwrap() {
            seen.push(o);
        }
        assert_eq!(
            seen,
            vec![
                Output::Data { stream: Stream::Stdout, data: b"a".to_vec() },
                Output::Data { stream: Stream::Stderr, data: b"b".to_vec() },
                Output::Data { stream: Stream::Stdout, data: b"c".to_vec() },
                Output::Status(3),
            ]
        );
        assert_eq!(s.output().unwrap(), None);
    }

    #[test]
    fn nonzero_status_is_returned() {
        let mut s = session(&[Token::Status { exit: 78 }]);
        s.send_command(&["fail"], false).unwrap();
        let response = s.recv_response().unwrap();
        assert_eq!(response.status, Some(78));
        assert!(matches!(
            response.into_success(),
            Err(Error::CommandFailed { exit: 78, .. })
        ));
    }

    #[test]
    fn error_token_is_remote_error() {
        let mut s = session(&[Token::error(ErrorCode::Access, "Access denied")]);
        s.send_command(&["secret"], true).unwrap();
        match s.recv_response() {
            Err(Error::Remote { code, message }) => {
                assert_eq!(code, ErrorCode::Access);
                assert_eq!(message, "Access denied");
            }
            other => panic!("expected remote error, got {:?}", other),
        }
        assert_eq!(s.state(), State::Suspect);
        assert!(!s.is_reusable());
    }

    #[test]
    fn error_without_keepalive_finishes() {
        let mut s = session(&[Token::error(ErrorCode::UnknownCommand, "Unknown command")]);
        s.send_command(&["nope"], false).unwrap();
        let e = s.recv_response().unwrap_err();
        assert_eq!(e.to_string(), "Unknown command (error 5)");
        assert_eq!(s.state(), State::Finished);
    }

    #[test]
    fn version_mid_stream_is_protocol_error() {
        let mut s = session(&[out("partial"), Token::Version { highest: 2 }]);
        s.send_command(&["test"], true).unwrap();
        assert!(matches!(
            s.recv_response(),
            Err(Error::Protocol(ProtocolError::VersionNegotiation(2)))
        ));
        assert_eq!(s.state(), State::Broken);
    }

    #[test]
    fn unexpected_token_type() {
        let mut s = session(&[Token::Noop]);
        s.send_command(&["test"], true).unwrap();
        assert!(matches!(
            s.recv_response(),
            Err(Error::Protocol(ProtocolError::UnexpectedToken("noop")))
        ));
        assert_eq!(s.state(), State::Broken);
    }

    #[test]
    fn empty_command_rejected() {
        let mut s = session(&[]);
        let args: [&str; 0] = [];
        assert!(matches!(
            s.send_command(&args, false),
            Err(Error::Protocol(ProtocolError::EmptyCommand))
        ));
        assert_eq!(s.state(), State::Ready);
    }

    #[test]
    fn keepalive_allows_second_command() {
        let mut s = session(&[
            out("one"),
            Token::Status { exit: 0 },
            out("two"),
            Token::Status { exit: 0 },
        ]);
        s.send_command(&["first"], true).unwrap();
        assert_eq!(s.recv_response().unwrap().stdout, b"one");
        s.send_command(&["second"], true).unwrap();
        assert_eq!(s.recv_response().unwrap().stdout, b"two");
    }

    #[test]
    fn no_second_command_without_keepalive() {
        let mut s = session(&[Token::Status { exit: 0 }]);
        s.send_command(&["first"], false).unwrap();
        s.recv_response().unwrap();
        assert!(matches!(s.send_command(&["second"], false), Err(Error::NotReady(_))));
    }

    #[test]
    fn no_command_while_collecting() {
        let mut s = session(&[]);
        s.send_command(&["first"], true).unwrap();
        assert!(matches!(s.send_command(&["second"], true), Err(Error::NotReady(_))));
        assert!(matches!(s.noop(), Err(Error::NotReady(_))));
    }

    #[test]
    fn noop_against_v3_and_v2() {
        let mut s = session(&[Token::Noop, Token::Version { highest: 2 }]);
        assert_eq!(s.noop().unwrap(), NoopReply::Noop);
        let (_, payload) = frames(s.get_ref().written()).pop().unwrap();
        assert_eq!(payload, vec![3, message::NOOP]);

        assert_eq!(s.noop().unwrap(), NoopReply::Version(2));
        assert_eq!(s.state(), State::Ready);
    }

    #[test]
    fn quit_closes_session() {
        let mut s = session(&[]);
        s.quit().unwrap();
        assert_eq!(last_sent(&s), Token::Quit);
        assert_eq!(s.state(), State::Closed);
        assert!(matches!(s.send_command(&["late"], true), Err(Error::NotReady(_))));
        // A second quit is a no-op
        s.quit().unwrap();
    }
}
