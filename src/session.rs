use crate::error::{Error, Result};
use crate::frame;
use crate::gss::{SecurityContext, SecurityProvider};
use remctl_proto::{flags, ProtocolError, Token, MAX_FRAME_PAYLOAD};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Where a session is in its command cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Authenticated and waiting for a command
    Ready,
    /// A command was sent and its reply has not been fully read
    Collecting { keepalive: bool },
    /// The last keep-alive command ended in an ERROR token
    Suspect,
    /// A command without keep-alive completed; the server hangs up next
    Finished,
    /// QUIT was sent
    Closed,
    /// A fatal I/O, authentication or protocol error occurred
    Broken,
}

/// An authenticated remctl session over a duplex byte stream.
///
/// All tokens pass through the security context here; nothing above this
/// layer sees ciphertext.
pub struct Session<S> {
    stream: S,
    context: Box<dyn SecurityContext>,
    principal: String,
    established_at: Instant,
    pub(crate) state: State,
}

impl<S: Read + Write> Session<S> {
    /// Run the GSS-API handshake with `principal` over a fresh stream.
    pub fn establish(mut stream: S, provider: &dyn SecurityProvider, principal: &str) -> Result<Self> {
        // Announce protocol v2 or later
        frame::write_frame(
            &mut stream,
            flags::NOOP | flags::CONTEXT_NEXT | flags::PROTOCOL,
            &[],
        )?;

        let (mut context, mut step) = provider.init_context(principal)?;
        let mut rounds = 0;
        loop {
            if let Some(token) = step.token.take() {
                log::debug!("Sending context token of {} bytes", token.len());
                frame::write_frame(&mut stream, flags::CONTEXT | flags::PROTOCOL, &token)?;
            }
            if step.established {
                break;
            }
            let (f, payload) = frame::read_frame(&mut stream)?;
            if f != flags::CONTEXT | flags::PROTOCOL {
                return Err(ProtocolError::BadFlags(f).into());
            }
            step = context.step(&payload)?;
            rounds += 1;
        }

        if !context.mutual_auth() {
            return Err(Error::auth("no mutual authentication"));
        }

        log::debug!(
            "Context established with {} after {} server token(s); client is {}",
            principal,
            rounds,
            context.local_name().as_deref().unwrap_or("<unknown>")
        );

        Ok(Self {
            stream,
            context,
            principal: principal.to_string(),
            established_at: Instant::now(),
            state: State::Ready,
        })
    }

    /// Wrap and send one token.
    ///
    /// A token that is too large once wrapped is rejected before anything
    /// reaches the wire, leaving the session usable.
    pub fn write_token(&mut self, token: &Token) -> Result<()> {
        let plaintext = token.encode()?;
        let wrapped = self.context.wrap(&plaintext);
        let wrapped = self.check(wrapped)?;
        if wrapped.len() > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::TooLarge(wrapped.len()).into());
        }
        let result = frame::write_frame(&mut self.stream, flags::DATA | flags::PROTOCOL, &wrapped);
        self.check(result)
    }

    /// Read and unwrap one token.
    pub fn read_token(&mut self) -> Result<Token> {
        let result = self.recv_plaintext();
        self.check(result)
    }

    fn recv_plaintext(&mut self) -> Result<Token> {
        let (f, payload) = frame::read_frame(&mut self.stream)?;
        if f != flags::DATA | flags::PROTOCOL {
            return Err(ProtocolError::BadFlags(f).into());
        }
        let plaintext = self.context.unwrap(&payload)?;
        Ok(Token::decode(&plaintext)?)
    }
}

impl<S> Session<S> {
    pub fn state(&self) -> State {
        self.state
    }

    /// True if another command may be sent without further checks.
    pub fn is_reusable(&self) -> bool {
        self.state == State::Ready
    }

    /// Service principal the session authenticated to.
    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn local_name(&self) -> Option<String> {
        self.context.local_name()
    }

    pub fn peer_name(&self) -> Option<String> {
        self.context.peer_name()
    }

    pub fn established_at(&self) -> Instant {
        self.established_at
    }

    pub fn age(&self) -> Duration {
        self.established_at.elapsed()
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// True while commands may still be sent, including after a remote error.
    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Ready | State::Suspect)
    }

    /// A validator cleared a session that saw a remote error.
    pub(crate) fn clear_suspect(&mut self) {
        if self.state == State::Suspect {
            self.state = State::Ready;
        }
    }

    /// Mark the session broken if `result` carries a fatal error.
    pub(crate) fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                log::debug!("Session to {} broken: {}", self.principal, e);
                self.state = State::Broken;
            }
        }
        result
    }
}
