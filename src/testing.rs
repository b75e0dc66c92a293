//! Test doubles for exercising the client without a KDC.
//!
//! [`IdentityProvider`] establishes a context whose wrap/unwrap is the
//! identity function, so server replies can be scripted as plain tokens.
//! The `serve_*` helpers implement the server half of the same exchange.

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::gss::{SecurityContext, SecurityProvider, Step};
use remctl_proto::{flags, ProtocolError, Token};
use std::io::{self, Cursor, Read, Write};

pub const CLIENT_NAME: &str = "client@TEST.REALM";

/// Security provider whose contexts do not protect anything.
///
/// By default the handshake mirrors Kerberos: the client sends one token and
/// the server answers with one, after which the context is established with
/// mutual authentication.
#[derive(Debug, Clone)]
pub struct IdentityProvider {
    server_legs: usize,
    mutual: bool,
    overhead: usize,
}

impl IdentityProvider {
    pub fn new() -> Self {
        Self {
            server_legs: 1,
            mutual: true,
            overhead: 0,
        }
    }

    /// Number of CONTEXT tokens the server sends before the client is done.
    pub fn with_server_legs(mut self, legs: usize) -> Self {
        self.server_legs = legs;
        self
    }

    /// Establish contexts that never report mutual authentication.
    pub fn without_mutual_auth(mut self) -> Self {
        self.mutual = false;
        self
    }

    /// Pad every wrapped token with `bytes` trailing zeros, which unwrap
    /// strips again. Servers built from the `serve_*` helpers do not pad.
    pub fn with_wrap_overhead(mut self, bytes: usize) -> Self {
        self.overhead = bytes;
        self
    }

    pub fn server_legs(&self) -> usize {
        self.server_legs
    }
}

impl Default for IdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityProvider for IdentityProvider {
    fn init_context(&self, target: &str) -> Result<(Box<dyn SecurityContext>, Step)> {
        let established = self.server_legs == 0;
        let context = IdentityContext {
            target: target.to_string(),
            server_legs: self.server_legs,
            legs_seen: 0,
            mutual: self.mutual,
            overhead: self.overhead,
            established,
        };
        let step = Step {
            token: Some(b"identity:init".to_vec()),
            established,
        };
        Ok((Box::new(context), step))
    }
}

struct IdentityContext {
    target: String,
    server_legs: usize,
    legs_seen: usize,
    mutual: bool,
    overhead: usize,
    established: bool,
}

impl SecurityContext for IdentityContext {
    fn step(&mut self, _token: &[u8]) -> Result<Step> {
        if self.established {
            return Err(Error::auth("context already established"));
        }
        self.legs_seen += 1;
        if self.legs_seen >= self.server_legs {
            self.established = true;
            return Ok(Step {
                token: None,
                established: true,
            });
        }
        Ok(Step {
            token: Some(format!("identity:{}", self.legs_seen).into_bytes()),
            established: false,
        })
    }

    fn wrap(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if !self.established {
            return Err(Error::auth("context not established"));
        }
        let mut wrapped = plaintext.to_vec();
        wrapped.resize(plaintext.len() + self.overhead, 0);
        Ok(wrapped)
    }

    fn unwrap(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if !self.established {
            return Err(Error::auth("context not established"));
        }
        match ciphertext.len().checked_sub(self.overhead) {
            Some(len) => Ok(ciphertext[..len].to_vec()),
            None => Err(Error::auth("wrapped token shorter than its padding")),
        }
    }

    fn mutual_auth(&self) -> bool {
        self.established && self.mutual
    }

    fn local_name(&self) -> Option<String> {
        Some(CLIENT_NAME.to_string())
    }

    fn peer_name(&self) -> Option<String> {
        Some(self.target.clone())
    }
}

/// A stream whose reads replay scripted server bytes and whose writes are kept.
pub struct MockStream {
    input: Cursor<Vec<u8>>,
    written: Vec<u8>,
}

impl MockStream {
    pub fn new(input: Vec<u8>) -> Self {
        Self {
            input: Cursor::new(input),
            written: Vec::new(),
        }
    }

    /// Everything the client has written so far.
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// True once every scripted byte has been consumed.
    pub fn is_drained(&self) -> bool {
        self.input.position() as usize >= self.input.get_ref().len()
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Server bytes answering an identity handshake.
pub fn handshake_reply(provider: &IdentityProvider) -> Vec<u8> {
    let mut out = Vec::new();
    for leg in 0..provider.server_legs() {
        let token = format!("identity:server:{}", leg);
        out.push(flags::CONTEXT | flags::PROTOCOL);
        out.extend_from_slice(&(token.len() as u32).to_be_bytes());
        out.extend_from_slice(token.as_bytes());
    }
    out
}

/// Server bytes carrying `tokens` as DATA frames under the identity context.
pub fn server_tokens(tokens: &[Token]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for token in tokens {
        write_frame(&mut out, flags::DATA | flags::PROTOCOL, &token.encode()?)?;
    }
    Ok(out)
}

/// Split captured bytes into (flags, payload) frames.
pub fn frames(bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut cursor = Cursor::new(bytes);
    let mut out = Vec::new();
    while (cursor.position() as usize) < bytes.len() {
        match read_frame(&mut cursor) {
            Ok(frame) => out.push(frame),
            Err(_) => break,
        }
    }
    out
}

/// Server side of the handshake: sentinel, then the context exchange.
pub fn serve_handshake<S: Read + Write>(stream: &mut S, provider: &IdentityProvider) -> Result<()> {
    let (sentinel, payload) = read_frame(stream)?;
    if sentinel != flags::NOOP | flags::CONTEXT_NEXT | flags::PROTOCOL || !payload.is_empty() {
        return Err(ProtocolError::BadFlags(sentinel).into());
    }
    expect_context(stream)?;
    let legs = provider.server_legs();
    for leg in 0..legs {
        let token = format!("identity:server:{}", leg);
        write_frame(stream, flags::CONTEXT | flags::PROTOCOL, token.as_bytes())?;
        if leg + 1 < legs {
            expect_context(stream)?;
        }
    }
    Ok(())
}

fn expect_context<S: Read>(stream: &mut S) -> Result<Vec<u8>> {
    let (f, payload) = read_frame(stream)?;
    if f != flags::CONTEXT | flags::PROTOCOL {
        return Err(ProtocolError::BadFlags(f).into());
    }
    Ok(payload)
}

/// Read one client token. Returns `None` when the client hung up.
pub fn serve_read_token<S: Read>(stream: &mut S) -> Result<Option<Token>> {
    let (f, payload) = match read_frame(stream) {
        Ok(frame) => frame,
        Err(Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if f != flags::DATA | flags::PROTOCOL {
        return Err(ProtocolError::BadFlags(f).into());
    }
    Ok(Some(Token::decode(&payload)?))
}

pub fn serve_write_token<S: Write>(stream: &mut S, token: &Token) -> Result<()> {
    write_frame(stream, flags::DATA | flags::PROTOCOL, &token.encode()?)
}
