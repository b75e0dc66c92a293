//! Security provider capability.
//!
//! The client never talks to a GSS-API library directly. A provider creates
//! one context per connection; the context drives the handshake and then
//! protects every message token.

use crate::error::Result;

/// Result of one context establishment step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Step {
    /// Token to send to the server, if the mechanism produced one.
    pub token: Option<Vec<u8>>,
    /// True once the context is fully established.
    pub established: bool,
}

pub trait SecurityProvider: Send + Sync {
    /// Start a context targeting `target` (e.g. `host/server.example.org`),
    /// requesting mutual authentication, confidentiality and integrity.
    /// Returns the context together with its first step.
    fn init_context(&self, target: &str) -> Result<(Box<dyn SecurityContext>, Step)>;
}

pub trait SecurityContext: Send {
    /// Feed a token received from the server.
    fn step(&mut self, token: &[u8]) -> Result<Step>;

    /// Encrypt and integrity-protect a message.
    fn wrap(&mut self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Reverse of [`SecurityContext::wrap`].
    fn unwrap(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// Whether the server proved its identity during establishment.
    fn mutual_auth(&self) -> bool;

    fn local_name(&self) -> Option<String>;

    fn peer_name(&self) -> Option<String>;
}
