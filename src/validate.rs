//! Reuse policies for pooled connections.
//!
//! Strategies compose by wrapping: the probes run their inner validator
//! first and only touch the network if it passes.

use crate::connection::Connection;
use std::time::Duration;

pub trait Validator: Send + Sync {
    /// Decide whether `conn` may be handed out again. Probes may exchange
    /// tokens with the server, so the connection is borrowed mutably.
    fn is_valid(&self, conn: &mut Connection) -> bool;
}

/// Rejects connections that are too old, mid-command, or have unread data.
#[derive(Debug, Clone)]
pub struct AgeDrainValidator {
    max_life: Duration,
}

impl AgeDrainValidator {
    pub fn new(max_life: Duration) -> Self {
        Self { max_life }
    }
}

impl Validator for AgeDrainValidator {
    fn is_valid(&self, conn: &mut Connection) -> bool {
        if !conn.is_open() {
            log::debug!("Connection to {} is {:?}", conn.host(), conn.state());
            return false;
        }
        let age = conn.age();
        if age > self.max_life {
            log::debug!("Connection to {} expired after {:?}", conn.host(), age);
            return false;
        }
        if conn.has_pending_data() {
            log::info!("Connection to {} has unread data from a previous command", conn.host());
            return false;
        }
        true
    }
}

/// Runs a keep-alive command that must exit 0.
#[derive(Debug, Clone)]
pub struct CommandProbe<V = AgeDrainValidator> {
    inner: V,
    command: Vec<Vec<u8>>,
}

impl<V: Validator> CommandProbe<V> {
    pub fn new<I, A>(inner: V, command: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Vec<u8>>,
    {
        Self {
            inner,
            command: command.into_iter().map(Into::into).collect(),
        }
    }
}

impl<V: Validator> Validator for CommandProbe<V> {
    fn is_valid(&self, conn: &mut Connection) -> bool {
        if !self.inner.is_valid(conn) {
            return false;
        }
        let result = conn
            .send_command(self.command.as_slice(), true)
            .and_then(|()| conn.recv_response());
        match result {
            Ok(response) if response.status == Some(0) => true,
            Ok(response) => {
                log::info!(
                    "Probe command on {} exited with {:?}",
                    conn.host(),
                    response.status
                );
                false
            }
            Err(e) => {
                log::info!("Probe command on {} failed: {}", conn.host(), e);
                false
            }
        }
    }
}

/// Round-trips a NOOP token. A v2 server answering VERSION also passes.
#[derive(Debug, Clone)]
pub struct NoopProbe<V = AgeDrainValidator> {
    inner: V,
}

impl<V: Validator> NoopProbe<V> {
    pub fn new(inner: V) -> Self {
        Self { inner }
    }
}

impl<V: Validator> Validator for NoopProbe<V> {
    fn is_valid(&self, conn: &mut Connection) -> bool {
        if !self.inner.is_valid(conn) {
            return false;
        }
        match conn.noop() {
            Ok(reply) => {
                if conn.has_pending_data() {
                    log::warn!(
                        "More than one reply to NOOP ({:?}) from {}",
                        reply,
                        conn.host()
                    );
                    return false;
                }
                true
            }
            Err(e) => {
                log::info!("NOOP probe on {} failed: {}", conn.host(), e);
                false
            }
        }
    }
}
