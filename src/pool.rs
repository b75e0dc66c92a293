//! Thread-safe pool of keep-alive connections to one server.

use crate::config::{Config, PoolConfig};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::gss::SecurityProvider;
use crate::session::State;
use crate::validate::Validator;
use parking_lot::{Condvar, Mutex};
use std::ops::{Deref, DerefMut};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Opens new connections for a pool.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Connection>;
}

impl<F> Connector for F
where
    F: Fn() -> Result<Connection> + Send + Sync,
{
    fn connect(&self) -> Result<Connection> {
        self()
    }
}

/// Opens TCP connections from a [`Config`] through a security provider.
pub struct TcpConnector {
    config: Config,
    provider: Arc<dyn SecurityProvider>,
}

impl TcpConnector {
    pub fn new(config: Config, provider: Arc<dyn SecurityProvider>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, provider })
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.config, self.provider.as_ref())
    }
}

/// Counts reported by [`Pool::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    /// Handed out, plus any being opened or validated
    pub borrowed: usize,
}

struct Idle {
    conn: Connection,
    since: Instant,
}

struct PoolState {
    /// Most recently returned last
    idle: Vec<Idle>,
    active: usize,
    closed: bool,
}

impl PoolState {
    fn total(&self) -> usize {
        self.idle.len() + self.active
    }
}

struct Shared {
    state: Mutex<PoolState>,
    available: Condvar,
    connector: Box<dyn Connector>,
    validator: Arc<dyn Validator>,
    config: PoolConfig,
}

struct Evictor {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct Pool {
    shared: Arc<Shared>,
    evictor: Mutex<Option<Evictor>>,
}

enum Slot {
    Idle(Connection),
    New,
}

impl Pool {
    /// Create a pool using the validator named by `config.validation`.
    pub fn new(connector: impl Connector + 'static, config: PoolConfig) -> Result<Self> {
        let validator = config.validator();
        Self::with_validator(connector, config, validator)
    }

    /// Pool of TCP connections to `client.host`.
    pub fn open(
        client: Config,
        config: PoolConfig,
        provider: Arc<dyn SecurityProvider>,
    ) -> Result<Self> {
        Self::new(TcpConnector::new(client, provider)?, config)
    }

    pub fn with_validator(
        connector: impl Connector + 'static,
        config: PoolConfig,
        validator: Arc<dyn Validator>,
    ) -> Result<Self> {
        config.validate()?;
        let interval = config.eviction_interval;
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                active: 0,
                closed: false,
            }),
            available: Condvar::new(),
            connector: Box::new(connector),
            validator,
            config,
        });

        let evictor = if interval.is_zero() {
            None
        } else {
            let (stop, signal) = mpsc::channel::<()>();
            let worker = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name("remctl-pool-evictor".to_string())
                .spawn(move || loop {
                    match signal.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => worker.evict(),
                        _ => break,
                    }
                })?;
            Some(Evictor { stop, handle })
        };

        Ok(Self {
            shared,
            evictor: Mutex::new(evictor),
        })
    }

    /// Take a connection, waiting up to `borrow_wait` for capacity.
    pub fn borrow(&self) -> Result<PooledConnection> {
        let shared = &self.shared;
        let wait = shared.config.borrow_wait;
        // A wait too long to represent as an instant has no deadline.
        let deadline = Instant::now().checked_add(wait);

        loop {
            let slot = {
                let mut state = shared.state.lock();
                loop {
                    if state.closed {
                        return Err(Error::ResourceExhausted("pool is closed".into()));
                    }
                    if let Some(idle) = state.idle.pop() {
                        state.active += 1;
                        break Slot::Idle(idle.conn);
                    }
                    if state.total() < shared.config.max_total {
                        state.active += 1;
                        break Slot::New;
                    }
                    match deadline {
                        Some(deadline) => {
                            if shared.available.wait_until(&mut state, deadline).timed_out() {
                                return Err(Error::ResourceExhausted(format!(
                                    "no connection available after {:?}",
                                    wait
                                )));
                            }
                        }
                        None => shared.available.wait(&mut state),
                    }
                }
            };

            match slot {
                Slot::Idle(mut conn) => {
                    if shared.config.test_on_borrow && !shared.validator.is_valid(&mut conn) {
                        log::debug!("Idle connection to {} failed validation", conn.host());
                        shared.discard(conn);
                        continue;
                    }
                    conn.clear_suspect();
                    log::debug!("Borrowed idle connection to {}", conn.host());
                    return Ok(PooledConnection::new(conn, Arc::clone(shared)));
                }
                Slot::New => match shared.connector.connect() {
                    Ok(conn) => {
                        log::debug!("Borrowed new connection to {}", conn.host());
                        return Ok(PooledConnection::new(conn, Arc::clone(shared)));
                    }
                    Err(e) => {
                        shared.release_slot();
                        return Err(e);
                    }
                },
            }
        }
    }

    /// Give a connection back. Same as dropping it.
    pub fn return_connection(&self, conn: PooledConnection) {
        drop(conn);
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.shared.state.lock();
        PoolStatus {
            idle: state.idle.len(),
            borrowed: state.active,
        }
    }

    /// Close idle connections and stop the evictor. Borrowed connections
    /// are closed when they come back; further borrows fail.
    pub fn close(&self) {
        let idle = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            std::mem::take(&mut state.idle)
        };
        self.shared.available.notify_all();

        if let Some(evictor) = self.evictor.lock().take() {
            drop(evictor.stop);
            if evictor.handle.join().is_err() {
                log::warn!("Pool evictor thread panicked");
            }
        }

        if !idle.is_empty() {
            log::debug!("Closing {} idle connection(s)", idle.len());
        }
        drop(idle);
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    /// Forget a reserved slot that never produced a connection.
    fn release_slot(&self) {
        self.state.lock().active -= 1;
        self.available.notify_one();
    }

    /// Destroy a connection taken out of the pool.
    fn discard(&self, conn: Connection) {
        self.release_slot();
        drop(conn);
    }

    fn release(&self, mut conn: Connection, invalid: bool) {
        let keep = !invalid
            && match conn.state() {
                State::Ready => true,
                State::Suspect => {
                    let ok = self.validator.is_valid(&mut conn);
                    if ok {
                        conn.clear_suspect();
                    }
                    ok
                }
                _ => false,
            };

        let discarded = {
            let mut state = self.state.lock();
            state.active -= 1;
            if keep && !state.closed && state.idle.len() < self.config.max_idle {
                state.idle.push(Idle {
                    conn,
                    since: Instant::now(),
                });
                None
            } else {
                Some(conn)
            }
        };
        self.available.notify_one();

        if let Some(conn) = discarded {
            log::debug!("Destroying returned connection to {} ({:?})", conn.host(), conn.state());
        }
    }

    /// One eviction pass: drop connections idle too long, then validate the
    /// rest if configured to.
    fn evict(&self) {
        let now = Instant::now();
        let (expired, to_test) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            let min_idle = self.config.min_evictable_idle;
            let (expired, rest): (Vec<Idle>, Vec<Idle>) = std::mem::take(&mut state.idle)
                .into_iter()
                .partition(|idle| now.duration_since(idle.since) >= min_idle);
            if self.config.test_while_idle {
                state.active += rest.len();
                (expired, rest)
            } else {
                state.idle = rest;
                (expired, Vec::new())
            }
        };

        if !expired.is_empty() {
            log::debug!("Evicting {} idle connection(s)", expired.len());
            drop(expired);
            self.available.notify_all();
        }

        // Newest first, each reinserted below anything returned meanwhile.
        for mut idle in to_test.into_iter().rev() {
            let valid = self.validator.is_valid(&mut idle.conn);
            let discarded = {
                let mut state = self.state.lock();
                state.active -= 1;
                if valid && !state.closed {
                    state.idle.insert(0, idle);
                    None
                } else {
                    Some(idle)
                }
            };
            self.available.notify_one();
            if let Some(idle) = discarded {
                log::debug!("Evicting connection to {} that failed validation", idle.conn.host());
            }
        }
    }
}

/// A borrowed connection. Returned to its pool on drop.
pub struct PooledConnection {
    /// Only `None` while dropping
    conn: Option<Connection>,
    shared: Arc<Shared>,
    invalid: bool,
}

impl PooledConnection {
    fn new(conn: Connection, shared: Arc<Shared>) -> Self {
        Self {
            conn: Some(conn),
            shared,
            invalid: false,
        }
    }

    /// Destroy the connection instead of returning it to the pool.
    pub fn invalidate(mut self) {
        self.invalid = true;
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.release(conn, self.invalid);
        }
    }
}
