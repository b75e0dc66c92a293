use crate::command::CommandResponse;
use crate::config::{Config, PoolConfig};
use crate::connection::Connection;
use crate::error::Result;
use crate::gss::SecurityProvider;
use crate::pool::Pool;
use std::sync::Arc;

/// Run a command on a remote server.
pub trait Client {
    /// Run `args` and return its output whatever the exit status.
    fn execute_any_status<A: AsRef<[u8]>>(&self, args: &[A]) -> Result<CommandResponse>;

    /// Run `args`, failing with [`crate::Error::CommandFailed`] on a
    /// non-zero exit status.
    fn execute<A: AsRef<[u8]>>(&self, args: &[A]) -> Result<CommandResponse> {
        self.execute_any_status(args)?.into_success()
    }
}

/// Opens a fresh connection for every command.
pub struct SimpleClient {
    config: Config,
    provider: Arc<dyn SecurityProvider>,
}

impl SimpleClient {
    pub fn new(config: Config, provider: Arc<dyn SecurityProvider>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, provider })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open an authenticated connection without running anything.
    pub fn connect(&self) -> Result<Connection> {
        Connection::open(&self.config, self.provider.as_ref())
    }
}

impl Client for SimpleClient {
    fn execute_any_status<A: AsRef<[u8]>>(&self, args: &[A]) -> Result<CommandResponse> {
        let mut conn = self.connect()?;
        let keepalive = self.config.keepalive.unwrap_or(false);
        conn.send_command(args, keepalive)?;
        let response = conn.recv_response()?;
        conn.close()?;
        Ok(response)
    }
}

/// Runs commands over keep-alive connections borrowed from a [`Pool`].
pub struct PooledClient {
    pool: Arc<Pool>,
    keepalive: bool,
}

impl PooledClient {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self {
            pool,
            keepalive: true,
        }
    }

    /// Build the pool from configuration and wrap it.
    pub fn open(
        config: Config,
        pool_config: PoolConfig,
        provider: Arc<dyn SecurityProvider>,
    ) -> Result<Self> {
        let keepalive = config.keepalive.unwrap_or(true);
        let pool = Pool::open(config, pool_config, provider)?;
        Ok(Self {
            pool: Arc::new(pool),
            keepalive,
        })
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }
}

impl Client for PooledClient {
    fn execute_any_status<A: AsRef<[u8]>>(&self, args: &[A]) -> Result<CommandResponse> {
        // The guard goes back to the pool on every path; a broken or
        // finished connection is destroyed there.
        let mut conn = self.pool.borrow()?;
        conn.send_command(args, self.keepalive)?;
        conn.recv_response()
    }
}
