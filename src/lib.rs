//! Client for the remctl protocol: authenticated remote command execution
//! over GSS-API protected TCP connections.
//!
//! ```no_run
//! # #[cfg(feature = "krb5")]
//! # fn main() -> remctl::Result<()> {
//! use remctl::{Client, Config, SimpleClient};
//! use std::sync::Arc;
//!
//! let config = Config::new("shell.example.org");
//! let client = SimpleClient::new(config, Arc::new(remctl::krb5::Krb5Provider::new()))?;
//! let response = client.execute(&["echo", "hello"])?;
//! print!("{}", response.stdout_lossy());
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "krb5"))]
//! # fn main() {}
//! ```

pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod gss;
#[cfg(feature = "krb5")]
pub mod krb5;
pub mod net;
pub mod pool;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod validate;

pub use client::{Client, PooledClient, SimpleClient};
pub use command::{CommandResponse, NoopReply, Output};
pub use config::{Config, PoolConfig, ValidationStrategy};
pub use connection::Connection;
pub use error::{Error, Result};
pub use gss::{SecurityContext, SecurityProvider, Step};
pub use pool::{Connector, Pool, PoolStatus, PooledConnection, TcpConnector};
pub use session::{Session, State};
pub use validate::{AgeDrainValidator, CommandProbe, NoopProbe, Validator};

pub use remctl_proto as proto;
pub use remctl_proto::{ErrorCode, ProtocolError, Stream, Token};
