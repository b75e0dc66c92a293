use crate::error::{Error, Result};
use crate::validate::{AgeDrainValidator, CommandProbe, NoopProbe, Validator};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Where and how to connect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    /// `None` tries 4373, then the legacy port 4444.
    pub port: Option<u16>,
    /// Defaults to `host/<canonical name of the server>`.
    pub service_principal: Option<String>,
    /// Client principal whose credentials the provider should use.
    pub login_principal: Option<String>,
    /// Kerberos credential cache to take tickets from instead of the
    /// default one.
    pub ccache: Option<String>,
    /// Local address to connect from. Only server addresses of the same
    /// family are tried.
    pub source_ip: Option<IpAddr>,
    /// `None` leaves the choice to the client: one-shot clients don't ask
    /// for keep-alive, pooled clients do.
    pub keepalive: Option<bool>,
    /// Socket read/write deadline. Zero means none.
    #[serde(with = "secs::option")]
    pub timeout: Option<Duration>,
}

impl Config {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_service_principal(mut self, principal: impl Into<String>) -> Self {
        self.service_principal = Some(principal.into());
        self
    }

    pub fn with_login_principal(mut self, principal: impl Into<String>) -> Self {
        self.login_principal = Some(principal.into());
        self
    }

    pub fn with_ccache(mut self, ccache: impl Into<String>) -> Self {
        self.ccache = Some(ccache.into());
        self
    }

    pub fn with_source_ip(mut self, source: IpAddr) -> Self {
        self.source_ip = Some(source);
        self
    }

    pub fn with_keepalive(mut self, keepalive: bool) -> Self {
        self.keepalive = Some(keepalive);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Effective socket deadline.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.filter(|t| !t.is_zero())
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host is required".into()));
        }
        if self.port == Some(0) {
            return Err(Error::Config("port must be non-zero".into()));
        }
        if let Some(principal) = &self.service_principal {
            if principal.is_empty() {
                return Err(Error::Config("service principal is empty".into()));
            }
        }
        if self.ccache.as_deref() == Some("") {
            return Err(Error::Config("credential cache name is empty".into()));
        }
        Ok(())
    }
}

/// How pooled connections are checked before reuse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationStrategy {
    /// Age and unread-data checks only
    AgeDrain,
    /// Also run a keep-alive command that must exit 0
    Command {
        #[serde(default = "default_probe_command")]
        command: Vec<String>,
    },
    /// Also round-trip a NOOP token
    Noop,
}

impl Default for ValidationStrategy {
    fn default() -> Self {
        Self::AgeDrain
    }
}

fn default_probe_command() -> Vec<String> {
    vec!["noop".to_string()]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Borrowed plus idle connections, including ones being opened.
    pub max_total: usize,
    pub max_idle: usize,
    #[serde(with = "secs")]
    pub borrow_wait: Duration,
    /// How often the evictor runs. Zero disables it.
    #[serde(with = "secs")]
    pub eviction_interval: Duration,
    #[serde(with = "secs")]
    pub min_evictable_idle: Duration,
    pub test_on_borrow: bool,
    pub test_while_idle: bool,
    /// Servers drop connections after an hour; stay under that.
    #[serde(with = "secs")]
    pub max_life: Duration,
    pub validation: ValidationStrategy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: 8,
            max_idle: 8,
            borrow_wait: Duration::from_secs(10),
            eviction_interval: Duration::from_secs(2 * 60),
            min_evictable_idle: Duration::from_secs(10 * 60),
            test_on_borrow: true,
            test_while_idle: true,
            max_life: Duration::from_secs(55 * 60),
            validation: ValidationStrategy::AgeDrain,
        }
    }
}

impl PoolConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_total == 0 {
            return Err(Error::Config("max_total must be at least 1".into()));
        }
        if let ValidationStrategy::Command { command } = &self.validation {
            if command.is_empty() {
                return Err(Error::Config("probe command is empty".into()));
            }
        }
        Ok(())
    }

    /// Build the validator for the configured strategy.
    pub fn validator(&self) -> Arc<dyn Validator> {
        let base = AgeDrainValidator::new(self.max_life);
        match &self.validation {
            ValidationStrategy::AgeDrain => Arc::new(base),
            ValidationStrategy::Command { command } => {
                Arc::new(CommandProbe::new(base, command.iter().map(|a| a.as_bytes().to_vec())))
            }
            ValidationStrategy::Noop => Arc::new(NoopProbe::new(base)),
        }
    }
}

/// Durations as whole seconds.
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.serialize_some(&d.as_secs()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<u64>::deserialize(deserializer).map(|s| s.map(Duration::from_secs))
        }
    }
}
