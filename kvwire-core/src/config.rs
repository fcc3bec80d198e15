//! Configuration types for client connections

use crate::error::{KvError, KvResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default server port
pub const DEFAULT_PORT: u16 = 6379;

/// Default sentinel port
pub const DEFAULT_SENTINEL_PORT: u16 = 26379;

/// Protocol version preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// RESP2 - Default
    #[default]
    Resp2,
    /// RESP3, negotiated with `HELLO 3` right after connecting
    Resp3,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resp2 => write!(f, "RESP2"),
            Self::Resp3 => write!(f, "RESP3"),
        }
    }
}

/// A host and port pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP literal
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host[:port]`, using `default_port` when the port is omitted
    ///
    /// # Errors
    ///
    /// Returns an error if the host is empty or the port is not a valid u16.
    pub fn parse(s: &str, default_port: u16) -> KvResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(KvError::Config("Empty endpoint".to_string()));
        }

        // Bracketed IPv6 literal, with or without a port
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| KvError::Config(format!("Unterminated IPv6 literal: {s}")))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port, s)?,
                None if tail.is_empty() => default_port,
                None => return Err(KvError::Config(format!("Invalid endpoint: {s}"))),
            };
            return Ok(Self::new(host, port));
        }

        match s.rsplit_once(':') {
            Some((host, _)) if host.contains(':') => Err(KvError::Config(format!(
                "IPv6 endpoint must be bracketed, as in [::1]:6379: {s}"
            ))),
            Some((host, port)) if !host.is_empty() => Ok(Self::new(host, parse_port(port, s)?)),
            Some(_) => Err(KvError::Config(format!("Missing host in endpoint: {s}"))),
            None => Ok(Self::new(s, default_port)),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn parse_port(port: &str, whole: &str) -> KvResult<u16> {
    port.parse::<u16>()
        .map_err(|_| KvError::Config(format!("Invalid port in address: {whole}")))
}

/// Where to connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Address {
    /// Plain TCP endpoint
    Tcp(Endpoint),
    /// Unix domain socket path
    Unix(PathBuf),
    /// Ask a set of sentinels for the current master address
    Sentinel {
        /// Name of the monitored master
        master_name: String,
        /// Sentinels to query, in order
        sentinels: Vec<Endpoint>,
    },
}

impl Address {
    /// Parse a connection string
    ///
    /// Accepted forms:
    /// - `redis://host[:port][/db]`, `host:port`, `host`
    /// - `unix:///path/to/socket`
    /// - `redis+sentinel://host1:26379,host2:26379/master-name`
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Config`] if the string is not a valid address.
    pub fn parse(s: &str) -> KvResult<Self> {
        let s = s.trim();

        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(KvError::Config("Empty unix socket path".to_string()));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }

        if let Some(rest) = s.strip_prefix("redis+sentinel://") {
            let (hosts, master) = rest.split_once('/').ok_or_else(|| {
                KvError::Config(format!("Sentinel address needs a master name: {s}"))
            })?;
            let master = master.trim_end_matches('/');
            if master.is_empty() {
                return Err(KvError::Config(format!(
                    "Sentinel address needs a master name: {s}"
                )));
            }
            let sentinels = hosts
                .split(',')
                .filter(|h| !h.trim().is_empty())
                .map(|h| Endpoint::parse(h, DEFAULT_SENTINEL_PORT))
                .collect::<KvResult<Vec<_>>>()?;
            if sentinels.is_empty() {
                return Err(KvError::Config(format!("No sentinels in address: {s}")));
            }
            return Ok(Self::Sentinel {
                master_name: master.to_string(),
                sentinels,
            });
        }

        let rest = s.strip_prefix("redis://").unwrap_or(s);
        // A trailing `/db` selects the database and is handled by the config
        let host_part = rest.split_once('/').map_or(rest, |(host, _)| host);
        Ok(Self::Tcp(Endpoint::parse(host_part, DEFAULT_PORT)?))
    }

    /// Database index embedded in a `redis://host:port/db` string, if any
    fn database_from(s: &str) -> Option<u8> {
        let rest = s.trim().strip_prefix("redis://")?;
        let (_, db) = rest.split_once('/')?;
        db.trim_end_matches('/').parse().ok()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(endpoint) => write!(f, "redis://{endpoint}"),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Sentinel {
                master_name,
                sentinels,
            } => {
                let hosts: Vec<String> = sentinels.iter().map(ToString::to_string).collect();
                write!(f, "redis+sentinel://{}/{}", hosts.join(","), master_name)
            }
        }
    }
}

/// Limits enforced by the frame decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderLimits {
    /// Largest accepted bulk/verbatim string or bulk error payload
    pub max_bulk_len: usize,
    /// Largest accepted element count of a single aggregate
    pub max_collection_len: usize,
    /// Deepest accepted aggregate nesting
    pub max_depth: usize,
}

impl Default for DecoderLimits {
    fn default() -> Self {
        Self {
            max_bulk_len: 512 * 1024 * 1024,
            max_collection_len: 64 * 1024 * 1024,
            max_depth: 64,
        }
    }
}

/// Configuration for reconnection behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Enable automatic reconnection
    pub enabled: bool,

    /// Initial delay before first reconnect attempt
    pub initial_delay: Duration,

    /// Maximum delay between reconnect attempts
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,

    /// Maximum number of reconnect attempts (None = infinite)
    pub max_attempts: Option<usize>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_attempts: Some(5),
        }
    }
}

impl ReconnectConfig {
    /// Reconnection switched off
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay before attempt number `attempt` (0-based)
    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let delay = self.initial_delay.as_secs_f64() * factor;
        if delay.is_finite() && delay < self.max_delay.as_secs_f64() {
            Duration::from_secs_f64(delay)
        } else {
            self.max_delay
        }
    }
}

/// Configuration for a client connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Connection string, see [`Address::parse`]
    pub connection_string: String,

    /// Explicit address, takes precedence over `connection_string`
    pub address: Option<Address>,

    /// Database number selected after connecting
    pub database: u8,

    /// Name announced with `CLIENT SETNAME`
    pub client_name: Option<String>,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Deadline for a single request/reply exchange (None = wait forever)
    pub operation_timeout: Option<Duration>,

    /// Enable TCP keepalive
    pub tcp_keepalive: Option<Duration>,

    /// Disable Nagle's algorithm
    pub tcp_nodelay: bool,

    /// Preferred protocol version
    pub protocol_version: ProtocolVersion,

    /// Frame decoder limits
    pub decoder: DecoderLimits,

    /// Reconnection settings
    pub reconnect: ReconnectConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_string: "redis://localhost:6379".to_string(),
            address: None,
            database: 0,
            client_name: None,
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Some(Duration::from_secs(30)),
            tcp_keepalive: Some(Duration::from_secs(60)),
            tcp_nodelay: true,
            protocol_version: ProtocolVersion::default(),
            decoder: DecoderLimits::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Create a new configuration with the given connection string
    pub fn new(connection_string: impl Into<String>) -> Self {
        let connection_string = connection_string.into();
        let database = Address::database_from(&connection_string).unwrap_or(0);
        Self {
            connection_string,
            database,
            ..Default::default()
        }
    }

    /// Create a configuration for an already parsed address
    #[must_use]
    pub fn from_address(address: Address) -> Self {
        Self {
            connection_string: address.to_string(),
            address: Some(address),
            ..Default::default()
        }
    }

    /// Set the database number
    #[must_use]
    pub const fn with_database(mut self, database: u8) -> Self {
        self.database = database;
        self
    }

    /// Set the client name
    #[must_use]
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Set the connection timeout
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the operation timeout
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set TCP keepalive
    #[must_use]
    pub const fn with_tcp_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.tcp_keepalive = keepalive;
        self
    }

    /// Set the preferred protocol version
    #[must_use]
    pub const fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    /// Set the frame decoder limits
    #[must_use]
    pub const fn with_decoder_limits(mut self, limits: DecoderLimits) -> Self {
        self.decoder = limits;
        self
    }

    /// Set the reconnection policy
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// The address to connect to
    ///
    /// # Errors
    ///
    /// Returns an error if the connection string cannot be parsed.
    pub fn resolve_address(&self) -> KvResult<Address> {
        match &self.address {
            Some(address) => Ok(address.clone()),
            None => Address::parse(&self.connection_string),
        }
    }
}
