//! High-level client
//!
//! This module provides the main [`Client`] interface. A client owns one
//! connection whose driver runs on its own tokio task; every command goes
//! through [`Connection::send`], so any number of tasks may share a client.

use crate::commands::{
    Cmd, Command, DelCommand, EvalCommand, EvalShaCommand, ExistsCommand, FCallCommand,
    FunctionDeleteCommand, FunctionFlushCommand, FunctionListCommand, FunctionLoadCommand,
    GeoAddCommand, GeoDistCommand, GeoMatch, GeoPosCommand, GeoSearchCommand, GeoUnit,
    LLenCommand, LMPopCommand, LMoveCommand, LPushCommand, LRangeCommand, LibraryInfo,
    ListDirection, RPushCommand, ScriptExistsCommand, ScriptFlushCommand, ScriptLoadCommand,
    ToArg,
};
use crate::connection::{Connection, ConnectionState};
use futures_util::Stream;
use kvwire_core::{
    config::{Address, ConnectionConfig, ReconnectConfig},
    decode::FromWire,
    error::{KvError, KvResult},
    types::Key,
    value::WireValue,
};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct Session {
    connection: Connection,
    driver: Option<JoinHandle<KvResult<()>>>,
}

struct Inner {
    config: ConnectionConfig,
    address: Option<Address>,
    session: Mutex<Session>,
    reconnect: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

/// High-level client
///
/// Cloning is cheap; clones share the same connection.
///
/// # Example
///
/// ```no_run
/// use kvwire::{Client, ConnectionConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ConnectionConfig::new("redis://localhost:6379");
///     let client = Client::connect(config).await?;
///
///     client.rpush("queue", ["a", "b"]).await?;
///     let items = client.lrange("queue", 0, -1).await?;
///     println!("Items: {:?}", items);
///
///     client.close().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Connect with the given configuration
    ///
    /// Sentinel addresses are resolved to the current master. The connection
    /// driver is spawned on the current tokio runtime.
    pub async fn connect(config: ConnectionConfig) -> KvResult<Self> {
        let address = config.resolve_address()?;
        info!(address = %address, "Connecting");

        let session = Self::open(&address, &config).await?;
        Ok(Self::assemble(config, Some(address), session))
    }

    /// Wrap a connection whose driver the caller already runs
    ///
    /// Such a client cannot reconnect, because it does not know where the
    /// connection came from.
    #[must_use]
    pub fn from_connection(connection: Connection) -> Self {
        let config = ConnectionConfig::default().with_reconnect(ReconnectConfig::disabled());
        let session = Session {
            connection,
            driver: None,
        };
        Self::assemble(config, None, session)
    }

    fn assemble(config: ConnectionConfig, address: Option<Address>, session: Session) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                address,
                session: Mutex::new(session),
                reconnect: tokio::sync::Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    async fn open(address: &Address, config: &ConnectionConfig) -> KvResult<Session> {
        let (connection, driver) = Connection::connect(address, config).await?;
        let driver = tokio::spawn(driver.run());
        Ok(Session {
            connection,
            driver: Some(driver),
        })
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Connection {
        self.session().connection.clone()
    }

    /// State of the current connection
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.current().state()
    }

    /// A connected connection, reconnecting first if policy allows
    ///
    /// A new connection is only opened once the previous one has closed or
    /// failed. Requests that were pending on the old connection are never
    /// replayed.
    pub async fn connection(&self) -> KvResult<Connection> {
        let current = self.current();
        let state = current.state();
        if state == ConnectionState::Connected {
            return Ok(current);
        }
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(KvError::Connection("Client closed".to_string()));
        }

        let policy = &self.inner.config.reconnect;
        let address = match &self.inner.address {
            Some(address) if policy.enabled && state.is_terminal() => address,
            _ => return Err(KvError::Connection(format!("Connection is {state}"))),
        };

        let _reconnecting = self.inner.reconnect.lock().await;
        let current = self.current();
        if current.is_connected() {
            // Another task reconnected while we waited
            return Ok(current);
        }

        let mut attempt = 0_usize;
        loop {
            match Self::open(address, &self.inner.config).await {
                Ok(session) => {
                    let connection = session.connection.clone();
                    let previous = std::mem::replace(&mut *self.session(), session);
                    drop(previous);
                    info!(address = %address, attempts = attempt + 1, "Reconnected");
                    return Ok(connection);
                }
                Err(e) => {
                    attempt += 1;
                    if policy.max_attempts.is_some_and(|max| attempt >= max) {
                        warn!(address = %address, attempts = attempt, error = %e, "Giving up reconnecting");
                        return Err(e);
                    }
                    let delay = policy.delay_for(attempt - 1);
                    warn!(
                        address = %address,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnect failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Send a command and return the raw reply
    pub async fn send(&self, cmd: Cmd) -> KvResult<WireValue> {
        self.connection().await?.send(&cmd).await
    }

    /// Send a command and decode its reply as `T`
    pub async fn query<T: FromWire>(&self, cmd: Cmd) -> KvResult<T> {
        self.send(cmd).await?.decode()
    }

    /// Execute a typed command
    pub async fn execute<C: Command>(&self, command: C) -> KvResult<C::Output> {
        let reply = self.send(command.to_cmd()).await?;
        command.parse_response(reply)
    }

    /// Stream of out-of-band push messages from the current connection
    ///
    /// Returns `None` if the stream was already taken. A reconnect starts a
    /// fresh connection with its own stream.
    #[must_use]
    pub fn push_messages(&self) -> Option<PushStream> {
        self.current()
            .take_push_receiver()
            .map(|rx| PushStream { rx })
    }

    /// Close the connection and wait for its driver to stop
    ///
    /// Outstanding commands still receive their replies. Returns the error
    /// that stopped the driver if the connection had failed instead.
    pub async fn close(&self) -> KvResult<()> {
        self.inner.closed.store(true, Ordering::Release);
        let (connection, driver) = {
            let mut session = self.session();
            (session.connection.clone(), session.driver.take())
        };
        debug!(pending = connection.pending(), "Closing client");
        connection.close();

        match driver {
            Some(handle) => handle
                .await
                .map_err(|e| KvError::Connection(format!("Connection task failed: {e}")))?,
            None => Ok(()),
        }
    }

    // Key operations

    /// Delete keys, returning how many existed
    pub async fn del(&self, keys: impl IntoIterator<Item = impl Into<Key>>) -> KvResult<i64> {
        self.execute(DelCommand::new(keys)).await
    }

    /// Count how many of the given keys exist
    pub async fn exists(&self, keys: impl IntoIterator<Item = impl Into<Key>>) -> KvResult<i64> {
        self.execute(ExistsCommand::new(keys)).await
    }

    // List operations

    /// Push values to the head of a list
    pub async fn lpush(
        &self,
        key: impl Into<Key>,
        values: impl IntoIterator<Item = impl ToArg>,
    ) -> KvResult<i64> {
        self.execute(LPushCommand::new(key, values)).await
    }

    /// Push values to the tail of a list
    pub async fn rpush(
        &self,
        key: impl Into<Key>,
        values: impl IntoIterator<Item = impl ToArg>,
    ) -> KvResult<i64> {
        self.execute(RPushCommand::new(key, values)).await
    }

    /// Get a range of elements from a list
    pub async fn lrange(
        &self,
        key: impl Into<Key>,
        start: i64,
        stop: i64,
    ) -> KvResult<Vec<String>> {
        self.execute(LRangeCommand::new(key, start, stop)).await
    }

    /// Get the length of a list
    pub async fn llen(&self, key: impl Into<Key>) -> KvResult<i64> {
        self.execute(LLenCommand::new(key)).await
    }

    /// Pop from the first non-empty list among `keys`
    ///
    /// Pops a single element unless `count` is given. Returns the name of
    /// the list popped from and the popped elements, or `None` when every
    /// list is empty.
    pub async fn lmpop(
        &self,
        keys: impl IntoIterator<Item = impl Into<Key>>,
        direction: ListDirection,
        count: Option<usize>,
    ) -> KvResult<Option<(String, Vec<String>)>> {
        let mut command = LMPopCommand::new(keys, direction);
        if let Some(count) = count {
            command = command.count(count);
        }
        self.execute(command).await
    }

    /// Move an element from one list to another
    ///
    /// Returns `None` when the source list is empty.
    pub async fn lmove(
        &self,
        source: impl Into<Key>,
        destination: impl Into<Key>,
        from: ListDirection,
        to: ListDirection,
    ) -> KvResult<Option<String>> {
        self.execute(LMoveCommand::new(source, destination, from, to))
            .await
    }

    // Geo operations

    /// Add `(longitude, latitude, member)` triples to a geo set
    pub async fn geoadd(
        &self,
        key: impl Into<Key>,
        members: impl IntoIterator<Item = (f64, f64, impl ToArg)>,
    ) -> KvResult<i64> {
        self.execute(GeoAddCommand::new(key, members)).await
    }

    /// Coordinates of members, `None` for members not in the set
    pub async fn geopos(
        &self,
        key: impl Into<Key>,
        members: impl IntoIterator<Item = impl ToArg>,
    ) -> KvResult<Vec<Option<(f64, f64)>>> {
        self.execute(GeoPosCommand::new(key, members)).await
    }

    /// Distance between two members
    pub async fn geodist(
        &self,
        key: impl Into<Key>,
        member1: impl ToArg,
        member2: impl ToArg,
        unit: GeoUnit,
    ) -> KvResult<Option<f64>> {
        self.execute(GeoDistCommand::new(key, member1, member2).unit(unit))
            .await
    }

    /// Run a geo search
    pub async fn geosearch(&self, search: GeoSearchCommand) -> KvResult<Vec<GeoMatch>> {
        self.execute(search).await
    }

    // Function operations

    /// Load a function library, returning the library name
    pub async fn function_load(&self, code: impl Into<String>, replace: bool) -> KvResult<String> {
        let mut command = FunctionLoadCommand::new(code);
        if replace {
            command = command.replace();
        }
        self.execute(command).await
    }

    /// Describe loaded libraries, optionally filtered by name pattern
    pub async fn function_list(
        &self,
        pattern: Option<&str>,
        with_code: bool,
    ) -> KvResult<Vec<LibraryInfo>> {
        let mut command = FunctionListCommand::new();
        if let Some(pattern) = pattern {
            command = command.library_name(pattern);
        }
        if with_code {
            command = command.with_code();
        }
        self.execute(command).await
    }

    /// Delete a function library
    pub async fn function_delete(&self, library: impl Into<String>) -> KvResult<()> {
        self.execute(FunctionDeleteCommand::new(library)).await
    }

    /// Delete every function library
    pub async fn function_flush(&self) -> KvResult<()> {
        self.execute(FunctionFlushCommand).await
    }

    /// Call a loaded function
    pub async fn fcall<T: FromWire>(
        &self,
        function: impl Into<String>,
        keys: impl IntoIterator<Item = impl Into<Key>>,
        args: impl IntoIterator<Item = impl ToArg>,
    ) -> KvResult<T> {
        self.execute(FCallCommand::<T>::new(function, keys, args))
            .await
    }

    // Scripting operations

    /// Run a script from source
    pub async fn eval<T: FromWire>(
        &self,
        script: impl Into<String>,
        keys: impl IntoIterator<Item = impl Into<Key>>,
        args: impl IntoIterator<Item = impl ToArg>,
    ) -> KvResult<T> {
        self.execute(EvalCommand::<T>::new(script, keys, args)).await
    }

    /// Run a cached script by digest
    pub async fn evalsha<T: FromWire>(
        &self,
        sha: impl Into<String>,
        keys: impl IntoIterator<Item = impl Into<Key>>,
        args: impl IntoIterator<Item = impl ToArg>,
    ) -> KvResult<T> {
        self.execute(EvalShaCommand::<T>::new(sha, keys, args)).await
    }

    /// Cache a script, returning its digest
    pub async fn script_load(&self, script: impl Into<String>) -> KvResult<String> {
        self.execute(ScriptLoadCommand::new(script)).await
    }

    /// Check which digests are cached
    pub async fn script_exists(
        &self,
        shas: impl IntoIterator<Item = impl Into<String>>,
    ) -> KvResult<Vec<bool>> {
        self.execute(ScriptExistsCommand::new(shas)).await
    }

    /// Drop every cached script
    pub async fn script_flush(&self) -> KvResult<()> {
        self.execute(ScriptFlushCommand).await
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.inner.address)
            .field("connection", &self.current())
            .finish()
    }
}

/// Out-of-band push messages, see [`Client::push_messages`]
#[derive(Debug)]
pub struct PushStream {
    rx: mpsc::Receiver<WireValue>,
}

impl PushStream {
    /// Wait for the next push message
    ///
    /// Returns `None` once the connection has stopped.
    pub async fn recv(&mut self) -> Option<WireValue> {
        self.rx.recv().await
    }
}

impl Stream for PushStream {
    type Item = WireValue;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
