//! Connection management
//!
//! A connection is split in two halves. [`Connection`] is a cheap, clonable
//! handle that any number of tasks use to send commands. [`ConnectionDriver`]
//! owns the byte stream and the read buffer; its [`run`](ConnectionDriver::run)
//! future is the only code that ever touches the socket and must be polled,
//! usually on its own task, for the connection to make progress.
//!
//! When the driver stops for any reason (server hangup, framing error,
//! explicit close, or the driver being dropped before or while it runs)
//! every request still waiting for a reply fails with a connection error
//! and the push receiver reaches its end.

use crate::commands::Cmd;
use crate::pipeline::{into_reply, CommandPipeline};
use crate::protocol::FrameDecoder;
use crate::sentinel;
use bytes::{Bytes, BytesMut};
use kvwire_core::{
    config::{Address, ConnectionConfig, Endpoint, ProtocolVersion},
    error::{KvError, KvResult},
    value::WireValue,
};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Push messages buffered before new ones are dropped
const PUSH_BUFFER: usize = 1024;

/// Upper bound on bytes coalesced into a single socket write
const MAX_WRITE_BATCH: usize = 64 * 1024;

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Stream open, setup handshake in progress
    Connecting = 0,
    /// Accepting commands
    Connected = 1,
    /// Close requested; outstanding replies are still being read
    Closing = 2,
    /// Stream released
    Closed = 3,
    /// Stopped by an I/O or framing error
    Failed = 4,
}

impl ConnectionState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Connected,
            2 => Self::Closing,
            3 => Self::Closed,
            _ => Self::Failed,
        }
    }

    /// Check if the connection can never carry another command
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Byte streams a connection can run over
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased stream produced by [`Connection::connect`]
pub type BoxedStream = Box<dyn AsyncStream>;

/// State shared by every handle and the driver
struct Shared {
    state: AtomicU8,
    pipeline: CommandPipeline,
    shutdown: Notify,
    push_rx: Mutex<Option<mpsc::Receiver<WireValue>>>,
    peer: String,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = ConnectionState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            debug!(peer = %self.peer, from = %previous, to = %state, "Connection state changed");
        }
    }

    /// Move from `from` to `to` only if the state is still `from`
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            debug!(peer = %self.peer, from = %from, to = %to, "Connection state changed");
        }
        moved
    }

    fn request_close(&self) {
        if self.transition(ConnectionState::Connected, ConnectionState::Closing)
            || self.transition(ConnectionState::Connecting, ConnectionState::Closing)
        {
            self.shutdown.notify_one();
        }
    }
}

/// Closes the connection when the last user handle goes away
struct HandleGuard {
    shared: Arc<Shared>,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.shared.request_close();
    }
}

/// Handle used to issue commands on one connection
#[derive(Clone)]
pub struct Connection {
    handle: Arc<HandleGuard>,
    operation_timeout: Option<Duration>,
}

impl Connection {
    /// Wrap an already-established stream
    ///
    /// No handshake is performed and the connection starts out
    /// [`Connected`](ConnectionState::Connected). The returned driver must
    /// be run for any command to complete.
    pub fn new<S: AsyncStream>(
        stream: S,
        config: &ConnectionConfig,
    ) -> (Self, ConnectionDriver<S>) {
        Self::assemble(stream, config, ConnectionState::Connected, "stream".to_string())
    }

    /// Wrap an established stream and run the setup handshake on it
    ///
    /// Sends `HELLO 3`, `SELECT` and `CLIENT SETNAME` as the configuration
    /// asks, before the driver is handed back.
    pub async fn with_handshake<S: AsyncStream>(
        stream: S,
        config: &ConnectionConfig,
    ) -> KvResult<(Self, ConnectionDriver<S>)> {
        Self::establish(stream, config, "stream".to_string()).await
    }

    /// Open a connection to `address`
    ///
    /// Sentinel addresses are resolved to the current master first.
    pub async fn connect(
        address: &Address,
        config: &ConnectionConfig,
    ) -> KvResult<(Self, ConnectionDriver<BoxedStream>)> {
        match address {
            Address::Tcp(endpoint) => {
                let stream = connect_tcp(endpoint, config).await?;
                Self::establish(Box::new(stream) as BoxedStream, config, endpoint.to_string()).await
            }
            Address::Unix(path) => {
                let stream = connect_unix(path, config).await?;
                Self::establish(stream, config, path.display().to_string()).await
            }
            Address::Sentinel {
                master_name,
                sentinels,
            } => {
                let endpoint = sentinel::resolve_master(master_name, sentinels, config).await?;
                info!(master = %master_name, address = %endpoint, "Resolved master through sentinel");
                let stream = connect_tcp(&endpoint, config).await?;
                Self::establish(Box::new(stream) as BoxedStream, config, endpoint.to_string()).await
            }
        }
    }

    /// Open a plain TCP connection without any sentinel lookup
    pub(crate) async fn connect_endpoint(
        endpoint: &Endpoint,
        config: &ConnectionConfig,
    ) -> KvResult<(Self, ConnectionDriver<TcpStream>)> {
        let stream = connect_tcp(endpoint, config).await?;
        Self::establish(stream, config, endpoint.to_string()).await
    }

    async fn establish<S: AsyncStream>(
        stream: S,
        config: &ConnectionConfig,
        peer: String,
    ) -> KvResult<(Self, ConnectionDriver<S>)> {
        let (connection, mut driver) =
            Self::assemble(stream, config, ConnectionState::Connecting, peer);

        timeout(config.connect_timeout, driver.handshake(config))
            .await
            .map_err(|_| KvError::Timeout)??;

        if !connection
            .shared()
            .transition(ConnectionState::Connecting, ConnectionState::Connected)
        {
            return Err(KvError::Connection(
                "Connection closed during handshake".to_string(),
            ));
        }
        info!(peer = %connection.shared().peer, "Connected");
        Ok((connection, driver))
    }

    fn assemble<S: AsyncStream>(
        stream: S,
        config: &ConnectionConfig,
        state: ConnectionState,
        peer: String,
    ) -> (Self, ConnectionDriver<S>) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (push_tx, push_rx) = mpsc::channel(PUSH_BUFFER);

        let shared = Arc::new(Shared {
            state: AtomicU8::new(state as u8),
            pipeline: CommandPipeline::new(write_tx),
            shutdown: Notify::new(),
            push_rx: Mutex::new(Some(push_rx)),
            peer,
        });

        let connection = Self {
            handle: Arc::new(HandleGuard {
                shared: Arc::clone(&shared),
            }),
            operation_timeout: config.operation_timeout,
        };
        let driver = ConnectionDriver {
            stream,
            decoder: FrameDecoder::with_limits(config.decoder),
            writes: write_rx,
            guard: RunGuard {
                shared: Arc::clone(&shared),
                error: None,
            },
            pushes: push_tx,
            shared,
        };
        (connection, driver)
    }

    fn shared(&self) -> &Shared {
        &self.handle.shared
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared().state()
    }

    /// Check if the connection accepts commands
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of commands written but not yet answered
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared().pipeline.len()
    }

    /// Send a command and wait for its reply
    ///
    /// Fails without writing anything unless the connection is connected.
    /// Dropping the returned future after the command has been queued
    /// detaches the caller: the command is still written and its reply is
    /// read and discarded, so replies for other callers stay in order.
    pub async fn send(&self, cmd: &Cmd) -> KvResult<WireValue> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(KvError::Connection(format!("Connection is {state}")));
        }

        let handle = self.shared().pipeline.enqueue(cmd.encode())?;
        match self.operation_timeout {
            Some(limit) => timeout(limit, handle).await.map_err(|_| KvError::Timeout)?,
            None => handle.await,
        }
    }

    /// Send a command and decode its reply
    pub async fn query<T: kvwire_core::FromWire>(&self, cmd: &Cmd) -> KvResult<T> {
        self.send(cmd).await?.decode()
    }

    /// Ask the driver to shut down
    ///
    /// New commands are refused at once. The driver keeps reading until
    /// every outstanding reply has arrived, then releases the stream.
    pub fn close(&self) {
        self.shared().request_close();
    }

    /// Take the receiver of out-of-band push messages
    ///
    /// Only the first call returns the receiver. It yields `None` once the
    /// driver has gone away.
    pub fn take_push_receiver(&self) -> Option<mpsc::Receiver<WireValue>> {
        self.shared()
            .push_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.shared().peer)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Owner of the byte stream; drives reads and writes for one connection
///
/// Dropping a driver, whether or not it was ever run, closes the
/// connection and fails every request still waiting on it.
pub struct ConnectionDriver<S = BoxedStream> {
    stream: S,
    decoder: FrameDecoder,
    writes: mpsc::UnboundedReceiver<Bytes>,
    // Dropped before the push sender, so a push consumer that sees the
    // end of its stream also sees a terminal state.
    guard: RunGuard,
    pushes: mpsc::Sender<WireValue>,
    shared: Arc<Shared>,
}

/// Fails outstanding requests however the driver goes away
struct RunGuard {
    shared: Arc<Shared>,
    error: Option<KvError>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let (state, error) = match self.error.take() {
            Some(error) => (ConnectionState::Failed, error),
            None => (
                ConnectionState::Closed,
                KvError::Connection("Connection closed".to_string()),
            ),
        };
        self.shared.set_state(state);
        let failed = self.shared.pipeline.fail_all(&error);
        if failed > 0 {
            debug!(peer = %self.shared.peer, failed, "Failed outstanding requests");
        }
    }
}

impl<S: AsyncStream> ConnectionDriver<S> {
    /// Drive the connection until it closes or fails
    ///
    /// Returns `Ok(())` after a requested close and the error that stopped
    /// the connection otherwise. Dropping this future before it completes
    /// closes the connection.
    pub async fn run(mut self) -> KvResult<()> {
        let result = self.drive().await;
        match &result {
            Ok(()) => debug!(peer = %self.shared.peer, "Connection closed"),
            Err(e) => {
                warn!(peer = %self.shared.peer, error = %e, "Connection lost");
                self.guard.error = Some(e.duplicate());
            }
        }
        result
    }

    async fn drive(&mut self) -> KvResult<()> {
        let shared = Arc::clone(&self.shared);
        let mut closing = shared.state() == ConnectionState::Closing;

        loop {
            while let Some(frame) = self.decoder.next_frame()? {
                self.dispatch(frame)?;
            }

            if closing && shared.pipeline.is_empty() {
                if let Err(e) = self.stream.shutdown().await {
                    debug!(peer = %shared.peer, error = %e, "Shutdown of stream failed");
                }
                return Ok(());
            }

            tokio::select! {
                () = shared.shutdown.notified(), if !closing => {
                    debug!(peer = %shared.peer, pending = shared.pipeline.len(), "Close requested");
                    closing = true;
                }
                frame = self.writes.recv() => {
                    match frame {
                        Some(frame) => self.write_batch(frame).await?,
                        None => return Err(KvError::Connection("Command queue closed".to_string())),
                    }
                }
                read = self.stream.read_buf(self.decoder.buffer_mut()) => {
                    if read? == 0 {
                        return Err(KvError::Connection("Connection closed by server".to_string()));
                    }
                }
            }
        }
    }

    /// Write `first` together with whatever else is already queued
    async fn write_batch(&mut self, first: Bytes) -> KvResult<()> {
        let mut batch = BytesMut::from(&first[..]);
        while batch.len() < MAX_WRITE_BATCH {
            match self.writes.try_recv() {
                Ok(frame) => batch.extend_from_slice(&frame),
                Err(_) => break,
            }
        }
        trace!(peer = %self.shared.peer, bytes = batch.len(), "Writing commands");
        self.stream.write_all(&batch).await?;
        self.stream.flush().await?;
        Ok(())
    }

    fn dispatch(&self, frame: WireValue) -> KvResult<()> {
        if frame.is_push() {
            self.route_push(frame);
            Ok(())
        } else {
            self.shared.pipeline.complete_next(frame)
        }
    }

    fn route_push(&self, value: WireValue) {
        trace!(peer = %self.shared.peer, "Push message received");
        match self.pushes.try_send(value) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(peer = %self.shared.peer, "Push buffer full, dropping message");
            }
            // Nobody is listening
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// One request and its reply, straight on the stream
    ///
    /// Only valid before [`run`](Self::run) starts, while nothing else can
    /// be in flight.
    pub(crate) async fn roundtrip(&mut self, cmd: &Cmd) -> KvResult<WireValue> {
        self.stream.write_all(&cmd.encode()).await?;
        self.stream.flush().await?;

        loop {
            while let Some(frame) = self.decoder.next_frame()? {
                if frame.is_push() {
                    self.route_push(frame);
                } else {
                    return into_reply(frame);
                }
            }
            if self.stream.read_buf(self.decoder.buffer_mut()).await? == 0 {
                return Err(KvError::Connection(
                    "Connection closed during handshake".to_string(),
                ));
            }
        }
    }

    async fn handshake(&mut self, config: &ConnectionConfig) -> KvResult<()> {
        if config.protocol_version == ProtocolVersion::Resp3 {
            match self.roundtrip(&Cmd::new("HELLO").arg(3_i64)).await {
                Ok(_) => debug!(peer = %self.shared.peer, "Negotiated RESP3"),
                Err(e) if e.is_server_error() => {
                    warn!(peer = %self.shared.peer, error = %e, "Server refused RESP3, staying on RESP2");
                }
                Err(e) => return Err(e),
            }
        }

        if config.database != 0 {
            self.roundtrip(&Cmd::new("SELECT").arg(config.database))
                .await?
                .decode::<()>()?;
        }

        if let Some(name) = &config.client_name {
            self.roundtrip(&Cmd::new("CLIENT").arg("SETNAME").arg(name.as_str()))
                .await?
                .decode::<()>()?;
        }

        Ok(())
    }
}

impl<S> fmt::Debug for ConnectionDriver<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDriver")
            .field("peer", &self.shared.peer)
            .field("buffered", &self.decoder.buffered())
            .finish()
    }
}

async fn connect_tcp(endpoint: &Endpoint, config: &ConnectionConfig) -> KvResult<TcpStream> {
    debug!(address = %endpoint, "Connecting over TCP");

    let stream = timeout(
        config.connect_timeout,
        TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
    )
    .await
    .map_err(|_| KvError::Timeout)?
    .map_err(|e| KvError::Connection(format!("Failed to connect to {endpoint}: {e}")))?;

    stream.set_nodelay(config.tcp_nodelay)?;

    if let Some(keepalive) = config.tcp_keepalive {
        let socket = socket2::SockRef::from(&stream);
        socket
            .set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(keepalive))
            .map_err(|e| KvError::Connection(format!("Failed to set TCP keepalive: {e}")))?;
    }

    Ok(stream)
}

#[cfg(unix)]
async fn connect_unix(path: &std::path::Path, config: &ConnectionConfig) -> KvResult<BoxedStream> {
    debug!(path = %path.display(), "Connecting over unix socket");

    let stream = timeout(config.connect_timeout, tokio::net::UnixStream::connect(path))
        .await
        .map_err(|_| KvError::Timeout)?
        .map_err(|e| {
            KvError::Connection(format!("Failed to connect to {}: {e}", path.display()))
        })?;
    Ok(Box::new(stream))
}

#[cfg(not(unix))]
async fn connect_unix(path: &std::path::Path, _config: &ConnectionConfig) -> KvResult<BoxedStream> {
    Err(KvError::Config(format!(
        "Unix sockets are not supported on this platform: {}",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameEncoder;
    use tokio::io::{duplex, DuplexStream};

    fn config() -> ConnectionConfig {
        ConnectionConfig::default()
    }

    /// Read one complete command from the peer side
    async fn read_command(peer: &mut DuplexStream, decoder: &mut FrameDecoder) -> WireValue {
        loop {
            if let Some(frame) = decoder.next_frame().unwrap() {
                return frame;
            }
            let n = peer.read_buf(decoder.buffer_mut()).await.unwrap();
            assert!(n > 0, "client hung up");
        }
    }

    async fn reply(peer: &mut DuplexStream, value: &WireValue) {
        peer.write_all(&FrameEncoder::to_bytes(value)).await.unwrap();
    }

    #[test]
    fn test_state_display_and_terminal() {
        assert_eq!(ConnectionState::Closing.to_string(), "closing");
        assert!(ConnectionState::Failed.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
        assert_eq!(
            ConnectionState::from_u8(ConnectionState::Closed as u8),
            ConnectionState::Closed
        );
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (client, mut peer) = duplex(4096);
        let (conn, driver) = Connection::new(client, &config());
        let task = tokio::spawn(driver.run());

        let server = tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            let cmd = read_command(&mut peer, &mut decoder).await;
            assert_eq!(
                cmd,
                WireValue::Array(vec![WireValue::from("ECHO"), WireValue::from("hi")])
            );
            reply(&mut peer, &WireValue::from("hi")).await;
            peer
        });

        let value = conn.send(&Cmd::new("ECHO").arg("hi")).await.unwrap();
        assert_eq!(value, WireValue::from("hi"));
        let _peer = server.await.unwrap();

        conn.close();
        task.await.unwrap().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_send_fails_without_writing_when_not_connected() {
        let (client, _peer) = duplex(64);
        let (conn, driver) = Connection::new(client, &config());
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closing);

        let err = conn.send(&Cmd::new("PING")).await.unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(conn.pending(), 0);
        drop(driver);
    }

    #[tokio::test]
    async fn test_dropping_unrun_driver_fails_pending_requests() {
        let (client, _peer) = duplex(4096);
        let (conn, driver) = Connection::new(client, &config());
        let mut pushes = conn.take_push_receiver().unwrap();

        let sender = conn.clone();
        let request = tokio::spawn(async move { sender.send(&Cmd::new("PING")).await });
        while conn.pending() == 0 {
            tokio::task::yield_now().await;
        }
        drop(driver);

        let err = request.await.unwrap().unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.pending(), 0);
        assert_eq!(pushes.recv().await, None);
    }

    #[tokio::test]
    async fn test_push_is_routed_out_of_band() {
        let (client, mut peer) = duplex(4096);
        let (conn, driver) = Connection::new(client, &config());
        let mut pushes = conn.take_push_receiver().unwrap();
        assert!(conn.take_push_receiver().is_none());
        tokio::spawn(driver.run());

        let server = tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            read_command(&mut peer, &mut decoder).await;
            let push = WireValue::Push(vec![
                WireValue::from("message"),
                WireValue::from("news"),
                WireValue::from("hello"),
            ]);
            reply(&mut peer, &push).await;
            reply(&mut peer, &WireValue::SimpleString("PONG".into())).await;
            peer
        });

        let value = conn.send(&Cmd::new("PING")).await.unwrap();
        assert_eq!(value, WireValue::SimpleString("PONG".into()));
        let push = pushes.recv().await.unwrap();
        assert!(push.is_push());
        let _peer = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_hangup_fails_pending_requests() {
        let (client, mut peer) = duplex(4096);
        let (conn, driver) = Connection::new(client, &config());
        let task = tokio::spawn(driver.run());

        let server = tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            read_command(&mut peer, &mut decoder).await;
            drop(peer);
        });

        let err = conn.send(&Cmd::new("GET").arg("k")).await.unwrap_err();
        assert!(err.is_connection_error());
        server.await.unwrap();

        assert!(task.await.unwrap().is_err());
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(conn.send(&Cmd::new("PING")).await.is_err());
    }

    #[tokio::test]
    async fn test_framing_error_fails_connection() {
        let (client, mut peer) = duplex(4096);
        let (conn, driver) = Connection::new(client, &config());
        let task = tokio::spawn(driver.run());

        let server = tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            read_command(&mut peer, &mut decoder).await;
            peer.write_all(b"?garbage\r\n").await.unwrap();
            peer
        });

        let err = conn.send(&Cmd::new("PING")).await.unwrap_err();
        assert!(err.is_connection_error());
        let run_err = task.await.unwrap().unwrap_err();
        assert!(matches!(run_err, KvError::Protocol(_)));
        assert_eq!(conn.state(), ConnectionState::Failed);
        let _peer = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_aborting_driver_fails_pending_and_closes() {
        let (client, _peer) = duplex(4096);
        let (conn, driver) = Connection::new(client, &config());
        let task = tokio::spawn(driver.run());

        let sender = conn.clone();
        let pending = tokio::spawn(async move {
            sender
                .send(&Cmd::new("BLPOP").arg("k").arg(0_i64))
                .await
        });

        while conn.pending() == 0 {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_close_waits_for_outstanding_replies() {
        let (client, mut peer) = duplex(4096);
        let (conn, driver) = Connection::new(client, &config());
        let task = tokio::spawn(driver.run());

        let sender = conn.clone();
        let pending = tokio::spawn(async move { sender.send(&Cmd::new("PING")).await });
        while conn.pending() == 0 {
            tokio::task::yield_now().await;
        }
        conn.close();

        let mut decoder = FrameDecoder::new();
        read_command(&mut peer, &mut decoder).await;
        reply(&mut peer, &WireValue::SimpleString("PONG".into())).await;

        assert_eq!(
            pending.await.unwrap().unwrap(),
            WireValue::SimpleString("PONG".into())
        );
        task.await.unwrap().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_dropping_last_handle_stops_driver() {
        let (client, _peer) = duplex(64);
        let (conn, driver) = Connection::new(client, &config());
        let task = tokio::spawn(driver.run());
        drop(conn);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_handshake_sends_setup_commands() {
        let (client, mut peer) = duplex(4096);
        let config = ConnectionConfig::default()
            .with_protocol_version(ProtocolVersion::Resp3)
            .with_database(2)
            .with_client_name("worker-1");

        let server = tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            let mut seen = Vec::new();
            for _ in 0..3 {
                let cmd = read_command(&mut peer, &mut decoder).await;
                let name = match &cmd {
                    WireValue::Array(items) => items[0].clone(),
                    other => panic!("unexpected {other:?}"),
                };
                seen.push(name);
                let answer = if name_is(&cmd, "HELLO") {
                    WireValue::Map(vec![(WireValue::from("proto"), WireValue::Integer(3))])
                } else {
                    WireValue::SimpleString("OK".into())
                };
                reply(&mut peer, &answer).await;
            }
            (peer, seen)
        });

        let (conn, _driver) = Connection::with_handshake(client, &config).await.unwrap();
        assert!(conn.is_connected());
        let (_peer, seen) = server.await.unwrap();
        assert!(seen[0].eq_text("HELLO"));
        assert!(seen[1].eq_text("SELECT"));
        assert!(seen[2].eq_text("CLIENT"));
    }

    #[tokio::test]
    async fn test_handshake_falls_back_when_hello_is_refused() {
        let (client, mut peer) = duplex(4096);
        let config =
            ConnectionConfig::default().with_protocol_version(ProtocolVersion::Resp3);

        let server = tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            read_command(&mut peer, &mut decoder).await;
            reply(&mut peer, &WireValue::Error("ERR unknown command 'HELLO'".into())).await;
            peer
        });

        let (conn, _driver) = Connection::with_handshake(client, &config).await.unwrap();
        assert!(conn.is_connected());
        let _peer = server.await.unwrap();
    }

    fn name_is(cmd: &WireValue, name: &str) -> bool {
        matches!(cmd, WireValue::Array(items) if items[0].eq_text(name))
    }
}
