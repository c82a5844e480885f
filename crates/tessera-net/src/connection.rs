//! Connection to the authoritative server.
//!
//! Manages the full connection lifecycle: connecting, the key exchange, the
//! dispatch loop, outbound sends and clean shutdown. State changes are
//! broadcast via a [`watch`] channel so any number of consumers can react
//! without polling.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use crate::dispatch::{FrameEvent, InboundFramer};
use crate::error::NetError;
use crate::framing::{FrameConfig, encode_envelope};
use crate::handshake::{HandshakeConfig, KeyExchange, SharedSecret};
use crate::message::OutboundMessage;
use crate::registry::MessageRegistry;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Attempting to establish a TCP connection.
    Connecting,
    /// Transport up, key exchange in progress.
    Handshaking,
    /// Key exchange done, messages flowing.
    Connected,
    /// Connection lost, refused, or intentionally closed.
    Disconnected,
}

/// Observable connection state backed by a [`watch`] channel.
///
/// Multiple subscribers can observe state transitions without polling.
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
    rx: watch::Receiver<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a new watch initialized to [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx, rx }
    }

    /// Set the current connection state, notifying all subscribers.
    pub fn set(&self, state: ConnectionState) {
        let _ = self.tx.send(state);
    }

    /// Return a new subscriber receiver.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.rx.clone()
    }

    /// Return the current state without blocking.
    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }
}

/// Callbacks run once when the dispatch loop exits.
#[derive(Default)]
struct ShutdownHooks {
    inner: Mutex<HookState>,
}

#[derive(Default)]
struct HookState {
    fired: bool,
    hooks: Vec<Box<dyn FnOnce() + Send>>,
}

impl ShutdownHooks {
    fn register(&self, hook: Box<dyn FnOnce() + Send>) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if state.fired {
            drop(state);
            hook();
        } else {
            state.hooks.push(hook);
        }
    }

    fn fire(&self) {
        let hooks = {
            let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if state.fired {
                return;
            }
            state.fired = true;
            std::mem::take(&mut state.hooks)
        };
        for hook in hooks {
            hook();
        }
    }
}

/// Cloneable sending side of a connection.
///
/// Every clone feeds the same writer task, so envelopes from concurrent
/// senders never interleave on the wire.
#[derive(Clone)]
pub struct ConnectionHandle {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    routing_tag: Arc<AtomicI32>,
    state: Arc<ConnectionStateWatch>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ConnectionHandle {
    /// Queue `message` for sending, tagged with the current routing tag.
    pub fn send(&self, message: &dyn OutboundMessage) -> Result<(), NetError> {
        if !self.is_open() {
            return Err(NetError::Closed);
        }
        let envelope = encode_envelope(self.routing_tag(), message)?;
        self.outbound.send(envelope).map_err(|_| NetError::Closed)
    }

    /// Routing tag prepended to outbound messages. 0 addresses the server itself.
    pub fn routing_tag(&self) -> i32 {
        self.routing_tag.load(Ordering::Acquire)
    }

    /// Change the routing tag for subsequent sends.
    pub fn set_routing_tag(&self, tag: i32) {
        self.routing_tag.store(tag, Ordering::Release);
    }

    /// Whether the connection is established and not yet closed.
    pub fn is_open(&self) -> bool {
        self.state.current() == ConnectionState::Connected
    }

    /// Ask the dispatch loop and writer task to stop.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Options for [`ServerConnection::start`].
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Inbound framing settings.
    pub frame: FrameConfig,
    /// Key exchange parameters.
    pub handshake: HandshakeConfig,
}

/// A live, handshaken connection with its dispatch loop running.
///
/// Created via [`ServerConnection::connect`] or [`ServerConnection::start`].
/// The dispatch loop owns the session context `C` and runs every decoded
/// message against it.
pub struct ServerConnection {
    handle: ConnectionHandle,
    hooks: Arc<ShutdownHooks>,
}

impl ServerConnection {
    /// Connect to the server at `addr` and start the session.
    ///
    /// Sets `TCP_NODELAY`, then behaves like [`start`](Self::start).
    pub async fn connect<C, F>(
        addr: SocketAddr,
        options: ConnectOptions,
        registry: MessageRegistry<C>,
        make_context: F,
    ) -> Result<Self, NetError>
    where
        C: Send + 'static,
        F: FnOnce(ConnectionHandle, SharedSecret) -> C,
    {
        tracing::info!("Connecting to {addr}");
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let span = tracing::info_span!("connection", peer = %addr);
        Self::start(stream, options, registry, make_context, span).await
    }

    /// Run the key exchange over `stream` and spawn the dispatch loop and
    /// writer task.
    ///
    /// `make_context` builds the session context once the shared secret is
    /// known. Both tasks run inside `span`. A failed key exchange closes the
    /// stream and returns the error.
    pub async fn start<S, C, F>(
        mut stream: S,
        options: ConnectOptions,
        registry: MessageRegistry<C>,
        make_context: F,
        span: tracing::Span,
    ) -> Result<Self, NetError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        C: Send + 'static,
        F: FnOnce(ConnectionHandle, SharedSecret) -> C,
    {
        let state = Arc::new(ConnectionStateWatch::new());
        state.set(ConnectionState::Handshaking);

        span.in_scope(|| tracing::debug!("Starting key exchange"));
        let secret = match KeyExchange::new(options.handshake.clone()) {
            Ok(mut exchange) => exchange.run(&mut stream).instrument(span.clone()).await,
            Err(e) => Err(e),
        };
        let secret = match secret {
            Ok(secret) => secret,
            Err(e) => {
                span.in_scope(|| tracing::error!("Key exchange failed: {e}"));
                state.set(ConnectionState::Disconnected);
                drop(stream);
                return Err(e.into());
            }
        };

        let (reader, writer) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = ConnectionHandle {
            outbound: outbound_tx,
            routing_tag: Arc::new(AtomicI32::new(0)),
            state: Arc::clone(&state),
            shutdown_tx: Arc::new(shutdown_tx),
        };
        let hooks = Arc::new(ShutdownHooks::default());
        let ctx = make_context(handle.clone(), secret);
        state.set(ConnectionState::Connected);

        // Writer task
        let writer_shutdown = Arc::clone(&handle.shutdown_tx);
        let mut writer_shutdown_rx = shutdown_rx.clone();
        tokio::spawn(
            async move {
                Self::write_loop(writer, outbound_rx, &mut writer_shutdown_rx).await;
                let _ = writer_shutdown.send(true);
            }
            .instrument(span.clone()),
        );

        // Dispatch loop
        let loop_state = Arc::clone(&state);
        let loop_shutdown = Arc::clone(&handle.shutdown_tx);
        let loop_hooks = Arc::clone(&hooks);
        let mut reader_shutdown_rx = shutdown_rx;
        let framer = InboundFramer::new(options.frame);
        tokio::spawn(
            async move {
                Self::read_loop(reader, framer, registry, ctx, &mut reader_shutdown_rx).await;
                let _ = loop_shutdown.send(true);
                loop_state.set(ConnectionState::Disconnected);
                tracing::info!("Connection closed");
                loop_hooks.fire();
            }
            .instrument(span),
        );

        Ok(Self { handle, hooks })
    }

    /// Sending handle for this connection.
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Return the connection state watch.
    pub fn state(&self) -> &Arc<ConnectionStateWatch> {
        &self.handle.state
    }

    /// Whether the connection is established and not yet closed.
    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    /// Queue a message for sending.
    pub fn send(&self, message: &dyn OutboundMessage) -> Result<(), NetError> {
        self.handle.send(message)
    }

    /// Register a callback to run once when the dispatch loop exits.
    ///
    /// Callbacks run in registration order. A callback registered after
    /// the loop has already exited runs immediately.
    pub fn on_shutdown(&self, hook: impl FnOnce() + Send + 'static) {
        self.hooks.register(Box::new(hook));
    }

    /// Stop the dispatch loop and close the transport.
    pub fn close(&self) {
        self.handle.close();
    }

    /// Wait until the connection reaches [`ConnectionState::Disconnected`].
    pub async fn closed(&self) {
        let mut rx = self.handle.state.subscribe();
        let _ = rx
            .wait_for(|state| *state == ConnectionState::Disconnected)
            .await;
    }

    /// Pull bytes off the transport and run every decoded message against
    /// `ctx` until the transport fails or shutdown is signalled.
    async fn read_loop<R, C>(
        mut reader: R,
        mut framer: InboundFramer,
        registry: MessageRegistry<C>,
        mut ctx: C,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; 4096];
        loop {
            loop {
                if *shutdown_rx.borrow() {
                    return;
                }
                match framer.next_event(&registry, &ctx) {
                    FrameEvent::Decoded(message) => {
                        tracing::trace!("Executing '{}'", message.kind());
                        message.execute(&mut ctx);
                    }
                    FrameEvent::Desync(e) => {
                        tracing::warn!("Connection desynced ({e}), attempting to resync");
                    }
                    FrameEvent::Realigned { skipped } => {
                        tracing::info!("Resynced after skipping {skipped} bytes");
                    }
                    FrameEvent::NeedMoreData => break,
                }
            }

            tokio::select! {
                result = reader.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("Peer closed the stream");
                            break;
                        }
                        Err(e) => {
                            tracing::debug!("Read failed: {e}");
                            break;
                        }
                        Ok(n) => framer.feed(&buf[..n]),
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Write queued envelopes until the queue closes, a write fails, or
    /// shutdown is signalled.
    async fn write_loop<W>(
        mut writer: W,
        mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) where
        W: AsyncWrite + Unpin,
    {
        loop {
            tokio::select! {
                envelope = outbound.recv() => {
                    let Some(envelope) = envelope else { break };
                    let result = match writer.write_all(&envelope).await {
                        Ok(()) => writer.flush().await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = result {
                        tracing::warn!("Write failed: {e}");
                        break;
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        let _ = writer.shutdown().await;
    }
}
