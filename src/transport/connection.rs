//! WebSocket connection and event loop.
//!
//! This module owns the single physical connection every protocol channel
//! shares. The connection spawns a tokio task that handles:
//!
//! - The connect handshake on transport open
//! - Incoming frames (handshake results, channel traffic)
//! - Outgoing frames from channel handles
//! - Ready and error callback invocation
//!
//! # Handshake
//!
//! ```text
//! Connecting ──open──► AwaitingAuth ──global:connect:success──► Ready
//!                           │
//!                           └──────global:connect:<other>─────► Failed
//! ```
//!
//! On transport open the loop sends `global:connect:<credential>` with the
//! credential read from the store at that instant. The remote's reply on
//! `global:connect` resolves the handshake: a literal `success` body invokes
//! the ready callback, anything else invokes the error callback with the
//! verbatim body.
//!
//! # Dispatch
//!
//! Inbound frames are routed by `(protocol, command)` to the registered
//! handler, which receives the body still percent-encoded. Frames with no
//! handler — foreign protocols, unregistered commands, unparseable text —
//! are dropped without surfacing an error. Dispatch is not gated on the
//! handshake state; the remote is trusted not to send channel traffic before
//! completing the handshake.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, trace, warn};

use crate::channel::Channel;
use crate::credentials::CredentialStore;
use crate::error::{Error, Result};
use crate::frame::{self, Frame};

use super::ConnectionBuilder;

// ============================================================================
// Types
// ============================================================================

/// The client side of the WebSocket.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of the WebSocket.
type WsSink = SplitSink<WsStream, Message>;

/// Handler for one command on one protocol.
///
/// Invoked on the connection's event-loop task with the frame body, still
/// percent-encoded (see the [`frame`] module docs on the encoding
/// asymmetry).
pub type CommandHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback invoked when the handshake is accepted.
pub type ReadyCallback = Arc<dyn Fn() + Send + Sync>;

/// Callback invoked for handshake rejection and transport failure.
///
/// The message is taken verbatim from the rejecting frame's body or the
/// transport event; the three causes are not distinguished.
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Nested handler registry: protocol name → command name → handler.
type Registry = FxHashMap<String, FxHashMap<String, CommandHandler>>;

// ============================================================================
// HandshakeState
// ============================================================================

/// Connection handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Socket opening, connect frame not sent yet.
    Connecting,
    /// Connect frame sent, awaiting the remote's verdict.
    AwaitingAuth,
    /// Remote accepted the credential.
    Ready,
    /// Remote rejected the credential or the connect frame never went out.
    Failed,
}

// ============================================================================
// Shared State
// ============================================================================

/// State shared between the public handles and the event loop.
pub(crate) struct Shared {
    /// Handler registry, mutated by channel `on`/`off`.
    registry: Mutex<Registry>,
    /// Ready callback slot; last write wins.
    ready: Mutex<Option<ReadyCallback>>,
    /// Error callback slot; last write wins.
    error: Mutex<Option<ErrorCallback>>,
    /// Handshake progress.
    state: Mutex<HandshakeState>,
}

impl Shared {
    fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            ready: Mutex::new(None),
            error: Mutex::new(None),
            state: Mutex::new(HandshakeState::Connecting),
        }
    }

    fn set_state(&self, state: HandshakeState) {
        *self.state.lock() = state;
    }

    fn state(&self) -> HandshakeState {
        *self.state.lock()
    }

    /// Invokes the ready callback if one is registered.
    ///
    /// The slot is cloned out of the lock first so the callback may register
    /// handlers without deadlocking.
    fn invoke_ready(&self) {
        let callback = self.ready.lock().clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Invokes the error callback if one is registered.
    ///
    /// With no callback registered the failure is dropped.
    fn invoke_error(&self, message: &str) {
        let callback = self.error.lock().clone();
        if let Some(callback) = callback {
            callback(message);
        }
    }
}

// ============================================================================
// LoopCommand
// ============================================================================

/// Internal commands for the event loop.
enum LoopCommand {
    /// Write a pre-encoded frame to the socket.
    Send(String),
    /// Send `global:disconnect:<credential>` and close.
    Leave,
    /// Close without the disconnect frame.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// One physical WebSocket connection shared by every protocol channel.
///
/// The connection owns the transport through its event-loop task. Public
/// handles — `Connection` clones and the [`Channel`]s created from them —
/// share the transport and never block: sends are queued into the loop,
/// handler registration takes a short lock.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and cheap to clone. The event loop stops
/// when [`shutdown`](Connection::shutdown) or [`leave`](Connection::leave)
/// is called, when the remote closes, or when the last handle is dropped.
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<LoopCommand>,
    /// State shared with the event loop.
    shared: Arc<Shared>,
}

impl Clone for Connection {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Connection {
    /// Returns a builder for configuring a connection.
    #[inline]
    #[must_use]
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Creates a connection from an open WebSocket stream.
    ///
    /// Spawns the event loop task, which immediately performs the connect
    /// handshake.
    pub(crate) fn new(ws_stream: WsStream, credentials: Arc<dyn CredentialStore>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            Arc::clone(&shared),
            credentials,
        ));

        Self { command_tx, shared }
    }

    /// Returns a [`Channel`] bound to `protocol`.
    ///
    /// Channels are lightweight handles over this connection; any number may
    /// coexist, one per protocol namespace or several over the same one.
    #[must_use]
    pub fn channel(&self, protocol: impl Into<String>) -> Channel {
        Channel::new(self.clone(), protocol.into())
    }

    /// Sets the ready callback, replacing any previous one.
    ///
    /// Invoked once when the remote accepts the connect handshake.
    pub fn ready(&self, callback: impl Fn() + Send + Sync + 'static) -> &Self {
        *self.shared.ready.lock() = Some(Arc::new(callback));
        self
    }

    /// Sets the error callback, replacing any previous one.
    ///
    /// Handshake rejection, transport errors and remote close all funnel
    /// through this single slot with a verbatim message string. Without a
    /// registered callback those failures are silently dropped.
    pub fn error(&self, callback: impl Fn(&str) + Send + Sync + 'static) -> &Self {
        *self.shared.error.lock() = Some(Arc::new(callback));
        self
    }

    /// Returns the current handshake state.
    #[inline]
    #[must_use]
    pub fn handshake_state(&self) -> HandshakeState {
        self.shared.state()
    }

    /// Returns `true` once the remote has accepted the handshake.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.handshake_state() == HandshakeState::Ready
    }

    /// Announces departure to the remote end and closes the connection.
    ///
    /// Sends `global:disconnect:<credential>` with the credential re-read
    /// from the store, then closes the socket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the event loop is gone.
    pub fn leave(&self) -> Result<()> {
        self.command_tx
            .send(LoopCommand::Leave)
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Closes the connection without the disconnect frame.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(LoopCommand::Shutdown);
    }

    /// Queues a pre-encoded frame for the socket.
    ///
    /// Fire-and-forget: the loop's outbound path does the write; a write
    /// failure surfaces through the error callback, not here.
    pub(crate) fn send_text(&self, text: String) -> Result<()> {
        self.command_tx
            .send(LoopCommand::Send(text))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Registers or replaces the handler for `(protocol, command)`.
    pub(crate) fn register(&self, protocol: &str, command: String, handler: CommandHandler) {
        let mut registry = self.shared.registry.lock();
        registry
            .entry(protocol.to_string())
            .or_default()
            .insert(command, handler);
    }

    /// Removes the handler for `(protocol, command)`; no-op if absent.
    pub(crate) fn unregister(&self, protocol: &str, command: &str) {
        let mut registry = self.shared.registry.lock();
        if let Some(commands) = registry.get_mut(protocol) {
            commands.remove(command);
        }
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop(
        ws_stream: WsStream,
        mut command_rx: mpsc::UnboundedReceiver<LoopCommand>,
        shared: Arc<Shared>,
        credentials: Arc<dyn CredentialStore>,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        // Transport open: establish credentials with the remote end. The
        // credential is read from the store at this instant, not earlier.
        let credential = credentials.session_credential().unwrap_or_default();
        let connect = frame::control(frame::CONNECT_COMMAND, &credential);

        if let Err(e) = ws_write.send(Message::Text(connect.into())).await {
            error!(error = %e, "Failed to send connect frame");
            shared.set_state(HandshakeState::Failed);
            shared.invoke_error(&e.to_string());
            return;
        }

        shared.set_state(HandshakeState::AwaitingAuth);
        debug!("Connect frame sent");

        loop {
            tokio::select! {
                // Incoming frames from the remote end
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming(&text, &shared);
                        }

                        Some(Ok(Message::Close(close_frame))) => {
                            let reason = close_frame
                                .map(|f| f.reason.to_string())
                                .unwrap_or_default();
                            debug!(reason, "WebSocket closed by remote");
                            shared.invoke_error(&reason);
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            shared.invoke_error(&e.to_string());
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Commands from the public handles
                command = command_rx.recv() => {
                    match command {
                        Some(LoopCommand::Send(text)) => {
                            if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                                warn!(error = %e, "Failed to write frame");
                                shared.invoke_error(&e.to_string());
                            }
                        }

                        Some(LoopCommand::Leave) => {
                            Self::send_disconnect(&mut ws_write, &credentials).await;
                            let _ = ws_write.close().await;
                            break;
                        }

                        Some(LoopCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("All handles dropped");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }
            }
        }

        debug!("Event loop terminated");
    }

    /// Handles one inbound text message.
    fn handle_incoming(text: &str, shared: &Shared) {
        let Some(frame) = Frame::parse(text) else {
            trace!(text, "Dropped unframed message");
            return;
        };

        // Handshake verdict: global:connect:<body>. Never dispatched.
        if frame.is_control() && frame.command == frame::CONNECT_COMMAND {
            if frame.body == frame::SUCCESS_BODY {
                shared.set_state(HandshakeState::Ready);
                debug!("Handshake accepted");
                shared.invoke_ready();
            } else {
                shared.set_state(HandshakeState::Failed);
                warn!(reason = frame.body, "Handshake rejected");
                shared.invoke_error(frame.body);
            }
            return;
        }

        // Route to the registered handler. The handler is cloned out of the
        // lock so it may call on/off itself.
        let handler = {
            let registry = shared.registry.lock();
            registry
                .get(frame.protocol)
                .and_then(|commands| commands.get(frame.command))
                .cloned()
        };

        match handler {
            Some(handler) => {
                trace!(
                    protocol = frame.protocol,
                    command = frame.command,
                    "Frame dispatched"
                );
                handler(frame.body);
            }
            None => {
                trace!(
                    protocol = frame.protocol,
                    command = frame.command,
                    "Frame dropped"
                );
            }
        }
    }

    /// Sends the disconnect control frame, re-reading the credential.
    async fn send_disconnect(ws_write: &mut WsSink, credentials: &Arc<dyn CredentialStore>) {
        let credential = credentials.session_credential().unwrap_or_default();
        let disconnect = frame::control(frame::DISCONNECT_COMMAND, &credential);

        if let Err(e) = ws_write.send(Message::Text(disconnect.into())).await {
            warn!(error = %e, "Failed to send disconnect frame");
        } else {
            debug!("Disconnect frame sent");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::timeout;

    use crate::credentials::KeyValueStore;
    use crate::transport::testing::{accept_handshake, pair, recv_text, send_text};

    const WAIT: Duration = Duration::from_secs(5);

    /// Registers tagged ready/error callbacks and a `chat:msg` handler, all
    /// reporting into one ordered event stream.
    fn observe(connection: &Connection) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();

        let ready_tx = tx.clone();
        connection.ready(move || {
            let _ = ready_tx.send("ready".to_string());
        });

        let error_tx = tx.clone();
        connection.error(move |message| {
            let _ = error_tx.send(format!("error:{message}"));
        });

        let msg_tx = tx;
        connection.channel("chat").on("msg", move |body| {
            let _ = msg_tx.send(format!("msg:{body}"));
        });

        rx
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        timeout(WAIT, rx.recv())
            .await
            .expect("event within timeout")
            .expect("event stream open")
    }

    #[tokio::test]
    async fn test_connect_frame_carries_credential() {
        let (_connection, mut remote) = pair("tok").await;

        let first = recv_text(&mut remote).await;
        assert_eq!(first, "global:connect:tok");
    }

    #[tokio::test]
    async fn test_handshake_success_invokes_ready() {
        let (connection, mut remote) = pair("tok").await;
        let mut events = observe(&connection);

        accept_handshake(&mut remote).await;
        // A trailing frame proves ready fired exactly once, with no error
        // interleaved.
        send_text(&mut remote, "chat:msg:after").await;

        assert_eq!(next_event(&mut events).await, "ready");
        assert_eq!(next_event(&mut events).await, "msg:after");
        assert_eq!(connection.handshake_state(), HandshakeState::Ready);
        assert!(connection.is_ready());
    }

    #[tokio::test]
    async fn test_handshake_rejection_invokes_error() {
        let (connection, mut remote) = pair("tok").await;
        let mut events = observe(&connection);

        recv_text(&mut remote).await;
        send_text(&mut remote, "global:connect:boom").await;
        send_text(&mut remote, "chat:msg:after").await;

        assert_eq!(next_event(&mut events).await, "error:boom");
        // Dispatch is not gated on handshake state: traffic still routes
        // after a rejection.
        assert_eq!(next_event(&mut events).await, "msg:after");
        assert_eq!(connection.handshake_state(), HandshakeState::Failed);
        assert!(!connection.is_ready());
    }

    #[tokio::test]
    async fn test_dispatch_before_handshake_verdict() {
        let (connection, mut remote) = pair("tok").await;
        let mut events = observe(&connection);

        recv_text(&mut remote).await;
        send_text(&mut remote, "chat:msg:early").await;
        send_text(&mut remote, "global:connect:success").await;

        assert_eq!(next_event(&mut events).await, "msg:early");
        assert_eq!(next_event(&mut events).await, "ready");
    }

    #[tokio::test]
    async fn test_body_delivered_still_encoded() {
        let (connection, mut remote) = pair("tok").await;
        let mut events = observe(&connection);

        accept_handshake(&mut remote).await;
        send_text(&mut remote, "chat:msg:hello%20world").await;

        assert_eq!(next_event(&mut events).await, "ready");
        assert_eq!(next_event(&mut events).await, "msg:hello%20world");
    }

    #[tokio::test]
    async fn test_foreign_and_malformed_frames_dropped() {
        let (connection, mut remote) = pair("tok").await;
        let mut events = observe(&connection);

        accept_handshake(&mut remote).await;
        send_text(&mut remote, "other:msg:x").await;
        send_text(&mut remote, "chat:unregistered:x").await;
        send_text(&mut remote, "no delimiters at all").await;
        send_text(&mut remote, "chat:msg").await;
        send_text(&mut remote, "chat:msg:last").await;

        assert_eq!(next_event(&mut events).await, "ready");
        // Transport order: everything before chat:msg:last was already
        // processed, and none of it produced an event or an error.
        assert_eq!(next_event(&mut events).await, "msg:last");
    }

    #[tokio::test]
    async fn test_global_frames_besides_connect_are_routable() {
        let (connection, mut remote) = pair("tok").await;
        let (tx, mut events) = mpsc::unbounded_channel();
        connection.channel("global").on("announce", move |body| {
            let _ = tx.send(body.to_string());
        });

        accept_handshake(&mut remote).await;
        send_text(&mut remote, "global:announce:maintenance").await;

        let body = timeout(WAIT, events.recv())
            .await
            .expect("event within timeout")
            .expect("open");
        assert_eq!(body, "maintenance");
    }

    #[tokio::test]
    async fn test_remote_close_surfaces_error() {
        let (connection, mut remote) = pair("tok").await;
        let mut events = observe(&connection);

        accept_handshake(&mut remote).await;
        assert_eq!(next_event(&mut events).await, "ready");

        remote.close(None).await.expect("close");

        let event = next_event(&mut events).await;
        assert!(event.starts_with("error:"), "got {event}");
    }

    #[tokio::test]
    async fn test_abrupt_disconnect_surfaces_error() {
        let (connection, mut remote) = pair("tok").await;
        let mut events = observe(&connection);

        accept_handshake(&mut remote).await;
        assert_eq!(next_event(&mut events).await, "ready");

        drop(remote);

        let event = next_event(&mut events).await;
        assert!(event.starts_with("error:"), "got {event}");
    }

    #[tokio::test]
    async fn test_leave_sends_disconnect_then_closes() {
        let store = KeyValueStore::new();
        store.set("session", "tok");
        let (connection, mut remote) = pair(store.clone()).await;

        assert_eq!(accept_handshake(&mut remote).await, "tok");

        // Credential is re-read at leave time, not cached from connect.
        store.set("session", "rotated");
        connection.leave().expect("loop alive");

        assert_eq!(recv_text(&mut remote).await, "global:disconnect:rotated");
        match remote.next().await {
            None | Some(Ok(Message::Close(_))) => {}
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shutdown_closes_without_disconnect() {
        let (connection, mut remote) = pair("tok").await;

        accept_handshake(&mut remote).await;
        connection.shutdown();

        match remote.next().await {
            None | Some(Ok(Message::Close(_))) => {}
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dropping_last_handle_stops_loop() {
        let (connection, mut remote) = pair("tok").await;

        accept_handshake(&mut remote).await;
        drop(connection);

        match remote.next().await {
            None | Some(Ok(Message::Close(_))) => {}
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_after_shutdown_errors() {
        let (connection, mut remote) = pair("tok").await;

        accept_handshake(&mut remote).await;
        connection.shutdown();

        // Wait for the loop to actually exit.
        match remote.next().await {
            None | Some(Ok(Message::Close(_))) => {}
            other => panic!("expected close, got {other:?}"),
        }
        timeout(WAIT, async {
            while connection.send_text("chat:msg:x".to_string()).is_ok() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("send fails once loop is gone");

        let err = connection.send_text("chat:msg:x".to_string()).unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }
}
