//! chanmux - Multiplexed protocol channels over one WebSocket.
//!
//! This library provides a thin client-side abstraction over a single
//! WebSocket connection, multiplexing any number of logical "protocols"
//! (named channels) over the one socket using a colon-delimited text frame
//! format, plus a minimal credential handshake.
//!
//! # Architecture
//!
//! - One [`Connection`] exclusively owns the transport through its event
//!   loop task; it performs the `global:connect:<credential>` handshake on
//!   open and routes every inbound frame.
//! - Any number of [`Channel`] handles borrow the shared connection, each
//!   bound to one protocol namespace, exposing a fluent
//!   send/on/off API.
//!
//! Frames are text messages of the form `protocol:command:body`, where the
//! body is percent-encoded by the sender and delivered to handlers still
//! encoded (see [`frame`] for the wire contract).
//!
//! # Quick Start
//!
//! ```no_run
//! use chanmux::{Connection, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connection = Connection::builder()
//!         .url("ws://192.168.1.1:81")
//!         .credentials("session-token")
//!         .build()?
//!         .connect()
//!         .await?;
//!
//!     connection
//!         .ready(|| println!("authenticated"))
//!         .error(|message| eprintln!("connection error: {message}"));
//!
//!     let chat = connection.channel("chat");
//!     chat.on("msg", |body| println!("chat message: {body}"))
//!         .send("join", "general")?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Failure Semantics
//!
//! Everything that goes wrong after the socket opens — handshake rejection,
//! transport errors, the remote closing — funnels through the connection's
//! single `error` callback as a verbatim string; the causes are not
//! distinguished. Frames that match nothing (foreign protocols,
//! unregistered commands, unparseable text) are dropped silently. There are
//! no retries and no reconnection: a failed connection is discarded and a
//! new one built.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`channel`] | Per-protocol channel handles |
//! | [`credentials`] | Session credential sources |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`frame`] | Colon-delimited text frame format |
//! | [`transport`] | WebSocket connection and event loop |

// ============================================================================
// Modules
// ============================================================================

/// Per-protocol channel handles.
///
/// A [`Channel`] binds one protocol namespace to the shared connection.
pub mod channel;

/// Session credential sources.
///
/// The handshake credential is read from a [`credentials::CredentialStore`]
/// at transport-open time, never cached.
pub mod credentials;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Colon-delimited text frame format.
///
/// Wire contract: `protocol:command:body`, body percent-encoded on send.
pub mod frame;

/// WebSocket transport layer.
///
/// The connection event loop, its builder, and the handshake state machine.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Channel types
pub use channel::Channel;

// Credential types
pub use credentials::{CredentialStore, KeyValueStore};

// Error types
pub use error::{Error, Result};

// Frame types
pub use frame::Frame;

// Transport types
pub use transport::{Connection, ConnectionBuilder, HandshakeState, PendingConnection};
