//! Per-protocol channel handles.
//!
//! A [`Channel`] is a cheap handle binding one protocol namespace to the
//! shared [`Connection`](crate::Connection). Creating one does no I/O;
//! everything it sends and receives travels the connection's single
//! WebSocket, multiplexed by the frame's protocol field.
//!
//! # Example
//!
//! ```no_run
//! # async fn example() -> chanmux::Result<()> {
//! let connection = chanmux::Connection::builder()
//!     .url("ws://192.168.1.1:81")
//!     .credentials("session-token")
//!     .build()?
//!     .connect()
//!     .await?;
//!
//! let chat = connection.channel("chat");
//! chat.on("msg", |body| println!("chat: {body}"))
//!     .send("join", "general")?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use crate::error::Result;
use crate::frame;
use crate::transport::Connection;

// ============================================================================
// Channel
// ============================================================================

/// A handle over one protocol namespace of a shared connection.
///
/// The protocol name is fixed at creation and must not contain the frame
/// delimiter — that is the caller's contract, mirrored from the wire format,
/// and is not validated here.
///
/// At most one handler exists per command: registering again replaces the
/// previous handler. Handlers receive bodies still percent-encoded; see the
/// [`frame`] module docs.
#[derive(Clone)]
pub struct Channel {
    /// The shared connection this channel borrows.
    connection: Connection,
    /// Protocol namespace; immutable after creation.
    protocol: String,
}

impl Channel {
    /// Creates a channel handle. Called via [`Connection::channel`].
    pub(crate) fn new(connection: Connection, protocol: String) -> Self {
        Self {
            connection,
            protocol,
        }
    }

    /// Returns the protocol name this channel is bound to.
    #[inline]
    #[must_use]
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Sends a command frame on this channel's protocol.
    ///
    /// The body is percent-encoded onto the wire as
    /// `protocol:command:<encoded body>`. Fire-and-forget: the frame is
    /// queued for the connection's event loop with no backpressure, and a
    /// write failure surfaces through the connection's error callback.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`](crate::Error::ConnectionClosed)
    /// if the connection's event loop has terminated.
    pub fn send(&self, command: &str, body: &str) -> Result<&Self> {
        self.connection
            .send_text(frame::encode(&self.protocol, command, body))?;
        Ok(self)
    }

    /// Registers a handler for `command`, replacing any previous one.
    ///
    /// The handler runs on the connection's event-loop task, in frame
    /// arrival order, with the body still percent-encoded.
    pub fn on(&self, command: impl Into<String>, callback: impl Fn(&str) + Send + Sync + 'static) -> &Self {
        self.connection
            .register(&self.protocol, command.into(), Arc::new(callback));
        self
    }

    /// Removes the handler for `command`; no-op if none is registered.
    pub fn off(&self, command: &str) -> &Self {
        self.connection.unregister(&self.protocol, command);
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
