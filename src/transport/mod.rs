//! WebSocket transport layer.
//!
//! This module owns the physical connection: one WebSocket carrying every
//! protocol channel, multiplexed by the colon-delimited frame format.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                              ┌─────────────────┐
//! │  Client (Rust)   │                              │  Remote End     │
//! │                  │         WebSocket            │  (Device)       │
//! │  ConnectionBuilder───────────────────────────► │                 │
//! │  → Connection    │   global:connect:<cred>      │  Frame Router   │
//! │  → Channel(s)    │ ◄─ global:connect:success    │                 │
//! └──────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. [`Connection::builder`] - Configure endpoint, credentials, timeout
//! 2. `build` - Validate the URL (no network action yet)
//! 3. `connect` - Open the WebSocket, spawn the event loop
//! 4. Event loop sends `global:connect:<credential>` on open
//! 5. Handshake result invokes the `ready` or `error` callback
//! 6. [`Connection::leave`] or [`Connection::shutdown`] - Close
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Connection configuration and validation |
//! | `connection` | WebSocket connection and event loop |

// ============================================================================
// Submodules
// ============================================================================

/// Connection configuration and validation.
pub mod builder;

/// WebSocket connection and event loop.
pub mod connection;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{ConnectionBuilder, PendingConnection};
pub use connection::{Connection, HandshakeState};

// ============================================================================
// Test Support
// ============================================================================

/// Helpers for driving a connection against an in-process remote end.
///
/// Tests bind a local WebSocket server and play the device side of the
/// protocol by hand.
#[cfg(test)]
pub(crate) mod testing {
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::Message;

    use crate::credentials::CredentialStore;

    use super::Connection;

    /// The remote end of a test connection.
    pub(crate) type RemoteEnd = WebSocketStream<TcpStream>;

    /// Connects a [`Connection`] to an in-process server and returns both
    /// ends. No handshake traffic has happened yet.
    pub(crate) async fn pair(
        credentials: impl CredentialStore + 'static,
    ) -> (Connection, RemoteEnd) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let port = listener.local_addr().expect("local addr").port();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            tokio_tungstenite::accept_async(stream)
                .await
                .expect("upgrade")
        });

        let connection = Connection::builder()
            .url(format!("ws://127.0.0.1:{port}"))
            .credentials(credentials)
            .build()
            .expect("valid config")
            .connect()
            .await
            .expect("connect");

        let remote = accept.await.expect("server task");
        (connection, remote)
    }

    /// Reads the next text frame from the remote end.
    pub(crate) async fn recv_text(remote: &mut RemoteEnd) -> String {
        loop {
            match remote.next().await.expect("stream open").expect("frame") {
                Message::Text(text) => return text.to_string(),
                Message::Close(_) => panic!("remote end closed while awaiting text"),
                _ => {}
            }
        }
    }

    /// Sends a text frame from the remote end.
    pub(crate) async fn send_text(remote: &mut RemoteEnd, text: &str) {
        remote
            .send(Message::Text(text.to_string().into()))
            .await
            .expect("send");
    }

    /// Consumes the connect frame and accepts the handshake.
    ///
    /// Returns the credential carried by the connect frame.
    pub(crate) async fn accept_handshake(remote: &mut RemoteEnd) -> String {
        let connect = recv_text(remote).await;
        let credential = connect
            .strip_prefix("global:connect:")
            .expect("connect frame first")
            .to_string();
        send_text(remote, "global:connect:success").await;
        credential
    }
}
