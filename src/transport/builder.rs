//! Builder pattern for connection configuration.
//!
//! Provides a fluent API for configuring and opening [`Connection`]
//! instances. Validation is split from I/O: [`ConnectionBuilder::build`]
//! checks the configuration without touching the network, and the resulting
//! [`PendingConnection`] performs the actual connect.
//!
//! # Example
//!
//! ```no_run
//! use chanmux::Connection;
//!
//! # async fn example() -> chanmux::Result<()> {
//! let connection = Connection::builder()
//!     .url("ws://192.168.1.1:81")
//!     .credentials("session-token")
//!     .build()?
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tracing::{debug, info};
use url::Url;

use crate::credentials::{CredentialStore, KeyValueStore};
use crate::error::{Error, Result};

use super::Connection;

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for opening the WebSocket.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// URL schemes this client can speak.
const SUPPORTED_SCHEMES: &[&str] = &["ws", "wss"];

// ============================================================================
// ConnectionBuilder
// ============================================================================

/// Builder for configuring a [`Connection`].
///
/// Use [`Connection::builder()`] to create a new builder.
pub struct ConnectionBuilder {
    /// Endpoint URL.
    url: Option<String>,
    /// Credential source for handshake frames.
    credentials: Option<Arc<dyn CredentialStore>>,
    /// Timeout for opening the socket.
    connect_timeout: Duration,
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self {
            url: None,
            credentials: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ConnectionBuilder {
    /// Creates a new builder with no endpoint configured.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the endpoint URL (e.g., `ws://192.168.1.1:81`).
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the credential source read at transport-open time.
    ///
    /// The credential is re-read from the store for every control frame,
    /// never cached. Without a source, control frames carry an empty
    /// credential.
    #[inline]
    #[must_use]
    pub fn credentials(mut self, store: impl CredentialStore + 'static) -> Self {
        self.credentials = Some(Arc::new(store));
        self
    }

    /// Sets the timeout for opening the WebSocket.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Validates the configuration.
    ///
    /// Performs no network action: an endpoint with an unsupported scheme is
    /// rejected here, before any socket exists.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no URL was set
    /// - [`Error::Url`] if the URL does not parse
    /// - [`Error::UnsupportedScheme`] if the scheme is not `ws` or `wss`
    pub fn build(self) -> Result<PendingConnection> {
        let raw = self.url.ok_or_else(|| {
            Error::config(
                "Endpoint URL is required. Use .url() to set it.\n\
                 Example: Connection::builder().url(\"ws://192.168.1.1:81\")",
            )
        })?;

        let url = Url::parse(&raw)?;

        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(Error::unsupported_scheme(url.scheme()));
        }

        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(KeyValueStore::new()));

        Ok(PendingConnection {
            url,
            credentials,
            connect_timeout: self.connect_timeout,
        })
    }
}

// ============================================================================
// PendingConnection
// ============================================================================

/// A validated configuration that has not connected yet.
///
/// Produced by [`ConnectionBuilder::build`]; consumed by
/// [`PendingConnection::connect`].
pub struct PendingConnection {
    /// Validated endpoint URL.
    url: Url,
    /// Credential source for handshake frames.
    credentials: Arc<dyn CredentialStore>,
    /// Timeout for opening the socket.
    connect_timeout: Duration,
}

impl PendingConnection {
    /// Returns the endpoint URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Opens the WebSocket and spawns the connection's event loop.
    ///
    /// On transport open, the event loop immediately sends
    /// `global:connect:<credential>` with the credential read from the store
    /// at that instant. The handshake result arrives asynchronously through
    /// the connection's `ready`/`error` callbacks.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if the socket does not open in time
    /// - [`Error::WebSocket`] if the WebSocket handshake fails
    pub async fn connect(self) -> Result<Connection> {
        debug!(url = %self.url, "Opening WebSocket");

        let connect_result = timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| Error::connection_timeout(self.connect_timeout.as_millis() as u64))?;

        let (ws_stream, _response) = connect_result?;

        info!(url = %self.url, "WebSocket connection established");

        Ok(Connection::new(ws_stream, self.credentials))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_url() {
        let result = ConnectionBuilder::new().build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_build_rejects_unparseable_url() {
        let result = ConnectionBuilder::new().url("not a url").build();
        assert!(matches!(result, Err(Error::Url(_))));
    }

    #[test]
    fn test_build_rejects_unsupported_scheme() {
        // Rejected synchronously, before any socket exists.
        let err = ConnectionBuilder::new()
            .url("http://192.168.1.1:81")
            .build()
            .err()
            .expect("scheme must be rejected");
        match err {
            Error::UnsupportedScheme { scheme } => assert_eq!(scheme, "http"),
            other => panic!("expected UnsupportedScheme, got {other:?}"),
        }
    }

    #[test]
    fn test_build_accepts_ws_and_wss() {
        for url in ["ws://192.168.1.1:81", "wss://example.com/socket"] {
            let pending = ConnectionBuilder::new().url(url).build().expect("build");
            assert_eq!(pending.url().as_str().trim_end_matches('/'), url);
        }
    }

    #[test]
    fn test_default_connect_timeout() {
        assert_eq!(DEFAULT_CONNECT_TIMEOUT.as_secs(), 30);
    }
}
