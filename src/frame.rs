//! Colon-delimited text frame format.
//!
//! Every message on the wire is a single text frame of the form:
//!
//! ```text
//! ┌────────────┬───┬───────────┬───┬──────────────────────────┐
//! │ protocol   │ : │ command   │ : │ body (percent-encoded)   │
//! └────────────┴───┴───────────┴───┴──────────────────────────┘
//! ```
//!
//! Splitting happens on the first two `:` occurrences, so a body may itself
//! contain the delimiter. `protocol` and `command` must not — nothing here
//! validates that, and a stray delimiter in either field shifts the split.
//!
//! # Encoding Asymmetry
//!
//! The send path percent-encodes bodies; the receive path hands handlers the
//! body exactly as it arrived, still encoded. This matches the deployed wire
//! behavior and callers relying on it must not be broken. Use
//! [`Frame::decode_body`] to opt into decoding.

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Cow;
use std::fmt;

// ============================================================================
// Constants
// ============================================================================

/// Field delimiter within a frame.
pub const DELIMITER: char = ':';

/// Reserved protocol namespace for connection control frames.
pub const GLOBAL_PROTOCOL: &str = "global";

/// Handshake command: `global:connect:<credential>`.
pub const CONNECT_COMMAND: &str = "connect";

/// Teardown command: `global:disconnect:<credential>`.
pub const DISCONNECT_COMMAND: &str = "disconnect";

/// Handshake result body signalling success.
pub const SUCCESS_BODY: &str = "success";

// ============================================================================
// Frame
// ============================================================================

/// A borrowed view over one parsed wire frame.
///
/// Fields borrow from the inbound message text; nothing is copied or decoded
/// during parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Logical namespace the frame is addressed to.
    pub protocol: &'a str,
    /// Command name within the protocol.
    pub command: &'a str,
    /// Payload, still percent-encoded.
    pub body: &'a str,
}

impl<'a> Frame<'a> {
    /// Parses a text message into its three fields.
    ///
    /// Returns `None` if the message contains fewer than two delimiters.
    /// Everything after the second delimiter is the body, including any
    /// further delimiters.
    #[must_use]
    pub fn parse(text: &'a str) -> Option<Self> {
        let mut fields = text.splitn(3, DELIMITER);
        let protocol = fields.next()?;
        let command = fields.next()?;
        let body = fields.next()?;

        Some(Self {
            protocol,
            command,
            body,
        })
    }

    /// Returns `true` if this frame is addressed to the control namespace.
    #[inline]
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.protocol == GLOBAL_PROTOCOL
    }

    /// Percent-decodes the body.
    ///
    /// Opt-in: dispatch always delivers the encoded body (see module docs).
    /// If the body is not valid percent-encoding, it is returned as-is.
    #[must_use]
    pub fn decode_body(&self) -> Cow<'a, str> {
        urlencoding::decode(self.body).unwrap_or(Cow::Borrowed(self.body))
    }
}

impl fmt::Display for Frame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{DELIMITER}{}{DELIMITER}{}",
            self.protocol, self.command, self.body
        )
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes an application frame for the wire.
///
/// The body is percent-encoded; `protocol` and `command` are written verbatim
/// and must not contain the delimiter.
#[must_use]
pub fn encode(protocol: &str, command: &str, body: &str) -> String {
    format!(
        "{protocol}{DELIMITER}{command}{DELIMITER}{}",
        urlencoding::encode(body)
    )
}

/// Builds a control frame in the `global` namespace.
///
/// Control bodies (the session credential) go out verbatim, not
/// percent-encoded — the remote end compares them byte-for-byte.
#[must_use]
pub(crate) fn control(command: &str, body: &str) -> String {
    format!("{GLOBAL_PROTOCOL}{DELIMITER}{command}{DELIMITER}{body}")
}

// ============================================================================
// Tests
// ============================================================================
