//! Session credential sources.
//!
//! The connect handshake carries an opaque session credential taken from an
//! ambient store — in the original deployment, the value of a cookie. The
//! credential is read at transport-open time (and again for `disconnect`),
//! never cached by the connection, so rotating it in the store between
//! connects takes effect without rebuilding anything.
//!
//! Two sources are provided:
//!
//! - any `String` or `&'static str` acts as a fixed credential
//! - [`KeyValueStore`] is a shared mutable `key=value` store with cookie-like
//!   parsing

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

// ============================================================================
// CredentialStore
// ============================================================================

/// Source of the session credential sent during the connect handshake.
///
/// Implementations must be cheap to call: the connection reads the
/// credential on the event-loop task, once per control frame.
pub trait CredentialStore: Send + Sync {
    /// Returns the current session credential, if one is present.
    fn session_credential(&self) -> Option<String>;
}

impl CredentialStore for String {
    fn session_credential(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl CredentialStore for &'static str {
    fn session_credential(&self) -> Option<String> {
        Some((*self).to_string())
    }
}

impl<T: CredentialStore + ?Sized> CredentialStore for Arc<T> {
    fn session_credential(&self) -> Option<String> {
        (**self).session_credential()
    }
}

// ============================================================================
// KeyValueStore
// ============================================================================

/// Default key holding the session credential.
pub const SESSION_KEY: &str = "session";

/// A shared, mutable `key=value` credential store.
///
/// Mirrors the cookie jar the original client read from: entries are
/// `key=value` pairs, and the handshake uses the value stored under the
/// session key. Clones share the same underlying map.
///
/// # Example
///
/// ```
/// use chanmux::credentials::{CredentialStore, KeyValueStore};
///
/// let store = KeyValueStore::parse("session=abc123; theme=dark");
/// assert_eq!(store.session_credential(), Some("abc123".to_string()));
///
/// store.set("session", "rotated");
/// assert_eq!(store.session_credential(), Some("rotated".to_string()));
/// ```
#[derive(Debug, Clone)]
pub struct KeyValueStore {
    /// Shared entry map.
    entries: Arc<RwLock<FxHashMap<String, String>>>,
    /// Key looked up by [`CredentialStore::session_credential`].
    session_key: String,
}

impl KeyValueStore {
    /// Creates an empty store using [`SESSION_KEY`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(FxHashMap::default())),
            session_key: SESSION_KEY.to_string(),
        }
    }

    /// Creates an empty store with a custom session key.
    #[must_use]
    pub fn with_session_key(key: impl Into<String>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(FxHashMap::default())),
            session_key: key.into(),
        }
    }

    /// Parses a cookie-like string of `key=value` pairs separated by `;`.
    ///
    /// Segments without `=` are skipped; keys and values are trimmed.
    /// Values may themselves contain `=` (split happens on the first one).
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let store = Self::new();
        {
            let mut entries = store.entries.write();
            for segment in text.split(';') {
                if let Some((key, value)) = segment.split_once('=') {
                    entries.insert(key.trim().to_string(), value.trim().to_string());
                }
            }
        }
        store
    }

    /// Inserts or replaces an entry.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.write().insert(key.into(), value.into());
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    /// Removes the entry under `key`.
    pub fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }
}

impl Default for KeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyValueStore {
    fn session_credential(&self) -> Option<String> {
        self.get(&self.session_key)
    }
}

// ============================================================================
// Tests
// ============================================================================
