//! Error Taxonomy
//!
//! This module defines the single error type shared by every layer of the client:
//! the wire-level parser, the connection, and the pool. Each variant corresponds to
//! one of the failure kinds a caller needs to branch on (`match`) rather than just
//! display.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the connection and pool.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller-supplied arguments are malformed: an empty command or a missing
    /// argument. Raised synchronously from `execute`, before any bytes are written.
    #[error("command and arguments must be non-empty")]
    TypeError,

    /// The operation was invoked on a connection that is past EOF or `close()`.
    #[error("connection is closed")]
    ConnectionClosed,

    /// The reply parser saw structurally invalid bytes. Fatal to the owning
    /// connection: every pending request on it fails with this cause.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The server replied with a non-`ok` status.
    #[error("server returned {kind:?} for {command:?}")]
    ReplyError {
        /// The status string the server sent, e.g. `not_found`, `error`, `fail`.
        kind: String,
        /// The command that produced this reply.
        command: String,
    },

    /// The operation was invoked on a pool that is past `close()`.
    #[error("pool is closed")]
    PoolClosed,

    /// `release` was called with a connection not currently leased by this pool.
    #[error("connection was not leased from this pool")]
    BadRelease,

    /// The TCP handshake did not complete within `connect_timeout`.
    #[error("connect timed out")]
    Timeout,

    /// A transport-level I/O failure not otherwise classified.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors that leave the originating connection usable for further
    /// commands (currently only [`Error::ReplyError`]).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::ReplyError { .. })
    }
}
