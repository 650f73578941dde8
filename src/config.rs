//! Connection and Pool Configuration
//!
//! Mirrors the keyword arguments the original implementation accepts on
//! `create_connection` and `create_pool`.

use std::time::Duration;

/// Options for a single [`crate::connection::Connection`].
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Password sent via `auth` immediately after the socket is established.
    pub password: Option<String>,
    /// Decode data tokens to `String` instead of returning raw bytes.
    pub decode_to_text: bool,
    /// Upper bound on how long the TCP handshake may take.
    pub connect_timeout: Option<Duration>,
    /// Whether to set `SO_REUSEADDR` on the socket.
    pub reusable: bool,
}

impl ConnectOptions {
    /// Options with no password, byte replies, no connect timeout, and
    /// `SO_REUSEADDR` enabled (the original implementation's default).
    pub fn new() -> Self {
        Self {
            reusable: true,
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_decode_to_text(mut self, decode_to_text: bool) -> Self {
        self.decode_to_text = decode_to_text;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_reusable(mut self, reusable: bool) -> Self {
        self.reusable = reusable;
        self
    }
}

/// Options for a [`crate::pool::Pool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections to keep pre-filled even while idle.
    pub min: usize,
    /// Hard ceiling on `free + in-use` connections.
    pub max: usize,
    /// Password applied to every connection the pool creates.
    pub password: Option<String>,
    /// Decode data tokens to `String` instead of returning raw bytes.
    pub decode_to_text: bool,
    /// Timeout applied to `acquire()` and to connection creation during growth.
    pub timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 1,
            max: 10,
            password: None,
            decode_to_text: false,
            timeout: None,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min(mut self, min: usize) -> Self {
        self.min = min;
        self
    }

    pub fn with_max(mut self, max: usize) -> Self {
        self.max = max;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_decode_to_text(mut self, decode_to_text: bool) -> Self {
        self.decode_to_text = decode_to_text;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            password: self.password.clone(),
            decode_to_text: self.decode_to_text,
            connect_timeout: self.timeout,
            reusable: true,
        }
    }
}
