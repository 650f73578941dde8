//! Connection
//!
//! Owns one TCP socket to the server: a reader task that drives the [`ReplyParser`], a FIFO of
//! pending requests, and the write path that submits new commands.
//!
//! ## Lifecycle
//!
//! ```text
//! connect()
//!     │
//!     ▼
//! ┌─────────────────────────────┐      execute() enqueues a pending
//! │  open                       │ <──  request and writes its frame
//! │   reader task reads chunks, │
//! │   feeds the parser, and     │ ──►  each parsed reply resolves the
//! │   dispatches replies FIFO   │      oldest pending request
//! └──────────────┬──────────────┘
//!                │ EOF / I/O error / protocol error / close()
//!                ▼
//! ┌─────────────────────────────┐
//! │  closing -> closed          │  drains the FIFO, resolves close-waiters
//! └─────────────────────────────┘
//! ```

mod conn;

pub use conn::{Connection, Endpoint};

/// Bytes read per socket `read()` call, matching the original implementation's chunk size.
pub(crate) const MAX_CHUNK: usize = 65536;
