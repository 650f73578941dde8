//! # ssdb-client — An Asynchronous SSDB Client
//!
//! An asynchronous client for [SSDB](https://ssdb.io), a line-oriented key-value database
//! server. The crate opens TCP connections using SSDB's length-prefixed wire framing, reads
//! replies incrementally as bytes arrive, dispatches each reply to the caller that issued the
//! matching request, and manages a bounded pool of such connections shared across many
//! concurrent callers.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                              ssdb-client                               │
//! │                                                                        │
//! │  ┌────────────┐   acquire/execute/release   ┌──────────────────────┐   │
//! │  │   Pool     │ ───────────────────────────>│      Connection      │   │
//! │  │ free / used│                              │  reader task + FIFO  │   │
//! │  └────────────┘                              └──────────┬───────────┘   │
//! │                                                          │              │
//! │                                                          ▼              │
//! │                                ┌───────────────────────────────────┐   │
//! │                                │             protocol              │   │
//! │                                │  encode::encode_command  (write)  │   │
//! │                                │  parser::ReplyParser     (read)   │   │
//! │                                └───────────────────────────────────┘   │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use ssdb_client::{Connection, ConnectOptions, Endpoint};
//!
//! #[tokio::main]
//! async fn main() -> ssdb_client::Result<()> {
//!     let endpoint = Endpoint::new("127.0.0.1", 8888);
//!     let conn = Connection::connect(&endpoint, ConnectOptions::new()).await?;
//!
//!     conn.execute("set", &[&"hello", &"world"]).await?;
//!     let reply = conn.execute("get", &[&"hello"]).await?;
//!     println!("{:?}", reply.first_str());
//!
//!     conn.close();
//!     conn.wait_closed().await;
//!     Ok(())
//! }
//! ```
//!
//! Most applications should prefer [`pool::Pool`] over a bare [`connection::Connection`], since
//! it amortizes connection setup across many callers and survives individual connections dying.
//!
//! ## Module Overview
//!
//! - [`protocol`]: wire encoding ([`protocol::encode`]) and the incremental reply decoder
//!   ([`protocol::parser`]).
//! - [`connection`]: a single full-duplex session — reader task, FIFO, write path.
//! - [`pool`]: a bounded multiplexer over connections.
//! - [`config`]: [`config::ConnectOptions`] and [`config::PoolConfig`].
//! - [`error`]: the crate's single [`error::Error`] type.
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events at connect/close/compaction points; it never installs a
//! subscriber itself. Install one (e.g. `tracing_subscriber::fmt`) in your binary to see them.

pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod protocol;

pub use config::{ConnectOptions, PoolConfig};
pub use connection::{Connection, Endpoint};
pub use error::{Error, Result};
pub use pool::{Pool, PooledConnection};
pub use protocol::{encode_command, Encodable, ParsedReply, Reply, ReplyParser, Token};

/// Version of this crate, exposed the way the teacher crate exposes its own.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
