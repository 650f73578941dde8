//! Connection Pool
//!
//! A bounded multiplexer over [`crate::connection::Connection`]: a free deque, an in-use set,
//! lazy growth up to a ceiling, and waiter coordination when the ceiling is reached.
//!
//! ```text
//! acquire() ─┬─► free deque has a healthy connection?  move F -> U, return it
//!            └─► else: fill_free(growth) then wait on Notify, re-check on wake
//!
//! release(c) ─► remove from U; if healthy, push to tail of F; notify_one()
//! ```

mod pool;

pub use pool::{Pool, PooledConnection};
