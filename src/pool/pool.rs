use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{watch, Mutex as AsyncMutex, Notify};
use tracing::{debug, error, warn};

use crate::config::{ConnectOptions, PoolConfig};
use crate::connection::{Connection, Endpoint};
use crate::error::{Error, Result};
use crate::protocol::{Encodable, Reply};

#[derive(Default)]
struct PoolState {
    free: VecDeque<Connection>,
    used: HashMap<u64, Connection>,
}

struct PoolShared {
    endpoint: Endpoint,
    min: usize,
    max: usize,
    decode_to_text: bool,
    timeout: Option<Duration>,
    password: StdMutex<Option<String>>,
    state: AsyncMutex<PoolState>,
    notify: Notify,
    closing: AtomicBool,
    closed_tx: watch::Sender<bool>,
    free_count: AtomicUsize,
    used_count: AtomicUsize,
}

impl PoolShared {
    fn connect_options(&self) -> ConnectOptions {
        let mut opts = ConnectOptions::new().with_decode_to_text(self.decode_to_text);
        if let Some(timeout) = self.timeout {
            opts = opts.with_connect_timeout(timeout);
        }
        if let Some(password) = self.password.lock().unwrap().clone() {
            opts = opts.with_password(password);
        }
        opts
    }

    fn record_counts(&self, state: &PoolState) {
        self.free_count.store(state.free.len(), Ordering::Relaxed);
        self.used_count.store(state.used.len(), Ordering::Relaxed);
    }
}

/// A bounded pool of [`Connection`]s to a single SSDB server.
#[derive(Clone)]
pub struct Pool {
    shared: Arc<PoolShared>,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("min", &self.shared.min)
            .field("max", &self.shared.max)
            .field("free", &self.shared.free_count.load(Ordering::Relaxed))
            .field(
                "size",
                &(self.shared.free_count.load(Ordering::Relaxed)
                    + self.shared.used_count.load(Ordering::Relaxed)),
            )
            .finish()
    }
}

impl Pool {
    /// Opens a pool against `endpoint`, pre-filling the free list to `config.min`.
    ///
    /// A per-connection failure while filling to `min` is logged and tolerated as long as at
    /// least one connection was created; if none could be created at all and `min > 0`, the
    /// last connection error is propagated and nothing is left running.
    pub async fn new(endpoint: Endpoint, config: PoolConfig) -> Result<Pool> {
        let (closed_tx, _closed_rx) = watch::channel(false);
        let shared = Arc::new(PoolShared {
            endpoint,
            min: config.min,
            max: config.max,
            decode_to_text: config.decode_to_text,
            timeout: config.timeout,
            password: StdMutex::new(config.password),
            state: AsyncMutex::new(PoolState::default()),
            notify: Notify::new(),
            closing: AtomicBool::new(false),
            closed_tx,
            free_count: AtomicUsize::new(0),
            used_count: AtomicUsize::new(0),
        });

        let mut last_err = None;
        {
            let mut state = shared.state.lock().await;
            for _ in 0..shared.min {
                match Connection::connect(&shared.endpoint, shared.connect_options()).await {
                    Ok(conn) => state.free.push_back(conn),
                    Err(e) => {
                        error!(error = %e, "failed to create connection while filling pool to min");
                        last_err = Some(e);
                    }
                }
            }
            shared.record_counts(&state);
            if shared.min > 0 && state.free.is_empty() {
                if let Some(err) = last_err {
                    return Err(err);
                }
            }
        }

        Ok(Pool { shared })
    }

    /// Acquires, submits, awaits, and releases — even if `execute` fails.
    pub async fn execute(&self, command: &str, args: &[&dyn Encodable]) -> Result<Reply> {
        let (pooled, _endpoint) = self.acquire().await?;
        let result = pooled.execute(command, args).await;
        if let Err(e) = self.release(pooled).await {
            warn!(error = %e, "failed to release pooled connection after execute");
        }
        result
    }

    /// Leases a connection, growing the pool (up to `max`) if none are free.
    pub async fn acquire(&self) -> Result<(PooledConnection, Endpoint)> {
        let conn = match self.shared.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.acquire_inner()).await {
                Ok(result) => result?,
                Err(_) => return Err(Error::Timeout),
            },
            None => self.acquire_inner().await?,
        };
        let endpoint = self.shared.endpoint.clone();
        Ok((
            PooledConnection {
                pool: self.clone(),
                conn: Some(conn),
            },
            endpoint,
        ))
    }

    async fn acquire_inner(&self) -> Result<Connection> {
        loop {
            if self.is_closed() {
                return Err(Error::PoolClosed);
            }

            let notified = self.shared.notify.notified();

            {
                let mut state = self.shared.state.lock().await;
                if self.shared.closing.load(Ordering::SeqCst) {
                    return Err(Error::PoolClosed);
                }
                compact(&self.shared, &mut state);
                if let Some(conn) = state.free.pop_front() {
                    state.used.insert(conn.id(), conn.clone());
                    self.shared.record_counts(&state);
                    return Ok(conn);
                }
                if state.free.len() + state.used.len() >= self.shared.max {
                    drop(state);
                    notified.await;
                    continue;
                }
            }

            fill_free(&self.shared, true).await;
        }
    }

    /// Returns a leased connection to the free list, or drops it if it is no longer healthy.
    pub async fn release(&self, mut pooled: PooledConnection) -> Result<()> {
        let conn = pooled.conn.take().ok_or(Error::BadRelease)?;
        self.release_inner(conn).await
    }

    async fn release_inner(&self, conn: Connection) -> Result<()> {
        if self.shared.closing.load(Ordering::SeqCst) {
            return Err(Error::PoolClosed);
        }
        let mut state = self.shared.state.lock().await;
        if state.used.remove(&conn.id()).is_none() {
            error!(id = conn.id(), "release called with a connection not leased from this pool");
            return Err(Error::BadRelease);
        }
        if conn.is_closed() {
            warn!(id = conn.id(), "dropping closed connection instead of returning it to the pool");
        } else {
            state.free.push_back(conn);
        }
        self.shared.record_counts(&state);
        drop(state);
        self.shared.notify.notify_one();
        Ok(())
    }

    /// Re-authenticates every currently free connection; connections created afterwards use the
    /// new password too.
    pub async fn auth(&self, password: impl Into<String>) -> Result<()> {
        let password = password.into();
        *self.shared.password.lock().unwrap() = Some(password.clone());
        let state = self.shared.state.lock().await;
        for conn in state.free.iter() {
            conn.auth(&password).await?;
        }
        Ok(())
    }

    /// Idempotent. Stops accepting new work and closes every connection the pool has ever
    /// produced, free or leased.
    pub fn close(&self) {
        if self
            .shared
            .closing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            debug!("pool closing");
            let mut state = shared.state.lock().await;
            let free = std::mem::take(&mut state.free);
            let used: Vec<Connection> = state.used.drain().map(|(_, c)| c).collect();
            shared.record_counts(&state);
            drop(state);

            shared.notify.notify_waiters();

            let mut handles = Vec::new();
            for conn in free.into_iter().chain(used) {
                conn.close();
                handles.push(tokio::spawn(async move { conn.wait_closed().await }));
            }
            for handle in handles {
                let _ = handle.await;
            }

            let _ = shared.closed_tx.send(true);
        });
    }

    /// Resolves once `close()` has finished shutting down every connection.
    pub fn wait_closed(&self) -> impl std::future::Future<Output = ()> + 'static {
        let mut rx = self.shared.closed_tx.subscribe();
        async move {
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed_tx.borrow()
    }

    pub fn min(&self) -> usize {
        self.shared.min
    }

    pub fn max(&self) -> usize {
        self.shared.max
    }

    pub async fn free_size(&self) -> usize {
        self.shared.state.lock().await.free.len()
    }

    pub async fn size(&self) -> usize {
        let state = self.shared.state.lock().await;
        state.free.len() + state.used.len()
    }
}

/// Drops closed connections from the free list and the in-use set.
fn compact(shared: &PoolShared, state: &mut PoolState) {
    let before = state.free.len();
    state.free.retain(|c| !c.is_closed());
    if state.free.len() != before {
        warn!(dropped = before - state.free.len(), "compacted closed connections from the free list");
    }

    let closed_ids: Vec<u64> = state
        .used
        .iter()
        .filter(|(_, c)| c.is_closed())
        .map(|(id, _)| *id)
        .collect();
    for id in closed_ids {
        state.used.remove(&id);
        warn!(id, "dropped closed connection from the in-use set");
    }
    shared.record_counts(state);
}

/// Compacts, then fills toward `min`; if `growth` and still no free connection, keeps opening
/// connections one at a time until either one is free or the pool has reached `max`.
async fn fill_free(shared: &Arc<PoolShared>, growth: bool) {
    let mut state = shared.state.lock().await;
    compact(shared, &mut state);

    let to_min = shared.min.saturating_sub(state.free.len() + state.used.len());
    for _ in 0..to_min {
        match Connection::connect(&shared.endpoint, shared.connect_options()).await {
            Ok(conn) => state.free.push_back(conn),
            Err(e) => error!(error = %e, "failed to create connection while filling to min"),
        }
    }
    shared.record_counts(&state);

    if !state.free.is_empty() || !growth {
        return;
    }

    let to_max = shared.max.saturating_sub(state.free.len() + state.used.len());
    for _ in 0..to_max {
        match Connection::connect(&shared.endpoint, shared.connect_options()).await {
            Ok(conn) => {
                state.free.push_back(conn);
                shared.record_counts(&state);
                break;
            }
            Err(e) => error!(error = %e, "failed to create connection while growing pool"),
        }
    }
}

/// An exclusive lease on a pooled [`Connection`].
///
/// Dropping this without calling [`Pool::release`] still returns the connection to the pool —
/// the drop glue spawns the release as a background task — but explicit release lets callers
/// observe `Error::BadRelease`/`Error::PoolClosed` immediately.
pub struct PooledConnection {
    pool: Pool,
    conn: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection already released")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let pool = self.pool.clone();
            tokio::spawn(async move {
                let _ = pool.release_inner(conn).await;
            });
        }
    }
}
