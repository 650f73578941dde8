use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpSocket;
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::config::ConnectOptions;
use crate::connection::MAX_CHUNK;
use crate::error::{Error, Result};
use crate::protocol::{encode_command, Encodable, ParsedReply, Reply, ReplyParser};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A `(host, port)` TCP address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Open / closing / closed, advancing only forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Open,
    Closed,
}

/// One command written but not yet resolved.
struct Pending {
    tx: oneshot::Sender<Result<Reply>>,
    command: String,
}

struct WriteSide {
    writer: OwnedWriteHalf,
    fifo: VecDeque<Pending>,
}

/// The reason the connection is shutting down, used to resolve queued pending requests.
enum FailCause {
    /// Local close or a clean/unclean disconnect with no parser-level cause: queued requests
    /// are cancelled.
    Cancelled,
    /// A fatal parser error: queued requests fail with a copy of the same message.
    Protocol(String),
}

struct Shared {
    id: u64,
    write_side: AsyncMutex<WriteSide>,
    state_tx: watch::Sender<ConnState>,
    /// Set synchronously the instant shutdown is requested, so `is_closed()` is accurate
    /// before the asynchronous drain in `finish` has even started.
    closing: AtomicBool,
    closing_started: AtomicBool,
    reader_handle: StdMutex<Option<JoinHandle<()>>>,
}

/// A single asynchronous connection to an SSDB server.
///
/// Cheap to clone: every clone shares the same socket, FIFO, and close state.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Opens a TCP connection to `endpoint`, spawns its reader task, and — if `options` carries
    /// a password — authenticates before returning.
    pub async fn connect(endpoint: &Endpoint, options: ConnectOptions) -> Result<Connection> {
        let stream = match options.connect_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, connect_tcp(endpoint, options.reusable)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(Error::Io(e)),
                Err(_) => return Err(Error::Timeout),
            },
            None => connect_tcp(endpoint, options.reusable).await.map_err(Error::Io)?,
        };

        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        debug!(id, %endpoint, "connection established");

        let (read_half, write_half) = stream.into_split();
        let (state_tx, _state_rx) = watch::channel(ConnState::Open);
        let shared = Arc::new(Shared {
            id,
            write_side: AsyncMutex::new(WriteSide {
                writer: write_half,
                fifo: VecDeque::new(),
            }),
            state_tx,
            closing: AtomicBool::new(false),
            closing_started: AtomicBool::new(false),
            reader_handle: StdMutex::new(None),
        });

        let reader_shared = Arc::clone(&shared);
        let decode_to_text = options.decode_to_text;
        let handle = tokio::spawn(reader_loop(read_half, reader_shared, decode_to_text));
        *shared.reader_handle.lock().unwrap() = Some(handle);

        let connection = Connection { shared };

        if let Some(password) = options.password.as_deref() {
            if let Err(e) = connection.auth(password).await {
                connection.close();
                return Err(e);
            }
        }

        Ok(connection)
    }

    /// Returns the identity used by [`crate::pool::Pool`] to track leased connections.
    pub(crate) fn id(&self) -> u64 {
        self.shared.id
    }

    /// Submits a command and waits for its reply.
    ///
    /// Fails synchronously, before any bytes are written, if `command` is empty
    /// ([`Error::TypeError`]) or the connection is already closed
    /// ([`Error::ConnectionClosed`]).
    pub async fn execute(&self, command: &str, args: &[&dyn Encodable]) -> Result<Reply> {
        if command.is_empty() {
            return Err(Error::TypeError);
        }
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let frame = encode_command(command, args);
        let (tx, rx) = oneshot::channel();

        {
            let mut guard = self.shared.write_side.lock().await;
            if let Err(e) = guard.writer.write_all(&frame).await {
                drop(guard);
                self.close();
                return Err(Error::Io(e));
            }
            guard.fifo.push_back(Pending {
                tx,
                command: command.to_string(),
            });
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionClosed),
        }
    }

    /// Sends `auth password`, coercing a successful reply to `true`.
    pub async fn auth(&self, password: &str) -> Result<bool> {
        self.execute("auth", &[&password]).await?;
        Ok(true)
    }

    /// Idempotent. Synchronously marks the connection closing — `is_closed()` observes this
    /// immediately, before the reader task is aborted or the FIFO drained — then stops the
    /// reader task and resolves every pending request with [`Error::ConnectionClosed`].
    pub fn close(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        begin_close(Arc::clone(&self.shared), FailCause::Cancelled);
    }

    /// Resolves once the connection has fully closed. Safe to drop: closing proceeds
    /// regardless of whether anything is awaiting this future.
    pub fn wait_closed(&self) -> impl std::future::Future<Output = ()> + 'static {
        let mut rx = self.shared.state_tx.subscribe();
        async move {
            while *rx.borrow() != ConnState::Closed {
                if rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }

    /// True once `close()` has been called or the reader task has observed EOF/an error.
    /// Observable synchronously: `close()` sets the closing flag before returning, so there is
    /// no window where a caller sequencing `close()` then `execute()` can slip past this check.
    pub fn is_closed(&self) -> bool {
        self.shared.closing.load(Ordering::SeqCst) || *self.shared.state_tx.borrow() != ConnState::Open
    }
}

async fn connect_tcp(endpoint: &Endpoint, reusable: bool) -> std::io::Result<tokio::net::TcpStream> {
    let mut addrs = tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port)).await?;
    let addr = addrs.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no addresses resolved")
    })?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(reusable)?;
    let stream = socket.connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

fn begin_close(shared: Arc<Shared>, cause: FailCause) {
    if let Some(handle) = shared.reader_handle.lock().unwrap().take() {
        handle.abort();
    }
    tokio::spawn(finish(shared, cause));
}

/// Drains the FIFO and flips the connection to `closed`. Linearized by `closing_started` so
/// that a caller-initiated `close()` racing with the reader task's own shutdown only runs once.
async fn finish(shared: Arc<Shared>, cause: FailCause) {
    shared.closing.store(true, Ordering::SeqCst);
    if shared
        .closing_started
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }

    let mut guard = shared.write_side.lock().await;
    let _ = guard.writer.shutdown().await;
    let fifo = std::mem::take(&mut guard.fifo);
    drop(guard);

    for pending in fifo {
        debug!(id = shared.id, command = %pending.command, "cancelling pending request");
        let err = match &cause {
            FailCause::Cancelled => Error::ConnectionClosed,
            FailCause::Protocol(msg) => Error::ProtocolError(msg.clone()),
        };
        let _ = pending.tx.send(Err(err));
    }

    let _ = shared.state_tx.send(ConnState::Closed);
}

async fn reader_loop(mut read_half: OwnedReadHalf, shared: Arc<Shared>, decode_to_text: bool) {
    let mut parser = ReplyParser::new(decode_to_text);
    let mut buf = vec![0u8; MAX_CHUNK];

    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => {
                debug!(id = shared.id, "connection reached EOF");
                finish(shared, FailCause::Cancelled).await;
                return;
            }
            Ok(n) => n,
            Err(e) => {
                error!(id = shared.id, error = %e, "reader task I/O error");
                finish(shared, FailCause::Cancelled).await;
                return;
            }
        };

        trace!(id = shared.id, bytes = n, "chunk read");
        parser.feed(&buf[..n]);

        loop {
            match parser.get() {
                Ok(Some(parsed)) => dispatch(&shared, parsed).await,
                Ok(None) => break,
                Err(e) => {
                    error!(id = shared.id, error = %e, "protocol error");
                    finish(shared, FailCause::Protocol(e.to_string())).await;
                    return;
                }
            }
        }
    }
}

async fn dispatch(shared: &Arc<Shared>, parsed: ParsedReply) {
    let pending = {
        let mut guard = shared.write_side.lock().await;
        guard.fifo.pop_front()
    };

    let Some(pending) = pending else {
        warn!(id = shared.id, "reply received with no pending request");
        return;
    };

    trace!(id = shared.id, command = %pending.command, "dispatching reply");
    let result = match parsed {
        ParsedReply::Success(reply) => Ok(reply),
        ParsedReply::Failure(kind) => Err(Error::ReplyError {
            kind,
            command: pending.command.clone(),
        }),
    };
    let _ = pending.tx.send(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::net::{TcpListener, TcpStream as RawTcpStream};

    /// A minimal in-process SSDB server: `set`/`get`/`del` against an in-memory map, speaking
    /// the exact wire format described in the protocol module.
    async fn create_test_server() -> Endpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve_one(stream));
            }
        });

        Endpoint::new(local.ip().to_string(), local.port())
    }

    /// Parses the client -> server request framing (`<size>\n<token>\n...\n\n`), the mirror
    /// image of [`crate::protocol::parser::ReplyParser`], just enough for the mock server below.
    #[derive(Default)]
    struct RequestParser {
        buf: Vec<u8>,
    }

    impl RequestParser {
        fn feed(&mut self, data: &[u8]) {
            self.buf.extend_from_slice(data);
        }

        fn get(&mut self) -> Option<Vec<Vec<u8>>> {
            let mut pos = 0;
            let mut tokens = Vec::new();
            loop {
                let newline = self.buf[pos..].iter().position(|&b| b == b'\n')? + pos;
                if newline == pos {
                    // blank line: request terminator
                    let total = newline + 1;
                    self.buf.drain(..total);
                    return Some(tokens);
                }
                let size: usize = std::str::from_utf8(&self.buf[pos..newline]).ok()?.parse().ok()?;
                let data_start = newline + 1;
                let data_end = data_start + size;
                if self.buf.len() < data_end + 1 {
                    return None;
                }
                tokens.push(self.buf[data_start..data_end].to_vec());
                pos = data_end + 1;
            }
        }
    }

    async fn serve_one(stream: RawTcpStream) {
        use tokio::io::AsyncReadExt;

        let mut store: HashMap<String, String> = HashMap::new();
        let (mut read_half, mut write_half) = stream.into_split();
        let mut parser = RequestParser::default();
        let mut buf = [0u8; 4096];

        loop {
            let n = match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            parser.feed(&buf[..n]);
            while let Some(request) = parser.get() {
                let reply = handle_request(&mut store, request);
                if write_half.write_all(&reply).await.is_err() {
                    return;
                }
            }
        }
    }

    fn handle_request(store: &mut HashMap<String, String>, request: Vec<Vec<u8>>) -> Vec<u8> {
        let tokens: Vec<String> = request
            .iter()
            .map(|t| String::from_utf8_lossy(t).to_string())
            .collect();
        match tokens.first().map(String::as_str) {
            Some("set") => {
                store.insert(tokens[1].clone(), tokens[2].clone());
                ok_reply(&[])
            }
            Some("get") => match store.get(&tokens[1]) {
                Some(v) => ok_reply(&[v.as_bytes()]),
                None => status_reply("not_found"),
            },
            Some("del") => {
                store.remove(&tokens[1]);
                ok_reply(&[])
            }
            Some("hset") => {
                store.insert(format!("{}/{}", tokens[1], tokens[2]), tokens[3].clone());
                ok_reply(&[])
            }
            Some("hget") => match store.get(&format!("{}/{}", tokens[1], tokens[2])) {
                Some(v) => ok_reply(&[v.as_bytes()]),
                None => status_reply("not_found"),
            },
            Some("hclear") => {
                let prefix = format!("{}/", tokens[1]);
                store.retain(|k, _| !k.starts_with(&prefix));
                ok_reply(&[])
            }
            Some("auth") => ok_reply(&[]),
            _ => status_reply("client_error"),
        }
    }

    fn ok_reply(tokens: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        write_block(b"ok", &mut out);
        for token in tokens {
            write_block(token, &mut out);
        }
        out.push(b'\n');
        out
    }

    fn status_reply(status: &str) -> Vec<u8> {
        let mut out = Vec::new();
        write_block(status.as_bytes(), &mut out);
        out.push(b'\n');
        out
    }

    fn write_block(data: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(data.len().to_string().as_bytes());
        out.push(b'\n');
        out.extend_from_slice(data);
        out.push(b'\n');
    }

    #[tokio::test]
    async fn basic_command_round_trip() {
        let endpoint = create_test_server().await;
        let conn = Connection::connect(&endpoint, ConnectOptions::new())
            .await
            .unwrap();

        conn.execute("set", &[&"a", &"1"]).await.unwrap();
        let reply = conn.execute("get", &[&"a"]).await.unwrap();
        assert_eq!(reply.first_str(), Some("1"));

        conn.execute("del", &[&"a"]).await.unwrap();
        let err = conn.execute("get", &[&"a"]).await.unwrap_err();
        match err {
            Error::ReplyError { kind, command } => {
                assert_eq!(kind, "not_found");
                assert_eq!(command, "get");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // A reply error must not be fatal: the connection is still usable afterwards.
        assert!(!conn.is_closed());
        conn.execute("set", &[&"a", &"2"]).await.unwrap();
        let reply = conn.execute("get", &[&"a"]).await.unwrap();
        assert_eq!(reply.first_str(), Some("2"));
    }

    #[tokio::test]
    async fn hash_command_round_trip() {
        let endpoint = create_test_server().await;
        let conn = Connection::connect(&endpoint, ConnectOptions::new())
            .await
            .unwrap();

        conn.execute("hset", &[&"hname", &"hkey", &"1"]).await.unwrap();
        let reply = conn.execute("hget", &[&"hname", &"hkey"]).await.unwrap();
        assert_eq!(reply.first_str(), Some("1"));

        conn.execute("hclear", &[&"hname"]).await.unwrap();
        let err = conn.execute("hget", &[&"hname", &"hkey"]).await.unwrap_err();
        assert!(matches!(err, Error::ReplyError { kind, .. } if kind == "not_found"));
    }

    #[tokio::test]
    async fn execute_rejects_empty_command_synchronously() {
        let endpoint = create_test_server().await;
        let conn = Connection::connect(&endpoint, ConnectOptions::new())
            .await
            .unwrap();
        assert!(matches!(conn.execute("", &[]).await, Err(Error::TypeError)));
    }

    #[tokio::test]
    async fn pipelined_requests_resolve_in_fifo_order() {
        let endpoint = create_test_server().await;
        let conn = Connection::connect(&endpoint, ConnectOptions::new())
            .await
            .unwrap();

        let a = conn.execute("set", &[&"k1", &"v1"]);
        let b = conn.execute("set", &[&"k2", &"v2"]);
        let (a, b) = tokio::join!(a, b);
        a.unwrap();
        b.unwrap();

        let v1 = conn.execute("get", &[&"k1"]).await.unwrap();
        let v2 = conn.execute("get", &[&"k2"]).await.unwrap();
        assert_eq!(v1.first_str(), Some("v1"));
        assert_eq!(v2.first_str(), Some("v2"));
    }

    #[tokio::test]
    async fn close_then_execute_is_rejected_synchronously() {
        let endpoint = create_test_server().await;
        let conn = Connection::connect(&endpoint, ConnectOptions::new())
            .await
            .unwrap();
        conn.close();
        // No await between close() and execute(): is_closed() must already observe the close
        // synchronously, before the spawned drain/shutdown task has had a chance to run.
        assert!(matches!(
            conn.execute("get", &[&"a"]).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn dropping_wait_closed_future_does_not_block_shutdown() {
        let endpoint = create_test_server().await;
        let conn = Connection::connect(&endpoint, ConnectOptions::new())
            .await
            .unwrap();

        conn.close();
        // Poll the future briefly, then drop it: closing must proceed regardless.
        let _ = tokio::time::timeout(Duration::from_millis(1), conn.wait_closed()).await;

        conn.wait_closed().await;
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn closing_with_a_request_in_flight_resolves_it_with_connection_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        let endpoint = Endpoint::new(local.ip().to_string(), local.port());

        // A server that accepts the handshake but never replies, so the request below is still
        // pending in the FIFO when we close the connection out from under it.
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut read_half, _write_half) = stream.into_split();
            let mut buf = [0u8; 64];
            loop {
                if read_half.read(&mut buf).await.unwrap_or(0) == 0 {
                    return;
                }
            }
        });

        let conn = Connection::connect(&endpoint, ConnectOptions::new())
            .await
            .unwrap();
        let pending = conn.execute("get", &[&"a"]);

        conn.close();
        let result = tokio::time::timeout(Duration::from_millis(200), pending)
            .await
            .expect("execute() must resolve promptly once the connection is closed");
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn malformed_bytes_fail_the_pending_request_and_close_the_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        let endpoint = Endpoint::new(local.ip().to_string(), local.port());

        // A server that accepts the handshake, waits for a request, then replies with bytes
        // that can never form a valid reply frame.
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut read_half, mut write_half) = stream.into_split();
            let mut buf = [0u8; 64];
            let _ = read_half.read(&mut buf).await;
            let _ = write_half.write_all(b"not-a-number\nok\n\n").await;
            let mut parked = [0u8; 1];
            let _ = read_half.read(&mut parked).await;
        });

        let conn = Connection::connect(&endpoint, ConnectOptions::new())
            .await
            .unwrap();
        let err = conn.execute("get", &[&"a"]).await.unwrap_err();
        assert!(matches!(err, Error::ProtocolError(_)));

        conn.wait_closed().await;
        assert!(conn.is_closed());
        assert!(matches!(
            conn.execute("get", &[&"a"]).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn connect_times_out_against_an_unresponsive_address() {
        let endpoint = Endpoint::new("10.255.255.1", 1);
        let options = ConnectOptions::new().with_connect_timeout(Duration::from_millis(50));
        let result = Connection::connect(&endpoint, options).await;
        assert!(matches!(result, Err(Error::Timeout) | Err(Error::Io(_))));
    }
}
