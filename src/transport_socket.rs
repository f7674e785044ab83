//! # TransportSocket
//!
//! Turns a TCP stream into a full-duplex stream of [`Message`]s: frames
//! outgoing sends, reassembles incoming frames, correlates replies with
//! their calls, and notifies a [`SocketSink`] of lifecycle events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::codec::Reader;
use crate::error::{Error, Result};
use crate::message::{Message, MessageHeader, MessageType, HEADER_SIZE, MAGIC};
use crate::reactor::NetworkReactor;
use crate::url::Url;

/// Lifecycle callbacks a socket owner registers to observe connection state
/// and inbound traffic without the socket reaching back into its owner's
/// internals.
#[async_trait]
pub trait SocketSink: Send + Sync {
    async fn on_connected(&self) {}
    async fn on_disconnected(&self) {}
    /// Called for a Message that arrived with no matching pending call —
    /// i.e. an incoming Call or Event this socket's owner must dispatch.
    /// `socket` is the connection the message arrived on, so a handler that
    /// owes a Reply can send it back on the same connection.
    async fn on_ready_read(&self, _socket: &Arc<TransportSocket>, _msg: Message) {}
    async fn on_write_done(&self, _id: u32) {}
    async fn on_connection_error(&self, _err: &Error) {}
}

struct NoopSink;

#[async_trait]
impl SocketSink for NoopSink {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

type PendingTable = Mutex<HashMap<u32, oneshot::Sender<Message>>>;

/// A framed, full-duplex connection to one peer.
pub struct TransportSocket {
    write_half: Mutex<Option<tokio::net::tcp::OwnedWriteHalf>>,
    state: RwLock<ConnectionState>,
    next_id: AtomicU32,
    pending: PendingTable,
    sink: RwLock<Arc<dyn SocketSink>>,
}

impl TransportSocket {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            write_half: Mutex::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
            next_id: AtomicU32::new(1),
            pending: Mutex::new(HashMap::new()),
            sink: RwLock::new(Arc::new(NoopSink)),
        })
    }

    /// Open a TCP connection to `url` and spawn its read loop on `reactor`.
    pub async fn connect(reactor: &NetworkReactor, url: &Url) -> Result<Arc<Self>> {
        let socket = Self::new();
        *socket.state.write().await = ConnectionState::Connecting;

        let addr = url.to_socket_addr()?;
        let stream = timeout(Duration::from_secs(10), TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::ConnectionRefused => Error::ConnectRefused(url.to_string()),
                _ => Error::Io(err),
            })?;
        configure_stream(&stream);

        let (read_half, write_half) = stream.into_split();
        *socket.write_half.lock().await = Some(write_half);
        *socket.state.write().await = ConnectionState::Connected;

        let read_socket = socket.clone();
        reactor.spawn(async move {
            read_socket.run_read_loop(read_half).await;
        });

        socket.sink.read().await.on_connected().await;
        Ok(socket)
    }

    /// Wrap an already-accepted stream (server side): state starts Connected
    /// and the read loop is spawned immediately, per the directory/server
    /// accept contract.
    pub async fn from_accepted(reactor: &NetworkReactor, stream: TcpStream, sink: Arc<dyn SocketSink>) -> Arc<Self> {
        configure_stream(&stream);
        let socket = Self::new();
        *socket.sink.write().await = sink;
        let (read_half, write_half) = stream.into_split();
        *socket.write_half.lock().await = Some(write_half);
        *socket.state.write().await = ConnectionState::Connected;

        let read_socket = socket.clone();
        reactor.spawn(async move {
            read_socket.run_read_loop(read_half).await;
        });
        socket.sink.read().await.on_connected().await;
        socket
    }

    pub async fn set_sink(&self, sink: Arc<dyn SocketSink>) {
        *self.sink.write().await = sink;
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        matches!(*self.state.read().await, ConnectionState::Connected)
    }

    /// Enqueue a fully-formed message for transmission. Returns `Ok(false)`
    /// without sending if the socket is not connected.
    pub async fn send(&self, msg: &Message) -> Result<bool> {
        if !self.is_connected().await {
            return Ok(false);
        }
        let mut guard = self.write_half.lock().await;
        let Some(write_half) = guard.as_mut() else {
            return Ok(false);
        };
        let bytes = msg.to_bytes();
        if let Err(err) = write_half.write_all(&bytes).await {
            drop(guard);
            self.teardown().await;
            return Err(Error::Io(err));
        }
        drop(guard);
        self.sink.read().await.on_write_done(msg.header.id).await;
        Ok(true)
    }

    fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Assign an id, register a correlation slot, send, and wait for the
    /// matching reply with no deadline.
    pub async fn call(&self, service: u32, path: u32, function: u32, body: crate::buffer::Buffer) -> Result<Message> {
        self.call_timeout(service, path, function, body, None).await
    }

    pub async fn call_timeout(
        &self,
        service: u32,
        path: u32,
        function: u32,
        body: crate::buffer::Buffer,
        deadline: Option<Duration>,
    ) -> Result<Message> {
        let id = self.next_id();
        let msg = Message::call(id, service, path, function, body);

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
            if pending.len() == crate::defaults::CORRELATION_TABLE_WARN_THRESHOLD {
                warn!(pending = pending.len(), "correlation table growing large, peer may be stuck");
            }
        }

        if !self.send(&msg).await? {
            self.pending.lock().await.remove(&id);
            return Err(Error::Disconnected);
        }

        let wait = async {
            rx.await.map_err(|_| Error::Disconnected)
        };

        let reply = match deadline {
            Some(d) => match timeout(d, wait).await {
                Ok(result) => result,
                Err(_) => {
                    self.pending.lock().await.remove(&id);
                    return Err(Error::Timeout);
                }
            },
            None => wait.await,
        }?;

        if reply.header.kind == MessageType::Error {
            return Err(decode_remote_error(reply.body.as_slice()));
        }
        Ok(reply)
    }

    pub async fn disconnect(&self) {
        self.teardown().await;
    }

    async fn teardown(&self) {
        let already_down = {
            let mut state = self.state.write().await;
            let was = *state == ConnectionState::Disconnected;
            *state = ConnectionState::Disconnected;
            was
        };
        if already_down {
            return;
        }
        *self.write_half.lock().await = None;
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            // Receiver may already be gone (call timed out); ignore.
            let _ = tx;
        }
        drop(pending);
        self.sink.read().await.on_disconnected().await;
    }

    async fn run_read_loop(self: Arc<Self>, mut read_half: tokio::net::tcp::OwnedReadHalf) {
        let mut buf: Vec<u8> = Vec::with_capacity(4096);
        let mut chunk = [0u8; 4096];
        loop {
            match read_half.read(&mut chunk).await {
                Ok(0) => {
                    self.teardown().await;
                    return;
                }
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    if let Err(err) = self.drain_frames(&mut buf).await {
                        self.sink.read().await.on_connection_error(&err).await;
                    }
                }
                Err(err) => {
                    self.teardown().await;
                    self.sink
                        .read()
                        .await
                        .on_connection_error(&Error::Io(err))
                        .await;
                    return;
                }
            }
        }
    }

    /// Consume as many complete frames as `buf` contains, resyncing on bad
    /// magic within this same call instead of waiting for the next read.
    async fn drain_frames(self: &Arc<Self>, buf: &mut Vec<u8>) -> Result<()> {
        loop {
            if buf.len() < HEADER_SIZE {
                return Ok(());
            }
            let magic_pos = find_magic(buf);
            let Some(pos) = magic_pos else {
                // No complete magic in this buffer, but its last few bytes may
                // be the leading fragment of one split across reads. Keep
                // only enough of the tail to reassemble it on the next read
                // instead of discarding a straddling magic outright.
                let keep_from = buf.len().saturating_sub(HEADER_SIZE - 1);
                debug!(dropped = keep_from, "no magic found, retaining tail for next read");
                buf.drain(0..keep_from);
                return Ok(());
            };
            if pos > 0 {
                buf.drain(0..pos);
                if buf.len() < HEADER_SIZE {
                    return Ok(());
                }
            }

            let header = match MessageHeader::from_bytes(&buf[..HEADER_SIZE]) {
                Ok(h) => h,
                Err(_) => {
                    // Invalid header at a located magic: drop just the magic
                    // and keep scanning the same buffer for the next one.
                    buf.drain(0..4);
                    continue;
                }
            };

            let total = HEADER_SIZE + header.size as usize;
            if buf.len() < total {
                return Ok(());
            }
            let body = crate::buffer::Buffer::from_vec(buf[HEADER_SIZE..total].to_vec());
            buf.drain(0..total);

            let msg = Message { header, body };
            self.deliver(msg).await;
        }
    }

    async fn deliver(self: &Arc<Self>, msg: Message) {
        let id = msg.header.id;
        let matched = if matches!(msg.header.kind, MessageType::Reply | MessageType::Error) {
            self.pending.lock().await.remove(&id)
        } else {
            None
        };
        if let Some(tx) = matched {
            let _ = tx.send(msg);
        } else {
            let sink = self.sink.read().await.clone();
            sink.on_ready_read(self, msg).await;
        }
    }
}

/// Reconstruct the typed error a peer encoded in an Error reply's body
/// (leading wire code, then text). A body that doesn't follow that shape
/// falls back to `MethodFault` over its raw bytes.
fn decode_remote_error(body: &[u8]) -> Error {
    let mut r = Reader::new(body);
    match r.read_u32().and_then(|code| r.read_string().map(|text| (code, text))) {
        Ok((code, text)) => Error::wire_decode(code, text),
        Err(_) => Error::MethodFault(String::from_utf8_lossy(body).into_owned()),
    }
}

fn find_magic(buf: &[u8]) -> Option<usize> {
    let magic_bytes = MAGIC.to_le_bytes();
    buf.windows(4).position(|w| w == magic_bytes)
}

fn configure_stream(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock_ref = SockRef::from(stream);
    let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(30));
    let _ = sock_ref.set_tcp_keepalive(&keepalive);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_magic_locates_offset() {
        let mut buf = vec![0xff, 0xff, 0xff];
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&[1, 2, 3]);
        assert_eq!(find_magic(&buf), Some(3));
    }

    #[test]
    fn find_magic_returns_none_when_absent() {
        let buf = vec![1, 2, 3, 4, 5];
        assert_eq!(find_magic(&buf), None);
    }

    #[tokio::test]
    async fn drain_frames_resyncs_past_corrupt_header_in_one_pass() {
        let socket = TransportSocket::new();
        let mut buf = Vec::new();
        // Stray magic whose header carries an unsupported version, followed
        // immediately (no extra poll) by a valid, complete event frame.
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&[0u8; 8]); // id, size
        buf.extend_from_slice(&0xffffu16.to_le_bytes()); // bogus version
        buf.extend_from_slice(&[0u8; 14]); // kind, reserved, service, path, function
        let good = Message::event(1, 0, 1, crate::buffer::Buffer::from_vec(vec![7]));
        buf.extend_from_slice(&good.to_bytes());

        socket.drain_frames(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn disconnected_socket_send_returns_false() {
        let socket = TransportSocket::new();
        let msg = Message::event(1, 0, 1, crate::buffer::Buffer::new());
        assert_eq!(socket.send(&msg).await.unwrap(), false);
    }

    #[tokio::test]
    async fn drain_frames_retains_split_magic_across_reads() {
        let socket = TransportSocket::new();
        let good = Message::event(1, 0, 5, crate::buffer::Buffer::from_vec(vec![1, 2, 3]));
        let full = good.to_bytes();

        // Only the first 3 bytes of the magic arrive in this read.
        let mut buf = vec![0u8; 40];
        buf.extend_from_slice(&full[..3]);
        socket.drain_frames(&mut buf).await.unwrap();
        assert_eq!(buf.len(), HEADER_SIZE - 1, "split magic must survive a magic-free read");
        assert_eq!(&buf[buf.len() - 3..], &full[..3]);

        // The rest of the frame arrives on the next read.
        buf.extend_from_slice(&full[3..]);
        socket.drain_frames(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn remote_error_reply_decodes_to_its_original_kind() {
        let (code, text) = Error::NotFound("echo".into()).wire_encode();
        let mut body = crate::buffer::Buffer::new();
        let mut w = crate::codec::Writer::new(&mut body);
        w.write_u32(code);
        w.write_string(&text);
        let err = decode_remote_error(body.as_slice());
        assert!(matches!(err, Error::NotFound(name) if name == "echo"));
    }

    #[test]
    fn malformed_error_body_falls_back_to_method_fault() {
        let err = decode_remote_error(b"not a valid encoded error");
        assert!(matches!(err, Error::MethodFault(_)));
    }
}
