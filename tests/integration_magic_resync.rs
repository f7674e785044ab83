use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use qi_mesh::{Buffer, Message, NetworkReactor, SocketSink, TransportServer, TransportSocket, Url};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

struct CaptureSink {
    seen: Arc<tokio::sync::Notify>,
    got_event: AtomicBool,
}

#[async_trait]
impl SocketSink for CaptureSink {
    async fn on_ready_read(&self, _socket: &Arc<TransportSocket>, msg: Message) {
        if msg.header.function == 77 {
            self.got_event.store(true, Ordering::SeqCst);
            self.seen.notify_one();
        }
    }
}

#[tokio::test]
async fn stray_magic_burst_is_resynced_without_dropping_the_next_frame() {
    let reactor = Arc::new(NetworkReactor::start().unwrap());
    let notify = Arc::new(tokio::sync::Notify::new());
    let sink = Arc::new(CaptureSink {
        seen: notify.clone(),
        got_event: AtomicBool::new(false),
    });
    let server = TransportServer::listen(reactor.clone(), &Url::new("127.0.0.1", 0), sink.clone())
        .await
        .unwrap();
    let endpoint = server.endpoints()[0].clone();

    let mut client = TcpStream::connect(endpoint.to_socket_addr().unwrap()).await.unwrap();

    // Three stray magics with garbage headers, back to back, then one
    // complete, valid event frame. All of this must resync within a single
    // read without the accept side ever closing the connection.
    const MAGIC: u32 = 0x42dead42;
    let mut junk = Vec::new();
    for _ in 0..3 {
        junk.extend_from_slice(&MAGIC.to_le_bytes());
        junk.extend_from_slice(&[0xffu8; 24]); // bogus version/type/etc.
    }
    let good = Message::event(1, 0, 77, Buffer::from_vec(vec![9, 9, 9]));
    junk.extend_from_slice(&good.to_bytes());

    client.write_all(&junk).await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), notify.notified())
        .await
        .expect("valid frame after stray magics should still be delivered");
}
