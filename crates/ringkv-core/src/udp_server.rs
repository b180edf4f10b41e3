//! Single UDP socket per process, one dispatch loop (§4.4).
//!
//! Grounded on the teacher's `udp::processer` loop: `recv_from` into a
//! reusable buffer, hand the datagram to a handler, and send back whatever
//! reply it produces. The handler runs on its own spawned task so the
//! dispatch loop is never blocked by protocol work, the async equivalent
//! of the spec's worker-pool requirement.

use ringkv_codec::buffer::MAX_UDP_PAYLOAD;
use ringkv_codec::{Buffer, Message};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// A handler produces an optional reply buffer to send back to the
/// datagram's source (§4.4 step 3).
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: Message, from: SocketAddr) -> Option<Vec<u8>>;
}

/// Thin wrapper around the shared send half. The kernel already serializes
/// concurrent `send_to` calls on one socket; this type exists so the
/// choke point is explicit and future transports/metrics hooks have one
/// place to hang off of (§4.4 "send operations ... are serialized").
#[derive(Clone)]
pub struct SendGuard {
    socket: Arc<UdpSocket>,
}

impl SendGuard {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }

    pub async fn send_to(&self, bytes: &[u8], addr: SocketAddr) {
        if let Err(e) = self.socket.send_to(bytes, addr).await {
            log::warn!("udp send to {addr} failed: {e}");
        }
    }
}

/// Runs the receive loop until the socket errors fatally. Each accepted
/// datagram is decoded and dispatched on its own spawned task; handler
/// panics are isolated to that task.
pub async fn run(socket: Arc<UdpSocket>, handler: Arc<dyn MessageHandler>) -> std::io::Result<()> {
    let send = SendGuard::new(Arc::clone(&socket));
    let local_addr = socket.local_addr()?;
    let mut raw = vec![0u8; MAX_UDP_PAYLOAD];

    loop {
        let (size, from) = match socket.recv_from(&mut raw).await {
            Ok(pair) => pair,
            Err(e) if e.kind() == ErrorKind::ConnectionReset => continue,
            Err(e) => return Err(e),
        };

        log::trace!("udp recv: {size} bytes from {from} on {local_addr}");

        let mut buf = Buffer::from_bytes(&raw[..size]);
        let message = match Message::decode(&mut buf) {
            Ok(Some(message)) => message,
            Ok(None) => {
                log::warn!("truncated datagram from {from}, dropping");
                continue;
            }
            Err(e) => {
                log::warn!("malformed datagram from {from}: {e}");
                continue;
            }
        };

        let handler = Arc::clone(&handler);
        let send = send.clone();
        tokio::task::spawn(async move {
            if let Some(reply) = handler.handle(message, from).await {
                send.send_to(&reply, from).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringkv_codec::message::Kind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEchoHandler {
        seen: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl MessageHandler for CountingEchoHandler {
        async fn handle(&self, message: Message, _from: SocketAddr) -> Option<Vec<u8>> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            let mut buf = Buffer::with_capacity(MAX_UDP_PAYLOAD);
            message.encode(&mut buf).unwrap();
            Some(buf.written().to_vec())
        }
    }

    #[tokio::test]
    async fn a_datagram_round_trips_through_the_dispatch_loop() {
        let server_socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let server_addr = server_socket.local_addr().unwrap();
        let handler = Arc::new(CountingEchoHandler { seen: AtomicUsize::new(0) });

        let handler_clone = Arc::clone(&handler);
        tokio::spawn(run(server_socket, handler_clone));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let msg = Message::new(Kind::Test, 1, "client", 0);
        let mut buf = Buffer::with_capacity(MAX_UDP_PAYLOAD);
        msg.encode(&mut buf).unwrap();
        client.send_to(buf.written(), server_addr).await.unwrap();

        let mut reply = vec![0u8; MAX_UDP_PAYLOAD];
        let (n, _) = tokio::time::timeout(std::time::Duration::from_secs(1), client.recv_from(&mut reply))
            .await
            .expect("reply timed out")
            .unwrap();

        let mut reply_buf = Buffer::from_bytes(&reply[..n]);
        let decoded = Message::decode(&mut reply_buf).unwrap().unwrap();
        assert_eq!(decoded.envelope.kind, Kind::Test);
        assert_eq!(handler.seen.load(Ordering::SeqCst), 1);
    }
}
