//! UDP transport
//!
//! One listener socket feeds the inbound queue; every outbound message
//! goes out on a fresh ephemeral socket that is closed after the send.
//! The sender side is a trait so the signaling engine can be exercised
//! in tests without touching the network.

use std::net::SocketAddr;
use std::sync::Mutex;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{SipError, SipResult};
use crate::limits::MAX_DATAGRAM;

/// One inbound datagram plus its source transport address
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub payload: Vec<u8>,
    pub src: SocketAddr,
}

/// One outbound SIP message and its destination
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub payload: String,
    pub dest: SocketAddr,
}

impl Outgoing {
    pub fn new(payload: String, dest: SocketAddr) -> Self {
        Self { payload, dest }
    }
}

/// Outbound message sink
#[async_trait::async_trait]
pub trait Outbound: Send + Sync {
    async fn send(&self, payload: &str, dest: SocketAddr) -> SipResult<()>;
}

/// Real sender: opens a fresh ephemeral UDP socket per message
pub struct UdpSender;

#[async_trait::async_trait]
impl Outbound for UdpSender {
    async fn send(&self, payload: &str, dest: SocketAddr) -> SipResult<()> {
        let sock = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| SipError::transport(dest.to_string(), e.to_string()))?;
        sock.send_to(payload.as_bytes(), dest)
            .await
            .map_err(|e| SipError::transport(dest.to_string(), e.to_string()))?;
        Ok(())
    }
}

/// Capturing sender used by tests and benchmarks: records every message
/// instead of putting it on the wire
#[derive(Default)]
pub struct CaptureSender {
    sent: Mutex<Vec<Outgoing>>,
}

impl CaptureSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything captured so far, in send order
    pub fn take(&self) -> Vec<Outgoing> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Outbound for CaptureSender {
    async fn send(&self, payload: &str, dest: SocketAddr) -> SipResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Outgoing::new(payload.to_string(), dest));
        Ok(())
    }
}

/// Listener loop: read datagrams into a fixed buffer and enqueue them.
/// Empty datagrams are dropped silently; a full queue drops the message
/// with a warning. Receive errors never stop the loop.
pub async fn run_listener(sock: UdpSocket, queue: mpsc::Sender<InboundMessage>) {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let (len, src) = match sock.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, "udp receive failed, continuing");
                continue;
            }
        };
        if len == 0 {
            continue;
        }
        let message = InboundMessage {
            payload: buf[..len].to_vec(),
            src,
        };
        if queue.try_send(message).is_err() {
            warn!(%src, "inbound queue full, dropping datagram");
        } else {
            debug!(%src, len, "datagram queued");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_sender_records_in_order() {
        let sender = CaptureSender::new();
        let dest: SocketAddr = "10.0.0.1:5060".parse().unwrap();

        sender.send("first", dest).await.unwrap();
        sender.send("second", dest).await.unwrap();

        let sent = sender.take();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].payload, "first");
        assert_eq!(sent[1].payload, "second");
        assert_eq!(sender.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_listener_enqueues_datagram() {
        let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = sock.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(2);

        tokio::spawn(run_listener(sock, tx));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"OPTIONS sip:x@y SIP/2.0\r\n\r\n", addr).await.unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.payload, b"OPTIONS sip:x@y SIP/2.0\r\n\r\n");
        assert_eq!(msg.src, client.local_addr().unwrap());
    }
}
