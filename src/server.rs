//! Server wiring: listener, bounded queue, worker pool
//!
//! One listener task feeds a bounded FIFO; a small fixed pool of
//! symmetric, stateless workers drains it, one consumer per message.
//! Ordering is FIFO through the queue; unrelated dialogs may be
//! processed in parallel.

use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::b2bua::Engine;
use crate::config::Config;
use crate::error::{SipError, SipResult};
use crate::location::LocationTable;
use crate::transport::{run_listener, InboundMessage, UdpSender};

type SharedReceiver = Arc<Mutex<mpsc::Receiver<InboundMessage>>>;

pub struct Server {
    engine: Arc<Engine>,
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> SipResult<Self> {
        let advertised = config.advertised_addr()?;
        let engine = Arc::new(Engine::with_roster(
            advertised,
            Arc::new(UdpSender),
            LocationTable::new(),
            config.max_calls,
        ));
        Ok(Self { engine, config })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Bind the listener, start the workers, and serve until ctrl-c.
    /// On shutdown the listener stops first and the workers drain the
    /// queue before exiting.
    pub async fn run(&self) -> SipResult<()> {
        let listen = self.config.listen_addr()?;
        let sock = UdpSocket::bind(listen)
            .await
            .map_err(|e| SipError::transport(listen.to_string(), e.to_string()))?;

        info!(
            listen = %listen,
            advertised = %self.engine.server_addr(),
            users = self.engine.locations().len(),
            workers = self.config.workers,
            queue = self.config.queue_capacity,
            calls = self.config.max_calls,
            "tinysip listening"
        );

        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let rx: SharedReceiver = Arc::new(Mutex::new(rx));

        let listener = tokio::spawn(run_listener(sock, tx));

        let mut workers = Vec::with_capacity(self.config.workers);
        for id in 0..self.config.workers {
            workers.push(tokio::spawn(worker_loop(id, self.engine.clone(), rx.clone())));
        }

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| SipError::transport("signal".to_string(), e.to_string()))?;
        info!("shutting down");

        // Stop accepting datagrams; the channel closes when the
        // listener task is gone and the workers drain what is queued.
        listener.abort();
        for worker in workers {
            let _ = worker.await;
        }
        Ok(())
    }
}

/// One symmetric worker: block on the queue, run the engine, repeat
async fn worker_loop(id: usize, engine: Arc<Engine>, rx: SharedReceiver) {
    loop {
        let message = { rx.lock().await.recv().await };
        match message {
            Some(msg) => engine.handle_datagram(&msg.payload, msg.src).await,
            None => break,
        }
    }
    debug!(worker = id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[tokio::test]
    async fn test_workers_consume_each_message_once() {
        let sender = Arc::new(crate::transport::CaptureSender::new());
        let engine = Arc::new(Engine::new(
            "192.168.1.1:5060".parse().unwrap(),
            sender.clone() as Arc<dyn crate::transport::Outbound>,
        ));
        let (tx, rx) = mpsc::channel(10);
        let rx: SharedReceiver = Arc::new(Mutex::new(rx));

        let workers: Vec<_> = (0..3)
            .map(|id| tokio::spawn(worker_loop(id, engine.clone(), rx.clone())))
            .collect();

        let register = "REGISTER sip:example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP 10.0.0.5:5062;branch=z9hG4bK1\r\n\
From: <sip:1001@example.com>;tag=r1\r\n\
To: <sip:1001@example.com>\r\n\
Call-ID: reg-worker\r\n\
CSeq: 1 REGISTER\r\n\
Contact: <sip:1001@10.0.0.5:5062>\r\n\
\r\n";
        for _ in 0..4 {
            tx.send(InboundMessage {
                payload: register.as_bytes().to_vec(),
                src: "10.0.0.5:5062".parse().unwrap(),
            })
            .await
            .unwrap();
        }
        drop(tx);
        for worker in workers {
            worker.await.unwrap();
        }

        // Four REGISTERs in, exactly four 200 OKs out.
        assert_eq!(sender.sent_count(), 4);
    }

    #[test]
    fn test_server_construction() {
        let cfg = Config::parse_from(["tinysip", "--listen", "127.0.0.1:5080"]);
        let server = Server::new(cfg).unwrap();
        assert_eq!(server.engine().server_addr().port(), 5080);
    }

    #[test]
    fn test_max_calls_flag_sizes_the_call_map() {
        let cfg = Config::parse_from(["tinysip", "--max-calls", "2"]);
        let server = Server::new(cfg).unwrap();
        assert_eq!(server.engine().calls().capacity(), 2);
    }
}
