//! Push replication: broadcast local mutations to subscribed peers.
//!
//! Each peer owns an independent, ordered queue (single producer: the
//! local mutation path; single consumer: the peer's send loop).
//! Delivery is asynchronous and best-effort: a failed send counts in
//! `instructions_failed` and never rolls back the local write.
//! Backpressure surfaces as queue depth, not as blocking the writer.

use crate::engine::space::MutationObserver;
use crate::engine::value::ValueRepr;
use crate::repl::instruction::{Instruction, REPL_MAGIC};
use crate::repl::stats::ReplStats;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Peer {
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<Instruction>,
    task: JoinHandle<()>,
}

/// Fan-out point for the push replication role.
pub struct Publisher {
    peers: RwLock<Vec<Peer>>,
    stats: Arc<ReplStats>,
}

impl Publisher {
    pub fn new(stats: Arc<ReplStats>) -> Self {
        Self {
            peers: RwLock::new(Vec::new()),
            stats,
        }
    }

    /// Subscribe a peer; its send loop starts immediately.
    pub fn subscribe(&self, addr: SocketAddr) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::clone(&self.stats);
        let task = tokio::spawn(send_loop(addr, rx, stats));
        self.peers.write().push(Peer { addr, tx, task });
        tracing::info!(peer = %addr, "publish subscriber added");
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    pub fn peer_addrs(&self) -> Vec<SocketAddr> {
        self.peers.read().iter().map(|p| p.addr).collect()
    }

    /// Disconnect every peer and stop their send loops.
    pub fn shutdown(&self) {
        let mut peers = self.peers.write();
        for peer in peers.drain(..) {
            peer.task.abort();
        }
    }

    fn broadcast(&self, instruction: Instruction) {
        let peers = self.peers.read();
        for peer in peers.iter() {
            if peer.tx.send(instruction.clone()).is_ok() {
                self.stats.enqueue();
            } else {
                self.stats.instructions_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl MutationObserver for Publisher {
    fn key_added(&self, space: &str, key: &[u8], value: ValueRepr, expires_at: Option<u64>) {
        self.stats.insert_requests.fetch_add(1, Ordering::Relaxed);
        if self.peer_count() == 0 {
            return;
        }
        self.broadcast(Instruction::KeyAdd {
            space: space.to_string(),
            key: key.to_vec(),
            value,
            expires_at,
        });
    }

    fn key_removed(&self, space: &str, key: &[u8]) {
        self.stats.remove_requests.fetch_add(1, Ordering::Relaxed);
        if self.peer_count() == 0 {
            return;
        }
        self.broadcast(Instruction::KeyRemove {
            space: space.to_string(),
            key: key.to_vec(),
        });
    }
}

/// Per-peer send loop. Connects lazily, re-connects with a fresh
/// stream after failure, and drops (while counting) instructions it
/// cannot deliver: at-most-once, no replay.
async fn send_loop(
    addr: SocketAddr,
    mut rx: mpsc::UnboundedReceiver<Instruction>,
    stats: Arc<ReplStats>,
) {
    let mut stream: Option<TcpStream> = None;

    while let Some(instruction) = rx.recv().await {
        stats.dequeue();

        let frame = match instruction.encode_frame() {
            Ok(frame) => frame,
            Err(e) => {
                stats.instructions_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(peer = %addr, error = %e, "instruction encode failed");
                continue;
            }
        };

        if stream.is_none() {
            stream = open_stream(addr, &stats).await;
        }

        let delivered = match stream.as_mut() {
            Some(s) => s.write_all(&frame).await.is_ok(),
            None => false,
        };

        if delivered {
            stats
                .bytes_sent
                .fetch_add(frame.len() as u64, Ordering::Relaxed);
        } else {
            // Dead connection: report it, drop the instruction, and
            // try a fresh stream for the next one.
            stats.instructions_failed.fetch_add(1, Ordering::Relaxed);
            if stream.take().is_some() {
                tracing::warn!(peer = %addr, "publish connection lost");
            }
        }
    }
}

async fn open_stream(addr: SocketAddr, stats: &ReplStats) -> Option<TcpStream> {
    match tokio::time::timeout(Duration::from_secs(5), TcpStream::connect(addr)).await {
        Ok(Ok(mut stream)) => {
            let _ = stream.set_nodelay(true);
            match stream.write_all(&REPL_MAGIC).await {
                Ok(_) => {
                    stats
                        .bytes_sent
                        .fetch_add(REPL_MAGIC.len() as u64, Ordering::Relaxed);
                    Some(stream)
                }
                Err(_) => None,
            }
        }
        _ => {
            tracing::debug!(peer = %addr, "publish connect failed");
            None
        }
    }
}
