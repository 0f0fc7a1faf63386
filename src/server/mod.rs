//! Wire listener and connection sessions.
//!
//! One TCP listener serves two kinds of connections, told apart by
//! their first bytes: replication streams open with the
//! [`crate::repl::REPL_MAGIC`] preamble, everything else is a RESP
//! client session. A malformed command terminates only that command's
//! reply, never the connection.

pub mod dispatch;
pub mod info;

use crate::core::error::{StrataError, StrataResult};
use crate::repl::REPL_MAGIC;
use crate::resp::codec::{encode, ParseResult, RespParser};
use crate::resp::{Command, RespValue};
use crate::store::StoreInner;
use bytes::BytesMut;
use dispatch::SessionState;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

static CONNECTION_IDS: AtomicU64 = AtomicU64::new(1);

/// Handle to a running listener.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and wait for the accept loop to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

/// Bind and spawn the accept loop.
pub async fn start_server(inner: Arc<StoreInner>, addr: SocketAddr) -> StrataResult<ServerHandle> {
    let listener = TcpListener::bind(addr).await?;
    let bound = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(accept_loop(listener, inner, shutdown_rx));

    Ok(ServerHandle {
        addr: bound,
        shutdown_tx,
        task,
    })
}

async fn accept_loop(
    listener: TcpListener,
    inner: Arc<StoreInner>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let inner = Arc::clone(&inner);
                        let shutdown_rx = shutdown_rx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, inner, shutdown_rx).await {
                                tracing::debug!(peer = %peer, error = %e, "connection ended");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return;
                }
            }
        }
    }
}

/// Route a fresh connection to the replication path or a RESP session.
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    inner: Arc<StoreInner>,
    shutdown_rx: watch::Receiver<bool>,
) -> StrataResult<()> {
    stream.set_nodelay(true).ok();

    let mut preamble = [0u8; 4];
    loop {
        let n = stream.peek(&mut preamble).await?;
        if n == 0 {
            return Ok(()); // closed before sending anything
        }
        if preamble[..n] != REPL_MAGIC[..n] {
            // Definitely not a replication stream.
            return resp_session(stream, inner, shutdown_rx).await;
        }
        if n >= REPL_MAGIC.len() {
            // Consume the magic, then apply instructions until EOF.
            stream.read_exact(&mut preamble).await?;
            tracing::debug!(peer = %peer, "replication stream attached");
            crate::repl::apply::run_inbound(
                stream,
                Arc::clone(&inner.registry),
                Arc::clone(&inner.repl_stats),
            )
            .await;
            return Ok(());
        }
        // A true prefix of the magic: wait for the next bytes.
        tokio::task::yield_now().await;
    }
}

/// RESP client session loop.
async fn resp_session(
    mut stream: TcpStream,
    inner: Arc<StoreInner>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> StrataResult<()> {
    let id = CONNECTION_IDS.fetch_add(1, Ordering::Relaxed);
    let mut session = SessionState::new(id, inner.config.listener.max_pipeline_depth);
    let mut parser = RespParser::new();
    let mut buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            read = stream.read_buf(&mut buffer) => {
                match read {
                    Ok(0) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(StrataError::Io(e)),
                }

                // Drain every complete frame in the buffer (pipelined
                // clients send many at once).
                loop {
                    let parsed = parser.parse(&buffer);
                    match parsed {
                        ParseResult::Ok(value, consumed) => {
                            let _ = buffer.split_to(consumed);
                            let reply = match value {
                                RespValue::Array(items) => match Command::from_array(items) {
                                    Ok(command) => {
                                        let quit = command.name.eq_ignore_ascii_case("QUIT");
                                        let reply =
                                            dispatch::execute(&inner, &mut session, command).await;
                                        stream.write_all(&encode(&reply)).await?;
                                        if quit {
                                            return Ok(());
                                        }
                                        continue;
                                    }
                                    Err(e) => RespValue::Error(e),
                                },
                                _ => RespValue::err("expected command array"),
                            };
                            stream.write_all(&encode(&reply)).await?;
                        }
                        ParseResult::Incomplete => break,
                        ParseResult::Error(e) => {
                            // Report the protocol error and resync by
                            // dropping the unparseable input.
                            let reply = RespValue::err(format!("protocol error: {}", e));
                            stream.write_all(&encode(&reply)).await?;
                            buffer.clear();
                            break;
                        }
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return Ok(());
                }
            }
        }
    }
}
