//! TCP accept loop and per-connection transport tasks.
//!
//! Each accepted connection gets a reader task that feeds decoded
//! frames through a [`Session`] and a writer task that drains the
//! connection's outbound queue. Replies and server-initiated pushes
//! share the same queue, so write ordering is preserved.

use std::net::SocketAddr;
use std::sync::Arc;

use actigraph_auth::TokenCodec;
use actigraph_store::ActivityStore;
use actigraph_wire::ServerMessage;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::{ServerError, ServerResult};
use crate::registry::Registry;
use crate::session::Session;

/// Handle for requesting server shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Signals the server to stop accepting and close its connections.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// The activity collection server.
pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
    tokens: Arc<TokenCodec>,
    store: Arc<dyn ActivityStore>,
    shutdown: watch::Receiver<bool>,
}

impl Server {
    /// Binds the listener and returns the server plus its shutdown handle.
    pub async fn bind(
        addr: &str,
        tokens: Arc<TokenCodec>,
        store: Arc<dyn ActivityStore>,
    ) -> ServerResult<(Self, ShutdownHandle)> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::BindFailed {
                addr: addr.to_string(),
                source,
            })?;

        let (tx, rx) = watch::channel(false);
        let server = Self {
            listener,
            registry: Arc::new(Registry::new()),
            tokens,
            store,
            shutdown: rx,
        };
        Ok((server, ShutdownHandle { tx }))
    }

    /// Returns the bound address. Useful when binding to port 0.
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Returns the shared connection registry.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Runs the accept loop until shutdown is signalled.
    pub async fn run(mut self) -> ServerResult<()> {
        info!(addr = %self.local_addr()?, "server listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "connection accepted");
                            let registry = Arc::clone(&self.registry);
                            let tokens = Arc::clone(&self.tokens);
                            let store = Arc::clone(&self.store);
                            let shutdown = self.shutdown.clone();
                            tokio::spawn(async move {
                                handle_connection(stream, registry, tokens, store, shutdown).await;
                            });
                        }
                        Err(e) => {
                            // Transient accept failures (EMFILE and the
                            // like) should not take the server down.
                            error!(error = %e, "accept failed");
                        }
                    }
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!("shutdown requested, stopping accept loop");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Drives one connection: reads frames, runs the session, writes replies.
async fn handle_connection(
    stream: TcpStream,
    registry: Arc<Registry>,
    tokens: Arc<TokenCodec>,
    store: Arc<dyn ActivityStore>,
    mut shutdown: watch::Receiver<bool>,
) {
    let peer = stream.peer_addr().ok();
    let (mut reader, mut writer) = stream.into_split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut session = Session::new(registry, tokens, store, tx.clone());

    // Writer task: drains the outbound queue. Ends when every sender
    // (the reader loop's and any registry copy) is gone.
    let writer_task = tokio::spawn(async move {
        let mut out = BytesMut::new();
        while let Some(message) = rx.recv().await {
            out.clear();
            match message.to_frame() {
                Ok(frame) => frame.encode(&mut out),
                Err(e) => {
                    error!(error = %e, "failed to encode outbound message");
                    continue;
                }
            }
            if let Err(e) = writer.write_all(&out).await {
                debug!(error = %e, "write failed, closing");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut buf = BytesMut::with_capacity(8 * 1024);
    'reading: loop {
        tokio::select! {
            read = reader.read_buf(&mut buf) => {
                match read {
                    Ok(0) => break 'reading,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(?peer, error = %e, "read failed");
                        break 'reading;
                    }
                }

                loop {
                    match actigraph_wire::Frame::decode(&mut buf) {
                        Ok(Some(frame)) => {
                            let reply = session.on_frame(&frame);
                            if tx.send(reply).is_err() {
                                break 'reading;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(?peer, error = %e, "unrecoverable frame error, closing");
                            break 'reading;
                        }
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break 'reading;
                }
            }
        }
    }

    session.on_close();
    // The session keeps its own outbound sender; every copy must drop
    // before the writer's queue closes and it can exit.
    drop(session);
    drop(tx);
    let _ = writer_task.await;
    debug!(?peer, "connection closed");
}
