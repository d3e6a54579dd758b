//! TCP accept loop and per-connection tasks.
//!
//! ```text
//!            +-----------+   lines    +------------+
//! socket --> | read loop | ---------> | Dispatcher |
//!            +-----------+            +------------+
//!                  | reply                  | acquire / release
//!                  v                        v
//!             [ outbox ] <--- push --- ReservationArbiter (via registry)
//!                  |
//!            +------------+
//!            | write loop | --> socket
//!            +------------+
//! ```
//!
//! Each connection owns a bounded outbox drained by its writer task. The
//! read loop waits for room before reading further, so a client that stops
//! reading its replies stops being read. Pushes never wait and are dropped
//! when the outbox is full.
//!
//! A connection idle for longer than the idle timeout is closed, unless it
//! holds the broker reservation: closing it would hand the session back
//! while the client may still be using it.

use crate::dispatch::Dispatcher;
use crate::protocol::{ErrorCode, ServerMessage};
use crate::registry::{ConnectionRegistry, Outbox};
use basalt_arbiter::ClientId;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub max_line_bytes: usize,
    pub idle_timeout: Duration,
    /// Messages queued per connection before the read loop waits.
    pub outbox_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: 64 * 1024,
            idle_timeout: Duration::from_secs(60),
            outbox_capacity: 256,
        }
    }
}

pub struct GatewayServer {
    dispatcher: Arc<Dispatcher>,
    registry: Arc<ConnectionRegistry>,
    cfg: ServerConfig,
}

impl GatewayServer {
    /// `registry` must be the notifier the dispatcher's arbiter pushes
    /// through, so release requests reach the sockets this server owns.
    pub fn new(dispatcher: Arc<Dispatcher>, registry: Arc<ConnectionRegistry>, cfg: ServerConfig) -> Self {
        Self {
            dispatcher,
            registry,
            cfg,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Accepts connections until the listener fails. Cancel the future to
    /// stop accepting; live connections keep running on their own tasks.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        info!(addr = %listener.local_addr()?, "gateway listening");
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    // per-connection failures (e.g. reset before accept) are not fatal
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };
            let server = Arc::clone(&self);
            tokio::spawn(async move { server.serve_connection(stream, peer).await });
        }
    }

    async fn serve_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "set_nodelay failed");
        }
        let (client, outbox, rx) = self.registry.register(self.cfg.outbox_capacity);
        info!(%client, %peer, "client connected");

        let (rd, wr) = stream.into_split();
        let writer = tokio::spawn(write_loop(wr, rx));

        self.read_loop(client, rd, &outbox).await;

        // the writer ends once both senders are gone and the queue is drained
        self.registry.unregister(client);
        drop(outbox);
        self.dispatcher.client_disconnected(client);
        if let Err(e) = writer.await {
            warn!(%client, error = %e, "writer task failed");
        }
        info!(%client, %peer, "client disconnected");
    }

    async fn read_loop(&self, client: ClientId, mut rd: OwnedReadHalf, outbox: &Outbox) {
        let mut codec = LinesCodec::new_with_max_length(self.cfg.max_line_bytes);
        let mut buf = BytesMut::with_capacity(4096);

        loop {
            loop {
                let sent = match codec.decode(&mut buf) {
                    Ok(Some(line)) => self.reply(client, &line, outbox).await,
                    Ok(None) => break,
                    Err(e) => self.reject_frame(client, e, outbox).await,
                };
                if !sent {
                    debug!(%client, "writer gone, stop reading");
                    return;
                }
            }

            match tokio::time::timeout(self.cfg.idle_timeout, rd.read_buf(&mut buf)).await {
                Err(_) if self.holds_reservation(client) => {
                    debug!(%client, "idle holder kept open");
                }
                Err(_) => {
                    info!(%client, timeout_s = self.cfg.idle_timeout.as_secs(), "closing idle connection");
                    return;
                }
                Ok(Ok(0)) => break,
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    debug!(%client, error = %e, "read failed");
                    return;
                }
            }
        }

        // peer closed; a final line may lack its newline
        match codec.decode_eof(&mut buf) {
            Ok(Some(line)) => {
                self.reply(client, &line, outbox).await;
            }
            Ok(None) => {}
            Err(e) => {
                self.reject_frame(client, e, outbox).await;
            }
        }
    }

    fn holds_reservation(&self, client: ClientId) -> bool {
        self.dispatcher.arbiter().snapshot().state.holder() == Some(client)
    }

    /// Handles one line and queues the reply, waiting for room. False once
    /// the writer is gone.
    async fn reply(&self, client: ClientId, line: &str, outbox: &Outbox) -> bool {
        if line.trim().is_empty() {
            return true;
        }
        let msg = self.dispatcher.handle_line(client, line);
        outbox.send(msg).await.is_ok()
    }

    async fn reject_frame(&self, client: ClientId, err: LinesCodecError, outbox: &Outbox) -> bool {
        let message = match err {
            LinesCodecError::MaxLineLengthExceeded => {
                format!("line exceeds {} bytes", self.cfg.max_line_bytes)
            }
            LinesCodecError::Io(e) => format!("invalid line: {e}"),
        };
        warn!(%client, reason = %message, "frame rejected");
        outbox
            .send(ServerMessage::error(None, ErrorCode::BadRequest, message))
            .await
            .is_ok()
    }
}

async fn write_loop(mut wr: OwnedWriteHalf, mut rx: mpsc::Receiver<ServerMessage>) {
    while let Some(msg) = rx.recv().await {
        let mut line = match serde_json::to_vec(&msg) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to encode server message");
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = wr.write_all(&line).await {
            debug!(error = %e, "write failed");
            break;
        }
    }
    let _ = wr.shutdown().await;
}
