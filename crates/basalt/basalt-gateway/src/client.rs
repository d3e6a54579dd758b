//! Async NDJSON client.
//!
//! One background task reads every server line. Replies carrying an id go
//! to the caller awaiting that id; everything else (release pushes, errors
//! for lines the server could not parse) goes to the unsolicited channel
//! returned by [`GatewayClient::connect`].

use crate::error::ClientError;
use crate::protocol::{ErrorCode, Op, PROTOCOL_VERSION, ServerMessage};
use basalt_quotes::{QuoteView, SnapshotEpoch};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, warn};

/// Waiters by request id; `None` once the connection is gone.
type Pending = Arc<Mutex<Option<HashMap<String, oneshot::Sender<ServerMessage>>>>>;

/// Status field of acquire/release replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationReply {
    Acquired,
    Released,
    Denied { reason: String },
}

pub struct GatewayClient {
    sink: tokio::sync::Mutex<FramedWrite<OwnedWriteHalf, LinesCodec>>,
    pending: Pending,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl GatewayClient {
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerMessage>), ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (rd, wr) = stream.into_split();

        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));
        let (unsolicited_tx, unsolicited_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(rd, Arc::clone(&pending), unsolicited_tx));

        let client = Self {
            sink: tokio::sync::Mutex::new(FramedWrite::new(wr, LinesCodec::new())),
            pending,
            next_id: AtomicU64::new(1),
            reader,
        };
        Ok((client, unsolicited_rx))
    }

    /// Writes `line` as-is. Replies to it, if any, arrive on the unsolicited
    /// channel unless it carries an id this client is waiting on.
    pub async fn send_raw(&self, line: &str) -> Result<(), ClientError> {
        self.sink.lock().await.send(line).await?;
        Ok(())
    }

    /// Sends a request and waits for the message carrying its id.
    pub async fn request(&self, op: &str, data: Option<Value>) -> Result<ServerMessage, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let mut req = json!({ "v": PROTOCOL_VERSION, "id": id, "type": op });
        if let Some(data) = data {
            req["data"] = data;
        }
        let line = serde_json::to_string(&req)?;

        let (tx, rx) = oneshot::channel();
        match self.pending.lock().as_mut() {
            Some(waiters) => waiters.insert(id.clone(), tx),
            None => return Err(ClientError::Closed),
        };
        if let Err(e) = self.send_raw(&line).await {
            if let Some(waiters) = self.pending.lock().as_mut() {
                waiters.remove(&id);
            }
            return Err(e);
        }
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Like [`GatewayClient::request`], but unwraps the response data and
    /// turns protocol errors into [`ClientError::Server`].
    pub async fn call(&self, op: Op, data: Option<Value>) -> Result<Value, ClientError> {
        match self.request(op.as_str(), data).await? {
            ServerMessage::Response { data, .. } => Ok(data),
            ServerMessage::Error { error, .. } => Err(ClientError::Server {
                code: error.code,
                message: error.message,
            }),
        }
    }

    async fn call_as<T: DeserializeOwned>(&self, op: Op, data: Option<Value>) -> Result<T, ClientError> {
        Ok(serde_json::from_value(self.call(op, data).await?)?)
    }

    pub async fn list_tickers(&self) -> Result<Vec<String>, ClientError> {
        self.call_as(Op::ListTickers, None).await
    }

    pub async fn get_quote(&self, ticker: &str) -> Result<QuoteView, ClientError> {
        self.call_as(Op::GetQuote, Some(json!({ "ticker": ticker }))).await
    }

    pub async fn get_snapshot_epoch(&self) -> Result<SnapshotEpoch, ClientError> {
        self.call_as(Op::GetSnapshotEpoch, None).await
    }

    pub async fn get_shm_name(&self) -> Result<String, ClientError> {
        let data = self.call(Op::GetShmName, None).await?;
        match data.get("shm_name").and_then(Value::as_str) {
            Some(name) => Ok(name.to_string()),
            None => Err(ClientError::Server {
                code: ErrorCode::Internal,
                message: format!("unexpected get_shm_name reply: {data}"),
            }),
        }
    }

    pub async fn acquire_ibkr(&self) -> Result<ReservationReply, ClientError> {
        reservation_reply(self.call(Op::AcquireIbkr, None).await?)
    }

    pub async fn release_ibkr(&self) -> Result<ReservationReply, ClientError> {
        reservation_reply(self.call(Op::ReleaseIbkr, None).await?)
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn reservation_reply(data: Value) -> Result<ReservationReply, ClientError> {
    let status = data.get("status").and_then(Value::as_str);
    match status {
        Some("acquired") => Ok(ReservationReply::Acquired),
        Some("released") => Ok(ReservationReply::Released),
        Some("denied") => Ok(ReservationReply::Denied {
            reason: data
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        _ => Err(ClientError::Server {
            code: ErrorCode::Internal,
            message: format!("unexpected reservation reply: {data}"),
        }),
    }
}

async fn read_loop(
    rd: OwnedReadHalf,
    pending: Pending,
    unsolicited: mpsc::UnboundedSender<ServerMessage>,
) {
    let mut lines = FramedRead::new(rd, LinesCodec::new());
    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "server stream failed");
                break;
            }
        };
        let msg: ServerMessage = match serde_json::from_str(&line) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "undecodable server line");
                continue;
            }
        };
        let waiter = msg
            .id()
            .and_then(|id| pending.lock().as_mut().and_then(|w| w.remove(id)));
        match waiter {
            Some(tx) => {
                let _ = tx.send(msg);
            }
            None => {
                debug!(?msg, "unsolicited message");
                let _ = unsolicited.send(msg);
            }
        }
    }
    // dropping the senders wakes every waiter with Closed
    pending.lock().take();
}
