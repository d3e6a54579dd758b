//! Turns one request line into one reply. No I/O happens here; the server
//! feeds lines in and writes the returned message out.

use crate::error::GatewayError;
use crate::protocol::{Op, Request, ServerMessage, parse_request};
use basalt_arbiter::{AcquireOutcome, ClientId, ReleaseOutcome, ReservationArbiter};
use basalt_events::now_ms;
use basalt_quotes::{QuoteCache, SnapshotState};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub struct Dispatcher {
    quotes: Arc<QuoteCache>,
    snapshot: Arc<SnapshotState>,
    arbiter: Arc<ReservationArbiter>,
    /// `None` when the store is not shared with other processes.
    shm_name: Option<String>,
}

impl Dispatcher {
    pub fn new(
        quotes: Arc<QuoteCache>,
        snapshot: Arc<SnapshotState>,
        arbiter: Arc<ReservationArbiter>,
        shm_name: Option<String>,
    ) -> Self {
        Self {
            quotes,
            snapshot,
            arbiter,
            shm_name,
        }
    }

    pub fn arbiter(&self) -> &Arc<ReservationArbiter> {
        &self.arbiter
    }

    pub fn handle_line(&self, client: ClientId, line: &str) -> ServerMessage {
        match parse_request(line) {
            Ok(req) => self.handle(client, &req),
            Err(rejected) => {
                warn!(%client, id = ?rejected.id, reason = %rejected.message, "request rejected");
                rejected.into_message()
            }
        }
    }

    pub fn handle(&self, client: ClientId, req: &Request) -> ServerMessage {
        let started = Instant::now();
        let reply = Op::parse(&req.kind)
            .ok_or_else(|| GatewayError::UnknownType(req.kind.clone()))
            .and_then(|op| self.dispatch(client, op, req).map(|data| (op, data)));

        let elapsed_us = started.elapsed().as_micros() as u64;
        match reply {
            Ok((op, data)) => {
                debug!(%client, id = %req.id, op = op.as_str(), elapsed_us, "request served");
                ServerMessage::response(req.id.clone(), op, data)
            }
            Err(e) => {
                let code = e.code();
                warn!(%client, id = %req.id, kind = %req.kind, %code, error = %e, elapsed_us, "request failed");
                ServerMessage::error(Some(req.id.clone()), code, e.to_string())
            }
        }
    }

    fn dispatch(&self, client: ClientId, op: Op, req: &Request) -> Result<Value, GatewayError> {
        match op {
            Op::ListTickers => Ok(json!(self.quotes.tickers())),
            Op::GetQuote => {
                let ticker = req
                    .ticker()
                    .ok_or_else(|| GatewayError::BadRequest("missing field: ticker".into()))?;
                let view = self.quotes.get_quote(ticker, now_ms())?;
                Ok(serde_json::to_value(view)?)
            }
            Op::GetSnapshotEpoch => Ok(serde_json::to_value(self.snapshot.get_snapshot_epoch())?),
            Op::GetShmName => match &self.shm_name {
                Some(name) => Ok(json!({ "shm_name": name })),
                None => Err(GatewayError::NotFound("shared memory is disabled".into())),
            },
            Op::AcquireIbkr => match self.arbiter.acquire(client) {
                AcquireOutcome::Acquired => Ok(json!({ "status": "acquired" })),
                AcquireOutcome::Denied { reason } => Ok(json!({ "status": "denied", "reason": reason })),
                AcquireOutcome::Conflict { holder } => Err(GatewayError::Conflict { holder }),
            },
            Op::ReleaseIbkr => match self.arbiter.release(client) {
                ReleaseOutcome::Released => Ok(json!({ "status": "released" })),
                ReleaseOutcome::NotReserved => {
                    Err(GatewayError::BadRequest("ibkr session is not reserved".into()))
                }
                ReleaseOutcome::NotHolder { holder } => Err(GatewayError::Conflict { holder }),
            },
        }
    }

    /// Connection teardown hook.
    pub fn client_disconnected(&self, client: ClientId) {
        if self.arbiter.client_disconnected(client) {
            debug!(%client, "reservation reclaimed after disconnect");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorCode;
    use basalt_arbiter::{ArbiterPolicy, DetachedSession, ReleaseNotifier};
    use basalt_events::OhlcvRow;

    struct NoPush;
    impl ReleaseNotifier for NoPush {
        fn request_release(&self, _holder: ClientId) {}
    }

    fn dispatcher(shm: Option<&str>) -> Dispatcher {
        let quotes = Arc::new(QuoteCache::new(90_000));
        quotes.refresh("AAPL", &OhlcvRow::new(1, 1.0, 2.0, 0.5, 1.5, 10), now_ms());
        quotes.refresh("MSFT", &OhlcvRow::new(1, 1.0, 2.0, 0.5, 2.5, 20), 1);
        let arbiter = Arc::new(ReservationArbiter::new(
            Arc::new(DetachedSession::new()),
            Arc::new(NoPush),
            ArbiterPolicy::default(),
        ));
        Dispatcher::new(quotes, Arc::new(SnapshotState::new()), arbiter, shm.map(String::from))
    }

    fn data(msg: ServerMessage) -> Value {
        match msg {
            ServerMessage::Response { data, .. } => data,
            other => panic!("expected a response, got {other:?}"),
        }
    }

    fn code(msg: ServerMessage) -> ErrorCode {
        match msg {
            ServerMessage::Error { error, .. } => error.code,
            other => panic!("expected an error, got {other:?}"),
        }
    }

    const A: ClientId = ClientId(1);

    #[test]
    fn list_and_quote() {
        let d = dispatcher(None);
        let tickers = data(d.handle_line(A, r#"{"v":1,"id":"1","type":"list_tickers"}"#));
        assert_eq!(tickers, json!(["AAPL", "MSFT"]));

        let q = data(d.handle_line(A, r#"{"v":1,"id":"2","type":"get_quote","data":{"ticker":"AAPL"}}"#));
        assert_eq!(q["price"], json!(1.5));
        assert_eq!(q["ticker"], json!("AAPL"));
        assert_eq!(q["stale"], json!(false));

        let q = data(d.handle_line(A, r#"{"v":1,"id":"3","type":"get_quote","ticker":"MSFT"}"#));
        assert_eq!(q["stale"], json!(true));
    }

    #[test]
    fn quote_errors() {
        let d = dispatcher(None);
        let not_found = d.handle_line(A, r#"{"v":1,"id":"1","type":"get_quote","data":{"ticker":"ZZZ"}}"#);
        assert_eq!(not_found.id(), Some("1"));
        assert_eq!(code(not_found), ErrorCode::NotFound);
        assert_eq!(
            code(d.handle_line(A, r#"{"v":1,"id":"2","type":"get_quote","data":{}}"#)),
            ErrorCode::BadRequest
        );
    }

    #[test]
    fn shm_name_depends_on_sharing() {
        let line = r#"{"v":1,"id":"1","type":"get_shm_name"}"#;
        assert_eq!(
            data(dispatcher(Some("basalt_ohlcv")).handle_line(A, line)),
            json!({"shm_name": "basalt_ohlcv"})
        );
        assert_eq!(code(dispatcher(None).handle_line(A, line)), ErrorCode::NotFound);
    }

    #[test]
    fn snapshot_epoch_shape() {
        let d = dispatcher(None);
        let s = data(d.handle_line(A, r#"{"v":1,"id":"1","type":"get_snapshot_epoch"}"#));
        assert_eq!(s, json!({"epoch": 0, "last_update_ms": 0}));
    }

    #[test]
    fn unknown_type_and_bad_envelope() {
        let d = dispatcher(None);
        let msg = d.handle_line(A, r#"{"v":1,"id":"1","type":"subscribe"}"#);
        assert_eq!(msg.id(), Some("1"));
        assert_eq!(code(msg), ErrorCode::BadRequest);

        let msg = d.handle_line(A, "garbage");
        assert_eq!(msg.id(), None);
        assert_eq!(code(msg), ErrorCode::BadRequest);
    }

    #[test]
    fn reservation_round_trip() {
        let d = dispatcher(None);
        let b = ClientId(2);
        let acquire = r#"{"v":1,"id":"a","type":"acquire_ibkr"}"#;
        let release = r#"{"v":1,"id":"r","type":"release_ibkr"}"#;

        assert_eq!(code(d.handle_line(A, release)), ErrorCode::BadRequest);
        assert_eq!(data(d.handle_line(A, acquire)), json!({"status": "acquired"}));
        assert_eq!(code(d.handle_line(b, acquire)), ErrorCode::Conflict);
        assert_eq!(code(d.handle_line(b, release)), ErrorCode::Conflict);
        assert_eq!(data(d.handle_line(A, release)), json!({"status": "released"}));

        d.arbiter().download_start();
        assert_eq!(
            data(d.handle_line(b, acquire)),
            json!({"status": "denied", "reason": "wait until stock download is finished"})
        );
    }
}
