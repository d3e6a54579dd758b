//! NDJSON wire format, version 1.
//!
//! ```text
//! request   {"v":1,"id":"7","type":"get_quote","data":{"ticker":"AAPL"}}
//! response  {"v":1,"id":"7","type":"response","op":"get_quote","data":{...}}
//! error     {"v":1,"id":"7","type":"error","error":{"code":"NOT_FOUND","message":"..."}}
//! push      {"v":1,"type":"response","op":"release_ibkr","data":{"status":"release_requested"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;

pub const PROTOCOL_VERSION: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    NotFound,
    Conflict,
    Denied,
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::Denied => "DENIED",
            ErrorCode::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

/// Anything the server writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Response {
        v: u64,
        /// Absent on unsolicited pushes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        op: String,
        data: Value,
    },
    Error {
        v: u64,
        /// `null` when the request could not be parsed far enough to read it.
        id: Option<String>,
        error: ErrorBody,
    },
}

impl ServerMessage {
    pub fn response(id: impl Into<String>, op: Op, data: Value) -> Self {
        ServerMessage::Response {
            v: PROTOCOL_VERSION,
            id: Some(id.into()),
            op: op.as_str().to_string(),
            data,
        }
    }

    pub fn error(id: Option<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            v: PROTOCOL_VERSION,
            id,
            error: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    /// The server asking the holder to give the broker session back.
    pub fn release_requested() -> Self {
        ServerMessage::Response {
            v: PROTOCOL_VERSION,
            id: None,
            op: Op::ReleaseIbkr.as_str().to_string(),
            data: json!({ "status": "release_requested" }),
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            ServerMessage::Response { id, .. } | ServerMessage::Error { id, .. } => id.as_deref(),
        }
    }

    pub fn is_push(&self) -> bool {
        matches!(self, ServerMessage::Response { id: None, .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    ListTickers,
    GetQuote,
    GetSnapshotEpoch,
    GetShmName,
    AcquireIbkr,
    ReleaseIbkr,
}

impl Op {
    pub fn parse(s: &str) -> Option<Op> {
        Some(match s {
            "list_tickers" => Op::ListTickers,
            "get_quote" => Op::GetQuote,
            "get_snapshot_epoch" => Op::GetSnapshotEpoch,
            "get_shm_name" => Op::GetShmName,
            "acquire_ibkr" => Op::AcquireIbkr,
            "release_ibkr" => Op::ReleaseIbkr,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Op::ListTickers => "list_tickers",
            Op::GetQuote => "get_quote",
            Op::GetSnapshotEpoch => "get_snapshot_epoch",
            Op::GetShmName => "get_shm_name",
            Op::AcquireIbkr => "acquire_ibkr",
            Op::ReleaseIbkr => "release_ibkr",
        }
    }
}

/// A request whose envelope passed validation. `kind` is not yet checked
/// against the known operations.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: String,
    pub kind: String,
    fields: Map<String, Value>,
}

impl Request {
    pub fn data(&self) -> Option<&Value> {
        self.fields.get("data")
    }

    /// `data.ticker`, or a top-level `ticker` for older clients.
    pub fn ticker(&self) -> Option<&str> {
        self.data()
            .and_then(|d| d.get("ticker"))
            .or_else(|| self.fields.get("ticker"))
            .and_then(Value::as_str)
    }
}

/// Envelope rejection, reported as `BAD_REQUEST`.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    /// Set when the id itself was readable.
    pub id: Option<String>,
    pub message: String,
}

impl Rejected {
    pub fn into_message(self) -> ServerMessage {
        ServerMessage::error(self.id, ErrorCode::BadRequest, self.message)
    }
}

/// Parses and validates one request line.
pub fn parse_request(line: &str) -> Result<Request, Rejected> {
    let value: Value = serde_json::from_str(line).map_err(|e| Rejected {
        id: None,
        message: format!("malformed JSON: {e}"),
    })?;
    let Value::Object(fields) = value else {
        return Err(Rejected {
            id: None,
            message: "request must be a JSON object".into(),
        });
    };

    let v = fields.get("v").and_then(Value::as_u64);
    let id = fields.get("id").and_then(Value::as_str).map(str::to_string);
    let kind = fields.get("type").and_then(Value::as_str).map(str::to_string);

    let mut missing = Vec::new();
    if v.is_none() {
        missing.push("v");
    }
    if id.is_none() {
        missing.push("id");
    }
    if kind.is_none() {
        missing.push("type");
    }

    match (v, id, kind) {
        (Some(PROTOCOL_VERSION), Some(id), Some(kind)) => Ok(Request { id, kind, fields }),
        (Some(v), id @ Some(_), Some(_)) => Err(Rejected {
            id,
            message: format!("unsupported protocol version {v}, expected {PROTOCOL_VERSION}"),
        }),
        (_, id, _) => Err(Rejected {
            id,
            message: format!("missing or invalid fields: {}", missing.join(", ")),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_request() {
        let r = parse_request(r#"{"v":1,"id":"1","type":"get_quote","data":{"ticker":"AAPL"}}"#).unwrap();
        assert_eq!(r.id, "1");
        assert_eq!(r.kind, "get_quote");
        assert_eq!(r.ticker(), Some("AAPL"));
    }

    #[test]
    fn ticker_falls_back_to_top_level() {
        let r = parse_request(r#"{"v":1,"id":"1","type":"get_quote","ticker":"MSFT"}"#).unwrap();
        assert_eq!(r.ticker(), Some("MSFT"));
        let r = parse_request(r#"{"v":1,"id":"1","type":"get_quote","data":{}}"#).unwrap();
        assert_eq!(r.ticker(), None);
    }

    #[test]
    fn missing_fields_are_named() {
        let err = parse_request(r#"{"type":"list_tickers"}"#).unwrap_err();
        assert_eq!(err.id, None);
        assert_eq!(err.message, "missing or invalid fields: v, id");

        // wrong types count as missing, a readable id is echoed
        let err = parse_request(r#"{"v":"1","id":"9","type":3}"#).unwrap_err();
        assert_eq!(err.id.as_deref(), Some("9"));
        assert_eq!(err.message, "missing or invalid fields: v, type");
    }

    #[test]
    fn wrong_version() {
        let err = parse_request(r#"{"v":2,"id":"x","type":"list_tickers"}"#).unwrap_err();
        assert_eq!(err.id.as_deref(), Some("x"));
        assert!(err.message.contains("unsupported protocol version 2"));
    }

    #[test]
    fn malformed_json_and_non_objects() {
        assert!(parse_request("{not json").unwrap_err().message.starts_with("malformed JSON"));
        assert_eq!(
            parse_request("[1,2]").unwrap_err().message,
            "request must be a JSON object"
        );
    }

    #[test]
    fn wire_shapes() {
        let push = serde_json::to_value(ServerMessage::release_requested()).unwrap();
        assert_eq!(
            push,
            json!({"v":1,"type":"response","op":"release_ibkr","data":{"status":"release_requested"}})
        );

        let err = serde_json::to_value(ServerMessage::error(None, ErrorCode::BadRequest, "nope")).unwrap();
        assert_eq!(
            err,
            json!({"v":1,"id":null,"type":"error","error":{"code":"BAD_REQUEST","message":"nope"}})
        );

        let resp = ServerMessage::response("4", Op::ListTickers, json!(["AAPL"]));
        let line = serde_json::to_string(&resp).unwrap();
        let back: ServerMessage = serde_json::from_str(&line).unwrap();
        assert_eq!(back, resp);
        assert!(!back.is_push());
        assert_eq!(back.id(), Some("4"));
    }
}
