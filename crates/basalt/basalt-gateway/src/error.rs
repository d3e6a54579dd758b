use crate::protocol::ErrorCode;
use basalt_arbiter::ClientId;
use basalt_quotes::QuoteError;
use tokio_util::codec::LinesCodecError;

/// Why a well-formed request could not be served.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    BadRequest(String),

    #[error("unknown request type '{0}'")]
    UnknownType(String),

    #[error(transparent)]
    Quote(#[from] QuoteError),

    #[error("{0}")]
    NotFound(String),

    #[error("ibkr session is held by {holder}")]
    Conflict { holder: ClientId },

    #[error("failed to encode response")]
    Encode(#[from] serde_json::Error),
}

impl GatewayError {
    /// The one place library failures turn into protocol codes.
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::BadRequest(_) | GatewayError::UnknownType(_) => ErrorCode::BadRequest,
            GatewayError::Quote(QuoteError::UnknownTicker(_)) | GatewayError::NotFound(_) => {
                ErrorCode::NotFound
            }
            GatewayError::Conflict { .. } => ErrorCode::Conflict,
            GatewayError::Encode(_) => ErrorCode::Internal,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection failed")]
    Io(#[from] std::io::Error),

    #[error("framing failed")]
    Codec(#[from] LinesCodecError),

    #[error("failed to decode server message")]
    Decode(#[from] serde_json::Error),

    #[error("connection closed before a response arrived")]
    Closed,

    #[error("server returned {code}: {message}")]
    Server { code: ErrorCode, message: String },
}

impl ClientError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }
}
