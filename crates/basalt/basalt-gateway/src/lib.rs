//! NDJSON TCP front end of the market-data service.
//!
//! Requests are answered from the quote cache, the batch snapshot and the
//! reservation arbiter; bulk history is never served here, readers map the
//! shared region instead.

mod client;
mod dispatch;
mod error;
pub mod protocol;
mod registry;
mod server;

pub use client::{GatewayClient, ReservationReply};
pub use dispatch::Dispatcher;
pub use error::{ClientError, GatewayError};
pub use protocol::{ErrorCode, Op, ServerMessage};
pub use registry::ConnectionRegistry;
pub use server::{GatewayServer, ServerConfig};
