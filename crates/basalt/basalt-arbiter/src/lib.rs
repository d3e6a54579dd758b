//! Arbitration of the single broker session.
//!
//! The broker (an IBKR TWS instance) accepts one API connection at a time.
//! Normally the service holds it; a client may reserve it, at which point the
//! service lets go, and hands it back with an explicit release.

mod arbiter;
mod session;

pub use arbiter::{
    AcquireOutcome, ArbiterPolicy, ClientId, DOWNLOAD_IN_PROGRESS_REASON, ReleaseOutcome,
    Reservation, ReservationArbiter, ReservationState,
};
pub use session::{BrokerSession, DetachedSession, ReleaseNotifier};
