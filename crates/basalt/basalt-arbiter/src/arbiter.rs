// Reservation state machine.
//
//   Event                 | Free                    | Reserved(h)         | ReleasePending(h)
//   ----------------------+-------------------------+---------------------+-------------------
//   acquire(c)            | download? DENIED        | CONFLICT            | CONFLICT
//                         | else Reserved(c)        |                     |
//   release(c)            | NotReserved             | c == h: Free        | c == h: Free
//                         |                         | else CONFLICT       | else CONFLICT
//   service conn lost     | no-op                   | ReleasePending(h)   | no-op
//                         |                         | + push to h         |
//   download start/end    | flag only               | flag only           | flag only
//
// ReleasePending does not revoke anything: the holder still has to call
// release. It only records that the service is waiting on the holder.

use crate::session::{BrokerSession, ReleaseNotifier};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reason given to a client that tries to acquire during a download.
pub const DOWNLOAD_IN_PROGRESS_REASON: &str = "wait until stock download is finished";

/// Identifier of a client connection. Assigned by the gateway, never reused
/// while the service runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "holder", rename_all = "snake_case")]
pub enum ReservationState {
    /// The service owns the broker session.
    Free,
    Reserved(ClientId),
    /// The service asked the holder to release and is waiting for it.
    ReleasePending(ClientId),
}

impl ReservationState {
    pub fn holder(&self) -> Option<ClientId> {
        match *self {
            ReservationState::Free => None,
            ReservationState::Reserved(h) | ReservationState::ReleasePending(h) => Some(h),
        }
    }
}

/// The single reservation instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reservation {
    pub state: ReservationState,
    pub download_in_progress: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    Denied { reason: &'static str },
    Conflict { holder: ClientId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// Nothing is reserved.
    NotReserved,
    /// Someone else holds the reservation.
    NotHolder { holder: ClientId },
}

#[derive(Debug, Clone, Copy)]
pub struct ArbiterPolicy {
    /// Give the session back to the service when the holding client
    /// disconnects without releasing.
    pub reclaim_on_disconnect: bool,
}

impl Default for ArbiterPolicy {
    fn default() -> Self {
        Self {
            reclaim_on_disconnect: true,
        }
    }
}

pub struct ReservationArbiter {
    inner: Mutex<Reservation>,
    session: Arc<dyn BrokerSession>,
    notifier: Arc<dyn ReleaseNotifier>,
    policy: ArbiterPolicy,
}

impl ReservationArbiter {
    pub fn new(
        session: Arc<dyn BrokerSession>,
        notifier: Arc<dyn ReleaseNotifier>,
        policy: ArbiterPolicy,
    ) -> Self {
        Self {
            inner: Mutex::new(Reservation {
                state: ReservationState::Free,
                download_in_progress: false,
            }),
            session,
            notifier,
            policy,
        }
    }

    pub fn snapshot(&self) -> Reservation {
        *self.inner.lock()
    }

    pub fn acquire(&self, client: ClientId) -> AcquireOutcome {
        let mut r = self.inner.lock();
        match r.state {
            ReservationState::Free if r.download_in_progress => {
                debug!(%client, "acquire denied, download in progress");
                AcquireOutcome::Denied {
                    reason: DOWNLOAD_IN_PROGRESS_REASON,
                }
            }
            ReservationState::Free => {
                r.state = ReservationState::Reserved(client);
                self.session.relinquish();
                info!(%client, "broker session reserved");
                AcquireOutcome::Acquired
            }
            ReservationState::Reserved(holder) | ReservationState::ReleasePending(holder) => {
                debug!(%client, %holder, "acquire conflicts with current holder");
                AcquireOutcome::Conflict { holder }
            }
        }
    }

    pub fn release(&self, client: ClientId) -> ReleaseOutcome {
        let mut r = self.inner.lock();
        match r.state {
            ReservationState::Free => ReleaseOutcome::NotReserved,
            ReservationState::Reserved(holder) | ReservationState::ReleasePending(holder)
                if holder == client =>
            {
                r.state = ReservationState::Free;
                self.session.reclaim();
                info!(%client, "broker session released");
                ReleaseOutcome::Released
            }
            ReservationState::Reserved(holder) | ReservationState::ReleasePending(holder) => {
                warn!(%client, %holder, "release attempted by non-holder");
                ReleaseOutcome::NotHolder { holder }
            }
        }
    }

    /// The service lost its own broker connection (typically because the
    /// client connected to the broker). Asks the holder to release.
    ///
    /// Returns the holder that was notified, if this call moved the state to
    /// `ReleasePending`.
    pub fn service_connection_lost(&self) -> Option<ClientId> {
        let holder = {
            let mut r = self.inner.lock();
            match r.state {
                ReservationState::Reserved(holder) => {
                    r.state = ReservationState::ReleasePending(holder);
                    holder
                }
                ReservationState::ReleasePending(holder) => {
                    debug!(%holder, "release already requested");
                    return None;
                }
                ReservationState::Free => {
                    debug!("service connection lost with no reservation");
                    return None;
                }
            }
        };
        info!(%holder, "requesting release of broker session");
        self.notifier.request_release(holder);
        Some(holder)
    }

    /// Makes sure the service holds its broker connection before using it.
    ///
    /// When the broker refuses, the service has lost the session to the
    /// holder: the holder is asked to release and this returns false.
    pub fn ensure_service_session(&self) -> bool {
        if self.session.connect() {
            return true;
        }
        warn!("broker refused the service connection");
        self.service_connection_lost();
        false
    }

    pub fn download_start(&self) {
        self.inner.lock().download_in_progress = true;
        debug!("download started");
    }

    pub fn download_end(&self) {
        self.inner.lock().download_in_progress = false;
        debug!("download finished");
    }

    pub fn download_in_progress(&self) -> bool {
        self.inner.lock().download_in_progress
    }

    /// A client connection closed. If it held the reservation, the session is
    /// reclaimed or kept according to the policy. Returns true when the
    /// reservation was reclaimed.
    pub fn client_disconnected(&self, client: ClientId) -> bool {
        let mut r = self.inner.lock();
        if r.state.holder() != Some(client) {
            return false;
        }
        if !self.policy.reclaim_on_disconnect {
            warn!(%client, "holder disconnected without releasing, reservation kept");
            return false;
        }
        r.state = ReservationState::Free;
        self.session.reclaim();
        warn!(%client, "holder disconnected without releasing, session reclaimed");
        true
    }
}
