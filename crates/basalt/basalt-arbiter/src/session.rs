use crate::arbiter::ClientId;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// The service's own connection to the broker.
///
/// `relinquish` and `reclaim` run while the arbiter holds its lock, which
/// keeps them in the same order as the transitions that caused them.
/// Implementations must not block there and must not call back into the
/// arbiter.
pub trait BrokerSession: Send + Sync {
    /// A client now owns the broker; drop the service's connection.
    fn relinquish(&self);

    /// The client gave the broker back; the service may reconnect.
    fn reclaim(&self);

    /// Connects if not already connected. False when the broker refused,
    /// which is what happens while a client is connected to it.
    ///
    /// Called outside the arbiter's lock, so it may take time.
    fn connect(&self) -> bool;
}

/// Delivers the unsolicited "please release" message to a holder.
///
/// Must not block: the arbiter calls it inline after a transition.
pub trait ReleaseNotifier: Send + Sync {
    fn request_release(&self, holder: ClientId);
}

/// Session for a service running without a broker connection (offline,
/// hydrated from cache). Only tracks who would own the broker, so a refresh
/// cycle sees the same refusal a real broker gives while a client holds it.
#[derive(Debug)]
pub struct DetachedSession {
    connected: AtomicBool,
}

impl DetachedSession {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
        }
    }
}

impl Default for DetachedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerSession for DetachedSession {
    fn relinquish(&self) {
        self.connected.store(false, Ordering::Release);
        info!("broker session handed to client (detached, nothing to disconnect)");
    }

    fn reclaim(&self) {
        self.connected.store(true, Ordering::Release);
        info!("broker session returned (detached, nothing to reconnect)");
    }

    fn connect(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_session_refuses_while_handed_out() {
        let s = DetachedSession::new();
        assert!(s.connect());
        s.relinquish();
        assert!(!s.connect());
        s.reclaim();
        assert!(s.connect());
    }
}
