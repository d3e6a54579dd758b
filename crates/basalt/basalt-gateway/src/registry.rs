use crate::protocol::ServerMessage;
use basalt_arbiter::{ClientId, ReleaseNotifier};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

pub type Outbox = mpsc::Sender<ServerMessage>;

/// Live connections and the bounded queue feeding each one's socket writer.
///
/// The connection's own replies wait for room in the queue. Pushes made
/// through the registry never wait: when the queue is full they are dropped.
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    clients: Mutex<HashMap<ClientId, Outbox>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an id for a new connection. The returned sender is the
    /// connection's own handle for replies; the registry keeps a clone for
    /// pushes until [`ConnectionRegistry::unregister`].
    pub fn register(&self, capacity: usize) -> (ClientId, Outbox, mpsc::Receiver<ServerMessage>) {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.clients.lock().insert(id, tx.clone());
        debug!(client = %id, "connection registered");
        (id, tx, rx)
    }

    pub fn unregister(&self, id: ClientId) {
        if self.clients.lock().remove(&id).is_some() {
            debug!(client = %id, "connection unregistered");
        }
    }

    /// Queues `msg` for `id` without waiting. False if the connection is
    /// gone or its queue is full.
    pub fn send(&self, id: ClientId, msg: ServerMessage) -> bool {
        let clients = self.clients.lock();
        let Some(tx) = clients.get(&id) else {
            return false;
        };
        match tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(client = %id, "outbox full, message dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReleaseNotifier for ConnectionRegistry {
    fn request_release(&self, holder: ClientId) {
        if !self.send(holder, ServerMessage::release_requested()) {
            warn!(client = %holder, "release request not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_push_reaches_only_the_holder() {
        let reg = ConnectionRegistry::new();
        let (a, _atx, mut arx) = reg.register(4);
        let (b, _btx, mut brx) = reg.register(4);
        assert_ne!(a, b);
        assert_eq!(reg.len(), 2);

        reg.request_release(a);
        assert_eq!(arx.try_recv().unwrap(), ServerMessage::release_requested());
        assert!(brx.try_recv().is_err());
    }

    #[test]
    fn unregistered_clients_get_nothing() {
        let reg = ConnectionRegistry::new();
        let (a, _tx, _rx) = reg.register(4);
        reg.unregister(a);
        assert!(reg.is_empty());
        assert!(!reg.send(a, ServerMessage::release_requested()));
    }

    #[test]
    fn push_to_a_full_outbox_is_dropped_without_waiting() {
        let reg = ConnectionRegistry::new();
        let (a, tx, mut rx) = reg.register(1);
        tx.try_send(ServerMessage::release_requested()).unwrap();

        assert!(!reg.send(a, ServerMessage::release_requested()));
        reg.request_release(a);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        // room again once the writer drains
        assert!(reg.send(a, ServerMessage::release_requested()));
    }
}
