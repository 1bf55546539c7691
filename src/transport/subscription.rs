use crate::transport::connection::{CdpConnection, SessionId};
use serde_json::Value;
use std::sync::Weak;
use tokio::sync::mpsc;

/// Handle to one event registration.
///
/// Returned by [`CdpConnection::subscribe`]; receives the payload of every
/// matching event. The registration is removed when the handle is dropped or
/// [`unsubscribe`](Self::unsubscribe) is called. Unsubscribing more than once
/// is a no-op.
pub struct EventSubscription {
    conn: Weak<CdpConnection>,
    key: (Option<SessionId>, String),
    id: u64,
    rx: mpsc::UnboundedReceiver<Value>,
    detached: bool,
}

impl EventSubscription {
    pub(crate) fn new(
        conn: Weak<CdpConnection>,
        key: (Option<SessionId>, String),
        id: u64,
        rx: mpsc::UnboundedReceiver<Value>,
    ) -> Self {
        Self {
            conn,
            key,
            id,
            rx,
            detached: false,
        }
    }

    /// Event method this subscription is registered for
    pub fn event(&self) -> &str {
        &self.key.1
    }

    /// Receive the next event payload.
    ///
    /// Returns `None` once the subscription is removed or the connection
    /// closes.
    pub async fn recv(&mut self) -> Option<Value> {
        if self.detached {
            // Drain anything delivered before detach, then end.
            return self.rx.try_recv().ok();
        }
        self.rx.recv().await
    }

    /// Remove the registration. Safe to call repeatedly.
    pub fn unsubscribe(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;

        if let Some(conn) = self.conn.upgrade() {
            conn.remove_subscriber(&self.key, self.id);
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
