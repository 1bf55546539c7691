use crate::error::{sanitize, BrowserError, Result};
use crate::protocol::{AttachToTargetResult, IncomingMessage, OutgoingMessage};
use crate::transport::subscription::EventSubscription;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, oneshot};

/// Opaque per-target session identifier assigned by the browser
pub type SessionId = String;

/// Raw outbound half of a protocol transport.
///
/// The connection owns correlation and routing; implementations only need to
/// deliver one serialized message. Incoming messages are handed to the
/// connection through the channel passed to [`CdpConnection::connect`].
#[async_trait]
pub trait RawTransport: Send + Sync + 'static {
    /// Deliver one serialized protocol message to the browser
    async fn send(&self, text: String) -> Result<()>;
}

type SubscriberKey = (Option<SessionId>, String);

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<Value>,
}

struct ConnectionState {
    /// In-flight requests: id -> (method, response channel)
    pending: HashMap<u64, (String, oneshot::Sender<Result<Value>>)>,

    /// Event subscribers keyed by (session scope, event method)
    subscribers: HashMap<SubscriberKey, Vec<Subscriber>>,

    /// Sessions created through this connection, detached on dispose
    sessions: HashSet<SessionId>,

    closed: Option<String>,
}

/// Multiplexed protocol connection.
///
/// Commands sent concurrently from any number of tasks are correlated back to
/// their callers by monotonic id. Events carrying a `sessionId` are routed
/// only to subscribers registered for that session; events without one go to
/// root-scoped subscribers.
pub struct CdpConnection {
    transport: Arc<dyn RawTransport>,
    state: Mutex<ConnectionState>,
    next_request_id: AtomicU64,
    next_subscriber_id: AtomicU64,
}

impl CdpConnection {
    /// Attach the multiplexer to a raw transport and its incoming stream.
    ///
    /// Spawns the reader task that dispatches responses and events until the
    /// stream ends, at which point all in-flight requests fail with
    /// [`BrowserError::ConnectionClosed`].
    pub fn connect(
        transport: Arc<dyn RawTransport>,
        mut incoming: mpsc::UnboundedReceiver<String>,
    ) -> Arc<Self> {
        let conn = Arc::new(Self {
            transport,
            state: Mutex::new(ConnectionState {
                pending: HashMap::new(),
                subscribers: HashMap::new(),
                sessions: HashSet::new(),
                closed: None,
            }),
            next_request_id: AtomicU64::new(0),
            next_subscriber_id: AtomicU64::new(0),
        });

        let weak: Weak<CdpConnection> = Arc::downgrade(&conn);
        tokio::spawn(async move {
            while let Some(text) = incoming.recv().await {
                match weak.upgrade() {
                    Some(conn) => conn.dispatch(&text),
                    None => return,
                }
            }
            if let Some(conn) = weak.upgrade() {
                conn.handle_close("transport stream ended");
            }
        });

        conn
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        // A poisoned lock only means a panicking task held it; the map state
        // itself is still consistent for our single-field mutations.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send a command and await its result.
    ///
    /// `session_id` scopes the command to an attached target; `None` targets
    /// the root (browser-level) session.
    pub async fn send(
        &self,
        method: &str,
        params: Option<Value>,
        session_id: Option<&str>,
    ) -> Result<Value> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.lock_state();
            if let Some(reason) = &state.closed {
                return Err(BrowserError::ConnectionClosed(reason.clone()));
            }
            state.pending.insert(id, (method.to_string(), tx));
        }

        let text = serde_json::to_string(&OutgoingMessage {
            id,
            method,
            params,
            session_id,
        })?;

        if let Err(err) = self.transport.send(text).await {
            self.lock_state().pending.remove(&id);
            return Err(err);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(BrowserError::ConnectionClosed(format!(
                "request '{}' abandoned before a response arrived",
                method
            ))),
        }
    }

    /// Register for an event, scoped to a session (or the root session).
    ///
    /// The returned handle receives matching event payloads and removes its
    /// registration when dropped or explicitly unsubscribed.
    pub fn subscribe(
        self: &Arc<Self>,
        event: &str,
        session_id: Option<&str>,
    ) -> Result<EventSubscription> {
        let key: SubscriberKey = (session_id.map(str::to_string), event.to_string());
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut state = self.lock_state();
            if let Some(reason) = &state.closed {
                return Err(BrowserError::SubscriptionFailed(format!(
                    "connection closed: {}",
                    reason
                )));
            }
            state
                .subscribers
                .entry(key.clone())
                .or_default()
                .push(Subscriber { id, tx });
        }

        Ok(EventSubscription::new(Arc::downgrade(self), key, id, rx))
    }

    pub(crate) fn remove_subscriber(&self, key: &SubscriberKey, id: u64) {
        let mut state = self.lock_state();
        if let Some(list) = state.subscribers.get_mut(key) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                state.subscribers.remove(key);
            }
        }
    }

    /// Attach to a target and return the new session id.
    pub async fn create_session(&self, target_id: &str) -> Result<SessionId> {
        let result = self
            .send(
                "Target.attachToTarget",
                Some(json!({ "targetId": target_id, "flatten": true })),
                None,
            )
            .await?;

        let attached: AttachToTargetResult = serde_json::from_value(result)?;
        self.lock_state().sessions.insert(attached.session_id.clone());
        Ok(attached.session_id)
    }

    /// Detach all tracked sessions best-effort and close the connection.
    ///
    /// Safe to call more than once.
    pub async fn dispose(&self) {
        let sessions: Vec<SessionId> = {
            let mut state = self.lock_state();
            state.sessions.drain().collect()
        };

        for session_id in sessions {
            if let Err(err) = self
                .send(
                    "Target.detachFromTarget",
                    Some(json!({ "sessionId": session_id })),
                    None,
                )
                .await
            {
                log::debug!("best-effort session detach failed: {}", err);
            }
        }

        self.handle_close("connection disposed");
    }

    /// True once the connection has observed a close or been disposed.
    pub fn is_closed(&self) -> bool {
        self.lock_state().closed.is_some()
    }

    fn dispatch(&self, text: &str) {
        let message: IncomingMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(err) => {
                log::warn!("dropping unparseable protocol message: {}", err);
                return;
            }
        };

        if let Some(id) = message.id {
            self.dispatch_response(id, message);
        } else if let Some(method) = message.method {
            self.dispatch_event(&method, message.session_id, message.params);
        } else {
            log::debug!("protocol message with neither id nor method; ignoring");
        }
    }

    fn dispatch_response(&self, id: u64, message: IncomingMessage) {
        let entry = self.lock_state().pending.remove(&id);
        let Some((method, tx)) = entry else {
            log::debug!("response for unknown request id {}", id);
            return;
        };

        let outcome = match message.error {
            Some(protocol_error) => Err(BrowserError::Protocol {
                method,
                message: sanitize(&protocol_error.message),
            }),
            None => Ok(message.result.unwrap_or(Value::Null)),
        };

        // Caller may have given up (timeout); nothing to do if so.
        let _ = tx.send(outcome);
    }

    fn dispatch_event(&self, method: &str, session_id: Option<String>, params: Option<Value>) {
        let key: SubscriberKey = (session_id, method.to_string());
        let payload = params.unwrap_or(Value::Null);

        let mut state = self.lock_state();
        if let Some(list) = state.subscribers.get_mut(&key) {
            list.retain(|subscriber| subscriber.tx.send(payload.clone()).is_ok());
            if list.is_empty() {
                state.subscribers.remove(&key);
            }
        }
    }

    fn handle_close(&self, reason: &str) {
        let pending = {
            let mut state = self.lock_state();
            if state.closed.is_some() {
                return;
            }
            state.closed = Some(reason.to_string());
            state.subscribers.clear();
            std::mem::take(&mut state.pending)
        };

        for (_, (method, tx)) in pending {
            let _ = tx.send(Err(BrowserError::ConnectionClosed(format!(
                "{} while '{}' was in flight",
                reason, method
            ))));
        }
    }
}
