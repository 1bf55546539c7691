//! Scripted transport for exercising the control plane without a browser.
//!
//! Test-only: commands are answered from scripted results, and events can be
//! emitted either directly or automatically when a given command is seen
//! (mirroring how e.g. `Runtime.enable` replays `executionContextCreated`).

use crate::error::Result;
use crate::transport::connection::{CdpConnection, RawTransport};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type EmitSpec = (String, Value, Option<String>);

pub(crate) struct MockTransport {
    incoming: mpsc::UnboundedSender<String>,
    queued: Mutex<HashMap<String, VecDeque<Value>>>,
    defaults: Mutex<HashMap<String, Value>>,
    errors: Mutex<HashMap<String, VecDeque<String>>>,
    swallowed: Mutex<HashSet<String>>,
    auto_emit: Mutex<HashMap<String, Vec<EmitSpec>>>,
    sent: Mutex<Vec<Value>>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            incoming: tx,
            queued: Mutex::new(HashMap::new()),
            defaults: Mutex::new(HashMap::new()),
            errors: Mutex::new(HashMap::new()),
            swallowed: Mutex::new(HashSet::new()),
            auto_emit: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
        });
        (transport, rx)
    }

    /// Queue one result for the next call of `method`
    pub fn script(&self, method: &str, result: Value) {
        self.queued
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(result);
    }

    /// Result returned for `method` whenever no queued result remains
    pub fn script_default(&self, method: &str, result: Value) {
        self.defaults
            .lock()
            .unwrap()
            .insert(method.to_string(), result);
    }

    /// Queue a protocol error for the next call of `method`
    pub fn script_error(&self, method: &str, message: &str) {
        self.errors
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(message.to_string());
    }

    /// Never answer `method`; the request stays in flight
    #[allow(dead_code)]
    pub fn swallow(&self, method: &str) {
        self.swallowed.lock().unwrap().insert(method.to_string());
    }

    /// Emit `event` every time `command` is observed
    pub fn emit_on(&self, command: &str, event: &str, params: Value, session_id: Option<&str>) {
        self.auto_emit
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push((event.to_string(), params, session_id.map(str::to_string)));
    }

    /// Emit an event immediately
    pub fn emit(&self, event: &str, params: Value, session_id: Option<&str>) {
        let mut message = json!({ "method": event, "params": params });
        if let Some(session) = session_id {
            message["sessionId"] = json!(session);
        }
        let _ = self.incoming.send(message.to_string());
    }

    /// Methods of every command sent so far, in order
    pub fn sent_methods(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| m.get("method").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    /// Params of every call of `method`, in order
    #[allow(dead_code)]
    pub fn calls_of(&self, method: &str) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.get("method").and_then(Value::as_str) == Some(method))
            .map(|m| m.get("params").cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Number of calls of `method`
    pub fn call_count(&self, method: &str) -> usize {
        self.calls_of(method).len()
    }
}

#[async_trait]
impl RawTransport for MockTransport {
    async fn send(&self, text: String) -> Result<()> {
        let message: Value = serde_json::from_str(&text).expect("outgoing message must be JSON");
        self.sent.lock().unwrap().push(message.clone());

        let method = message["method"].as_str().unwrap_or_default().to_string();
        let id = message["id"].as_u64().expect("outgoing message must carry id");

        if self.swallowed.lock().unwrap().contains(&method) {
            return Ok(());
        }

        let error = self
            .errors
            .lock()
            .unwrap()
            .get_mut(&method)
            .and_then(VecDeque::pop_front);

        let response = if let Some(message_text) = error {
            json!({ "id": id, "error": { "code": -32000, "message": message_text } })
        } else {
            let result = self
                .queued
                .lock()
                .unwrap()
                .get_mut(&method)
                .and_then(VecDeque::pop_front)
                .or_else(|| self.defaults.lock().unwrap().get(&method).cloned())
                .unwrap_or_else(|| json!({}));
            json!({ "id": id, "result": result })
        };

        let _ = self.incoming.send(response.to_string());

        let emits = self
            .auto_emit
            .lock()
            .unwrap()
            .get(&method)
            .cloned()
            .unwrap_or_default();
        for (event, params, session) in emits {
            self.emit(&event, params, session.as_deref());
        }

        Ok(())
    }
}

/// Mock transport wired into a live connection
pub(crate) struct MockCdp {
    pub transport: Arc<MockTransport>,
    pub conn: Arc<CdpConnection>,
}

impl MockCdp {
    pub fn new() -> Self {
        let (transport, rx) = MockTransport::new();
        let conn = CdpConnection::connect(transport.clone(), rx);
        Self { transport, conn }
    }

    /// Script the minimum surface for frame-manager initialization:
    /// a single main frame and one default execution context.
    pub fn with_basic_page(url: &str) -> Self {
        let mock = Self::new();
        mock.transport.script_default("Page.enable", json!({}));
        mock.transport.script_default("Runtime.enable", json!({}));
        mock.transport.script_default(
            "Page.getFrameTree",
            json!({
                "frameTree": {
                    "frame": { "id": "MAIN", "url": url }
                }
            }),
        );
        mock.transport.emit_on(
            "Runtime.enable",
            "Runtime.executionContextCreated",
            json!({
                "context": {
                    "id": 1,
                    "name": "",
                    "auxData": { "frameId": "MAIN", "isDefault": true }
                }
            }),
            None,
        );
        mock
    }
}
