//! Scripted transport for integration tests, built only on the public API.

use async_trait::async_trait;
use browser_control::{CdpConnection, RawTransport, Result};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type EmitSpec = (String, Value, Option<String>);

pub struct ScriptedBrowser {
    incoming: mpsc::UnboundedSender<String>,
    queued: Mutex<HashMap<String, VecDeque<Value>>>,
    defaults: Mutex<HashMap<String, Value>>,
    errors: Mutex<HashMap<String, VecDeque<String>>>,
    auto_emit: Mutex<HashMap<String, Vec<EmitSpec>>>,
    sent: Mutex<Vec<Value>>,
}

impl ScriptedBrowser {
    pub fn connect() -> (Arc<Self>, Arc<CdpConnection>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let browser = Arc::new(Self {
            incoming: tx,
            queued: Mutex::new(HashMap::new()),
            defaults: Mutex::new(HashMap::new()),
            errors: Mutex::new(HashMap::new()),
            auto_emit: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
        });
        let conn = CdpConnection::connect(browser.clone(), rx);
        (browser, conn)
    }

    #[allow(dead_code)]
    pub fn script(&self, method: &str, result: Value) {
        self.queued
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn script_default(&self, method: &str, result: Value) {
        self.defaults
            .lock()
            .unwrap()
            .insert(method.to_string(), result);
    }

    #[allow(dead_code)]
    pub fn script_error(&self, method: &str, message: &str) {
        self.errors
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(message.to_string());
    }

    pub fn emit_on(&self, command: &str, event: &str, params: Value, session_id: Option<&str>) {
        self.auto_emit
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push((event.to_string(), params, session_id.map(str::to_string)));
    }

    #[allow(dead_code)]
    pub fn emit(&self, event: &str, params: Value, session_id: Option<&str>) {
        let mut message = json!({ "method": event, "params": params });
        if let Some(session) = session_id {
            message["sessionId"] = json!(session);
        }
        let _ = self.incoming.send(message.to_string());
    }

    #[allow(dead_code)]
    pub fn call_count(&self, method: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.get("method").and_then(Value::as_str) == Some(method))
            .count()
    }
}

#[async_trait]
impl RawTransport for ScriptedBrowser {
    async fn send(&self, text: String) -> Result<()> {
        let message: Value = serde_json::from_str(&text).expect("outgoing message must be JSON");
        self.sent.lock().unwrap().push(message.clone());

        let method = message["method"].as_str().unwrap_or_default().to_string();
        let id = message["id"].as_u64().expect("outgoing message must carry id");

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
            let mut message = json!({ "method": event, "params": params });
            if let Some(session) = session {
                message["sessionId"] = json!(session);
            }
            let _ = self.incoming.send(message.to_string());
        }

        Ok(())
    }
}

/// Script a two-frame page: main frame plus one child iframe.
///
/// The child's url is caller-chosen so tests can make it an ad frame or a
/// legitimate embed.
pub fn script_two_frame_page(browser: &ScriptedBrowser, child_url: &str) {
    browser.script_default("Page.enable", json!({}));
    browser.script_default("Runtime.enable", json!({}));
    browser.script_default("Target.getTargets", json!({ "targetInfos": [] }));
    browser.script_default(
        "Page.getFrameTree",
        json!({
            "frameTree": {
                "frame": { "id": "MAIN", "url": "https://example.com" },
                "childFrames": [
                    { "frame": { "id": "CHILD", "parentId": "MAIN", "url": child_url } }
                ]
            }
        }),
    );
    browser.emit_on(
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
    browser.emit_on(
        "Runtime.enable",
        "Runtime.executionContextCreated",
        json!({
            "context": {
                "id": 2,
                "name": "",
                "auxData": { "frameId": "CHILD", "isDefault": true }
            }
        }),
        None,
    );
    browser.script_default(
        "DOM.getDocument",
        json!({
            "root": {
                "nodeId": 1, "backendNodeId": 9, "nodeName": "#document", "nodeType": 9,
                "frameId": "MAIN",
                "children": [{
                    "nodeId": 2, "backendNodeId": 10, "nodeName": "HTML", "nodeType": 1,
                    "children": [{
                        "nodeId": 3, "backendNodeId": 11, "nodeName": "BODY", "nodeType": 1,
                        "children": [
                            {
                                "nodeId": 4, "backendNodeId": 501, "nodeName": "BUTTON", "nodeType": 1,
                                "children": []
                            },
                            {
                                "nodeId": 5, "backendNodeId": 50, "nodeName": "IFRAME", "nodeType": 1,
                                "frameId": "CHILD",
                                "contentDocument": {
                                    "nodeId": 6, "backendNodeId": 60, "nodeName": "#document", "nodeType": 9,
                                    "children": [{
                                        "nodeId": 7, "backendNodeId": 61, "nodeName": "HTML", "nodeType": 1,
                                        "children": [{
                                            "nodeId": 8, "backendNodeId": 62, "nodeName": "BODY", "nodeType": 1,
                                            "children": [{
                                                "nodeId": 9, "backendNodeId": 600, "nodeName": "A", "nodeType": 1,
                                                "children": []
                                            }]
                                        }]
                                    }]
                                }
                            }
                        ]
                    }]
                }]
            }
        }),
    );
    browser.script_default(
        "Accessibility.getFullAXTree",
        json!({
            "nodes": [
                {
                    "nodeId": "1",
                    "role": { "type": "role", "value": "RootWebArea" },
                    "name": { "type": "computedString", "value": "Page" },
                    "backendDOMNodeId": 11,
                    "childIds": ["2"]
                },
                {
                    "nodeId": "2",
                    "role": { "type": "role", "value": "button" },
                    "name": { "type": "computedString", "value": "Submit" },
                    "backendDOMNodeId": 501,
                    "parentId": "1",
                    "childIds": []
                }
            ]
        }),
    );
    browser.script_default(
        "Runtime.evaluate",
        json!({ "result": { "type": "object", "value": [] } }),
    );
}
