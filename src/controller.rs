//! Page-level entry point tying the subsystems together.
//!
//! A [`PageController`] owns one connection's frame manager and script
//! injector and exposes the capture / resolve / settle operations. Controllers
//! live in an explicitly owned [`ControllerRegistry`] with a create/dispose
//! lifecycle; nothing is pooled in process-wide hidden state, so tests and
//! multi-instance use stay deterministic.

use crate::capture::{
    capture_dom_state, wait_for_settled_dom, CaptureOptions, SettleOptions, SettleStats, Snapshot,
};
use crate::error::Result;
use crate::frame::FrameContextManager;
use crate::inject::ScriptInjector;
use crate::resolve::{ResolveOptions, ResolveScope};
use crate::transport::CdpConnection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// One page's control plane: connection, frame graph, and injector
pub struct PageController {
    conn: Arc<CdpConnection>,
    frames: Arc<FrameContextManager>,
    injector: ScriptInjector,
}

impl PageController {
    pub fn new(conn: Arc<CdpConnection>) -> Self {
        Self {
            frames: FrameContextManager::new(conn.clone()),
            injector: ScriptInjector::new(conn.clone()),
            conn,
        }
    }

    /// Connect over a websocket endpoint and build a controller on top
    #[cfg(feature = "ws")]
    pub async fn connect_ws(url: &str) -> Result<Self> {
        let (transport, incoming) = crate::transport::WsTransport::connect(url).await?;
        Ok(Self::new(CdpConnection::connect(transport, incoming)))
    }

    pub fn connection(&self) -> &Arc<CdpConnection> {
        &self.conn
    }

    pub fn frames(&self) -> &Arc<FrameContextManager> {
        &self.frames
    }

    /// Capture an immutable snapshot of the page, retrying transient races
    pub async fn capture_dom_state(&self, opts: &CaptureOptions) -> Result<Snapshot> {
        capture_dom_state(&self.conn, &self.frames, &self.injector, opts).await
    }

    /// Build a per-action resolution scope over a captured snapshot
    pub fn resolver<'a>(&'a self, snapshot: &'a Snapshot, options: ResolveOptions) -> ResolveScope<'a> {
        ResolveScope::new(&self.conn, &self.frames, snapshot, options)
    }

    /// Wait for the page's network activity to go quiet
    pub async fn wait_for_settled_dom(&self, timeout_ms: u64, opts: &SettleOptions) -> SettleStats {
        wait_for_settled_dom(&self.conn, None, timeout_ms, opts).await
    }

    pub fn set_frame_filtering_enabled(&self, enabled: bool) {
        self.frames.set_frame_filtering_enabled(enabled);
    }

    /// Tear down listeners and detach tracked sessions best-effort
    pub async fn dispose(&self) {
        self.frames.clear();
        self.conn.dispose().await;
    }
}

/// Explicitly owned collection of controllers keyed by caller-chosen ids.
///
/// Passed by reference to consumers instead of living as a module-level
/// cache; dropping the registry (or disposing an entry) releases everything.
#[derive(Default)]
pub struct ControllerRegistry {
    controllers: Mutex<HashMap<String, Arc<PageController>>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<PageController>>> {
        self.controllers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a controller under `key`, replacing (and returning) any
    /// previous holder so the caller can dispose it.
    pub fn insert(
        &self,
        key: &str,
        controller: PageController,
    ) -> (Arc<PageController>, Option<Arc<PageController>>) {
        let controller = Arc::new(controller);
        let previous = self.lock().insert(key.to_string(), controller.clone());
        (controller, previous)
    }

    pub fn get(&self, key: &str) -> Option<Arc<PageController>> {
        self.lock().get(key).cloned()
    }

    /// Remove and dispose the controller under `key`, if any
    pub async fn dispose(&self, key: &str) -> bool {
        let removed = self.lock().remove(key);
        match removed {
            Some(controller) => {
                controller.dispose().await;
                true
            }
            None => false,
        }
    }

    /// Dispose every registered controller
    pub async fn dispose_all(&self) {
        let drained: Vec<Arc<PageController>> = self.lock().drain().map(|(_, c)| c).collect();
        for controller in drained {
            controller.dispose().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::MockCdp;
    use serde_json::json;

    fn scripted_controller() -> (MockCdp, PageController) {
        let mock = MockCdp::with_basic_page("https://example.com");
        mock.transport
            .script_default("Target.getTargets", json!({ "targetInfos": [] }));
        mock.transport.script_default(
            "DOM.getDocument",
            json!({
                "root": {
                    "nodeId": 1, "backendNodeId": 9, "nodeName": "#document", "nodeType": 9,
                    "frameId": "MAIN",
                    "children": [{
                        "nodeId": 2, "backendNodeId": 10, "nodeName": "HTML", "nodeType": 1,
                        "children": [{
                            "nodeId": 3, "backendNodeId": 501, "nodeName": "BODY", "nodeType": 1,
                            "children": []
                        }]
                    }]
                }
            }),
        );
        mock.transport.script_default(
            "Accessibility.getFullAXTree",
            json!({
                "nodes": [{
                    "nodeId": "1",
                    "role": { "type": "role", "value": "RootWebArea" },
                    "name": { "type": "computedString", "value": "Page" },
                    "backendDOMNodeId": 501,
                    "childIds": []
                }]
            }),
        );
        mock.transport.script_default(
            "Runtime.evaluate",
            json!({ "result": { "type": "object", "value": [] } }),
        );
        let controller = PageController::new(mock.conn.clone());
        (mock, controller)
    }

    #[tokio::test]
    async fn test_capture_then_resolve_through_controller() {
        let (mock, controller) = scripted_controller();
        mock.transport.script_default(
            "DOM.resolveNode",
            json!({ "object": { "objectId": "OBJ-1" } }),
        );

        let snapshot = controller
            .capture_dom_state(&CaptureOptions::default())
            .await
            .unwrap();
        assert!(snapshot.elements.contains_key(&crate::a11y::EncodedId::new(0, 501)));

        let mut resolver = controller.resolver(&snapshot, ResolveOptions::default());
        let resolved = resolver.resolve("0-501").await.unwrap();
        assert_eq!(resolved.object_id, "OBJ-1");
    }

    #[tokio::test]
    async fn test_registry_create_get_dispose() {
        let registry = ControllerRegistry::new();
        let (_mock, controller) = scripted_controller();

        let (stored, previous) = registry.insert("page-1", controller);
        assert!(previous.is_none());
        assert!(Arc::ptr_eq(&stored, &registry.get("page-1").unwrap()));

        assert!(registry.dispose("page-1").await);
        assert!(registry.get("page-1").is_none());
        assert!(!registry.dispose("page-1").await);
    }

    #[tokio::test]
    async fn test_dispose_all_empties_registry() {
        let registry = ControllerRegistry::new();
        let (_m1, c1) = scripted_controller();
        let (_m2, c2) = scripted_controller();
        registry.insert("a", c1);
        registry.insert("b", c2);

        registry.dispose_all().await;
        assert!(registry.get("a").is_none());
        assert!(registry.get("b").is_none());
    }
}
