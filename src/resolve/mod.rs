//! Element resolution: encoded identity back to a live object handle.
//!
//! Resolution goes backend-id first (cheap, exact), falling back to the
//! element's recorded xpath when DOM mutation has invalidated the old id.
//! Every failure mode is a distinct named error rather than a silent null.

use crate::a11y::EncodedId;
use crate::capture::Snapshot;
use crate::error::{BrowserError, Result};
use crate::frame::FrameContextManager;
use crate::protocol::{DescribeNodeResult, EvaluateResult, ResolveNodeResult};
use crate::transport::CdpConnection;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Tuning for element resolution
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Bounded wait for the frame's execution context
    pub context_timeout_ms: u64,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            context_timeout_ms: 5000,
        }
    }
}

/// A live, actionable reference to one element.
///
/// `object_id` is context-bound and short-lived: navigation or GC invalidates
/// it, so it must never be cached beyond a single compound action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedElement {
    pub backend_node_id: i64,
    pub frame_id: String,
    pub object_id: String,
}

/// Per-action resolution scope.
///
/// Holds a cache so one compound action never resolves the same id twice.
/// Scopes are created fresh from a snapshot for each action and discarded
/// with it; object handles do not survive navigation.
pub struct ResolveScope<'a> {
    conn: &'a Arc<CdpConnection>,
    frames: &'a Arc<FrameContextManager>,
    snapshot: &'a Snapshot,
    options: ResolveOptions,
    cache: HashMap<EncodedId, ResolvedElement>,
}

impl<'a> ResolveScope<'a> {
    pub fn new(
        conn: &'a Arc<CdpConnection>,
        frames: &'a Arc<FrameContextManager>,
        snapshot: &'a Snapshot,
        options: ResolveOptions,
    ) -> Self {
        Self {
            conn,
            frames,
            snapshot,
            options,
            cache: HashMap::new(),
        }
    }

    /// Resolve an encoded id into a live element reference.
    ///
    /// Steps: decode, find the frame and its session, await its execution
    /// context (bounded), then resolve the backend id into a remote object.
    /// If the backend id no longer resolves, fall back to evaluating the
    /// element's recorded xpath against the frame's current document.
    pub async fn resolve(&mut self, raw: &str) -> Result<ResolvedElement> {
        let encoded: EncodedId = raw.parse()?;

        if let Some(hit) = self.cache.get(&encoded) {
            return Ok(hit.clone());
        }

        let frame = self
            .frames
            .frame_by_index(encoded.frame_index)
            .ok_or_else(|| {
                BrowserError::FrameNotFound(format!("frame index {}", encoded.frame_index))
            })?;
        let session = self.frames.session_for_frame(encoded.frame_index)?;

        let context_id = self
            .frames
            .wait_for_execution_context(&frame.frame_id, self.options.context_timeout_ms)
            .await?;

        let resolved = match self
            .resolve_by_backend_id(&encoded, &frame.frame_id, session.as_deref(), context_id)
            .await
        {
            Ok(resolved) => resolved,
            Err(err) => {
                log::debug!(
                    "backend-id resolution failed for {}, trying xpath: {}",
                    encoded,
                    err
                );
                self.resolve_by_xpath(&encoded, &frame.frame_id, session.as_deref(), context_id)
                    .await?
            }
        };

        self.cache.insert(encoded, resolved.clone());
        Ok(resolved)
    }

    async fn resolve_by_backend_id(
        &self,
        encoded: &EncodedId,
        frame_id: &str,
        session: Option<&str>,
        context_id: i64,
    ) -> Result<ResolvedElement> {
        let raw = self
            .conn
            .send(
                "DOM.resolveNode",
                Some(json!({
                    "backendNodeId": encoded.backend_node_id,
                    "executionContextId": context_id,
                })),
                session,
            )
            .await?;
        let result: ResolveNodeResult = serde_json::from_value(raw)?;

        let object_id = result.object.object_id.ok_or_else(|| BrowserError::ResolveFailed {
            encoded_id: encoded.to_string(),
            reason: "resolveNode returned no object handle".to_string(),
        })?;

        Ok(ResolvedElement {
            backend_node_id: encoded.backend_node_id as i64,
            frame_id: frame_id.to_string(),
            object_id,
        })
    }

    /// Evaluate the recorded xpath in the frame's current document, then
    /// refresh the backend id from the found node.
    async fn resolve_by_xpath(
        &self,
        encoded: &EncodedId,
        frame_id: &str,
        session: Option<&str>,
        context_id: i64,
    ) -> Result<ResolvedElement> {
        let xpath = self
            .snapshot
            .xpath_map
            .get(encoded)
            .ok_or_else(|| BrowserError::MissingXpath(encoded.to_string()))?;

        let expression = format!(
            "document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
            serde_json::to_string(xpath)?
        );

        let raw = self
            .conn
            .send(
                "Runtime.evaluate",
                Some(json!({
                    "expression": expression,
                    "contextId": context_id,
                })),
                session,
            )
            .await?;
        let evaluated: EvaluateResult = serde_json::from_value(raw)?;

        let object_id = evaluated
            .result
            .object_id
            .ok_or_else(|| BrowserError::ResolveFailed {
                encoded_id: encoded.to_string(),
                reason: "xpath matched no element".to_string(),
            })?;

        // The old backend id is stale by definition here; refresh it from
        // the live node.
        let raw = self
            .conn
            .send(
                "DOM.describeNode",
                Some(json!({ "objectId": object_id })),
                session,
            )
            .await?;
        let described: DescribeNodeResult = serde_json::from_value(raw)?;

        Ok(ResolvedElement {
            backend_node_id: described.node.backend_node_id,
            frame_id: frame_id.to_string(),
            object_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Snapshot;
    use crate::transport::testing::MockCdp;
    use serde_json::json;

    fn snapshot_with_xpath(encoded: EncodedId, xpath: &str) -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot.xpath_map.insert(encoded, xpath.to_string());
        snapshot.backend_node_map.insert(encoded, encoded.backend_node_id as i64);
        snapshot
    }

    async fn initialized_frames(mock: &MockCdp) -> Arc<FrameContextManager> {
        let frames = FrameContextManager::new(mock.conn.clone());
        frames.ensure_initialized().await.unwrap();
        frames
    }

    #[tokio::test]
    async fn test_backend_id_resolution() {
        let mock = MockCdp::with_basic_page("https://example.com");
        mock.transport.script_default(
            "DOM.resolveNode",
            json!({ "object": { "objectId": "OBJ-1" } }),
        );

        let frames = initialized_frames(&mock).await;
        let snapshot = Snapshot::default();
        let mut scope =
            ResolveScope::new(&mock.conn, &frames, &snapshot, ResolveOptions::default());

        let resolved = scope.resolve("0-501").await.unwrap();
        assert_eq!(resolved.backend_node_id, 501);
        assert_eq!(resolved.frame_id, "MAIN");
        assert_eq!(resolved.object_id, "OBJ-1");
    }

    #[tokio::test]
    async fn test_xpath_fallback_when_backend_id_fails() {
        let mock = MockCdp::with_basic_page("https://example.com");
        mock.transport
            .script_error("DOM.resolveNode", "No node with given id found");
        mock.transport.script_default(
            "Runtime.evaluate",
            json!({ "result": { "objectId": "OBJ-XPATH" } }),
        );
        mock.transport.script_default(
            "DOM.describeNode",
            json!({ "node": { "backendNodeId": 777 } }),
        );

        let frames = initialized_frames(&mock).await;
        let snapshot = snapshot_with_xpath(EncodedId::new(0, 501), "//button[1]");
        let mut scope =
            ResolveScope::new(&mock.conn, &frames, &snapshot, ResolveOptions::default());

        let resolved = scope.resolve("0-501").await.unwrap();
        assert_eq!(resolved.object_id, "OBJ-XPATH");
        // Backend id refreshed from the live node, not the stale encoding.
        assert_eq!(resolved.backend_node_id, 777);

        let evaluate_calls = mock.transport.calls_of("Runtime.evaluate");
        assert!(evaluate_calls[0]["expression"]
            .as_str()
            .unwrap()
            .contains("//button[1]"));
    }

    #[tokio::test]
    async fn test_missing_xpath_is_named_error() {
        let mock = MockCdp::with_basic_page("https://example.com");
        mock.transport
            .script_error("DOM.resolveNode", "No node with given id found");

        let frames = initialized_frames(&mock).await;
        let snapshot = Snapshot::default();
        let mut scope =
            ResolveScope::new(&mock.conn, &frames, &snapshot, ResolveOptions::default());

        match scope.resolve("0-501").await.unwrap_err() {
            BrowserError::MissingXpath(id) => assert_eq!(id, "0-501"),
            other => panic!("expected MissingXpath, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_encoded_id_fails_fast() {
        let mock = MockCdp::with_basic_page("https://example.com");
        let frames = initialized_frames(&mock).await;
        let snapshot = Snapshot::default();
        let mut scope =
            ResolveScope::new(&mock.conn, &frames, &snapshot, ResolveOptions::default());

        match scope.resolve("garbage").await.unwrap_err() {
            BrowserError::InvalidEncodedId(_) => {}
            other => panic!("expected InvalidEncodedId, got {other:?}"),
        }
        assert_eq!(mock.transport.call_count("DOM.resolveNode"), 0);
    }

    #[tokio::test]
    async fn test_unknown_frame_index_is_named_error() {
        let mock = MockCdp::with_basic_page("https://example.com");
        let frames = initialized_frames(&mock).await;
        let snapshot = Snapshot::default();
        let mut scope =
            ResolveScope::new(&mock.conn, &frames, &snapshot, ResolveOptions::default());

        match scope.resolve("42-1").await.unwrap_err() {
            BrowserError::FrameNotFound(message) => assert!(message.contains("42")),
            other => panic!("expected FrameNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_xpath_matching_nothing_is_resolve_failure() {
        let mock = MockCdp::with_basic_page("https://example.com");
        mock.transport
            .script_error("DOM.resolveNode", "No node with given id found");
        mock.transport.script_default(
            "Runtime.evaluate",
            json!({ "result": { "type": "object", "subtype": "null" } }),
        );

        let frames = initialized_frames(&mock).await;
        let snapshot = snapshot_with_xpath(EncodedId::new(0, 501), "//button[99]");
        let mut scope =
            ResolveScope::new(&mock.conn, &frames, &snapshot, ResolveOptions::default());

        match scope.resolve("0-501").await.unwrap_err() {
            BrowserError::ResolveFailed { encoded_id, .. } => assert_eq!(encoded_id, "0-501"),
            other => panic!("expected ResolveFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_repeat_resolution_is_cached() {
        let mock = MockCdp::with_basic_page("https://example.com");
        mock.transport.script_default(
            "DOM.resolveNode",
            json!({ "object": { "objectId": "OBJ-1" } }),
        );

        let frames = initialized_frames(&mock).await;
        let snapshot = Snapshot::default();
        let mut scope =
            ResolveScope::new(&mock.conn, &frames, &snapshot, ResolveOptions::default());

        let first = scope.resolve("0-501").await.unwrap();
        let second = scope.resolve("0-501").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(mock.transport.call_count("DOM.resolveNode"), 1);
    }
}
