//! Typed structures for the CDP message envelope and the protocol domains
//! used by this crate (Page, Runtime, DOM, Network, Target, Accessibility).
//!
//! Raw JSON crosses the boundary exactly once: every incoming payload is
//! deserialized into one of these structs before any field is read.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One message received from the browser: either a command response
/// (carries `id`) or an event (carries `method`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<ProtocolError>,
    pub method: Option<String>,
    pub params: Option<Value>,
    pub session_id: Option<String>,
}

/// Protocol-level error attached to a command response
#[derive(Debug, Deserialize)]
pub struct ProtocolError {
    pub code: i64,
    pub message: String,
}

/// One command sent to the browser
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage<'a> {
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a str>,
}

// ---------------------------------------------------------------------------
// Page domain
// ---------------------------------------------------------------------------

/// A frame as reported by the Page domain
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub id: String,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub url: String,
    pub name: Option<String>,
}

/// Result of `Page.getFrameTree`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTreeResult {
    pub frame_tree: FrameTreeNode,
}

/// One node of the frame tree
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTreeNode {
    pub frame: Frame,
    pub child_frames: Option<Vec<FrameTreeNode>>,
}

/// `Page.frameAttached` event
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameAttachedEvent {
    pub frame_id: String,
    pub parent_frame_id: String,
}

/// `Page.frameDetached` event
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameDetachedEvent {
    pub frame_id: String,
}

/// `Page.frameNavigated` event
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameNavigatedEvent {
    pub frame: Frame,
}

// ---------------------------------------------------------------------------
// Runtime domain
// ---------------------------------------------------------------------------

/// `Runtime.executionContextCreated` event
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextCreatedEvent {
    pub context: ExecutionContextDescription,
}

/// Description of one execution context
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDescription {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub aux_data: Option<ExecutionContextAuxData>,
}

/// The `auxData` blob attached to an execution context
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextAuxData {
    pub frame_id: Option<String>,
    pub is_default: Option<bool>,
}

/// `Runtime.executionContextDestroyed` event
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDestroyedEvent {
    pub execution_context_id: i64,
}

/// A remote object handle returned by Runtime/DOM commands
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    pub object_id: Option<String>,
    pub value: Option<Value>,
}

/// Result of `Runtime.evaluate` / `Runtime.callFunctionOn`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResult {
    pub result: RemoteObject,
    pub exception_details: Option<Value>,
}

// ---------------------------------------------------------------------------
// DOM domain
// ---------------------------------------------------------------------------

/// Result of `DOM.getDocument`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDocumentResult {
    pub root: DomNode,
}

/// One DOM node from a piercing document walk
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomNode {
    pub node_id: i64,
    pub backend_node_id: i64,
    pub node_name: String,
    pub node_type: i64,
    pub children: Option<Vec<DomNode>>,
    pub frame_id: Option<String>,
    pub content_document: Option<Box<DomNode>>,
}

/// Result of `DOM.resolveNode`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveNodeResult {
    pub object: RemoteObject,
}

/// Result of `DOM.describeNode`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeNodeResult {
    pub node: DescribedNode,
}

/// Subset of node description used for backend-id refresh
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribedNode {
    pub backend_node_id: i64,
}

/// Result of `DOM.getBoxModel`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxModelResult {
    pub model: BoxModel,
}

/// Box model quads; `content` is 8 numbers (x1,y1,...,x4,y4)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxModel {
    pub content: Vec<f64>,
    pub width: f64,
    pub height: f64,
}

// ---------------------------------------------------------------------------
// Target domain
// ---------------------------------------------------------------------------

/// Result of `Target.attachToTarget`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachToTargetResult {
    pub session_id: String,
}

/// Result of `Target.getTargets`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTargetsResult {
    pub target_infos: Vec<TargetInfo>,
}

/// One discovered target
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub target_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub attached: bool,
}

// ---------------------------------------------------------------------------
// Network domain
// ---------------------------------------------------------------------------

/// `Network.requestWillBeSent` event (fields used by the settle controller)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSentEvent {
    pub request_id: String,
    #[serde(rename = "type")]
    pub resource_type: Option<String>,
}

/// `Network.loadingFinished` / `Network.loadingFailed` events
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingLifecycleEvent {
    pub request_id: String,
}
