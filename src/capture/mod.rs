//! Retrying DOM snapshot capture.
//!
//! A capture walks every tracked frame: pierced DOM walk for xpath/tag maps,
//! accessibility tree fetch, scrollable-element discovery, then tree
//! building. The whole attempt is retried on a small allowlist of transient
//! navigation races; anything else propagates immediately. A successful
//! capture produces an immutable [`Snapshot`]; a new capture always builds a
//! new bundle rather than patching the previous one.

pub mod settle;
pub mod stream;

pub use settle::{
    wait_for_settled_dom, SettleOptions, SettleStats, DEFAULT_SETTLE_TIMEOUT_MS,
    MAX_SETTLE_TIMEOUT_MS,
};
pub use stream::ChunkAssembler;

use crate::a11y::{build_frame_tree, AccessibilityNode, AxNode, BoundingBox, EncodedId};
use crate::error::{sanitize, BrowserError, Result};
use crate::frame::{FrameContextManager, FrameInfo};
use crate::inject::{ScriptInjector, DOM_HELPER_SCRIPT};
use crate::protocol::{BoxModelResult, DomNode, EvaluateResult, GetDocumentResult};
use crate::transport::CdpConnection;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const HELPER_KEY: &str = "dom-helper";

/// Immutable result of one DOM capture.
///
/// Created wholesale on success and never patched; concurrent readers of an
/// older snapshot are unaffected by later captures. All ids inside are valid
/// only for the page generation that produced them.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Indented text rendering of every frame's tree, main frame first
    pub rendered_text: String,
    pub elements: IndexMap<EncodedId, AccessibilityNode>,
    pub xpath_map: IndexMap<EncodedId, String>,
    pub backend_node_map: IndexMap<EncodedId, i64>,
    pub frame_map: IndexMap<u64, FrameInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box_map: Option<IndexMap<EncodedId, BoundingBox>>,
}

/// Tuning for [`capture_dom_state`]
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Attempt budget; clamped to 1..=10 at use
    pub max_retries: u32,
    /// Fetch a box model for every kept element (one extra round-trip each)
    pub include_bounding_boxes: bool,
    /// Bounded wait for a frame's execution context
    pub context_timeout_ms: u64,
    /// Global timeout handed to the settle wait between attempts
    pub settle_timeout_ms: u64,
    pub settle: SettleOptions,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            include_bounding_boxes: false,
            context_timeout_ms: 5000,
            settle_timeout_ms: DEFAULT_SETTLE_TIMEOUT_MS,
            settle: SettleOptions::default(),
        }
    }
}

/// How one capture attempt ended; retry policy is driven by this type
enum AttemptOutcome {
    Ready(Box<Snapshot>),
    Retryable(String),
    Fatal(BrowserError),
}

/// Errors worth retrying: transient races where the page navigated or the
/// target went away mid-capture.
fn recoverable_reason(err: &BrowserError) -> Option<String> {
    match err {
        BrowserError::ExecutionContextTimeout { frame_id, .. } => {
            Some(format!("no execution context for frame {}", frame_id))
        }
        BrowserError::Protocol { message, .. } => {
            let lower = message.to_ascii_lowercase();
            let transient = lower.contains("execution context was destroyed")
                || lower.contains("cannot find context")
                || lower.contains("target closed");
            transient.then(|| sanitize(message))
        }
        _ => None,
    }
}

/// Capture a full snapshot of the page, retrying transient races.
///
/// Retries up to `clamp(max_retries, 1, 10)` attempts; between attempts the
/// settle controller runs so a still-navigating page is not immediately
/// re-raced. An empty main-frame tree counts as a retryable failure, never
/// as success.
pub async fn capture_dom_state(
    conn: &Arc<CdpConnection>,
    frames: &Arc<FrameContextManager>,
    injector: &ScriptInjector,
    opts: &CaptureOptions,
) -> Result<Snapshot> {
    frames.ensure_initialized().await?;

    let max_attempts = opts.max_retries.clamp(1, 10);
    let mut last_reason = String::from("no attempt made");

    for attempt in 1..=max_attempts {
        match capture_attempt(conn, frames, injector, opts).await {
            AttemptOutcome::Ready(snapshot) => return Ok(*snapshot),
            AttemptOutcome::Fatal(err) => return Err(err),
            AttemptOutcome::Retryable(reason) => {
                log::debug!("capture attempt {} failed: {}", attempt, reason);
                last_reason = reason;
                if attempt < max_attempts {
                    wait_for_settled_dom(conn, None, opts.settle_timeout_ms, &opts.settle).await;
                }
            }
        }
    }

    Err(BrowserError::CaptureFailed {
        attempts: max_attempts,
        reason: last_reason,
    })
}

async fn capture_attempt(
    conn: &Arc<CdpConnection>,
    frames: &Arc<FrameContextManager>,
    injector: &ScriptInjector,
    opts: &CaptureOptions,
) -> AttemptOutcome {
    // OOPIF discovery is best-effort; a failure here only means those frames
    // are skipped this attempt.
    if let Err(err) = frames.capture_oopifs().await {
        log::debug!("OOPIF discovery failed: {}", err);
    }

    // One pierced document walk per session covers the main frame and all
    // same-process children; OOPIFs get their own walk on their session.
    let mut dom = DomMaps::default();
    let mut walked_sessions: HashSet<Option<String>> = HashSet::new();

    let frame_list = frames.frames_snapshot();
    for frame in &frame_list {
        let session = match frames.session_for_frame(frame.frame_index) {
            Ok(session) => session,
            Err(_) => return AttemptOutcome::Retryable(format!(
                "frame {} disappeared during capture",
                frame.frame_index
            )),
        };
        if !walked_sessions.insert(session.clone()) {
            continue;
        }
        if let Err(err) = walk_session_document(conn, frames, session.as_deref(), &mut dom).await {
            match recoverable_reason(&err) {
                Some(reason) => return AttemptOutcome::Retryable(reason),
                None => return AttemptOutcome::Fatal(err),
            }
        }
    }

    let mut snapshot = Snapshot {
        bounding_box_map: opts.include_bounding_boxes.then(IndexMap::new),
        ..Snapshot::default()
    };
    let mut chunks = ChunkAssembler::new();

    for (ordinal, frame) in frame_list.iter().enumerate() {
        let session = match frames.session_for_frame(frame.frame_index) {
            Ok(session) => session,
            Err(_) => return AttemptOutcome::Retryable(format!(
                "frame {} disappeared during capture",
                frame.frame_index
            )),
        };

        match extract_frame(conn, frames, injector, opts, frame, session.as_deref(), &dom).await {
            Ok(extract) => {
                chunks.push(ordinal as u64, extract.rendered);
                for (encoded, node) in extract.elements {
                    if let Some(backend) = node.backend_dom_node_id {
                        snapshot.backend_node_map.insert(encoded, backend);
                        if let Some(xpath) = dom.xpath_of(&frame.frame_id, backend) {
                            snapshot.xpath_map.insert(encoded, xpath.to_string());
                        }
                        if let (Some(boxes), Some(bbox)) =
                            (snapshot.bounding_box_map.as_mut(), &node.bounding_box)
                        {
                            boxes.insert(encoded, bbox.clone());
                        }
                    }
                    snapshot.elements.insert(encoded, node);
                }
            }
            Err(FrameFailure::Empty) if frame.frame_index == 0 => {
                return AttemptOutcome::Retryable("empty accessibility tree".to_string());
            }
            Err(FrameFailure::Empty) => {
                // Subframes legitimately render nothing; skip quietly.
                chunks.push(ordinal as u64, String::new());
            }
            Err(FrameFailure::Error(err)) => match recoverable_reason(&err) {
                Some(reason) => return AttemptOutcome::Retryable(reason),
                // Subframe trouble that is not transient is still not worth
                // failing the whole capture over.
                None if frame.frame_index != 0 => {
                    log::debug!("skipping frame {}: {}", frame.frame_index, err);
                    chunks.push(ordinal as u64, String::new());
                }
                None => return AttemptOutcome::Fatal(err),
            },
        }
    }

    // The iframe slot data recorded during the walk is only visible in a
    // snapshot taken now.
    for frame in frames.frames_snapshot() {
        snapshot.frame_map.insert(frame.frame_index, frame);
    }

    snapshot.rendered_text = chunks.into_text();
    AttemptOutcome::Ready(Box::new(snapshot))
}

enum FrameFailure {
    /// Structurally valid but empty tree; retryable for the main frame
    Empty,
    Error(BrowserError),
}

impl From<BrowserError> for FrameFailure {
    fn from(err: BrowserError) -> Self {
        FrameFailure::Error(err)
    }
}

struct FrameExtract {
    rendered: String,
    elements: IndexMap<EncodedId, AccessibilityNode>,
}

#[derive(Debug, Deserialize)]
struct FullAxTreeResult {
    nodes: Vec<AxNode>,
}

async fn extract_frame(
    conn: &Arc<CdpConnection>,
    frames: &Arc<FrameContextManager>,
    injector: &ScriptInjector,
    opts: &CaptureOptions,
    frame: &FrameInfo,
    session: Option<&str>,
    dom: &DomMaps,
) -> std::result::Result<FrameExtract, FrameFailure> {
    let context_id = frames
        .wait_for_execution_context(&frame.frame_id, opts.context_timeout_ms)
        .await?;

    injector
        .ensure_injected(session, HELPER_KEY, DOM_HELPER_SCRIPT, Some(context_id))
        .await;

    // Same-process subframes are queried through the root session with an
    // explicit frameId; an OOPIF session is already scoped to its frame.
    let params = match (session, frame.frame_index) {
        (None, index) if index > 0 => Some(json!({ "frameId": frame.frame_id })),
        _ => None,
    };
    let raw = conn
        .send("Accessibility.getFullAXTree", params, session)
        .await?;
    let tree: FullAxTreeResult =
        serde_json::from_value(raw).map_err(BrowserError::Serialization)?;

    if tree.nodes.is_empty() {
        return Err(FrameFailure::Empty);
    }

    let scrollable =
        scrollable_backend_ids(conn, session, context_id, dom.frame_xpaths(&frame.frame_id)).await;

    let empty = HashMap::new();
    let tag_names = dom.frame_tags(&frame.frame_id).unwrap_or(&empty);

    let mut build = build_frame_tree(tree.nodes, frame.frame_index, tag_names, &scrollable, None);

    if build.elements.is_empty() {
        return Err(FrameFailure::Empty);
    }

    if opts.include_bounding_boxes {
        attach_bounding_boxes(conn, session, &mut build.elements).await;
    }

    Ok(FrameExtract {
        rendered: build.rendered,
        elements: build.elements,
    })
}

/// Fetch a box model for each kept element. Hidden or detached nodes fail
/// this query; those failures are swallowed, never propagated.
async fn attach_bounding_boxes(
    conn: &Arc<CdpConnection>,
    session: Option<&str>,
    elements: &mut IndexMap<EncodedId, AccessibilityNode>,
) {
    for node in elements.values_mut() {
        let Some(backend) = node.backend_dom_node_id else {
            continue;
        };
        let result = conn
            .send(
                "DOM.getBoxModel",
                Some(json!({ "backendNodeId": backend })),
                session,
            )
            .await;
        let Ok(raw) = result else { continue };
        let Ok(model) = serde_json::from_value::<BoxModelResult>(raw) else {
            continue;
        };
        node.bounding_box = BoundingBox::from_content_quad(&model.model.content);
    }
}

/// Ask the injected helper which elements can scroll, mapped back to backend
/// ids through the frame's xpath table. Entirely best-effort.
async fn scrollable_backend_ids(
    conn: &Arc<CdpConnection>,
    session: Option<&str>,
    context_id: i64,
    frame_xpaths: Option<&HashMap<i64, String>>,
) -> HashSet<i64> {
    let Some(xpaths) = frame_xpaths else {
        return HashSet::new();
    };

    let result = conn
        .send(
            "Runtime.evaluate",
            Some(json!({
                "expression": "window.__getScrollableElementXpaths ? window.__getScrollableElementXpaths() : []",
                "contextId": context_id,
                "returnByValue": true,
            })),
            session,
        )
        .await;

    let Ok(raw) = result else {
        return HashSet::new();
    };
    let Ok(evaluated) = serde_json::from_value::<EvaluateResult>(raw) else {
        return HashSet::new();
    };
    let Some(list) = evaluated.result.value.as_ref().and_then(|v| v.as_array()) else {
        return HashSet::new();
    };

    let by_xpath: HashMap<&str, i64> = xpaths
        .iter()
        .map(|(backend, xpath)| (xpath.as_str(), *backend))
        .collect();

    list.iter()
        .filter_map(|v| v.as_str())
        .filter_map(|xpath| by_xpath.get(xpath).copied())
        .collect()
}

/// Per-frame tag-name and xpath tables produced by the pierced DOM walk
#[derive(Default)]
struct DomMaps {
    tags: HashMap<String, HashMap<i64, String>>,
    xpaths: HashMap<String, HashMap<i64, String>>,
}

impl DomMaps {
    fn frame_tags(&self, frame_id: &str) -> Option<&HashMap<i64, String>> {
        self.tags.get(frame_id)
    }

    fn frame_xpaths(&self, frame_id: &str) -> Option<&HashMap<i64, String>> {
        self.xpaths.get(frame_id)
    }

    fn xpath_of(&self, frame_id: &str, backend: i64) -> Option<&str> {
        self.xpaths
            .get(frame_id)?
            .get(&backend)
            .map(String::as_str)
    }
}

async fn walk_session_document(
    conn: &Arc<CdpConnection>,
    frames: &Arc<FrameContextManager>,
    session: Option<&str>,
    dom: &mut DomMaps,
) -> Result<()> {
    let raw = conn
        .send(
            "DOM.getDocument",
            Some(json!({ "depth": -1, "pierce": true })),
            session,
        )
        .await?;
    let document: GetDocumentResult = serde_json::from_value(raw)?;

    let root_frame_id = document.root.frame_id.clone().unwrap_or_default();
    walk_children(&document.root, &root_frame_id, "", dom, frames);
    Ok(())
}

/// Depth-first walk building xpath and tag tables per frame.
///
/// XPath segments count same-tag element siblings (`/html[1]/body[1]/div[2]`).
/// Crossing into an iframe's content document switches the frame scope and
/// restarts the xpath from that document's root; the iframe element's own
/// xpath and sibling position are recorded on the frame graph.
fn walk_children(
    parent: &DomNode,
    frame_id: &str,
    prefix: &str,
    dom: &mut DomMaps,
    frames: &Arc<FrameContextManager>,
) {
    const ELEMENT_NODE: i64 = 1;

    let Some(children) = &parent.children else {
        return;
    };

    let mut tag_counts: HashMap<String, u32> = HashMap::new();
    let mut iframe_position: u32 = 0;

    for child in children {
        if child.node_type != ELEMENT_NODE {
            continue;
        }

        let tag = child.node_name.to_ascii_lowercase();
        let occurrence = tag_counts
            .entry(tag.clone())
            .and_modify(|n| *n += 1)
            .or_insert(1);
        let xpath = format!("{}/{}[{}]", prefix, tag, occurrence);

        let frame_maps = dom.tags.entry(frame_id.to_string()).or_default();
        frame_maps.insert(child.backend_node_id, tag.clone());
        dom.xpaths
            .entry(frame_id.to_string())
            .or_default()
            .insert(child.backend_node_id, xpath.clone());

        if tag == "iframe" || tag == "frame" {
            if let Some(child_frame_id) = &child.frame_id {
                frames.record_iframe_slot(child_frame_id, &xpath, iframe_position);
                if let Some(content) = &child.content_document {
                    walk_children(content, child_frame_id, "", dom, frames);
                }
            }
            iframe_position += 1;
        } else {
            walk_children(child, frame_id, &xpath, dom, frames);
        }
    }
}
