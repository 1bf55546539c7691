use crate::error::{sanitize, BrowserError, Result};
use crate::frame::filter;
use crate::protocol::{
    ExecutionContextCreatedEvent, ExecutionContextDestroyedEvent, FrameAttachedEvent,
    FrameDetachedEvent, FrameNavigatedEvent, FrameTreeNode, FrameTreeResult, GetTargetsResult,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// One discovered frame in the page's frame forest.
///
/// `frame_index` is assigned monotonically, exactly once per discovery; the
/// main frame is always index 0. The forest invariant holds because a frame
/// is only adopted after its parent is known.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameInfo {
    pub frame_index: u64,
    pub frame_id: String,
    pub parent_frame_index: Option<u64>,
    pub src: String,
    /// XPath of the `<iframe>` element hosting this frame, filled in once a
    /// DOM walk of the parent document discovers it
    pub iframe_xpath: Option<String>,
    pub sibling_position: u32,
}

#[derive(Debug, Clone)]
struct ContextRecord {
    id: i64,
    /// Session scope the context event arrived on (None = root session)
    session: Option<String>,
}

#[derive(Default)]
struct FrameState {
    frames: HashMap<String, FrameInfo>,
    by_index: HashMap<u64, String>,
    next_index: u64,
    /// Current execution context per frame; last writer wins
    contexts: HashMap<String, ContextRecord>,
    /// frame id -> dedicated OOPIF session
    oopif_sessions: HashMap<String, String>,
    /// Frames excluded by the ad/tracking filter (their children stay out too)
    filtered: HashSet<String>,
}

/// Frame graph and execution-context lifecycle tracker.
///
/// Consumes frame and context events from the connection and answers O(1)
/// bidirectional frame lookups. May be shared and reused across captures;
/// initialization is idempotent and teardown detaches listeners exactly once.
pub struct FrameContextManager {
    conn: Arc<crate::transport::CdpConnection>,
    state: Mutex<FrameState>,
    context_signal: Notify,
    init: OnceCell<()>,
    filtering_enabled: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cleared: AtomicBool,
}

impl FrameContextManager {
    pub fn new(conn: Arc<crate::transport::CdpConnection>) -> Arc<Self> {
        Arc::new(Self {
            conn,
            state: Mutex::new(FrameState::default()),
            context_signal: Notify::new(),
            init: OnceCell::new(),
            filtering_enabled: AtomicBool::new(true),
            tasks: Mutex::new(Vec::new()),
            cleared: AtomicBool::new(false),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, FrameState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Toggle whether the ad/tracking filter is applied when building the graph
    pub fn set_frame_filtering_enabled(&self, enabled: bool) {
        self.filtering_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn frame_filtering_enabled(&self) -> bool {
        self.filtering_enabled.load(Ordering::SeqCst)
    }

    /// Initialize the frame graph and event listeners.
    ///
    /// Idempotent and concurrency-safe: concurrent callers await one shared
    /// initialization.
    pub async fn ensure_initialized(self: &Arc<Self>) -> Result<()> {
        let this = self.clone();
        self.init
            .get_or_try_init(|| async move { this.initialize().await })
            .await
            .map(|_| ())
    }

    async fn initialize(self: &Arc<Self>) -> Result<()> {
        // Listeners first, so nothing replayed by the enables is missed.
        self.spawn_handler("Page.frameAttached", None, |mgr, _, params| {
            mgr.on_frame_attached(params)
        })?;
        self.spawn_handler("Page.frameDetached", None, |mgr, _, params| {
            mgr.on_frame_detached(params)
        })?;
        self.spawn_handler("Page.frameNavigated", None, |mgr, _, params| {
            mgr.on_frame_navigated(params)
        })?;
        self.spawn_runtime_handlers(None)?;

        self.conn.send("Page.enable", None, None).await?;
        self.conn.send("Runtime.enable", None, None).await?;

        let tree_value = self.conn.send("Page.getFrameTree", None, None).await?;
        let tree: FrameTreeResult = serde_json::from_value(tree_value)?;
        self.adopt_frame_tree(&tree.frame_tree, None, None, 0);

        Ok(())
    }

    fn spawn_handler(
        self: &Arc<Self>,
        event: &str,
        session: Option<&str>,
        handler: fn(&FrameContextManager, Option<&str>, Value),
    ) -> Result<()> {
        let mut sub = self.conn.subscribe(event, session)?;
        let scope = session.map(str::to_string);
        let weak = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            while let Some(params) = sub.recv().await {
                let Some(mgr) = weak.upgrade() else { break };
                handler(&mgr, scope.as_deref(), params);
            }
        });

        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
        Ok(())
    }

    fn spawn_runtime_handlers(self: &Arc<Self>, session: Option<&str>) -> Result<()> {
        self.spawn_handler(
            "Runtime.executionContextCreated",
            session,
            |mgr, scope, params| mgr.on_context_created(scope, params),
        )?;
        self.spawn_handler(
            "Runtime.executionContextDestroyed",
            session,
            |mgr, scope, params| mgr.on_context_destroyed(scope, params),
        )?;
        self.spawn_handler(
            "Runtime.executionContextsCleared",
            session,
            |mgr, scope, _| mgr.on_contexts_cleared(scope),
        )?;
        Ok(())
    }

    fn adopt_frame_tree(
        &self,
        node: &FrameTreeNode,
        parent_index: Option<u64>,
        parent_url: Option<&str>,
        sibling_position: u32,
    ) {
        let frame = &node.frame;

        if parent_index.is_some() {
            let filtered = self.frame_filtering_enabled()
                && filter::is_ad_or_tracking_frame(&frame.url, frame.name.as_deref(), parent_url);
            if filtered {
                log::debug!("filtering frame {}: {}", frame.id, sanitize(&frame.url));
                self.lock_state().filtered.insert(frame.id.clone());
                return;
            }
        }

        let index = {
            let mut state = self.lock_state();
            let index = state.next_index;
            state.next_index += 1;
            state.frames.insert(
                frame.id.clone(),
                FrameInfo {
                    frame_index: index,
                    frame_id: frame.id.clone(),
                    parent_frame_index: parent_index,
                    src: frame.url.clone(),
                    iframe_xpath: None,
                    sibling_position,
                },
            );
            state.by_index.insert(index, frame.id.clone());
            index
        };

        if let Some(children) = &node.child_frames {
            for (position, child) in children.iter().enumerate() {
                self.adopt_frame_tree(child, Some(index), Some(&frame.url), position as u32);
            }
        }
    }

    fn on_frame_attached(&self, params: Value) {
        let event: FrameAttachedEvent = match serde_json::from_value(params) {
            Ok(event) => event,
            Err(err) => {
                log::warn!("malformed frameAttached event: {}", err);
                return;
            }
        };

        let mut state = self.lock_state();

        if state.filtered.contains(&event.parent_frame_id) {
            state.filtered.insert(event.frame_id);
            return;
        }

        let Some(parent) = state.frames.get(&event.parent_frame_id) else {
            // Parent must be discovered first; an unknown parent means this
            // subtree is outside the tracked graph.
            log::debug!(
                "frame {} attached under unknown parent {}",
                event.frame_id,
                event.parent_frame_id
            );
            state.filtered.insert(event.frame_id);
            return;
        };

        let parent_index = parent.frame_index;
        let sibling_position = state
            .frames
            .values()
            .filter(|f| f.parent_frame_index == Some(parent_index))
            .count() as u32;

        let index = state.next_index;
        state.next_index += 1;
        state.frames.insert(
            event.frame_id.clone(),
            FrameInfo {
                frame_index: index,
                frame_id: event.frame_id.clone(),
                parent_frame_index: Some(parent_index),
                src: String::new(),
                iframe_xpath: None,
                sibling_position,
            },
        );
        state.by_index.insert(index, event.frame_id);
    }

    fn on_frame_navigated(&self, params: Value) {
        let event: FrameNavigatedEvent = match serde_json::from_value(params) {
            Ok(event) => event,
            Err(err) => {
                log::warn!("malformed frameNavigated event: {}", err);
                return;
            }
        };
        let frame = event.frame;

        let mut state = self.lock_state();

        if let Some(parent_index) = state.frames.get(&frame.id).map(|f| f.parent_frame_index) {
            let parent_url = parent_index
                .and_then(|p| state.by_index.get(&p).cloned())
                .and_then(|id| state.frames.get(&id).map(|f| f.src.clone()));

            let filter_out = parent_index.is_some()
                && self.frame_filtering_enabled()
                && filter::is_ad_or_tracking_frame(
                    &frame.url,
                    frame.name.as_deref(),
                    parent_url.as_deref(),
                );

            if filter_out {
                log::debug!(
                    "filtering frame {} after navigation to {}",
                    frame.id,
                    sanitize(&frame.url)
                );
                Self::remove_frame_and_descendants(&mut state, &frame.id);
                state.filtered.insert(frame.id);
            } else if let Some(info) = state.frames.get_mut(&frame.id) {
                info.src = frame.url.clone();
            }
            return;
        }

        // Cross-process root navigation can replace the main frame's id.
        if frame.parent_id.is_none() {
            if let Some(old_id) = state.by_index.get(&0).cloned() {
                if let Some(mut info) = state.frames.remove(&old_id) {
                    state.contexts.remove(&old_id);
                    info.frame_id = frame.id.clone();
                    info.src = frame.url.clone();
                    state.frames.insert(frame.id.clone(), info);
                    state.by_index.insert(0, frame.id);
                }
            }
        }
    }

    fn on_frame_detached(&self, params: Value) {
        let event: FrameDetachedEvent = match serde_json::from_value(params) {
            Ok(event) => event,
            Err(err) => {
                log::warn!("malformed frameDetached event: {}", err);
                return;
            }
        };

        let mut state = self.lock_state();
        state.filtered.remove(&event.frame_id);
        Self::remove_frame_and_descendants(&mut state, &event.frame_id);
    }

    /// Detached frames take their whole subtree out of every lookup
    fn remove_frame_and_descendants(state: &mut FrameState, frame_id: &str) {
        let Some(root) = state.frames.get(frame_id) else {
            return;
        };

        let mut doomed_indices: HashSet<u64> = HashSet::new();
        doomed_indices.insert(root.frame_index);

        loop {
            let more: Vec<u64> = state
                .frames
                .values()
                .filter(|f| {
                    f.parent_frame_index
                        .map(|p| doomed_indices.contains(&p))
                        .unwrap_or(false)
                        && !doomed_indices.contains(&f.frame_index)
                })
                .map(|f| f.frame_index)
                .collect();
            if more.is_empty() {
                break;
            }
            doomed_indices.extend(more);
        }

        let doomed_ids: Vec<String> = state
            .frames
            .values()
            .filter(|f| doomed_indices.contains(&f.frame_index))
            .map(|f| f.frame_id.clone())
            .collect();

        for id in doomed_ids {
            if let Some(info) = state.frames.remove(&id) {
                state.by_index.remove(&info.frame_index);
            }
            state.contexts.remove(&id);
            state.oopif_sessions.remove(&id);
        }
    }

    fn on_context_created(&self, scope: Option<&str>, params: Value) {
        let event: ExecutionContextCreatedEvent = match serde_json::from_value(params) {
            Ok(event) => event,
            Err(err) => {
                log::warn!("malformed executionContextCreated event: {}", err);
                return;
            }
        };

        let Some(aux) = event.context.aux_data else {
            return;
        };
        let Some(frame_id) = aux.frame_id else {
            return;
        };
        // Only the default world is usable for element resolution.
        if aux.is_default == Some(false) {
            return;
        }

        // Create/destroy may arrive out of order vs navigation; the most
        // recent create for a frame wins unconditionally.
        self.lock_state().contexts.insert(
            frame_id,
            ContextRecord {
                id: event.context.id,
                session: scope.map(str::to_string),
            },
        );
        self.context_signal.notify_waiters();
    }

    fn on_context_destroyed(&self, scope: Option<&str>, params: Value) {
        let event: ExecutionContextDestroyedEvent = match serde_json::from_value(params) {
            Ok(event) => event,
            Err(err) => {
                log::warn!("malformed executionContextDestroyed event: {}", err);
                return;
            }
        };

        self.lock_state().contexts.retain(|_, record| {
            !(record.id == event.execution_context_id && record.session.as_deref() == scope)
        });
    }

    fn on_contexts_cleared(&self, scope: Option<&str>) {
        self.lock_state()
            .contexts
            .retain(|_, record| record.session.as_deref() != scope);
    }

    /// Look up a frame by its index. O(1).
    pub fn frame_by_index(&self, frame_index: u64) -> Option<FrameInfo> {
        let state = self.lock_state();
        state
            .by_index
            .get(&frame_index)
            .and_then(|id| state.frames.get(id))
            .cloned()
    }

    /// Look up a frame's index by its protocol id. O(1).
    pub fn frame_index_of(&self, frame_id: &str) -> Option<u64> {
        self.lock_state()
            .frames
            .get(frame_id)
            .map(|f| f.frame_index)
    }

    /// All tracked frames ordered by frame index
    pub fn frames_snapshot(&self) -> Vec<FrameInfo> {
        let mut frames: Vec<FrameInfo> = self.lock_state().frames.values().cloned().collect();
        frames.sort_by_key(|f| f.frame_index);
        frames
    }

    /// Session scope to use for a frame's commands.
    ///
    /// `None` means the root session (main frame and same-process iframes);
    /// OOPIFs get their dedicated session. Unknown frame indices are an error
    /// rather than a silent root fallback.
    pub fn session_for_frame(&self, frame_index: u64) -> Result<Option<String>> {
        if frame_index == 0 {
            return Ok(None);
        }

        let state = self.lock_state();
        let frame_id = state
            .by_index
            .get(&frame_index)
            .ok_or(BrowserError::NoSessionForFrame(frame_index))?;
        Ok(state.oopif_sessions.get(frame_id).cloned())
    }

    /// Current execution context id for a frame, if one has been observed
    pub fn execution_context(&self, frame_id: &str) -> Option<i64> {
        self.lock_state().contexts.get(frame_id).map(|r| r.id)
    }

    /// Suspend until an execution context is observed for `frame_id`.
    ///
    /// Bounded: returns [`BrowserError::ExecutionContextTimeout`] naming the
    /// frame if none appears within `timeout_ms`.
    pub async fn wait_for_execution_context(&self, frame_id: &str, timeout_ms: u64) -> Result<i64> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            let notified = self.context_signal.notified();

            if let Some(id) = self.execution_context(frame_id) {
                return Ok(id);
            }

            if Instant::now() >= deadline
                || tokio::time::timeout_at(deadline, notified).await.is_err()
            {
                return Err(BrowserError::ExecutionContextTimeout {
                    frame_id: sanitize(frame_id),
                    waited_ms: timeout_ms,
                });
            }
        }
    }

    /// Discover out-of-process iframes and attach a dedicated session to each.
    ///
    /// Returns the number of newly attached sessions. Per-target attach
    /// failures are logged and skipped.
    pub async fn capture_oopifs(self: &Arc<Self>) -> Result<usize> {
        let result = self.conn.send("Target.getTargets", None, None).await?;
        let targets: GetTargetsResult = serde_json::from_value(result)?;

        let mut created = 0;
        for target in targets.target_infos.iter().filter(|t| t.kind == "iframe") {
            let skip = {
                let state = self.lock_state();
                state.oopif_sessions.contains_key(&target.target_id)
                    || state.filtered.contains(&target.target_id)
            };
            if skip {
                continue;
            }

            let session = match self.conn.create_session(&target.target_id).await {
                Ok(session) => session,
                Err(err) => {
                    log::debug!("could not attach OOPIF {}: {}", target.target_id, err);
                    continue;
                }
            };

            if let Err(err) = self.conn.send("Runtime.enable", None, Some(&session)).await {
                log::debug!("Runtime.enable failed on OOPIF session: {}", err);
            }
            self.spawn_runtime_handlers(Some(&session))?;

            self.lock_state()
                .oopif_sessions
                .insert(target.target_id.clone(), session);
            created += 1;
        }

        Ok(created)
    }

    /// Record the xpath and sibling position of the `<iframe>` element
    /// hosting `frame_id`, discovered during a DOM walk of the parent.
    pub fn record_iframe_slot(&self, frame_id: &str, xpath: &str, sibling_position: u32) {
        let mut state = self.lock_state();
        if let Some(info) = state.frames.get_mut(frame_id) {
            info.iframe_xpath = Some(xpath.to_string());
            info.sibling_position = sibling_position;
        }
    }

    /// Detach all event listeners. Idempotent: later calls are no-ops.
    pub fn clear(&self) {
        if self.cleared.swap(true, Ordering::SeqCst) {
            return;
        }

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            // Aborting drops the task's subscription, which unregisters it.
            task.abort();
        }
    }
}

impl Drop for FrameContextManager {
    fn drop(&mut self) {
        self.clear();
    }
}
