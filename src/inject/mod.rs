//! Idempotent helper-script injection.
//!
//! Pages are captured repeatedly while frames navigate, so helper scripts
//! must be (a) queued once per session for future documents and (b) re-run
//! in every fresh execution context. Both tiers are tracked here. Injection
//! is a best-effort optimization path: failures are logged, never surfaced.

use crate::transport::CdpConnection;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Helper installed into every captured document.
///
/// `__getScrollableElementXpaths` reports the xpaths of elements that can
/// actually scroll, so the tree builder can decorate their roles.
pub const DOM_HELPER_SCRIPT: &str = r#"
(() => {
  if (window.__getScrollableElementXpaths) return;

  const xpathOf = (el) => {
    const parts = [];
    while (el && el.nodeType === Node.ELEMENT_NODE) {
      let index = 1;
      let sibling = el.previousElementSibling;
      while (sibling) {
        if (sibling.tagName === el.tagName) index += 1;
        sibling = sibling.previousElementSibling;
      }
      parts.unshift(el.tagName.toLowerCase() + '[' + index + ']');
      el = el.parentElement;
    }
    return '/' + parts.join('/');
  };

  const canScroll = (el) => {
    const style = window.getComputedStyle(el);
    const overflow = style.overflow + style.overflowY + style.overflowX;
    const scrollable = el.scrollHeight > el.clientHeight || el.scrollWidth > el.clientWidth;
    return scrollable && /(auto|scroll|overlay)/.test(overflow);
  };

  window.__getScrollableElementXpaths = () => {
    const found = [];
    if (document.scrollingElement &&
        document.scrollingElement.scrollHeight > window.innerHeight) {
      found.push('/html[1]');
    }
    for (const el of document.querySelectorAll('*')) {
      if (canScroll(el)) found.push(xpathOf(el));
    }
    return found;
  };
})();
"#;

type ContextToken = (Option<String>, i64);

/// Tracks what has been injected where.
///
/// Owned explicitly by its controller and discarded with it; no process-wide
/// state survives disposal.
pub struct ScriptInjector {
    conn: Arc<CdpConnection>,
    /// (session, key) pairs queued via `Page.addScriptToEvaluateOnNewDocument`
    registered: Mutex<HashSet<(Option<String>, String)>>,
    /// key -> contexts the script has already run in
    evaluated: Mutex<HashMap<String, HashSet<ContextToken>>>,
}

impl ScriptInjector {
    pub fn new(conn: Arc<CdpConnection>) -> Self {
        Self {
            conn,
            registered: Mutex::new(HashSet::new()),
            evaluated: Mutex::new(HashMap::new()),
        }
    }

    fn lock_registered(&self) -> MutexGuard<'_, HashSet<(Option<String>, String)>> {
        self.registered.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_evaluated(&self) -> MutexGuard<'_, HashMap<String, HashSet<ContextToken>>> {
        self.evaluated.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make sure `source` is present in the given session and, when a context
    /// id is supplied, has run in that specific context.
    ///
    /// Two-tier idempotency: registration happens once per (session, key) and
    /// queues the script for future documents; evaluation happens once per
    /// (key, session, context). A fresh context id with a known key skips
    /// registration but evaluates again, since navigation discards contexts.
    pub async fn ensure_injected(
        &self,
        session: Option<&str>,
        key: &str,
        source: &str,
        execution_context_id: Option<i64>,
    ) {
        let registration_key = (session.map(str::to_string), key.to_string());

        let needs_registration = !self.lock_registered().contains(&registration_key);
        if needs_registration {
            match self
                .conn
                .send(
                    "Page.addScriptToEvaluateOnNewDocument",
                    Some(json!({ "source": source })),
                    session,
                )
                .await
            {
                Ok(_) => {
                    self.lock_registered().insert(registration_key);
                }
                Err(err) => {
                    // Not recorded, so a later call retries registration.
                    log::debug!("script registration failed for '{}': {}", key, err);
                }
            }
        }

        let Some(context_id) = execution_context_id else {
            return;
        };

        let token: ContextToken = (session.map(str::to_string), context_id);
        let already_ran = self
            .lock_evaluated()
            .get(key)
            .map(|contexts| contexts.contains(&token))
            .unwrap_or(false);
        if already_ran {
            return;
        }

        let result = self
            .conn
            .send(
                "Runtime.evaluate",
                Some(json!({
                    "expression": source,
                    "contextId": context_id,
                })),
                session,
            )
            .await;

        match result {
            Ok(_) => {
                self.lock_evaluated()
                    .entry(key.to_string())
                    .or_default()
                    .insert(token);
            }
            Err(err) => {
                log::debug!("script evaluation failed for '{}': {}", key, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::MockCdp;
    use serde_json::json;

    #[tokio::test]
    async fn test_same_key_same_context_evaluates_once() {
        let mock = MockCdp::new();
        let injector = ScriptInjector::new(mock.conn.clone());

        injector.ensure_injected(None, "helper", "1+1", Some(5)).await;
        injector.ensure_injected(None, "helper", "1+1", Some(5)).await;

        assert_eq!(
            mock.transport
                .call_count("Page.addScriptToEvaluateOnNewDocument"),
            1
        );
        assert_eq!(mock.transport.call_count("Runtime.evaluate"), 1);
    }

    #[tokio::test]
    async fn test_new_context_skips_registration_but_reevaluates() {
        let mock = MockCdp::new();
        let injector = ScriptInjector::new(mock.conn.clone());

        injector.ensure_injected(None, "helper", "1+1", Some(5)).await;
        injector.ensure_injected(None, "helper", "1+1", Some(9)).await;

        assert_eq!(
            mock.transport
                .call_count("Page.addScriptToEvaluateOnNewDocument"),
            1
        );
        assert_eq!(mock.transport.call_count("Runtime.evaluate"), 2);

        let calls = mock.transport.calls_of("Runtime.evaluate");
        assert_eq!(calls[0]["contextId"], json!(5));
        assert_eq!(calls[1]["contextId"], json!(9));
    }

    #[tokio::test]
    async fn test_sessions_are_tracked_independently() {
        let mock = MockCdp::new();
        let injector = ScriptInjector::new(mock.conn.clone());

        injector.ensure_injected(None, "helper", "1+1", Some(5)).await;
        injector
            .ensure_injected(Some("S1"), "helper", "1+1", Some(5))
            .await;

        assert_eq!(
            mock.transport
                .call_count("Page.addScriptToEvaluateOnNewDocument"),
            2
        );
        assert_eq!(mock.transport.call_count("Runtime.evaluate"), 2);
    }

    #[tokio::test]
    async fn test_registration_failure_is_swallowed_and_retried() {
        let mock = MockCdp::new();
        mock.transport
            .script_error("Page.addScriptToEvaluateOnNewDocument", "boom");
        let injector = ScriptInjector::new(mock.conn.clone());

        // First attempt fails (logged, not thrown).
        injector.ensure_injected(None, "helper", "1+1", None).await;
        // Second attempt retries registration because the first never stuck.
        injector.ensure_injected(None, "helper", "1+1", None).await;

        assert_eq!(
            mock.transport
                .call_count("Page.addScriptToEvaluateOnNewDocument"),
            2
        );
    }

    #[tokio::test]
    async fn test_evaluation_failure_is_swallowed() {
        let mock = MockCdp::new();
        mock.transport.script_error("Runtime.evaluate", "no context");
        let injector = ScriptInjector::new(mock.conn.clone());

        injector.ensure_injected(None, "helper", "1+1", Some(3)).await;
        // Failure was not recorded as success, so the next call retries.
        injector.ensure_injected(None, "helper", "1+1", Some(3)).await;

        assert_eq!(mock.transport.call_count("Runtime.evaluate"), 2);
    }

    #[tokio::test]
    async fn test_without_context_only_registers() {
        let mock = MockCdp::new();
        let injector = ScriptInjector::new(mock.conn.clone());

        injector.ensure_injected(None, "helper", "1+1", None).await;

        assert_eq!(
            mock.transport
                .call_count("Page.addScriptToEvaluateOnNewDocument"),
            1
        );
        assert_eq!(mock.transport.call_count("Runtime.evaluate"), 0);
    }
}
