//! Network-quiet-window detection.
//!
//! A page is considered settled once no tracked request has been in flight
//! for a full quiet window. Long-poll and hung connections are force-dropped
//! after a stall threshold so one stuck request cannot block settling, and
//! the whole wait is bounded by a global timeout. The call always returns a
//! well-formed stats value, never an error.

use crate::protocol::{LoadingLifecycleEvent, RequestWillBeSentEvent};
use crate::transport::CdpConnection;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Default global timeout when the caller passes zero
pub const DEFAULT_SETTLE_TIMEOUT_MS: u64 = 10_000;

/// Upper clamp for the global timeout
pub const MAX_SETTLE_TIMEOUT_MS: u64 = 120_000;

/// Tuning for the quiet-window algorithm.
///
/// The defaults are workload-dependent heuristics, kept configurable so
/// callers on slow or chatty pages can adjust them.
#[derive(Debug, Clone)]
pub struct SettleOptions {
    /// Idle duration required before the page counts as settled
    pub quiet_window_ms: u64,
    /// In-flight age after which a request is force-dropped
    pub stall_threshold_ms: u64,
    /// How often the stall sweep runs
    pub sweep_interval_ms: u64,
    /// Flat wait used when event registration fails
    pub fallback_wait_ms: u64,
}

impl Default for SettleOptions {
    fn default() -> Self {
        Self {
            quiet_window_ms: 500,
            stall_threshold_ms: 2000,
            sweep_interval_ms: 500,
            fallback_wait_ms: 2000,
        }
    }
}

/// What happened while waiting for the network to go quiet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettleStats {
    pub requests_seen: u64,
    pub peak_inflight: u64,
    pub forced_drops: u64,
    /// True when the global timeout (or the registration-failure fallback)
    /// ended the wait instead of a quiet window
    pub resolved_by_timeout: bool,
}

/// Normalize a caller-supplied timeout: zero becomes the default, anything
/// larger than the maximum is clamped down.
fn normalize_timeout(timeout_ms: u64) -> u64 {
    if timeout_ms == 0 {
        DEFAULT_SETTLE_TIMEOUT_MS
    } else {
        timeout_ms.min(MAX_SETTLE_TIMEOUT_MS)
    }
}

/// Wait until the page's network activity has been quiet for a full window.
///
/// Tracks in-flight request ids from `Network.requestWillBeSent` (excluding
/// WebSocket and EventSource, which stay open indefinitely by design) until
/// `Network.loadingFinished`/`loadingFailed` retires them. Resolves when the
/// in-flight set has been empty for `quiet_window_ms`, or when the global
/// timeout elapses, whichever comes first.
pub async fn wait_for_settled_dom(
    conn: &Arc<CdpConnection>,
    session: Option<&str>,
    timeout_ms: u64,
    opts: &SettleOptions,
) -> SettleStats {
    let timeout_ms = normalize_timeout(timeout_ms);
    let mut stats = SettleStats::default();

    // Subscribe before enabling so nothing replayed by the enable is missed.
    let subscriptions = (
        conn.subscribe("Network.requestWillBeSent", session),
        conn.subscribe("Network.loadingFinished", session),
        conn.subscribe("Network.loadingFailed", session),
    );
    let (Ok(mut request_sub), Ok(mut finished_sub), Ok(mut failed_sub)) = subscriptions else {
        log::warn!("network listener registration failed; using flat fallback wait");
        tokio::time::sleep(Duration::from_millis(
            opts.fallback_wait_ms.min(timeout_ms),
        ))
        .await;
        stats.resolved_by_timeout = true;
        return stats;
    };

    if let Err(err) = conn.send("Network.enable", None, session).await {
        log::warn!("Network.enable failed; using flat fallback wait: {}", err);
        tokio::time::sleep(Duration::from_millis(
            opts.fallback_wait_ms.min(timeout_ms),
        ))
        .await;
        stats.resolved_by_timeout = true;
        return stats;
    }

    let global_deadline = Instant::now() + Duration::from_millis(timeout_ms);
    let mut inflight: HashMap<String, Instant> = HashMap::new();
    // Nothing in flight yet, so the quiet clock starts immediately.
    let mut quiet_deadline: Option<Instant> =
        Some(Instant::now() + Duration::from_millis(opts.quiet_window_ms));

    let mut sweep = tokio::time::interval(Duration::from_millis(opts.sweep_interval_ms.max(1)));
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    sweep.reset();

    loop {
        let quiet_wait = async {
            match quiet_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = tokio::time::sleep_until(global_deadline) => {
                stats.resolved_by_timeout = true;
                break;
            }

            _ = quiet_wait => {
                break;
            }

            _ = sweep.tick() => {
                let stall = Duration::from_millis(opts.stall_threshold_ms);
                let now = Instant::now();
                let before = inflight.len();
                inflight.retain(|request_id, started| {
                    let stale = now.duration_since(*started) >= stall;
                    if stale {
                        log::debug!("force-dropping stalled request {}", request_id);
                    }
                    !stale
                });
                stats.forced_drops += (before - inflight.len()) as u64;

                if inflight.is_empty() && quiet_deadline.is_none() {
                    quiet_deadline = Some(now + Duration::from_millis(opts.quiet_window_ms));
                }
            }

            event = request_sub.recv() => {
                let Some(params) = event else {
                    stats.resolved_by_timeout = true;
                    break;
                };
                let Ok(event) = serde_json::from_value::<RequestWillBeSentEvent>(params) else {
                    continue;
                };
                if matches!(
                    event.resource_type.as_deref(),
                    Some("WebSocket") | Some("EventSource")
                ) {
                    continue;
                }

                stats.requests_seen += 1;
                inflight.insert(event.request_id, Instant::now());
                stats.peak_inflight = stats.peak_inflight.max(inflight.len() as u64);
                quiet_deadline = None;
            }

            event = finished_sub.recv() => {
                let Some(params) = event else {
                    stats.resolved_by_timeout = true;
                    break;
                };
                if let Ok(event) = serde_json::from_value::<LoadingLifecycleEvent>(params) {
                    inflight.remove(&event.request_id);
                    if inflight.is_empty() && quiet_deadline.is_none() {
                        quiet_deadline =
                            Some(Instant::now() + Duration::from_millis(opts.quiet_window_ms));
                    }
                }
            }

            event = failed_sub.recv() => {
                let Some(params) = event else {
                    stats.resolved_by_timeout = true;
                    break;
                };
                if let Ok(event) = serde_json::from_value::<LoadingLifecycleEvent>(params) {
                    inflight.remove(&event.request_id);
                    if inflight.is_empty() && quiet_deadline.is_none() {
                        quiet_deadline =
                            Some(Instant::now() + Duration::from_millis(opts.quiet_window_ms));
                    }
                }
            }
        }
    }

    stats
}
