//! # browser-control
//!
//! Control-plane core for browser automation over the Chrome DevTools
//! Protocol (CDP). It lets a calling agent name elements stably in an
//! evolving, multi-frame page, resolve those names back into live object
//! handles, and know when the page has stopped mutating enough to be read
//! safely.
//!
//! ## What's inside
//!
//! - [`transport`]: session multiplexing with request/response correlation,
//!   event fan-out, and per-target session scoping over a raw transport
//! - [`frame`]: frame-graph and execution-context lifecycle tracking, with a
//!   heuristic ad/tracking-frame filter and OOPIF session discovery
//! - [`a11y`]: turns the flat protocol accessibility node list into a pruned
//!   hierarchy where every element is addressable by [`EncodedId`]
//! - [`capture`]: retrying snapshot capture plus network-quiet-window
//!   settle detection
//! - [`resolve`]: encoded identity back to a live, actionable object handle,
//!   with xpath fallback after DOM mutation
//! - [`inject`]: idempotent helper-script registration and evaluation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use browser_control::{CaptureOptions, PageController, ResolveOptions, SettleOptions};
//!
//! # async fn run() -> browser_control::Result<()> {
//! let controller = PageController::connect_ws("ws://127.0.0.1:9222/devtools/page/ABC").await?;
//!
//! // Wait for the page to go quiet, then snapshot it.
//! controller.wait_for_settled_dom(10_000, &SettleOptions::default()).await;
//! let snapshot = controller.capture_dom_state(&CaptureOptions::default()).await?;
//! println!("{}", snapshot.rendered_text);
//!
//! // Turn an element name from the snapshot into a live handle.
//! let mut resolver = controller.resolver(&snapshot, ResolveOptions::default());
//! let element = resolver.resolve("0-501").await?;
//! println!("objectId {}", element.object_id);
//!
//! controller.dispose().await;
//! # Ok(())
//! # }
//! ```
//!
//! The `"{frameIndex}-{backendNodeId}"` [`EncodedId`] format is a stable
//! contract: ids printed in `rendered_text` can be parsed and resolved
//! directly. They are only valid within the snapshot that produced them.

pub mod a11y;
pub mod capture;
pub mod controller;
pub mod error;
pub mod frame;
pub mod inject;
pub mod protocol;
pub mod resolve;
pub mod transport;

pub use a11y::{AccessibilityNode, BoundingBox, EncodedId};
pub use capture::{
    wait_for_settled_dom, CaptureOptions, SettleOptions, SettleStats, Snapshot,
};
pub use controller::{ControllerRegistry, PageController};
pub use error::{BrowserError, Result};
pub use frame::{FrameContextManager, FrameInfo};
pub use inject::ScriptInjector;
pub use resolve::{ResolveOptions, ResolveScope, ResolvedElement};
pub use transport::{CdpConnection, EventSubscription, RawTransport, SessionId};

#[cfg(feature = "ws")]
pub use transport::WsTransport;
