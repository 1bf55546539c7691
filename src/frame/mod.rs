//! Frame graph tracking
//!
//! This module maintains the live view of a page's frame forest:
//! - [`filter`]: heuristic classifier that keeps ad/tracking frames out of
//!   the graph
//! - [`manager`]: frame and execution-context lifecycle tracking, including
//!   out-of-process iframe (OOPIF) session discovery

pub mod filter;
pub mod manager;

pub use filter::{is_ad_or_tracking_frame, FilterConfig};
pub use manager::{FrameContextManager, FrameInfo};
