//! Protocol session transport
//!
//! This module provides the lowest layer of the control plane:
//! - [`CdpConnection`]: request/response correlation and event fan-out over a
//!   raw message transport, with per-target session scoping
//! - [`EventSubscription`]: a registration handle that carries its own
//!   unsubscribe, so listener bookkeeping cannot leak
//! - [`WsTransport`] (feature `ws`): the websocket wire implementation

pub mod connection;
pub mod subscription;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(feature = "ws")]
pub mod ws;

pub use connection::{CdpConnection, RawTransport, SessionId};
pub use subscription::EventSubscription;

#[cfg(feature = "ws")]
pub use ws::WsTransport;
