//! WebThing server runtime
//!
//! Exposes devices as Things with properties (validated state slots),
//! actions (asynchronously executed operations with tracked lifecycle), and
//! events (bounded, timestamped notification logs), and fans out change
//! notifications to subscribers without blocking producers.
//!
//! The transport layer (HTTP routing, WebSocket framing) is an external
//! collaborator: it drives the runtime through [`Thing`] and receives
//! outbound frames through [`NotificationSink`].

mod action;
mod events;
mod notify;
mod property;
mod thing;

pub use action::*;
pub use events::*;
pub use notify::*;
pub use property::*;
pub use thing::*;

pub use webthing_types::{ConvertError, ConvertResult, DataType, Schema, Value};
