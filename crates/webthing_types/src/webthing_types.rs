//! Core value and schema types for the WebThing runtime
//!
//! This crate is the pure, I/O-free half of the runtime: the native value
//! model, the wire/native conversion layer, and schema validation. The
//! concurrent runtime (things, actions, events, notifications) lives in
//! `webthing_runtime` and builds on these types.

mod convert;
mod schema;
mod value;

pub use convert::*;
pub use schema::*;
pub use value::*;
