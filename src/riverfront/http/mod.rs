//! HTTP request parsing and route dispatch (Component I), plus the thin
//! extension handlers that translate HTTP requests into compiler+backend
//! calls (Component J). Demultiplexed onto this path by `demux::sniff` once
//! the first bytes off the socket look like an HTTP request line; also
//! reachable from `BinaryFrontend`'s own handshake path never routes here —
//! the relationship is the other direction, a request on this path may
//! itself upgrade into a `BinaryFrontend` (§4.I "Upgrade to binary").

pub(crate) mod mux;
pub mod edgeql;
pub mod notebook;
pub mod graphql;
pub mod system;
pub mod ui;
mod exec;

pub use mux::HttpMux;
pub(crate) use exec::{batch_actions, run_units, UnitOutcome};

use serde_json::Value as Json;

/// The envelope every JSON-returning HTTP extension responds with on
/// success or failure (§4.J). Payload semantics beyond this envelope shape
/// are explicitly out of THE CORE (§1 scope); handlers only need to produce
/// `{"data": ...}` or `{"error": ...}`.
pub fn data_envelope(data: Json) -> Json {
    serde_json::json!({ "data": data })
}

pub fn error_envelope(message: impl Into<String>) -> Json {
    serde_json::json!({ "error": { "message": message.into() } })
}
