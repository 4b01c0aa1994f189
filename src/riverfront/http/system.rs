//! `/server/...` (Component J): the handful of unauthenticated
//! introspection routes (health, version, capability discovery). Actual
//! health semantics live with the process/backend-pool lifetime, which this
//! frontend layer doesn't own; this is the routing shim the rest of the
//! server wires a real handler into.

use serde_json::Value as Json;

use crate::riverfront::http::mux::RouteError;

pub async fn handle(segments: &[&str]) -> Result<Json, RouteError> {
    match segments {
        ["status", "alive"] | ["status", "ready"] => Ok(Json::String("OK".into())),
        _ => Err(RouteError::NotFound),
    }
}
