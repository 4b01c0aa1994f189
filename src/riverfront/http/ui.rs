//! `/ui/...` (Component J): the bundled admin UI's static asset routes.
//! Serving the actual bundle is outside this layer's scope (§1); this stub
//! only confirms the route is recognized.

use serde_json::Value as Json;

use crate::riverfront::http::mux::RouteError;

pub async fn serve(_segments: &[&str]) -> Result<Json, RouteError> {
    Err(RouteError::BadRequest("the admin ui is not enabled on this server".into()))
}
