//! `/db/<name>/edgeql` (Component J): runs one ad hoc query compiled with
//! `OutputFormat::Json` and returns the decoded rows in the `{"data": [...]}`
//! envelope (§4.J).

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value as Json;

use crate::riverfront::http::mux::RouteError;
use crate::riverfront::http::{batch_actions, data_envelope, run_units};
use crate::riverfront::pool::{BackendPool, Capabilities, CompilerPool, OutputFormat, QueryRequestInfo};

#[derive(Deserialize)]
struct EdgeqlRequest {
    query: String,
    #[serde(default)]
    #[allow(dead_code)]
    variables: Json,
}

pub async fn handle<P: CompilerPool + 'static, B: BackendPool + 'static>(
    compiler: &Arc<P>,
    backend_pool: &Arc<B>,
    database: &str,
    method: &str,
    body: &[u8],
    path: &str,
) -> Result<Json, RouteError> {
    let request = if method.eq_ignore_ascii_case("GET") {
        parse_query_params(path)?
    } else {
        serde_json::from_slice::<EdgeqlRequest>(body).map_err(|e| RouteError::BadRequest(format!("invalid JSON body: {}", e)))?
    };
    if request.query.trim().is_empty() {
        return Err(RouteError::BadRequest("missing query".into()));
    }

    let compile_request = QueryRequestInfo {
        normalized_source: request.query,
        protocol_major: 3,
        protocol_minor: 0,
        output_format: OutputFormat::Json,
        expect_one: false,
        implicit_limit: 0,
        inline_typeids: false,
        inline_typenames: false,
        inline_objectids: false,
        allow_capabilities: Capabilities::MODIFICATIONS | Capabilities::DDL,
    };
    let compiled = compiler.compile(database, compile_request).await.map_err(RouteError::Internal)?;
    if compiled.group.param_schema.external_count != 0 {
        return Err(RouteError::BadRequest("parameterized queries are not supported on this endpoint".into()));
    }

    let (actions, portals) = batch_actions(&compiled.group.units);
    let mut outcomes = run_units(backend_pool, database, actions, &portals).await.map_err(RouteError::Internal)?;

    if let Some(outcome) = outcomes.iter().find(|o| o.error.is_some()) {
        return Err(RouteError::BadRequest(outcome.error.clone().unwrap()));
    }
    let rows: Vec<Json> = outcomes.pop().map(|o| o.rows).unwrap_or_default();
    Ok(data_envelope(Json::Array(rows)))
}

/// Minimal `application/x-www-form-urlencoded` decoder for the GET form of
/// this endpoint (`?query=...`); there's no query-string crate in this
/// dependency tree and the alphabet this endpoint needs is small enough not
/// to warrant adding one.
fn parse_query_params(path: &str) -> Result<EdgeqlRequest, RouteError> {
    let query_part = path.splitn(2, '?').nth(1).unwrap_or("");
    let mut query = None;
    for pair in query_part.split('&').filter(|s| !s.is_empty()) {
        let mut it = pair.splitn(2, '=');
        let key = it.next().unwrap_or("");
        let value = percent_decode(it.next().unwrap_or(""));
        if key == "query" {
            query = Some(value);
        }
    }
    Ok(EdgeqlRequest { query: query.ok_or_else(|| RouteError::BadRequest("missing query parameter".into()))?, variables: Json::Null })
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(b) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(b);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_percent_and_plus() {
        assert_eq!(percent_decode("select+1%2B1"), "select 1+1");
    }
}
