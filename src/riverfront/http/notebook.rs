//! `/db/<name>/notebook` (Component J): compiles and runs a batch of
//! queries sequentially inside one backend transaction that is always
//! rolled back, returning one `{"kind": "data"|"error", ...}` entry per
//! query (§4.J). Queries requiring capabilities beyond MODIFICATIONS/DDL
//! (session or persistent config, explicit transaction control) are
//! rejected, and parameterized queries aren't accepted since this envelope
//! carries no argument list, matching the "sandboxed exploration" intent of
//! a notebook.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value as Json;
use uuid::Uuid;

use crate::riverfront::http::mux::RouteError;
use crate::riverfront::http::{batch_actions, run_units};
use crate::riverfront::pool::{BackendPool, Capabilities, CompilerPool, OutputFormat, QueryRequestInfo, QueryUnit, StmtOp, TxAction};

#[derive(Deserialize)]
struct NotebookRequest {
    queries: Vec<String>,
}

const ALLOWED: Capabilities = Capabilities::from_bits(Capabilities::MODIFICATIONS.bits() | Capabilities::DDL.bits());

fn control_unit(sql: &str, tx_action: TxAction) -> QueryUnit {
    QueryUnit {
        sql: sql.to_string(),
        status_tag: String::new(),
        capabilities: Capabilities::NONE,
        tx_action,
        is_ddl: false,
        in_type_id: Uuid::nil(),
        out_type_id: Uuid::nil(),
        in_type_data: Vec::new(),
        out_type_data: Vec::new(),
        stmt_op: StmtOp::None,
        config_op: crate::riverfront::pool::ConfigOp::None,
    }
}

pub async fn handle<P: CompilerPool + 'static, B: BackendPool + 'static>(
    compiler: &Arc<P>,
    backend_pool: &Arc<B>,
    database: &str,
    body: &[u8],
) -> Result<Json, RouteError> {
    let request: NotebookRequest = serde_json::from_slice(body).map_err(|e| RouteError::BadRequest(format!("invalid JSON body: {}", e)))?;
    if request.queries.is_empty() {
        return Err(RouteError::BadRequest("queries must be non-empty".into()));
    }

    let mut all_units = vec![control_unit("begin", TxAction::Start)];
    let mut query_ranges = Vec::with_capacity(request.queries.len());

    for query in &request.queries {
        let compile_request = QueryRequestInfo {
            normalized_source: query.clone(),
            protocol_major: 3,
            protocol_minor: 0,
            output_format: OutputFormat::Json,
            expect_one: false,
            implicit_limit: 0,
            inline_typeids: false,
            inline_typenames: false,
            inline_objectids: false,
            allow_capabilities: ALLOWED,
        };
        let compiled = compiler.compile(database, compile_request).await.map_err(RouteError::Internal)?;
        if !Capabilities::is_allowed(compiled.group.capabilities(), ALLOWED) {
            return Err(RouteError::BadRequest("query requires a capability not permitted in a notebook".into()));
        }
        if compiled.group.param_schema.external_count != 0 {
            return Err(RouteError::BadRequest("parameterized queries are not supported in a notebook".into()));
        }

        let start = all_units.len();
        all_units.extend(compiled.group.units);
        query_ranges.push(start..all_units.len());
    }
    all_units.push(control_unit("rollback", TxAction::Rollback));

    let (actions, portals) = batch_actions(&all_units);
    let outcomes = run_units(backend_pool, database, actions, &portals).await.map_err(RouteError::Internal)?;

    let results = query_ranges
        .into_iter()
        .map(|range| {
            let mut rows = Vec::new();
            let mut error = None;
            for outcome in &outcomes[range] {
                if outcome.error.is_some() {
                    error = outcome.error.clone();
                } else {
                    rows.extend(outcome.rows.iter().cloned());
                }
            }
            match error {
                Some(message) => serde_json::json!({ "kind": "error", "error": { "message": message } }),
                None => serde_json::json!({ "kind": "data", "data": rows }),
            }
        })
        .collect();

    Ok(Json::Array(results))
}
