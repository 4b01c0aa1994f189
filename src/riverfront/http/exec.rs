//! Shared plumbing for running compiled query units against a pooled
//! backend connection and decoding JSON-format results, used by both the
//! `edgeql` and `notebook` extensions. Parameter binding is not implemented
//! here: queries run through these HTTP extensions must be literal (no
//! `$0`-style placeholders), since remapping hidden parameters onto an
//! externally supplied argument list is `paramremap`'s job for the wire
//! protocols, not something this envelope-only surface reimplements.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value as Json;

use crate::riverfront::pg::protocol::{Message, MessageReader, Tag};
use crate::riverfront::pgfrontend::actions::{Action, ActionKind};
use crate::riverfront::pgview::Settings;
use crate::riverfront::pool::{BackendPool, QueryUnit};
use crate::riverfront::{Error, Result};

/// Per-unit execution outcome: either some rows, or a backend error message
/// local to that one statement.
pub(crate) struct UnitOutcome {
    pub rows: Vec<Json>,
    pub error: Option<String>,
}

/// Builds the Parse/Bind/Execute/Close action sequence for a group of
/// already-compiled units, one unnamed-but-uniquely-keyed portal per unit,
/// terminated with `Sync`. Returns the actions plus the portal names in
/// unit order, so the caller can line replies back up with their unit.
pub(crate) fn batch_actions(units: &[QueryUnit]) -> (Vec<Action>, Vec<String>) {
    let mut actions = Vec::with_capacity(units.len() * 5 + 1);
    let mut portals = Vec::with_capacity(units.len());
    for (i, unit) in units.iter().enumerate() {
        let stmt_name = format!("__http_stmt_{}", i);
        let portal = format!("__http_portal_{}", i);
        actions.push(Action::new(ActionKind::Parse {
            stmt_name: stmt_name.clone(),
            sql_text: unit.sql.clone(),
            param_type_oids: Vec::new(),
            fe_settings: Settings::new(),
        }));
        actions.push(Action::new(ActionKind::Bind {
            portal: portal.clone(),
            stmt_name: stmt_name.clone(),
            args: Vec::new(),
            query_unit: unit.clone(),
        }));
        actions.push(Action::new(ActionKind::Execute { portal: portal.clone(), max_rows: 0 }));
        actions.push(Action::new(ActionKind::ClosePortal { portal: portal.clone() }));
        actions.push(Action::new(ActionKind::CloseStmt { stmt_name }));
        portals.push(portal);
    }
    actions.push(Action::new(ActionKind::Sync));
    (actions, portals)
}

/// Runs `actions` against one acquired backend connection and buckets the
/// JSON-decoded `DataRow` replies (and any `ErrorResponse`) by which
/// `Execute` action produced them, returning one `UnitOutcome` per portal
/// in `portals`' order.
pub(crate) async fn run_units<B: BackendPool + 'static>(
    backend_pool: &Arc<B>,
    database: &str,
    actions: Vec<Action>,
    portals: &[String],
) -> Result<Vec<UnitOutcome>> {
    let mut guard = backend_pool.acquire(database).await?;
    let mut rows_by_portal: HashMap<String, Vec<Json>> = HashMap::new();
    let mut errors_by_portal: HashMap<String, String> = HashMap::new();
    let mut batch_error: Option<String> = None;
    {
        let mut on_reply = |action: &Action, bytes: &[u8]| {
            if bytes.is_empty() {
                return;
            }
            let msg = Message::new(Bytes::copy_from_slice(bytes));
            match msg.tag() {
                Tag::DATA_ROW => {
                    if let ActionKind::Execute { portal, .. } = &action.kind {
                        if let Some(value) = decode_json_row(&msg) {
                            rows_by_portal.entry(portal.clone()).or_default().push(value);
                        }
                    }
                }
                Tag::ERROR_RESPONSE => {
                    let message = decode_error_message(&msg);
                    match &action.kind {
                        ActionKind::Execute { portal, .. } => {
                            errors_by_portal.insert(portal.clone(), message);
                        }
                        _ => batch_error = Some(message),
                    }
                }
                _ => {}
            }
        };
        guard.run_actions(&actions, &mut on_reply).await?;
    }
    if let Some(message) = batch_error {
        return Err(Error::new(message));
    }
    Ok(portals
        .iter()
        .map(|p| UnitOutcome { rows: rows_by_portal.remove(p).unwrap_or_default(), error: errors_by_portal.remove(p) })
        .collect())
}

fn decode_json_row(msg: &Message) -> Option<Json> {
    let mut r = MessageReader::new(msg);
    if r.read_i16() < 1 {
        return None;
    }
    let bytes = r.read_len_prefixed_bytes().ok()??;
    let text = std::str::from_utf8(bytes).ok()?;
    serde_json::from_str(text).ok()
}

fn decode_error_message(msg: &Message) -> String {
    let mut r = MessageReader::new(msg);
    loop {
        let tag = r.read_byte();
        if tag == 0 || r.has_error() {
            break;
        }
        match r.read_str() {
            Ok(s) if tag == b'M' => return s.to_string(),
            Ok(_) => continue,
            Err(_) => break,
        }
    }
    "backend error".to_string()
}
