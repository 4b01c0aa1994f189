use uuid::Uuid;

use crate::riverfront::paramremap::ParamSchema;
use crate::riverfront::pool::Capabilities;

/// Cache key for the compiler's result cache: the full tuple determines whether
/// a previously-compiled `QueryUnitGroup` can be reused. Equality and hash are
/// defined over every field.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct QueryRequestInfo {
    pub normalized_source: String,
    pub protocol_major: u16,
    pub protocol_minor: u16,
    pub output_format: OutputFormat,
    pub expect_one: bool,
    pub implicit_limit: u64,
    pub inline_typeids: bool,
    pub inline_typenames: bool,
    pub inline_objectids: bool,
    pub allow_capabilities: Capabilities,
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum OutputFormat {
    Binary,
    Json,
    JsonElements,
    None,
}

/// What a `QueryUnit`'s transaction-control side effect is, if any.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TxAction {
    None,
    Start,
    Commit,
    Rollback,
    DeclareSavepoint,
    RollbackToSavepoint,
    ReleaseSavepoint,
}

/// What a `QueryUnit`'s `SET`/`RESET` side effect is, if any, dispatched
/// against `PgConnectionView::set_vars` (§4.E). `frontend` routes
/// frontend-only keys — including ParamRemap's `global <mod>::<name>`
/// entries (§4.G) — to the fe_settings surface instead of backend GUCs.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum ConfigOp {
    None,
    /// `SET [LOCAL] name {TO | =} value` / `... TO DEFAULT` (`value: None`).
    Set { name: String, value: Option<String>, is_local: bool, frontend: bool },
    /// `RESET ALL`.
    ResetAll { is_local: bool, frontend: bool },
}

/// A prepare/execute/deallocate directive attached to a `QueryUnit`, driving
/// the statement-level PREPARE registry (see `preparedstmt::registry`).
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum StmtOp {
    None,
    Prepare { user_name: String, backend_name: String },
    Execute { user_name: String },
    Deallocate { user_name: String },
}

/// One compiled SQL statement plus the metadata the frontend needs to drive it:
/// capability requirements, transaction/DDL flags, and typed in/out descriptors.
#[derive(Clone, Debug)]
pub struct QueryUnit {
    pub sql: String,
    pub status_tag: String,
    pub capabilities: Capabilities,
    pub tx_action: TxAction,
    pub is_ddl: bool,
    pub in_type_id: Uuid,
    pub out_type_id: Uuid,
    pub in_type_data: Vec<u8>,
    pub out_type_data: Vec<u8>,
    pub stmt_op: StmtOp,
    pub config_op: ConfigOp,
}

/// An ordered group of `QueryUnit`s compiled from one client query, plus the
/// hidden-parameter schema (§4.G) the frontend splices onto the tail of the
/// external Bind argument list before forwarding it to the backend.
#[derive(Clone, Debug)]
pub struct QueryUnitGroup {
    pub units: Vec<QueryUnit>,
    pub param_schema: ParamSchema,
}

impl QueryUnitGroup {
    pub fn capabilities(&self) -> Capabilities {
        self.units.iter().fold(Capabilities::NONE, |acc, u| acc | u.capabilities)
    }

    pub fn is_multi_statement(&self) -> bool {
        self.units.len() > 1
    }
}

/// What the compiler RPC returns for one request: the compiled group plus the
/// request info it was compiled against (for cache insertion by the caller).
#[derive(Clone, Debug)]
pub struct CompiledQuery {
    pub request: QueryRequestInfo,
    pub group: QueryUnitGroup,
}
