//! The contract between `PgFrontend` and a pooled `BackendConn`: an ordered
//! list of actions executed atomically as one extended-query batch.

use crate::riverfront::pgview::Settings;
use crate::riverfront::pool::QueryUnit;

/// One directive in an extended-query action batch. Carries enough state to
/// be replayed against whichever backend connection happens to be acquired
/// for this batch, since backend connections are pooled and have no
/// affinity to this client (see "Prepared-statement locality" in
/// `pgfrontend::frontend`).
#[derive(Clone, Debug)]
pub enum ActionKind {
    /// Opens an implicit transaction on the backend before the rest of the
    /// batch runs, so a bare simple-query outside any explicit BEGIN still
    /// gets transactional semantics.
    StartImplicitTx,
    /// `PARSE` of a (possibly server-generated) statement name.
    Parse {
        stmt_name: String,
        sql_text: String,
        param_type_oids: Vec<u32>,
        fe_settings: Settings,
    },
    /// `BIND` of a portal to a previously (or concurrently) parsed statement.
    Bind {
        portal: String,
        stmt_name: String,
        args: Vec<u8>,
        query_unit: QueryUnit,
    },
    DescribeStmt { stmt_name: String },
    /// Legacy (protocol <= 0.13) Describe that additionally wants the row
    /// descriptor, not just the parameter descriptor.
    DescribeStmtRows { stmt_name: String },
    DescribePortal { portal: String },
    Execute { portal: String, max_rows: i32 },
    CloseStmt { stmt_name: String },
    ClosePortal { portal: String },
    Flush,
    Sync,
    /// A raw SQL statement run without parameters, outside the Parse/Bind
    /// machinery — transaction control (`BEGIN`/`COMMIT`/`ROLLBACK`) and
    /// schema DDL units applied during Dump/Restore (§4.D) have no client-
    /// visible portal or statement name to thread through.
    RawSql(String),
    /// One Restore data block (§4.D): raw row bytes for the object type
    /// identified by `schema_object_id`, applied with triggers already
    /// disabled on its table for the duration of the restore.
    CopyData { schema_object_id: uuid::Uuid, data: Vec<u8> },
}

/// An `ActionKind` plus the `injected` flag: actions injected by the
/// frontend itself (prepared-statement locality re-parses, nested-statement
/// materialization) must not have their replies forwarded to the client.
#[derive(Clone, Debug)]
pub struct Action {
    pub kind: ActionKind,
    pub injected: bool,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Action { kind, injected: false }
    }

    pub fn injected(kind: ActionKind) -> Self {
        Action { kind, injected: true }
    }

    /// Returns a copy of this action marked injected, matching the
    /// `parse_action.as_injected()` idiom used when replaying a cached
    /// Parse ahead of a client action during prepared-statement locality.
    pub fn as_injected(&self) -> Self {
        Action { kind: self.kind.clone(), injected: true }
    }
}
