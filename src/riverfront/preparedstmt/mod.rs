//! Per-connection prepared-statement catalog (Component H): extended-query
//! `Parse` statements, statement-level SQL `PREPARE`s, and the wrapping graph
//! between them. See `registry` for the full operation set.

pub mod registry;

pub use self::registry::{PreparedStmt, PreparedStmtRegistry, CachedParse};
