use uuid::Uuid;
use futures::future::BoxFuture;

use crate::riverfront::Result;
use crate::riverfront::pool::query::{QueryRequestInfo, CompiledQuery};

/// One object-type block in a dump/restore stream: the schema object id the
/// block's rows belong to, a raw type descriptor blob, and the ids of blocks
/// it must be restored after (§4.D "block metadata table").
#[derive(Clone, Debug)]
pub struct DumpBlockInfo {
    pub schema_object_id: Uuid,
    pub type_descriptor: Vec<u8>,
    pub dependency_ids: Vec<Uuid>,
    /// The statement the binary frontend runs against the pooled backend
    /// connection to fetch this block's row data, inside the dump's open
    /// `SERIALIZABLE READ ONLY DEFERRABLE` transaction.
    pub sql: String,
}

/// What the compiler returns to seed a Dump: the schema DDL text, the
/// `(name, id)` table the dump header enumerates, and one `DumpBlockInfo`
/// per object type to stream rows for.
#[derive(Clone, Debug)]
pub struct DumpInfo {
    pub schema_ddl: String,
    pub schema_ids: Vec<(String, Uuid)>,
    pub blocks: Vec<DumpBlockInfo>,
}

/// What the compiler returns to apply a Restore: the schema DDL split into
/// individually-applicable units (so triggers can be disabled per listed
/// table before data loads), and the set of tables the restore will write to.
#[derive(Clone, Debug)]
pub struct RestoreInfo {
    pub schema_sql_units: Vec<String>,
    pub tables: Vec<String>,
}

/// The SQL/EdgeQL compiler worker pool, reached only by RPC. An external
/// collaborator (see crate docs): this trait specifies only the call shape
/// every query-issuing frontend drives it through, not the compiler itself.
pub trait CompilerPool: Send + Sync {
    /// Compiles (or returns a cached compilation of) `request` against the
    /// named database, returning the `QueryUnitGroup` plus the request info
    /// to key the caller's own compile cache by.
    fn compile<'a>(&'a self, database: &'a str, request: QueryRequestInfo) -> BoxFuture<'a, Result<CompiledQuery>>;

    /// Introspects `database`'s schema and enumerates the object types a Dump
    /// needs to stream, inside the caller's already-open read-only backend
    /// transaction (§4.D "Dump protocol").
    fn prepare_dump<'a>(&'a self, database: &'a str) -> BoxFuture<'a, Result<DumpInfo>>;

    /// Validates `schema_ddl` against `database` and splits it into units the
    /// caller can apply one at a time, disabling triggers on the tables the
    /// restore will write to (§4.D "Restore protocol").
    fn prepare_restore<'a>(&'a self, database: &'a str, schema_ddl: &'a str) -> BoxFuture<'a, Result<RestoreInfo>>;
}
