//! Abstractions over the backend connection pool and the SQL/EdgeQL compiler
//! worker pool. Both are external collaborators (see crate docs): this module
//! only specifies the call shape the frontend needs, not their implementation.

mod capability;
mod query;
mod backend;
mod compiler;

pub use self::capability::Capabilities;
pub use self::query::{QueryRequestInfo, QueryUnit, QueryUnitGroup, CompiledQuery, TxAction, StmtOp, ConfigOp, OutputFormat};
pub use self::backend::{BackendConn, BackendConnGuard, BackendPool};
pub use self::compiler::{CompilerPool, DumpInfo, DumpBlockInfo, RestoreInfo};
