use std::ops::{Deref, DerefMut};

use futures::future::BoxFuture;

use crate::riverfront::Result;
use crate::riverfront::pgfrontend::actions::Action;

/// A pooled backend PostgreSQL connection, with no affinity to any particular
/// client connection. The pool's own LRU of server-prepared statements and
/// connection lifecycle are out of scope here (external collaborator); this
/// trait specifies only the shape the frontend drives it through.
pub trait BackendConn: Send {
    /// Runs one extended-query action batch atomically against this backend
    /// and streams replies back through `on_reply`. Actions marked
    /// `injected` must not have their replies forwarded to the client.
    fn run_actions<'a>(
        &'a mut self,
        actions: &'a [Action],
        on_reply: &'a mut (dyn FnMut(&Action, &[u8]) + Send),
    ) -> BoxFuture<'a, Result<()>>;

    /// Issues a backend-level cancel against whatever this connection is
    /// currently executing (used by PG CancelRequest handling).
    fn cancel(&mut self) -> BoxFuture<'_, Result<()>>;

    /// True while a transaction opened by `run_actions` is still open, which
    /// pins this connection across multiple frontend messages.
    fn in_transaction(&self) -> bool;

    /// Marks the connection as faulted so the pool resets rather than reuses
    /// it (set on cancellation or an unwound error).
    fn mark_faulted(&mut self);
}

/// The compiler + backend pool the frontend acquires connections and compiled
/// queries from. An external collaborator: only the call shape is specified.
pub trait BackendPool: Send + Sync {
    type Conn: BackendConn;

    /// Acquires a backend connection scoped to the caller; the returned guard
    /// releases it back to the pool on drop (including on error/cancellation
    /// unwind), satisfying the "scoped release on every exit path" invariant.
    fn acquire<'a>(&'a self, database: &'a str) -> BoxFuture<'a, Result<BackendConnGuard<Self::Conn>>>;
}

/// RAII guard returned by `BackendPool::acquire`. Dropping it (including
/// during an unwind) returns the connection to the pool; connections marked
/// faulted via `BackendConn::mark_faulted` are reset by the pool instead of
/// reused.
pub struct BackendConnGuard<C: BackendConn> {
    conn: Option<C>,
    release: Box<dyn FnOnce(C) + Send>,
}

impl<C: BackendConn> BackendConnGuard<C> {
    pub fn new(conn: C, release: Box<dyn FnOnce(C) + Send>) -> Self {
        Self { conn: Some(conn), release }
    }
}

impl<C: BackendConn> Deref for BackendConnGuard<C> {
    type Target = C;
    fn deref(&self) -> &C {
        self.conn.as_ref().expect("BackendConnGuard used after release")
    }
}

impl<C: BackendConn> DerefMut for BackendConnGuard<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("BackendConnGuard used after release")
    }
}

impl<C: BackendConn> Drop for BackendConnGuard<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let release = std::mem::replace(&mut self.release, Box::new(|_| {}));
            release(conn);
        }
    }
}
