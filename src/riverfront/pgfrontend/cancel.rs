//! Registry of in-flight PostgreSQL-wire connections keyed by the
//! `(pid, secret)` pair handed out in `BackendKeyData`, so a `CancelRequest`
//! arriving on a brand new socket (§4.F, §5 "Cancellation") can be routed to
//! the right connection without it being involved in the lookup itself.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Default)]
pub struct CancelRegistry {
    inner: Mutex<HashMap<(i32, i32), Arc<Notify>>>,
}

impl CancelRegistry {
    /// Called once a connection has sent its `BackendKeyData`, making it a
    /// valid target for a future `CancelRequest`.
    pub fn register(&self, key: (i32, i32)) {
        self.inner.lock().unwrap().insert(key, Arc::new(Notify::new()));
    }

    /// Called when the owning connection closes; stale keys must not linger,
    /// since (pid, secret) pairs are drawn from a 32-bit RNG and could in
    /// principle repeat.
    pub fn unregister(&self, key: (i32, i32)) {
        self.inner.lock().unwrap().remove(&key);
    }

    /// Wakes every waiter registered for `key`. A CancelRequest for an
    /// unknown (already closed, or never valid) key is silently ignored,
    /// matching the PostgreSQL wire's own unauthenticated, best-effort
    /// CancelRequest semantics.
    pub fn trigger(&self, key: (i32, i32)) {
        if let Some(notify) = self.inner.lock().unwrap().get(&key) {
            notify.notify_waiters();
        }
    }

    /// A future that resolves once `trigger(key)` is called. Resolves only
    /// if `key` is still registered at the moment this is called; otherwise
    /// never resolves (the caller is expected to race this against the
    /// query it's actually running, not to await it alone).
    pub fn notified(&self, key: (i32, i32)) -> impl std::future::Future<Output = ()> {
        let notify = self.inner.lock().unwrap().get(&key).cloned();
        async move {
            match notify {
                Some(notify) => notify.notified().await,
                None => std::future::pending().await,
            }
        }
    }
}

static REGISTRY: OnceLock<CancelRegistry> = OnceLock::new();

/// Process-wide cancel registry. One per process, not per listener: a
/// `CancelRequest` may arrive on a different accepted socket than the
/// connection it targets.
pub fn registry() -> &'static CancelRegistry {
    REGISTRY.get_or_init(CancelRegistry::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_wakes_registered_waiter() {
        let reg = CancelRegistry::default();
        reg.register((1, 2));
        let notified = reg.notified((1, 2));
        reg.trigger((1, 2));
        notified.await;
    }

    #[tokio::test]
    async fn unregister_drops_future_triggers() {
        let reg = CancelRegistry::default();
        reg.register((1, 2));
        reg.unregister((1, 2));
        // trigger on an unregistered key must not panic.
        reg.trigger((1, 2));
    }
}
