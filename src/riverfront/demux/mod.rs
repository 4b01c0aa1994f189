//! Protocol demultiplexing on a freshly accepted socket (§4.I "Alternative
//! fast path" + the first-byte sniffing that picks one of {BinaryFrontend,
//! PgFrontend, HttpMux} — the data-flow entry point every other frontend
//! hangs off of). `MuxConnection` is the `server::Connection` the multiplexed
//! listener's `Connections<C>` registry actually stores; it owns nothing
//! protocol-specific itself; it just sniffs and then hands the socket (and
//! whatever leading bytes it already consumed) to the chosen frontend.

use std::any::Any;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::riverfront::auth::{JwtKeyStore, ScramVerifierStore};
use crate::riverfront::binary::BinaryFrontend;
use crate::riverfront::common::AtomicRefCounted;
use crate::riverfront::frontend::FrontendBase;
use crate::riverfront::http::HttpMux;
use crate::riverfront::pgfrontend::PgFrontend;
use crate::riverfront::pool::{BackendPool, CompilerPool};
use crate::riverfront::server::{Connection, Connections};
use crate::riverfront::{Error, Result};

/// Which frontend state machine a freshly accepted socket's first bytes
/// identify it as (§8 testable property 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// The binary wire's client handshake tag `V` followed by a length
    /// field whose high byte is (for any realistic message size) zero.
    Binary,
    /// An ASCII HTTP request line.
    Http,
    /// Falls back here once Binary and Http are ruled out: the PostgreSQL
    /// untagged startup frame (SSLRequest, CancelRequest, GSSENCRequest, and
    /// StartupMessage all share the same 4-byte-length-then-4-byte-code
    /// framing, so we don't need to tell them apart yet).
    Pg,
}

const HTTP_METHODS: &[&[u8]] = &[
    b"GET ", b"POST ", b"PUT ", b"HEAD ", b"DELETE ", b"OPTIONS ", b"PATCH ", b"CONNECT ", b"TRACE ",
];

/// Inspects the leading bytes of a new connection and picks a frontend
/// without needing to buffer a whole message of any protocol first.
/// Returns `None` if `buf` is too short to decide yet.
pub fn sniff(buf: &[u8]) -> Option<Protocol> {
    if buf.len() < 2 {
        return None;
    }
    if buf[0] == b'V' && buf[1] == 0 {
        return Some(Protocol::Binary);
    }
    if HTTP_METHODS.iter().any(|m| buf.len() >= m.len() && &buf[..m.len()] == *m) {
        return Some(Protocol::Http);
    }
    if buf.len() >= 4 {
        return Some(Protocol::Pg);
    }
    None
}

/// Number of leading bytes `sniff` needs at minimum to make a decision
/// (the longest HTTP method prefix we check, so the common methods resolve
/// without an extra read).
const SNIFF_BYTES: usize = 4;

/// Type-erased process-wide singleton for the compiler/backend pool Arcs
/// plus the SCRAM/JWT auth stores. `MuxConnection<P, B>`'s `Connection::new`
/// has a fixed signature (shared with every other `server::Connection` impl)
/// that takes only the accepted socket, so the collaborators this particular
/// listener was started with are looked up here instead of threaded through
/// the constructor — the same "look it up from a process-wide singleton"
/// idiom `config::conf()` uses, generalized with `Any` since the pool types
/// are generic per listener.
type Pools<P, B> = (Arc<P>, Arc<B>, Arc<dyn ScramVerifierStore>, Arc<dyn JwtKeyStore>);

static POOLS: OnceLock<Box<dyn Any + Send + Sync>> = OnceLock::new();

/// Installs the compiler/backend pools and auth stores the demultiplexer
/// hands out to every `MuxConnection<P, B>` it constructs. Must be called
/// exactly once, before the listener starts accepting, per monomorphization
/// of `(P, B)`.
pub fn install_pools<P: CompilerPool + 'static, B: BackendPool + 'static>(
    compiler: Arc<P>,
    backend_pool: Arc<B>,
    scram_store: Arc<dyn ScramVerifierStore>,
    jwt_store: Arc<dyn JwtKeyStore>,
) {
    POOLS
        .set(Box::new((compiler, backend_pool, scram_store, jwt_store) as Pools<P, B>))
        .ok()
        .expect("demux pools installed more than once");
}

fn pools<P: CompilerPool + 'static, B: BackendPool + 'static>() -> &'static Pools<P, B> {
    POOLS
        .get()
        .expect("demux::install_pools was not called before accepting connections")
        .downcast_ref::<Pools<P, B>>()
        .expect("demux pools installed for a different (CompilerPool, BackendPool) pair")
}

/// The `server::Connection` stored in the multiplexed listener's registry.
/// Holds only the socket base; the sniffed frontend owns everything
/// protocol-specific and is constructed fresh inside `run`.
pub struct MuxConnection<P: CompilerPool + 'static, B: BackendPool + 'static> {
    base: Arc<FrontendBase>,
    compiler: Arc<P>,
    backend_pool: Arc<B>,
    scram_store: Arc<dyn ScramVerifierStore>,
    jwt_store: Arc<dyn JwtKeyStore>,
    connections: &'static Connections<Self>,
}

impl<P: CompilerPool + 'static, B: BackendPool + 'static> Connection for MuxConnection<P, B> {
    fn new(stream: TcpStream, connections: &'static Connections<Self>) -> Self {
        let (compiler, backend_pool, scram_store, jwt_store) = pools::<P, B>();
        let is_localhost = stream.peer_addr().map(|a| a.ip().is_loopback()).unwrap_or(false);
        MuxConnection {
            base: Arc::new(FrontendBase::new(stream, is_localhost)),
            compiler: compiler.clone(),
            backend_pool: backend_pool.clone(),
            scram_store: scram_store.clone(),
            jwt_store: jwt_store.clone(),
            connections,
        }
    }

    fn id(&self) -> u32 {
        self.base.id()
    }

    fn set_id(&self, id: u32) {
        self.base.set_id(id);
    }

    fn last_active(&self) -> u32 {
        self.base.last_active()
    }

    fn close(&self) {
        self.base.close();
    }
}

impl<P: CompilerPool + 'static, B: BackendPool + 'static> std::fmt::Debug for MuxConnection<P, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MuxConnection{{id: {}}}", self.base.id())
    }
}

impl<P: CompilerPool + 'static, B: BackendPool + 'static> AtomicRefCounted for MuxConnection<P, B> {
    fn refcount(&self) -> u32 {
        self.base.refcount()
    }
    fn incref(&self) {
        self.base.incref()
    }
    fn decref(&self) -> bool {
        self.base.decref()
    }
}

impl<P: CompilerPool + 'static, B: BackendPool + 'static> Drop for MuxConnection<P, B> {
    fn drop(&mut self) {
        let id = self.base.id();
        if id != 0 {
            self.connections.remove(self, id);
        }
    }
}

impl<P: CompilerPool + 'static, B: BackendPool + 'static> MuxConnection<P, B> {
    /// Drives the whole connection lifetime: sniffs the protocol off the
    /// first bytes, then dispatches to the matching frontend state machine
    /// with whatever leading bytes were already consumed while sniffing.
    pub async fn run(&self) -> Result<()> {
        let leading = self.base.peek_initial_bytes(SNIFF_BYTES).await?;
        let protocol = sniff(leading.as_ref()).ok_or_else(|| Error::protocol_violation("could not determine client protocol"))?;
        let leading = Bytes::from(leading);
        debug!(?protocol, "demultiplexed connection");

        match protocol {
            Protocol::Binary => {
                BinaryFrontend::new(
                    self.base.clone(),
                    self.compiler.clone(),
                    self.backend_pool.clone(),
                    self.scram_store.clone(),
                    self.jwt_store.clone(),
                )
                .run(leading)
                .await
            }
            Protocol::Pg => {
                PgFrontend::new(
                    self.base.clone(),
                    self.compiler.clone(),
                    self.backend_pool.clone(),
                    self.scram_store.clone(),
                    self.jwt_store.clone(),
                )
                .run(leading)
                .await
            }
            Protocol::Http => {
                HttpMux::new(
                    self.base.clone(),
                    self.compiler.clone(),
                    self.backend_pool.clone(),
                    self.scram_store.clone(),
                    self.jwt_store.clone(),
                )
                .run(leading)
                .await
            }
        }
    }
}

/// Runs the single multiplexed listener for the lifetime of the process:
/// accepts sockets, registers each in the shared `Connections` table, and
/// spawns a task that sniffs the protocol and drives the matching frontend.
/// Mirrors the accept-loop shape every per-protocol service in this crate's
/// lineage uses (`server::Listener` + `server::Connections` + spawn-per-conn).
pub struct MuxService<P: CompilerPool + 'static, B: BackendPool + 'static> {
    listener: crate::riverfront::server::Listener,
    connections: &'static Connections<MuxConnection<P, B>>,
}

impl<P: CompilerPool + 'static, B: BackendPool + 'static> MuxService<P, B> {
    pub fn new(
        address: String,
        max_connections: u32,
        idle_timeout_seconds: u32,
        reuseport: bool,
        compiler: Arc<P>,
        backend_pool: Arc<B>,
        scram_store: Arc<dyn ScramVerifierStore>,
        jwt_store: Arc<dyn JwtKeyStore>,
    ) -> Result<Self> {
        install_pools(compiler, backend_pool, scram_store, jwt_store);
        Ok(MuxService {
            listener: crate::riverfront::server::Listener::new(address, reuseport)?,
            connections: Connections::new(max_connections, idle_timeout_seconds),
        })
    }

    pub async fn run(&self) -> Result<()> {
        loop {
            let stream = match self.listener.accept().await {
                Some(stream) => stream,
                None => return Ok(()),
            };
            if self.connections.is_full() {
                warn!("rejecting connection, at max_connections limit");
                continue;
            }
            let conn = self.connections.add(stream);
            tokio::spawn(async move {
                if let Err(e) = conn.run().await {
                    debug!(%e, "connection closed with error");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_binary_handshake_tag() {
        assert_eq!(sniff(b"V\0\0\0"), Some(Protocol::Binary));
    }

    #[test]
    fn sniffs_http_methods() {
        assert_eq!(sniff(b"GET /"), Some(Protocol::Http));
        assert_eq!(sniff(b"POST "), Some(Protocol::Http));
    }

    #[test]
    fn falls_back_to_pg_startup_framing() {
        // StartupMessage: 4-byte length, then 4-byte protocol version 3.0.
        assert_eq!(sniff(&[0, 0, 0, 41, 0, 3, 0, 0]), Some(Protocol::Pg));
    }

    #[test]
    fn too_short_to_decide() {
        assert_eq!(sniff(b"V"), None);
        assert_eq!(sniff(b""), None);
    }
}
