#![allow(unused_imports)]

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::Level;

use riverfront::auth::{JwtKeyStore, ScramVerifier, ScramVerifierStore};
use riverfront::pool::{
    BackendConn, BackendConnGuard, BackendPool, CompiledQuery, CompilerPool, DumpInfo, QueryRequestInfo, RestoreInfo,
};
use riverfront::pgfrontend::actions::Action;
use riverfront::{init_runtime, init_settings, init_tracing, run_server, Error, Result};

/// The compiler worker pool and the pooled backend connections are external
/// collaborators reached over RPC (see crate docs: this crate specifies only
/// the call shape, not the compiler or the backend pool itself). A real
/// deployment wires concrete implementations that dial out to those
/// services; this binary has none available, so every call fails fast with
/// `CannotConnectNow` rather than pretending to serve traffic.
struct UnwiredCompilerPool;

impl CompilerPool for UnwiredCompilerPool {
    fn compile<'a>(&'a self, _database: &'a str, _request: QueryRequestInfo) -> BoxFuture<'a, Result<CompiledQuery>> {
        Box::pin(async { Err(Error::cannot_connect_now("no compiler pool configured")) })
    }

    fn prepare_dump<'a>(&'a self, _database: &'a str) -> BoxFuture<'a, Result<DumpInfo>> {
        Box::pin(async { Err(Error::cannot_connect_now("no compiler pool configured")) })
    }

    fn prepare_restore<'a>(&'a self, _database: &'a str, _schema_ddl: &'a str) -> BoxFuture<'a, Result<RestoreInfo>> {
        Box::pin(async { Err(Error::cannot_connect_now("no compiler pool configured")) })
    }
}

struct UnwiredBackendConn;

impl BackendConn for UnwiredBackendConn {
    fn run_actions<'a>(
        &'a mut self,
        _actions: &'a [Action],
        _on_reply: &'a mut (dyn FnMut(&Action, &[u8]) + Send),
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Err(Error::cannot_connect_now("no backend pool configured")) })
    }

    fn cancel(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn in_transaction(&self) -> bool {
        false
    }

    fn mark_faulted(&mut self) {}
}

struct UnwiredBackendPool;

impl BackendPool for UnwiredBackendPool {
    type Conn = UnwiredBackendConn;

    fn acquire<'a>(&'a self, _database: &'a str) -> BoxFuture<'a, Result<BackendConnGuard<Self::Conn>>> {
        Box::pin(async { Err(Error::cannot_connect_now("no backend pool configured")) })
    }
}

/// No tenant role catalog wired in: every username looks unknown, so SCRAM
/// always falls through to the anti-enumeration mock verifier and never
/// actually authenticates.
struct UnwiredScramStore;

impl ScramVerifierStore for UnwiredScramStore {
    fn lookup(&self, _user: &str) -> Option<ScramVerifier> {
        None
    }
}

/// No signing keys wired in: every bearer token fails verification.
struct UnwiredJwtStore;

impl JwtKeyStore for UnwiredJwtStore {
    fn signing_key_pem(&self, _alg: jsonwebtoken::Algorithm) -> Option<Vec<u8>> {
        None
    }
}

fn main() {
    // TODO start a watchdog process (that won't die when this process dies!)
    // which monitors this process and restarts it with the same command line arguments if it dies.
    // If we intentionally shut it down, we kill the watchdog here first before exiting.
    init_tracing(Level::INFO);

    let conf = init_settings().expect("could not load config");
    let tokio = init_runtime(conf).expect("could not create tokio runtime");

    tracing::warn!("starting with unwired compiler/backend pools; all queries will fail with CannotConnectNow until a real pool is wired in");

    run_server(
        conf,
        &tokio,
        Arc::new(UnwiredCompilerPool),
        Arc::new(UnwiredBackendPool),
        Arc::new(UnwiredScramStore),
        Arc::new(UnwiredJwtStore),
    );

    // TODO catch panics and gracefully shutdown the process
    // TODO wait for shutdown to complete
}
