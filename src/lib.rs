pub mod riverfront;

pub use crate::riverfront::*;

use std::io;
use std::sync::Arc;

use tokio::runtime::{Runtime, Builder};
use tracing_subscriber::FmtSubscriber;
use tracing::Level;

use crate::riverfront::worker::{Worker, init_workers};
use crate::riverfront::auth::{JwtKeyStore, ScramVerifierStore};
use crate::riverfront::config::{Settings, load_config};
use crate::riverfront::common::{Result, coarse_monotonic_clock_updater};
use crate::riverfront::demux::MuxService;
use crate::riverfront::pool::{BackendPool, CompilerPool};

pub fn init_tracing(max_level: Level) {
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than TRACE (e.g, debug, info, warn, etc.)
        // will be written to stdout.
        .with_max_level(max_level)
        // completes the builder.
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");
}

/// Load the configuration settings from riverfront.yaml
/// See riverfront::config::load_config for more info.
pub fn init_settings() -> Result<&'static Settings> {
    load_config("riverfront.yaml")
}

pub fn init_runtime(conf: &'static Settings) -> io::Result<Runtime> {
    // This is unsafe to call after the server starts. It's safe here.
    unsafe {
        init_workers(conf.num_workers);
    }

    Builder::new_multi_thread()
        .worker_threads(conf.num_workers as usize)
        .enable_all()
        // Eagerly assign a thread-local worker to each original tokio worker thread
        // (this is a no-op later for additional tokio threads for blocking tasks)
        .on_thread_start(|| { Worker::try_get(); })
        .build()
}

/// Runs the single multiplexed listener (binary, PG-wire, and HTTP are all
/// demultiplexed off the same accepted socket — §4.I) for the lifetime of
/// the process, against the given compiler/backend pools and auth stores.
/// All four are external collaborators (RPC compiler worker pool, pooled
/// backend PG connections, tenant role catalog, JWT key rotation service);
/// the caller supplies concrete implementations.
pub fn run_server<P: CompilerPool + 'static, B: BackendPool + 'static>(
    conf: &'static Settings,
    tokio: &Runtime,
    compiler: Arc<P>,
    backend_pool: Arc<B>,
    scram_store: Arc<dyn ScramVerifierStore>,
    jwt_store: Arc<dyn JwtKeyStore>,
) {
    tokio.block_on(async move {
        // Update the coarse monotonic clock on a periodic basis
        tokio::spawn(coarse_monotonic_clock_updater());

        let service = MuxService::new(
            conf.listen_address(),
            conf.max_connections,
            conf.idle_timeout_seconds,
            conf.reuseport,
            compiler,
            backend_pool,
            scram_store,
            jwt_store,
        ).expect("could not start listener");

        service.run().await.expect("server loop exited with an error");
    });
}
