mod config;
mod postgres;
mod enums;
mod load;

pub use self::config::{Settings, conf, AuthConfig, CompilerConfig, ProtocolRange};
pub use self::postgres::{BackendPoolConfig, BackendServer};
pub use self::enums::{TlsMode, EndpointSecurity, AuthMethod};
pub use self::load::load_config;

/// Backlog argument passed to `listen(2)` for the multiplexed TCP listener.
pub const LISTEN_BACKLOG: u32 = 1024;
/// How often the idle-connection sweeper scans the registries for timed-out sockets.
pub const CHECK_TIMEOUTS_INTERVAL: u64 = 5;
/// Granularity, in seconds, of the coarse monotonic clock used for cheap idle-time
/// tracking across every connection (avoids a syscall per `last_active()` read).
pub const COARSE_CLOCK_GRANULARITY_SECONDS: u64 = 1;
