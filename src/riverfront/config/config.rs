use std::mem::MaybeUninit;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::riverfront::config::postgres::BackendPoolConfig;
use crate::riverfront::config::enums::{TlsMode, EndpointSecurity, AuthMethod};
use crate::riverfront::common::Error;
use crate::riverfront::Result;

/// Version range accepted for the binary wire protocol handshake (component D).
#[derive(Deserialize, Clone, Copy, Debug)]
pub struct ProtocolRange {
    #[serde(default = "default_min_major")]
    pub min_major: u16,
    #[serde(default)]
    pub min_minor: u16,
    #[serde(default = "default_max_major")]
    pub max_major: u16,
    #[serde(default)]
    pub max_minor: u16,
}

const fn default_min_major() -> u16 { 0 }
const fn default_max_major() -> u16 { 2 }

impl Default for ProtocolRange {
    fn default() -> Self {
        ProtocolRange { min_major: 0, min_minor: 13, max_major: 2, max_minor: 0 }
    }
}

#[derive(Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub default_method: AuthMethod,
    /// PEM path(s) for RS256/ES256 JWT verification keys
    #[serde(default)]
    pub jwt_public_key_paths: Vec<String>,
    #[serde(default = "default_scram_iterations")]
    pub scram_default_iterations: u32,
    /// Seed mixed into the mock SCRAM verifier salt so unknown-user authentication
    /// is deterministic per cluster but not predictable cross-cluster.
    #[serde(default = "default_mock_nonce_seed")]
    pub mock_nonce_seed: String,
    /// require the TLS peer certificate Common Name to equal the claimed username
    #[serde(default)]
    pub mtls_require_cn_match: bool,
}

const fn default_scram_iterations() -> u32 { 4096 }
fn default_mock_nonce_seed() -> String { "riverfront-mock-nonce".to_string() }

#[derive(Deserialize)]
pub struct CompilerConfig {
    /// opaque connect target for the compiler RPC worker pool; the RPC protocol
    /// itself is an external collaborator, not implemented in this crate
    #[serde(default = "default_compiler_address")]
    pub address: String,
    #[serde(default = "default_compiler_pool_size")]
    pub pool_size: u32,
}

fn default_compiler_address() -> String { "127.0.0.1:5660".to_string() }
const fn default_compiler_pool_size() -> u32 { 4 }

#[derive(Deserialize)]
pub struct Settings {
    /// config_path is the path of the loaded config file
    #[serde(skip_deserializing)]
    config_path: PathBuf,
    /// app_name identifies this service to connected sessions if not provided by the client
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// host to listen on, defaults to 0.0.0.0
    #[serde(default = "default_host")]
    pub host: String,
    /// single multiplexed port: binary, PG-wire, and HTTP connections are all
    /// demultiplexed from the same listener by sniffing the first bytes
    #[serde(default = "default_port")]
    pub port: u16,
    /// number of tokio worker threads (and thread-local Worker slots) to start.
    /// Defaults to the number of logical cpus.
    #[serde(default = "default_num_workers")]
    pub num_workers: u32,
    /// if true, bind one SO_REUSEPORT listener per worker thread instead of a single
    /// shared listener, reducing accept() contention at the cost of losing the
    /// "address already in use" check on startup
    #[serde(default)]
    pub reuseport: bool,
    /// recv_buffer_size is the default size for (user-space) buffers used to read from TCP sockets
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: u32,
    /// write_flush_threshold is the number of pending bytes that triggers an eager flush (component A)
    #[serde(default = "default_write_flush_threshold")]
    pub write_flush_threshold: usize,
    /// max_connections to allow before rejecting new connections on this listener
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// connections idling (awaiting the next client message) past this are reaped
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u32,
    /// whether a connection must reach TLS before auth is attempted
    #[serde(default)]
    pub endpoint_security: EndpointSecurity,
    /// client-facing TLS preference (SSLRequest / HTTPS upgrade)
    #[serde(default)]
    pub client_tls: TlsMode,
    #[serde(default)]
    pub tls_cert_path: String,
    #[serde(default)]
    pub tls_key_path: String,
    /// built once from tls_cert_path/tls_key_path during load()
    #[serde(skip_deserializing)]
    pub tls_config: Option<Arc<rustls::ServerConfig>>,
    /// enables dev-mode-only status messages and relaxed checks
    #[serde(default)]
    pub dev_mode: bool,
    /// current (modern) binary protocol version range
    #[serde(default)]
    pub binary_protocol: ProtocolRange,
    /// backwards-compatible binary protocol version range (lower min_protocol, legacy opcodes)
    #[serde(default = "default_legacy_protocol")]
    pub legacy_binary_protocol: ProtocolRange,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub compiler: CompilerConfig,
    /// directory the HttpMux `ui/…` route serves static assets from
    #[serde(default = "default_ui_asset_dir")]
    pub ui_asset_dir: String,
    /// backend connection pool passthrough settings
    pub postgres: BackendPoolConfig,
}

fn default_app_name() -> String { "riverfront".to_string() }
fn default_host() -> String { "0.0.0.0".to_string() }
const fn default_port() -> u16 { 5656 }
fn default_num_workers() -> u32 { num_cpus::get() as u32 }
const fn default_recv_buffer_size() -> u32 { 32 * 1024 }
const fn default_write_flush_threshold() -> usize { 100 * 1024 }
const fn default_max_connections() -> u32 { 100_000 }
const fn default_idle_timeout_seconds() -> u32 { 20 * 60 }
fn default_ui_asset_dir() -> String { "./ui".to_string() }

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            default_method: AuthMethod::default(),
            jwt_public_key_paths: Vec::new(),
            scram_default_iterations: default_scram_iterations(),
            mock_nonce_seed: default_mock_nonce_seed(),
            mtls_require_cn_match: true,
        }
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig { address: default_compiler_address(), pool_size: default_compiler_pool_size() }
    }
}

fn default_legacy_protocol() -> ProtocolRange {
    ProtocolRange { min_major: 0, min_minor: 9, max_major: 0, max_minor: 13 }
}

static mut SETTINGS: MaybeUninit<Settings> = MaybeUninit::uninit();

/// Returns the global configuration singleton. Must not be called before `load_config()`.
pub fn conf() -> &'static Settings {
    unsafe { &*SETTINGS.as_ptr() }
}

pub(crate) fn settings_slot() -> &'static mut Settings {
    unsafe { &mut *SETTINGS.as_mut_ptr() }
}

impl Settings {
    pub(crate) fn load(&mut self, path: PathBuf) -> Result<()> {
        self.config_path = path;
        if self.recv_buffer_size < 4096 {
            self.recv_buffer_size = default_recv_buffer_size();
        }
        if self.recv_buffer_size > 1024 * 1024 {
            return Err(Error::new("recv_buffer_size cannot be > 1MB"));
        }
        self.recv_buffer_size = self.recv_buffer_size.next_power_of_two();

        if !self.tls_cert_path.is_empty() {
            self.tls_config = Some(load_tls_server_config(&self.tls_cert_path, &self.tls_key_path)?);
        } else if let TlsMode::Required = self.client_tls {
            return Err(Error::new("client_tls is required but no tls_cert_path was configured"));
        }

        self.postgres.load()
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn load_tls_server_config(cert_path: &str, key_path: &str) -> Result<Arc<rustls::ServerConfig>> {
    use std::fs::File;
    use std::io::BufReader;

    let cert_file = File::open(cert_path)?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .map_err(|_| Error::new("invalid tls_cert_path"))?
        .into_iter()
        .map(rustls::Certificate)
        .collect::<Vec<_>>();

    let key_file = File::open(key_path)?;
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(key_file))
        .map_err(|_| Error::new("invalid tls_key_path"))?;
    if keys.is_empty() {
        return Err(Error::new("no private key found in tls_key_path"));
    }
    let key = rustls::PrivateKey(keys.remove(0));

    let config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(Error::from)?;

    Ok(Arc::new(config))
}
