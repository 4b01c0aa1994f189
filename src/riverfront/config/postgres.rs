use serde::Deserialize;

use crate::riverfront::config::enums::TlsMode;
use crate::riverfront::common::{Error, Result};

/// Passthrough configuration for the backend connection pool. The pool itself
/// (LRU of server-prepared statements, connection lifecycle, routing) is an
/// external collaborator reached only through the `BackendConn` trait; this
/// struct just carries the settings the frontend needs to size requests and
/// compute dump/restore timeout overrides.
#[derive(Deserialize)]
pub struct BackendPoolConfig {
    pub servers: Vec<BackendServer>,
    /// default values used to replace any empty/omitted value for each server entry
    pub default: BackendServer,
    /// port to listen on for PostgreSQL-wire frontend connections: default 5432
    #[serde(default = "default_port")]
    pub port: u16,
    /// pinned_sessions prevents release of the backend db connection until the session ends.
    /// Enabling this backs every session 1-to-1 with a db connection, which hurts throughput.
    #[serde(default)]
    pub pinned_sessions: bool,
    /// defer_begin = false requires that transactions are backed 1-to-1 with a backend db transaction.
    /// If true, a BEGIN transaction may be deferred in READ COMMITTED or lower isolation levels
    /// until the first query that would modify the database or take locks.
    #[serde(default)]
    pub defer_begin: bool,
    /// max_connections to allow before rejecting new frontend connections. Default 10,000.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// statement_timeout (ms) applied to a dump/restore backend session; 0 disables it there too.
    #[serde(default)]
    pub dump_restore_statement_timeout_ms: u32,
    /// idle_in_transaction_session_timeout (ms) applied to a dump/restore backend session.
    #[serde(default)]
    pub dump_restore_idle_in_tx_timeout_ms: u32,
}

const fn default_port() -> u16 { 5432 }
const fn default_max_connections() -> u32 { 10000 }

#[derive(Deserialize, Clone)]
pub struct BackendServer {
    /// database to connect to
    pub database: String,
    /// host to connect to, defaults to localhost
    #[serde(default = "default_host")]
    pub host: String,
    /// user to connect with, usually a superuser; SET ROLE is used for the login user if different
    #[serde(default)]
    pub user: String,
    /// password if using password authentication
    #[serde(default)]
    pub password: String,
    /// Port to connect to, defaults to 5432
    #[serde(default = "default_port")]
    pub port: u16,
    /// TLS preference between this server and PostgreSQL, defaults to prefer
    #[serde(default)]
    pub backend_tls: TlsMode,
    /// is_master is set to true if this isn't inside a replicas vec
    #[serde(skip_deserializing)]
    pub is_master: bool,
    /// max_concurrent_transactions is the maximum number of db connections with open transactions permitted, defaults to 80.
    #[serde(default = "default_max_concurrent_transactions")]
    pub max_concurrent_transactions: u32,
    /// max_connections is the total maximum number of db connections for one-off queries and transactions, defaults to 100.
    #[serde(default = "default_max_db_connections")]
    pub max_connections: u32,
    /// replicas are other servers that host read-only replicas of this database
    #[serde(default)]
    pub replicas: Vec<BackendServer>,
}

fn default_host() -> String { "localhost".to_string() }
const fn default_max_concurrent_transactions() -> u32 { 80 }
const fn default_max_db_connections() -> u32 { 100 }

impl BackendPoolConfig {
    pub(crate) fn load(&mut self) -> Result<()> {
        for server in &mut self.servers {
            server.load(&self.default, true)?;
        }
        Ok(())
    }
}

impl BackendServer {
    pub(crate) fn load(&mut self, defaults: &BackendServer, is_master: bool) -> Result<()> {
        self.is_master = is_master;
        if self.database.is_empty() {
            self.database = defaults.database.clone();
        }
        if self.host.is_empty() {
            self.host = defaults.host.clone();
        }
        if self.user.is_empty() {
            self.user = defaults.user.clone();
        }
        if self.port == 0 {
            self.port = defaults.port;
        }
        if let TlsMode::Invalid = self.backend_tls {
            self.backend_tls = defaults.backend_tls;
            if let TlsMode::Invalid = self.backend_tls {
                return Err(Error::new("tls mode not set"));
            }
        }
        if self.max_connections == 0 {
            self.max_connections = defaults.max_connections;
            if self.max_connections == 0 {
                return Err(Error::new("max_connections cannot be 0"));
            }
        }
        if self.max_concurrent_transactions == 0 {
            self.max_concurrent_transactions = defaults.max_concurrent_transactions;
            if self.max_concurrent_transactions == 0 {
                self.max_concurrent_transactions = self.max_connections * 4 / 5;
            }
        }
        for replica in &mut self.replicas {
            replica.load(defaults, false)?;
        }
        Ok(())
    }
}
