pub mod config;
pub mod common;
pub mod worker;
pub mod server;
pub mod auth;
pub mod frontend;
pub mod pg;
pub mod binary;
pub mod pgview;
pub mod pgfrontend;
pub mod paramremap;
pub mod preparedstmt;
pub mod http;
pub mod pool;
pub mod demux;

pub use common::{Error, Result, coarse_monotonic_now};
