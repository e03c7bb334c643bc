//! sshping-core: collection pipeline for the SSH ping exporter.
//!
//! Provides:
//! - `config`: exporter configuration (flags or YAML document) and validation
//! - `device`: resolved devices and their authentication methods
//! - `transport`: remote command channel contract, OpenSSH implementation, mock
//! - `client`: per-device command client with OS-family identification
//! - `collector`: metric collector capability, samples, ICMP probe collector
//! - `registry`: feature key → shared collector mapping per configuration generation
//! - `state`: versioned configuration generations with hot reload
//! - `scrape`: per-request fan-out across devices
//! - `exposition`: Prometheus text encoding of a scrape snapshot

pub mod client;
pub mod collector;
pub mod config;
pub mod device;
pub mod exposition;
pub mod registry;
pub mod scrape;
pub mod state;
pub mod transport;

/// Crate version, shown on the root page and in startup logs.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
