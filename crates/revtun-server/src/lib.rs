//! Server half of a reverse TCP/UDP tunneling relay: a single long-lived
//! control channel plus a pool of pre-accepted data channels, paired by id.

pub mod config;
pub mod dispatch;
pub mod handshake;
pub mod health;
pub mod pool;
pub mod server;
pub mod stats;
pub mod tls;
pub mod transport;

pub use config::{CliOverrides, ServerConfig};
pub use server::Server;
