//
// src/proxy/mod.rs
//
mod copy;
mod pool;
mod proxy;

pub use copy::{pump, Transfer};
pub use pool::{dial, ConnectionPool};
pub use proxy::{ConnectionReport, ListenerSettings, ProxyError, ProxyStats, TcpProxy};
