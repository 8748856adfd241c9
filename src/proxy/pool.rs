// src/proxy/pool.rs
use crate::config::PoolConfig;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

struct IdleConnection {
    stream: TcpStream,
    idle_since: Instant,
}

/// Idle outbound connections, keyed by backend socket address.
///
/// Bounded per address; entries expire after `idle_ttl` and every checkout
/// and release checks that the peer has not closed or written unprompted.
pub struct ConnectionPool {
    idle: DashMap<SocketAddr, VecDeque<IdleConnection>>,
    max_idle_per_backend: usize,
    idle_ttl: Duration,
    warm_connections: usize,
}

impl ConnectionPool {
    pub fn new(max_idle_per_backend: usize, idle_ttl: Duration, warm_connections: usize) -> Self {
        Self {
            idle: DashMap::new(),
            max_idle_per_backend,
            idle_ttl,
            warm_connections: warm_connections.min(max_idle_per_backend),
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(
            config.max_idle_per_backend,
            config.idle_ttl(),
            config.warm_connections,
        )
    }

    pub fn idle_count(&self, addr: SocketAddr) -> usize {
        self.idle.get(&addr).map(|queue| queue.len()).unwrap_or(0)
    }

    /// Pop the oldest usable idle connection for `addr`, discarding any that
    /// expired or whose peer went away.
    pub fn acquire(&self, addr: SocketAddr) -> Option<TcpStream> {
        let mut queue = self.idle.get_mut(&addr)?;
        while let Some(entry) = queue.pop_front() {
            if entry.idle_since.elapsed() >= self.idle_ttl {
                debug!(backend = %addr, "Dropping expired idle connection");
                continue;
            }
            if !is_reusable(&entry.stream) {
                debug!(backend = %addr, "Dropping closed idle connection");
                continue;
            }
            return Some(entry.stream);
        }
        None
    }

    /// Hand a connection back. Returns `false` if it was dropped instead.
    pub fn release(&self, addr: SocketAddr, stream: TcpStream) -> bool {
        if !is_reusable(&stream) {
            return false;
        }

        let mut queue = self.idle.entry(addr).or_default();
        if queue.len() >= self.max_idle_per_backend {
            return false;
        }
        queue.push_back(IdleConnection {
            stream,
            idle_since: Instant::now(),
        });
        true
    }

    /// Dial until `addr` holds the configured number of warm spares.
    pub async fn replenish(&self, addr: SocketAddr, connect_timeout: Duration) -> io::Result<usize> {
        let mut added = 0;
        while self.idle_count(addr) < self.warm_connections {
            let stream = dial(addr, connect_timeout).await?;
            if !self.release(addr, stream) {
                break;
            }
            added += 1;
        }
        if added > 0 {
            debug!(backend = %addr, added, "Replenished idle pool");
        }
        Ok(added)
    }
}

/// Dial `addr`, failing with `TimedOut` after `connect_timeout`.
pub async fn dial(addr: SocketAddr, connect_timeout: Duration) -> io::Result<TcpStream> {
    let stream = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timeout"))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// A pooled connection is reusable only while a non-blocking read would block:
/// end-of-stream means the peer closed, and unsolicited data would be
/// misdelivered to the next client.
fn is_reusable(stream: &TcpStream) -> bool {
    let mut probe = [0u8; 1];
    match stream.try_read(&mut probe) {
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
        _ => false,
    }
}
