// src/proxy/copy.rs
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const BUFFER_SIZE: usize = 16 * 1024;

/// Bytes moved in each direction for one proxied connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    /// Client to backend.
    pub sent: u64,
    /// Backend to client.
    pub received: u64,
    /// Both directions reached end-of-stream without an I/O error.
    pub clean: bool,
}

impl Transfer {
    pub fn total(&self) -> u64 {
        self.sent + self.received
    }
}

/// Copy `reader` into `writer` until end-of-stream, then half-close `writer`.
///
/// `count` is updated as bytes are written so the total survives the future
/// being dropped mid-copy.
async fn copy_half<R, W>(
    reader: &mut R,
    writer: &mut W,
    idle_timeout: Option<Duration>,
    count: &mut u64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        let read = match idle_timeout {
            Some(limit) => tokio::time::timeout(limit, reader.read(&mut buf))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "idle timeout"))?,
            None => reader.read(&mut buf).await,
        }?;

        if read == 0 {
            break;
        }

        writer.write_all(&buf[..read]).await?;
        *count += read as u64;
    }

    writer.shutdown().await
}

/// Pump bytes between `client` and `backend` until both directions finish.
///
/// A clean end-of-stream on one side half-closes the other so the peer sees
/// it; an error in either direction abandons both, and the caller's drop of
/// the streams closes the sockets. `idle_timeout` bounds every read in both
/// directions, so a peer that goes silent after the other side finished still
/// releases the connection.
pub async fn pump(
    client: &mut TcpStream,
    backend: &mut TcpStream,
    idle_timeout: Option<Duration>,
) -> Transfer {
    let (mut client_read, mut client_write) = client.split();
    let (mut backend_read, mut backend_write) = backend.split();

    let mut sent = 0u64;
    let mut received = 0u64;

    let clean = {
        let upstream = copy_half(&mut client_read, &mut backend_write, idle_timeout, &mut sent);
        let downstream =
            copy_half(&mut backend_read, &mut client_write, idle_timeout, &mut received);
        tokio::pin!(upstream);
        tokio::pin!(downstream);

        tokio::select! {
            result = &mut upstream => match result {
                Ok(()) => finish("backend to client", downstream.await),
                Err(e) => finish("client to backend", Err(e)),
            },
            result = &mut downstream => match result {
                Ok(()) => finish("client to backend", upstream.await),
                Err(e) => finish("backend to client", Err(e)),
            },
        }
    };

    Transfer {
        sent,
        received,
        clean,
    }
}

fn finish(direction: &'static str, result: io::Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::TimedOut => {
            debug!(direction, "Connection idle, closing");
            false
        }
        Err(e) => {
            debug!(direction, error = %e, "Copy failed, closing connection");
            false
        }
    }
}
