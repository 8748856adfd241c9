//! demos/test_backend.rs
//! Simulates one cluster node: a TCP echo service on the data port and an
//! HTTP `/healthz` endpoint on the health port.
//!
//! Run: cargo run --example test_backend -- <bind-ip> [data-port] [health-port] [name]
//!
//! Several instances can share ports on Linux by binding 127.0.0.2, 127.0.0.3
//! and so on. Set `FLAP_SECS` to toggle health periodically.

use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    time::sleep,
};

#[derive(Clone)]
struct NodeState {
    name: String,
    connections: Arc<AtomicU64>,
    healthy: Arc<AtomicBool>,
}

async fn health(req: Request<Body>, state: NodeState) -> Result<Response<Body>, Infallible> {
    let (status, body) = match req.uri().path() {
        "/healthz" if state.healthy.load(Ordering::SeqCst) => (StatusCode::OK, "ok"),
        "/healthz" => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
        _ => (StatusCode::NOT_FOUND, "not found"),
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    Ok(response)
}

async fn echo(mut stream: TcpStream, peer: SocketAddr, state: NodeState) -> std::io::Result<()> {
    let n = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    println!("[{}] connection #{} from {}", state.name, n, peer);

    let (mut reader, mut writer) = stream.split();
    writer
        .write_all(format!("{} connection {}\n", state.name, n).as_bytes())
        .await?;
    let echoed = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.shutdown().await?;

    println!("[{}] connection #{} closed after {} bytes", state.name, n, echoed);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let ip: IpAddr = args.next().unwrap_or_else(|| "127.0.0.2".into()).parse()?;
    let data_port: u16 = args.next().unwrap_or_else(|| "8080".into()).parse()?;
    let health_port: u16 = args.next().unwrap_or_else(|| "8081".into()).parse()?;
    let name = args
        .next()
        .or_else(|| std::env::var("NODE_NAME").ok())
        .unwrap_or_else(|| format!("node-{}", ip));
    let flap_secs: u64 = std::env::var("FLAP_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let state = NodeState {
        name: name.clone(),
        connections: Arc::new(AtomicU64::new(0)),
        healthy: Arc::new(AtomicBool::new(true)),
    };

    if flap_secs > 0 {
        let st = state.clone();
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_secs(flap_secs)).await;
                let was = st.healthy.fetch_xor(true, Ordering::SeqCst);
                println!(
                    "[{}] health flipped to {}",
                    st.name,
                    if was { "unhealthy" } else { "healthy" }
                );
            }
        });
    }

    let data_addr = SocketAddr::new(ip, data_port);
    let listener = TcpListener::bind(data_addr).await?;
    {
        let st = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                let st = st.clone();
                tokio::spawn(async move {
                    if let Err(e) = echo(stream, peer, st.clone()).await {
                        println!("[{}] connection from {} failed: {}", st.name, peer, e);
                    }
                });
            }
        });
    }

    let health_addr = SocketAddr::new(ip, health_port);
    let make_svc = make_service_fn(move |_conn| {
        let st = state.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| health(req, st.clone()))) }
    });

    println!(
        "Node '{}' echoing on {} with health on http://{}/healthz",
        name, data_addr, health_addr
    );

    Server::try_bind(&health_addr)?.serve(make_svc).await?;
    Ok(())
}
