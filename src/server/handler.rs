// src/server/handler.rs
use crate::backend::Registry;
use crate::metrics::MetricsRegistry;
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::sync::Arc;
use tower::Service;

/// Admin endpoints: metrics exposition, liveness, readiness, version and a
/// JSON view of every backend.
#[derive(Clone)]
pub struct AdminHandler {
    registry: Arc<Registry>,
    metrics: Arc<MetricsRegistry>,
    metrics_path: Arc<str>,
}

impl AdminHandler {
    pub fn new(registry: Arc<Registry>, metrics: Arc<MetricsRegistry>, metrics_path: &str) -> Self {
        Self {
            registry,
            metrics,
            metrics_path: Arc::from(metrics_path),
        }
    }

    async fn route(&self, req: Request<Body>) -> Response<Body> {
        if req.method() != Method::GET {
            return text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        }

        let path = req.uri().path();
        if path == &*self.metrics_path {
            return match self.metrics.gather() {
                Ok(body) => respond(StatusCode::OK, "text/plain; version=0.0.4", body),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode metrics");
                    text(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
                }
            };
        }

        match path {
            "/healthz" => text(StatusCode::OK, "ok"),
            "/readyz" => {
                let healthy = self.registry.healthy_count().await;
                if healthy > 0 {
                    text(StatusCode::OK, &format!("ready: {} healthy backends", healthy))
                } else {
                    text(StatusCode::SERVICE_UNAVAILABLE, "no healthy backends")
                }
            }
            "/version" => text(StatusCode::OK, env!("CARGO_PKG_VERSION")),
            "/node-states" => match serde_json::to_vec(&self.registry.snapshot().await) {
                Ok(body) => respond(StatusCode::OK, "application/json", body),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize node states");
                    text(StatusCode::INTERNAL_SERVER_ERROR, "node states unavailable")
                }
            },
            _ => text(StatusCode::NOT_FOUND, "Not Found"),
        }
    }
}

fn respond(status: StatusCode, content_type: &'static str, body: Vec<u8>) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static(content_type));
    response
}

fn text(status: StatusCode, body: &str) -> Response<Body> {
    respond(status, "text/plain; charset=utf-8", body.as_bytes().to_vec())
}

impl Service<Request<Body>> for AdminHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let handler = self.clone();
        Box::pin(async move { Ok(handler.route(req).await) })
    }
}
