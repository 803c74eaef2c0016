// ABOUTME: The reverse proxy: subdomain routing, idle-touch, auto-wake, forwarding.
// ABOUTME: HTTP requests relay to the agent's host port; WebSockets tunnel bytes.

mod cache;
mod forward;
mod host;
mod wake;

pub use cache::{CachedRoute, RouteCache, TouchThrottle};
pub use forward::{ProxyBody, forward_http, forward_websocket, full_body, is_websocket_upgrade};
pub use host::{extract_subdomain, tenant_subdomain};
pub use wake::WakeCoordinator;

use chrono::Utc;
use hyper::body::Incoming;
use hyper::header::{CONNECTION, CONTENT_TYPE, HOST};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::error::{ErrorCode, error_envelope};
use crate::model::{DeploymentPatch, DeploymentStatus};
use crate::store::DeploymentStore;
use crate::types::{DeploymentId, Subdomain};

/// Tenant-facing reverse proxy.
///
/// The cache and throttle maps are process-local; with multiple instances
/// each holds its own slightly stale view, bounded by the short TTLs. There
/// is deliberately no cross-node invalidation.
pub struct Proxy {
    store: Arc<dyn DeploymentStore>,
    cache: Arc<RouteCache>,
    throttle: TouchThrottle,
    wake: Arc<WakeCoordinator>,
}

impl Proxy {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        cache: Arc<RouteCache>,
        throttle: TouchThrottle,
        wake: Arc<WakeCoordinator>,
    ) -> Self {
        Self {
            store,
            cache,
            throttle,
            wake,
        }
    }

    /// Accept loop. Each connection is served with upgrade support so
    /// WebSocket tunnels survive past the 101 response.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let proxy = Arc::clone(&self);
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let proxy = Arc::clone(&proxy);
                    async move { Ok::<_, Infallible>(proxy.handle(req).await) }
                });
                let result = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .with_upgrades()
                    .await;
                if let Err(e) = result {
                    tracing::debug!(%peer, error = %e, "connection ended with error");
                }
            });
        }
    }

    pub async fn handle(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        let host = req
            .headers()
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default();

        let Some(subdomain) = tenant_subdomain(host).map(str::to_string) else {
            return fallback();
        };

        // Platform API routes ride the tenant host but are not proxied.
        if req.uri().path().starts_with("/api") {
            return fallback();
        }

        let websocket = is_websocket_upgrade(&req);

        let route = match self.resolve(&subdomain).await {
            Ok(Some(route)) => route,
            Ok(None) => {
                return if websocket {
                    close_socket()
                } else {
                    envelope_response(ErrorCode::DeploymentNotFound, "no deployment for this subdomain")
                };
            }
            Err(message) => {
                tracing::error!(subdomain, error = %message, "route resolution failed");
                return envelope_response(ErrorCode::Internal, "route resolution failed");
            }
        };

        match route.status {
            DeploymentStatus::Healthy => match route.port {
                Some(port) => {
                    self.touch(&subdomain, &route.deployment_id);
                    self.forward(req, port, websocket).await
                }
                None => envelope_response(ErrorCode::AgentNotReady, "agent port not yet published"),
            },
            DeploymentStatus::Stopped | DeploymentStatus::Error if !websocket => {
                self.wake_and_forward(req, &subdomain).await
            }
            status if websocket => {
                tracing::debug!(subdomain, %status, "rejecting websocket to non-healthy agent");
                close_socket()
            }
            status => envelope_response(ErrorCode::AgentNotReady, status_message(status)),
        }
    }

    async fn wake_and_forward(
        &self,
        req: Request<Incoming>,
        subdomain: &str,
    ) -> Response<ProxyBody> {
        let Ok(parsed) = Subdomain::new(subdomain) else {
            return envelope_response(ErrorCode::DeploymentNotFound, "invalid subdomain");
        };

        if !self.wake.wake(&parsed).await {
            return envelope_response(ErrorCode::AgentWaking, "agent is waking up, retry shortly");
        }

        match self.resolve(subdomain).await {
            Ok(Some(route)) if route.status == DeploymentStatus::Healthy => match route.port {
                Some(port) => {
                    self.touch(subdomain, &route.deployment_id);
                    self.forward(req, port, false).await
                }
                None => envelope_response(ErrorCode::AgentWaking, "agent is waking up, retry shortly"),
            },
            _ => envelope_response(ErrorCode::AgentWaking, "agent is waking up, retry shortly"),
        }
    }

    async fn forward(
        &self,
        req: Request<Incoming>,
        port: u16,
        websocket: bool,
    ) -> Response<ProxyBody> {
        let result = if websocket {
            forward_websocket(req, port).await
        } else {
            forward_http(req, port).await
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(port, error = %e, "upstream forward failed");
                if websocket {
                    close_socket()
                } else {
                    envelope_response(ErrorCode::ProxyError, "agent connection failed")
                }
            }
        }
    }

    /// Cache-first route lookup; misses consult the store and repopulate the
    /// cache, non-healthy statuses included.
    async fn resolve(&self, subdomain: &str) -> Result<Option<CachedRoute>, String> {
        if let Some(route) = self.cache.get(subdomain) {
            return Ok(Some(route));
        }

        let Ok(parsed) = Subdomain::new(subdomain) else {
            return Ok(None);
        };

        match self.store.find_by_subdomain(&parsed).await {
            Ok(Some(d)) => {
                self.cache
                    .put(subdomain, d.id.clone(), d.status, d.internal_port);
                // Entry was just written with a fresh stamp; read it back.
                Ok(self.cache.get(subdomain))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Throttled `last_request_at` update. Fire-and-forget: the write is
    /// conditional on the deployment still being healthy and never blocks
    /// the request.
    fn touch(&self, subdomain: &str, id: &DeploymentId) {
        if !self.throttle.should_touch(subdomain) {
            return;
        }

        let store = Arc::clone(&self.store);
        let id = id.clone();
        let subdomain = subdomain.to_string();
        tokio::spawn(async move {
            let mut patch = DeploymentPatch::default();
            patch.last_request_at = Some(Utc::now());
            if let Err(e) = store
                .update(&id, patch, Some(DeploymentStatus::Healthy))
                .await
            {
                tracing::debug!(subdomain, error = %e, "touch write failed");
            }
        });
    }
}

fn status_message(status: DeploymentStatus) -> &'static str {
    match status {
        DeploymentStatus::Idle => "agent is idle; start it from the dashboard",
        DeploymentStatus::Configuring => "agent is being configured",
        DeploymentStatus::Provisioning => "agent is being provisioned",
        DeploymentStatus::Starting => "agent is starting",
        DeploymentStatus::Restarting => "agent is restarting",
        DeploymentStatus::Stopped => "agent is stopped",
        DeploymentStatus::Error => "agent is in an error state",
        DeploymentStatus::Healthy => "agent is ready",
    }
}

fn envelope_response(code: ErrorCode, message: &str) -> Response<ProxyBody> {
    let body = error_envelope(code, message).to_string();
    Response::builder()
        .status(code.http_status())
        .header(CONTENT_TYPE, "application/json")
        .body(full_body(body))
        .expect("static response build")
}

/// The slot where a platform API router would mount; the core has none, so
/// undeliverable requests get the plain envelope.
fn fallback() -> Response<ProxyBody> {
    let body = serde_json::json!({
        "success": false,
        "error": { "code": "NOT_FOUND", "message": "no handler for this route" }
    })
    .to_string();
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header(CONTENT_TYPE, "application/json")
        .body(full_body(body))
        .expect("static response build")
}

/// Refuse a WebSocket upgrade; without a completed upgrade the connection
/// closes as soon as this response is written.
fn close_socket() -> Response<ProxyBody> {
    Response::builder()
        .status(StatusCode::SERVICE_UNAVAILABLE)
        .header(CONNECTION, "close")
        .body(forward::empty_body())
        .expect("static response build")
}
