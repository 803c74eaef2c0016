// ABOUTME: Request forwarding to agent containers over raw HTTP/1 connections.
// ABOUTME: Plain requests are relayed; WebSocket upgrades become a byte tunnel.

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{CONNECTION, UPGRADE};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;

const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

/// The body type every proxy response is normalized to.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// An owned body from local bytes.
pub fn full_body(bytes: impl Into<Bytes>) -> ProxyBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed()
}

pub fn empty_body() -> ProxyBody {
    full_body(Bytes::new())
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream connect failed: {0}")]
    Connect(std::io::Error),

    #[error("upstream handshake failed: {0}")]
    Handshake(hyper::Error),

    #[error("upstream request failed: {0}")]
    Request(hyper::Error),

    #[error("upstream timed out")]
    Timeout,
}

/// Whether this request asks for a WebSocket upgrade.
pub fn is_websocket_upgrade<B>(req: &Request<B>) -> bool {
    let connection_upgrade = req
        .headers()
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("upgrade"));
    let upgrade_websocket = req
        .headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    connection_upgrade && upgrade_websocket
}

async fn open_upstream(
    port: u16,
) -> Result<
    (
        hyper::client::conn::http1::SendRequest<Full<Bytes>>,
        hyper::client::conn::http1::Connection<TokioIo<TcpStream>, Full<Bytes>>,
    ),
    ForwardError,
> {
    let stream = timeout(FORWARD_TIMEOUT, TcpStream::connect(("127.0.0.1", port)))
        .await
        .map_err(|_| ForwardError::Timeout)?
        .map_err(ForwardError::Connect)?;
    hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(ForwardError::Handshake)
}

fn rebuild_request(
    parts: &hyper::http::request::Parts,
    body: Bytes,
) -> Request<Full<Bytes>> {
    let mut out = Request::new(Full::new(body));
    *out.method_mut() = parts.method.clone();
    *out.uri_mut() = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .parse()
        .unwrap_or_default();
    *out.headers_mut() = parts.headers.clone();
    out
}

/// Relay a plain HTTP request to `127.0.0.1:port`, preserving method, path,
/// headers, and body. The response body streams back through the spawned
/// connection task.
pub async fn forward_http(
    req: Request<Incoming>,
    port: u16,
) -> Result<Response<ProxyBody>, ForwardError> {
    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map_err(ForwardError::Request)?
        .to_bytes();

    let (mut sender, conn) = open_upstream(port).await?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(error = %e, "upstream connection closed with error");
        }
    });

    let response = timeout(
        FORWARD_TIMEOUT,
        sender.send_request(rebuild_request(&parts, body)),
    )
    .await
    .map_err(|_| ForwardError::Timeout)?
    .map_err(ForwardError::Request)?;

    Ok(response.map(BodyExt::boxed))
}

/// Relay a WebSocket upgrade. The 101 response is returned to the client and
/// a background task splices bytes between the two upgraded connections.
pub async fn forward_websocket(
    mut req: Request<Incoming>,
    port: u16,
) -> Result<Response<ProxyBody>, ForwardError> {
    let client_upgrade = hyper::upgrade::on(&mut req);
    let (parts, _body) = req.into_parts();

    let (mut sender, conn) = open_upstream(port).await?;
    tokio::spawn(async move {
        // with_upgrades keeps the connection alive past the 101 response.
        if let Err(e) = conn.with_upgrades().await {
            tracing::debug!(error = %e, "upstream websocket connection closed with error");
        }
    });

    let mut response = timeout(
        FORWARD_TIMEOUT,
        sender.send_request(rebuild_request(&parts, Bytes::new())),
    )
    .await
    .map_err(|_| ForwardError::Timeout)?
    .map_err(ForwardError::Request)?;

    if response.status() == StatusCode::SWITCHING_PROTOCOLS {
        let upstream_upgrade = hyper::upgrade::on(&mut response);
        tokio::spawn(async move {
            match tokio::try_join!(client_upgrade, upstream_upgrade) {
                Ok((client, upstream)) => {
                    let mut client = TokioIo::new(client);
                    let mut upstream = TokioIo::new(upstream);
                    if let Err(e) =
                        tokio::io::copy_bidirectional(&mut client, &mut upstream).await
                    {
                        tracing::debug!(error = %e, "websocket tunnel closed with error");
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "websocket upgrade failed");
                }
            }
        });
    }

    Ok(response.map(BodyExt::boxed))
}
