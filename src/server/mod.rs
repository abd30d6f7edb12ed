// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP listeners.
//!
//! A thin wrapper around **hyper-util**: it owns a listening socket and
//! translates between hyper's body types and [`ProxyRequest`] /
//! [`ProxyResponse`]. The emulator runs two of them, one in front of the
//! dispatcher and one for the auth routes.
//!
//! `hyper_util::server::conn::auto::Builder` serves HTTP/1.1 and HTTP/2 on
//! the same connection. Bodies are streamed in both directions.

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use reqwest::Body;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{Notify, watch};
use tokio::task::JoinSet;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use crate::core::{ProxyCore, ProxyError, ProxyRequest, ProxyResponse, RequestContext};
use crate::logging::structured::RequestInfo;
use crate::{debug_fmt, error_fmt, info_fmt, trace_fmt, warn_fmt};

/// How long open connections may take to finish after shutdown starts.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Anything a listener can hand requests to.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError>;
}

#[async_trait]
impl RequestHandler for ProxyCore {
    async fn handle(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        self.process_request(request).await
    }
}

/// One HTTP listener.
#[derive(Clone)]
pub struct ProxyServer {
    name: String,
    host: String,
    port: u16,
    handler: Arc<dyn RequestHandler>,
    shutdown: Arc<Notify>,
}

impl std::fmt::Debug for ProxyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyServer")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

impl ProxyServer {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        handler: Arc<dyn RequestHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            handler,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wakes a running [`serve`](Self::serve) loop, which then drains and returns.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ProxyError> {
        let addr = format!("{}:{}", self.host, self.port)
            .parse::<SocketAddr>()
            .map_err(|e| ProxyError::Other(format!("Invalid server address: {e}")))?;

        TcpListener::bind(addr)
            .await
            .map_err(|e| ProxyError::Other(format!("Failed to bind {addr}: {e}")))
    }

    /// Bind and serve until Ctrl-C, SIGTERM or [`shutdown`](Self::shutdown).
    pub async fn start(&self) -> Result<(), ProxyError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ProxyError> {
        let local_addr = listener.local_addr()?;
        info_fmt!(&self.name, "Listening on http://{}", local_addr);

        let ctrl_c = signal::ctrl_c();

        #[cfg(unix)]
        let mut term_stream = signal(SignalKind::terminate())
            .map_err(|e| ProxyError::Other(format!("Cannot install SIGTERM handler: {e}")))?;
        #[cfg(unix)]
        let sigterm = term_stream.recv();
        #[cfg(not(unix))]
        let sigterm = std::future::pending::<Option<()>>();

        let shutdown = self.shutdown.notified();

        tokio::pin!(ctrl_c);
        tokio::pin!(sigterm);
        tokio::pin!(shutdown);

        // Flipped to true once; every connection task watches it.
        let (close_tx, close_rx) = watch::channel(false);
        let mut join_set = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info_fmt!(&self.name, "Received Ctrl-C; initiating graceful shutdown");
                    break;
                }
                _ = &mut sigterm => {
                    info_fmt!(&self.name, "Received SIGTERM; initiating graceful shutdown");
                    break;
                }
                _ = &mut shutdown => {
                    info_fmt!(&self.name, "Shutdown requested");
                    break;
                }
                accept = listener.accept() => {
                    match accept {
                        Ok((stream, remote_addr)) => {
                            let handler = self.handler.clone();
                            let name = self.name.clone();
                            let close_rx = close_rx.clone();
                            join_set.spawn(serve_connection(
                                stream,
                                remote_addr,
                                handler,
                                name,
                                close_rx,
                            ));
                        }
                        Err(e) => error_fmt!(&self.name, "Accept error: {}", e),
                    }
                }
            }
        }

        drop(listener);
        info_fmt!(&self.name, "Shutting down; waiting for {} connection(s)", join_set.len());
        let _ = close_tx.send(true);

        let drain_start = Instant::now();
        let drain = async {
            while let Some(res) = join_set.join_next().await {
                if let Err(e) = res {
                    if !e.is_cancelled() {
                        error_fmt!(&self.name, "Connection task failed: {}", e);
                    }
                }
            }
        };

        match tokio::time::timeout(DRAIN_TIMEOUT, drain).await {
            Ok(()) => info_fmt!(
                &self.name,
                "All connections drained in {:.1}s",
                drain_start.elapsed().as_secs_f32()
            ),
            Err(_) => {
                warn_fmt!(
                    &self.name,
                    "Shutdown timed out after {}s; closing remaining connections",
                    DRAIN_TIMEOUT.as_secs()
                );
                join_set.shutdown().await;
            }
        }

        Ok(())
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    remote_addr: SocketAddr,
    handler: Arc<dyn RequestHandler>,
    name: String,
    mut close_rx: watch::Receiver<bool>,
) {
    let client_ip = remote_addr.ip().to_string();
    let service_name = name.clone();
    let service = service_fn(move |req: Request<Incoming>| {
        handle_request(
            req,
            handler.clone(),
            client_ip.clone(),
            service_name.clone(),
        )
    });

    let builder = AutoBuilder::new(TokioExecutor::new());
    let connection = builder.serve_connection(TokioIo::new(stream), service);
    let mut conn = std::pin::pin!(connection);

    tokio::select! {
        res = &mut conn => log_connection_end(&name, res),
        _ = close_rx.changed() => {
            trace_fmt!(&name, "Closing connection from {} gracefully", remote_addr);
            conn.as_mut().graceful_shutdown();
            log_connection_end(&name, conn.await);
        }
    }
}

fn log_connection_end(
    name: &str,
    res: Result<(), Box<dyn std::error::Error + Send + Sync>>,
) {
    match res {
        Ok(()) => trace_fmt!(name, "Connection closed"),
        Err(e) => {
            let message = e.to_string();
            if !message.contains("connection closed") && !message.contains("connection reset") {
                error_fmt!(name, "Connection error: {}", e);
            }
        }
    }
}

/// Convert a hyper request into a [`ProxyRequest`], streaming the body.
pub fn convert_hyper_request(req: Request<Incoming>, client_ip: String) -> ProxyRequest {
    let (parts, body) = req.into_parts();
    let url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let info = RequestInfo::new(parts.method.to_string(), url, client_ip);

    let mut request = ProxyRequest::new(parts.method, &info.url);
    request.headers = parts.headers;
    request.body = Body::wrap_stream(body.into_data_stream().map_ok(Bytes::from));
    request.context = RequestContext {
        request_id: info.request_id,
        client_ip: Some(info.remote_addr),
        start_time: Instant::now(),
    };
    request
}

/// Convert a [`ProxyResponse`] into a hyper response.
pub fn convert_proxy_response(resp: ProxyResponse) -> Result<Response<Body>, ProxyError> {
    let status = StatusCode::from_u16(resp.status)
        .map_err(|e| ProxyError::Other(format!("Invalid status {}: {e}", resp.status)))?;

    let mut response = Response::new(resp.body);
    *response.status_mut() = status;
    *response.headers_mut() = resp.headers;
    Ok(response)
}

/// Plain-text response for a request that could not be answered.
pub fn error_response(error: &ProxyError) -> Response<Body> {
    let (status, message) = match error {
        ProxyError::Timeout(d) => (StatusCode::GATEWAY_TIMEOUT, format!("Gateway Timeout after {d:?}")),
        ProxyError::ClientError(_) => (StatusCode::BAD_GATEWAY, "Bad Gateway".to_string()),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error".to_string(),
        ),
    };

    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}

async fn handle_request(
    req: Request<Incoming>,
    handler: Arc<dyn RequestHandler>,
    client_ip: String,
    name: String,
) -> Result<Response<Body>, Infallible> {
    let request = convert_hyper_request(req, client_ip);
    let method = request.method.clone();
    let url = request.url();
    let request_id = request.context.request_id.clone();
    let started = request.context.start_time;

    let response = match handler.handle(request).await {
        Ok(resp) => match convert_proxy_response(resp) {
            Ok(resp) => resp,
            Err(e) => {
                error_fmt!(&name, "Failed to convert response for {} {}: {}", method, url, e);
                error_response(&e)
            }
        },
        Err(e) => {
            match &e {
                ProxyError::Timeout(d) => {
                    warn_fmt!(&name, "{} {} timed out after {:?}", method, url, d)
                }
                ProxyError::ClientError(err) => {
                    error_fmt!(&name, "Upstream error for {} {}: {}", method, url, err)
                }
                _ => error_fmt!(&name, "Internal error processing {} {}: {}", method, url, e),
            }
            error_response(&e)
        }
    };

    debug_fmt!(
        &name,
        "{} {} -> {} ({} ms, id {})",
        method,
        url,
        response.status().as_u16(),
        started.elapsed().as_millis(),
        request_id
    );
    Ok(response)
}
