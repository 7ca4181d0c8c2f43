//! HTTP status surface
//!
//! Serves scan state over plain HTTP/1.1:
//!
//! - `POST /scans` starts a scan from a JSON [`ScanRequest`]
//! - `GET /scans/latest` and `GET /scans/{id}` return a session snapshot
//! - `GET /scans/{id}/logs` returns the session log lines
//! - `GET /scans/{id}/events` streams the snapshot and every later delta as
//!   newline-delimited JSON until the scan finishes
//! - `POST /scans/{id}/cancel` requests cancellation

use std::convert::Infallible;
use std::net::SocketAddr;

use futures::StreamExt;
use http_body_util::{BodyExt, Full, StreamBody, combinators::UnsyncBoxBody};
use hyper::body::{Bytes, Frame};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::agents::ScanRequest;
use crate::scheduler::Scheduler;
use crate::{Error, Result};

type Body = UnsyncBoxBody<Bytes, Infallible>;

/// HTTP server exposing a [`Scheduler`]
pub struct StatusServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    _task: JoinHandle<()>,
}

impl StatusServer {
    /// Bind to `addr` and serve in a background task.
    ///
    /// Port 0 picks a free port; see [`local_addr`](Self::local_addr).
    pub async fn start(scheduler: Scheduler, addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        debug!("Status server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            Self::accept_loop(listener, scheduler, shutdown_rx).await;
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            _task: task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL of the running server (e.g. `http://127.0.0.1:8000`)
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting connections
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    async fn accept_loop(
        listener: TcpListener,
        scheduler: Scheduler,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            debug!("Status connection from {}", peer);
                            let scheduler = scheduler.clone();
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let scheduler = scheduler.clone();
                                    async move { Ok::<_, Infallible>(route(scheduler, req).await) }
                                });
                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!("Status connection ended: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Status server accept error: {}", e);
                        }
                    }
                }
                _ = &mut shutdown_rx => {
                    debug!("Status server shutting down");
                    break;
                }
            }
        }
    }
}

fn full(bytes: impl Into<Bytes>) -> Body {
    Full::new(bytes.into()).boxed_unsync()
}

fn respond(status: StatusCode, content_type: &str, body: Body) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("Content-Type", content_type)
        .body(body)
        .unwrap_or_else(|_| {
            warn!("Failed to build HTTP response, returning empty 500");
            let mut resp = Response::new(full(Bytes::new()));
            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            resp
        })
}

fn json_response(status: StatusCode, body: &impl serde::Serialize) -> Response<Body> {
    match serde_json::to_vec(body) {
        Ok(bytes) => respond(status, "application/json", full(bytes)),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    let bytes = serde_json::to_vec(&json!({ "error": message })).unwrap_or_default();
    respond(status, "application/json", full(bytes))
}

fn from_error(err: &Error) -> Response<Body> {
    let status = match err {
        Error::SessionNotFound(_) => StatusCode::NOT_FOUND,
        Error::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, &err.to_string())
}

/// Stream a session as NDJSON: snapshot first, then deltas
fn event_stream(scheduler: &Scheduler, scan_id: &str) -> Response<Body> {
    let subscription = match scheduler.subscribe(scan_id) {
        Ok(subscription) => subscription,
        Err(e) => return from_error(&e),
    };
    let frames = subscription.into_stream().filter_map(|event| async move {
        match serde_json::to_vec(&event) {
            Ok(mut line) => {
                line.push(b'\n');
                Some(Ok::<_, Infallible>(Frame::data(Bytes::from(line))))
            }
            Err(e) => {
                warn!("Failed to encode session event: {}", e);
                None
            }
        }
    });
    respond(
        StatusCode::OK,
        "application/x-ndjson",
        StreamBody::new(frames).boxed_unsync(),
    )
}

async fn start_scan(scheduler: &Scheduler, req: Request<hyper::body::Incoming>) -> Response<Body> {
    let body = match req.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    let request: ScanRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("invalid scan request: {}", e));
        }
    };
    match scheduler.start_scan(request) {
        Ok(session) => json_response(StatusCode::ACCEPTED, &session),
        Err(e) => from_error(&e),
    }
}

async fn route(scheduler: Scheduler, req: Request<hyper::body::Incoming>) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().trim_end_matches('/').to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (&method, segments.as_slice()) {
        (&Method::POST, ["scans"]) => start_scan(&scheduler, req).await,
        (&Method::GET, ["scans", "latest"]) => match scheduler.latest() {
            Ok(Some(session)) => json_response(StatusCode::OK, &session),
            Ok(None) => error_response(StatusCode::NOT_FOUND, "no scans yet"),
            Err(e) => from_error(&e),
        },
        (&Method::GET, ["scans", id]) => match scheduler.status(id) {
            Ok(session) => json_response(StatusCode::OK, &session),
            Err(e) => from_error(&e),
        },
        (&Method::GET, ["scans", id, "logs"]) => match scheduler.status(id) {
            Ok(session) => json_response(
                StatusCode::OK,
                &json!({ "scan_id": session.scan_id, "logs": session.logs }),
            ),
            Err(e) => from_error(&e),
        },
        (&Method::GET, ["scans", id, "events"]) => event_stream(&scheduler, id),
        (&Method::POST, ["scans", id, "cancel"]) => match scheduler.cancel(id) {
            Ok(cancelled) => json_response(
                StatusCode::OK,
                &json!({ "scan_id": id, "cancelled": cancelled }),
            ),
            Err(e) => from_error(&e),
        },
        (_, ["scans", ..]) => error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
        _ => error_response(StatusCode::NOT_FOUND, "not found"),
    }
}
