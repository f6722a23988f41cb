//! Glue between the [`Server`](crate::server::Server) and a [`Worker`].
//!
//! Every inbound request is resolved against the upstream origin and handed
//! to the worker, except two reserved paths:
//!
//! - `POST <control_path>` — body is a JSON [`ControlMessage`]; answers `202`.
//! - `GET <status_path>` — JSON [`WorkerStatus`](crate::lifecycle::WorkerStatus).
//!
//! Proxied responses carry `X-Cache: hit | miss | stale`. Strategy failures
//! become `502` (network), `504` (cache-only miss), or `500` (storage).

use std::sync::Arc;

use tracing::{error, warn};

use crate::config::ServerConfig;
use crate::fetch::FetchRequest;
use crate::http::{Headers, Method, Request, Response, StatusCode, headers::is_hop_by_hop};
use crate::lifecycle::{ControlMessage, Worker};
use crate::strategy::StrategyError;

/// Response header naming where a proxied response came from.
pub const CACHE_HEADER: &str = "X-Cache";

/// Request handler shared by every connection. Cheap to clone.
#[derive(Clone)]
pub struct Proxy {
    worker: Arc<Worker>,
    control_path: Arc<str>,
    status_path: Arc<str>,
}

impl Proxy {
    pub fn new(worker: Arc<Worker>, server: &ServerConfig) -> Self {
        Self {
            worker,
            control_path: server.control_path.as_str().into(),
            status_path: server.status_path.as_str().into(),
        }
    }

    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    /// Answers one inbound request. Never fails; errors become status codes.
    pub async fn respond(&self, request: Request) -> Response {
        if request.path() == &*self.control_path {
            return self.control(&request).await;
        }
        if request.path() == &*self.status_path && *request.method() == Method::Get {
            return self.status().await;
        }

        let upstream = self.upstream_request(&request);
        match self.worker.handle(&upstream).await {
            Ok(outcome) => {
                // Dropping the handle leaves any revalidation running.
                let mut response = outcome.response;
                response.set_header(CACHE_HEADER, outcome.source.as_str());
                response
            }
            Err(err) => {
                warn!(url = upstream.url(), error = %err, "request failed");
                error_response(&err)
            }
        }
    }

    fn upstream_request(&self, request: &Request) -> FetchRequest {
        let url = self.worker.settings().url_for(&request.target());
        let headers: Headers = request
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name) && !name.eq_ignore_ascii_case("host"))
            .collect();
        FetchRequest::new(request.method().clone(), url)
            .with_headers(headers)
            .with_body(request.body().clone())
    }

    async fn control(&self, request: &Request) -> Response {
        if *request.method() != Method::Post {
            return Response::new(StatusCode::MethodNotAllowed)
                .header("Allow", "POST")
                .body("control messages must be POSTed");
        }

        let message: ControlMessage = match serde_json::from_slice(request.body()) {
            Ok(message) => message,
            Err(e) => {
                return Response::new(StatusCode::BadRequest)
                    .body(format!("invalid control message: {e}"));
            }
        };

        match self.worker.handle_control(message).await {
            Ok(()) => Response::new(StatusCode::Accepted),
            Err(e) => {
                error!(?message, error = %e, "control message failed");
                Response::new(StatusCode::InternalServerError).body(e.to_string())
            }
        }
    }

    async fn status(&self) -> Response {
        let body = match self.worker.status().await {
            Ok(status) => serde_json::to_vec(&status),
            Err(e) => {
                return Response::new(StatusCode::InternalServerError).body(e.to_string());
            }
        };
        match body {
            Ok(body) => Response::new(StatusCode::Ok)
                .header("Content-Type", "application/json")
                .body_bytes(body),
            Err(e) => Response::new(StatusCode::InternalServerError).body(e.to_string()),
        }
    }
}

fn error_response(err: &StrategyError) -> Response {
    let status = match err {
        StrategyError::Network(_) => StatusCode::BadGateway,
        StrategyError::NoCachedResponse { .. } => StatusCode::GatewayTimeout,
        StrategyError::Storage(_) => StatusCode::InternalServerError,
    };
    Response::new(status).body(err.to_string())
}
