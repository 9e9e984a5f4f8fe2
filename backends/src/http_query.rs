//! Retrying HTTP client over the interchangeable servers of one replica
//! group.
//!
//! One query picks a server round-robin, takes a limiter slot, performs a
//! single GET round-trip, and retries on the next server until the group is
//! exhausted. A 404 is an authoritative answer and stops the retry loop.

use std::sync::atomic::{AtomicU64, Ordering};

use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::errors::BackendError;
use crate::limiter::ServerLimiter;
use crate::metrics_defs::{BACKEND_REQUESTS, BACKEND_RETRIES};
use crate::types::{API_REQUEST_HEADER, RequestContext, ZIPPER_TRACE_HEADER};

/// One 200 response from a single server.
pub struct ServerResponse {
    pub server: String,
    pub body: Bytes,
}

pub struct HttpQuery {
    group_name: String,
    servers: Vec<String>,
    max_tries: usize,
    limiter: ServerLimiter,
    client: Client<HttpConnector, Empty<Bytes>>,

    counter: AtomicU64,
}

impl HttpQuery {
    pub fn new(
        group_name: &str,
        servers: Vec<String>,
        max_tries: usize,
        limiter: ServerLimiter,
    ) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        HttpQuery {
            group_name: group_name.to_string(),
            servers,
            max_tries,
            limiter,
            client,
            counter: AtomicU64::new(0),
        }
    }

    fn pick_server(&self) -> &str {
        if self.servers.len() == 1 {
            // No shared state to touch here
            return &self.servers[0];
        }

        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let idx = (counter % self.servers.len() as u64) as usize;
        let server = &self.servers[idx];
        tracing::debug!(counter, idx, server, "picked");

        server
    }

    async fn do_request(
        &self,
        ctx: &RequestContext,
        uri: &str,
    ) -> Result<ServerResponse, BackendError> {
        let server = self.pick_server().to_string();

        let url = url::Url::parse(&format!("{server}{uri}"))
            .map_err(|e| BackendError::Http(format!("invalid request url: {e}")))?;

        let request = Request::builder()
            .method(Method::GET)
            .uri(url.as_str())
            .header(API_REQUEST_HEADER, ctx.request_id.as_str())
            .header(ZIPPER_TRACE_HEADER, ctx.trace_id.as_str())
            .body(Empty::new())
            .map_err(|e| BackendError::Http(format!("failed to build request: {e}")))?;

        tracing::debug!(group = %self.group_name, url = %url, "waiting for a slot");
        let _slot = self.limiter.enter(&self.group_name).await?;
        tracing::debug!(group = %self.group_name, "got slot");

        metrics::counter!(BACKEND_REQUESTS.name, "group" => self.group_name.clone()).increment(1);

        let response = self.client.request(request).await.map_err(|e| {
            tracing::error!(group = %self.group_name, server, error = %e, "error fetching result");
            BackendError::Http(e.to_string())
        })?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(BackendError::NotFound);
            }
            status => {
                tracing::error!(group = %self.group_name, server, status = status.as_u16(), "status not ok");
                return Err(BackendError::FailedToFetch {
                    group: self.group_name.clone(),
                    status: status.as_u16(),
                });
            }
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| {
                tracing::error!(group = %self.group_name, server, error = %e, "error reading body");
                BackendError::Http(e.to_string())
            })?;

        Ok(ServerResponse { server, body })
    }

    /// Runs one query with retries, decoding inside each attempt so that a
    /// payload the server mangled is retried like a transport failure.
    ///
    /// Every server gets at least one attempt even when `max_tries` is
    /// configured smaller than the group.
    pub async fn do_query<T>(
        &self,
        ctx: &RequestContext,
        uri: &str,
        decode: impl Fn(&ServerResponse) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let max_tries = self.max_tries.max(self.servers.len());
        let mut last_err = None;

        for attempt in 0..max_tries {
            if attempt > 0 {
                metrics::counter!(BACKEND_RETRIES.name, "group" => self.group_name.clone())
                    .increment(1);
            }

            match self.do_request(ctx, uri).await.and_then(|res| decode(&res)) {
                Ok(decoded) => return Ok(decoded),
                Err(err) if err.is_terminal() => return Err(err),
                Err(err) => last_err = Some(err),
            }
        }

        Err(last_err.unwrap_or_else(|| BackendError::Http("no attempt was made".to_string())))
    }
}
