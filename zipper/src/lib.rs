pub mod config;
pub mod errors;
pub mod fanout;
pub mod metrics_defs;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use backends::errors::BackendError;
use backends::limiter::ServerLimiter;
use backends::registry::ProtocolRegistry;
use backends::types::{
    API_REQUEST_HEADER, RequestContext, ServerClient, ZIPPER_TRACE_HEADER,
};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::{TokioExecutor, TokioIo};
use prost::Message;
use protocol::{FetchRequest, MultiFetchRequest, MultiGlobRequest, MultiMetricsInfoRequest};
use tokio::net::TcpListener;

use crate::config::Config;
use crate::errors::ZipperError;
use crate::fanout::Fanout;
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_TOTAL};

pub async fn run(config: Config) -> Result<(), ZipperError> {
    let groups = build_groups(&config)?;
    let service = ZipperService::new(Arc::new(Fanout::new(groups)));

    serve(&config.listener.host, config.listener.port, service).await
}

/// Constructs every configured replica group through the protocol registry.
pub fn build_groups(config: &Config) -> Result<Vec<Arc<dyn ServerClient>>, ZipperError> {
    let registry = ProtocolRegistry::with_defaults();

    let mut groups = Vec::with_capacity(config.backends.len());
    for group in &config.backends {
        let backend_config = config.backend_config(group);
        let limiter = match backend_config.concurrency_limit {
            Some(limit) => ServerLimiter::new(&[backend_config.group_name.as_str()], limit),
            None => ServerLimiter::unbounded(),
        };

        let client = registry.construct(backend_config, limiter)?;
        tracing::info!(
            group = client.name(),
            servers = ?client.backends(),
            "configured backend group"
        );
        groups.push(client);
    }

    Ok(groups)
}

async fn serve(host: &str, port: u16, service: ZipperService) -> Result<(), ZipperError> {
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    tracing::info!(host, port, "listening");

    loop {
        let (stream, _peer_addr) = listener.accept().await?;
        let _ = stream.set_nodelay(true);
        let io = TokioIo::new(stream);
        let svc = service.clone();

        // Hand the connection to hyper; auto-detect h1/h2 on this socket
        tokio::spawn(async move {
            let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(io, svc)
                .await;
        });
    }
}

#[derive(Clone)]
pub struct ZipperService {
    fanout: Arc<Fanout>,
}

impl ZipperService {
    pub fn new(fanout: Arc<Fanout>) -> Self {
        ZipperService { fanout }
    }
}

impl<B> Service<Request<B>> for ZipperService {
    type Response = Response<Full<Bytes>>;
    type Error = ZipperError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let fanout = self.fanout.clone();
        let (parts, _body) = req.into_parts();

        Box::pin(async move { Ok(handle(&fanout, &parts.uri, &parts.headers).await) })
    }
}

async fn handle(fanout: &Fanout, uri: &Uri, headers: &HeaderMap) -> Response<Full<Bytes>> {
    let started = Instant::now();
    let ctx = request_context(headers);

    let handler = match uri.path().trim_end_matches('/') {
        "/lb_check" => "lb_check",
        "/render" => "render",
        "/metrics/find" => "find",
        "/info" => "info",
        "/metrics/list" => "list",
        "/metrics/details" => "details",
        _ => "unknown",
    };

    let response = match handler {
        "lb_check" => text_response(StatusCode::OK, "Ok"),
        "render" => render(fanout, &ctx, uri).await,
        "find" => find(fanout, &ctx, uri).await,
        "info" => info(fanout, &ctx, uri).await,
        "list" => list(fanout, &ctx).await,
        "details" => details(fanout, &ctx).await,
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    metrics::counter!(REQUESTS_TOTAL.name, "handler" => handler).increment(1);
    metrics::histogram!(
        REQUEST_DURATION.name,
        "handler" => handler,
        "status" => response.status().as_u16().to_string(),
    )
    .record(started.elapsed().as_secs_f64());

    response
}

async fn render(fanout: &Fanout, ctx: &RequestContext, uri: &Uri) -> Response<Full<Bytes>> {
    let params = query_pairs(uri);
    let targets = param_values(&params, "target");
    let (Some(from), Some(until)) = (param_i64(&params, "from"), param_i64(&params, "until"))
    else {
        return text_response(StatusCode::BAD_REQUEST, "from and until are required");
    };
    if targets.is_empty() {
        return text_response(StatusCode::BAD_REQUEST, "target is required");
    }

    let request = MultiFetchRequest {
        metrics: targets
            .into_iter()
            .map(|name| FetchRequest {
                name,
                start_time: from,
                stop_time: until,
            })
            .collect(),
    };

    let merged = fanout.fetch(ctx, &request).await;
    match merged.err {
        None => protobuf_response(merged.response.encode_to_vec()),
        Some(err) => error_response(&err),
    }
}

async fn find(fanout: &Fanout, ctx: &RequestContext, uri: &Uri) -> Response<Full<Bytes>> {
    let params = query_pairs(uri);
    let queries = param_values(&params, "query");
    if queries.is_empty() {
        return text_response(StatusCode::BAD_REQUEST, "query is required");
    }

    let merged = fanout.find(ctx, &MultiGlobRequest { metrics: queries }).await;
    match merged.err {
        None => protobuf_response(merged.response.encode_to_vec()),
        Some(err) => error_response(&err),
    }
}

async fn info(fanout: &Fanout, ctx: &RequestContext, uri: &Uri) -> Response<Full<Bytes>> {
    let params = query_pairs(uri);
    let targets = param_values(&params, "target");
    if targets.is_empty() {
        return text_response(StatusCode::BAD_REQUEST, "target is required");
    }

    let (result, _stats) = fanout
        .info(ctx, &MultiMetricsInfoRequest { names: targets })
        .await;
    match result {
        Ok(response) => protobuf_response(response.encode_to_vec()),
        Err(err) => error_response(&err),
    }
}

async fn list(fanout: &Fanout, ctx: &RequestContext) -> Response<Full<Bytes>> {
    let (result, _stats) = fanout.list(ctx).await;
    match result {
        Ok(response) => protobuf_response(response.encode_to_vec()),
        Err(err) => error_response(&err),
    }
}

async fn details(fanout: &Fanout, ctx: &RequestContext) -> Response<Full<Bytes>> {
    let (result, _stats) = fanout.stats(ctx).await;
    match result {
        Ok(response) => protobuf_response(response.encode_to_vec()),
        Err(err) => error_response(&err),
    }
}

fn request_context(headers: &HeaderMap) -> RequestContext {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };

    RequestContext {
        request_id: value(API_REQUEST_HEADER),
        trace_id: value(ZIPPER_TRACE_HEADER),
    }
}

fn query_pairs(uri: &Uri) -> Vec<(String, String)> {
    uri.query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn param_values(params: &[(String, String)], name: &str) -> Vec<String> {
    params
        .iter()
        .filter(|(key, _)| key == name)
        .map(|(_, value)| value.clone())
        .collect()
}

fn param_i64(params: &[(String, String)], name: &str) -> Option<i64> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .and_then(|(_, value)| value.parse().ok())
}

fn text_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response
}

fn protobuf_response(payload: Vec<u8>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(payload)));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-protobuf"),
    );
    response
}

fn error_response(err: &BackendError) -> Response<Full<Bytes>> {
    let status = match err {
        BackendError::NotFound => StatusCode::NOT_FOUND,
        BackendError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    text_response(status, &err.to_string())
}
