//! `carbonapi_v3_pb` protocol: protobuf payloads over the storage nodes'
//! HTTP API.

use async_trait::async_trait;
use prost::Message;
use protocol::{
    ListMetricsResponse, MetricDetailsResponse, MultiFetchRequest, MultiFetchResponse,
    MultiGlobRequest, MultiGlobResponse, MultiMetricsInfoRequest, ZipperInfoResponse,
};

use crate::errors::BackendError;
use crate::http_query::{HttpQuery, ServerResponse};
use crate::limiter::ServerLimiter;
use crate::protocols::with_timeout;
use crate::types::{BackendConfig, QueryResult, RequestContext, ServerClient, Stats, Timeouts};

const PAYLOAD_FORMAT: &str = "carbonapi_v3_pb";

pub struct V3HttpGroup {
    group_name: String,
    servers: Vec<String>,
    timeouts: Timeouts,
    query: HttpQuery,
}

impl V3HttpGroup {
    pub fn new(config: BackendConfig, limiter: ServerLimiter) -> Result<Self, BackendError> {
        if config.servers.is_empty() {
            return Err(BackendError::InvalidConfig(format!(
                "no servers specified for group {}",
                config.group_name
            )));
        }

        let query = HttpQuery::new(
            &config.group_name,
            config.servers.clone(),
            config.max_tries,
            limiter,
        );

        Ok(V3HttpGroup {
            group_name: config.group_name,
            servers: config.servers,
            timeouts: config.timeouts,
            query,
        })
    }
}

fn decode_body<T: Message + Default>(response: &ServerResponse) -> Result<T, BackendError> {
    T::decode(response.body.as_ref()).map_err(|e| BackendError::Decode(e.to_string()))
}

fn render_uri(request: &MultiFetchRequest) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query.append_pair("format", PAYLOAD_FORMAT);
    for metric in &request.metrics {
        query.append_pair("target", &metric.name);
    }
    // All metrics of one request share the query window
    if let Some(metric) = request.metrics.first() {
        query.append_pair("from", &metric.start_time.to_string());
        query.append_pair("until", &metric.stop_time.to_string());
    }

    format!("/render/?{}", query.finish())
}

fn find_uri(request: &MultiGlobRequest) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query.append_pair("format", PAYLOAD_FORMAT);
    for glob in &request.metrics {
        query.append_pair("query", glob);
    }

    format!("/metrics/find/?{}", query.finish())
}

fn info_uri(request: &MultiMetricsInfoRequest) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query.append_pair("format", PAYLOAD_FORMAT);
    for name in &request.names {
        query.append_pair("target", name);
    }

    format!("/info/?{}", query.finish())
}

fn list_uri() -> String {
    format!("/metrics/list/?format={PAYLOAD_FORMAT}")
}

fn details_uri() -> String {
    format!("/metrics/details/?format={PAYLOAD_FORMAT}")
}

#[async_trait]
impl ServerClient for V3HttpGroup {
    fn name(&self) -> &str {
        &self.group_name
    }

    fn backends(&self) -> &[String] {
        &self.servers
    }

    async fn fetch(
        &self,
        ctx: &RequestContext,
        request: &MultiFetchRequest,
    ) -> QueryResult<MultiFetchResponse> {
        let mut stats = Stats::for_group(&self.group_name);
        let uri = render_uri(request);

        let result = with_timeout(
            self.timeouts.render,
            self.query
                .do_query(ctx, &uri, decode_body::<MultiFetchResponse>),
        )
        .await;

        match result {
            Ok(response) => {
                stats.memory_usage_bytes = response.encoded_len() as u64;
                (Ok(response), stats)
            }
            Err(err) => {
                stats.render_errors += 1;
                stats.record_failure();
                (Err(err), stats)
            }
        }
    }

    async fn find(
        &self,
        ctx: &RequestContext,
        request: &MultiGlobRequest,
    ) -> QueryResult<MultiGlobResponse> {
        let mut stats = Stats::for_group(&self.group_name);
        let uri = find_uri(request);

        let result = with_timeout(
            self.timeouts.find,
            self.query
                .do_query(ctx, &uri, decode_body::<MultiGlobResponse>),
        )
        .await;

        match result {
            Ok(response) => {
                stats.memory_usage_bytes = response.encoded_len() as u64;
                (Ok(response), stats)
            }
            Err(err) => {
                stats.find_errors += 1;
                stats.record_failure();
                (Err(err), stats)
            }
        }
    }

    async fn info(
        &self,
        ctx: &RequestContext,
        request: &MultiMetricsInfoRequest,
    ) -> QueryResult<ZipperInfoResponse> {
        let mut stats = Stats::for_group(&self.group_name);
        let uri = info_uri(request);

        let result = with_timeout(
            self.timeouts.render,
            self.query
                .do_query(ctx, &uri, decode_body::<ZipperInfoResponse>),
        )
        .await;

        match result {
            Ok(response) => {
                stats.memory_usage_bytes = response.encoded_len() as u64;
                (Ok(response), stats)
            }
            Err(err) => {
                stats.render_errors += 1;
                stats.record_failure();
                (Err(err), stats)
            }
        }
    }

    async fn list(&self, ctx: &RequestContext) -> QueryResult<ListMetricsResponse> {
        let mut stats = Stats::for_group(&self.group_name);

        let result = with_timeout(
            self.timeouts.render,
            self.query
                .do_query(ctx, &list_uri(), decode_body::<ListMetricsResponse>),
        )
        .await;

        match result {
            Ok(response) => {
                stats.memory_usage_bytes = response.encoded_len() as u64;
                (Ok(response), stats)
            }
            Err(err) => {
                stats.render_errors += 1;
                stats.record_failure();
                (Err(err), stats)
            }
        }
    }

    async fn stats(&self, ctx: &RequestContext) -> QueryResult<MetricDetailsResponse> {
        let mut stats = Stats::for_group(&self.group_name);

        let result = with_timeout(
            self.timeouts.render,
            self.query
                .do_query(ctx, &details_uri(), decode_body::<MetricDetailsResponse>),
        )
        .await;

        match result {
            Ok(response) => {
                stats.memory_usage_bytes = response.encoded_len() as u64;
                (Ok(response), stats)
            }
            Err(err) => {
                stats.render_errors += 1;
                stats.record_failure();
                (Err(err), stats)
            }
        }
    }
}
