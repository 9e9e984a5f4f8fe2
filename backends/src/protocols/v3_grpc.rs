//! `carbonapi_v3_grpc` protocol: unary RPCs over one multiplexed channel per
//! group, load-balanced round-robin across the group's servers.

use async_trait::async_trait;
use prost::Message;
use protocol::carbon_v1_client::CarbonV1Client;
use protocol::{
    ListMetricsRequest, ListMetricsResponse, MetricDetailsRequest, MetricDetailsResponse,
    MultiFetchRequest, MultiFetchResponse, MultiGlobRequest, MultiGlobResponse,
    MultiMetricsInfoRequest, ZipperInfoResponse,
};
use tonic::codec::CompressionEncoding;
use tonic::transport::{Channel, Endpoint};

use crate::errors::BackendError;
use crate::types::{BackendConfig, QueryResult, RequestContext, ServerClient, Stats, Timeouts};

pub struct V3GrpcGroup {
    group_name: String,
    servers: Vec<String>,
    timeouts: Timeouts,
    client: CarbonV1Client<Channel>,
}

impl V3GrpcGroup {
    /// Builds the group's channel lazily; connections are established on
    /// first use and torn down when the group is dropped.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        if config.servers.is_empty() {
            return Err(BackendError::InvalidConfig(format!(
                "no servers specified for group {}",
                config.group_name
            )));
        }

        let mut endpoints = Vec::with_capacity(config.servers.len());
        for server in &config.servers {
            let endpoint = Endpoint::from_shared(server.clone())
                .map_err(|e| {
                    BackendError::InvalidConfig(format!("invalid server uri {server}: {e}"))
                })?
                .user_agent("zipper")
                .map_err(|e| BackendError::InvalidConfig(format!("invalid user agent: {e}")))?
                .connect_timeout(config.timeouts.connect);
            endpoints.push(endpoint);
        }

        let channel = Channel::balance_list(endpoints.into_iter());
        let client = CarbonV1Client::new(channel)
            .send_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Gzip)
            .max_decoding_message_size(usize::MAX);

        Ok(V3GrpcGroup {
            group_name: config.group_name.clone(),
            servers: config.servers.clone(),
            timeouts: config.timeouts,
            client,
        })
    }

    fn map_status(&self, status: tonic::Status) -> BackendError {
        match status.code() {
            tonic::Code::NotFound => BackendError::NotFound,
            tonic::Code::DeadlineExceeded | tonic::Code::Cancelled => BackendError::Timeout,
            _ => BackendError::Rpc(status.to_string()),
        }
    }
}

#[async_trait]
impl ServerClient for V3GrpcGroup {
    fn name(&self) -> &str {
        &self.group_name
    }

    fn backends(&self) -> &[String] {
        &self.servers
    }

    async fn fetch(
        &self,
        _ctx: &RequestContext,
        request: &MultiFetchRequest,
    ) -> QueryResult<MultiFetchResponse> {
        let mut stats = Stats::for_group(&self.group_name);

        let mut rpc_request = tonic::Request::new(request.clone());
        rpc_request.set_timeout(self.timeouts.render);

        match self.client.clone().fetch_metrics(rpc_request).await {
            Ok(response) => {
                let response = response.into_inner();
                stats.memory_usage_bytes = response.encoded_len() as u64;
                (Ok(response), stats)
            }
            Err(status) => {
                stats.render_errors += 1;
                stats.record_failure();
                (Err(self.map_status(status)), stats)
            }
        }
    }

    async fn find(
        &self,
        _ctx: &RequestContext,
        request: &MultiGlobRequest,
    ) -> QueryResult<MultiGlobResponse> {
        let mut stats = Stats::for_group(&self.group_name);

        let mut rpc_request = tonic::Request::new(request.clone());
        rpc_request.set_timeout(self.timeouts.find);

        match self.client.clone().find_metrics(rpc_request).await {
            Ok(response) => {
                let response = response.into_inner();
                stats.memory_usage_bytes = response.encoded_len() as u64;
                (Ok(response), stats)
            }
            Err(status) => {
                stats.find_errors += 1;
                stats.record_failure();
                (Err(self.map_status(status)), stats)
            }
        }
    }

    async fn info(
        &self,
        _ctx: &RequestContext,
        request: &MultiMetricsInfoRequest,
    ) -> QueryResult<ZipperInfoResponse> {
        let mut stats = Stats::for_group(&self.group_name);

        let mut rpc_request = tonic::Request::new(request.clone());
        rpc_request.set_timeout(self.timeouts.render);

        match self.client.clone().metrics_info(rpc_request).await {
            Ok(response) => {
                let response = response.into_inner();
                stats.memory_usage_bytes = response.encoded_len() as u64;
                (Ok(response), stats)
            }
            Err(status) => {
                stats.render_errors += 1;
                stats.record_failure();
                (Err(self.map_status(status)), stats)
            }
        }
    }

    async fn list(&self, _ctx: &RequestContext) -> QueryResult<ListMetricsResponse> {
        let mut stats = Stats::for_group(&self.group_name);

        let mut rpc_request = tonic::Request::new(ListMetricsRequest::default());
        rpc_request.set_timeout(self.timeouts.render);

        match self.client.clone().list_metrics(rpc_request).await {
            Ok(response) => {
                let response = response.into_inner();
                stats.memory_usage_bytes = response.encoded_len() as u64;
                (Ok(response), stats)
            }
            Err(status) => {
                stats.render_errors += 1;
                stats.record_failure();
                (Err(self.map_status(status)), stats)
            }
        }
    }

    async fn stats(&self, _ctx: &RequestContext) -> QueryResult<MetricDetailsResponse> {
        let mut stats = Stats::for_group(&self.group_name);

        let mut rpc_request = tonic::Request::new(MetricDetailsRequest::default());
        rpc_request.set_timeout(self.timeouts.render);

        match self.client.clone().stats(rpc_request).await {
            Ok(response) => {
                let response = response.into_inner();
                stats.memory_usage_bytes = response.encoded_len() as u64;
                (Ok(response), stats)
            }
            Err(status) => {
                stats.render_errors += 1;
                stats.record_failure();
                (Err(self.map_status(status)), stats)
            }
        }
    }
}
