use std::time::Duration;

use async_trait::async_trait;
use protocol::{
    ListMetricsResponse, MetricDetailsResponse, MultiFetchRequest, MultiFetchResponse,
    MultiGlobRequest, MultiGlobResponse, MultiMetricsInfoRequest, ZipperInfoResponse,
};

use crate::errors::BackendError;

/// Header carrying the front-end request id, forwarded on every backend call.
pub const API_REQUEST_HEADER: &str = "x-ctx-carbonapi-uuid";
/// Header carrying the zipper-internal trace id.
pub const ZIPPER_TRACE_HEADER: &str = "x-ctx-carbonzipper-uuid";

/// Request-scoped identifiers carried opaquely from the caller to every
/// backend round-trip.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: String,
    pub trace_id: String,
}

/// Per-request counters and server attribution. Accumulated by group clients
/// and combined across replica groups by the response mergers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    pub render_errors: u64,
    pub find_errors: u64,
    pub merge_errors: u64,
    pub memory_usage_bytes: u64,
    /// Groups that contributed data to the response.
    pub servers: Vec<String>,
    /// Groups that failed to answer.
    pub failed_servers: Vec<String>,
}

impl Stats {
    pub fn for_group(group_name: &str) -> Self {
        Stats {
            servers: vec![group_name.to_string()],
            ..Default::default()
        }
    }

    /// Moves the contributing server list into the failed list.
    pub fn record_failure(&mut self) {
        self.failed_servers = std::mem::take(&mut self.servers);
    }

    /// Sums counters and concatenates the server lists without duplicates.
    pub fn merge(&mut self, other: &Stats) {
        self.render_errors += other.render_errors;
        self.find_errors += other.find_errors;
        self.merge_errors += other.merge_errors;
        self.memory_usage_bytes += other.memory_usage_bytes;

        for server in &other.servers {
            if !self.servers.contains(server) {
                self.servers.push(server.clone());
            }
        }
        for server in &other.failed_servers {
            if !self.failed_servers.contains(server) {
                self.failed_servers.push(server.clone());
            }
        }
    }
}

/// Per-operation deadlines for one replica group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub find: Duration,
    pub render: Duration,
    pub connect: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            find: Duration::from_secs(2),
            render: Duration::from_secs(10),
            connect: Duration::from_millis(200),
        }
    }
}

/// Immutable description of one replica group, as produced by configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub group_name: String,
    /// Ordered list of interchangeable server endpoints, scheme included.
    pub servers: Vec<String>,
    /// Protocol alias resolved through the registry.
    pub protocol: String,
    pub timeouts: Timeouts,
    pub max_tries: usize,
    pub concurrency_limit: Option<usize>,
}

/// The response half of a group operation, paired with the stats the group
/// accumulated while producing it. Stats are returned on both the success and
/// the failure path.
pub type QueryResult<T> = (Result<T, BackendError>, Stats);

/// One replica group of interchangeable servers, queried as a unit.
///
/// Implementations differ in transport only; the five operations and their
/// stats side effects are the shared contract.
#[async_trait]
pub trait ServerClient: Send + Sync {
    fn name(&self) -> &str;

    fn backends(&self) -> &[String];

    async fn fetch(
        &self,
        ctx: &RequestContext,
        request: &MultiFetchRequest,
    ) -> QueryResult<MultiFetchResponse>;

    async fn find(
        &self,
        ctx: &RequestContext,
        request: &MultiGlobRequest,
    ) -> QueryResult<MultiGlobResponse>;

    async fn info(
        &self,
        ctx: &RequestContext,
        request: &MultiMetricsInfoRequest,
    ) -> QueryResult<ZipperInfoResponse>;

    async fn list(&self, ctx: &RequestContext) -> QueryResult<ListMetricsResponse>;

    async fn stats(&self, ctx: &RequestContext) -> QueryResult<MetricDetailsResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_merge_sums_counters() {
        let mut first = Stats {
            render_errors: 1,
            find_errors: 2,
            memory_usage_bytes: 100,
            ..Default::default()
        };
        let second = Stats {
            render_errors: 3,
            merge_errors: 1,
            memory_usage_bytes: 50,
            ..Default::default()
        };

        first.merge(&second);

        assert_eq!(first.render_errors, 4);
        assert_eq!(first.find_errors, 2);
        assert_eq!(first.merge_errors, 1);
        assert_eq!(first.memory_usage_bytes, 150);
    }

    #[test]
    fn stats_merge_dedups_server_lists() {
        let mut first = Stats {
            servers: vec!["a".into(), "b".into()],
            failed_servers: vec!["x".into()],
            ..Default::default()
        };
        let second = Stats {
            servers: vec!["b".into(), "c".into()],
            failed_servers: vec!["x".into(), "y".into()],
            ..Default::default()
        };

        first.merge(&second);

        assert_eq!(first.servers, vec!["a", "b", "c"]);
        assert_eq!(first.failed_servers, vec!["x", "y"]);
    }

    #[test]
    fn record_failure_swaps_lists() {
        let mut stats = Stats::for_group("shard1");
        stats.record_failure();

        assert!(stats.servers.is_empty());
        assert_eq!(stats.failed_servers, vec!["shard1"]);
    }
}
