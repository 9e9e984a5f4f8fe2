//! Parallel dispatch of one logical query to every replica group.
//!
//! Groups answer independently; results are merged in configured group
//! order, so the first configured group wins ties wherever the mergers
//! prefer existing samples.

use std::collections::BTreeSet;
use std::sync::Arc;

use backends::errors::BackendError;
use backends::types::{QueryResult, RequestContext, ServerClient, Stats};
use merge::{ServerFetchResponse, ServerFindResponse};
use protocol::{
    ListMetricsResponse, MetricDetailsResponse, MultiFetchRequest, MultiFetchResponse,
    MultiGlobRequest, MultiGlobResponse, MultiMetricsInfoRequest, ZipperInfoResponse,
};
use tokio::task::JoinSet;

pub struct Fanout {
    groups: Vec<Arc<dyn ServerClient>>,
}

impl Fanout {
    pub fn new(groups: Vec<Arc<dyn ServerClient>>) -> Self {
        Fanout { groups }
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.name()).collect()
    }

    /// Awaits every spawned task and files its result back into the slot of
    /// the group that produced it, restoring configured order.
    async fn collect<T: Send + 'static>(&self, mut join_set: JoinSet<(usize, T)>) -> Vec<Option<T>> {
        let mut slots: Vec<Option<T>> = (0..self.groups.len()).map(|_| None).collect();

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((position, value)) => slots[position] = Some(value),
                Err(err) => tracing::error!(error = %err, "fan-out task panicked"),
            }
        }

        slots
    }

    pub async fn fetch(
        &self,
        ctx: &RequestContext,
        request: &MultiFetchRequest,
    ) -> ServerFetchResponse {
        let mut join_set = JoinSet::new();
        for (position, group) in self.groups.iter().enumerate() {
            let group = group.clone();
            let ctx = ctx.clone();
            let request = request.clone();
            join_set.spawn(async move {
                let (result, stats) = group.fetch(&ctx, &request).await;
                let envelope = match result {
                    Ok(response) => ServerFetchResponse {
                        response,
                        stats,
                        err: None,
                    },
                    Err(err) => ServerFetchResponse {
                        response: MultiFetchResponse::default(),
                        stats,
                        err: Some(err),
                    },
                };
                (position, envelope)
            });
        }

        let mut merged: Option<ServerFetchResponse> = None;
        for envelope in self.collect(join_set).await.into_iter().flatten() {
            match merged.as_mut() {
                Some(first) => first.merge(&envelope),
                None => merged = Some(envelope),
            }
        }

        merged.unwrap_or_else(|| ServerFetchResponse {
            err: Some(BackendError::NotFound),
            ..Default::default()
        })
    }

    pub async fn find(
        &self,
        ctx: &RequestContext,
        request: &MultiGlobRequest,
    ) -> ServerFindResponse {
        let mut join_set = JoinSet::new();
        for (position, group) in self.groups.iter().enumerate() {
            let group = group.clone();
            let ctx = ctx.clone();
            let request = request.clone();
            join_set.spawn(async move {
                let (result, stats) = group.find(&ctx, &request).await;
                let envelope = match result {
                    Ok(response) => ServerFindResponse {
                        response,
                        stats,
                        err: None,
                    },
                    Err(err) => ServerFindResponse {
                        response: MultiGlobResponse::default(),
                        stats,
                        err: Some(err),
                    },
                };
                (position, envelope)
            });
        }

        let mut merged: Option<ServerFindResponse> = None;
        for envelope in self.collect(join_set).await.into_iter().flatten() {
            match merged.as_mut() {
                Some(first) => first.merge(&envelope),
                None => merged = Some(envelope),
            }
        }

        merged.unwrap_or_else(|| ServerFindResponse {
            err: Some(BackendError::NotFound),
            ..Default::default()
        })
    }

    pub async fn info(
        &self,
        ctx: &RequestContext,
        request: &MultiMetricsInfoRequest,
    ) -> QueryResult<ZipperInfoResponse> {
        let mut join_set = JoinSet::new();
        for (position, group) in self.groups.iter().enumerate() {
            let group = group.clone();
            let ctx = ctx.clone();
            let request = request.clone();
            join_set.spawn(async move { (position, group.info(&ctx, &request).await) });
        }
        let slots = self.collect(join_set).await;

        resolve(slots, |acc: &mut ZipperInfoResponse, value| {
            for (server, info) in value.info {
                acc.info.entry(server).or_insert(info);
            }
        })
    }

    pub async fn list(&self, ctx: &RequestContext) -> QueryResult<ListMetricsResponse> {
        let mut join_set = JoinSet::new();
        for (position, group) in self.groups.iter().enumerate() {
            let group = group.clone();
            let ctx = ctx.clone();
            join_set.spawn(async move { (position, group.list(&ctx).await) });
        }
        let slots = self.collect(join_set).await;

        let (result, stats) = resolve(slots, |acc: &mut ListMetricsResponse, value| {
            acc.metrics.extend(value.metrics);
        });
        let result = result.map(|mut response| {
            let unique: BTreeSet<String> = response.metrics.drain(..).collect();
            response.metrics = unique.into_iter().collect();
            response
        });

        (result, stats)
    }

    pub async fn stats(&self, ctx: &RequestContext) -> QueryResult<MetricDetailsResponse> {
        let mut join_set = JoinSet::new();
        for (position, group) in self.groups.iter().enumerate() {
            let group = group.clone();
            let ctx = ctx.clone();
            join_set.spawn(async move { (position, group.stats(&ctx).await) });
        }
        let slots = self.collect(join_set).await;

        resolve(slots, |acc: &mut MetricDetailsResponse, value| {
            for (name, details) in value.metrics {
                acc.metrics.entry(name).or_insert(details);
            }
            acc.free_space = acc.free_space.saturating_add(value.free_space);
            acc.total_space = acc.total_space.saturating_add(value.total_space);
        })
    }
}

/// Combines per-group results: stats always merge, successful payloads fold
/// together in group order, and the query only fails when every group failed
/// (with the first group's error).
fn resolve<T>(
    slots: Vec<Option<QueryResult<T>>>,
    mut fold: impl FnMut(&mut T, T),
) -> QueryResult<T> {
    let mut stats = Stats::default();
    let mut merged: Option<T> = None;
    let mut first_err = None;

    for (result, group_stats) in slots.into_iter().flatten() {
        stats.merge(&group_stats);
        match result {
            Ok(value) => match merged.as_mut() {
                Some(acc) => fold(acc, value),
                None => merged = Some(value),
            },
            Err(err) => {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
    }

    match merged {
        Some(value) => (Ok(value), stats),
        None => (Err(first_err.unwrap_or(BackendError::NotFound)), stats),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use protocol::{FetchResponse, GlobMatch, GlobResponse};

    /// Group client with canned answers for fan-out tests.
    struct StaticGroup {
        name: String,
        servers: Vec<String>,
        fetch: Result<MultiFetchResponse, BackendError>,
        find: Result<MultiGlobResponse, BackendError>,
        list: Result<ListMetricsResponse, BackendError>,
    }

    impl StaticGroup {
        fn new(name: &str) -> Self {
            StaticGroup {
                name: name.to_string(),
                servers: vec![format!("http://{name}:8080")],
                fetch: Err(BackendError::NotFound),
                find: Err(BackendError::NotFound),
                list: Err(BackendError::NotFound),
            }
        }

        fn group_stats(&self, failed: bool) -> Stats {
            let mut stats = Stats::for_group(&self.name);
            if failed {
                stats.record_failure();
            }
            stats
        }
    }

    #[async_trait]
    impl ServerClient for StaticGroup {
        fn name(&self) -> &str {
            &self.name
        }

        fn backends(&self) -> &[String] {
            &self.servers
        }

        async fn fetch(
            &self,
            _ctx: &RequestContext,
            _request: &MultiFetchRequest,
        ) -> QueryResult<MultiFetchResponse> {
            (self.fetch.clone(), self.group_stats(self.fetch.is_err()))
        }

        async fn find(
            &self,
            _ctx: &RequestContext,
            _request: &MultiGlobRequest,
        ) -> QueryResult<MultiGlobResponse> {
            (self.find.clone(), self.group_stats(self.find.is_err()))
        }

        async fn info(
            &self,
            _ctx: &RequestContext,
            _request: &MultiMetricsInfoRequest,
        ) -> QueryResult<ZipperInfoResponse> {
            (Err(BackendError::NotFound), self.group_stats(true))
        }

        async fn list(&self, _ctx: &RequestContext) -> QueryResult<ListMetricsResponse> {
            (self.list.clone(), self.group_stats(self.list.is_err()))
        }

        async fn stats(&self, _ctx: &RequestContext) -> QueryResult<MetricDetailsResponse> {
            (Err(BackendError::NotFound), self.group_stats(true))
        }
    }

    fn series(name: &str, values: Vec<f64>) -> FetchResponse {
        FetchResponse {
            name: name.to_string(),
            start_time: 0,
            stop_time: 60 * values.len() as i64,
            step_time: 60,
            consolidation_func: "avg".to_string(),
            x_files_factor: 0.0,
            values,
            applied_functions: vec![],
        }
    }

    #[tokio::test]
    async fn fetch_merges_groups_in_configured_order() {
        let mut shard1 = StaticGroup::new("shard1");
        shard1.fetch = Ok(MultiFetchResponse {
            metrics: vec![series("foo", vec![1.0, f64::NAN, 3.0])],
        });
        let mut shard2 = StaticGroup::new("shard2");
        shard2.fetch = Ok(MultiFetchResponse {
            metrics: vec![series("foo", vec![10.0, 2.0, 30.0])],
        });

        let fanout = Fanout::new(vec![Arc::new(shard1), Arc::new(shard2)]);
        let merged = fanout
            .fetch(&RequestContext::default(), &MultiFetchRequest::default())
            .await;

        assert!(merged.err.is_none());
        // shard1 samples win; shard2 fills the gap only
        assert_eq!(merged.response.metrics[0].values, vec![1.0, 2.0, 3.0]);
        assert_eq!(merged.stats.servers, vec!["shard1", "shard2"]);
    }

    #[tokio::test]
    async fn one_failed_group_does_not_fail_the_query() {
        let mut shard1 = StaticGroup::new("shard1");
        shard1.fetch = Err(BackendError::Timeout);
        let mut shard2 = StaticGroup::new("shard2");
        shard2.fetch = Ok(MultiFetchResponse {
            metrics: vec![series("foo", vec![1.0])],
        });

        let fanout = Fanout::new(vec![Arc::new(shard1), Arc::new(shard2)]);
        let merged = fanout
            .fetch(&RequestContext::default(), &MultiFetchRequest::default())
            .await;

        assert!(merged.err.is_none());
        assert_eq!(merged.response.metrics.len(), 1);
        assert_eq!(merged.stats.failed_servers, vec!["shard1"]);
        assert_eq!(merged.stats.servers, vec!["shard2"]);
    }

    #[tokio::test]
    async fn all_not_found_propagates_the_sentinel() {
        let fanout = Fanout::new(vec![
            Arc::new(StaticGroup::new("shard1")),
            Arc::new(StaticGroup::new("shard2")),
        ]);

        let merged = fanout
            .fetch(&RequestContext::default(), &MultiFetchRequest::default())
            .await;

        assert_eq!(merged.err, Some(BackendError::NotFound));
        assert!(merged.response.metrics.is_empty());
    }

    #[tokio::test]
    async fn find_unions_matches_across_groups() {
        let mut shard1 = StaticGroup::new("shard1");
        shard1.find = Ok(MultiGlobResponse {
            metrics: vec![GlobResponse {
                name: "foo.*".to_string(),
                matches: vec![GlobMatch {
                    path: "foo.bar".to_string(),
                    is_leaf: true,
                }],
            }],
        });
        let mut shard2 = StaticGroup::new("shard2");
        shard2.find = Ok(MultiGlobResponse {
            metrics: vec![GlobResponse {
                name: "foo.*".to_string(),
                matches: vec![
                    GlobMatch {
                        path: "foo.bar".to_string(),
                        is_leaf: true,
                    },
                    GlobMatch {
                        path: "foo.qux".to_string(),
                        is_leaf: false,
                    },
                ],
            }],
        });

        let fanout = Fanout::new(vec![Arc::new(shard1), Arc::new(shard2)]);
        let merged = fanout
            .find(&RequestContext::default(), &MultiGlobRequest::default())
            .await;

        assert!(merged.err.is_none());
        assert_eq!(merged.response.metrics.len(), 1);
        assert_eq!(merged.response.metrics[0].matches.len(), 2);
    }

    #[tokio::test]
    async fn list_unions_and_sorts_metric_names() {
        let mut shard1 = StaticGroup::new("shard1");
        shard1.list = Ok(ListMetricsResponse {
            metrics: vec!["foo.b".to_string(), "foo.a".to_string()],
        });
        let mut shard2 = StaticGroup::new("shard2");
        shard2.list = Ok(ListMetricsResponse {
            metrics: vec!["foo.a".to_string(), "foo.c".to_string()],
        });

        let fanout = Fanout::new(vec![Arc::new(shard1), Arc::new(shard2)]);
        let (result, _stats) = fanout.list(&RequestContext::default()).await;

        assert_eq!(result.unwrap().metrics, vec!["foo.a", "foo.b", "foo.c"]);
    }

    #[tokio::test]
    async fn first_group_error_is_surfaced_when_all_fail() {
        let mut shard1 = StaticGroup::new("shard1");
        shard1.list = Err(BackendError::Timeout);
        let mut shard2 = StaticGroup::new("shard2");
        shard2.list = Err(BackendError::Rpc("boom".to_string()));

        let fanout = Fanout::new(vec![Arc::new(shard1), Arc::new(shard2)]);
        let (result, stats) = fanout.list(&RequestContext::default()).await;

        assert_eq!(result.unwrap_err(), BackendError::Timeout);
        assert_eq!(stats.failed_servers, vec!["shard1", "shard2"]);
    }
}
