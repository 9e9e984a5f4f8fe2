use std::collections::{HashMap, HashSet};

use backends::errors::BackendError;
use backends::types::Stats;
use protocol::MultiGlobResponse;

/// One replica group's answer to a glob query.
#[derive(Debug, Clone, Default)]
pub struct ServerFindResponse {
    pub response: MultiGlobResponse,
    pub stats: Stats,
    pub err: Option<BackendError>,
}

impl ServerFindResponse {
    /// Folds `second` into `self`, unioning matches by `(metric, path)`.
    ///
    /// Stats combine unconditionally. If `second` failed its data is ignored
    /// and `self` is left as-is; if `self` had failed and `second` did not,
    /// the error is cleared.
    pub fn merge(&mut self, second: &ServerFindResponse) {
        self.stats.merge(&second.stats);
        if second.err.is_some() {
            return;
        }

        let mut seen_metrics = HashMap::new();
        let mut seen_matches = HashSet::new();
        for (i, metric) in self.response.metrics.iter().enumerate() {
            seen_metrics.insert(metric.name.clone(), i);
            for glob_match in &metric.matches {
                seen_matches.insert(format!("{}.{}", metric.name, glob_match.path));
            }
        }

        for metric in &second.response.metrics {
            let Some(&i) = seen_metrics.get(&metric.name) else {
                self.response.metrics.push(metric.clone());
                continue;
            };
            for glob_match in &metric.matches {
                let key = format!("{}.{}", metric.name, glob_match.path);
                if seen_matches.insert(key) {
                    self.response.metrics[i].matches.push(glob_match.clone());
                }
            }
        }

        if self.err.is_some() && second.err.is_none() {
            self.err = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{GlobMatch, GlobResponse};
    use std::collections::BTreeSet;

    fn glob_match(path: &str, is_leaf: bool) -> GlobMatch {
        GlobMatch {
            path: path.to_string(),
            is_leaf,
        }
    }

    fn find_response(metrics: Vec<(&str, Vec<GlobMatch>)>) -> ServerFindResponse {
        ServerFindResponse {
            response: MultiGlobResponse {
                metrics: metrics
                    .into_iter()
                    .map(|(name, matches)| GlobResponse {
                        name: name.to_string(),
                        matches,
                    })
                    .collect(),
            },
            stats: Stats::default(),
            err: None,
        }
    }

    /// Flattens to `(metric, path)` pairs for order-insensitive comparison.
    fn match_set(response: &ServerFindResponse) -> BTreeSet<(String, String)> {
        response
            .response
            .metrics
            .iter()
            .flat_map(|m| {
                m.matches
                    .iter()
                    .map(|g| (m.name.clone(), g.path.clone()))
            })
            .collect()
    }

    #[test]
    fn disjoint_metrics_are_appended() {
        let mut first = find_response(vec![("foo.*", vec![glob_match("foo.bar", true)])]);
        let second = find_response(vec![("baz.*", vec![glob_match("baz.qux", true)])]);

        first.merge(&second);

        assert_eq!(first.response.metrics.len(), 2);
        assert_eq!(first.response.metrics[0].name, "foo.*");
        assert_eq!(first.response.metrics[1].name, "baz.*");
    }

    #[test]
    fn duplicate_matches_are_dropped() {
        let mut first = find_response(vec![(
            "foo.*",
            vec![glob_match("foo.bar", true), glob_match("foo.baz", false)],
        )]);
        let second = find_response(vec![(
            "foo.*",
            vec![glob_match("foo.bar", true), glob_match("foo.new", true)],
        )]);

        first.merge(&second);

        assert_eq!(first.response.metrics.len(), 1);
        let paths: Vec<&str> = first.response.metrics[0]
            .matches
            .iter()
            .map(|m| m.path.as_str())
            .collect();
        assert_eq!(paths, vec!["foo.bar", "foo.baz", "foo.new"]);
    }

    #[test]
    fn merge_is_commutative_as_a_set() {
        let a = find_response(vec![
            ("foo.*", vec![glob_match("foo.bar", true)]),
            ("baz.*", vec![glob_match("baz.one", true)]),
        ]);
        let b = find_response(vec![(
            "foo.*",
            vec![glob_match("foo.bar", true), glob_match("foo.other", false)],
        )]);

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);

        assert_eq!(match_set(&ab), match_set(&ba));
    }

    #[test]
    fn failed_second_leaves_data_untouched() {
        let mut first = find_response(vec![("foo.*", vec![glob_match("foo.bar", true)])]);
        let mut second = find_response(vec![("baz.*", vec![glob_match("baz.qux", true)])]);
        second.err = Some(BackendError::Timeout);
        second.stats.find_errors = 1;

        first.merge(&second);

        assert_eq!(first.response.metrics.len(), 1);
        assert_eq!(first.stats.find_errors, 1);
    }

    #[test]
    fn successful_second_clears_first_error() {
        let mut first = find_response(vec![]);
        first.err = Some(BackendError::NotFound);
        let second = find_response(vec![("foo.*", vec![glob_match("foo.bar", true)])]);

        first.merge(&second);

        assert!(first.err.is_none());
        assert_eq!(first.response.metrics.len(), 1);
    }

    #[test]
    fn stats_always_combine() {
        let mut first = find_response(vec![]);
        first.stats.servers = vec!["shard1".to_string()];
        let mut second = find_response(vec![]);
        second.stats.servers = vec!["shard2".to_string()];
        second.err = Some(BackendError::Timeout);

        first.merge(&second);

        assert_eq!(first.stats.servers, vec!["shard1", "shard2"]);
    }
}
