//! Fusing time-series responses from independently-sampled replicas.

use std::collections::HashMap;

use backends::errors::BackendError;
use backends::types::Stats;
use protocol::{FetchResponse, MultiFetchResponse};

use crate::errors::MergeError;

/// One replica group's answer to a fetch, plus the stats it accumulated.
#[derive(Debug, Clone, Default)]
pub struct ServerFetchResponse {
    pub response: MultiFetchResponse,
    pub stats: Stats,
    pub err: Option<BackendError>,
}

/// Fuses `m2` into `m1`, reconciling step times and filling gaps.
///
/// `m1` keeps every sample it has; `m2` only contributes where `m1` has a
/// gap, so merge order decides ties. When the series disagree in length the
/// longer one ends up in `m1` (the arguments are swapped in place if needed)
/// and the coarser one is resampled onto `m1`'s grid by nearest-lower
/// sample, provided `m2`'s window ends on the step boundary that truncating
/// `m1`'s stop time to `m2`'s step yields. Anything else is garbage data and
/// rejected with [`MergeError::ResponseLengthMismatch`].
pub fn merge_fetch_responses(
    m1: &mut FetchResponse,
    m2: &mut FetchResponse,
) -> Result<(), MergeError> {
    if m1.values.len() != m2.values.len() {
        let mut interpolate = false;
        if m1.values.len() < m2.values.len() {
            std::mem::swap(m1, m2);
        }

        let mut padded = false;
        if m1.step_time < m2.step_time {
            interpolate = true;
        } else if m1.start_time == m2.start_time {
            m2.values.resize(m1.values.len(), f64::NAN);
            padded = true;
        }

        if !padded {
            // A non-positive step would loop forever below; same bucket as
            // any other unmergeable pair.
            if m1.step_time <= 0 || m2.step_time <= 0 {
                return Err(MergeError::ResponseLengthMismatch);
            }

            // TODO: stop times differing beyond the boundary guard below
            // should eventually pad with NaNs instead of being rejected.
            if !interpolate || m1.stop_time - m1.stop_time % m2.step_time != m2.stop_time {
                tracing::error!(
                    metric_values = m2.values.len(),
                    response_values = m1.values.len(),
                    "unable to merge values"
                );
                return Err(MergeError::ResponseLengthMismatch);
            }

            let mut values = Vec::with_capacity(m1.values.len());
            let mut ts = m1.start_time;
            while ts < m1.stop_time {
                let idx = ((ts - m1.start_time) / m2.step_time) as usize;
                let Some(&value) = m2.values.get(idx) else {
                    return Err(MergeError::ResponseLengthMismatch);
                };
                values.push(value);
                ts += m1.step_time;
            }
            m2.values = values;
            m2.step_time = m1.step_time;
            m2.start_time = m1.start_time;
            m2.stop_time = m1.stop_time;
        }
    }

    if m1.start_time != m2.start_time {
        return Err(MergeError::ResponseStartTimeMismatch);
    }

    for (v1, v2) in m1.values.iter_mut().zip(&m2.values) {
        if v1.is_nan() && !v2.is_nan() {
            *v1 = *v2;
        }
    }

    Ok(())
}

impl ServerFetchResponse {
    /// Folds `second` into `self`. Stats always combine; data merges only
    /// when `second` succeeded. A pair that cannot be fused is counted and
    /// skipped, the remaining metrics still merge.
    pub fn merge(&mut self, second: &ServerFetchResponse) {
        self.stats.merge(&second.stats);

        if second.err.is_some() {
            return;
        }

        let mut index = HashMap::new();
        for (i, metric) in self.response.metrics.iter().enumerate() {
            index.insert(metric.name.clone(), i);
        }

        for metric in &second.response.metrics {
            match index.get(&metric.name) {
                Some(&i) => {
                    let mut incoming = metric.clone();
                    if let Err(err) =
                        merge_fetch_responses(&mut self.response.metrics[i], &mut incoming)
                    {
                        tracing::error!(name = %metric.name, error = %err, "unable to merge metric");
                        self.stats.merge_errors += 1;
                    }
                }
                None => self.response.metrics.push(metric.clone()),
            }
        }

        if self.err.is_some() && second.err.is_none() {
            self.err = None;
        }
    }
}
