//! Metric definitions emitted by the backend clients.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

impl MetricType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "Counter",
            MetricType::Gauge => "Gauge",
            MetricType::Histogram => "Histogram",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

pub const BACKEND_REQUESTS: MetricDef = MetricDef {
    name: "backend.requests",
    metric_type: MetricType::Counter,
    description: "Transport attempts against backend servers. Tagged with group.",
};

pub const BACKEND_RETRIES: MetricDef = MetricDef {
    name: "backend.retries",
    metric_type: MetricType::Counter,
    description: "Attempts beyond the first within one query. Tagged with group.",
};

pub const ALL_METRICS: &[MetricDef] = &[BACKEND_REQUESTS, BACKEND_RETRIES];
