use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Gateway request duration in seconds. Tagged with route, status.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being processed",
};

pub const BACKEND_REQUEST_DURATION: MetricDef = MetricDef {
    name: "backend.request.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of a single backend call in seconds. Tagged with backend, outcome.",
};

pub const SEARCH_BACKEND_RESULTS: MetricDef = MetricDef {
    name: "search.backend.results",
    metric_type: MetricType::Counter,
    description: "Settled search sub-calls. Tagged with backend, status.",
};

pub const BACKEND_HEALTH: MetricDef = MetricDef {
    name: "backend.healthy",
    metric_type: MetricType::Gauge,
    description: "1 if the backend passed its last status check, 0 otherwise. Tagged with backend.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    BACKEND_REQUEST_DURATION,
    SEARCH_BACKEND_RESULTS,
    BACKEND_HEALTH,
];
