use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "gateway.request.duration",
    metric_type: MetricType::Histogram,
    description: "Gateway request duration in seconds. Tagged with route and status.",
};

pub const UPSTREAM_ATTEMPTS: MetricDef = MetricDef {
    name: "gateway.upstream.attempts",
    metric_type: MetricType::Counter,
    description: "Upstream calls issued. Tagged with attempt (forward, primary, fallback) and outcome.",
};

pub const UPSTREAM_DURATION: MetricDef = MetricDef {
    name: "gateway.upstream.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of a single upstream call in seconds. Tagged with attempt.",
};

pub const LOGIN_FALLBACKS: MetricDef = MetricDef {
    name: "gateway.login.fallbacks",
    metric_type: MetricType::Counter,
    description: "Login requests that needed the fallback endpoint",
};

pub const LOGIN_EMAIL_UNVERIFIED: MetricDef = MetricDef {
    name: "gateway.login.email_unverified",
    metric_type: MetricType::Counter,
    description: "Login failures classified as email not verified. Tagged with the matching rule.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    UPSTREAM_ATTEMPTS,
    UPSTREAM_DURATION,
    LOGIN_FALLBACKS,
    LOGIN_EMAIL_UNVERIFIED,
];
