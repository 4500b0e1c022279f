use shared::metrics_defs::{MetricDef, MetricType};

pub const RUNS: MetricDef = MetricDef {
    name: "publisher.runs",
    metric_type: MetricType::Counter,
    description: "Completed codegen runs. Tagged with outcome and modifier.",
};

pub const RUN_DURATION: MetricDef = MetricDef {
    name: "publisher.run.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of a codegen run in seconds, lock wait excluded. Tagged with modifier.",
};

pub const EVENTS: MetricDef = MetricDef {
    name: "publisher.events",
    metric_type: MetricType::Counter,
    description: "Webhook deliveries accepted. Tagged with event_type.",
};

pub const WEBHOOKS_REJECTED: MetricDef = MetricDef {
    name: "publisher.webhooks.rejected",
    metric_type: MetricType::Counter,
    description: "Webhook deliveries rejected before dispatch. Tagged with reason.",
};

pub const ALL_METRICS: &[MetricDef] = &[RUNS, RUN_DURATION, EVENTS, WEBHOOKS_REJECTED];
