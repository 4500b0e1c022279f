use shared::metrics_defs::{MetricDef, MetricType};

pub const ARTIFACTS_WRITTEN: MetricDef = MetricDef {
    name: "codegen.artifacts.written",
    metric_type: MetricType::Counter,
    description: "Number of generated artifact files written. Tagged with cloud_provider.",
};

pub const GENERATED_FILES_PURGED: MetricDef = MetricDef {
    name: "codegen.artifacts.purged",
    metric_type: MetricType::Counter,
    description: "Number of previously generated files deleted before regeneration",
};

pub const GENERATION_DURATION: MetricDef = MetricDef {
    name: "codegen.generation.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of one full fan-out run in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[
    ARTIFACTS_WRITTEN,
    GENERATED_FILES_PURGED,
    GENERATION_DURATION,
];
