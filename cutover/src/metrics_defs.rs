//! Metrics definitions for the cutover protocol.

use shared::metrics_defs::{MetricDef, MetricKind};

pub const CUTOVER_STARTED: MetricDef = MetricDef {
    name: "cutover.started",
    kind: MetricKind::Counter,
    description: "Number of cutover runs started",
};

pub const CUTOVER_COMPLETED: MetricDef = MetricDef {
    name: "cutover.completed",
    kind: MetricKind::Counter,
    description: "Number of cutover runs that activated successfully",
};

pub const CUTOVER_ROLLED_BACK: MetricDef = MetricDef {
    name: "cutover.rolled_back",
    kind: MetricKind::Counter,
    description: "Number of cutover runs that replayed the rollback journal",
};

pub const FORCED_WARNINGS: MetricDef = MetricDef {
    name: "cutover.forced_warnings",
    kind: MetricKind::Counter,
    description: "Health-check failures downgraded to warnings by force",
};

pub const UNLOCK_FAILURES: MetricDef = MetricDef {
    name: "cutover.unlock_failures",
    kind: MetricKind::Counter,
    description: "Proxies left locked after bounded unlock retries",
};

pub const ALL_METRICS: &[MetricDef] = &[
    CUTOVER_STARTED,
    CUTOVER_COMPLETED,
    CUTOVER_ROLLED_BACK,
    FORCED_WARNINGS,
    UNLOCK_FAILURES,
];
